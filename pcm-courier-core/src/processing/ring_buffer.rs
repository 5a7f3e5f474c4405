use std::collections::VecDeque;

/// Bounded FIFO of mono f32 samples between a device callback and the
/// capture thread.
///
/// Shared as `Arc<parking_lot::Mutex<RingBuffer>>`. When full, the oldest
/// samples are discarded so the device callback never waits.
#[derive(Debug)]
pub struct RingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append samples, discarding the oldest ones on overrun.
    ///
    /// Returns how many samples were lost. When `incoming` alone exceeds the
    /// capacity only its newest `capacity` samples are kept.
    pub fn write(&mut self, incoming: &[f32]) -> usize {
        let kept = &incoming[incoming.len().saturating_sub(self.capacity)..];
        let mut lost = incoming.len() - kept.len();

        let excess = (self.samples.len() + kept.len()).saturating_sub(self.capacity);
        if excess > 0 {
            self.samples.drain(..excess);
            lost += excess;
        }
        self.samples.extend(kept);
        lost
    }

    /// Remove and return up to `count` of the oldest samples.
    pub fn read(&mut self, count: usize) -> Vec<f32> {
        let n = count.min(self.samples.len());
        self.samples.drain(..n).collect()
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_across_reads() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.write(&[0.1, 0.2, 0.3, 0.4, 0.5]), 0);

        assert_eq!(ring.read(2), vec![0.1, 0.2]);
        assert_eq!(ring.count(), 3);
        assert_eq!(ring.read(100), vec![0.3, 0.4, 0.5]);
        assert!(ring.is_empty());
        assert!(ring.read(1).is_empty());
    }

    #[test]
    fn overrun_discards_oldest() {
        let mut ring = RingBuffer::new(4);
        ring.write(&[1.0, 2.0, 3.0]);
        assert_eq!(ring.write(&[4.0, 5.0, 6.0]), 2);
        assert_eq!(ring.read(4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn oversized_write_keeps_newest() {
        let mut ring = RingBuffer::new(3);
        ring.write(&[9.0]);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3);
        assert_eq!(ring.read(3), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn interleaved_writes_and_block_reads() {
        let mut ring = RingBuffer::new(6);
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.read(3), vec![1.0, 2.0, 3.0]);
        ring.write(&[5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(ring.count(), 6);
        assert_eq!(ring.read(3), vec![4.0, 5.0, 6.0]);
        assert_eq!(ring.read(3), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn zero_capacity_holds_one_sample() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.write(&[]), 0);
        assert_eq!(ring.write(&[1.0, 2.0]), 1);
        assert_eq!(ring.read(5), vec![2.0]);
    }
}
