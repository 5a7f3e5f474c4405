use serde::{Deserialize, Serialize};

/// PCM layout shared by every Block and Package of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Bytes per sample (2 = s16le, 4 = f32le).
    pub sample_width: u16,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl StreamFormat {
    pub fn new(sample_width: u16, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_width,
            sample_rate,
            channel_count,
        }
    }

    /// 16-bit mono, the format produced by live capture.
    pub fn mono_s16(sample_rate: u32) -> Self {
        Self::new(2, sample_rate, 1)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.sample_width as usize * self.channel_count as usize
    }

    /// Number of whole frames in `bytes` bytes of interleaved PCM.
    pub fn frames_in(&self, bytes: usize) -> u64 {
        match self.bytes_per_frame() {
            0 => 0,
            n => (bytes / n) as u64,
        }
    }

    /// Wall-clock duration covered by `frames` frames.
    pub fn duration_of_frames(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if ![1, 2, 3, 4].contains(&self.sample_width) {
            return Err(format!("unsupported sample width: {}", self.sample_width));
        }
        if self.channel_count == 0 {
            return Err("channel count must be positive".into());
        }
        Ok(())
    }
}

/// A raw audio fragment as produced by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub payload: Vec<u8>,
    /// Epoch seconds of the first frame in `payload`.
    pub timestamp: f64,
}

impl Block {
    pub fn new(payload: Vec<u8>, timestamp: f64) -> Self {
        Self { payload, timestamp }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn frames(&self, format: &StreamFormat) -> u64 {
        format.frames_in(self.payload.len())
    }
}

/// An audio input device available for live capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frames_and_duration() {
        let format = StreamFormat::mono_s16(48000);
        assert_eq!(format.bytes_per_frame(), 2);
        assert_eq!(format.frames_in(96000), 48000);
        assert_relative_eq!(format.duration_of_frames(48000), 1.0);
    }

    #[test]
    fn partial_frames_are_not_counted() {
        let format = StreamFormat::new(2, 44100, 2);
        assert_eq!(format.frames_in(7), 1);
    }

    #[test]
    fn validate_rejects_zero_rate() {
        assert!(StreamFormat::new(2, 0, 1).validate().is_err());
        assert!(StreamFormat::new(5, 48000, 1).validate().is_err());
        assert!(StreamFormat::new(2, 48000, 1).validate().is_ok());
    }
}
