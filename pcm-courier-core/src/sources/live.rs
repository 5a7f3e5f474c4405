//! Push source over a live capture provider.
//!
//! ```text
//! [Provider thread] → downmix/resample → [RingBuffer]
//!        [pcm-courier-capture] → s16le Block → bounded channel → next_block()
//! ```
//!
//! The ring buffer absorbs short stalls and drops the oldest samples when it
//! overruns; the channel blocks the capture thread when delivery falls
//! behind, so memory stays bounded by both capacities.
//!
//! A block is stamped with the capture time of its first sample: the arrival
//! time of the newest buffered sample minus the audio still queued ahead of
//! it. Blocks drained from a backlog therefore keep their spacing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use super::{BlockSource, SourceKind, SourcePoll};
use crate::models::audio_models::{Block, InputDevice, StreamFormat};
use crate::models::error::CourierError;
use crate::processing::converter::{Resampler, SampleConverter};
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::capture_provider::{AudioBufferCallback, CaptureFaultCallback, CaptureProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings for a live capture source.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    /// Output rate of the mono s16le stream.
    pub sample_rate: u32,
    /// Audio covered by one block.
    pub block_duration: Duration,
    /// Blocks the channel holds before capture blocks.
    pub queue_capacity: usize,
    /// Audio the ring buffer holds before dropping the oldest samples.
    pub ring_duration: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_duration: Duration::from_secs(1),
            queue_capacity: 256,
            ring_duration: Duration::from_secs(10),
        }
    }
}

impl LiveConfig {
    pub fn block_frames(&self) -> usize {
        ((self.sample_rate as f64 * self.block_duration.as_secs_f64()).round() as usize).max(1)
    }

    fn ring_capacity(&self) -> usize {
        let ring = (self.sample_rate as f64 * self.ring_duration.as_secs_f64()).round() as usize;
        ring.max(self.block_frames() * 2)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.block_duration.is_zero() {
            return Err("block duration must be positive".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be at least 1".into());
        }
        Ok(())
    }
}

/// Counters shared between the device callback, the capture thread and the
/// consumer.
#[derive(Debug, Default)]
struct LiveCounters {
    blocks_sent: AtomicU64,
    samples_dropped: AtomicU64,
    backpressure_stalls: AtomicU64,
}

/// Snapshot of a live source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub blocks_sent: u64,
    /// Samples discarded because the ring buffer overran.
    pub samples_dropped: u64,
    /// Times the capture thread found the channel full.
    pub backpressure_stalls: u64,
}

/// Samples waiting for the capture thread.
struct CaptureBuffer {
    ring: RingBuffer,
    sample_rate: f64,
    /// Wall-clock arrival of the newest sample in `ring`.
    newest_at: f64,
}

impl CaptureBuffer {
    fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            sample_rate: sample_rate as f64,
            newest_at: 0.0,
        }
    }

    /// Append freshly captured samples. Returns how many old ones were lost.
    fn push(&mut self, samples: &[f32], arrived_at: f64) -> usize {
        if samples.is_empty() {
            return 0;
        }
        self.newest_at = arrived_at;
        self.ring.write(samples)
    }

    /// Remove up to `count` of the oldest samples along with the capture time
    /// of the first one.
    fn take(&mut self, count: usize) -> (Vec<f32>, f64) {
        let first_at = self.newest_at - self.ring.count() as f64 / self.sample_rate;
        (self.ring.read(count), first_at)
    }
}

enum CaptureEvent {
    Block(Block),
    Fault(CourierError),
}

/// Blocks from a live input device, produced on a dedicated capture thread.
pub struct LiveSource {
    format: StreamFormat,
    device: InputDevice,
    receiver: Option<Receiver<CaptureEvent>>,
    counters: Arc<LiveCounters>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    finished: bool,
}

impl LiveSource {
    /// Open the device and start the capture thread.
    ///
    /// Device-open failures are returned here. Clearing `running` stops the
    /// provider; the partial block still buffered is sent before the
    /// channel closes.
    pub fn start(
        mut provider: Box<dyn CaptureProvider>,
        config: LiveConfig,
        running: Arc<AtomicBool>,
    ) -> Result<Self, CourierError> {
        config.validate().map_err(CourierError::ConfigurationFailed)?;
        if !provider.is_available() {
            return Err(CourierError::DeviceNotAvailable(provider.device_info().name));
        }

        let device = provider.device_info();
        let format = StreamFormat::mono_s16(config.sample_rate);
        let buffer = Arc::new(Mutex::new(CaptureBuffer::new(config.ring_capacity(), config.sample_rate)));
        let counters = Arc::new(LiveCounters::default());
        let fault: Arc<Mutex<Option<CourierError>>> = Arc::new(Mutex::new(None));

        let on_samples: AudioBufferCallback = {
            let buffer = Arc::clone(&buffer);
            let counters = Arc::clone(&counters);
            let resampler = Mutex::new(Resampler::new(config.sample_rate as f64));
            Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
                let arrived_at = wall_clock_seconds();
                let mono = SampleConverter::downmix_to_mono(samples, channels as usize);
                let resampled = resampler.lock().process(&mono, sample_rate);
                let dropped = buffer.lock().push(&resampled, arrived_at);
                if dropped > 0 {
                    counters.samples_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                }
            })
        };
        let on_fault: CaptureFaultCallback = {
            let fault = Arc::clone(&fault);
            Arc::new(move |error: CourierError| {
                fault.lock().get_or_insert(error);
            })
        };

        provider.start(on_samples, on_fault)?;
        log::info!(
            "capturing from {} at {} Hz, {} frames per block",
            device.name,
            config.sample_rate,
            config.block_frames()
        );

        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker {
            provider,
            buffer,
            fault,
            sender,
            counters: Arc::clone(&counters),
            running,
            shutdown: Arc::clone(&shutdown),
            block_frames: config.block_frames(),
        };

        let handle = thread::Builder::new()
            .name("pcm-courier-capture".into())
            .spawn(move || worker.run())
            .map_err(|e| CourierError::CaptureFailed(format!("failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            format,
            device,
            receiver: Some(receiver),
            counters,
            shutdown,
            handle: Some(handle),
            finished: false,
        })
    }

    pub fn device(&self) -> &InputDevice {
        &self.device
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            blocks_sent: self.counters.blocks_sent.load(Ordering::Relaxed),
            samples_dropped: self.counters.samples_dropped.load(Ordering::Relaxed),
            backpressure_stalls: self.counters.backpressure_stalls.load(Ordering::Relaxed),
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

impl BlockSource for LiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Push
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_block(&mut self, timeout: Option<Duration>) -> Result<SourcePoll, CourierError> {
        if self.finished {
            return Ok(SourcePoll::Exhausted);
        }
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(SourcePoll::Exhausted);
        };

        let event = match timeout {
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => return Ok(SourcePoll::Idle),
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => receiver.recv().ok(),
        };

        match event {
            Some(CaptureEvent::Block(block)) => Ok(SourcePoll::Block(block)),
            Some(CaptureEvent::Fault(error)) => {
                self.finished = true;
                self.join_worker();
                Err(error)
            }
            None => {
                self.finished = true;
                self.join_worker();
                let stats = self.stats();
                log::info!(
                    "capture drained: {} blocks, {} samples dropped, {} backpressure stalls",
                    stats.blocks_sent,
                    stats.samples_dropped,
                    stats.backpressure_stalls
                );
                Ok(SourcePoll::Exhausted)
            }
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // unblocks a capture thread waiting on a full channel
        self.receiver = None;
        self.join_worker();
    }
}

/// State owned by the capture thread.
struct CaptureWorker {
    provider: Box<dyn CaptureProvider>,
    buffer: Arc<Mutex<CaptureBuffer>>,
    fault: Arc<Mutex<Option<CourierError>>>,
    sender: Sender<CaptureEvent>,
    counters: Arc<LiveCounters>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    block_frames: usize,
}

enum Wake {
    BlockReady,
    Cancelled,
    Fault(CourierError),
}

impl CaptureWorker {
    fn run(mut self) {
        let mut reported_drops = 0u64;
        let mut stalled = false;
        let mut last_timestamp = f64::MIN;

        loop {
            let wake = self.wait_for_block();

            let dropped = self.counters.samples_dropped.load(Ordering::Relaxed);
            if dropped > reported_drops {
                log::warn!("ring buffer overran; {} samples dropped so far", dropped);
                reported_drops = dropped;
            }

            match wake {
                Wake::BlockReady => {
                    let (samples, first_at) = self.buffer.lock().take(self.block_frames);
                    // callback jitter must not reorder the timeline
                    last_timestamp = last_timestamp.max(first_at);
                    let block = Block::new(SampleConverter::to_s16le(&samples), last_timestamp);
                    if !self.send(CaptureEvent::Block(block), &mut stalled) {
                        break;
                    }
                }
                Wake::Cancelled => {
                    self.stop_provider();
                    self.flush_partial(last_timestamp, &mut stalled);
                    log::info!("capture cancelled");
                    break;
                }
                Wake::Fault(error) => {
                    log::error!("capture device failed: {}", error);
                    self.stop_provider();
                    self.flush_partial(last_timestamp, &mut stalled);
                    let error = match error {
                        CourierError::CaptureFailed(_) => error,
                        other => CourierError::CaptureFailed(other.to_string()),
                    };
                    self.send(CaptureEvent::Fault(error), &mut stalled);
                    break;
                }
            }
        }
        // dropping the sender closes the channel
    }

    fn wait_for_block(&self) -> Wake {
        loop {
            if self.buffer.lock().ring.count() >= self.block_frames {
                return Wake::BlockReady;
            }
            if let Some(error) = self.fault.lock().take() {
                return Wake::Fault(error);
            }
            if !self.running.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
                return Wake::Cancelled;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop_provider(&mut self) {
        if let Err(e) = self.provider.stop() {
            log::warn!("failed to stop capture device: {}", e);
        }
    }

    fn flush_partial(&self, last_timestamp: f64, stalled: &mut bool) {
        let (samples, first_at) = {
            let mut buffer = self.buffer.lock();
            let count = buffer.ring.count();
            buffer.take(count)
        };
        if samples.is_empty() {
            return;
        }
        log::debug!("flushing {} buffered samples", samples.len());
        let block = Block::new(SampleConverter::to_s16le(&samples), first_at.max(last_timestamp));
        self.send(CaptureEvent::Block(block), stalled);
    }

    /// Send an event, blocking while the channel is full. Returns false once
    /// the consumer is gone.
    fn send(&self, event: CaptureEvent, stalled: &mut bool) -> bool {
        let is_block = matches!(event, CaptureEvent::Block(_));
        let sent = match self.sender.try_send(event) {
            Ok(()) => {
                *stalled = false;
                true
            }
            Err(TrySendError::Full(event)) => {
                if !*stalled {
                    log::warn!("delivery is falling behind; capture is waiting on a full queue");
                    *stalled = true;
                }
                self.counters.backpressure_stalls.fetch_add(1, Ordering::Relaxed);
                self.sender.send(event).is_ok()
            }
            Err(TrySendError::Disconnected(_)) => false,
        };
        if sent && is_block {
            self.counters.blocks_sent.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }
}

/// Current wall-clock time as epoch seconds.
pub fn wall_clock_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Delivers a fixed script of buffers from `start`, optionally followed
    /// by a fault.
    struct ScriptedProvider {
        script: Vec<Vec<f32>>,
        channels: u16,
        rate: f64,
        fault: Option<CourierError>,
        fail_open: bool,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Vec<f32>>) -> Self {
            Self {
                script,
                channels: 1,
                rate: 8000.0,
                fault: None,
                fail_open: false,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl CaptureProvider for ScriptedProvider {
        fn is_available(&self) -> bool {
            true
        }

        fn start(&mut self, on_samples: AudioBufferCallback, on_fault: CaptureFaultCallback) -> Result<(), CourierError> {
            if self.fail_open {
                return Err(CourierError::DeviceNotAvailable("scripted".into()));
            }
            for buffer in &self.script {
                on_samples(buffer, self.rate, self.channels);
            }
            if let Some(error) = self.fault.take() {
                on_fault(error);
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CourierError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn device_info(&self) -> InputDevice {
            InputDevice {
                index: 0,
                name: "scripted".into(),
                is_default: true,
            }
        }
    }

    fn config() -> LiveConfig {
        LiveConfig {
            sample_rate: 8000,
            block_duration: Duration::from_millis(100),
            queue_capacity: 4,
            ring_duration: Duration::from_secs(2),
        }
    }

    fn expect_block(source: &mut LiveSource) -> Block {
        match source.next_block(Some(Duration::from_secs(5))).unwrap() {
            SourcePoll::Block(block) => block,
            other => panic!("expected a block, got {:?}", other),
        }
    }

    #[test]
    fn full_blocks_then_partial_flush_on_cancel() {
        // 2.5 blocks of 800 frames
        let provider = ScriptedProvider::new(vec![vec![0.25; 2000]]);
        let stopped = Arc::clone(&provider.stopped);
        let running = Arc::new(AtomicBool::new(true));
        let mut source = LiveSource::start(Box::new(provider), config(), Arc::clone(&running)).unwrap();

        assert_eq!(source.kind(), SourceKind::Push);
        assert_eq!(source.format(), StreamFormat::mono_s16(8000));

        let first = expect_block(&mut source);
        let second = expect_block(&mut source);
        assert_eq!(first.payload.len(), 1600);
        assert_eq!(second.payload.len(), 1600);
        assert_relative_eq!(second.timestamp - first.timestamp, 0.1, epsilon = 1e-5);

        running.store(false, Ordering::SeqCst);
        let last = expect_block(&mut source);
        assert_eq!(last.payload.len(), 800);
        assert_relative_eq!(last.timestamp - second.timestamp, 0.1, epsilon = 1e-5);
        assert_eq!(source.next_block(None).unwrap(), SourcePoll::Exhausted);
        assert_eq!(source.next_block(None).unwrap(), SourcePoll::Exhausted);
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(source.stats().blocks_sent, 3);
    }

    #[test]
    fn samples_are_converted_to_mono_s16() {
        let mut provider = ScriptedProvider::new(vec![[0.5f32, -0.5].repeat(800)]);
        provider.channels = 2;
        let running = Arc::new(AtomicBool::new(true));
        let mut source = LiveSource::start(Box::new(provider), config(), running).unwrap();

        let block = expect_block(&mut source);
        assert_eq!(block.payload.len(), 1600);
        assert!(block.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn idle_when_nothing_arrives() {
        let running = Arc::new(AtomicBool::new(true));
        let mut source = LiveSource::start(Box::new(ScriptedProvider::new(vec![])), config(), running).unwrap();
        assert_eq!(source.next_block(Some(Duration::from_millis(30))).unwrap(), SourcePoll::Idle);
    }

    #[test]
    fn fault_is_reported_after_captured_blocks() {
        let mut provider = ScriptedProvider::new(vec![vec![0.1; 1200]]);
        provider.fault = Some(CourierError::CaptureFailed("device unplugged".into()));
        let running = Arc::new(AtomicBool::new(true));
        let mut source = LiveSource::start(Box::new(provider), config(), running).unwrap();

        assert_eq!(expect_block(&mut source).payload.len(), 1600);
        assert_eq!(expect_block(&mut source).payload.len(), 800);
        let err = source.next_block(Some(Duration::from_secs(5))).unwrap_err();
        assert_eq!(err, CourierError::CaptureFailed("device unplugged".into()));
        assert_eq!(source.next_block(None).unwrap(), SourcePoll::Exhausted);
    }

    #[test]
    fn open_failure_is_synchronous() {
        let mut provider = ScriptedProvider::new(vec![]);
        provider.fail_open = true;
        let result = LiveSource::start(Box::new(provider), config(), Arc::new(AtomicBool::new(true)));
        assert!(matches!(result, Err(CourierError::DeviceNotAvailable(_))));
    }

    #[test]
    fn full_queue_applies_backpressure_without_losing_blocks() {
        // ten blocks queued against a capacity of four
        let provider = ScriptedProvider::new(vec![vec![0.0; 8000]]);
        let running = Arc::new(AtomicBool::new(true));
        let before = wall_clock_seconds();
        let mut source = LiveSource::start(Box::new(provider), config(), Arc::clone(&running)).unwrap();
        let after = wall_clock_seconds();

        thread::sleep(Duration::from_millis(200));
        let blocks: Vec<Block> = (0..10).map(|_| expect_block(&mut source)).collect();

        // the backlog keeps its 100 ms spacing, ending when the audio arrived
        assert!(blocks[0].timestamp >= before - 1.0 - 1e-3);
        assert!(blocks[0].timestamp <= after - 1.0 + 1e-3);
        for pair in blocks.windows(2) {
            assert_relative_eq!(pair[1].timestamp - pair[0].timestamp, 0.1, epsilon = 1e-5);
        }
        running.store(false, Ordering::SeqCst);
        assert_eq!(source.next_block(None).unwrap(), SourcePoll::Exhausted);
        assert!(source.stats().backpressure_stalls >= 1);
        assert_eq!(source.stats().samples_dropped, 0);
    }

    #[test]
    fn buffered_samples_are_stamped_from_their_arrival() {
        let mut buffer = CaptureBuffer::new(800, 8000);
        buffer.push(&[0.1; 400], 10.05);
        buffer.push(&[0.1; 400], 10.10);
        let (samples, first_at) = buffer.take(800);
        assert_eq!(samples.len(), 800);
        assert_relative_eq!(first_at, 10.0, epsilon = 1e-9);

        // an overrun keeps the newest audio and its timing
        assert_eq!(buffer.push(&[0.2; 1200], 20.0), 400);
        let (samples, first_at) = buffer.take(400);
        assert_eq!(samples.len(), 400);
        assert_relative_eq!(first_at, 19.9, epsilon = 1e-9);
        let (_, next_at) = buffer.take(400);
        assert_relative_eq!(next_at, 19.95, epsilon = 1e-9);

        // an empty callback does not move the clock
        assert_eq!(buffer.push(&[], 30.0), 0);
        assert_relative_eq!(buffer.newest_at, 20.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.queue_capacity = 0;
        let result = LiveSource::start(Box::new(ScriptedProvider::new(vec![])), bad, Arc::new(AtomicBool::new(true)));
        assert!(matches!(result, Err(CourierError::ConfigurationFailed(_))));
    }
}
