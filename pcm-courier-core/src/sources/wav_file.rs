//! Pull source over a WAV file decoded with `hound`.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hound::{SampleFormat, WavReader};

use super::{BlockSource, SourceKind, SourcePoll};
use crate::models::audio_models::{Block, StreamFormat};
use crate::models::config::DEFAULT_TARGET_BYTES;
use crate::models::error::CourierError;
use crate::processing::converter::SampleConverter;

/// How file samples are turned into the canonical representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    /// 16-bit integer input, passed through as s16le.
    Int16,
    /// Any other integer width, widened to f32le.
    IntToFloat { bits: u16 },
    /// 32-bit float input, passed through as f32le.
    Float32,
}

/// Reads a WAV file in fixed-size blocks whose timestamps tile the file's
/// time axis, starting at the file's creation time.
pub struct WavFileSource {
    path: PathBuf,
    reader: Option<WavReader<BufReader<File>>>,
    decoding: Decoding,
    format: StreamFormat,
    file_bytes_per_sample: u64,
    frames_per_block: usize,
    start_timestamp: f64,
    frames_emitted: u64,
    samples_read: u64,
    delete_on_complete: bool,
    exhausted: bool,
}

impl WavFileSource {
    /// Open `path`, reading blocks of about `DEFAULT_TARGET_BYTES`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CourierError> {
        Self::open_with_target(path, DEFAULT_TARGET_BYTES)
    }

    /// Open `path`, reading blocks of `target_bytes / bytes_per_frame` frames.
    pub fn open_with_target(path: impl AsRef<Path>, target_bytes: usize) -> Result<Self, CourierError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |reason: String| CourierError::SourceOpen {
            path: path.display().to_string(),
            reason,
        };

        let start_timestamp = file_creation_timestamp(&path).map_err(|e| open_error(e.to_string()))?;
        let reader = WavReader::open(&path).map_err(|e| open_error(e.to_string()))?;
        let spec = reader.spec();

        let decoding = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => Decoding::Int16,
            (SampleFormat::Int, bits @ 1..=32) => Decoding::IntToFloat { bits },
            (SampleFormat::Float, 32) => Decoding::Float32,
            (format, bits) => {
                return Err(open_error(format!("unsupported sample format {:?}/{} bits", format, bits)));
            }
        };
        let sample_width = if decoding == Decoding::Int16 { 2 } else { 4 };
        let format = StreamFormat::new(sample_width, spec.sample_rate, spec.channels);
        format.validate().map_err(open_error)?;

        let frames_per_block = (target_bytes / format.bytes_per_frame()).max(1);

        log::info!(
            "opened {}: {} Hz, {} ch, {} bits {:?}, {} frames, {} frames per block",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format,
            reader.duration(),
            frames_per_block
        );

        Ok(Self {
            path,
            reader: Some(reader),
            decoding,
            format,
            file_bytes_per_sample: spec.bits_per_sample.div_ceil(8) as u64,
            frames_per_block,
            start_timestamp,
            frames_emitted: 0,
            samples_read: 0,
            delete_on_complete: true,
            exhausted: false,
        })
    }

    /// Use `timestamp` as the time of the first frame instead of the file's
    /// creation time.
    pub fn with_start_timestamp(mut self, timestamp: f64) -> Self {
        self.start_timestamp = timestamp;
        self
    }

    /// Keep the file after every package was delivered.
    pub fn keep_source(mut self, keep: bool) -> Self {
        self.delete_on_complete = !keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    /// Timestamp the next block will carry.
    fn next_timestamp(&self) -> f64 {
        self.start_timestamp + self.format.duration_of_frames(self.frames_emitted)
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, CourierError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };
        let channels = self.format.channel_count as usize;
        let wanted = self.frames_per_block * channels;
        let base = self.samples_read;
        let bytes_per_sample = self.file_bytes_per_sample;
        let decode_error = |index: usize, e: hound::Error| CourierError::Decode {
            offset: (base + index as u64) * bytes_per_sample,
            reason: e.to_string(),
        };

        let (payload, read) = match self.decoding {
            Decoding::Int16 => {
                let mut samples = Vec::with_capacity(wanted);
                for (i, sample) in reader.samples::<i16>().take(wanted).enumerate() {
                    samples.push(sample.map_err(|e| decode_error(i, e))?);
                }
                samples.truncate(samples.len() / channels * channels);
                (SampleConverter::i16_to_le(&samples), samples.len())
            }
            Decoding::IntToFloat { bits } => {
                let mut samples = Vec::with_capacity(wanted);
                for (i, sample) in reader.samples::<i32>().take(wanted).enumerate() {
                    let value = sample.map_err(|e| decode_error(i, e))?;
                    samples.push(SampleConverter::int_to_f32(value, bits));
                }
                samples.truncate(samples.len() / channels * channels);
                (SampleConverter::f32_to_le(&samples), samples.len())
            }
            Decoding::Float32 => {
                let mut samples = Vec::with_capacity(wanted);
                for (i, sample) in reader.samples::<f32>().take(wanted).enumerate() {
                    samples.push(sample.map_err(|e| decode_error(i, e))?);
                }
                samples.truncate(samples.len() / channels * channels);
                (SampleConverter::f32_to_le(&samples), samples.len())
            }
        };
        self.samples_read += read as u64;
        Ok(payload)
    }
}

impl BlockSource for WavFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Pull
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_block(&mut self, _timeout: Option<Duration>) -> Result<SourcePoll, CourierError> {
        if self.exhausted {
            return Ok(SourcePoll::Exhausted);
        }
        let payload = self.read_payload()?;
        if payload.is_empty() {
            self.exhausted = true;
            return Ok(SourcePoll::Exhausted);
        }
        let block = Block::new(payload, self.next_timestamp());
        self.frames_emitted += block.frames(&self.format);
        Ok(SourcePoll::Block(block))
    }

    fn complete(&mut self) -> Result<bool, CourierError> {
        self.reader = None;
        if !self.delete_on_complete {
            return Ok(false);
        }
        fs::remove_file(&self.path).map_err(|e| CourierError::SourceOpen {
            path: self.path.display().to_string(),
            reason: format!("failed to remove after delivery: {}", e),
        })?;
        log::info!("removed {} after full delivery", self.path.display());
        Ok(true)
    }
}

/// File birth time as epoch seconds, falling back to modification time on
/// platforms that do not record it.
fn file_creation_timestamp(path: &Path) -> std::io::Result<f64> {
    let metadata = fs::metadata(path)?;
    let time = metadata.created().or_else(|_| metadata.modified())?;
    Ok(epoch_seconds(time))
}

pub(crate) fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}
