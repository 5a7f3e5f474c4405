/// Stateless sample-format helpers shared by the file and capture paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleConverter;

impl SampleConverter {
    /// Average interleaved frames down to one channel.
    pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return samples.to_vec();
        }
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Quantise `[-1.0, 1.0]` floats to s16le, saturating outside that range.
    pub fn to_s16le(samples: &[f32]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16).to_le_bytes())
            .collect()
    }

    /// Pack 16-bit samples as little-endian bytes.
    pub fn i16_to_le(samples: &[i16]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }

    /// Widen f32 samples to little-endian bytes.
    pub fn f32_to_le(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }

    /// Normalize a signed integer sample of `bits` width to `[-1.0, 1.0)`.
    pub fn int_to_f32(sample: i32, bits: u16) -> f32 {
        let bits = bits.clamp(1, 32);
        let scale = (1u64 << (bits - 1)) as f64;
        (sample as f64 / scale) as f32
    }
}

/// Streaming linear-interpolation resampler for mono audio.
///
/// Device callbacks arrive in small buffers. The read position and the last
/// input sample carry over between calls, so the output length tracks
/// `total_input * target / source` without per-buffer truncation.
#[derive(Debug, Clone)]
pub struct Resampler {
    target_rate: f64,
    source_rate: f64,
    /// Next output position in input samples, relative to `carry`.
    position: f64,
    carry: Option<f32>,
}

impl Resampler {
    pub fn new(target_rate: f64) -> Self {
        Self {
            target_rate,
            source_rate: target_rate,
            position: 0.0,
            carry: None,
        }
    }

    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    /// Resample the next buffer of a stream captured at `source_rate`.
    ///
    /// A change of source rate restarts the stream.
    pub fn process(&mut self, samples: &[f32], source_rate: f64) -> Vec<f32> {
        if (source_rate - self.source_rate).abs() >= 0.01 {
            self.source_rate = source_rate;
            self.position = 0.0;
            self.carry = None;
        }
        if (self.source_rate - self.target_rate).abs() < 0.01 || samples.is_empty() {
            return samples.to_vec();
        }

        let step = self.source_rate / self.target_rate;
        let lead = usize::from(self.carry.is_some());
        let len = samples.len() + lead;
        let carry = self.carry.unwrap_or_default();
        let at = |i: usize| if i < lead { carry } else { samples[i - lead] };

        let mut out = Vec::with_capacity((samples.len() as f64 / step) as usize + 1);
        loop {
            let index = self.position as usize;
            if index + 1 >= len {
                break;
            }
            let fraction = (self.position - index as f64) as f32;
            out.push(at(index) + (at(index + 1) - at(index)) * fraction);
            self.position += step;
        }

        // the last input sample becomes index 0 of the next call
        self.position -= (len - 1) as f64;
        self.carry = samples.last().copied();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn downmix_stereo_to_mono() {
        let mono = SampleConverter::downmix_to_mono(&[0.2, 0.8, 0.4, 0.6], 2);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mono[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(SampleConverter::downmix_to_mono(&samples, 1), samples);
    }

    #[test]
    fn s16le_conversion() {
        let pcm = SampleConverter::to_s16le(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(pcm.len(), 8);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
        // clamped
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let mut resampler = Resampler::new(48000.0);
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(resampler.process(&samples, 48000.0), samples);
    }

    #[test]
    fn resample_upsample_2x() {
        let mut resampler = Resampler::new(48000.0);
        let result = resampler.process(&[0.0, 1.0, 0.0], 24000.0);

        assert_eq!(result.len(), 4);
        assert_relative_eq!(result[0], 0.0);
        assert_relative_eq!(result[1], 0.5);
        assert_relative_eq!(result[2], 1.0);
        assert_relative_eq!(result[3], 0.5);
    }

    #[test]
    fn resample_downsample() {
        let mut resampler = Resampler::new(24000.0);
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        assert_eq!(resampler.process(&samples, 48000.0).len(), 50);
    }

    #[test]
    fn chunked_resampling_keeps_the_total_length() {
        // 44.1 kHz device, 1024-frame callbacks, ten seconds
        let mut resampler = Resampler::new(48000.0);
        let chunk = vec![0.1f32; 1024];
        let mut produced = 0usize;
        for _ in 0..431 {
            produced += resampler.process(&chunk, 44100.0).len();
        }

        let expected = (431 * 1024) as f64 * 48000.0 / 44100.0;
        assert!(
            (produced as f64 - expected).abs() <= 2.0,
            "produced {} samples, expected about {}",
            produced,
            expected
        );
    }

    #[test]
    fn chunk_boundaries_do_not_restart_interpolation() {
        // a ramp survives linear interpolation exactly
        let ramp: Vec<f32> = (0..6000).map(|i| i as f32 * 1e-4).collect();
        let mut resampler = Resampler::new(48000.0);
        let mut out = Vec::new();
        for chunk in ramp.chunks(333) {
            out.extend(resampler.process(chunk, 44100.0));
        }

        let step = 44100.0 / 48000.0;
        assert!(out.len() >= 6530);
        for (k, sample) in out.iter().enumerate() {
            assert_relative_eq!(*sample, (k as f64 * step * 1e-4) as f32, epsilon = 1e-5);
        }
    }

    #[test]
    fn rate_change_restarts_the_stream() {
        let mut resampler = Resampler::new(16000.0);
        assert_eq!(resampler.process(&[0.5; 64], 32000.0).len(), 32);
        assert_eq!(resampler.process(&[0.5; 64], 16000.0).len(), 64);
        assert_eq!(resampler.process(&[0.5; 64], 8000.0).len(), 126);
    }

    #[test]
    fn int_widening() {
        assert_relative_eq!(SampleConverter::int_to_f32(-128, 8), -1.0);
        assert_relative_eq!(SampleConverter::int_to_f32(4_194_304, 24), 0.5);
        assert_eq!(SampleConverter::f32_to_le(&[1.0]), 1.0f32.to_le_bytes().to_vec());
        assert_eq!(SampleConverter::i16_to_le(&[-2]), vec![0xFE, 0xFF]);
    }
}
