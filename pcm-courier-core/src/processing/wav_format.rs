//! Dump a plaintext package as a playable WAV file for inspection.

use std::fs;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::models::audio_models::StreamFormat;
use crate::models::error::CourierError;
use crate::models::package::Package;

/// WAV layout for packages in `format`: 16-bit integer or 32-bit float.
fn wav_spec(format: &StreamFormat) -> Result<WavSpec, CourierError> {
    let sample_format = match format.sample_width {
        2 => SampleFormat::Int,
        4 => SampleFormat::Float,
        width => {
            return Err(CourierError::ConfigurationFailed(format!(
                "cannot write {}-byte samples as WAV",
                width
            )))
        }
    };
    Ok(WavSpec {
        channels: format.channel_count,
        sample_rate: format.sample_rate,
        bits_per_sample: format.sample_width * 8,
        sample_format,
    })
}

/// Write a plaintext package to `path` as a playable WAV file.
pub fn write_package_wav(package: &Package, path: &Path) -> Result<(), CourierError> {
    if package.is_encrypted() {
        return Err(CourierError::ConfigurationFailed(
            "cannot dump an encrypted package as audio".into(),
        ));
    }
    let spec = wav_spec(&package.format())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| CourierError::ConfigurationFailed(format!("failed to create directory: {}", e)))?;
    }

    let failed = |e: hound::Error| CourierError::ConfigurationFailed(format!("failed to write {}: {}", path.display(), e));
    let mut writer = WavWriter::create(path, spec).map_err(failed)?;
    match spec.sample_format {
        SampleFormat::Int => {
            for bytes in package.audio_pcm.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([bytes[0], bytes[1]])).map_err(failed)?;
            }
        }
        SampleFormat::Float => {
            for bytes in package.audio_pcm.chunks_exact(4) {
                writer
                    .write_sample(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                    .map_err(failed)?;
            }
        }
    }
    writer.finalize().map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::package::{EncryptionInfo, PackageTemplate};

    fn package(format: StreamFormat, pcm: Vec<u8>) -> Package {
        PackageTemplate {
            id: "dump".into(),
            description: String::new(),
            format,
        }
        .build(pcm, 0.0)
    }

    fn temp_wav() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pcm_courier_dump_{}.wav", uuid::Uuid::new_v4()))
    }

    #[test]
    fn s16_package_round_trips_through_hound() {
        let samples: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let path = temp_wav();
        write_package_wav(&package(StreamFormat::mono_s16(16000), pcm), &path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn wide_samples_are_written_as_float() {
        let pcm: Vec<u8> = [0.5f32, -0.25, 1.0, 0.0].iter().flat_map(|s| s.to_le_bytes()).collect();
        let path = temp_wav();
        write_package_wav(&package(StreamFormat::new(4, 44100, 2), pcm), &path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        assert_eq!(reader.spec().channels, 2);
        let read: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![0.5, -0.25, 1.0, 0.0]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn encrypted_or_odd_width_packages_are_refused() {
        let mut encrypted = package(StreamFormat::mono_s16(8000), vec![0; 4]);
        encrypted.encryption = Some(EncryptionInfo {
            algorithm: "AES-256-CTR".into(),
            nonce: vec![0; 16],
        });
        assert!(write_package_wav(&encrypted, &temp_wav()).is_err());

        let odd = package(StreamFormat::new(3, 8000, 1), vec![0; 6]);
        assert!(matches!(
            write_package_wav(&odd, &temp_wav()),
            Err(CourierError::ConfigurationFailed(_))
        ));
    }
}
