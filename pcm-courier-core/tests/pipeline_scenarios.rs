use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use pcm_courier_core::{
    read_key_file, Block, BlockSource, CourierError, Coordinator, CtrEncryptor, DirectoryStore, ObjectStore, Package,
    PackageEncryptor, PipelineConfig, RetryPolicy, SourceKind, SourcePoll, StorageClass, StreamFormat, WavFileSource,
};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pcm_courier_it_{}_{}", name, uuid::Uuid::new_v4()))
}

fn write_mono_wav(path: &Path, frames: usize, rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(((i * 7) % 30000) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn read_objects(root: &Path, bucket: &str) -> Vec<(String, Package)> {
    let mut objects: Vec<(String, Package)> = fs::read_dir(root.join(bucket))
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            let key = entry.file_name().to_string_lossy().into_owned();
            let package = Package::from_bytes(&fs::read(entry.path()).unwrap()).unwrap();
            (key, package)
        })
        .collect();
    objects.sort_by(|a, b| a.1.timestamp.total_cmp(&b.1.timestamp));
    objects
}

fn base_config(spool: &Path) -> PipelineConfig {
    PipelineConfig {
        bucket: "audio248".into(),
        retry: RetryPolicy::immediate(3),
        spool_dir: Some(spool.to_path_buf()),
        ..PipelineConfig::new("hgws1", "scenario")
    }
}

#[test]
fn file_upload_tiles_timestamps_and_removes_source() {
    let wav = temp_path("a.wav");
    let root = temp_path("store");
    let spool = temp_path("spool");
    write_mono_wav(&wav, 96000, 48000);

    let mut source = WavFileSource::open_with_target(&wav, 96000)
        .unwrap()
        .with_start_timestamp(1000.0);
    let mut coordinator = Coordinator::new(base_config(&spool), DirectoryStore::new(&root)).unwrap();
    let summary = coordinator.run(&mut source, &AtomicBool::new(true)).unwrap();

    assert_eq!(summary.packages_delivered, 2);
    assert!(summary.source_removed);
    assert!(!wav.exists());

    let objects = read_objects(&root, "audio248");
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].1.timestamp, 1000.0);
    assert_eq!(objects[1].1.timestamp, 1001.0);
    assert!(objects[0].0.starts_with("1000.0-"));
    assert!(objects[1].0.starts_with("1001.0-"));
    assert!(objects.iter().all(|(key, _)| key.ends_with("-hgws1")));
    for (_, package) in &objects {
        assert_eq!(package.format(), StreamFormat::mono_s16(48000));
        assert_eq!(package.audio_pcm.len(), 96000);
        assert!(!package.is_encrypted());
    }

    fs::remove_dir_all(&root).ok();
    fs::remove_dir_all(&spool).ok();
}

#[test]
fn file_with_abandoned_package_is_kept() {
    let wav = temp_path("kept.wav");
    let spool = temp_path("spool");
    write_mono_wav(&wav, 4800, 48000);

    let mut source = WavFileSource::open(&wav).unwrap();
    let mut coordinator = Coordinator::new(base_config(&spool), FlakyStore::new(u32::MAX)).unwrap();
    let summary = coordinator.run(&mut source, &AtomicBool::new(true)).unwrap();

    assert_eq!(summary.packages_abandoned, 1);
    assert!(!summary.source_removed);
    assert!(wav.exists());

    fs::remove_file(&wav).ok();
    fs::remove_dir_all(&spool).ok();
}

/// Push source replaying pre-built blocks, then exhausting.
struct ReplaySource {
    blocks: VecDeque<Block>,
}

impl BlockSource for ReplaySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Push
    }

    fn format(&self) -> StreamFormat {
        StreamFormat::mono_s16(48000)
    }

    fn next_block(&mut self, _timeout: Option<Duration>) -> Result<SourcePoll, CourierError> {
        Ok(self.blocks.pop_front().map(SourcePoll::Block).unwrap_or(SourcePoll::Exhausted))
    }
}

#[test]
fn live_stream_needs_44_one_second_blocks_to_pass_threshold() {
    let root = temp_path("store");
    let spool = temp_path("spool");
    let blocks = (0..45).map(|i| Block::new(vec![0u8; 96000], 2000.0 + i as f64)).collect();
    let mut source = ReplaySource { blocks };

    let mut coordinator = Coordinator::new(base_config(&spool), DirectoryStore::new(&root)).unwrap();
    let summary = coordinator.run(&mut source, &AtomicBool::new(true)).unwrap();

    let objects = read_objects(&root, "audio248");
    assert_eq!(objects.len(), 2);
    // 43 blocks hold 4_128_000 bytes, below 4 MiB; the 44th crosses it
    assert_eq!(objects[0].1.audio_pcm.len(), 44 * 96000);
    assert_eq!(objects[0].1.timestamp, 2000.0);
    assert_eq!(objects[1].1.audio_pcm.len(), 96000);
    assert_eq!(objects[1].1.timestamp, 2044.0);
    assert_eq!(summary.packages_delivered, 2);
    assert!(!summary.source_removed);

    fs::remove_dir_all(&root).ok();
    fs::remove_dir_all(&spool).ok();
}

/// Fails the first `failures` puts, then accepts.
struct FlakyStore {
    failures: Mutex<u32>,
    keys: Mutex<Vec<String>>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            keys: Mutex::new(Vec::new()),
        }
    }
}

impl ObjectStore for FlakyStore {
    fn put(&self, _bucket: &str, key: &str, _payload: &[u8], _class: StorageClass) -> Result<(), CourierError> {
        self.keys.lock().push(key.to_string());
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(CourierError::Store("503 slow down".into()));
        }
        Ok(())
    }
}

#[test]
fn flaky_store_yields_one_delivery_under_one_key() {
    let spool = temp_path("spool");
    let mut source = ReplaySource {
        blocks: VecDeque::from([Block::new(vec![1u8; 64], 7.0)]),
    };

    let mut coordinator = Coordinator::new(base_config(&spool), FlakyStore::new(2)).unwrap();
    let summary = coordinator.run(&mut source, &AtomicBool::new(true)).unwrap();

    assert_eq!(summary.packages_delivered, 1);
    assert_eq!(summary.packages_abandoned, 0);
    let keys = coordinator.uploader().store().keys.lock().clone();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k == &keys[0]));
    assert_eq!(coordinator.diagnostics().upload_failures, 2);

    fs::remove_dir_all(&spool).ok();
}

#[test]
fn abandoned_package_is_redriven_under_its_original_key() {
    let root = temp_path("store");
    let spool = temp_path("spool");
    let mut source = ReplaySource {
        blocks: VecDeque::from([Block::new(vec![3u8; 32], 11.5)]),
    };

    let mut failing = Coordinator::new(base_config(&spool), FlakyStore::new(u32::MAX)).unwrap();
    let summary = failing.run(&mut source, &AtomicBool::new(true)).unwrap();
    assert_eq!(summary.packages_abandoned, 1);
    let original_key = failing.uploader().store().keys.lock()[0].clone();

    let healthy = Coordinator::new(base_config(&spool), DirectoryStore::new(&root)).unwrap();
    let redrive = healthy.redrive().unwrap();
    assert_eq!(redrive.delivered, 1);

    let objects = read_objects(&root, "audio248");
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].0, original_key);
    assert_eq!(objects[0].1.timestamp, 11.5);

    fs::remove_dir_all(&root).ok();
    fs::remove_dir_all(&spool).ok();
}

#[test]
fn long_key_file_uses_first_32_bytes_and_fresh_nonces() {
    let key_path = temp_path("key.bin");
    let secret: Vec<u8> = (0u8..40).collect();
    fs::write(&key_path, &secret).unwrap();

    let material = read_key_file(&key_path).unwrap();
    let encryptor = CtrEncryptor::from_secret(&material).unwrap();
    let truncated = CtrEncryptor::from_secret(&secret[..32]).unwrap();
    assert_eq!(encryptor.key_id(), truncated.key_id());

    let plaintext = vec![0x42u8; 256];
    let a = encryptor.encrypt(&plaintext).unwrap();
    let b = encryptor.encrypt(&plaintext).unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
    assert_eq!(truncated.decrypt(&a.ciphertext, &a.nonce).unwrap(), plaintext);
    assert_eq!(truncated.decrypt(&b.ciphertext, &b.nonce).unwrap(), plaintext);

    fs::remove_file(&key_path).ok();
}

#[test]
fn encrypted_file_upload_round_trips() {
    let wav = temp_path("enc.wav");
    let root = temp_path("store");
    let spool = temp_path("spool");
    write_mono_wav(&wav, 1000, 8000);
    let original = fs::read(&wav).unwrap();

    let config = PipelineConfig {
        encryption_key: Some(vec![5u8; 32]),
        ..base_config(&spool)
    };
    let mut source = WavFileSource::open(&wav).unwrap().keep_source(true);
    let mut coordinator = Coordinator::new(config, DirectoryStore::new(&root)).unwrap();
    let summary = coordinator.run(&mut source, &AtomicBool::new(true)).unwrap();
    assert!(!summary.source_removed);

    let objects = read_objects(&root, "audio248");
    let package = &objects[0].1;
    let info = package.encryption.as_ref().unwrap();
    let plain = CtrEncryptor::from_secret(&[5u8; 32])
        .unwrap()
        .decrypt(&package.audio_pcm, &info.nonce)
        .unwrap();
    // data chunk of a canonical 44-byte header file
    assert_eq!(plain, original[44..].to_vec());

    fs::remove_file(&wav).ok();
    fs::remove_dir_all(&root).ok();
    fs::remove_dir_all(&spool).ok();
}
