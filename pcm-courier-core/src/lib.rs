//! # pcm-courier-core
//!
//! Platform-agnostic core of the audio chunking and delivery pipeline.
//!
//! Splits a file-resident or live PCM stream into timestamped packages,
//! optionally encrypts each one, and delivers it to an object store under a
//! bounded retry policy. Live capture backends implement `CaptureProvider`
//! and object-store clients implement `ObjectStore`; both plug into the
//! generic `Coordinator`.
//!
//! ## Architecture
//!
//! ```text
//! pcm-courier-core (this crate)
//! ├── traits/       ← CaptureProvider, ObjectStore, PackageEncryptor, PipelineDelegate
//! ├── models/       ← CourierError, PipelineState, PipelineConfig, Package, Block, etc.
//! ├── sources/      ← BlockSource, WavFileSource (pull), LiveSource (push)
//! ├── processing/   ← Aggregator, SampleConverter, Resampler, RingBuffer, WAV export
//! ├── crypto/       ← CtrEncryptor (AES-256-CTR)
//! ├── delivery/     ← Uploader, RetryPolicy, storage keys
//! ├── storage/      ← DirectoryStore, Spool
//! └── pipeline/     ← Coordinator (generic orchestrator)
//! ```

pub mod crypto;
pub mod delivery;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod sources;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use crypto::ctr_encryptor::CtrEncryptor;
pub use delivery::retry::RetryPolicy;
pub use delivery::uploader::{storage_key, RedriveSummary, Uploader};
pub use models::audio_models::{Block, InputDevice, StreamFormat};
pub use models::config::{read_key_file, Credentials, PipelineConfig, StorageClass};
pub use models::error::CourierError;
pub use models::package::{EncryptionInfo, Package, PackageTemplate};
pub use models::state::{DeliveryOutcome, PipelineDiagnostics, PipelineState, RunSummary};
pub use pipeline::coordinator::{Coordinator, PipelineMonitor};
pub use processing::aggregator::{Aggregator, FlushPolicy};
pub use processing::ring_buffer::RingBuffer;
pub use processing::converter::{Resampler, SampleConverter};
pub use sources::live::{LiveConfig, LiveSource, LiveStats};
pub use sources::wav_file::WavFileSource;
pub use sources::{BlockSource, SourceKind, SourcePoll};
pub use storage::directory_store::DirectoryStore;
pub use storage::spool::{Spool, SpoolRecord};
pub use traits::capture_provider::{AudioBufferCallback, CaptureFaultCallback, CaptureProvider};
pub use traits::encryptor::{seal_package, PackageEncryptor, Sealed};
pub use traits::object_store::ObjectStore;
pub use traits::pipeline_delegate::PipelineDelegate;
