use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::crypto::ctr_encryptor::CtrEncryptor;
use crate::delivery::uploader::{RedriveSummary, Uploader};
use crate::models::config::PipelineConfig;
use crate::models::error::CourierError;
use crate::models::package::{Package, PackageTemplate};
use crate::models::state::{DeliveryOutcome, PipelineDiagnostics, PipelineState, RunSummary};
use crate::processing::aggregator::{Aggregator, FlushPolicy};
use crate::sources::{BlockSource, SourceKind, SourcePoll};
use crate::storage::spool::Spool;
use crate::traits::encryptor::{seal_package, PackageEncryptor};
use crate::traits::object_store::ObjectStore;
use crate::traits::pipeline_delegate::PipelineDelegate;

/// Mutable run state, shared with `PipelineMonitor` handles.
#[derive(Debug)]
struct RunState {
    state: PipelineState,
    diagnostics: PipelineDiagnostics,
}

/// Read-only view of a coordinator's progress, usable from other threads
/// while `run` holds the coordinator.
#[derive(Clone)]
pub struct PipelineMonitor {
    inner: Arc<Mutex<RunState>>,
}

impl PipelineMonitor {
    pub fn state(&self) -> PipelineState {
        self.inner.lock().state.clone()
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        self.inner.lock().diagnostics.clone()
    }
}

/// Wires a source through aggregation, encryption and delivery.
///
/// ```text
/// [BlockSource] → [Aggregator] → seal_package → [Uploader] → [ObjectStore]
///                                                    └──→ [Spool] (abandoned)
/// ```
///
/// Delivery is strictly sequential: a package reaches a terminal outcome
/// before the next block is requested from the source.
pub struct Coordinator<S: ObjectStore> {
    config: PipelineConfig,
    uploader: Uploader<S>,
    encryptor: Option<Box<dyn PackageEncryptor>>,
    run_state: Arc<Mutex<RunState>>,
    delegate: Option<Arc<dyn PipelineDelegate>>,
}

impl<S: ObjectStore> Coordinator<S> {
    /// Validate `config`, key the cipher and open the spool.
    pub fn new(config: PipelineConfig, store: S) -> Result<Self, CourierError> {
        config.validate().map_err(CourierError::ConfigurationFailed)?;

        let encryptor = match config.encryption_key.as_deref() {
            Some(secret) => {
                let encryptor = CtrEncryptor::from_secret(secret)?;
                log::info!("encrypting packages with {} key {}", encryptor.algorithm(), encryptor.key_id());
                Some(Box::new(encryptor) as Box<dyn PackageEncryptor>)
            }
            None => None,
        };

        let mut uploader = Uploader::new(store, config.bucket.clone(), config.storage_class, config.retry.clone());
        if let Some(ref dir) = config.spool_dir {
            uploader = uploader.with_spool(Spool::open(dir)?);
        }

        Ok(Self {
            config,
            uploader,
            encryptor,
            run_state: Arc::new(Mutex::new(RunState {
                state: PipelineState::Idle,
                diagnostics: PipelineDiagnostics::default(),
            })),
            delegate: None,
        })
    }

    /// Replace the configured encryptor (None disables encryption).
    pub fn with_encryptor(mut self, encryptor: Option<Box<dyn PackageEncryptor>>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn PipelineDelegate>) {
        self.uploader.set_delegate(Arc::clone(&delegate));
        self.delegate = Some(delegate);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn uploader(&self) -> &Uploader<S> {
        &self.uploader
    }

    pub fn state(&self) -> PipelineState {
        self.run_state.lock().state.clone()
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        self.run_state.lock().diagnostics.clone()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            inner: Arc::clone(&self.run_state),
        }
    }

    /// Re-send everything in the configured spool.
    pub fn redrive(&self) -> Result<RedriveSummary, CourierError> {
        let spool = self
            .uploader
            .spool()
            .ok_or_else(|| CourierError::ConfigurationFailed("no spool directory configured".into()))?;
        self.uploader.redrive(spool)
    }

    /// Stream `source` to the store until it is exhausted, cancelled, or
    /// fails.
    ///
    /// Pull sources stop between packages once `running` is cleared; push
    /// sources observe the flag themselves and are drained to the end. A
    /// pull source is completed (its file removed) only when it was read to
    /// the end and every package was delivered.
    pub fn run(&mut self, source: &mut dyn BlockSource, running: &AtomicBool) -> Result<RunSummary, CourierError> {
        if let PipelineState::Streaming { .. } | PipelineState::Draining = self.state() {
            return Err(CourierError::ConfigurationFailed("a run is already in progress".into()));
        }

        let format = source.format();
        format.validate().map_err(CourierError::ConfigurationFailed)?;

        let kind = source.kind();
        let policy = match kind {
            SourceKind::Pull => FlushPolicy::PassThrough,
            SourceKind::Push => FlushPolicy::Threshold {
                bytes: self.config.threshold_bytes,
                max_age: self.config.max_buffer_age,
            },
        };
        let template = PackageTemplate {
            id: self.config.id.clone(),
            description: self.config.description.clone(),
            format,
        };
        let mut aggregator = Aggregator::new(policy, template);
        let mut summary = RunSummary::default();

        self.run_state.lock().diagnostics = PipelineDiagnostics::default();
        log::info!(
            "streaming {:?} source ({} Hz, {} ch, {} bytes/sample) to bucket {} as {:?}",
            kind,
            format.sample_rate,
            format.channel_count,
            format.sample_width,
            self.config.bucket,
            policy
        );
        self.set_state(PipelineState::Streaming { packages_delivered: 0 });

        match self.stream(source, kind, &mut aggregator, running, &mut summary) {
            Ok(exhausted) => {
                self.set_state(PipelineState::Draining);
                if let Some(package) = aggregator.finish() {
                    if let Err(e) = self.ship(package, &mut summary) {
                        return Err(self.fail(e));
                    }
                }
                summary.exhausted = exhausted;

                if exhausted && summary.packages_abandoned == 0 {
                    match source.complete() {
                        Ok(removed) => summary.source_removed = removed,
                        Err(e) => return Err(self.fail(e)),
                    }
                } else if summary.packages_abandoned > 0 {
                    log::warn!(
                        "{} package(s) were abandoned; source kept for inspection",
                        summary.packages_abandoned
                    );
                } else if !exhausted {
                    log::info!("run cancelled before the source was exhausted; source kept");
                }

                log::info!(
                    "run finished: {} delivered, {} abandoned, {} bytes, {:.1}s of audio",
                    summary.packages_delivered,
                    summary.packages_abandoned,
                    summary.bytes_delivered,
                    summary.audio_secs
                );
                self.set_state(PipelineState::Completed(summary.clone()));
                Ok(summary)
            }
            Err(error) => {
                log::error!("source failed: {}", error);
                self.set_state(PipelineState::Draining);
                if let Some(package) = aggregator.finish() {
                    if let Err(e) = self.ship(package, &mut summary) {
                        log::error!("failed to deliver the partial package: {}", e);
                    }
                }
                Err(self.fail(error))
            }
        }
    }

    // --- Internal helpers ---

    /// Main loop. Ok(true) when the source ran dry, Ok(false) when cancelled.
    fn stream(
        &self,
        source: &mut dyn BlockSource,
        kind: SourceKind,
        aggregator: &mut Aggregator,
        running: &AtomicBool,
        summary: &mut RunSummary,
    ) -> Result<bool, CourierError> {
        loop {
            if kind == SourceKind::Pull && !running.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let timeout = aggregator.time_to_deadline(Instant::now());
            match source.next_block(timeout)? {
                SourcePoll::Block(block) => {
                    {
                        let mut run = self.run_state.lock();
                        run.diagnostics.blocks_received += 1;
                        run.diagnostics.bytes_received += block.payload.len() as u64;
                    }
                    if let Some(package) = aggregator.push(block) {
                        self.ship(package, summary)?;
                    }
                    if let Some(package) = aggregator.flush_if_stale(Instant::now()) {
                        self.ship(package, summary)?;
                    }
                }
                SourcePoll::Idle => {
                    if let Some(package) = aggregator.flush_if_stale(Instant::now()) {
                        log::debug!("flushing package held past the max buffer age");
                        self.ship(package, summary)?;
                    }
                }
                SourcePoll::Exhausted => return Ok(true),
            }
        }
    }

    /// Encrypt and deliver one package to a terminal outcome.
    fn ship(&self, mut package: Package, summary: &mut RunSummary) -> Result<DeliveryOutcome, CourierError> {
        let bytes = package.audio_pcm.len() as u64;
        let audio_secs = package.duration_secs();
        self.run_state.lock().diagnostics.packages_built += 1;

        seal_package(&mut package, self.encryptor.as_deref())?;
        let outcome = self.uploader.deliver(&package)?;

        let delivered = {
            let mut run = self.run_state.lock();
            let diagnostics = &mut run.diagnostics;
            diagnostics.upload_attempts += outcome.attempts() as u64;
            match outcome {
                DeliveryOutcome::Delivered { attempts, .. } => {
                    diagnostics.upload_failures += attempts.saturating_sub(1) as u64;
                    diagnostics.packages_delivered += 1;
                }
                DeliveryOutcome::Abandoned { attempts, .. } => {
                    diagnostics.upload_failures += attempts as u64;
                    diagnostics.packages_abandoned += 1;
                }
            }
            diagnostics.packages_delivered
        };

        if outcome.is_delivered() {
            summary.packages_delivered += 1;
            summary.bytes_delivered += bytes;
            summary.audio_secs += audio_secs;
        } else {
            summary.packages_abandoned += 1;
        }

        if let Some(ref delegate) = self.delegate {
            delegate.on_package_finished(&outcome);
        }
        if self.state().is_streaming() {
            self.set_state(PipelineState::Streaming {
                packages_delivered: delivered,
            });
        }
        Ok(outcome)
    }

    fn set_state(&self, new_state: PipelineState) {
        self.run_state.lock().state = new_state.clone();
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }

    fn fail(&self, error: CourierError) -> CourierError {
        self.set_state(PipelineState::Failed(error.clone()));
        if let Some(ref delegate) = self.delegate {
            delegate.on_error(&error);
        }
        error
    }
}
