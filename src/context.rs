// ServiceContext: state container for the prediction service
// Owns the loaded model, the feature pipeline shared with training and the
// retrain job tracker, so handlers never touch global state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::AppConfig;
use crate::error::{log_model_error, log_service_error, ErrorCode, ServiceError};
use crate::features::FeaturePipeline;
use crate::model::{Classifier, ModelArtifact, Prediction, Trainer};

/// Whether a model is available for prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Unloaded,
    Ready,
}

/// Lifecycle of a retrain job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrainState {
    /// Waiting for an earlier job to finish
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A retrain job as reported by `/retrain/status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainJob {
    pub job_id: u64,
    pub state: RetrainState,
    pub error: Option<String>,
    pub queued_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
}

impl RetrainJob {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, RetrainState::Queued | RetrainState::Running)
    }
}

/// Finished jobs older than this many are forgotten
const JOB_HISTORY: usize = 16;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Job ids, recent job records, and a gate that lets one retrain run at a time
struct RetrainTracker {
    next_id: AtomicU64,
    jobs: Mutex<VecDeque<RetrainJob>>,
    gate: tokio::sync::Mutex<()>,
}

impl RetrainTracker {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(VecDeque::new()),
            gate: tokio::sync::Mutex::new(()),
        }
    }
}

/// ServiceContext: everything the HTTP handlers need
///
/// The model slot is an `RwLock<Option<Arc<Classifier>>>`: predictions clone
/// the `Arc` under a short read lock and run without holding it, and a
/// reload replaces the whole `Arc` under the write lock. A request therefore
/// sees either the old model or the new one, never a mix.
pub struct ServiceContext {
    config: AppConfig,
    pipeline: FeaturePipeline,
    model: RwLock<Option<Arc<Classifier>>>,
    retrain: RetrainTracker,
}

impl ServiceContext {
    /// Create a context in the `Unloaded` state
    pub fn new(config: AppConfig) -> Self {
        let pipeline = FeaturePipeline::from_config(&config);
        Self {
            config,
            pipeline,
            model: RwLock::new(None),
            retrain: RetrainTracker::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn artifact(&self) -> ModelArtifact {
        ModelArtifact::from_config(&self.config.service)
    }

    // ========================================================================
    // LOCK HELPER METHODS
    // ========================================================================

    fn read_model(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, Option<Arc<Classifier>>>, ServiceError> {
        self.model.read().map_err(|_| ServiceError::LockPoisoned {
            component: "model".to_string(),
        })
    }

    fn write_model(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Option<Arc<Classifier>>>, ServiceError> {
        self.model.write().map_err(|_| ServiceError::LockPoisoned {
            component: "model".to_string(),
        })
    }

    fn lock_retrain_jobs(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, VecDeque<RetrainJob>>, ServiceError> {
        self.retrain
            .jobs
            .lock()
            .map_err(|_| ServiceError::LockPoisoned {
                component: "retrain_status".to_string(),
            })
    }

    // ========================================================================
    // MODEL STATE
    // ========================================================================

    /// Snapshot of the current model, if any
    pub fn current_model(&self) -> Result<Option<Arc<Classifier>>, ServiceError> {
        Ok(self.read_model()?.clone())
    }

    pub fn state(&self) -> Result<ServiceState, ServiceError> {
        Ok(match *self.read_model()? {
            Some(_) => ServiceState::Ready,
            None => ServiceState::Unloaded,
        })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state(), Ok(ServiceState::Ready))
    }

    /// Class names of the loaded model; empty while `Unloaded`
    pub fn classes(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .current_model()?
            .map(|model| model.classes().to_vec())
            .unwrap_or_default())
    }

    /// Replace the served model
    pub fn install(&self, classifier: Classifier) -> Result<(), ServiceError> {
        let classifier = Arc::new(classifier);
        *self.write_model()? = Some(classifier);
        Ok(())
    }

    /// Load the configured artifact and swap it in
    ///
    /// On failure the previous state (loaded or not) is left untouched.
    pub fn reload(&self) -> Result<ServiceState, ServiceError> {
        let artifact = self.artifact();
        let classifier = Classifier::load(&artifact).map_err(|err| {
            log_model_error(&err, "reload");
            ServiceError::LoadFailed {
                reason: err.message(),
            }
        })?;
        let classes = classifier.num_classes();
        self.install(classifier)?;
        log::info!(
            "[Service] Model ready: {} ({} classes)",
            artifact.model_path.display(),
            classes
        );
        Ok(ServiceState::Ready)
    }

    /// Startup load: a missing artifact leaves the service `Unloaded`
    pub fn try_initial_load(&self) -> ServiceState {
        match self.reload() {
            Ok(state) => state,
            Err(err) => {
                log::warn!(
                    "[Service] Starting without a model ({}); predictions fail until a reload succeeds",
                    err.message()
                );
                ServiceState::Unloaded
            }
        }
    }

    // ========================================================================
    // PREDICTION
    // ========================================================================

    /// Decode `bytes`, extract features and classify
    ///
    /// # Errors
    /// * `ServiceError::NotLoaded` - no model is loaded
    /// * `ServiceError::BadRequest` - the upload is not decodable audio
    /// * `ServiceError::Prediction` - inference failed
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction, ServiceError> {
        let model = self.current_model()?.ok_or(ServiceError::NotLoaded)?;
        let spectrogram = self.pipeline.spectrogram_from_bytes(bytes)?;
        Ok(model.predict(&spectrogram)?)
    }

    // ========================================================================
    // RETRAINING
    // ========================================================================

    /// Schedule a retrain on the tokio runtime and return its job id
    ///
    /// Jobs queue behind each other; each trains on the configured feature
    /// cache, writes the artifact, then reloads it. A job stays `queued`
    /// until the previous one has finished.
    pub fn start_retrain(self: &Arc<Self>) -> Result<u64, ServiceError> {
        let job_id = self.retrain.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut jobs = self.lock_retrain_jobs()?;
            jobs.push_back(RetrainJob {
                job_id,
                state: RetrainState::Queued,
                error: None,
                queued_at_ms: now_ms(),
                started_at_ms: None,
                finished_at_ms: None,
            });
            while jobs.len() > JOB_HISTORY {
                match jobs.iter().position(|job| !job.is_pending()) {
                    Some(oldest_done) => {
                        jobs.remove(oldest_done);
                    }
                    None => break,
                }
            }
        }
        log::info!("[Service] Retrain job {} queued", job_id);

        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            let _turn = ctx.retrain.gate.lock().await;
            ctx.update_job(job_id, |job| {
                job.state = RetrainState::Running;
                job.started_at_ms = Some(now_ms());
            });
            log::info!("[Service] Retrain job {} running", job_id);

            let worker = Arc::clone(&ctx);
            let outcome = tokio::task::spawn_blocking(move || worker.run_retrain())
                .await
                .unwrap_or_else(|err| {
                    Err(ServiceError::RetrainFailed {
                        reason: err.to_string(),
                    })
                });
            ctx.finish_retrain(job_id, outcome);
        });

        Ok(job_id)
    }

    /// Train on the feature cache, persist, and reload (blocking)
    pub fn run_retrain(&self) -> Result<ServiceState, ServiceError> {
        let training = &self.config.training;
        let trainer = Trainer::new(training.clone()).with_epochs(training.retrain_epochs);
        let trained = trainer
            .train_from_cache_dir(&self.config.service.feature_cache_dir, &self.artifact())
            .map_err(|err| {
                log_model_error(&err, "retrain");
                ServiceError::RetrainFailed {
                    reason: err.message(),
                }
            })?;
        log::info!(
            "[Service] Retrain finished, validation accuracy {:.3}",
            trained.report.accuracy
        );
        self.reload()
    }

    fn finish_retrain(&self, job_id: u64, outcome: Result<ServiceState, ServiceError>) {
        let error = match &outcome {
            Ok(_) => None,
            Err(err) => {
                log_service_error(err, "retrain");
                Some(err.message())
            }
        };

        self.update_job(job_id, |job| {
            job.state = if error.is_none() {
                RetrainState::Succeeded
            } else {
                RetrainState::Failed
            };
            job.error = error;
            job.finished_at_ms = Some(now_ms());
        });
    }

    fn update_job(&self, job_id: u64, apply: impl FnOnce(&mut RetrainJob)) {
        match self.lock_retrain_jobs() {
            Ok(mut jobs) => {
                if let Some(job) = jobs.iter_mut().find(|job| job.job_id == job_id) {
                    apply(job);
                }
            }
            Err(err) => log_service_error(&err, "retrain_status"),
        }
    }

    /// Most recently requested retrain job, `None` if none was ever requested
    pub fn retrain_status(&self) -> Result<Option<RetrainJob>, ServiceError> {
        Ok(self.lock_retrain_jobs()?.back().cloned())
    }

    /// A specific retrain job, if it is still in the history
    pub fn retrain_job(&self, job_id: u64) -> Result<Option<RetrainJob>, ServiceError> {
        Ok(self
            .lock_retrain_jobs()?
            .iter()
            .find(|job| job.job_id == job_id)
            .cloned())
    }
}
