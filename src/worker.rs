//! Per-chunk translation worker.
//!
//! One worker invocation processes exactly one chunk of one job:
//! load job → load chunk → estimate tokens → acquire quota → translate
//! → persist output → advance progress. Many workers run in parallel;
//! the parallel-safety contract is that a worker reads only its own
//! chunk object and the chunk's pre-computed context, never another
//! chunk and never anything under `translated/`.
//!
//! Progress advancement is at-most-once per `(job, chunk)` across
//! retries, provided by the job store's conditional completion update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chunking::Chunk;
use crate::chunking::tokenizer::count_tokens;
use crate::config::WorkerConfig;
use crate::error::{StorageError, WorkerError};
use crate::job::{JobStatus, Tone};
use crate::limiter::{Decision, RateLimiter};
use crate::storage::{JobStore, ObjectStore, keys};
use crate::translate::{
    TargetLanguage, TranslateOptions, TranslationClient, TranslationContext,
};

/// Input identifying one unit of work.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Job to advance.
    pub job_id: String,
    /// Owning user.
    pub user_id: String,
    /// Chunk to translate.
    pub chunk_index: u32,
    /// Target language code.
    pub target_language: String,
    /// Output tone.
    pub tone: Tone,
}

/// Uniform worker output for every path, success or failure.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Whether the chunk completed.
    pub success: bool,
    /// Echo of the job id.
    pub job_id: String,
    /// Echo of the chunk index.
    pub chunk_index: u32,
    /// Object-store key of the translated output, on success.
    pub translated_key: Option<String>,
    /// Endpoint tokens consumed, on success.
    pub tokens_used: Option<u32>,
    /// Estimated cost in USD, on success.
    pub estimated_cost: Option<f64>,
    /// Wall-clock time for this invocation.
    pub processing_time: Duration,
    /// Failure description, on failure.
    pub error: Option<String>,
    /// Whether the dispatcher should reschedule, on failure.
    pub retryable: Option<bool>,
    /// Advisory wait before rescheduling (quota denials).
    pub retry_after: Option<Duration>,
}

/// Successful inner-pipeline result.
struct ChunkSuccess {
    translated_key: String,
    tokens_total: u32,
    estimated_cost: f64,
}

/// The per-chunk worker. Construct once, share via `Arc`, invoke
/// [`Self::process`] per chunk.
pub struct TranslationWorker {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    limiter: Arc<RateLimiter>,
    client: Arc<TranslationClient>,
    config: WorkerConfig,
}

impl std::fmt::Debug for TranslationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TranslationWorker {
    /// Creates a worker over the shared pipeline services.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        limiter: Arc<RateLimiter>,
        client: Arc<TranslationClient>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            objects,
            limiter,
            client,
            config,
        }
    }

    /// Processes one chunk end to end, bounded by the wall-clock
    /// budget. Never panics and never returns an error: every outcome
    /// is folded into the [`WorkerReport`]. Non-retryable failures
    /// additionally flip the job to `TRANSLATION_FAILED` (best-effort;
    /// a failure of that status write is logged, not surfaced, so it
    /// cannot mask the original error).
    pub async fn process(&self, request: WorkerRequest) -> WorkerReport {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.config.timeout, self.run(&request)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout {
                budget: self.config.timeout,
            }),
        };

        match outcome {
            Ok(success) => {
                info!(
                    job_id = %request.job_id,
                    chunk_index = request.chunk_index,
                    tokens = success.tokens_total,
                    "chunk translated"
                );
                WorkerReport {
                    success: true,
                    job_id: request.job_id,
                    chunk_index: request.chunk_index,
                    translated_key: Some(success.translated_key),
                    tokens_used: Some(success.tokens_total),
                    estimated_cost: Some(success.estimated_cost),
                    processing_time: start.elapsed(),
                    error: None,
                    retryable: None,
                    retry_after: None,
                }
            }
            Err(e) => {
                let retryable = e.is_retryable();
                let retry_after = match &e {
                    WorkerError::QuotaDenied { retry_after } => Some(*retry_after),
                    _ => None,
                };
                if retryable {
                    debug!(
                        job_id = %request.job_id,
                        chunk_index = request.chunk_index,
                        error = %e,
                        "chunk deferred"
                    );
                } else {
                    self.mark_job_failed(&request, &e).await;
                }
                WorkerReport {
                    success: false,
                    job_id: request.job_id,
                    chunk_index: request.chunk_index,
                    translated_key: None,
                    tokens_used: None,
                    estimated_cost: None,
                    processing_time: start.elapsed(),
                    error: Some(e.to_string()),
                    retryable: Some(retryable),
                    retry_after,
                }
            }
        }
    }

    /// The eight-step chunk pipeline.
    async fn run(&self, request: &WorkerRequest) -> Result<ChunkSuccess, WorkerError> {
        // Validate the language before anything is spent on this request.
        let language = TargetLanguage::parse(&request.target_language)?;

        // Step 1: load the job and gate on state.
        let job = self
            .jobs
            .get(&request.job_id, &request.user_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound {
                job_id: request.job_id.clone(),
                user_id: request.user_id.clone(),
            })?;
        if !job.status.accepts_translation() {
            return Err(WorkerError::InvalidState {
                job_id: request.job_id.clone(),
                status: job.status.to_string(),
            });
        }

        // Step 2: load this worker's chunk. Context comes exclusively
        // from the chunk's own pre-computed previous summary.
        let chunk_key = job
            .chunk_keys
            .get(request.chunk_index as usize)
            .ok_or(WorkerError::ChunkIndexOutOfRange {
                index: request.chunk_index,
                total: job.total_chunks,
            })?
            .clone();
        let object = self.objects.get(&chunk_key).await?;
        let chunk: Chunk =
            serde_json::from_slice(&object.body).map_err(|e| StorageError::Corrupt {
                key: chunk_key.clone(),
                message: e.to_string(),
            })?;

        // Step 3: pre-call token estimate.
        let estimate = count_tokens(&chunk.primary_content)
            + count_tokens(&chunk.previous_summary)
            + self.config.prompt_overhead_tokens;
        let estimate = u64::try_from(estimate).unwrap_or(u64::MAX);

        // Step 4: acquire quota. Denial mutates nothing.
        let grant = match self.limiter.acquire(estimate).await? {
            Decision::Granted(grant) => grant,
            Decision::Denied { retry_after, .. } => {
                return Err(WorkerError::QuotaDenied { retry_after });
            }
        };

        // Step 5: translate.
        let options = TranslateOptions::new(language, request.tone);
        let context = TranslationContext {
            previous_chunks: if chunk.previous_summary.is_empty() {
                Vec::new()
            } else {
                vec![chunk.previous_summary.clone()]
            },
        };
        let translation = match self
            .client
            .translate(&chunk.primary_content, &options, &context)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                // The call never happened or failed; hand the token
                // reservation back before surfacing.
                self.limiter.consume(&grant, 0).await;
                return Err(e.into());
            }
        };

        // Reconcile the reservation to the endpoint's actual count.
        self.limiter
            .consume(&grant, u64::from(translation.tokens_used.total))
            .await;

        // Step 6: persist output with sidecar metadata. Overwrite is
        // idempotent at the key.
        let translated_key = keys::translated(&request.job_id, request.chunk_index);
        let metadata = sidecar_metadata(request, language, &translation);
        self.objects
            .put(
                &translated_key,
                translation.translated_text.into_bytes(),
                metadata,
            )
            .await?;

        // Step 7: advance progress, at most once per (job, chunk).
        let outcome = self
            .jobs
            .record_chunk_completion(
                &request.job_id,
                &request.user_id,
                request.chunk_index,
                u64::from(translation.tokens_used.total),
                translation.estimated_cost,
            )
            .await?;
        if !outcome.applied {
            debug!(
                job_id = %request.job_id,
                chunk_index = request.chunk_index,
                "completion already accounted; counters unchanged"
            );
        }

        // Step 8: report.
        Ok(ChunkSuccess {
            translated_key,
            tokens_total: translation.tokens_used.total,
            estimated_cost: translation.estimated_cost,
        })
    }

    /// Best-effort terminal failure write.
    async fn mark_job_failed(&self, request: &WorkerRequest, error: &WorkerError) {
        let message = error.to_string();
        let result = self
            .jobs
            .set_status_if(
                &request.job_id,
                &request.user_id,
                &[JobStatus::Chunked, JobStatus::TranslationInProgress],
                JobStatus::TranslationFailed,
                Some(&message),
            )
            .await;
        match result {
            Ok(true) => {
                warn!(job_id = %request.job_id, error = %message, "job marked failed");
            }
            Ok(false) => {}
            Err(e) => {
                // Swallowed deliberately: the original failure is the
                // report that matters.
                warn!(job_id = %request.job_id, error = %e, "failed-status write lost");
            }
        }
    }
}

/// Sidecar metadata stored on the translated object.
fn sidecar_metadata(
    request: &WorkerRequest,
    language: TargetLanguage,
    translation: &crate::translate::TranslationOutcome,
) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("jobid".to_string(), request.job_id.clone());
    metadata.insert("chunkindex".to_string(), request.chunk_index.to_string());
    metadata.insert("sourcelanguage".to_string(), "auto".to_string());
    metadata.insert("targetlanguage".to_string(), language.code().to_string());
    metadata.insert(
        "tokensused".to_string(),
        translation.tokens_used.total.to_string(),
    );
    metadata.insert(
        "estimatedcost".to_string(),
        format!("{:.8}", translation.estimated_cost),
    );
    metadata.insert("translatedat".to_string(), Utc::now().to_rfc3339());
    metadata
}
