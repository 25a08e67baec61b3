//! Dispatcher: chunking trigger and translation fan-out.
//!
//! Owns the two pipeline entry points. The chunking path reacts to an
//! uploaded source object: verify metadata, run the chunker, write
//! chunk objects strictly in order, record the results. The
//! translation path gates on job state, then fans one worker out per
//! chunk under a bounded concurrency semaphore, with an outer
//! quota-retry loop per chunk honoring the limiter's advisory waits.
//!
//! Completion detection is order-independent: it rides the job
//! counter, advanced at-most-once per chunk by the workers, never the
//! highest index seen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::chunking::{ChunkMetadata, DocumentChunker};
use crate::config::DispatchConfig;
use crate::error::{ChunkError, DispatchError};
use crate::job::JobStatus;
use crate::storage::{ChunkingRecord, JobStore, ObjectStore, SOURCE_METADATA_KEYS, keys};
use crate::worker::{TranslationWorker, WorkerReport, WorkerRequest};

/// Outcome of a full fan-out over one job.
#[derive(Debug)]
pub struct DispatchSummary {
    /// The dispatched job.
    pub job_id: String,
    /// Chunks in the job.
    pub total_chunks: u32,
    /// Chunks that completed.
    pub succeeded: usize,
    /// Chunks that did not complete.
    pub failed: usize,
    /// Job status after the fan-out.
    pub final_status: Option<JobStatus>,
    /// Per-chunk reports, in chunk order.
    pub reports: Vec<WorkerReport>,
}

/// Pipeline dispatcher. Construct once per process.
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    worker: Arc<TranslationWorker>,
    chunker: DocumentChunker,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over the shared pipeline services.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        worker: Arc<TranslationWorker>,
        chunker: DocumentChunker,
        config: DispatchConfig,
    ) -> Self {
        Self {
            jobs,
            objects,
            worker,
            chunker,
            config,
        }
    }

    /// Chunking trigger: processes the source object uploaded for a
    /// job, leaving the job in `CHUNKED` (or `CHUNKING_FAILED`).
    ///
    /// Chunk objects are written strictly in index order before the
    /// job record is updated, so a `CHUNKED` job always references
    /// fully persisted chunks.
    ///
    /// # Errors
    ///
    /// [`DispatchError::JobNotFound`] / [`DispatchError::InvalidState`]
    /// when the job is absent or not in `PENDING_UPLOAD`;
    /// [`DispatchError::Chunk`] for chunker failures (the job is moved
    /// to `CHUNKING_FAILED` first); [`DispatchError::Storage`] for
    /// persistence failures.
    pub async fn run_chunking(
        &self,
        job_id: &str,
        user_id: &str,
        source_key: &str,
    ) -> Result<ChunkMetadata, DispatchError> {
        let job = self
            .jobs
            .get(job_id, user_id)
            .await?
            .ok_or_else(|| DispatchError::JobNotFound {
                job_id: job_id.to_string(),
                user_id: user_id.to_string(),
            })?;
        let entered = self
            .jobs
            .set_status_if(
                job_id,
                user_id,
                &[JobStatus::PendingUpload],
                JobStatus::Chunking,
                None,
            )
            .await?;
        if !entered {
            return Err(DispatchError::InvalidState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }

        match self.chunk_and_store(job_id, user_id, source_key).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                let reason = e.to_string();
                let marked = self
                    .jobs
                    .set_status_if(
                        job_id,
                        user_id,
                        &[JobStatus::Chunking],
                        JobStatus::ChunkingFailed,
                        Some(&reason),
                    )
                    .await;
                if let Err(write_err) = marked {
                    warn!(job_id, error = %write_err, "chunking-failed status write lost");
                }
                Err(e)
            }
        }
    }

    /// The fallible middle of the chunking path; failures are
    /// reflected onto the job by [`Self::run_chunking`].
    async fn chunk_and_store(
        &self,
        job_id: &str,
        user_id: &str,
        source_key: &str,
    ) -> Result<ChunkMetadata, DispatchError> {
        let source = self.objects.get(source_key).await?;
        for &required in SOURCE_METADATA_KEYS {
            if !source.metadata.contains_key(required) {
                return Err(ChunkError::MissingMetadata {
                    key: required.to_string(),
                }
                .into());
            }
        }
        let file_id = source
            .metadata
            .get("fileid")
            .cloned()
            .unwrap_or_default();
        let text = source.text(source_key)?;

        let (chunks, metadata) = self.chunker.chunk(&text)?;

        let mut chunk_keys = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let key = keys::chunk(user_id, &file_id, &chunk.chunk_id);
            let body = serde_json::to_vec(chunk).map_err(|e| ChunkError::InvariantViolation {
                message: format!("chunk serialization failed: {e}"),
            })?;
            self.objects
                .put(&key, body, std::collections::HashMap::new())
                .await?;
            chunk_keys.push(key);
        }

        self.jobs
            .record_chunking(
                job_id,
                user_id,
                &ChunkingRecord {
                    chunk_keys,
                    total_chunks: metadata.total_chunks,
                    original_token_count: metadata.original_token_count,
                    average_chunk_size: metadata.average_chunk_size,
                    processing_time_ms: metadata.processing_time_ms,
                },
            )
            .await?;

        info!(job_id, total_chunks = metadata.total_chunks, "job chunked");
        Ok(metadata)
    }

    /// Translation trigger: fans one worker out per chunk and waits
    /// for all of them.
    ///
    /// Chunks may finish in any order. Each chunk gets an outer retry
    /// loop for retryable outcomes (quota denials, transient endpoint
    /// trouble that outlived the client's budget), bounded by the
    /// configured attempt count and the longest advisory wait the
    /// dispatcher will sleep on.
    ///
    /// # Errors
    ///
    /// [`DispatchError::JobNotFound`] when the job is absent;
    /// [`DispatchError::InvalidState`] unless the job is in `CHUNKED`
    /// or `TRANSLATION_IN_PROGRESS`.
    pub async fn start_translation(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<DispatchSummary, DispatchError> {
        let job = self
            .jobs
            .get(job_id, user_id)
            .await?
            .ok_or_else(|| DispatchError::JobNotFound {
                job_id: job_id.to_string(),
                user_id: user_id.to_string(),
            })?;
        if !job.status.accepts_translation() {
            return Err(DispatchError::InvalidState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(job.total_chunks as usize);

        for chunk_index in 0..job.total_chunks {
            let sem = Arc::clone(&semaphore);
            let worker = Arc::clone(&self.worker);
            let request = WorkerRequest {
                job_id: job_id.to_string(),
                user_id: user_id.to_string(),
                chunk_index,
                target_language: job.target_language.clone(),
                tone: job.tone,
            };
            let max_attempts = self.config.max_quota_retries;
            let max_wait = self.config.max_retry_wait;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    // Semaphore closed: report the chunk as deferred.
                    return WorkerReport {
                        success: false,
                        job_id: request.job_id.clone(),
                        chunk_index,
                        translated_key: None,
                        tokens_used: None,
                        estimated_cost: None,
                        processing_time: Duration::ZERO,
                        error: Some("dispatch pool shut down".to_string()),
                        retryable: Some(true),
                        retry_after: None,
                    };
                };
                run_with_retries(&worker, request, max_attempts, max_wait).await
            }));
        }

        let joined = futures_util::future::join_all(handles).await;
        let reports: Vec<WorkerReport> = joined
            .into_iter()
            .enumerate()
            .map(|(chunk_index, result)| {
                result.unwrap_or_else(|e| WorkerReport {
                    success: false,
                    job_id: job_id.to_string(),
                    chunk_index: u32::try_from(chunk_index).unwrap_or(u32::MAX),
                    translated_key: None,
                    tokens_used: None,
                    estimated_cost: None,
                    processing_time: Duration::ZERO,
                    error: Some(format!("task join failed: {e}")),
                    retryable: Some(true),
                    retry_after: None,
                })
            })
            .collect();

        let succeeded = reports.iter().filter(|r| r.success).count();
        let failed = reports.len() - succeeded;
        let final_status = self.jobs.get(job_id, user_id).await?.map(|j| j.status);

        info!(
            job_id,
            succeeded,
            failed,
            ?final_status,
            "translation fan-out finished"
        );

        Ok(DispatchSummary {
            job_id: job_id.to_string(),
            total_chunks: job.total_chunks,
            succeeded,
            failed,
            final_status,
            reports,
        })
    }
}

/// Per-chunk outer retry loop. Retryable reports are re-attempted
/// after the limiter's advisory wait (or a short default); anything
/// else returns immediately.
async fn run_with_retries(
    worker: &TranslationWorker,
    request: WorkerRequest,
    max_attempts: u32,
    max_wait: Duration,
) -> WorkerReport {
    let mut attempt: u32 = 0;
    loop {
        let report = worker.process(request.clone()).await;
        if report.success || report.retryable != Some(true) {
            return report;
        }
        if attempt >= max_attempts {
            debug!(
                chunk_index = request.chunk_index,
                attempts = attempt + 1,
                "chunk retry budget exhausted"
            );
            return report;
        }

        let wait = report
            .retry_after
            .unwrap_or_else(|| Duration::from_millis(250u64 << attempt.min(8)));
        if wait > max_wait {
            // A daily-quota denial can ask for hours; surface instead
            // of sleeping on it.
            debug!(
                chunk_index = request.chunk_index,
                ?wait,
                "advisory wait exceeds dispatcher budget"
            );
            return report;
        }
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::chunking::DocumentChunker;
    use crate::config::{
        ChunkerConfig, ClientConfig, RateLimitConfig, WorkerConfig,
    };
    use crate::error::TranslateError;
    use crate::job::{Job, JobStatus, Tone};
    use crate::limiter::RateLimiter;
    use crate::storage::memory::{MemoryJobStore, MemoryObjectStore, MemoryRateStateStore};
    use crate::storage::{JobStore, ObjectStore, RateStateStore};
    use crate::translate::TranslationClient;
    use crate::translate::backend::{GenerationOutput, TranslationBackend, UsageMetadata};
    use crate::worker::TranslationWorker;

    use async_trait::async_trait;

    use super::*;

    struct UppercaseBackend;

    #[async_trait]
    impl TranslationBackend for UppercaseBackend {
        fn name(&self) -> &'static str {
            "uppercase"
        }

        async fn generate(&self, prompt: &str) -> Result<GenerationOutput, TranslateError> {
            Ok(GenerationOutput {
                text: prompt.to_uppercase(),
                usage: UsageMetadata {
                    prompt_token_count: 50,
                    candidates_token_count: 50,
                    total_token_count: 100,
                },
            })
        }
    }

    struct Fixture {
        jobs: Arc<MemoryJobStore>,
        objects: Arc<MemoryObjectStore>,
        limiter: Arc<RateLimiter>,
        dispatcher: Dispatcher,
    }

    fn fixture(limit_config: RateLimitConfig, dispatch: DispatchConfig) -> Fixture {
        let jobs = Arc::new(MemoryJobStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let limiter = Arc::new(
            RateLimiter::new(
                Arc::new(MemoryRateStateStore::new()) as Arc<dyn RateStateStore>,
                limit_config,
            )
            .unwrap_or_else(|e| unreachable!("{e}")),
        );
        let client = Arc::new(TranslationClient::new(
            Arc::new(UppercaseBackend),
            ClientConfig::default(),
        ));
        let chunker = DocumentChunker::new(ChunkerConfig {
            primary_chunk_size: 40,
            context_size: 10,
            ..ChunkerConfig::default()
        });
        let worker = Arc::new(TranslationWorker::new(
            jobs.clone() as Arc<dyn JobStore>,
            objects.clone() as Arc<dyn ObjectStore>,
            Arc::clone(&limiter),
            client,
            WorkerConfig::default(),
        ));
        let dispatcher = Dispatcher::new(
            jobs.clone() as Arc<dyn JobStore>,
            objects.clone() as Arc<dyn ObjectStore>,
            worker,
            chunker,
            dispatch,
        );
        Fixture {
            jobs,
            objects,
            limiter,
            dispatcher,
        }
    }

    fn open_limits() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: 1000,
            tokens_per_minute: 10_000_000,
            requests_per_day: 10_000,
            ..RateLimitConfig::default()
        }
    }

    fn default_dispatch() -> DispatchConfig {
        DispatchConfig {
            max_concurrency: 4,
            max_quota_retries: 10,
            max_retry_wait: Duration::from_secs(30),
        }
    }

    async fn seed_job(fx: &Fixture, text: &str) -> String {
        let mut job = Job::new("job-1", "user-1", "es", Tone::Neutral);
        let source_key = crate::storage::keys::source("user-1", "file-1", "doc.txt");
        job.source_key = Some(source_key.clone());
        fx.jobs
            .put(&job)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let mut metadata = HashMap::new();
        metadata.insert("userid".to_string(), "user-1".to_string());
        metadata.insert("jobid".to_string(), "job-1".to_string());
        metadata.insert("fileid".to_string(), "file-1".to_string());
        fx.objects
            .put(&source_key, text.as_bytes().to_vec(), metadata)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        source_key
    }

    fn long_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence {i} holds a few plain words."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_chunking_path_writes_chunks_in_order() {
        let fx = fixture(RateLimitConfig::default(), default_dispatch());
        let source_key = seed_job(&fx, &long_text(20)).await;

        let metadata = fx
            .dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(metadata.total_chunks > 1);

        let job = fx
            .jobs
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, JobStatus::Chunked);
        assert_eq!(job.chunk_keys.len() as u32, job.total_chunks);
        for key in &job.chunk_keys {
            assert!(fx.objects.contains(key), "missing chunk object {key}");
        }
    }

    #[tokio::test]
    async fn test_chunking_requires_source_metadata() {
        let fx = fixture(RateLimitConfig::default(), default_dispatch());
        let job = Job::new("job-1", "user-1", "es", Tone::Neutral);
        fx.jobs
            .put(&job)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let source_key = crate::storage::keys::source("user-1", "file-1", "doc.txt");
        fx.objects
            .put(&source_key, b"Some text.".to_vec(), HashMap::new())
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let result = fx
            .dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Chunk(ChunkError::MissingMetadata { .. }))
        ));

        let job = fx
            .jobs
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, JobStatus::ChunkingFailed);
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn test_empty_source_fails_chunking() {
        let fx = fixture(RateLimitConfig::default(), default_dispatch());
        let source_key = seed_job(&fx, "   ").await;

        let result = fx
            .dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Chunk(ChunkError::EmptyInput))
        ));
        let job = fx
            .jobs
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, JobStatus::ChunkingFailed);
    }

    #[tokio::test]
    async fn test_translation_requires_chunked_state() {
        let fx = fixture(RateLimitConfig::default(), default_dispatch());
        seed_job(&fx, &long_text(5)).await;

        let result = fx.dispatcher.start_translation("job-1", "user-1").await;
        assert!(matches!(result, Err(DispatchError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_full_fan_out_completes_job() {
        let fx = fixture(open_limits(), default_dispatch());
        let source_key = seed_job(&fx, &long_text(30)).await;
        fx.dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let summary = fx
            .dispatcher
            .start_translation("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.succeeded as u32, summary.total_chunks);
        assert_eq!(summary.final_status, Some(JobStatus::TranslationCompleted));

        let job = fx
            .jobs
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.translated_chunks, job.total_chunks);
        for index in 0..job.total_chunks {
            assert!(
                fx.objects
                    .contains(&crate::storage::keys::translated("job-1", index))
            );
        }
    }

    #[tokio::test]
    async fn test_fan_out_retries_through_quota_denials() {
        // A fast-refilling RPM bucket (120/min = 2/sec), drained down
        // to two slots: some chunks are denied first, then carried
        // through by the outer retry loop on refilled quota.
        let fx = fixture(
            RateLimitConfig {
                requests_per_minute: 120,
                tokens_per_minute: 10_000_000,
                requests_per_day: 10_000,
                ..RateLimitConfig::default()
            },
            default_dispatch(),
        );
        let source_key = seed_job(&fx, &long_text(12)).await;
        fx.dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        // Drain all but two request slots.
        for _ in 0..118 {
            let _ = fx
                .limiter
                .acquire(0)
                .await
                .unwrap_or_else(|e| unreachable!("{e}"));
        }

        let summary = fx
            .dispatcher
            .start_translation("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(summary.failed, 0, "reports: {:?}", summary.reports);
        assert_eq!(summary.final_status, Some(JobStatus::TranslationCompleted));
    }

    #[tokio::test]
    async fn test_long_advisory_waits_are_surfaced_not_slept() {
        // Daily quota of 1: the first chunk completes, the rest are
        // denied with a wait running to local midnight, which exceeds
        // the dispatcher's sleep budget and must be surfaced as
        // retryable failures promptly.
        let fx = fixture(
            RateLimitConfig {
                requests_per_minute: 1000,
                tokens_per_minute: 10_000_000,
                requests_per_day: 1,
                ..RateLimitConfig::default()
            },
            DispatchConfig {
                max_concurrency: 2,
                max_quota_retries: 3,
                max_retry_wait: Duration::from_millis(50),
            },
        );
        let source_key = seed_job(&fx, &long_text(12)).await;
        fx.dispatcher
            .run_chunking("job-1", "user-1", &source_key)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let summary = fx
            .dispatcher
            .start_translation("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(summary.succeeded, 1);
        assert!(summary.failed >= 1);
        for report in summary.reports.iter().filter(|r| !r.success) {
            assert_eq!(report.retryable, Some(true));
        }
        // The job is mid-flight, not failed: quota denial is not an error.
        assert_eq!(
            summary.final_status,
            Some(JobStatus::TranslationInProgress)
        );
    }
}
