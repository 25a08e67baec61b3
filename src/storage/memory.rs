//! In-memory store implementations.
//!
//! Back tests and single-process deployments. All three stores share
//! the same locking discipline: one mutex per store, every trait
//! operation completes inside a single critical section, which gives
//! the conditional-update primitives their atomicity.
//!
//! The object store additionally records every key it serves, so tests
//! can assert access patterns (a worker must read exactly one chunk
//! object and nothing under `translated/`).

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::job::{Job, JobStatus};

use super::{
    ChunkingRecord, CompletionOutcome, JobStore, ObjectStore, RateStateStore, StoredObject,
    VersionedRecord, apply,
};

/// In-memory [`ObjectStore`] with read recording.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    reads: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys served by `get` since construction (or the last
    /// [`Self::clear_reads`]), in call order.
    #[must_use]
    pub fn recorded_reads(&self) -> Vec<String> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears the read log.
    pub fn clear_reads(&self) {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key exists, without recording a read.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.to_string());
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), StoredObject { body, metadata });
        Ok(())
    }
}

/// Inner state of [`MemoryJobStore`]; one mutex keeps job mutation and
/// the completion markers atomic together.
#[derive(Debug, Default)]
struct JobStoreInner {
    jobs: HashMap<(String, String), Job>,
    completions: HashSet<(String, String, u32)>,
}

/// In-memory [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobStoreInner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str, user_id: &str) -> Result<Option<Job>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .jobs
            .get(&(job_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn put(&self, job: &Job) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .jobs
            .insert((job.job_id.clone(), job.user_id.clone()), job.clone());
        Ok(())
    }

    async fn set_status_if(
        &self,
        job_id: &str,
        user_id: &str,
        expected: &[JobStatus],
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let job = inner
            .jobs
            .get_mut(&(job_id.to_string(), user_id.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                key: format!("jobs/{job_id}/{user_id}"),
            })?;
        Ok(apply::status_if(job, expected, next, error_message))
    }

    async fn record_chunking(
        &self,
        job_id: &str,
        user_id: &str,
        record: &ChunkingRecord,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let job = inner
            .jobs
            .get_mut(&(job_id.to_string(), user_id.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                key: format!("jobs/{job_id}/{user_id}"),
            })?;
        apply::chunking(job, record);
        Ok(())
    }

    async fn record_chunk_completion(
        &self,
        job_id: &str,
        user_id: &str,
        chunk_index: u32,
        tokens: u64,
        cost: f64,
    ) -> Result<CompletionOutcome, StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let marker = (job_id.to_string(), user_id.to_string(), chunk_index);

        if inner.completions.contains(&marker) {
            let job = inner
                .jobs
                .get(&(job_id.to_string(), user_id.to_string()))
                .ok_or_else(|| StorageError::NotFound {
                    key: format!("jobs/{job_id}/{user_id}"),
                })?;
            return Ok(CompletionOutcome {
                applied: false,
                translated_chunks: job.translated_chunks,
                total_chunks: job.total_chunks,
                job_completed: job.status == JobStatus::TranslationCompleted,
            });
        }

        let job = inner
            .jobs
            .get_mut(&(job_id.to_string(), user_id.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                key: format!("jobs/{job_id}/{user_id}"),
            })?;
        let outcome = apply::completion(job, tokens, cost);
        inner.completions.insert(marker);
        Ok(outcome)
    }
}

/// In-memory [`RateStateStore`] with an availability toggle for
/// failure-path tests.
#[derive(Debug, Default)]
pub struct MemoryRateStateStore {
    rows: Mutex<HashMap<(String, String), VersionedRecord>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryRateStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with
    /// [`StorageError::Unavailable`] until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                message: "rate state store offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RateStateStore for MemoryRateStateStore {
    async fn load(
        &self,
        api_id: &str,
        bucket: &str,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .get(&(api_id.to_string(), bucket.to_string()))
            .cloned())
    }

    async fn store(
        &self,
        api_id: &str,
        bucket: &str,
        payload: &str,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (api_id.to_string(), bucket.to_string());
        let current = rows.get(&key).map(|r| r.version);

        let won = match (expected_version, current) {
            (None, None) => {
                rows.insert(
                    key,
                    VersionedRecord {
                        payload: payload.to_string(),
                        version: 1,
                    },
                );
                true
            }
            (Some(expected), Some(actual)) if expected == actual => {
                rows.insert(
                    key,
                    VersionedRecord {
                        payload: payload.to_string(),
                        version: actual.wrapping_add(1),
                    },
                );
                true
            }
            _ => false,
        };
        Ok(won)
    }

    async fn clear(&self, api_id: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.retain(|(api, _), _| api != api_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::job::Tone;

    use super::*;

    fn chunked_job(total: u32) -> Job {
        let mut job = Job::new("job-1", "user-1", "es", Tone::Neutral);
        job.status = JobStatus::Chunked;
        job.total_chunks = total;
        job.chunk_keys = (0..total).map(|i| format!("chunks/u/f/c{i}.json")).collect();
        job
    }

    #[tokio::test]
    async fn test_object_store_roundtrip_and_read_log() {
        let store = MemoryObjectStore::new();
        store
            .put("a/b", b"data".to_vec(), HashMap::new())
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let obj = store.get("a/b").await.unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(obj.body, b"data");
        assert!(store.get("missing").await.is_err());
        assert_eq!(store.recorded_reads(), vec!["a/b", "missing"]);
    }

    #[tokio::test]
    async fn test_completion_is_at_most_once() {
        let store = MemoryJobStore::new();
        store
            .put(&chunked_job(2))
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let first = store
            .record_chunk_completion("job-1", "user-1", 0, 100, 0.01)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(first.applied);
        assert_eq!(first.translated_chunks, 1);
        assert!(!first.job_completed);

        let repeat = store
            .record_chunk_completion("job-1", "user-1", 0, 100, 0.01)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(!repeat.applied);
        assert_eq!(repeat.translated_chunks, 1);

        let job = store
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.tokens_used, 100);
        assert_eq!(job.status, JobStatus::TranslationInProgress);
        assert!(job.translation_started_at.is_some());
    }

    #[tokio::test]
    async fn test_final_completion_finishes_job() {
        let store = MemoryJobStore::new();
        store
            .put(&chunked_job(2))
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        store
            .record_chunk_completion("job-1", "user-1", 1, 50, 0.005)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let last = store
            .record_chunk_completion("job-1", "user-1", 0, 50, 0.005)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(last.job_completed);

        let job = store
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, JobStatus::TranslationCompleted);
        assert!(job.translation_completed_at.is_some());
        assert_eq!(job.translated_chunks, job.total_chunks);
    }

    #[tokio::test]
    async fn test_set_status_if_guards() {
        let store = MemoryJobStore::new();
        store
            .put(&chunked_job(1))
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let fired = store
            .set_status_if(
                "job-1",
                "user-1",
                &[JobStatus::Chunked, JobStatus::TranslationInProgress],
                JobStatus::TranslationFailed,
                Some("auth rejected"),
            )
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(fired);

        let again = store
            .set_status_if(
                "job-1",
                "user-1",
                &[JobStatus::Chunked],
                JobStatus::TranslationFailed,
                None,
            )
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(!again);

        let job = store
            .get("job-1", "user-1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, JobStatus::TranslationFailed);
        assert_eq!(job.error_message.as_deref(), Some("auth rejected"));
        assert!(job.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_rate_store_cas() {
        let store = MemoryRateStateStore::new();
        assert!(
            store
                .store("api", "rpm", "{}", None)
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
        );
        // Second insert loses.
        assert!(
            !store
                .store("api", "rpm", "{}", None)
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
        );

        let rec = store
            .load("api", "rpm")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(rec.version, 1);

        assert!(
            store
                .store("api", "rpm", "{\"v\":2}", Some(1))
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
        );
        // Stale version loses.
        assert!(
            !store
                .store("api", "rpm", "{\"v\":3}", Some(1))
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
        );
    }

    #[tokio::test]
    async fn test_rate_store_unavailable() {
        let store = MemoryRateStateStore::new();
        store.set_unavailable(true);
        assert!(store.load("api", "rpm").await.is_err());
        assert!(store.store("api", "rpm", "{}", None).await.is_err());
        store.set_unavailable(false);
        assert!(store.load("api", "rpm").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_scopes_to_api() {
        let store = MemoryRateStateStore::new();
        for bucket in ["rpm", "tpm", "rpd"] {
            store
                .store("api-a", bucket, "{}", None)
                .await
                .unwrap_or_else(|e| unreachable!("{e}"));
        }
        store
            .store("api-b", "rpm", "{}", None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        store
            .clear("api-a")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(
            store
                .load("api-a", "rpm")
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
                .is_none()
        );
        assert!(
            store
                .load("api-b", "rpm")
                .await
                .unwrap_or_else(|e| unreachable!("{e}"))
                .is_some()
        );
    }
}
