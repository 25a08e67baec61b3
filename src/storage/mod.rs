//! Persistence adapters.
//!
//! Three narrow store contracts back the pipeline: an object store for
//! document bodies (source, chunk, and translated objects), a key-value
//! job store with conditional update primitives, and a versioned state
//! store for rate-limiter buckets. The stores are the sole source of
//! truth across restarts; no in-process state needs to survive one.
//!
//! Two implementations ship: [`memory`] for tests and single-process
//! use, [`sqlite`] for durable local deployments.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::job::{Job, JobStatus};

/// Object-store key schema.
///
/// The schema is the coupling point between the chunker, the workers,
/// and any external uploader; all key construction goes through here.
pub mod keys {
    /// Key of an uploaded source document.
    #[must_use]
    pub fn source(user_id: &str, file_id: &str, filename: &str) -> String {
        format!("uploads/{user_id}/{file_id}/{filename}")
    }

    /// Key of a chunk object.
    #[must_use]
    pub fn chunk(user_id: &str, file_id: &str, chunk_id: &str) -> String {
        format!("chunks/{user_id}/{file_id}/{chunk_id}.json")
    }

    /// Key of a translated chunk.
    #[must_use]
    pub fn translated(job_id: &str, chunk_index: u32) -> String {
        format!("translated/{job_id}/chunk-{chunk_index}.txt")
    }

    /// Prefix under which translated output lives. Workers must never
    /// read below this prefix.
    pub const TRANSLATED_PREFIX: &str = "translated/";
}

/// Required metadata keys on source objects.
pub const SOURCE_METADATA_KEYS: &[&str] = &["userid", "jobid", "fileid"];

/// Default on-disk location of the local state database.
pub const DEFAULT_DB_PATH: &str = ".doctrans/state.db";

/// A stored object: body bytes plus string metadata.
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    /// Object body.
    pub body: Vec<u8>,
    /// Object metadata.
    pub metadata: HashMap<String, String>,
}

impl StoredObject {
    /// Decodes the body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] when the body is not valid UTF-8.
    pub fn text(&self, key: &str) -> Result<String, StorageError> {
        String::from_utf8(self.body.clone()).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: format!("body is not UTF-8: {e}"),
        })
    }
}

/// Blob storage with per-object metadata.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Writes (or overwrites) an object.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError>;
}

/// Chunking results recorded onto the job in one update.
#[derive(Debug, Clone)]
pub struct ChunkingRecord {
    /// Ordered chunk object keys.
    pub chunk_keys: Vec<String>,
    /// Number of chunks.
    pub total_chunks: u32,
    /// Source document token count.
    pub original_token_count: usize,
    /// Mean chunk size in tokens.
    pub average_chunk_size: usize,
    /// Chunking wall-clock time in milliseconds.
    pub processing_time_ms: u64,
}

/// Result of a conditional chunk-completion update.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOutcome {
    /// Whether this call advanced the counter. `false` means the chunk
    /// was already accounted (a retried worker) and nothing changed.
    pub applied: bool,
    /// `translatedChunks` after the update.
    pub translated_chunks: u32,
    /// The job's `totalChunks`.
    pub total_chunks: u32,
    /// Whether this update completed the job.
    pub job_completed: bool,
}

/// Key-value job storage with the conditional update primitives the
/// progress contract requires (set-if, guarded increment).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Loads a job by its composite key.
    async fn get(&self, job_id: &str, user_id: &str) -> Result<Option<Job>, StorageError>;

    /// Creates or replaces a job record.
    async fn put(&self, job: &Job) -> Result<(), StorageError>;

    /// Sets the status to `next` only when the current status is one of
    /// `expected`. Returns whether the write happened. Failure statuses
    /// also record `error_message` and the failure timestamp.
    async fn set_status_if(
        &self,
        job_id: &str,
        user_id: &str,
        expected: &[JobStatus],
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StorageError>;

    /// Writes the chunker's results and moves the job to `CHUNKED`.
    async fn record_chunking(
        &self,
        job_id: &str,
        user_id: &str,
        record: &ChunkingRecord,
    ) -> Result<(), StorageError>;

    /// Atomically advances progress for one chunk, at most once per
    /// `(job, chunk_index)` across worker retries.
    ///
    /// On first application: increments `translatedChunks`, adds
    /// `tokens` and `cost`, promotes `CHUNKED` to
    /// `TRANSLATION_IN_PROGRESS`, stamps `updatedAt`, and, once the
    /// counter reaches `totalChunks`, sets `TRANSLATION_COMPLETED`
    /// with its timestamp. A repeat call reports `applied: false` and
    /// changes nothing.
    async fn record_chunk_completion(
        &self,
        job_id: &str,
        user_id: &str,
        chunk_index: u32,
        tokens: u64,
        cost: f64,
    ) -> Result<CompletionOutcome, StorageError>;
}

/// A versioned rate-limiter state record.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Serialized bucket state.
    pub payload: String,
    /// Monotonic version for compare-and-set.
    pub version: u64,
}

/// Versioned storage for rate-limiter buckets, keyed
/// `(api_id, bucket_type)`.
#[async_trait]
pub trait RateStateStore: Send + Sync {
    /// Loads the current record for a bucket, if any.
    async fn load(
        &self,
        api_id: &str,
        bucket: &str,
    ) -> Result<Option<VersionedRecord>, StorageError>;

    /// Compare-and-set write.
    ///
    /// `expected_version: None` inserts only when no record exists;
    /// `Some(v)` replaces only a record still at version `v`. Returns
    /// whether the write won.
    async fn store(
        &self,
        api_id: &str,
        bucket: &str,
        payload: &str,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError>;

    /// Removes every bucket record for `api_id` (the limiter's reset hook).
    async fn clear(&self, api_id: &str) -> Result<(), StorageError>;
}

/// The job update expressions, shared by every [`JobStore`]
/// implementation so both backends apply identical semantics. Each
/// backend supplies the atomicity (lock, transaction); these functions
/// supply the field mutations.
pub(crate) mod apply {
    use chrono::Utc;

    use super::{ChunkingRecord, CompletionOutcome, Job, JobStatus};

    /// Applies a guarded status change. Returns whether it fired.
    pub(crate) fn status_if(
        job: &mut Job,
        expected: &[JobStatus],
        next: JobStatus,
        error_message: Option<&str>,
    ) -> bool {
        if !expected.contains(&job.status) {
            return false;
        }
        let now = Utc::now();
        job.status = next;
        job.updated_at = Some(now);
        if matches!(
            next,
            JobStatus::ChunkingFailed | JobStatus::TranslationFailed
        ) {
            job.error_message = error_message.map(str::to_string);
            job.failed_at = Some(now);
        }
        true
    }

    /// Applies the chunker's results and moves the job to `CHUNKED`.
    pub(crate) fn chunking(job: &mut Job, record: &ChunkingRecord) {
        job.status = JobStatus::Chunked;
        job.total_chunks = record.total_chunks;
        job.chunk_keys = record.chunk_keys.clone();
        job.original_token_count = record.original_token_count;
        job.average_chunk_size = record.average_chunk_size;
        job.chunking_processing_time_ms = record.processing_time_ms;
        job.updated_at = Some(Utc::now());
    }

    /// Applies one chunk-completion increment. The caller has already
    /// established that this `(job, chunk_index)` was not yet accounted.
    pub(crate) fn completion(job: &mut Job, tokens: u64, cost: f64) -> CompletionOutcome {
        let now = Utc::now();
        if job.status == JobStatus::Chunked {
            job.status = JobStatus::TranslationInProgress;
            job.translation_started_at = Some(now);
        }
        job.translated_chunks = job.translated_chunks.saturating_add(1).min(job.total_chunks);
        job.tokens_used = job.tokens_used.saturating_add(tokens);
        job.estimated_cost += cost;
        job.updated_at = Some(now);

        let job_completed = job.translated_chunks == job.total_chunks
            && job.status == JobStatus::TranslationInProgress;
        if job_completed {
            job.status = JobStatus::TranslationCompleted;
            job.translation_completed_at = Some(now);
        }

        CompletionOutcome {
            applied: true,
            translated_chunks: job.translated_chunks,
            total_chunks: job.total_chunks,
            job_completed,
        }
    }
}
