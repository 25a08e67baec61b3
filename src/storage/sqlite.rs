//! SQLite-backed store implementations.
//!
//! One database file carries all three store contracts. Conditional
//! semantics come from SQL itself: `INSERT OR IGNORE` provides the
//! at-most-once completion marker, a version column provides the
//! compare-and-set on rate-limit state, and each trait operation runs
//! inside one connection lock (with a transaction where more than one
//! statement is involved).
//!
//! Operations are point reads and writes; they execute directly under
//! the lock rather than hopping to a blocking thread pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StorageError;
use crate::job::{Job, JobStatus};

use super::{
    ChunkingRecord, CompletionOutcome, JobStore, ObjectStore, RateStateStore, StoredObject,
    VersionedRecord, apply,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS objects (
    key      TEXT PRIMARY KEY,
    body     BLOB NOT NULL,
    metadata TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS jobs (
    job_id  TEXT NOT NULL,
    user_id TEXT NOT NULL,
    record  TEXT NOT NULL,
    PRIMARY KEY (job_id, user_id)
);
CREATE TABLE IF NOT EXISTS chunk_completions (
    job_id      TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    PRIMARY KEY (job_id, user_id, chunk_index)
);
CREATE TABLE IF NOT EXISTS rate_state (
    api_id  TEXT NOT NULL,
    bucket  TEXT NOT NULL,
    payload TEXT NOT NULL,
    version INTEGER NOT NULL,
    PRIMARY KEY (api_id, bucket)
);
";

/// SQLite-backed implementation of all three store contracts.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] when the file cannot be
    /// opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (test and scratch use).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] on initialization failure.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn storage_err(e: rusqlite::Error) -> StorageError {
    StorageError::Unavailable {
        message: e.to_string(),
    }
}

fn decode_job(key: &str, record: &str) -> Result<Job, StorageError> {
    serde_json::from_str(record).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn encode_job(key: &str, job: &Job) -> Result<String, StorageError> {
    serde_json::to_string(job).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT body, metadata FROM objects WHERE key = ?1",
                params![key],
                |row| {
                    let body: Vec<u8> = row.get(0)?;
                    let metadata: String = row.get(1)?;
                    Ok((body, metadata))
                },
            )
            .optional()
            .map_err(storage_err)?;

        let (body, metadata_json) = row.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let metadata: HashMap<String, String> =
            serde_json::from_str(&metadata_json).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: format!("bad metadata: {e}"),
            })?;
        Ok(StoredObject { body, metadata })
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let metadata_json = serde_json::to_string(&metadata).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO objects (key, body, metadata) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = ?2, metadata = ?3",
            params![key, body, metadata_json],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn get(&self, job_id: &str, user_id: &str) -> Result<Option<Job>, StorageError> {
        let conn = self.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        record
            .map(|r| decode_job(&format!("jobs/{job_id}/{user_id}"), &r))
            .transpose()
    }

    async fn put(&self, job: &Job) -> Result<(), StorageError> {
        let key = format!("jobs/{}/{}", job.job_id, job.user_id);
        let record = encode_job(&key, job)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO jobs (job_id, user_id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id, user_id) DO UPDATE SET record = ?3",
            params![job.job_id, job.user_id, record],
        )
        .map_err(storage_err)?;
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
        let key = format!("jobs/{job_id}/{user_id}");
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(storage_err)?;

        let record: Option<String> = tx
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let record = record.ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let mut job = decode_job(&key, &record)?;

        let fired = apply::status_if(&mut job, expected, next, error_message);
        if fired {
            let updated = encode_job(&key, &job)?;
            tx.execute(
                "UPDATE jobs SET record = ?3 WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id, updated],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(fired)
    }

    async fn record_chunking(
        &self,
        job_id: &str,
        user_id: &str,
        record: &ChunkingRecord,
    ) -> Result<(), StorageError> {
        let key = format!("jobs/{job_id}/{user_id}");
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(storage_err)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let stored = stored.ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let mut job = decode_job(&key, &stored)?;

        apply::chunking(&mut job, record);
        let updated = encode_job(&key, &job)?;
        tx.execute(
            "UPDATE jobs SET record = ?3 WHERE job_id = ?1 AND user_id = ?2",
            params![job_id, user_id, updated],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
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
        let key = format!("jobs/{job_id}/{user_id}");
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(storage_err)?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO chunk_completions (job_id, user_id, chunk_index)
                 VALUES (?1, ?2, ?3)",
                params![job_id, user_id, chunk_index],
            )
            .map_err(storage_err)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let stored = stored.ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let mut job = decode_job(&key, &stored)?;

        let outcome = if inserted == 0 {
            // Already accounted by an earlier attempt; report, don't mutate.
            CompletionOutcome {
                applied: false,
                translated_chunks: job.translated_chunks,
                total_chunks: job.total_chunks,
                job_completed: job.status == JobStatus::TranslationCompleted,
            }
        } else {
            let outcome = apply::completion(&mut job, tokens, cost);
            let updated = encode_job(&key, &job)?;
            tx.execute(
                "UPDATE jobs SET record = ?3 WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, user_id, updated],
            )
            .map_err(storage_err)?;
            outcome
        };

        tx.commit().map_err(storage_err)?;
        Ok(outcome)
    }
}

#[async_trait]
impl RateStateStore for SqliteStore {
    async fn load(
        &self,
        api_id: &str,
        bucket: &str,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT payload, version FROM rate_state WHERE api_id = ?1 AND bucket = ?2",
            params![api_id, bucket],
            |row| {
                let payload: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                Ok(VersionedRecord {
                    payload,
                    version: u64::try_from(version).unwrap_or(0),
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    async fn store(
        &self,
        api_id: &str,
        bucket: &str,
        payload: &str,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError> {
        let conn = self.lock();
        let changed = match expected_version {
            None => conn
                .execute(
                    "INSERT OR IGNORE INTO rate_state (api_id, bucket, payload, version)
                     VALUES (?1, ?2, ?3, 1)",
                    params![api_id, bucket, payload],
                )
                .map_err(storage_err)?,
            Some(expected) => {
                let expected = i64::try_from(expected).unwrap_or(i64::MAX);
                conn.execute(
                    "UPDATE rate_state SET payload = ?3, version = version + 1
                     WHERE api_id = ?1 AND bucket = ?2 AND version = ?4",
                    params![api_id, bucket, payload, expected],
                )
                .map_err(storage_err)?
            }
        };
        Ok(changed > 0)
    }

    async fn clear(&self, api_id: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM rate_state WHERE api_id = ?1", params![api_id])
            .map_err(storage_err)?;
        Ok(())
    }
}
