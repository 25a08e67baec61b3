//! doctrans: a document translation pipeline.
//!
//! Ingests a long-form text document, splits it into overlapping
//! context-bearing chunks, translates each chunk through a remote LLM
//! endpoint under strict third-party rate limits, and persists
//! translated chunks with durable per-chunk progress tracking.
//!
//! # Architecture
//!
//! ```text
//! source text → Chunker → chunk objects + job record (CHUNKED)
//!                  │
//!            Dispatcher → N translation workers (semaphore-bounded)
//!                  │
//!            Rate limiter ◄── consulted before every endpoint call
//!                  │
//!            Translation worker → translated objects + progress++
//! ```
//!
//! Every stage is independently restartable: the stores are the sole
//! source of truth, progress advancement is at-most-once per chunk,
//! and translated-object writes are idempotent at their key.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use doctrans::chunking::DocumentChunker;
//! use doctrans::config::PipelineConfig;
//! use doctrans::dispatcher::Dispatcher;
//! use doctrans::limiter::RateLimiter;
//! use doctrans::storage::memory::{MemoryJobStore, MemoryObjectStore, MemoryRateStateStore};
//! use doctrans::translate::{GeminiBackend, TranslationClient};
//! use doctrans::worker::TranslationWorker;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env();
//! let jobs = Arc::new(MemoryJobStore::new());
//! let objects = Arc::new(MemoryObjectStore::new());
//! let limiter = Arc::new(RateLimiter::new(
//!     Arc::new(MemoryRateStateStore::new()),
//!     config.limiter.clone(),
//! )?);
//! let backend = Arc::new(GeminiBackend::new("api-key", &config.client));
//! let client = Arc::new(TranslationClient::new(backend, config.client.clone()));
//! let worker = Arc::new(TranslationWorker::new(
//!     jobs.clone(),
//!     objects.clone(),
//!     limiter,
//!     client,
//!     config.worker.clone(),
//! ));
//! let dispatcher = Dispatcher::new(
//!     jobs,
//!     objects,
//!     worker,
//!     DocumentChunker::new(config.chunker.clone()),
//!     config.dispatch.clone(),
//! );
//! let summary = dispatcher.start_translation("job-1", "user-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod limiter;
pub mod storage;
pub mod translate;
pub mod worker;

// Re-export key types
pub use chunking::{Chunk, ChunkMetadata, DocumentChunker};
pub use config::PipelineConfig;
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{
    ChunkError, CommandError, DispatchError, LimiterError, StorageError, TranslateError,
    WorkerError,
};
pub use job::{Job, JobStatus, Tone};
pub use limiter::{Decision, Grant, RateLimiter, RateUsage};
pub use translate::{
    TargetLanguage, TranslateOptions, TranslationClient, TranslationContext, TranslationOutcome,
};
pub use worker::{TranslationWorker, WorkerReport, WorkerRequest};
