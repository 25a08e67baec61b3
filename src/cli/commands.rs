//! CLI command implementations.
//!
//! Contains the business logic for each CLI command.

// Allow certain patterns that improve readability in CLI output formatting
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::format_push_string)]

use std::collections::HashMap;
use std::io::{self, BufRead, Write as IoWrite};
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::chunking::DocumentChunker;
use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::{CommandError, Result};
use crate::job::{Job, Tone};
use crate::limiter::RateLimiter;
use crate::storage::sqlite::SqliteStore;
use crate::storage::{JobStore, ObjectStore, RateStateStore, keys};
use crate::translate::{GeminiBackend, TargetLanguage, TranslationClient};
use crate::worker::TranslationWorker;

use super::parser::{Cli, Commands};

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns [`CommandError`] for any command failure; the binary maps
/// it to a nonzero exit code.
pub async fn execute(cli: Cli) -> Result<()> {
    let db_path = cli.get_db_path();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Init => init(&db_path),
        Commands::Chunk {
            input,
            user,
            target,
            tone,
            job,
            file_id,
        } => {
            let store = open_store(&db_path)?;
            chunk(
                &store,
                &config,
                ChunkParams {
                    input: &input,
                    user: &user,
                    target: &target,
                    tone: &tone,
                    job_id: job,
                    file_id,
                },
            )
            .await
        }
        Commands::Translate {
            job,
            user,
            concurrency,
        } => {
            let store = open_store(&db_path)?;
            let mut config = config;
            if let Some(n) = concurrency {
                config.dispatch.max_concurrency = n;
            }
            translate(&store, &config, &job, &user).await
        }
        Commands::Status { job, user } => {
            let store = open_store(&db_path)?;
            status(&store, &job, &user).await
        }
        Commands::Usage => {
            let store = open_store(&db_path)?;
            usage(&store, &config).await
        }
        Commands::ResetLimits { yes } => {
            let store = open_store(&db_path)?;
            reset_limits(&store, &config, yes).await
        }
    }
}

/// Parameters for the chunk command.
struct ChunkParams<'a> {
    input: &'a Path,
    user: &'a str,
    target: &'a str,
    tone: &'a str,
    job_id: Option<String>,
    file_id: Option<String>,
}

fn init(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let _store = SqliteStore::open(db_path)?;
    let mut out = io::stdout();
    writeln!(out, "Initialized state database at {}", db_path.display())?;
    Ok(())
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStore::open(db_path)?)
}

/// Builds the shared pipeline services over one store.
fn build_dispatcher(store: &SqliteStore, config: &PipelineConfig, api_key: String) -> Result<Dispatcher> {
    let jobs: Arc<dyn JobStore> = Arc::new(store.clone());
    let objects: Arc<dyn ObjectStore> = Arc::new(store.clone());
    let rate_store: Arc<dyn RateStateStore> = Arc::new(store.clone());

    let limiter = Arc::new(RateLimiter::new(rate_store, config.limiter.clone())?);
    let backend = Arc::new(GeminiBackend::new(api_key, &config.client));
    let client = Arc::new(TranslationClient::new(backend, config.client.clone()));
    let worker = Arc::new(TranslationWorker::new(
        Arc::clone(&jobs),
        Arc::clone(&objects),
        limiter,
        client,
        config.worker.clone(),
    ));
    Ok(Dispatcher::new(
        jobs,
        objects,
        worker,
        DocumentChunker::new(config.chunker.clone()),
        config.dispatch.clone(),
    ))
}

async fn chunk(
    store: &SqliteStore,
    config: &PipelineConfig,
    params: ChunkParams<'_>,
) -> Result<()> {
    // Validate inputs before touching storage.
    let _language = TargetLanguage::parse(params.target)?;
    let tone: Tone = params
        .tone
        .parse()
        .map_err(CommandError::InvalidInput)?;

    let text = std::fs::read_to_string(params.input)?;
    let job_id = params
        .job_id
        .unwrap_or_else(|| format!("job-{}", short_id()));
    let file_id = params.file_id.unwrap_or_else(short_id);
    let filename = params
        .input
        .file_name()
        .map_or_else(|| "document.txt".to_string(), |n| n.to_string_lossy().into_owned());

    let source_key = keys::source(params.user, &file_id, &filename);
    let mut job = Job::new(&job_id, params.user, params.target, tone);
    job.source_key = Some(source_key.clone());
    JobStore::put(store, &job).await?;

    let mut metadata = HashMap::new();
    metadata.insert("userid".to_string(), params.user.to_string());
    metadata.insert("jobid".to_string(), job_id.clone());
    metadata.insert("fileid".to_string(), file_id);
    ObjectStore::put(store, &source_key, text.into_bytes(), metadata).await?;

    // The chunking path never calls the endpoint; no API key needed.
    let dispatcher = build_dispatcher(store, config, String::new())?;
    let chunk_metadata = dispatcher
        .run_chunking(&job_id, params.user, &source_key)
        .await?;

    let mut out = io::stdout();
    writeln!(out, "Job {} chunked.", job_id)?;
    writeln!(out, "  chunks:          {}", chunk_metadata.total_chunks)?;
    writeln!(
        out,
        "  source tokens:   {}",
        chunk_metadata.original_token_count
    )?;
    writeln!(
        out,
        "  avg chunk size:  {} tokens",
        chunk_metadata.average_chunk_size
    )?;
    writeln!(
        out,
        "  chunking time:   {} ms",
        chunk_metadata.processing_time_ms
    )?;
    writeln!(
        out,
        "Next: doctrans translate --job {} --user {}",
        job_id, params.user
    )?;
    Ok(())
}

async fn translate(
    store: &SqliteStore,
    config: &PipelineConfig,
    job_id: &str,
    user_id: &str,
) -> Result<()> {
    let api_key = config.client.api_key.clone().ok_or_else(|| {
        CommandError::Configuration(
            "no API key configured; set GEMINI_API_KEY or DOCTRANS_API_KEY".to_string(),
        )
    })?;

    let dispatcher = build_dispatcher(store, config, api_key)?;
    let summary = dispatcher.start_translation(job_id, user_id).await?;
    print_summary(&summary)?;
    Ok(())
}

fn print_summary(summary: &DispatchSummary) -> Result<()> {
    let mut out = io::stdout();
    writeln!(
        out,
        "Job {}: {}/{} chunks translated ({} failed).",
        summary.job_id, summary.succeeded, summary.total_chunks, summary.failed
    )?;
    if let Some(status) = summary.final_status {
        writeln!(out, "  status: {}", status)?;
    }
    for report in summary.reports.iter().filter(|r| !r.success) {
        writeln!(
            out,
            "  chunk {}: {} (retryable: {})",
            report.chunk_index,
            report.error.as_deref().unwrap_or("unknown error"),
            report
                .retryable
                .map_or_else(|| "unknown".to_string(), |r| r.to_string()),
        )?;
    }
    Ok(())
}

async fn status(store: &SqliteStore, job_id: &str, user_id: &str) -> Result<()> {
    let job = JobStore::get(store, job_id, user_id)
        .await?
        .ok_or_else(|| CommandError::InvalidInput(format!("job {job_id} not found")))?;

    let mut out = io::stdout();
    writeln!(out, "Job {}", job.job_id)?;
    writeln!(out, "  user:            {}", job.user_id)?;
    writeln!(out, "  status:          {}", job.status)?;
    writeln!(out, "  target language: {}", job.target_language)?;
    writeln!(
        out,
        "  progress:        {}/{} chunks",
        job.translated_chunks, job.total_chunks
    )?;
    writeln!(out, "  tokens used:     {}", job.tokens_used)?;
    writeln!(out, "  estimated cost:  ${:.6}", job.estimated_cost)?;
    if let Some(started) = job.translation_started_at {
        writeln!(out, "  started:         {}", started.to_rfc3339())?;
    }
    if let Some(completed) = job.translation_completed_at {
        writeln!(out, "  completed:       {}", completed.to_rfc3339())?;
    }
    if let Some(message) = &job.error_message {
        writeln!(out, "  error:           {}", message)?;
    }
    Ok(())
}

async fn usage(store: &SqliteStore, config: &PipelineConfig) -> Result<()> {
    let rate_store: Arc<dyn RateStateStore> = Arc::new(store.clone());
    let limiter = RateLimiter::new(rate_store, config.limiter.clone())?;
    let usage = limiter.usage().await?;

    let mut out = io::stdout();
    writeln!(out, "Rate limiter usage ({}):", config.limiter.api_id)?;
    writeln!(
        out,
        "  requests/minute: {}/{}",
        usage.rpm_used, usage.rpm_limit
    )?;
    writeln!(
        out,
        "  tokens/minute:   {}/{}",
        usage.tpm_used, usage.tpm_limit
    )?;
    writeln!(out, "  requests/day:    {}/{}", usage.rpd_used, usage.rpd_limit)?;
    Ok(())
}

async fn reset_limits(store: &SqliteStore, config: &PipelineConfig, yes: bool) -> Result<()> {
    if !yes && !confirm("Clear all rate-limiter state? [y/N] ")? {
        let mut out = io::stdout();
        writeln!(out, "Aborted.")?;
        return Ok(());
    }
    let rate_store: Arc<dyn RateStateStore> = Arc::new(store.clone());
    let limiter = RateLimiter::new(rate_store, config.limiter.clone())?;
    limiter.reset().await?;
    let mut out = io::stdout();
    writeln!(out, "Rate-limiter state cleared.")?;
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut out = io::stdout();
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[tokio::test]
    async fn test_chunk_then_status_against_sqlite() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let db_path = dir.path().join("state.db");
        let store = open_store(&db_path).unwrap_or_else(|e| unreachable!("{e}"));

        let input = dir.path().join("doc.txt");
        std::fs::write(
            &input,
            "First sentence of the document. Second sentence here. A third one closes it.",
        )
        .unwrap_or_else(|e| unreachable!("{e}"));

        let config = PipelineConfig::default();
        chunk(
            &store,
            &config,
            ChunkParams {
                input: &input,
                user: "alice",
                target: "es",
                tone: "neutral",
                job_id: Some("job-t1".to_string()),
                file_id: Some("file-t1".to_string()),
            },
        )
        .await
        .unwrap_or_else(|e| unreachable!("{e}"));

        let job = JobStore::get(&store, "job-t1", "alice")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(job.status, crate::job::JobStatus::Chunked);
        assert!(job.total_chunks >= 1);

        status(&store, "job-t1", "alice")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
    }

    #[tokio::test]
    async fn test_chunk_rejects_bad_language() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let db_path = dir.path().join("state.db");
        let store = open_store(&db_path).unwrap_or_else(|e| unreachable!("{e}"));
        let input = dir.path().join("doc.txt");
        std::fs::write(&input, "Some text.").unwrap_or_else(|e| unreachable!("{e}"));

        let result = chunk(
            &store,
            &PipelineConfig::default(),
            ChunkParams {
                input: &input,
                user: "alice",
                target: "xx",
                tone: "neutral",
                job_id: None,
                file_id: None,
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_translate_requires_api_key() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let db_path = dir.path().join("state.db");
        let store = open_store(&db_path).unwrap_or_else(|e| unreachable!("{e}"));

        let config = PipelineConfig::default(); // no api key set
        let result = translate(&store, &config, "job-1", "alice").await;
        assert!(matches!(result, Err(CommandError::Configuration(_))));
    }
}
