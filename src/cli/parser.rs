//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// doctrans: document translation pipeline.
///
/// Splits long-form text into context-bearing chunks and translates
/// them chunk-by-chunk through a rate-limited LLM endpoint, with
/// durable per-chunk progress.
#[derive(Parser, Debug)]
#[command(name = "doctrans")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the local state database.
    ///
    /// Defaults to `.doctrans/state.db` in the current directory.
    #[arg(short, long, env = "DOCTRANS_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolves the state database path.
    #[must_use]
    pub fn get_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::storage::DEFAULT_DB_PATH))
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the local state database.
    #[command(after_help = r#"Examples:
  doctrans init                         # Initialize in current directory
  doctrans --db-path ./my.db init       # Initialize with custom path
"#)]
    Init,

    /// Ingest a document: create the job, store the source, chunk it.
    #[command(after_help = r#"Examples:
  doctrans chunk book.txt --user alice --target es
  doctrans chunk report.txt --user bob --target fr --tone formal
  doctrans chunk draft.txt --user alice --target de --job job-42
"#)]
    Chunk {
        /// Path to the source document (UTF-8 text).
        input: PathBuf,

        /// Owning user id.
        #[arg(short, long)]
        user: String,

        /// Target language code (es, fr, it, de, zh).
        #[arg(short, long)]
        target: String,

        /// Output tone (formal, informal, neutral).
        #[arg(long, default_value = "neutral")]
        tone: String,

        /// Job id; generated when omitted.
        #[arg(short, long)]
        job: Option<String>,

        /// File id; generated when omitted.
        #[arg(long)]
        file_id: Option<String>,
    },

    /// Translate every chunk of a chunked job.
    #[command(after_help = r#"Examples:
  doctrans translate --job job-42 --user alice
  doctrans translate --job job-42 --user alice --concurrency 2
  GEMINI_API_KEY=... doctrans translate --job job-42 --user alice
"#)]
    Translate {
        /// Job id to translate.
        #[arg(short, long)]
        job: String,

        /// Owning user id.
        #[arg(short, long)]
        user: String,

        /// Worker fan-out concurrency (keep at or below the RPM quota).
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Show a job's status and progress.
    Status {
        /// Job id.
        #[arg(short, long)]
        job: String,

        /// Owning user id.
        #[arg(short, long)]
        user: String,
    },

    /// Show rate-limiter usage across all three buckets.
    Usage,

    /// Clear persisted rate-limiter state (all quotas return to full).
    ResetLimits {
        /// Skip confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
}
