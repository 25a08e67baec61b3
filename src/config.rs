//! Pipeline configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.
//!
//! Each pipeline stage owns a small config struct; [`PipelineConfig`]
//! aggregates them for callers that run the whole pipeline (the CLI, the
//! end-to-end tests). Library users may construct the per-stage structs
//! directly.

use std::time::Duration;

/// Default maximum tokens of primary content per chunk.
pub const DEFAULT_PRIMARY_CHUNK_SIZE: usize = 3500;
/// Default maximum tokens per context excerpt.
pub const DEFAULT_CONTEXT_SIZE: usize = 250;
/// Default requests-per-minute quota.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 5;
/// Default tokens-per-minute quota.
pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 250_000;
/// Default requests-per-day quota.
pub const DEFAULT_REQUESTS_PER_DAY: u32 = 25;
/// Default timezone governing the daily-quota reset.
pub const DEFAULT_DAILY_RESET_TIMEZONE: &str = "America/Los_Angeles";
/// Default translation model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
/// Default retry budget for the translation client.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default initial retry delay in milliseconds.
pub const DEFAULT_INITIAL_RETRY_DELAY_MS: u64 = 1000;
/// Default price per million input tokens, in USD.
pub const DEFAULT_PRICE_PER_MILLION_INPUT_TOKENS: f64 = 0.075;
/// Default per-worker wall-clock budget in seconds.
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;
/// Default token overhead added for the prompt scaffolding.
pub const DEFAULT_PROMPT_OVERHEAD_TOKENS: usize = 200;
/// Default worker fan-out concurrency. Kept below the RPM quota so
/// workers spend their time translating rather than waiting on denials.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default per-chunk quota-retry attempts in the dispatcher's outer loop.
pub const DEFAULT_MAX_QUOTA_RETRIES: u32 = 5;
/// Default compare-and-set attempt budget for limiter state updates.
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 8;

/// Configuration for the document chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum tokens of primary content per chunk.
    pub primary_chunk_size: usize,
    /// Maximum tokens per context excerpt (`previousSummary` / `nextPreview`).
    pub context_size: usize,
    /// Optional minimum tokens per chunk. When set, every chunk except
    /// the last must meet it; leave `None` when inputs may contain
    /// oversized sentences that force small flush chunks.
    pub min_chunk_size: Option<usize>,
    /// Sentence terminator characters. Full-width counterparts of these
    /// are recognized automatically by the segmenter.
    pub sentence_terminators: Vec<char>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            primary_chunk_size: DEFAULT_PRIMARY_CHUNK_SIZE,
            context_size: DEFAULT_CONTEXT_SIZE,
            min_chunk_size: None,
            sentence_terminators: vec!['.', '!', '?'],
        }
    }
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Identifier of the remote API the buckets guard. Keys the
    /// persisted bucket records.
    pub api_id: String,
    /// Requests-per-minute capacity.
    pub requests_per_minute: u32,
    /// Tokens-per-minute capacity.
    pub tokens_per_minute: u64,
    /// Requests-per-day capacity.
    pub requests_per_day: u32,
    /// IANA timezone name for the daily reset boundary.
    pub daily_reset_timezone: String,
    /// Attempt budget for the conditional-update loop.
    pub max_cas_attempts: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_id: "gemini".to_string(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute: DEFAULT_TOKENS_PER_MINUTE,
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
            daily_reset_timezone: DEFAULT_DAILY_RESET_TIMEZONE.to_string(),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}

/// Configuration for the translation client and its HTTP backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Model identifier sent to the endpoint.
    pub model: String,
    /// API key for the endpoint. Required to construct the HTTP backend;
    /// mock backends ignore it.
    pub api_key: Option<String>,
    /// Optional base URL override (proxies, test servers).
    pub base_url: Option<String>,
    /// Maximum retry attempts after the first call.
    pub max_retries: u32,
    /// Initial backoff delay; doubles per retry with ±25% jitter.
    pub initial_retry_delay: Duration,
    /// Price per million input tokens, in USD.
    pub price_per_million_input_tokens: f64,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_retry_delay: Duration::from_millis(DEFAULT_INITIAL_RETRY_DELAY_MS),
            price_per_million_input_tokens: DEFAULT_PRICE_PER_MILLION_INPUT_TOKENS,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Configuration for a translation worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wall-clock budget for processing one chunk end to end.
    pub timeout: Duration,
    /// Token overhead added to the content + context estimate for the
    /// prompt scaffolding.
    pub prompt_overhead_tokens: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            prompt_overhead_tokens: DEFAULT_PROMPT_OVERHEAD_TOKENS,
        }
    }
}

/// Configuration for the dispatcher's fan-out.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum concurrently running workers.
    pub max_concurrency: usize,
    /// Per-chunk attempts in the outer quota-retry loop.
    pub max_quota_retries: u32,
    /// Longest advisory wait the dispatcher will honor before giving a
    /// chunk back as retryable. Daily-quota denials routinely exceed
    /// this; the chunk is then surfaced instead of slept on.
    pub max_retry_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_quota_retries: DEFAULT_MAX_QUOTA_RETRIES,
            max_retry_wait: Duration::from_secs(120),
        }
    }
}

/// Aggregated configuration for the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Chunker settings.
    pub chunker: ChunkerConfig,
    /// Rate limiter settings.
    pub limiter: RateLimitConfig,
    /// Translation client settings.
    pub client: ClientConfig,
    /// Worker settings.
    pub worker: WorkerConfig,
    /// Dispatcher settings.
    pub dispatch: DispatchConfig,
}

impl PipelineConfig {
    /// Creates a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    requests_per_minute: Option<u32>,
    tokens_per_minute: Option<u64>,
    requests_per_day: Option<u32>,
    daily_reset_timezone: Option<String>,
    primary_chunk_size: Option<usize>,
    context_size: Option<usize>,
    min_chunk_size: Option<usize>,
    max_concurrency: Option<usize>,
    max_retries: Option<u32>,
    initial_retry_delay: Option<Duration>,
    price_per_million_input_tokens: Option<f64>,
    worker_timeout: Option<Duration>,
}

impl PipelineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("DOCTRANS_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("DOCTRANS_BASE_URL").ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("DOCTRANS_MODEL").ok();
        }
        if self.requests_per_minute.is_none() {
            self.requests_per_minute = std::env::var("DOCTRANS_RPM")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.tokens_per_minute.is_none() {
            self.tokens_per_minute = std::env::var("DOCTRANS_TPM")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.requests_per_day.is_none() {
            self.requests_per_day = std::env::var("DOCTRANS_RPD")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.daily_reset_timezone.is_none() {
            self.daily_reset_timezone = std::env::var("DOCTRANS_RESET_TZ").ok();
        }
        if self.max_concurrency.is_none() {
            self.max_concurrency = std::env::var("DOCTRANS_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        self
    }

    /// Sets the endpoint API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the endpoint base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the translation model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the requests-per-minute quota.
    #[must_use]
    pub const fn requests_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = Some(n);
        self
    }

    /// Sets the tokens-per-minute quota.
    #[must_use]
    pub const fn tokens_per_minute(mut self, n: u64) -> Self {
        self.tokens_per_minute = Some(n);
        self
    }

    /// Sets the requests-per-day quota.
    #[must_use]
    pub const fn requests_per_day(mut self, n: u32) -> Self {
        self.requests_per_day = Some(n);
        self
    }

    /// Sets the timezone governing the daily reset.
    #[must_use]
    pub fn daily_reset_timezone(mut self, tz: impl Into<String>) -> Self {
        self.daily_reset_timezone = Some(tz.into());
        self
    }

    /// Sets the maximum tokens of primary content per chunk.
    #[must_use]
    pub const fn primary_chunk_size(mut self, n: usize) -> Self {
        self.primary_chunk_size = Some(n);
        self
    }

    /// Sets the maximum tokens per context excerpt.
    #[must_use]
    pub const fn context_size(mut self, n: usize) -> Self {
        self.context_size = Some(n);
        self
    }

    /// Sets the minimum tokens per chunk.
    #[must_use]
    pub const fn min_chunk_size(mut self, n: usize) -> Self {
        self.min_chunk_size = Some(n);
        self
    }

    /// Sets the worker fan-out concurrency.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Sets the translation client retry budget.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the initial retry delay.
    #[must_use]
    pub const fn initial_retry_delay(mut self, d: Duration) -> Self {
        self.initial_retry_delay = Some(d);
        self
    }

    /// Sets the price per million input tokens.
    #[must_use]
    pub const fn price_per_million_input_tokens(mut self, p: f64) -> Self {
        self.price_per_million_input_tokens = Some(p);
        self
    }

    /// Sets the per-worker wall-clock budget.
    #[must_use]
    pub const fn worker_timeout(mut self, d: Duration) -> Self {
        self.worker_timeout = Some(d);
        self
    }

    /// Builds the [`PipelineConfig`].
    #[must_use]
    pub fn build(self) -> PipelineConfig {
        let chunker_defaults = ChunkerConfig::default();
        let limiter_defaults = RateLimitConfig::default();
        let client_defaults = ClientConfig::default();
        let worker_defaults = WorkerConfig::default();
        let dispatch_defaults = DispatchConfig::default();

        PipelineConfig {
            chunker: ChunkerConfig {
                primary_chunk_size: self
                    .primary_chunk_size
                    .unwrap_or(chunker_defaults.primary_chunk_size),
                context_size: self.context_size.unwrap_or(chunker_defaults.context_size),
                min_chunk_size: self.min_chunk_size.or(chunker_defaults.min_chunk_size),
                sentence_terminators: chunker_defaults.sentence_terminators,
            },
            limiter: RateLimitConfig {
                api_id: limiter_defaults.api_id,
                requests_per_minute: self
                    .requests_per_minute
                    .unwrap_or(limiter_defaults.requests_per_minute),
                tokens_per_minute: self
                    .tokens_per_minute
                    .unwrap_or(limiter_defaults.tokens_per_minute),
                requests_per_day: self
                    .requests_per_day
                    .unwrap_or(limiter_defaults.requests_per_day),
                daily_reset_timezone: self
                    .daily_reset_timezone
                    .unwrap_or(limiter_defaults.daily_reset_timezone),
                max_cas_attempts: limiter_defaults.max_cas_attempts,
            },
            client: ClientConfig {
                model: self.model.unwrap_or(client_defaults.model),
                api_key: self.api_key.or(client_defaults.api_key),
                base_url: self.base_url.or(client_defaults.base_url),
                max_retries: self.max_retries.unwrap_or(client_defaults.max_retries),
                initial_retry_delay: self
                    .initial_retry_delay
                    .unwrap_or(client_defaults.initial_retry_delay),
                price_per_million_input_tokens: self
                    .price_per_million_input_tokens
                    .unwrap_or(client_defaults.price_per_million_input_tokens),
                request_timeout: client_defaults.request_timeout,
            },
            worker: WorkerConfig {
                timeout: self.worker_timeout.unwrap_or(worker_defaults.timeout),
                prompt_overhead_tokens: worker_defaults.prompt_overhead_tokens,
            },
            dispatch: DispatchConfig {
                max_concurrency: self
                    .max_concurrency
                    .unwrap_or(dispatch_defaults.max_concurrency),
                max_quota_retries: dispatch_defaults.max_quota_retries,
                max_retry_wait: dispatch_defaults.max_retry_wait,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunker.primary_chunk_size, 3500);
        assert_eq!(config.chunker.context_size, 250);
        assert!(config.chunker.min_chunk_size.is_none());
        assert_eq!(config.limiter.requests_per_minute, 5);
        assert_eq!(config.limiter.tokens_per_minute, 250_000);
        assert_eq!(config.limiter.requests_per_day, 25);
        assert_eq!(config.limiter.daily_reset_timezone, "America/Los_Angeles");
        assert_eq!(config.client.model, "gemini-1.5-flash");
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.client.initial_retry_delay, Duration::from_millis(1000));
        assert!((config.client.price_per_million_input_tokens - 0.075).abs() < f64::EPSILON);
        assert_eq!(config.worker.timeout, Duration::from_secs(300));
        assert_eq!(config.worker.prompt_overhead_tokens, 200);
        assert_eq!(config.dispatch.max_concurrency, 4);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = PipelineConfig::builder()
            .api_key("test-key")
            .model("gemini-1.5-pro")
            .requests_per_minute(10)
            .tokens_per_minute(500_000)
            .requests_per_day(100)
            .primary_chunk_size(2000)
            .context_size(100)
            .max_concurrency(8)
            .build();
        assert_eq!(config.client.api_key.as_deref(), Some("test-key"));
        assert_eq!(config.client.model, "gemini-1.5-pro");
        assert_eq!(config.limiter.requests_per_minute, 10);
        assert_eq!(config.limiter.tokens_per_minute, 500_000);
        assert_eq!(config.limiter.requests_per_day, 100);
        assert_eq!(config.chunker.primary_chunk_size, 2000);
        assert_eq!(config.chunker.context_size, 100);
        assert_eq!(config.dispatch.max_concurrency, 8);
    }

    #[test]
    fn test_concurrency_default_below_rpm() {
        let config = PipelineConfig::default();
        assert!(config.dispatch.max_concurrency <= config.limiter.requests_per_minute as usize);
    }
}
