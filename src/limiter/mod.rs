//! Distributed rate limiter.
//!
//! Enforces three simultaneous quotas against one remote API:
//! requests-per-minute and tokens-per-minute as continuous-refill
//! token buckets, requests-per-day as a calendar counter resetting at
//! local midnight in a configured timezone. Bucket state lives in a
//! versioned key-value store; concurrent workers coordinate through
//! compare-and-set writes with bounded, jittered retry.
//!
//! There is no background refill task: every acquire recomputes refill
//! from elapsed time. No fairness is promised between racing workers;
//! the dispatcher keeps its fan-out narrow enough that starvation is
//! not catastrophic.

pub mod bucket;
pub mod day;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{LimiterError, StorageError};
use crate::storage::RateStateStore;
use bucket::{DayBucket, RefillBucket};

/// The three quota buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    /// Requests per minute.
    Rpm,
    /// Tokens per minute.
    Tpm,
    /// Requests per day.
    Rpd,
}

impl BucketKind {
    /// Store key component for this bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Tpm => "tpm",
            Self::Rpd => "rpd",
        }
    }
}

impl std::fmt::Display for BucketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Usage snapshot across the three buckets. Observability only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateUsage {
    /// Requests consumed from the current minute window.
    pub rpm_used: u32,
    /// The requests-per-minute quota.
    pub rpm_limit: u32,
    /// Tokens consumed from the current minute window.
    pub tpm_used: u64,
    /// The tokens-per-minute quota.
    pub tpm_limit: u64,
    /// Requests counted against the current day.
    pub rpd_used: u32,
    /// The requests-per-day quota.
    pub rpd_limit: u32,
}

/// A successful quota reservation.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    /// Tokens reserved from the TPM bucket; pass back to
    /// [`RateLimiter::consume`] for reconciliation.
    pub reserved_tokens: u64,
    /// Usage after the reservation.
    pub usage: RateUsage,
}

/// Outcome of an acquire attempt.
#[derive(Debug, Clone)]
pub enum Decision {
    /// All three buckets admitted the request.
    Granted(Grant),
    /// At least one bucket blocked the request. Nothing was consumed.
    Denied {
        /// Wait that clears every blocking bucket. For a daily-quota
        /// denial this runs to the next day boundary.
        retry_after: Duration,
        /// The buckets that blocked.
        blocked: Vec<BucketKind>,
        /// Usage at decision time.
        usage: RateUsage,
    },
}

impl Decision {
    /// Whether the acquire was granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Loaded bucket state paired with its store version (`None` when the
/// record does not exist yet).
struct Loaded<T> {
    state: T,
    version: Option<u64>,
}

/// Multi-bucket rate limiter over a versioned state store.
///
/// Constructed once per process and shared via `Arc`; all state that
/// must survive a restart lives in the store.
pub struct RateLimiter {
    store: Arc<dyn RateStateStore>,
    config: RateLimitConfig,
    tz: Tz,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter over `store` with the given quotas.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::UnknownTimezone`] when the configured
    /// reset timezone does not parse.
    pub fn new(
        store: Arc<dyn RateStateStore>,
        config: RateLimitConfig,
    ) -> Result<Self, LimiterError> {
        let tz: Tz =
            config
                .daily_reset_timezone
                .parse()
                .map_err(|_| LimiterError::UnknownTimezone {
                    name: config.daily_reset_timezone.clone(),
                })?;
        Ok(Self { store, config, tz })
    }

    /// Attempts to reserve one request slot and `estimated_tokens`
    /// from the minute window, plus one daily request.
    ///
    /// On grant all three buckets are decremented; on denial nothing
    /// is consumed and the decision carries the wait that clears every
    /// blocking bucket.
    ///
    /// # Errors
    ///
    /// [`LimiterError::StateUnavailable`] when bucket state cannot be
    /// read or written (the request is *not* permitted in that case);
    /// [`LimiterError::Contention`] when the conditional-update budget
    /// is exhausted.
    pub async fn acquire(&self, estimated_tokens: u64) -> Result<Decision, LimiterError> {
        self.acquire_at(estimated_tokens, Utc::now()).await
    }

    /// [`Self::acquire`] with an explicit clock, the deterministic
    /// entry point used by tests.
    pub async fn acquire_at(
        &self,
        estimated_tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimiterError> {
        for attempt in 0..self.config.max_cas_attempts {
            let rpm = self.load_rpm(now).await?;
            let tpm = self.load_tpm(now).await?;
            let rpd = self.load_rpd(now).await?;

            let mut rpm_state = rpm.state.refilled(now);
            let mut tpm_state = tpm.state.refilled(now);
            let mut rpd_state = rpd.state.rolled(now, self.tz);

            // Decide against the refreshed states before touching any
            // of them.
            let mut blocked = Vec::new();
            let mut retry_after = Duration::ZERO;
            #[allow(clippy::cast_precision_loss)]
            let token_amount = estimated_tokens as f64;

            if rpm_state.wait_for(1.0) > Duration::ZERO {
                retry_after = retry_after.max(rpm_state.wait_for(1.0));
                blocked.push(BucketKind::Rpm);
            }
            if tpm_state.wait_for(token_amount) > Duration::ZERO {
                retry_after = retry_after.max(tpm_state.wait_for(token_amount));
                blocked.push(BucketKind::Tpm);
            }
            if rpd_state.count_for_day >= rpd_state.capacity {
                retry_after = retry_after.max(rpd_state.wait_until_reset(now));
                blocked.push(BucketKind::Rpd);
            }

            if !blocked.is_empty() {
                let usage = usage_of(&rpm_state, &tpm_state, &rpd_state);
                debug!(?blocked, ?retry_after, "quota acquire denied");
                return Ok(Decision::Denied {
                    retry_after,
                    blocked,
                    usage,
                });
            }

            // All buckets admit: decrement and write back under CAS.
            let _ = rpm_state.try_acquire(1.0);
            let _ = tpm_state.try_acquire(token_amount);
            let _ = rpd_state.try_acquire();

            if !self
                .write_bucket(BucketKind::Rpm, &rpm_state, rpm.version)
                .await?
            {
                self.backoff(attempt).await;
                continue;
            }
            if !self
                .write_bucket(BucketKind::Tpm, &tpm_state, tpm.version)
                .await?
            {
                // A concurrent acquire moved TPM under us; hand back the
                // request slot before retrying. Failure here only
                // over-throttles, never over-admits.
                self.release_rpm(1.0).await;
                self.backoff(attempt).await;
                continue;
            }
            if !self
                .write_bucket(BucketKind::Rpd, &rpd_state, rpd.version)
                .await?
            {
                self.release_rpm(1.0).await;
                self.release_tpm(token_amount).await;
                self.backoff(attempt).await;
                continue;
            }

            let usage = usage_of(&rpm_state, &tpm_state, &rpd_state);
            debug!(estimated_tokens, ?usage, "quota acquired");
            return Ok(Decision::Granted(Grant {
                reserved_tokens: estimated_tokens,
                usage,
            }));
        }

        Err(LimiterError::Contention {
            attempts: self.config.max_cas_attempts,
        })
    }

    /// Reconciles a grant's TPM reservation against the actual token
    /// count reported by the endpoint.
    ///
    /// Under-use is returned to the bucket; over-use is additionally
    /// deducted (floored at zero). Best-effort: reconciliation
    /// conflicts are retried within the usual budget and then dropped
    /// with a warning, since the reservation itself already bounded
    /// the burst.
    pub async fn consume(&self, grant: &Grant, actual_tokens: u64) {
        self.consume_at(grant, actual_tokens, Utc::now()).await;
    }

    /// [`Self::consume`] with an explicit clock.
    pub async fn consume_at(&self, grant: &Grant, actual_tokens: u64, now: DateTime<Utc>) {
        if actual_tokens == grant.reserved_tokens {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let delta = actual_tokens as f64 - grant.reserved_tokens as f64;

        for attempt in 0..self.config.max_cas_attempts {
            let Ok(loaded) = self.load_tpm(now).await else {
                return;
            };
            let mut state = loaded.state.refilled(now);
            if delta < 0.0 {
                state.release(-delta);
            } else {
                state.available = (state.available - delta).max(0.0);
            }
            match self
                .write_bucket(BucketKind::Tpm, &state, loaded.version)
                .await
            {
                Ok(true) => return,
                Ok(false) => self.backoff(attempt).await,
                Err(_) => return,
            }
        }
        warn!("token reconciliation dropped after conditional-update contention");
    }

    /// Usage snapshot across the three buckets.
    ///
    /// # Errors
    ///
    /// [`LimiterError::StateUnavailable`] when bucket state cannot be read.
    pub async fn usage(&self) -> Result<RateUsage, LimiterError> {
        self.usage_at(Utc::now()).await
    }

    /// [`Self::usage`] with an explicit clock.
    pub async fn usage_at(&self, now: DateTime<Utc>) -> Result<RateUsage, LimiterError> {
        let rpm = self.load_rpm(now).await?.state.refilled(now);
        let tpm = self.load_tpm(now).await?.state.refilled(now);
        let rpd = self.load_rpd(now).await?.state.rolled(now, self.tz);
        Ok(usage_of(&rpm, &tpm, &rpd))
    }

    /// Clears all persisted bucket state, returning every quota to
    /// full. Test hook and operational escape hatch.
    ///
    /// # Errors
    ///
    /// [`LimiterError::StateUnavailable`] when the store is unreachable.
    pub async fn reset(&self) -> Result<(), LimiterError> {
        self.store.clear(&self.config.api_id).await?;
        Ok(())
    }

    async fn load_rpm(&self, now: DateTime<Utc>) -> Result<Loaded<RefillBucket>, LimiterError> {
        let record = self
            .store
            .load(&self.config.api_id, BucketKind::Rpm.as_str())
            .await?;
        record.map_or_else(
            || {
                Ok(Loaded {
                    state: RefillBucket::full(f64::from(self.config.requests_per_minute), now),
                    version: None,
                })
            },
            |rec| {
                Ok(Loaded {
                    state: decode(BucketKind::Rpm, &rec.payload)?,
                    version: Some(rec.version),
                })
            },
        )
    }

    async fn load_tpm(&self, now: DateTime<Utc>) -> Result<Loaded<RefillBucket>, LimiterError> {
        let record = self
            .store
            .load(&self.config.api_id, BucketKind::Tpm.as_str())
            .await?;
        record.map_or_else(
            || {
                #[allow(clippy::cast_precision_loss)]
                let capacity = self.config.tokens_per_minute as f64;
                Ok(Loaded {
                    state: RefillBucket::full(capacity, now),
                    version: None,
                })
            },
            |rec| {
                Ok(Loaded {
                    state: decode(BucketKind::Tpm, &rec.payload)?,
                    version: Some(rec.version),
                })
            },
        )
    }

    async fn load_rpd(&self, now: DateTime<Utc>) -> Result<Loaded<DayBucket>, LimiterError> {
        let record = self
            .store
            .load(&self.config.api_id, BucketKind::Rpd.as_str())
            .await?;
        record.map_or_else(
            || {
                Ok(Loaded {
                    state: DayBucket::new(self.config.requests_per_day, now, self.tz),
                    version: None,
                })
            },
            |rec| {
                Ok(Loaded {
                    state: decode(BucketKind::Rpd, &rec.payload)?,
                    version: Some(rec.version),
                })
            },
        )
    }

    async fn write_bucket<T: serde::Serialize>(
        &self,
        kind: BucketKind,
        state: &T,
        expected_version: Option<u64>,
    ) -> Result<bool, LimiterError> {
        let payload =
            serde_json::to_string(state).map_err(|e| StorageError::Corrupt {
                key: format!("{}/{}", self.config.api_id, kind.as_str()),
                message: e.to_string(),
            })?;
        let won = self
            .store
            .store(&self.config.api_id, kind.as_str(), &payload, expected_version)
            .await?;
        Ok(won)
    }

    /// Best-effort return of a request slot after a partial grant lost
    /// its CAS race.
    async fn release_rpm(&self, amount: f64) {
        for _ in 0..3 {
            let now = Utc::now();
            let Ok(loaded) = self.load_rpm(now).await else {
                return;
            };
            let mut state = loaded.state.refilled(now);
            state.release(amount);
            if matches!(
                self.write_bucket(BucketKind::Rpm, &state, loaded.version).await,
                Ok(true)
            ) {
                return;
            }
        }
    }

    /// Best-effort return of reserved tokens after a partial grant
    /// lost its CAS race.
    async fn release_tpm(&self, amount: f64) {
        for _ in 0..3 {
            let now = Utc::now();
            let Ok(loaded) = self.load_tpm(now).await else {
                return;
            };
            let mut state = loaded.state.refilled(now);
            state.release(amount);
            if matches!(
                self.write_bucket(BucketKind::Tpm, &state, loaded.version).await,
                Ok(true)
            ) {
                return;
            }
        }
    }

    /// Short jittered pause between conditional-update attempts.
    async fn backoff(&self, attempt: u32) {
        let base = 5u64 << attempt.min(6);
        let jitter = rand::rng().random_range(0..=base);
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn usage_of(rpm: &RefillBucket, tpm: &RefillBucket, rpd: &DayBucket) -> RateUsage {
    RateUsage {
        rpm_used: rpm.used().round() as u32,
        rpm_limit: rpm.capacity.round() as u32,
        tpm_used: tpm.used().round() as u64,
        tpm_limit: tpm.capacity.round() as u64,
        rpd_used: rpd.count_for_day,
        rpd_limit: rpd.capacity,
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: BucketKind,
    payload: &str,
) -> Result<T, LimiterError> {
    serde_json::from_str(payload).map_err(|e| {
        LimiterError::StateUnavailable(StorageError::Corrupt {
            key: kind.as_str().to_string(),
            message: e.to_string(),
        })
    })
}
