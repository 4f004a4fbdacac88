//! Per-source token-bucket rate limiting.
//!
//! Each webhook source owns exactly one [`RateLimitBucket`]. Consumption is
//! a single atomic read-modify-write in the datastore so two concurrent
//! requests can never both observe the last token; the refill is computed
//! from elapsed time at consume time rather than by a background job.

use crate::{SourceId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Seconds a limited client should wait before retrying
pub const RETRY_AFTER_SECONDS: u64 = 60;

// ============================================================================
// Core Types
// ============================================================================

/// Token-bucket state for one webhook source.
///
/// Invariants: `tokens` never exceeds `max_tokens` and never goes negative
/// after a successful consume. `refill_rate` is expressed in tokens per
/// minute, matching the source's `rate_limit_per_min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub source_id: SourceId,
    pub tokens: f64,
    pub max_tokens: f64,
    pub refill_rate: f64,
    pub last_refill_at: Timestamp,
}

impl RateLimitBucket {
    /// Full bucket for a source allowing `per_minute` requests per minute
    pub fn full(source_id: SourceId, per_minute: u32, now: Timestamp) -> Self {
        let max = f64::from(per_minute.max(1));
        Self {
            source_id,
            tokens: max,
            max_tokens: max,
            refill_rate: max,
            last_refill_at: now,
        }
    }

    /// Add tokens proportional to elapsed time, capped at `max_tokens`.
    ///
    /// The refill watermark only moves forward: a clock that jumps backwards
    /// refills nothing and leaves `last_refill_at` untouched, so the same
    /// interval can never be credited twice.
    pub fn refill(&mut self, now: Timestamp) {
        let elapsed = now.seconds_since(self.last_refill_at);
        if elapsed <= 0 {
            return;
        }
        let refill = elapsed as f64 * self.refill_rate / 60.0;
        self.tokens = (self.tokens + refill).min(self.max_tokens);
        self.last_refill_at = now;
    }

    /// Refill, then take one token if available.
    ///
    /// Returns `true` when a token was consumed. Fractional token state is
    /// retained between calls so refill accrual is not lost to rounding.
    pub fn try_consume(&mut self, now: Timestamp) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Outcome of an atomic token consumption
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// Token consumed; request may proceed
    Allowed,

    /// Bucket exhausted; the client should retry after the given delay
    Limited { retry_after_seconds: u64 },
}

// ============================================================================
// Store Trait
// ============================================================================

/// Atomic rate-limit token consumption scoped to a webhook source.
///
/// Implementations must make [`try_consume`](RateLimiter::try_consume) a
/// single atomic operation: refill-then-decrement must never interleave with
/// another consumer of the same bucket. A bucket that does not yet exist is
/// created full using the supplied per-minute limit.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one token from the source's bucket
    async fn try_consume(
        &self,
        source_id: SourceId,
        rate_limit_per_min: u32,
    ) -> Result<RateLimitDecision, StoreError>;
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
