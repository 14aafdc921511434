//! Quota-aware throttling for the two external services
//!
//! Gmail meters quota units per user per second (reads cost 5 units, writes
//! 50); the inference API is metered in requests per minute. Both are token
//! buckets that refill continuously, allow bursting while tokens remain, and
//! sleep when exhausted. The processor acquires from the right bucket before
//! every external call, which keeps a run under both providers' quotas
//! without coordinating anything else.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Cost of one external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCost {
    /// messages.list / messages.get: 5 Gmail quota units
    MailRead,
    /// messages.modify / labels.create: 50 Gmail quota units
    MailWrite,
    /// One inference request
    Classify,
}

impl CallCost {
    fn units(&self) -> f64 {
        match self {
            CallCost::MailRead => 5.0,
            CallCost::MailWrite => 50.0,
            CallCost::Classify => 1.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    /// Currently available tokens
    available: f64,
    /// Burst capacity
    max_tokens: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time the bucket was refilled
    last_refill: Instant,
    /// Total tokens consumed (for stats)
    total_consumed: u64,
    /// Total acquisitions (for stats)
    total_operations: u64,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

/// A single token bucket
#[derive(Debug, Clone)]
struct TokenBucket {
    inner: Arc<Mutex<BucketState>>,
}

impl TokenBucket {
    fn new(refill_rate: f64, max_tokens: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState {
                available: max_tokens, // Start with full bucket
                max_tokens,
                refill_rate,
                last_refill: Instant::now(),
                total_consumed: 0,
                total_operations: 0,
            })),
        }
    }

    async fn acquire(&self, units: f64) {
        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;
                state.refill();

                trace!(
                    "Throttle state: {:.1}/{:.1} tokens available, requesting {:.0}",
                    state.available,
                    state.max_tokens,
                    units
                );

                if state.available >= units {
                    state.available -= units;
                    state.total_consumed += units as u64;
                    state.total_operations += 1;
                    return;
                }

                let deficit = units - state.available;
                Duration::from_secs_f64(deficit / state.refill_rate)
            };

            // Sleep outside the lock so other callers can refill/inspect
            debug!(
                "Throttle exhausted, waiting {:.2}s for {:.0} tokens",
                wait_time.as_secs_f64(),
                units
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    async fn stats(&self) -> BucketStats {
        let mut state = self.inner.lock().await;
        state.refill();
        BucketStats {
            available: state.available,
            total_consumed: state.total_consumed,
            total_operations: state.total_operations,
        }
    }
}

/// Snapshot of one bucket's usage
#[derive(Debug, Clone)]
pub struct BucketStats {
    pub available: f64,
    pub total_consumed: u64,
    pub total_operations: u64,
}

/// Throttle spanning both external services
#[derive(Debug, Clone)]
pub struct CallThrottle {
    mail: TokenBucket,
    classifier: TokenBucket,
}

impl CallThrottle {
    /// Create a throttle from configured rates
    ///
    /// # Arguments
    /// * `mail_units_per_sec` - Gmail quota units refilled per second
    /// * `mail_units_burst` - Gmail quota burst capacity
    /// * `classifier_rpm` - inference requests allowed per minute
    pub fn new(mail_units_per_sec: f64, mail_units_burst: f64, classifier_rpm: f64) -> Self {
        Self {
            mail: TokenBucket::new(mail_units_per_sec, mail_units_burst),
            // Allow a small burst so short backlogs aren't paced one-per-second
            classifier: TokenBucket::new(classifier_rpm / 60.0, (classifier_rpm / 12.0).max(1.0)),
        }
    }

    /// Wait until the call's quota is available, then consume it
    pub async fn acquire(&self, cost: CallCost) {
        match cost {
            CallCost::MailRead | CallCost::MailWrite => self.mail.acquire(cost.units()).await,
            CallCost::Classify => self.classifier.acquire(cost.units()).await,
        }
    }

    pub async fn mail_stats(&self) -> BucketStats {
        self.mail.stats().await
    }

    pub async fn classifier_stats(&self) -> BucketStats {
        self.classifier.stats().await
    }
}

impl Default for CallThrottle {
    fn default() -> Self {
        Self::new(250.0, 500.0, 60.0)
    }
}
