//! Operator-tunable knobs for [`super::ContentBackend`] (spec §4.3, §9
//! Open Questions).
//!
//! Modeled on the teacher's small `Config` structs with `Default` impls
//! (`TokenValidatorConfig`, `CircuitBreakerConfig`).

use crate::model::Snapshot;
use std::sync::Arc;
use std::time::Duration;

/// Exponential back-off parameters for the stream-update work loop (spec
/// §4.3.6).
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Ceiling the delay is clamped to.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 1.5,
        }
    }
}

impl BackoffConfig {
    /// `floor(minDelay * factor^attempt)` clamped to `[minDelay, maxDelay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.min_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let clamped = scaled.clamp(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

/// Tunables for a [`super::ContentBackend`] instance. The spec leaves these
/// as policy, not contract (§9); defaults reproduce every number `spec.md`
/// names.
#[derive(Clone)]
pub struct BackendConfig {
    /// How long a cache entry survives after its last touch once no stream
    /// is pinning it (spec §4.3.5).
    pub cache_ttl: Duration,
    /// Operation-buffer cap per document cache entry (spec §4.3.5 "cacheLimit").
    pub cache_limit: usize,
    /// Per-iteration fetch cap for the stream-update work loop (spec §4.3.6,
    /// default 100).
    pub load_limit: u32,
    /// Policy hook deciding whether a freshly-applied snapshot should be
    /// persisted (spec §4.3.1, §9 Open Question: default `version % 1000 ==
    /// 0`, made configurable here rather than hardcoded).
    pub should_store_snapshot: Arc<dyn Fn(&Snapshot) -> bool + Send + Sync>,
    /// Stream-update work loop retry back-off (spec §4.3.6).
    pub backoff: BackoffConfig,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_limit", &self.cache_limit)
            .field("load_limit", &self.load_limit)
            .field("should_store_snapshot", &"<fn>")
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            cache_limit: 500,
            load_limit: 100,
            should_store_snapshot: Arc::new(|snapshot: &Snapshot| snapshot.version % 1000 == 0),
            backoff: BackoffConfig::default(),
        }
    }
}
