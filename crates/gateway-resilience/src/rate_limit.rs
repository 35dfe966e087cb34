//! Sliding-window rate limiting and three-tier admission control.
//!
//! Two strategies share one contract: entries with `now - t >= window` are
//! expired, and a limit of zero means unlimited.
//! - In-process windows guarded by a per-key mutex
//! - Server-side windows on a distributed [`CacheBackend`]

use dashmap::DashMap;
use gateway_core::{GatewayError, GatewayResult, Group};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheBackend, WindowDecision};

/// Timestamps of admitted calls for one key
#[derive(Debug)]
pub struct SlidingWindow {
    hits: VecDeque<Instant>,
    last_seen: Instant,
    span: Duration,
}

impl SlidingWindow {
    /// Create an empty window
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
            span: Duration::ZERO,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, check and append in one step
    pub fn admit(&mut self, now: Instant, limit: u64, window: Duration) -> WindowDecision {
        self.prune(now, window);
        self.last_seen = now;
        self.span = window;

        let count = self.hits.len() as u64;
        if limit == 0 || count < limit {
            self.hits.push_back(now);
            WindowDecision {
                allowed: true,
                count: count + 1,
            }
        } else {
            WindowDecision {
                allowed: false,
                count,
            }
        }
    }

    /// Entries inside the window
    pub fn count(&mut self, now: Instant, window: Duration) -> u64 {
        self.prune(now, window);
        self.hits.len() as u64
    }

    /// Instant of the last admit call
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Untouched for `horizon` and holding no hit inside the last window used
    pub fn is_idle(&mut self, now: Instant, horizon: Duration) -> bool {
        self.prune(now, self.span);
        self.hits.is_empty() && now.saturating_duration_since(self.last_seen) >= horizon
    }
}

/// In-process limiter keyed by string.
///
/// Admission runs while the map shard guard is held, so eviction never
/// removes a window between lookup and admit.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: DashMap<String, Mutex<SlidingWindow>>,
}

impl MemoryRateLimiter {
    /// Create an empty limiter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one call against `key`
    pub fn admit(&self, key: &str, limit: u64, window: Duration) -> WindowDecision {
        if let Some(slot) = self.windows.get(key) {
            return slot.lock().admit(Instant::now(), limit, window);
        }
        let slot = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(SlidingWindow::new(Instant::now())));
        let decision = slot.lock().admit(Instant::now(), limit, window);
        decision
    }

    /// Entries currently inside the window for `key`
    pub fn count(&self, key: &str, window: Duration) -> u64 {
        self.windows
            .get(key)
            .map_or(0, |slot| slot.lock().count(Instant::now(), window))
    }

    /// Remove keys not touched within `horizon` whose window is empty;
    /// returns how many were removed
    pub fn evict_idle(&self, horizon: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, slot| !slot.lock().is_idle(now, horizon));
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no keys are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Sliding-window limiter that follows the cache backend's topology.
///
/// A distributed backend makes the window shared across gateway instances;
/// otherwise the in-process strategy is used.
pub struct RateLimiter {
    backend: Arc<dyn CacheBackend>,
    local: MemoryRateLimiter,
}

impl RateLimiter {
    /// Create a limiter over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            local: MemoryRateLimiter::new(),
        }
    }

    /// Whether windows are shared across instances
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    /// Admit one call against `key`. Backend failures admit the call.
    pub async fn allow(&self, key: &str, limit: u64, window: Duration) -> bool {
        self.record(key, limit, window).await.allowed
    }

    /// Admit one call and report the window size
    pub async fn record(&self, key: &str, limit: u64, window: Duration) -> WindowDecision {
        if !self.backend.is_distributed() {
            return self.local.admit(key, limit, window);
        }

        match self.backend.windowed_admit(key, limit, window).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(key = %key, backend = self.backend.name(), error = %e, "Rate limit check failed, admitting");
                WindowDecision {
                    allowed: true,
                    count: 0,
                }
            }
        }
    }

    /// Entries currently inside the window for `key`
    pub async fn count(&self, key: &str, window: Duration) -> u64 {
        if !self.backend.is_distributed() {
            return self.local.count(key, window);
        }

        match self.backend.window_count(key, window).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate window count failed");
                0
            }
        }
    }

    /// Drop idle in-process windows; distributed windows expire server-side
    pub fn evict_idle(&self, horizon: Duration) -> usize {
        let removed = self.local.evict_idle(horizon);
        if removed > 0 {
            debug!(removed, "Evicted idle rate limit windows");
        }
        removed
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.backend.name())
            .field("local_keys", &self.local.len())
            .finish()
    }
}

/// Budgets for the three admission tiers
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Calls per window across the gateway; 0 disables the tier
    pub global_qpm: u64,
    /// Default calls per window for a group; 0 disables the tier
    pub group_qpm: u64,
    /// Fallback per-model budget for a group
    pub default_model_rpm: u64,
    /// Per-model budgets, scaled by the group's ratio
    pub model_rpm: HashMap<String, u64>,
    /// Window length
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            global_qpm: 0,
            group_qpm: 0,
            default_model_rpm: 0,
            model_rpm: HashMap::new(),
            window: Duration::from_secs(60),
        }
    }
}

impl AdmissionConfig {
    /// Per-model budget for `group`; an explicit group entry wins over the
    /// ratio-scaled model budget
    #[must_use]
    pub fn model_limit(&self, group: &Group, model: &str) -> u64 {
        if let Some(&limit) = group.rpm.get(model) {
            return limit;
        }
        let base = self
            .model_rpm
            .get(model)
            .copied()
            .unwrap_or(self.default_model_rpm);
        scale(base, group.effective_rpm_ratio())
    }

    /// Group budget; the group's own value wins when set
    #[must_use]
    pub fn group_limit(&self, group: &Group) -> u64 {
        if group.qpm > 0 {
            group.qpm
        } else {
            self.group_qpm
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn scale(limit: u64, ratio: f64) -> u64 {
    if limit == 0 {
        return 0;
    }
    ((limit as f64) * ratio).ceil().max(1.0) as u64
}

/// Three-tier admission: global, group, then group and model
#[derive(Debug)]
pub struct AdmissionController {
    limiter: Arc<RateLimiter>,
    config: AdmissionConfig,
}

impl AdmissionController {
    /// Create a controller
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, config: AdmissionConfig) -> Self {
        Self { limiter, config }
    }

    /// Admission configuration
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Admit one request from `group` for `model`.
    ///
    /// # Errors
    /// Returns [`GatewayError::RateLimited`] naming the first tier that rejected.
    pub async fn admit(&self, group: &Group, model: &str) -> GatewayResult<()> {
        let window = self.config.window;

        if !self
            .limiter
            .allow("ratelimit:global", self.config.global_qpm, window)
            .await
        {
            return Err(rejected("global", &group.id, model));
        }

        let group_key = format!("ratelimit:group:{}", group.id);
        if !self
            .limiter
            .allow(&group_key, self.config.group_limit(group), window)
            .await
        {
            return Err(rejected("group", &group.id, model));
        }

        let model_key = format!("ratelimit:group:{}:model:{model}", group.id);
        if !self
            .limiter
            .allow(&model_key, self.config.model_limit(group, model), window)
            .await
        {
            return Err(rejected("model", &group.id, model));
        }

        Ok(())
    }

    /// Count a dispatched request for `model`; never rejects
    pub async fn record_model_request(&self, model: &str) {
        self.limiter
            .record(&format!("rpm:model:{model}"), 0, self.config.window)
            .await;
    }

    /// Requests dispatched for `model` within the window
    pub async fn current_rpm(&self, model: &str) -> u64 {
        self.limiter
            .count(&format!("rpm:model:{model}"), self.config.window)
            .await
    }
}

fn rejected(scope: &str, group: &str, model: &str) -> GatewayError {
    debug!(scope, group = %group, model = %model, "Request rejected by admission control");
    GatewayError::RateLimited {
        scope: scope.to_string(),
    }
}
