//! Per-(model, channel) error-rate monitor with automatic bans.
//!
//! Each pair keeps a ring of fixed-width time slices. A pair is banned when
//! the calls inside the valid slices reach the minimum sample size with an
//! error rate at or above the threshold, or immediately when a call fails in
//! a way that revokes the channel's permission (try-ban). Bans expire lazily
//! on the next access, or eagerly in [`ErrorRateMonitor::sweep`].
//!
//! Bans only exclude the pair from selection; channel records are never
//! touched.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct ErrorRateMonitorConfig {
    /// Record statistics at all
    pub enabled: bool,
    /// Ban pairs automatically
    pub auto_ban: bool,
    /// Error rate at or above which a pair is banned
    pub error_rate_threshold: f64,
    /// Calls required inside the window before the rate is judged
    pub min_requests: u64,
    /// Width of one slice
    pub slice_width: Duration,
    /// Number of slices in the window
    pub slice_count: u32,
    /// How long a ban lasts
    pub ban_duration: Duration,
}

impl Default for ErrorRateMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_ban: true,
            error_rate_threshold: 0.5,
            min_requests: 20,
            slice_width: Duration::from_secs(10),
            slice_count: 6,
            ban_duration: Duration::from_secs(300),
        }
    }
}

impl ErrorRateMonitorConfig {
    /// Total span covered by the slices
    #[must_use]
    pub fn window(&self) -> Duration {
        self.slice_width.saturating_mul(self.slice_count.max(1))
    }
}

/// Result of recording one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The call was counted; the pair is not banned
    Recorded,
    /// This call banned the pair
    Banned,
    /// The pair was already banned; the ban was not extended
    AlreadyBanned,
}

#[derive(Debug, Clone, Copy)]
struct Slice {
    started: Instant,
    requests: u64,
    errors: u64,
}

#[derive(Debug)]
struct PairStats {
    slices: VecDeque<Slice>,
    banned_until: Option<Instant>,
    last_seen: Instant,
}

impl PairStats {
    fn new(now: Instant) -> Self {
        Self {
            slices: VecDeque::new(),
            banned_until: None,
            last_seen: now,
        }
    }

    /// Drop slices outside the window and lift an elapsed ban.
    /// Returns true when a ban was lifted.
    fn refresh(&mut self, now: Instant, window: Duration) -> bool {
        while let Some(oldest) = self.slices.front() {
            if now.saturating_duration_since(oldest.started) >= window {
                self.slices.pop_front();
            } else {
                break;
            }
        }
        match self.banned_until {
            Some(until) if until <= now => {
                self.banned_until = None;
                true
            }
            _ => false,
        }
    }

    fn push(&mut self, now: Instant, is_error: bool, slice_width: Duration) {
        let open_new = self
            .slices
            .back()
            .map_or(true, |s| now.saturating_duration_since(s.started) >= slice_width);
        if open_new {
            self.slices.push_back(Slice {
                started: now,
                requests: 0,
                errors: 0,
            });
        }
        if let Some(slice) = self.slices.back_mut() {
            slice.requests += 1;
            if is_error {
                slice.errors += 1;
            }
        }
        self.last_seen = now;
    }

    fn totals(&self) -> (u64, u64) {
        self.slices
            .iter()
            .fold((0, 0), |(r, e), s| (r + s.requests, e + s.errors))
    }

    fn error_rate(&self) -> f64 {
        let (requests, errors) = self.totals();
        ratio(requests, errors)
    }

    fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| until > now)
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(requests: u64, errors: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        errors as f64 / requests as f64
    }
}

type PairKey = (String, i64);

/// Error-rate monitor shared by all request tasks
#[derive(Debug)]
pub struct ErrorRateMonitor {
    config: ErrorRateMonitorConfig,
    pairs: DashMap<PairKey, Arc<Mutex<PairStats>>>,
}

impl ErrorRateMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(config: ErrorRateMonitorConfig) -> Self {
        Self {
            config,
            pairs: DashMap::new(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ErrorRateMonitorConfig::default())
    }

    /// Monitor configuration
    #[must_use]
    pub fn config(&self) -> &ErrorRateMonitorConfig {
        &self.config
    }

    fn pair(&self, model: &str, channel_id: i64) -> Arc<Mutex<PairStats>> {
        let key = (model.to_string(), channel_id);
        if let Some(stats) = self.pairs.get(&key) {
            return Arc::clone(&stats);
        }
        Arc::clone(
            &self
                .pairs
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(PairStats::new(Instant::now())))),
        )
    }

    /// Record the outcome of one upstream call.
    ///
    /// `try_ban` bans at once on an error that revokes the channel's
    /// permission, regardless of the sample size.
    pub fn record_request(
        &self,
        model: &str,
        channel_id: i64,
        is_error: bool,
        try_ban: bool,
    ) -> RecordOutcome {
        if !self.config.enabled {
            return RecordOutcome::Recorded;
        }

        let now = Instant::now();
        let slot = self.pair(model, channel_id);
        let mut stats = slot.lock();

        if stats.refresh(now, self.config.window()) {
            info!(model = %model, channel = channel_id, "Channel ban expired");
        }
        if stats.is_banned(now) {
            return RecordOutcome::AlreadyBanned;
        }
        stats.push(now, is_error, self.config.slice_width);

        // Only a failing call can arm a ban.
        if !is_error || !self.config.auto_ban {
            return RecordOutcome::Recorded;
        }

        let (requests, errors) = stats.totals();
        let rate = stats.error_rate();
        let ban = try_ban
            || (requests >= self.config.min_requests && rate >= self.config.error_rate_threshold);
        if !ban {
            return RecordOutcome::Recorded;
        }

        stats.banned_until = Some(now + self.config.ban_duration);
        stats.slices.clear();
        warn!(
            model = %model,
            channel = channel_id,
            requests,
            errors,
            error_rate = rate,
            try_ban,
            ban_duration = ?self.config.ban_duration,
            "Channel banned for model"
        );
        RecordOutcome::Banned
    }

    /// Error rate of one pair inside the window; 0 when unknown
    #[must_use]
    pub fn error_rate(&self, model: &str, channel_id: i64) -> f64 {
        let now = Instant::now();
        self.pairs
            .get(&(model.to_string(), channel_id))
            .map_or(0.0, |slot| {
                let mut stats = slot.lock();
                stats.refresh(now, self.config.window());
                stats.error_rate()
            })
    }

    /// `(requests, errors)` of one pair inside the window
    #[must_use]
    pub fn request_counts(&self, model: &str, channel_id: i64) -> (u64, u64) {
        let now = Instant::now();
        self.pairs
            .get(&(model.to_string(), channel_id))
            .map_or((0, 0), |slot| {
                let mut stats = slot.lock();
                stats.refresh(now, self.config.window());
                stats.totals()
            })
    }

    /// Error rates of every channel seen for `model`
    #[must_use]
    pub fn model_error_rates(&self, model: &str) -> HashMap<i64, f64> {
        self.collect(|(m, _)| m == model)
            .into_iter()
            .map(|((_, channel), rate, _)| (channel, rate))
            .collect()
    }

    /// Error rate of `model` summed over all of its channels; 0 when unknown
    #[must_use]
    pub fn model_error_rate(&self, model: &str) -> f64 {
        let (requests, errors) = self
            .model_totals(|m| m == model)
            .remove(model)
            .unwrap_or_default();
        ratio(requests, errors)
    }

    /// Aggregate error rate of every model seen
    #[must_use]
    pub fn models_error_rate(&self) -> HashMap<String, f64> {
        self.model_totals(|_| true)
            .into_iter()
            .map(|(model, (requests, errors))| (model, ratio(requests, errors)))
            .collect()
    }

    fn model_totals<F>(&self, filter: F) -> HashMap<String, (u64, u64)>
    where
        F: Fn(&str) -> bool,
    {
        let now = Instant::now();
        let window = self.config.window();
        let mut out: HashMap<String, (u64, u64)> = HashMap::new();
        for entry in self.pairs.iter().filter(|e| filter(&e.key().0)) {
            let mut stats = entry.value().lock();
            stats.refresh(now, window);
            let (requests, errors) = stats.totals();
            let total = out.entry(entry.key().0.clone()).or_default();
            total.0 += requests;
            total.1 += errors;
        }
        out
    }

    /// Error rates of every model seen on `channel_id`
    #[must_use]
    pub fn channel_error_rates(&self, channel_id: i64) -> HashMap<String, f64> {
        self.collect(|(_, c)| *c == channel_id)
            .into_iter()
            .map(|((model, _), rate, _)| (model, rate))
            .collect()
    }

    /// Error rates of all pairs, grouped by model
    #[must_use]
    pub fn all_error_rates(&self) -> HashMap<String, HashMap<i64, f64>> {
        let mut out: HashMap<String, HashMap<i64, f64>> = HashMap::new();
        for ((model, channel), rate, _) in self.collect(|_| true) {
            out.entry(model).or_default().insert(channel, rate);
        }
        out
    }

    /// Whether the pair is currently banned
    #[must_use]
    pub fn is_banned(&self, model: &str, channel_id: i64) -> bool {
        let now = Instant::now();
        self.pairs
            .get(&(model.to_string(), channel_id))
            .is_some_and(|slot| slot.lock().is_banned(now))
    }

    /// Channels banned for `model`
    #[must_use]
    pub fn banned_channels(&self, model: &str) -> HashSet<i64> {
        self.collect(|(m, _)| m == model)
            .into_iter()
            .filter(|(_, _, banned)| *banned)
            .map(|((_, channel), _, _)| channel)
            .collect()
    }

    /// All banned channels, grouped by model
    #[must_use]
    pub fn all_banned(&self) -> HashMap<String, Vec<i64>> {
        let mut out: HashMap<String, Vec<i64>> = HashMap::new();
        for ((model, channel), _, banned) in self.collect(|_| true) {
            if banned {
                out.entry(model).or_default().push(channel);
            }
        }
        for channels in out.values_mut() {
            channels.sort_unstable();
        }
        out
    }

    fn collect<F>(&self, filter: F) -> Vec<(PairKey, f64, bool)>
    where
        F: Fn(&PairKey) -> bool,
    {
        let now = Instant::now();
        let window = self.config.window();
        self.pairs
            .iter()
            .filter(|entry| filter(entry.key()))
            .map(|entry| {
                let mut stats = entry.value().lock();
                stats.refresh(now, window);
                (entry.key().clone(), stats.error_rate(), stats.is_banned(now))
            })
            .collect()
    }

    /// Forget one pair, lifting any ban
    pub fn clear_pair(&self, model: &str, channel_id: i64) {
        self.pairs.remove(&(model.to_string(), channel_id));
    }

    /// Forget every pair of a channel
    pub fn clear_channel(&self, channel_id: i64) {
        self.pairs.retain(|(_, channel), _| *channel != channel_id);
    }

    /// Forget everything
    pub fn clear_all(&self) {
        self.pairs.clear();
    }

    /// Lift elapsed bans and drop pairs with no recent activity.
    /// Returns the number of pairs removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window();
        let before = self.pairs.len();
        self.pairs.retain(|(model, channel), slot| {
            let mut stats = slot.lock();
            if stats.refresh(now, window) {
                info!(model = %model, channel = *channel, "Channel ban expired");
            }
            stats.is_banned(now)
                || !stats.slices.is_empty()
                || now.saturating_duration_since(stats.last_seen) < window
        });
        let removed = before.saturating_sub(self.pairs.len());
        if removed > 0 {
            debug!(removed, "Swept idle monitor pairs");
        }
        removed
    }

    /// Number of tracked pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no pairs are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
