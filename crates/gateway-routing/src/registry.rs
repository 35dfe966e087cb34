//! Channel registry: an atomically swapped snapshot of enabled channels.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use gateway_core::{Channel, ChannelStatus, GatewayError, GatewayResult, SystemOfRecord};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::selector::{self, Candidate};

/// Immutable view of the enabled channels
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    channels: BTreeMap<i64, Arc<Channel>>,
    by_model: HashMap<String, Vec<Arc<Channel>>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    /// Build a snapshot; channels that are not enabled are dropped
    #[must_use]
    pub fn build(channels: Vec<Channel>) -> Self {
        let mut snapshot = Self {
            loaded_at: Some(Utc::now()),
            ..Self::default()
        };

        for channel in channels {
            if channel.status != ChannelStatus::Enabled {
                continue;
            }
            snapshot.channels.insert(channel.id, Arc::new(channel));
        }

        // BTreeMap iteration keeps every model list in id order.
        for channel in snapshot.channels.values() {
            for model in &channel.models {
                let list = snapshot.by_model.entry(model.clone()).or_default();
                if !list.iter().any(|c| c.id == channel.id) {
                    list.push(Arc::clone(channel));
                }
            }
        }
        snapshot
    }

    /// Channel by id
    #[must_use]
    pub fn channel(&self, id: i64) -> Option<&Arc<Channel>> {
        self.channels.get(&id)
    }

    /// Channels serving `model`, in id order
    #[must_use]
    pub fn channels_for(&self, model: &str) -> &[Arc<Channel>] {
        self.by_model.get(model).map_or(&[][..], Vec::as_slice)
    }

    /// All channels, in id order
    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.values()
    }

    /// Models served by at least one channel, sorted
    #[must_use]
    pub fn models(&self) -> Vec<String> {
        self.by_model.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Number of channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the snapshot holds no channels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// When the snapshot was built
    #[must_use]
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Randomness for selection
#[derive(Debug)]
enum RngSource {
    ThreadLocal,
    Seeded(Mutex<StdRng>),
}

/// Registry of enabled channels with weighted selection
pub struct ChannelRegistry {
    store: Arc<dyn SystemOfRecord>,
    snapshot: ArcSwap<RegistrySnapshot>,
    rng: RngSource,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("store", &self.store.name())
            .field("channels", &self.snapshot.load().len())
            .field("rng", &self.rng)
            .finish()
    }
}

impl ChannelRegistry {
    /// Create an empty registry; call [`Self::refresh`] before serving
    #[must_use]
    pub fn new(store: Arc<dyn SystemOfRecord>) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            rng: RngSource::ThreadLocal,
        }
    }

    /// Use a seeded generator so selections are reproducible
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = RngSource::Seeded(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// Reload channels from the store and swap the snapshot.
    /// On failure the previous snapshot stays in place.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn refresh(&self) -> GatewayResult<usize> {
        let channels = self.store.list_enabled_channels().await.map_err(|e| {
            warn!(store = self.store.name(), error = %e, "Channel refresh failed");
            e
        })?;
        let snapshot = RegistrySnapshot::build(channels);
        let count = snapshot.len();
        let models = snapshot.by_model.len();
        self.snapshot.store(Arc::new(snapshot));
        info!(channels = count, models, "Channel registry refreshed");
        Ok(count)
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Channel by id
    #[must_use]
    pub fn channel(&self, id: i64) -> Option<Arc<Channel>> {
        self.snapshot.load().channel(id).cloned()
    }

    /// Channels serving `model`, in id order
    #[must_use]
    pub fn channels_for(&self, model: &str) -> Vec<Arc<Channel>> {
        self.snapshot.load().channels_for(model).to_vec()
    }

    /// Models served by at least one channel
    #[must_use]
    pub fn models(&self) -> Vec<String> {
        self.snapshot.load().models()
    }

    /// Pick a channel for `model` weighted by priority, skipping `excluded`
    /// and `banned`.
    ///
    /// # Errors
    /// Returns [`GatewayError::NoChannelAvailable`] when nothing is eligible.
    pub fn select_channel(
        &self,
        model: &str,
        excluded: &HashSet<i64>,
        banned: &HashSet<i64>,
    ) -> GatewayResult<Arc<Channel>> {
        self.select_channel_weighted(model, excluded, banned, None)
    }

    /// Like [`Self::select_channel`], with each weight divided by the
    /// channel's clamped error rate.
    ///
    /// # Errors
    /// Returns [`GatewayError::NoChannelAvailable`] when nothing is eligible.
    pub fn select_channel_weighted(
        &self,
        model: &str,
        excluded: &HashSet<i64>,
        banned: &HashSet<i64>,
        error_rates: Option<&HashMap<i64, f64>>,
    ) -> GatewayResult<Arc<Channel>> {
        let snapshot = self.snapshot.load();
        let eligible = snapshot
            .channels_for(model)
            .iter()
            .filter(|c| !excluded.contains(&c.id) && !banned.contains(&c.id));
        let candidates = selector::candidates(eligible, error_rates);

        let picked = self.pick(&candidates).ok_or_else(|| {
            debug!(
                model = %model,
                excluded = excluded.len(),
                banned = banned.len(),
                "No eligible channel"
            );
            GatewayError::NoChannelAvailable {
                model: model.to_string(),
            }
        })?;

        debug!(
            model = %model,
            channel = picked.channel.id,
            weight = picked.weight,
            candidates = candidates.len(),
            "Channel selected"
        );
        Ok(Arc::clone(&picked.channel))
    }

    fn pick<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        match &self.rng {
            RngSource::ThreadLocal => selector::pick(candidates, &mut rand::thread_rng()),
            RngSource::Seeded(rng) => selector::pick(candidates, &mut *rng.lock()),
        }
    }
}
