//! Channel registry and weighted selection

use gateway_core::{ChannelStatus, GatewayError};
use gateway_routing::ChannelRegistry;
use gateway_store::MemoryStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::fixtures::*;

async fn registry_with(channels: Vec<gateway_core::Channel>) -> (ChannelRegistry, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_records(channels, Vec::new(), Vec::new()));
    let registry = ChannelRegistry::new(store.clone()).with_seed(2024);
    registry.refresh().await.expect("refresh should succeed");
    (registry, store)
}

#[allow(clippy::cast_precision_loss)]
fn frequencies(
    registry: &ChannelRegistry,
    rounds: usize,
    rates: Option<&HashMap<i64, f64>>,
) -> HashMap<i64, f64> {
    let none = HashSet::new();
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for _ in 0..rounds {
        let channel = registry
            .select_channel_weighted(TEST_MODEL, &none, &none, rates)
            .expect("a channel is eligible");
        *counts.entry(channel.id).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(id, n)| (id, n as f64 / rounds as f64))
        .collect()
}

#[tokio::test]
async fn test_selection_frequency_follows_priority() {
    let (registry, _) = registry_with(vec![
        test_channel(1, 1),
        test_channel(2, 3),
        test_channel(3, 6),
    ])
    .await;

    let freq = frequencies(&registry, 20_000, None);
    for (id, expected) in [(1, 0.1), (2, 0.3), (3, 0.6)] {
        let actual = freq.get(&id).copied().unwrap_or(0.0);
        assert!(
            (actual - expected).abs() < 0.02,
            "channel {id}: expected {expected}, got {actual}"
        );
    }
}

#[tokio::test]
async fn test_error_rate_weighting_prefers_healthy_channel() {
    let (registry, _) = registry_with(vec![test_channel(1, 5), test_channel(2, 5)]).await;
    let rates = HashMap::from([(1, 1.0), (2, 0.0)]);

    // Weights become 5/1.0 and 5/0.1.
    let freq = frequencies(&registry, 20_000, Some(&rates));
    let healthy = freq.get(&2).copied().unwrap_or(0.0);
    assert!((healthy - 10.0 / 11.0).abs() < 0.02, "got {healthy}");
}

#[tokio::test]
async fn test_zero_priority_channels_are_last_resort() {
    let (registry, _) = registry_with(vec![test_channel(1, 10), test_channel(2, 0)]).await;
    let none = HashSet::new();

    for _ in 0..500 {
        let channel = registry
            .select_channel(TEST_MODEL, &none, &none)
            .expect("channel 1 is eligible");
        assert_eq!(channel.id, 1);
    }

    let excluded = HashSet::from([1]);
    let channel = registry
        .select_channel(TEST_MODEL, &excluded, &none)
        .expect("channel 2 remains");
    assert_eq!(channel.id, 2);
}

#[tokio::test]
async fn test_excluded_and_banned_are_never_selected() {
    let (registry, _) = registry_with(vec![
        test_channel(1, 1),
        test_channel(2, 1),
        test_channel(3, 1),
    ])
    .await;
    let excluded = HashSet::from([1]);
    let banned = HashSet::from([2]);

    for _ in 0..200 {
        let channel = registry
            .select_channel(TEST_MODEL, &excluded, &banned)
            .expect("channel 3 is eligible");
        assert_eq!(channel.id, 3);
    }

    let everything = HashSet::from([1, 2, 3]);
    let err = registry
        .select_channel(TEST_MODEL, &everything, &HashSet::new())
        .expect_err("nothing is eligible");
    assert!(matches!(err, GatewayError::NoChannelAvailable { ref model } if model == TEST_MODEL));
}

#[tokio::test]
async fn test_unknown_model_has_no_channel() {
    let (registry, _) = registry_with(vec![test_channel(1, 1)]).await;
    let none = HashSet::new();
    assert!(registry.select_channel("unknown-model", &none, &none).is_err());
}

#[tokio::test]
async fn test_refresh_picks_up_store_changes() {
    let (registry, store) = registry_with(vec![test_channel(1, 1), test_channel(2, 1)]).await;
    assert_eq!(registry.channels_for(TEST_MODEL).len(), 2);

    store.set_channel_status(1, ChannelStatus::Disabled);
    store.upsert_channel(
        gateway_core::Channel::new(3, "embeddings", "sk-3").with_models(["text-embedding-3-small"]),
    );
    // Selection keeps using the old snapshot until the next refresh.
    assert_eq!(registry.channels_for(TEST_MODEL).len(), 2);

    registry.refresh().await.expect("refresh should succeed");
    let ids: Vec<i64> = registry
        .channels_for(TEST_MODEL)
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(
        registry.models(),
        vec!["gpt-4o-mini".to_string(), "text-embedding-3-small".to_string()]
    );
}

#[tokio::test]
async fn test_model_mapping_is_per_channel() {
    let mapped = test_channel(1, 1).with_mapping(TEST_MODEL, "gpt-4o-mini-2024-07-18");
    let (registry, _) = registry_with(vec![mapped, test_channel(2, 0)]).await;

    let channel = registry.channel(1).expect("channel 1 is loaded");
    assert_eq!(channel.mapped_model(TEST_MODEL), "gpt-4o-mini-2024-07-18");
    let plain = registry.channel(2).expect("channel 2 is loaded");
    assert_eq!(plain.mapped_model(TEST_MODEL), TEST_MODEL);
}
