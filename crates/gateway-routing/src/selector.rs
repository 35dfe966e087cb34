//! Weighted roulette selection.

use gateway_core::Channel;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Error rates below this floor count as the floor, so a healthy channel's
/// weight is boosted at most tenfold.
pub const MIN_ERROR_RATE: f64 = 0.1;

/// A channel with its selection weight
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Channel
    pub channel: Arc<Channel>,
    /// Non-negative weight
    pub weight: f64,
}

impl Candidate {
    /// Candidate weighted by priority alone
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(channel: Arc<Channel>) -> Self {
        let weight = channel.weight() as f64;
        Self { channel, weight }
    }

    /// Candidate weighted by priority over its clamped error rate
    #[must_use]
    pub fn with_error_rate(channel: Arc<Channel>, error_rate: f64) -> Self {
        let mut candidate = Self::new(channel);
        candidate.weight /= clamp_error_rate(error_rate);
        candidate
    }
}

/// Clamp an error rate into `[MIN_ERROR_RATE, 1.0]`
#[must_use]
pub fn clamp_error_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        return MIN_ERROR_RATE;
    }
    rate.clamp(MIN_ERROR_RATE, 1.0)
}

/// Build candidates, optionally weighted by per-channel error rates
#[must_use]
pub fn candidates<'a, I>(channels: I, error_rates: Option<&HashMap<i64, f64>>) -> Vec<Candidate>
where
    I: IntoIterator<Item = &'a Arc<Channel>>,
{
    channels
        .into_iter()
        .map(|channel| match error_rates {
            Some(rates) => Candidate::with_error_rate(
                Arc::clone(channel),
                rates.get(&channel.id).copied().unwrap_or(0.0),
            ),
            None => Candidate::new(Arc::clone(channel)),
        })
        .collect()
}

/// Pick one candidate with probability proportional to its weight.
///
/// A single candidate is returned without drawing from `rng`. When every
/// weight is zero the pick is uniform.
pub fn pick<'a, R: Rng + ?Sized>(candidates: &'a [Candidate], rng: &mut R) -> Option<&'a Candidate> {
    match candidates {
        [] => None,
        [only] => Some(only),
        _ => {
            let total: f64 = candidates.iter().map(|c| c.weight).sum();
            if total <= 0.0 || !total.is_finite() {
                return candidates.get(rng.gen_range(0..candidates.len()));
            }

            let mut remaining = rng.gen_range(0.0..total);
            for candidate in candidates {
                remaining -= candidate.weight;
                if remaining < 0.0 {
                    return Some(candidate);
                }
            }
            // Rounding can leave a sliver of weight unclaimed.
            candidates.iter().rev().find(|c| c.weight > 0.0)
        }
    }
}
