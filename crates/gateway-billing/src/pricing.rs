//! Flat per-model pricing.

use gateway_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price per 1000 tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Price per 1000 prompt tokens
    pub input_per_1k: f64,
    /// Price per 1000 completion tokens
    pub output_per_1k: f64,
}

impl ModelPrice {
    /// Create a price
    #[must_use]
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Raw cost of `usage`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, usage: &Usage) -> f64 {
        usage.prompt_tokens as f64 / 1000.0 * self.input_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.output_per_1k
    }
}

/// Prices by model with a default
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    /// Price for models without an entry
    pub default: ModelPrice,
    /// Per-model prices
    pub models: HashMap<String, ModelPrice>,
}

impl PriceTable {
    /// Table with only a default price
    #[must_use]
    pub fn new(default: ModelPrice) -> Self {
        Self {
            default,
            models: HashMap::new(),
        }
    }

    /// Add a model price
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    /// Price for `model`
    #[must_use]
    pub fn price(&self, model: &str) -> ModelPrice {
        self.models.get(model).copied().unwrap_or(self.default)
    }

    /// Amount to charge for `usage` on `model`, rounded up to a multiple of
    /// `min_charge`. Any consumed tokens cost at least `min_charge`.
    #[must_use]
    pub fn charge(&self, model: &str, usage: &Usage, min_charge: f64) -> f64 {
        let raw = self.price(model).cost(usage).max(0.0);
        if min_charge <= 0.0 {
            return raw;
        }
        let rounded = (raw / min_charge).ceil() * min_charge;
        if rounded <= 0.0 && !usage.is_empty() {
            min_charge
        } else {
            rounded
        }
    }
}
