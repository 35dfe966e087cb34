//! Executor registry keyed by channel type.

use gateway_core::{Channel, ChannelType, RequestExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::azure::AzureExecutor;
use crate::openai::{ExecutorConfig, OpenAiCompatibleExecutor};

/// Maps each [`ChannelType`] to the executor that serves it
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ChannelType, Arc<dyn RequestExecutor>>,
    fallback: Option<Arc<dyn RequestExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executors; OpenAI-compatible is the fallback.
    ///
    /// # Errors
    /// Returns an error if the shared HTTP client cannot be created.
    pub fn with_defaults(config: &ExecutorConfig) -> Result<Self, reqwest::Error> {
        let client = config.build_client()?;
        let openai: Arc<dyn RequestExecutor> =
            Arc::new(OpenAiCompatibleExecutor::with_client(client.clone()));
        Ok(Self::new()
            .register(Arc::clone(&openai))
            .register(Arc::new(AzureExecutor::with_client(client)))
            .with_fallback(openai))
    }

    /// Register `executor` for every channel type it declares
    #[must_use]
    pub fn register(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        for channel_type in executor.channel_types() {
            debug!(channel_type = %channel_type, "Registering executor");
            self.executors.insert(*channel_type, Arc::clone(&executor));
        }
        self
    }

    /// Executor used for types without a dedicated one
    #[must_use]
    pub fn with_fallback(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    /// Executor for a channel type
    #[must_use]
    pub fn get(&self, channel_type: ChannelType) -> Option<Arc<dyn RequestExecutor>> {
        self.executors
            .get(&channel_type)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Executor for a channel
    #[must_use]
    pub fn for_channel(&self, channel: &Channel) -> Option<Arc<dyn RequestExecutor>> {
        self.get(channel.channel_type)
    }

    /// Channel types with a dedicated executor
    #[must_use]
    pub fn registered_types(&self) -> Vec<ChannelType> {
        let mut types: Vec<ChannelType> = self.executors.keys().copied().collect();
        types.sort_by_key(|t| t.as_code());
        types
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("types", &self.registered_types())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
