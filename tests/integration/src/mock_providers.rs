//! Mock upstreams: a scripted in-process executor and wiremock responders.

use async_trait::async_trait;
use gateway_core::{
    Channel, ChannelType, RelayRequest, RelayResponse, RequestExecutor, UpstreamError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{completion_body, embeddings_body, error_body, sample_usage};

/// Executor that answers from a per-channel script of HTTP statuses.
///
/// Channels without a script (or with an exhausted one) fall back to their
/// `always` status, then to 200.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<i64, VecDeque<u16>>>,
    always: Mutex<HashMap<i64, u16>>,
    calls: Mutex<Vec<i64>>,
}

impl ScriptedExecutor {
    /// Executor that succeeds on every channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `statuses` for `channel_id`, consumed one per call
    #[must_use]
    pub fn script(self, channel_id: i64, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.scripts
            .lock()
            .entry(channel_id)
            .or_default()
            .extend(statuses);
        self
    }

    /// Answer every unscripted call on `channel_id` with `status`
    #[must_use]
    pub fn always(self, channel_id: i64, status: u16) -> Self {
        self.always.lock().insert(channel_id, status);
        self
    }

    /// Channel ids in call order
    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().clone()
    }

    /// Number of upstream calls made
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_status(&self, channel_id: i64) -> u16 {
        if let Some(status) = self
            .scripts
            .lock()
            .get_mut(&channel_id)
            .and_then(VecDeque::pop_front)
        {
            return status;
        }
        self.always.lock().get(&channel_id).copied().unwrap_or(200)
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    fn channel_types(&self) -> &[ChannelType] {
        &[ChannelType::OpenAi, ChannelType::Custom]
    }

    async fn execute(
        &self,
        channel: &Channel,
        request: &RelayRequest,
    ) -> Result<RelayResponse, UpstreamError> {
        self.calls.lock().push(channel.id);
        let status = self.next_status(channel.id);
        let model = channel.mapped_model(&request.model).to_string();

        if (200..300).contains(&status) {
            Ok(RelayResponse {
                status,
                body: completion_body(&model),
                usage: sample_usage(),
                actual_model: model,
                channel_id: channel.id,
            })
        } else {
            Err(UpstreamError::new(status, format!("scripted upstream status {status}")))
        }
    }
}

/// Answer chat completions on `server` with a success body
pub async fn mount_chat_success(server: &MockServer, model: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(model)))
        .mount(server)
        .await;
}

/// Answer embeddings on `server` with a success body
pub async fn mount_embeddings_success(server: &MockServer, model: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(model)))
        .mount(server)
        .await;
}

/// Answer every POST on `server` with `status` and an OpenAI error envelope
pub async fn mount_upstream_error(server: &MockServer, status: u16, message: &str, code: &str) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_json(error_body(message, code)))
        .mount(server)
        .await;
}

/// Report `amount` for `group` from the billing service on `server`
pub async fn mount_balance(server: &MockServer, group: &str, amount: f64) {
    Mock::given(method("GET"))
        .and(path("/balance"))
        .and(query_param("group", group))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "amount": amount,
            "identity": format!("{group}-identity")
        })))
        .mount(server)
        .await;
}

/// Accept every consume call on `server`
pub async fn mount_consume(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/consume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(server)
        .await;
}

/// Bodies of every consume call received by `server`
pub async fn consumed_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/consume")
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{chat_request, test_channel, TEST_MODEL};

    #[tokio::test]
    async fn test_scripted_executor_follows_script() {
        let executor = ScriptedExecutor::new().script(1, [500, 200]).always(2, 429);
        let request = chat_request(TEST_MODEL);

        let first = executor.execute(&test_channel(1, 1), &request).await;
        assert_eq!(first.expect_err("scripted failure").status, 500);
        assert!(executor.execute(&test_channel(1, 1), &request).await.is_ok());
        assert!(executor.execute(&test_channel(1, 1), &request).await.is_ok());

        let limited = executor.execute(&test_channel(2, 1), &request).await;
        assert_eq!(limited.expect_err("always 429").status, 429);
        assert_eq!(executor.calls(), vec![1, 1, 1, 2]);
    }
}
