//! Test fixtures and sample data for integration tests

use gateway_core::{Channel, Group, GroupStatus, RelayMode, RelayRequest, Token, Usage};
use serde_json::{json, Value};

/// Model served by every fixture channel
pub const TEST_MODEL: &str = "gpt-4o-mini";

/// Key of the default fixture token, without the `sk-` prefix
pub const TEST_TOKEN_KEY: &str = "integration-key";

/// Group owning the default fixture token
pub const TEST_GROUP: &str = "integration-group";

/// Channel serving [`TEST_MODEL`] with the given priority
pub fn test_channel(id: i64, priority: i32) -> Channel {
    Channel::new(id, format!("channel-{id}"), format!("sk-upstream-{id}"))
        .with_models([TEST_MODEL])
        .with_priority(priority)
}

/// Channel pointed at a mock upstream
pub fn upstream_channel(id: i64, priority: i32, base_url: &str) -> Channel {
    test_channel(id, priority).with_base_url(base_url)
}

/// Unlimited, enabled token in [`TEST_GROUP`]
pub fn test_token() -> Token {
    Token::new(1, TEST_TOKEN_KEY, TEST_GROUP)
}

/// Enabled group with no per-group limits
pub fn test_group() -> Group {
    Group::new(TEST_GROUP)
}

/// Group the billing and rate-limit tiers treat as internal
pub fn internal_group(id: &str) -> Group {
    Group::new(id).with_status(GroupStatus::Internal)
}

/// `Authorization` header value for a stored key
pub fn bearer(key: &str) -> String {
    format!("Bearer sk-{key}")
}

/// Minimal chat completion payload
pub fn chat_payload(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello, how are you?"}]
    })
}

/// Minimal embeddings payload
pub fn embeddings_payload(model: &str) -> Value {
    json!({
        "model": model,
        "input": "The quick brown fox"
    })
}

/// Chat relay request for `model`
pub fn chat_request(model: &str) -> RelayRequest {
    RelayRequest::from_payload(RelayMode::ChatCompletions, chat_payload(model))
        .expect("fixture payload is valid")
}

/// Usage reported by fixture upstreams
pub fn sample_usage() -> Usage {
    Usage {
        prompt_tokens: 20,
        completion_tokens: 10,
        total_tokens: 30,
    }
}

/// OpenAI-style chat completion body
pub fn completion_body(model: &str) -> Value {
    let usage = sample_usage();
    json!({
        "id": "chatcmpl-integration",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "I'm doing well, thank you!"},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens
        }
    })
}

/// OpenAI-style embeddings body
pub fn embeddings_body(model: &str) -> Value {
    json!({
        "object": "list",
        "model": model,
        "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
        "usage": {"prompt_tokens": 5, "total_tokens": 5}
    })
}

/// OpenAI-style error envelope
pub fn error_body(message: &str, code: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": "invalid_request_error",
            "code": code
        }
    })
}
