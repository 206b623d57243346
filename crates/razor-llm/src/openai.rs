use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    ContentPart, FinishReason, Message, ProviderAdapter, Request, Response, Role, ToolCallResult,
    Usage,
};
use razor_types::RazorError;

const PROVIDER: &str = "openai";

/// Chat-completions adapter. Works against any OpenAI-compatible endpoint
/// via [`with_base_url`](OpenAiAdapter::with_base_url).
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    /// Reads the API key from a named environment variable.
    pub fn from_env_var(var: &str) -> Result<Self, RazorError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key)),
            _ => Err(RazorError::AuthError {
                provider: PROVIDER.into(),
            }),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Outgoing body
// ---------------------------------------------------------------------------

fn request_body(request: &Request) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().flat_map(wire_messages).collect::<Vec<_>>(),
    });
    if let Some(limit) = request.max_tokens {
        body["max_tokens"] = limit.into();
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = temperature.into();
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
    }
    body
}

/// A tool turn with several results becomes one wire message per result.
fn wire_messages(msg: &Message) -> Vec<Value> {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => {
            return msg
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } => Some(json!({
                        "role": "tool",
                        "tool_call_id": tool_call_id,
                        "content": content,
                    })),
                    _ => None,
                })
                .collect()
        }
    };

    let mut wire = json!({ "role": role, "content": msg.text() });
    let calls: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments.to_string() },
            })),
            _ => None,
        })
        .collect();
    if !calls.is_empty() {
        wire["tool_calls"] = Value::Array(calls);
    }
    vec![wire]
}

// ---------------------------------------------------------------------------
// Incoming body
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn into_response(completion: Completion) -> Result<Response, RazorError> {
    let Some(choice) = completion.choices.into_iter().next() else {
        return Err(RazorError::ProviderError {
            provider: PROVIDER.into(),
            status: 200,
            message: "response contained no choices".into(),
            retryable: false,
        });
    };

    // Arguments arrive as a JSON string; unparsable ones become `{}` so the
    // tool reports the missing parameters itself.
    let tool_calls: Vec<ToolCallResult> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCallResult {
            id: call.id,
            name: call.function.name,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| json!({})),
        })
        .collect();

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("length") => FinishReason::MaxTokens,
        Some("tool_calls") => FinishReason::ToolUse,
        _ if !tool_calls.is_empty() => FinishReason::ToolUse,
        _ => FinishReason::EndTurn,
    };

    let (input_tokens, output_tokens) = completion
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(Response {
        id: completion.id,
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: Usage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
        model: completion.model,
        finish_reason,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn classify(status: u16, body: &str) -> RazorError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map_or_else(|| body.to_string(), str::to_string);
    let provider = PROVIDER.to_string();

    match status {
        401 | 403 => RazorError::AuthError { provider },
        429 => RazorError::RateLimited {
            provider,
            retry_after_ms: parsed
                .as_ref()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map_or(1_000, |secs| (secs * 1_000.0) as u64),
        },
        408 | 504 => RazorError::RequestTimeout {
            provider,
            timeout_ms: 0,
        },
        400 if body.contains("context_length_exceeded") => RazorError::ContextLengthExceeded {
            provider,
            message: detail,
        },
        _ => RazorError::ProviderError {
            provider,
            status,
            message: detail,
            retryable: matches!(status, 500 | 502 | 503),
        },
    }
}

fn transport_error(e: reqwest::Error) -> RazorError {
    if e.is_timeout() {
        RazorError::RequestTimeout {
            provider: PROVIDER.into(),
            timeout_ms: 0,
        }
    } else {
        RazorError::ProviderError {
            provider: PROVIDER.into(),
            status: e.status().map_or(0, |s| s.as_u16()),
            message: e.to_string(),
            retryable: true,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
        let reply = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = reply.status().as_u16();
        let text = reply.text().await.map_err(transport_error)?;
        if !(200..300).contains(&status) {
            return Err(classify(status, &text));
        }

        let completion: Completion =
            serde_json::from_str(&text).map_err(|e| RazorError::ProviderError {
                provider: PROVIDER.into(),
                status,
                message: format!("unreadable completion body: {e}"),
                retryable: false,
            })?;
        into_response(completion)
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDefinition;

    fn parse(body: Value) -> Result<Response, RazorError> {
        into_response(serde_json::from_value(body).unwrap())
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let adapter = OpenAiAdapter::new("k".into()).with_base_url("http://127.0.0.1:11434/");
        assert_eq!(adapter.endpoint(), "http://127.0.0.1:11434/v1/chat/completions");
    }

    #[test]
    fn conversation_with_tool_round_is_flattened() {
        let call = ToolCallResult {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: json!({"file_path": "billing.py"}),
        };
        let mut req = Request::new(
            "gpt-4o",
            vec![
                Message::system("You port code."),
                Message::user("Port billing.py"),
                Message::assistant_with_tool_calls("", std::slice::from_ref(&call)),
                Message::tool_result("call_1", "def total(): ...", false),
            ],
        )
        .with_tools(vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: json!({"type": "object"}),
        }]);
        req.max_tokens = Some(512);

        let body = request_body(&req);
        let wire = body["messages"].as_array().unwrap();
        let roles: Vec<&str> = wire.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool"]);
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"file_path":"billing.py"}"#
        );
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn plain_completion_is_parsed() {
        let resp = parse(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"message": {"content": "Done."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .unwrap();
        assert_eq!(resp.text, "Done.");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn tool_call_completion_is_parsed() {
        let resp = parse(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "c9", "function": {"name": "write_file", "arguments": "{\"file_path\":\"lib.rs\"}"}},
                        {"id": "c10", "function": {"name": "read_file", "arguments": "not json"}}
                    ]
                }
            }]
        }))
        .unwrap();
        assert_eq!(resp.text, "");
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
        assert_eq!(resp.tool_calls[0].arguments["file_path"], "lib.rs");
        assert_eq!(resp.tool_calls[1].arguments, json!({}));
        assert_eq!(resp.usage.total_tokens, 0);
    }

    #[test]
    fn truncated_completion_reports_max_tokens() {
        let resp = parse(json!({
            "choices": [{"message": {"content": "fn ma"}, "finish_reason": "length"}]
        }))
        .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
    }

    #[test]
    fn empty_choices_is_permanent_error() {
        let err = parse(json!({"id": "x", "choices": []})).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        let rate = classify(429, r#"{"error":{"message":"slow down","retry_after":2.5}}"#);
        assert!(matches!(rate, RazorError::RateLimited { retry_after_ms: 2500, .. }));
        assert!(rate.is_retryable());

        assert!(classify(502, "bad gateway").is_retryable());
        assert!(!classify(404, "no such model").is_retryable());

        let context = classify(
            400,
            r#"{"error":{"message":"too long","code":"context_length_exceeded"}}"#,
        );
        match &context {
            RazorError::ContextLengthExceeded { message, .. } => assert_eq!(message, "too long"),
            other => panic!("expected ContextLengthExceeded, got {other:?}"),
        }
        assert!(context.is_terminal());

        let auth = classify(403, "");
        assert!(auth.is_terminal());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn blank_key_variable_is_auth_error() {
        std::env::set_var("RAZOR_OPENAI_TEST_BLANK_KEY", "  ");
        let err = OpenAiAdapter::from_env_var("RAZOR_OPENAI_TEST_BLANK_KEY").unwrap_err();
        assert!(matches!(err, RazorError::AuthError { .. }));
    }
}
