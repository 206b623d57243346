use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

/// One entry of a conversation history. Messages are plain data so a
/// half-finished conversation can be checkpointed and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Assistant turn that requested tool executions.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: &[ToolCallResult]) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentPart::Text { text });
        }
        content.extend(calls.iter().map(|c| ContentPart::ToolCall {
            id: c.id.clone(),
            name: c.name.clone(),
            arguments: c.arguments.clone(),
        }));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenated text parts of this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub provider: Option<String>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            provider: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub text: String,
    pub tool_calls: Vec<ToolCallResult>,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: FinishReason,
}

impl Response {
    /// A plain text response with no tool calls.
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            tool_calls: Vec::new(),
            usage: Usage::default(),
            model: model.into(),
            finish_reason: FinishReason::EndTurn,
        }
    }

    /// A response requesting the given tool calls.
    pub fn tool_use(model: impl Into<String>, tool_calls: Vec<ToolCallResult>) -> Self {
        Self {
            id: String::new(),
            text: String::new(),
            tool_calls,
            usage: Usage::default(),
            model: model.into(),
            finish_reason: FinishReason::ToolUse,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, path: &str) -> ToolCallResult {
        ToolCallResult {
            id: id.into(),
            name: "read_file".into(),
            arguments: json!({ "file_path": path }),
        }
    }

    #[test]
    fn tool_turn_without_text_holds_only_calls() {
        let msg = Message::assistant_with_tool_calls("", &[call("a", "x.py"), call("b", "y.py")]);
        assert_eq!(msg.role, Role::Assistant);
        let ids: Vec<&str> = msg
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn tool_turn_with_text_keeps_text_first() {
        let msg = Message::assistant_with_tool_calls("Reading it now.", &[call("a", "x.py")]);
        assert!(matches!(&msg.content[0], ContentPart::Text { text } if text == "Reading it now."));
        assert_eq!(msg.text(), "Reading it now.");
    }

    #[test]
    fn tool_results_are_not_text() {
        let msg = Message::tool_result("call_7", "contents", true);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.text(), "");
        assert!(matches!(
            &msg.content[0],
            ContentPart::ToolResult { tool_call_id, is_error: true, .. } if tool_call_id == "call_7"
        ));
    }

    #[test]
    fn history_survives_a_json_round_trip() {
        let history = vec![
            Message::system("You document code."),
            Message::assistant_with_tool_calls("", &[call("c1", "app.py")]),
            Message::tool_result("c1", "print('hi')", false),
        ];
        let stored = serde_json::to_string(&history).unwrap();
        assert!(stored.contains(r#""type":"tool_call""#));
        assert!(stored.contains(r#""role":"tool""#));
        let restored: Vec<Message> = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, history);
    }

    #[test]
    fn canned_responses() {
        let plain = Response::text("m", "hello");
        assert_eq!(plain.finish_reason, FinishReason::EndTurn);
        assert!(plain.tool_calls.is_empty());

        let tools = Response::tool_use("m", vec![call("c", "a.py")]);
        assert_eq!(tools.finish_reason, FinishReason::ToolUse);
        assert_eq!(tools.text, "");
    }

    #[test]
    fn request_builders() {
        let req = Request::new("gpt-4o", vec![Message::user("hi")]).with_temperature(0.2);
        assert_eq!(req.temperature, Some(0.2));
        assert!(req.tools.is_empty());
        assert!(req.provider.is_none() && req.max_tokens.is_none());
    }
}
