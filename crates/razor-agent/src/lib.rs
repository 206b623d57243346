//! Generation + tool execution loop.
//!
//! `ToolSession` runs the cycle every tool-using pipeline call needs: build
//! request from history -> call the generator -> execute requested tools ->
//! append results -> repeat until the generator stops asking for tools.
//! History is plain serializable data so callers can checkpoint it.

use std::sync::Arc;

use razor_llm::{Generate, Message, Request, ToolCallResult};
use razor_tools::truncation::{truncate_output, TruncationMode};
use razor_tools::{ExecutionEnvironment, ToolRegistry};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a tool session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_prompt: String,
    /// Maximum number of generation rounds per `process_input` call.
    pub max_tool_rounds: usize,
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            system_prompt: String::new(),
            max_tool_rounds: 25,
            temperature: Some(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

/// A single turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallResult>,
    },
    ToolResults {
        results: Vec<ToolResultEntry>,
    },
}

/// Outcome of one requested tool call, as fed back to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl Turn {
    /// Append this turn's wire messages to `out`.
    fn extend_messages(&self, out: &mut Vec<Message>) {
        match self {
            Turn::User { content } => out.push(Message::user(content)),
            Turn::Assistant { content, tool_calls } if tool_calls.is_empty() => {
                out.push(Message::assistant(content))
            }
            Turn::Assistant { content, tool_calls } => {
                out.push(Message::assistant_with_tool_calls(content, tool_calls))
            }
            Turn::ToolResults { results } => out.extend(
                results
                    .iter()
                    .map(|r| Message::tool_result(&r.tool_call_id, &r.content, r.is_error)),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// ToolSession
// ---------------------------------------------------------------------------

/// Longest tool output returned to the generator in one result.
const TOOL_OUTPUT_LIMIT: usize = 30_000;

pub struct ToolSession {
    generator: Arc<dyn Generate>,
    tools: ToolRegistry,
    env: Arc<dyn ExecutionEnvironment>,
    history: Vec<Turn>,
    config: SessionConfig,
    tool_calls_executed: usize,
    rounds_exhausted: bool,
}

impl ToolSession {
    pub fn new(
        generator: Arc<dyn Generate>,
        tools: ToolRegistry,
        env: Arc<dyn ExecutionEnvironment>,
        config: SessionConfig,
    ) -> Self {
        Self {
            generator,
            tools,
            env,
            history: Vec::new(),
            config,
            tool_calls_executed: 0,
            rounds_exhausted: false,
        }
    }

    /// Continue from a previously recorded history.
    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Turn> {
        self.history
    }

    /// Tool calls executed over the session's lifetime.
    pub fn tool_calls_executed(&self) -> usize {
        self.tool_calls_executed
    }

    /// Whether the last `process_input` stopped on the round limit while the
    /// generator still wanted tools.
    pub fn rounds_exhausted(&self) -> bool {
        self.rounds_exhausted
    }

    /// Feed `input` to the generator, running the tools it asks for until it
    /// answers without tool calls. Returns that answer, or the latest text
    /// when `max_tool_rounds` runs out first.
    pub async fn process_input(&mut self, input: &str) -> razor_types::Result<String> {
        self.history.push(Turn::User {
            content: input.to_string(),
        });
        self.rounds_exhausted = false;

        let limit = self.config.max_tool_rounds;
        let mut reply = String::new();
        for round in 1..=limit {
            let response = self.generator.complete(&self.request()).await?;
            let wants_tools = !response.tool_calls.is_empty();
            tracing::debug!(round, wants_tools, finish = ?response.finish_reason, model = %self.config.model, "Tool session round");

            reply = response.text;
            let calls = response.tool_calls;
            self.history.push(Turn::Assistant {
                content: reply.clone(),
                tool_calls: calls.clone(),
            });

            if !wants_tools {
                return Ok(reply);
            }
            if round == limit {
                tracing::warn!(limit, "Tool round limit reached; using the last reply");
                self.rounds_exhausted = true;
                break;
            }
            let results = self.run_tools(&calls).await;
            self.history.push(Turn::ToolResults { results });
        }
        Ok(reply)
    }

    fn request(&self) -> Request {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(Message::system(&self.config.system_prompt));
        }
        for turn in &self.history {
            turn.extend_messages(&mut messages);
        }

        let tools = self
            .tools
            .definitions()
            .into_iter()
            .map(|d| razor_llm::ToolDefinition {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect();

        let mut request = Request::new(&self.config.model, messages).with_tools(tools);
        request.temperature = self.config.temperature;
        request
    }

    async fn run_tools(&mut self, calls: &[ToolCallResult]) -> Vec<ToolResultEntry> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.tool_calls_executed += 1;
            let (content, is_error) = self.run_tool(call).await;
            results.push(ToolResultEntry {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content,
                is_error,
            });
        }
        results
    }

    /// Unknown names and tool failures become error results for the
    /// generator to react to; they never end the session.
    async fn run_tool(&self, call: &ToolCallResult) -> (String, bool) {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Generator requested an unknown tool");
            return (format!("Unknown tool: {}", call.name), true);
        };
        tracing::debug!(tool = %call.name, id = %call.id, "Running tool");
        match tool.execute(call.arguments.clone(), self.env.as_ref()).await {
            Ok(output) => (
                truncate_output(&output, TOOL_OUTPUT_LIMIT, TruncationMode::HeadTail),
                false,
            ),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "Tool failed");
                (format!("Error: {}", e), true)
            }
        }
    }
}

/// Single generation call without tools. Returns the response text.
pub async fn ask(
    generator: &dyn Generate,
    model: &str,
    system_prompt: &str,
    user_input: &str,
) -> razor_types::Result<String> {
    let mut messages = Vec::with_capacity(2);
    if !system_prompt.is_empty() {
        messages.push(Message::system(system_prompt));
    }
    messages.push(Message::user(user_input));
    let request = Request::new(model, messages).with_temperature(0.0);
    Ok(generator.complete(&request).await?.text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use razor_llm::Response;
    use razor_tools::{LocalExecutionEnvironment, Tool, ToolDefinition as ToolsToolDef, ToolSet};
    use razor_types::RazorError;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Pops scripted responses in order and records every request it saw.
    struct SequenceGenerator {
        responses: Mutex<VecDeque<Response>>,
        requests: Mutex<Vec<Request>>,
    }

    impl SequenceGenerator {
        fn new(responses: Vec<Response>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from(responses)),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generate for SequenceGenerator {
        async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut queue = self.responses.lock().unwrap();
            Ok(queue
                .pop_front()
                .unwrap_or_else(|| Response::text("mock-model", "No more responses")))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolsToolDef {
            ToolsToolDef {
                name: "echo".to_string(),
                description: "Returns its text argument".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                }),
            }
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
            _env: &dyn ExecutionEnvironment,
        ) -> razor_types::Result<String> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            Ok(text.to_string())
        }
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallResult {
        ToolCallResult {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn env() -> Arc<dyn ExecutionEnvironment> {
        Arc::new(LocalExecutionEnvironment::new("/tmp"))
    }

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry
    }

    #[tokio::test]
    async fn plain_reply_ends_session_after_one_call() {
        let generator = SequenceGenerator::new(vec![Response::text("m", "Defines the User model.")]);
        let mut session =
            ToolSession::new(generator.clone(), ToolRegistry::new(), env(), SessionConfig::default());

        let result = session.process_input("Summarize models.py").await.unwrap();

        assert_eq!(result, "Defines the User model.");
        assert_eq!(session.history().len(), 2);
        assert!(matches!(&session.history()[0], Turn::User { content } if content == "Summarize models.py"));
        assert_eq!(generator.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_before_final_reply() {
        let generator = SequenceGenerator::new(vec![
            Response::tool_use("m", vec![call("tc-1", "echo", serde_json::json!({"text": "ping"}))]),
            Response::text("m", "ping echoed"),
        ]);
        let config = SessionConfig {
            system_prompt: "Be brief.".into(),
            ..Default::default()
        };
        let mut session = ToolSession::new(generator.clone(), echo_registry(), env(), config);

        let result = session.process_input("Echo ping").await.unwrap();
        assert_eq!(result, "ping echoed");
        assert_eq!(session.tool_calls_executed(), 1);

        // History: User, Assistant(tool_call), ToolResults, Assistant(final)
        assert_eq!(session.history().len(), 4);
        assert!(matches!(
            &session.history()[2],
            Turn::ToolResults { results } if results.len() == 1 && !results[0].is_error && results[0].content == "ping"
        ));

        // The second request carries system + user + assistant + tool result.
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].tools.len(), 1);
        assert_eq!(requests[1].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn round_limit_returns_latest_reply() {
        let endless: Vec<Response> = (0..10)
            .map(|i| {
                let mut r = Response::tool_use(
                    "m",
                    vec![call(&format!("tc-{i}"), "echo", serde_json::json!({"text": "loop"}))],
                );
                r.text = format!("round {i}");
                r
            })
            .collect();
        let generator = SequenceGenerator::new(endless);
        let config = SessionConfig {
            max_tool_rounds: 3,
            ..Default::default()
        };
        let mut session = ToolSession::new(generator, echo_registry(), env(), config);

        let result = session.process_input("Keep reading").await.unwrap();
        assert_eq!(result, "round 2");
        assert!(session.rounds_exhausted());
        let assistant_count = session
            .history()
            .iter()
            .filter(|t| matches!(t, Turn::Assistant { .. }))
            .count();
        assert_eq!(assistant_count, 3);
    }

    #[tokio::test]
    async fn near_miss_tool_name_is_not_dispatched() {
        // "echo_extended" contains "echo" but must not dispatch to it.
        let generator = SequenceGenerator::new(vec![
            Response::tool_use("m", vec![call("tc-1", "echo_extended", serde_json::json!({}))]),
            Response::text("m", "Carrying on without it."),
        ]);
        let mut session =
            ToolSession::new(generator, echo_registry(), env(), SessionConfig::default());

        let result = session.process_input("Read the legacy file").await.unwrap();
        assert_eq!(result, "Carrying on without it.");

        let results = session
            .history()
            .iter()
            .find_map(|t| match t {
                Turn::ToolResults { results } => Some(results),
                _ => None,
            })
            .unwrap();
        assert!(results[0].is_error);
        assert!(results[0].content.contains("Unknown tool: echo_extended"));
    }

    #[tokio::test]
    async fn writer_toolset_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let generator = SequenceGenerator::new(vec![
            Response::tool_use(
                "m",
                vec![call(
                    "w-1",
                    "write_file",
                    serde_json::json!({"file_path": "src/lib.rs", "content": "pub fn f() {}"}),
                )],
            ),
            Response::text("m", "Written."),
        ]);
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));
        let registry = ToolSet::Writer.build_registry(dir.path());
        let mut session = ToolSession::new(generator, registry, env.clone(), SessionConfig::default());

        session.process_input("Write it").await.unwrap();
        let written = env
            .read_file(&dir.path().join("src/lib.rs"))
            .await
            .unwrap();
        assert_eq!(written, "pub fn f() {}");
        assert!(env.file_exists(Path::new("src/lib.rs")).await.unwrap());
    }

    #[tokio::test]
    async fn with_history_replays_previous_turns() {
        let generator = SequenceGenerator::new(vec![Response::text("m", "revised")]);
        let previous = vec![
            Turn::User {
                content: "propose".into(),
            },
            Turn::Assistant {
                content: "draft".into(),
                tool_calls: vec![],
            },
        ];
        let mut session = ToolSession::new(
            generator.clone(),
            ToolRegistry::new(),
            env(),
            SessionConfig::default(),
        )
        .with_history(previous);

        let result = session.process_input("critique: add tests").await.unwrap();
        assert_eq!(result, "revised");
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 3);
        assert_eq!(requests[0].messages[1].text(), "draft");
    }

    #[test]
    fn turns_serialize_with_kind_tag() {
        let turn = Turn::User {
            content: "hi".into(),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["kind"], "user");
        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }

    #[tokio::test]
    async fn ask_sends_system_and_user() {
        let generator = SequenceGenerator::new(vec![Response::text("m", "summary")]);
        let text = ask(generator.as_ref(), "m", "You summarize.", "code")
            .await
            .unwrap();
        assert_eq!(text, "summary");
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 2);
        assert!(requests[0].tools.is_empty());
    }
}
