//! Query orchestration between one MCP session and one Gemini model
//!
//! A query becomes a short conversation: the model either answers in text or
//! asks for tool calls, which are executed on the MCP server and fed back,
//! until it answers or the turn budget runs out. Failures never escape as
//! errors; they end up as bracketed notes in the answer text.

use serde_json::{json, Value};

use crate::config::gemini::DEFAULT_MAX_TURNS;
use crate::config::WorkflowConfig;
use crate::llm::schema::prepare_tools;
use crate::llm::types::{Content, FunctionCall, Part, Tool as LlmTool, ROLE_MODEL};
use crate::llm::GeminiClient;
use crate::mcp::types::CallToolResult;
use crate::mcp::McpClient;

/// Placeholder replaced by the user query in prompt templates
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Longest tool result shown to the user
const RESULT_SNIPPET_CHARS: usize = 150;

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Workflow or server name, used in logs and banners
    pub name: String,

    /// Prompt template containing `{query}`
    pub prompt_template: String,

    /// Upper bound on model round trips per query
    pub max_turns: u32,
}

impl SessionSettings {
    /// Settings for a session started directly against a server
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: QUERY_PLACEHOLDER.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Settings taken from a workflow definition
    pub fn from_workflow(name: impl Into<String>, workflow: &WorkflowConfig) -> Self {
        Self {
            name: name.into(),
            prompt_template: workflow.initial_prompt_template.clone(),
            max_turns: workflow.max_conversation_turns.max(1),
        }
    }

    /// The first prompt sent for `query`
    pub fn render_prompt(&self, query: &str) -> String {
        self.prompt_template.replace(QUERY_PLACEHOLDER, query)
    }
}

/// Drives queries through the model and the MCP server
#[derive(Debug)]
pub struct Engine {
    settings: SessionSettings,
    llm: GeminiClient,
    mcp: McpClient,

    /// Declarations derived from the MCP tool list
    tools: Option<Vec<LlmTool>>,
}

impl Engine {
    /// Create an engine over a connected MCP session
    pub fn new(settings: SessionSettings, llm: GeminiClient, mcp: McpClient) -> Self {
        let tools = prepare_tools(mcp.tools());
        tracing::info!(
            "Engine ready for '{}'. Tools available: {}",
            settings.name,
            mcp.tools().len()
        );

        Self {
            settings,
            llm,
            mcp,
            tools,
        }
    }

    /// Session settings
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The model client
    pub fn llm(&self) -> &GeminiClient {
        &self.llm
    }

    /// The MCP session
    pub fn mcp(&self) -> &McpClient {
        &self.mcp
    }

    /// Re-list the server's tools and rebuild the declarations
    pub async fn refresh_tools(&mut self) -> Result<(), crate::error::McpError> {
        self.mcp.list_tools().await?;
        self.tools = prepare_tools(self.mcp.tools());
        Ok(())
    }

    /// Run one user query to completion and return the answer text
    pub async fn process_query(&mut self, query: &str) -> String {
        tracing::info!(
            "Processing query for '{}': '{}'",
            self.settings.name,
            snippet(query, 70)
        );

        if !self.mcp.is_connected() {
            tracing::error!("MCP session for '{}' is not connected", self.settings.name);
            return "Error: MCP session is not connected.".to_string();
        }

        let prompt = self.settings.render_prompt(query);
        tracing::debug!("Initial prompt for LLM: {}", prompt);

        let mut history = vec![Content::user_text(prompt)];
        let mut answer: Vec<String> = Vec::new();
        // Text the model produced alongside tool calls
        let mut interim: Vec<String> = Vec::new();
        let max_turns = self.settings.max_turns;
        let mut finished = false;

        for turn in 1..=max_turns {
            tracing::info!("'{}', Turn {}/{}", self.settings.name, turn, max_turns);
            tracing::debug!("Conversation history length before LLM call: {}", history.len());

            let response = match self.llm.generate(&history, self.tools.as_deref()).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Error communicating with LLM in '{}': {}", self.settings.name, e);
                    tracing::info!(target: "user", "[Error communicating with AI model: {}]", e);
                    answer.push(format!("\n[Error communicating with LLM: {}]", e));
                    finished = true;
                    break;
                }
            };

            let Some(candidate) = response.candidates.first() else {
                let note = match response.block_reason() {
                    Some(reason) => format!(
                        "[AI model returned no response candidates (prompt blocked: {}).]",
                        reason
                    ),
                    None => "[AI model returned no response candidates.]".to_string(),
                };
                tracing::warn!("LLM returned no candidates for '{}'", self.settings.name);
                tracing::info!(target: "user", "{}", note);
                answer.push(format!("\n{}", note));
                finished = true;
                break;
            };

            let mut content = candidate.content.clone().unwrap_or_default();
            if content.role.is_none() {
                content.role = Some(ROLE_MODEL.to_string());
            }
            tracing::debug!(
                "LLM response content (turn {}, finish reason {}): {:?}",
                turn,
                candidate.finish_reason.as_deref().unwrap_or("unspecified"),
                content
            );

            let calls: Vec<FunctionCall> = content
                .parts
                .iter()
                .filter_map(|p| p.function_call.clone())
                .collect();
            let texts: Vec<String> = content
                .parts
                .iter()
                .filter(|p| !p.is_thought())
                .filter_map(|p| p.text.clone())
                .filter(|t| !t.trim().is_empty())
                .collect();
            for text in &texts {
                tracing::info!(target: "user", "LLM: {}", text.trim());
            }
            history.push(content);

            if calls.is_empty() {
                tracing::info!(
                    "No function call in LLM response (turn {}). Assuming final answer.",
                    turn
                );
                answer.extend(texts);
                if answer.iter().all(|p| p.trim().is_empty()) {
                    tracing::warn!("LLM provided no text and no function call");
                    answer.push("[AI model provided no further text or actions.]".to_string());
                }
                finished = true;
                break;
            }

            interim.extend(texts);
            let mut responses = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = self.execute_call(call).await;
                tracing::debug!("Adding tool response for '{}' to history: {}", call.name, result);
                responses.push(Part::function_response(call.name.clone(), result));
            }
            history.push(Content::function_responses(responses));
        }

        if !finished {
            tracing::warn!(
                "Max turns ({}) reached for '{}'",
                max_turns,
                self.settings.name
            );
            if interim.is_empty() {
                answer.push("\n[Max interaction turns reached. No final text generated.]".to_string());
            } else {
                answer.append(&mut interim);
                answer.push("\n[Max interaction turns reached.]".to_string());
            }
        }

        let final_text = answer.concat().trim().to_string();
        tracing::info!("Final response for query: '{}'", snippet(&final_text, 100));
        final_text
    }

    /// Execute one function call on the MCP server, producing the
    /// function-response payload for the model
    async fn execute_call(&mut self, call: &FunctionCall) -> Value {
        let name = call.name.as_str();
        let args = match &call.args {
            Value::Null => json!({}),
            other => other.clone(),
        };

        let shown_args = match &args {
            Value::Object(map) if map.is_empty() => String::new(),
            other => other.to_string(),
        };
        tracing::info!(target: "user", "LLM wants to call: {}({})", name, shown_args);
        tracing::info!("LLM requests tool call: '{}' with args: {}", name, args);

        if !self.mcp.has_tool(name) {
            let message = format!(
                "Tool '{}' requested by LLM but not found on server '{}'.",
                name,
                self.mcp.server_name()
            );
            tracing::error!("{}", message);
            tracing::info!(target: "user", "[Tool '{}' not found.]", name);
            return json!({ "error": message });
        }

        match self.mcp.call_tool(name, args).await {
            Ok(result) => {
                let text = result.joined_text();
                tracing::info!(
                    target: "user",
                    "Tool {} executed. Result snippet: {}",
                    name,
                    snippet(&text.replace('\n', " "), RESULT_SNIPPET_CHARS)
                );
                tracing::info!("Tool '{}' executed by '{}'", name, self.mcp.server_name());
                tracing::debug!("Full result from tool '{}': {}", name, text);
                tool_response(&result)
            }
            Err(e) => {
                let message = format!("Error executing MCP tool '{}': {}", name, e);
                tracing::error!("{}", message);
                tracing::info!(target: "user", "[Error calling tool {}: {}]", name, e);
                json!({ "error": message })
            }
        }
    }

    /// Close the MCP session
    pub async fn close(&mut self) {
        tracing::info!("Closing services for '{}'", self.settings.name);
        self.mcp.close().await;
    }
}

/// Function-response payload for a tool result
///
/// Errors become `{"error": text}`, structured object output is passed
/// through, everything else becomes `{"output": text}`.
pub fn tool_response(result: &CallToolResult) -> Value {
    if result.is_error {
        return json!({ "error": result.joined_text() });
    }
    match &result.structured_content {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({ "output": result.joined_text() }),
    }
}

/// First `max` characters of `text`, with "..." appended when cut
pub fn snippet(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ToolResultContent;

    #[test]
    fn test_render_prompt() {
        let settings = SessionSettings {
            name: "wf".to_string(),
            prompt_template: "Context: {query}. Repeat: {query}".to_string(),
            max_turns: 3,
        };
        assert_eq!(settings.render_prompt("hi"), "Context: hi. Repeat: hi");
        assert_eq!(SessionSettings::direct("srv").render_prompt("plain"), "plain");
    }

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("short", 10), "short");
        assert_eq!(snippet("abcdef", 3), "abc...");
        assert_eq!(snippet("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_tool_response_shapes() {
        let ok = CallToolResult {
            content: vec![
                ToolResultContent::Text { text: "a".to_string() },
                ToolResultContent::Text { text: "b".to_string() },
            ],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(tool_response(&ok), json!({"output": "a\nb"}));

        let failed = CallToolResult::error("boom");
        assert_eq!(tool_response(&failed), json!({"error": "boom"}));

        let structured = CallToolResult {
            structured_content: Some(json!({"temperature": 21})),
            ..CallToolResult::text("21C")
        };
        assert_eq!(tool_response(&structured), json!({"temperature": 21}));
    }
}
