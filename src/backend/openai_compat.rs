//! Chat-completions client for the local model and the headless pair.
//! All three speak the same `/chat/completions` wire format, so a single
//! implementation covers them.

use super::health::{HealthRecord, HealthRegistry};
use super::traits::{Backend, PROBE_TIMEOUT};
use super::{BackendConfig, BackendId};
use crate::error::ErrorKind;
use crate::task::{
    ErrorRecord, ExecutionResult, Task, payload_invoked_tools, payload_text_len, score_confidence,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct OpenAiCompatBackend {
    id: BackendId,
    config: BackendConfig,
    registry: Arc<HealthRegistry>,
    /// Pre-computed `Bearer` header value (avoids `format!` per request).
    cached_auth: Option<String>,
    chat_url: String,
    models_url: String,
    client: Client,
}

impl OpenAiCompatBackend {
    pub fn new(id: BackendId, config: BackendConfig, registry: Arc<HealthRegistry>) -> Self {
        let base = config.endpoint.trim_end_matches('/').to_string();
        let chat_url = format!("{base}/chat/completions");
        let models_url = format!("{base}/models");
        let cached_auth = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| format!("Bearer {key}"));

        Self {
            id,
            config,
            registry,
            cached_auth,
            chat_url,
            models_url,
            client: Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(auth) = &self.cached_auth {
            req.header("Authorization", auth)
        } else {
            req
        }
    }

    fn build_request(&self, task: &Task) -> ChatRequest {
        let mut messages = vec![Message {
            role: "system",
            content: SYSTEM_PROMPT.to_string(),
        }];
        messages.push(Message {
            role: "user",
            content: format_task_prompt(task),
        });

        let tools = tool_definitions(task);

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
            tools: if tools.is_empty() { None } else { Some(tools) },
        }
    }

    fn request_timeout(&self, task: &Task) -> Duration {
        match task.remaining_deadline(chrono::Utc::now()) {
            Some(remaining) => remaining.min(self.config.timeout()),
            None => self.config.timeout(),
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn max_tokens(&self) -> u64 {
        self.config.max_tokens
    }

    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> ExecutionResult {
        let started = Instant::now();

        // Envelope check happens before any wire call.
        if task.estimated_tokens > self.config.max_tokens {
            return ExecutionResult::failed(
                &task.id,
                self.id.to_string(),
                0,
                ErrorRecord::new(
                    ErrorKind::TooLarge,
                    format!(
                        "estimated {} tokens exceeds {} envelope of {}",
                        task.estimated_tokens, self.id, self.config.max_tokens
                    ),
                ),
            );
        }

        let request = self.build_request(task);
        let timeout = self.request_timeout(task);

        let send = self
            .apply_auth(self.client.post(&self.chat_url))
            .timeout(timeout)
            .json(&request)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return ExecutionResult::failed(
                    &task.id,
                    self.id.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(ErrorKind::Timeout, "request cancelled"),
                );
            }
            response = send => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.registry.mark_failure(self.id);
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Transport
                };
                return ExecutionResult::failed(
                    &task.id,
                    self.id.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(kind, e.to_string()),
                );
            }
        };

        if !response.status().is_success() {
            self.registry.mark_failure(self.id);
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return ExecutionResult::failed(
                &task.id,
                self.id.to_string(),
                elapsed_ms(started),
                ErrorRecord::new(
                    ErrorKind::Transport,
                    format!("{} API error ({status}): {body}", self.id),
                ),
            );
        }

        let body: ChatResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                self.registry.mark_failure(self.id);
                return ExecutionResult::failed(
                    &task.id,
                    self.id.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(ErrorKind::Transport, format!("JSON decode failed: {e}")),
                );
            }
        };

        let duration_ms = elapsed_ms(started);
        self.registry.mark_success(self.id, duration_ms);

        let payload = parse_payload(&body);
        let confidence = score_confidence(
            task.complexity,
            payload_invoked_tools(&payload),
            payload_text_len(&payload),
        );

        ExecutionResult {
            task_id: task.id.clone(),
            executor: self.id.to_string(),
            payload,
            tokens_used: body.usage.map_or(0, |u| u.total_tokens),
            duration_ms,
            confidence,
            errors: Vec::new(),
            cached: false,
            partial: false,
        }
    }

    async fn probe(&self) -> HealthRecord {
        let started = Instant::now();
        let request = self
            .apply_auth(self.client.get(&self.models_url))
            .timeout(PROBE_TIMEOUT)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => {
                HealthRecord::up(self.id, elapsed_ms(started))
            }
            Ok(response) => {
                tracing::debug!(backend = %self.id, status = %response.status(), "probe rejected");
                HealthRecord::down(self.id)
            }
            Err(e) => {
                tracing::debug!(backend = %self.id, "probe failed: {e}");
                HealthRecord::down(self.id)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ─── Prompt formatting ──────────────────────────────────────────────────────

const SYSTEM_PROMPT: &str = "You are an expert software engineer assistant optimized for:\n\
- Processing large amounts of data efficiently\n\
- Using tools effectively\n\
- Analyzing code patterns and metrics\n\
- Providing structured, actionable output\n\n\
Focus on mechanical precision and thorough analysis.\n\
Always use tools when available to gather accurate information.\n\
Provide JSON-structured output when possible.";

fn format_task_prompt(task: &Task) -> String {
    let mut parts = vec![
        format!("Task ID: {}", task.id),
        format!(
            "Task Type: {}",
            task.kind
                .as_ref()
                .map_or_else(|| "unspecified".to_string(), ToString::to_string)
        ),
        format!("Priority: {}", task.priority),
        String::new(),
        "Description:".to_string(),
        task.description.clone(),
    ];

    if !task.required_tools.is_empty() {
        parts.push(String::new());
        parts.push("Required Tools:".to_string());
        for tool in &task.required_tools {
            parts.push(format!("- {tool}"));
        }
    }

    if !task.context.is_empty() {
        parts.push(String::new());
        parts.push("Context:".to_string());
        parts.push(
            serde_json::to_string_pretty(&task.context).unwrap_or_else(|_| "{}".to_string()),
        );
    }

    parts.join("\n")
}

/// Tool definitions in the `{type: "function", function: {...}}` shape, built
/// from the task's declared tool identifiers.
fn tool_definitions(task: &Task) -> Vec<Value> {
    let mut tools = Vec::new();

    if task.required_tools.contains("file_operations") {
        tools.push(json!({
            "type": "function",
            "function": {
                "name": "read_file",
                "description": "Read file contents",
                "parameters": {
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }
            }
        }));
        tools.push(json!({
            "type": "function",
            "function": {
                "name": "search_files",
                "description": "Search for patterns in files",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string"},
                        "path": {"type": "string"},
                        "file_type": {"type": "string"}
                    },
                    "required": ["pattern"]
                }
            }
        }));
    }

    if task.required_tools.contains("bash") {
        tools.push(json!({
            "type": "function",
            "function": {
                "name": "execute_bash",
                "description": "Execute bash commands",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "working_dir": {"type": "string"}
                    },
                    "required": ["command"]
                }
            }
        }));
    }

    if task.required_tools.contains("mcp_server") {
        tools.push(json!({
            "type": "function",
            "function": {
                "name": "mcp_server_call",
                "description": "Call MCP server tools",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                        "params": {"type": "object"}
                    },
                    "required": ["tool", "params"]
                }
            }
        }));
    }

    tools
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: Option<String>,
    function: ToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_payload(response: &ChatResponse) -> Value {
    let Some(choice) = response.choices.first() else {
        return json!({"content": "", "tool_calls": []});
    };

    let tool_calls: Vec<Value> = choice
        .message
        .tool_calls
        .iter()
        .map(|call| {
            let arguments: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            json!({
                "id": call.id,
                "function": call.function.name,
                "arguments": arguments,
            })
        })
        .collect();

    json!({
        "content": choice.message.content.clone().unwrap_or_default(),
        "tool_calls": tool_calls,
    })
}
