//! Answer generation via the Anthropic Messages API, with a bounded
//! tool-use loop.
//!
//! The provider sits behind [`LlmClient`] so tests can script replies. The
//! loop offers tools only while the round budget lasts; once a round is
//! spent, the follow-up request carries no tool definitions, which forces
//! the model to answer from the tool results it already has. With the
//! default budget of one round, a tool-using query costs exactly two model
//! calls.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::tools::ToolRegistry;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "\
You are an AI assistant specialized in course materials and educational content, \
with access to a search tool over indexed course documents.

Search tool usage:
- Use the search tool only for questions about specific course content or detailed educational materials
- One search per question maximum
- Synthesize search results into accurate, fact-based responses
- If the search yields no results, say so clearly; do not invent content

Response protocol:
- General knowledge questions: answer from existing knowledge without searching
- Course-specific questions: search first, then answer
- Do not mention the search process or tools in your answer

Keep answers brief, concise, and educational. Provide examples only when they aid understanding.";

/// One tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A model turn: either a final text answer or a request to run tools.
#[derive(Debug, Clone)]
pub enum ModelReply {
    Text(String),
    ToolUse {
        /// Text emitted alongside the tool request, if any.
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// One request to the model: system prompt, conversation so far, and the
/// tool definitions offered for this turn (`None` withholds tools).
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Value>,
    pub tools: Option<Vec<Value>>,
}

/// Chat-completion provider, fixed at generator construction time.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply>;
}

/// [`LlmClient`] backed by the Anthropic Messages API. Requires the
/// `ANTHROPIC_API_KEY` environment variable.
pub struct AnthropicClient {
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            bail!("ANTHROPIC_API_KEY environment variable not set");
        }
        Ok(Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system,
            "messages": request.messages,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = json!(tools);
        }

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_messages_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Anthropic API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Anthropic API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

fn parse_messages_response(json: &Value) -> Result<ModelReply> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .context("Invalid Anthropic response: missing content array")?;

    let stop_reason = json.get("stop_reason").and_then(|s| s.as_str());

    let mut text: Option<String> = None;
    let mut calls = Vec::new();

    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                let t = block.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                text.get_or_insert_with(String::new).push_str(t);
            }
            Some("tool_use") => {
                calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    if stop_reason == Some("tool_use") && !calls.is_empty() {
        Ok(ModelReply::ToolUse { text, calls })
    } else {
        Ok(ModelReply::Text(text.unwrap_or_default()))
    }
}

/// Drives the tool-use loop for one query.
pub struct Generator {
    client: Arc<dyn LlmClient>,
    max_tool_rounds: usize,
}

impl Generator {
    pub fn new(client: Arc<dyn LlmClient>, max_tool_rounds: usize) -> Self {
        Self {
            client,
            max_tool_rounds,
        }
    }

    /// Generate an answer for `query`, optionally with conversation history
    /// and a tool registry. Returns the model's final text.
    pub async fn generate(
        &self,
        query: &str,
        history: Option<&str>,
        registry: Option<&ToolRegistry>,
    ) -> Result<String> {
        let system = match history {
            Some(h) if !h.is_empty() => {
                format!("{}\n\nPrevious conversation:\n{}", SYSTEM_PROMPT, h)
            }
            _ => SYSTEM_PROMPT.to_string(),
        };

        let mut messages = vec![json!({ "role": "user", "content": query })];
        let mut rounds_used = 0usize;

        loop {
            let offer_tools = registry.is_some() && rounds_used < self.max_tool_rounds;
            let request = ModelRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: if offer_tools {
                    registry.map(|r| r.definitions())
                } else {
                    None
                },
            };

            match self.client.complete(&request).await? {
                ModelReply::Text(answer) => return Ok(answer),
                ModelReply::ToolUse { text, calls } => {
                    let registry = registry
                        .context("Model requested a tool but none are available")?;
                    if !offer_tools {
                        bail!("Model requested a tool after the round budget was spent");
                    }

                    let mut assistant_content = Vec::new();
                    if let Some(t) = &text {
                        if !t.is_empty() {
                            assistant_content.push(json!({ "type": "text", "text": t }));
                        }
                    }
                    for call in &calls {
                        assistant_content.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.input,
                        }));
                    }
                    messages.push(json!({ "role": "assistant", "content": assistant_content }));

                    let mut tool_results = Vec::new();
                    for call in &calls {
                        let output = registry.execute(&call.name, call.input.clone()).await?;
                        tool_results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": call.id,
                            "content": output,
                        }));
                    }
                    messages.push(json!({ "role": "user", "content": tool_results }));

                    rounds_used += 1;
                }
            }
        }
    }
}
