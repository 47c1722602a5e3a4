//! OpenAI-compatible chat-completions provider.
//!
//! Speaks the `/chat/completions` SSE dialect shared by most hosted and
//! self-hosted gateways. Thinking output arrives as `reasoning_content`
//! deltas and is replayed the same way on subsequent requests so the model
//! keeps its earlier traces.

use std::sync::Arc;

use amadeus_core::{ContentPart, Message, MessageContent, Role, TokenUsage, ToolCall};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::error::{ChatError, ChatResult};
use crate::provider::{ChatProvider, EventStream, StreamEvent, ThinkingEffort, ToolSchema};

/// Sampling overrides forwarded verbatim when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sampling {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f64>,
    /// Completion token cap.
    pub max_tokens: Option<u64>,
}

/// An OpenAI-compatible chat provider.
pub struct OpenAiCompat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    sampling: Sampling,
    thinking: Option<ThinkingEffort>,
}

impl OpenAiCompat {
    /// Create a new provider.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            sampling: Sampling::default(),
            thinking: None,
        }
    }

    /// Set sampling overrides.
    #[must_use]
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    fn build_request(&self, system_prompt: &str, tools: &[ToolSchema], history: &[Message]) -> Value {
        let mut messages = Vec::with_capacity(history.len().saturating_add(1));
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.extend(history.iter().map(convert_message));

        let mut request = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            request["tools"] = Value::Array(api_tools);
        }

        if let Some(temperature) = self.sampling.temperature {
            request["temperature"] = json!(temperature);
        }
        if let Some(top_p) = self.sampling.top_p {
            request["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = self.sampling.max_tokens {
            request["max_tokens"] = json!(max_tokens);
        }
        match self.thinking {
            Some(ThinkingEffort::Off) | None => {},
            Some(effort) => {
                request["reasoning_effort"] = json!(effort.to_string());
            },
        }

        request
    }
}

/// Convert one history message to the chat-completions shape.
fn convert_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut out = json!({"role": role});

    match &message.content {
        MessageContent::Text(text) => {
            out["content"] = json!(text);
        },
        MessageContent::Parts(parts) => {
            // Think parts travel in `reasoning_content`; the rest go through
            // as-is (the part serialization already matches the dialect).
            let thinks: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Think { think } => Some(think.as_str()),
                    _ => None,
                })
                .collect();
            if !thinks.is_empty() {
                out["reasoning_content"] = json!(thinks.join("\n"));
            }
            let rest: Vec<&ContentPart> = parts
                .iter()
                .filter(|part| !matches!(part, ContentPart::Think { .. }))
                .collect();
            out["content"] = json!(rest);
        },
    }

    if !message.tool_calls.is_empty() {
        out["tool_calls"] = json!(message.tool_calls);
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        out["tool_call_id"] = json!(tool_call_id);
    }
    out
}

#[async_trait]
impl ChatProvider for OpenAiCompat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn thinking_effort(&self) -> Option<ThinkingEffort> {
        self.thinking
    }

    fn with_thinking(&self, effort: ThinkingEffort) -> Arc<dyn ChatProvider> {
        Arc::new(Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            sampling: self.sampling,
            thinking: Some(effort),
        })
    }

    async fn generate(
        &self,
        system_prompt: &str,
        tools: &[ToolSchema],
        history: &[Message],
    ) -> ChatResult<EventStream> {
        let request_body = self.build_request(system_prompt, tools, history);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, n_tools = tools.len(), "Starting chat completion stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Chat completion request failed");
            return Err(ChatError::Status {
                code: status.as_u16(),
                message: body,
            });
        }

        let stream = try_stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut message_id = String::new();
            let mut usage: Option<TokenUsage> = None;
            let mut saw_output = false;

            'outer: while let Some(chunk) = bytes_stream.next().await {
                let chunk = chunk.map_err(ChatError::from)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }

                    let parsed: ChatChunk = serde_json::from_str(data)
                        .map_err(|e| ChatError::Protocol(format!("bad SSE chunk: {e}")))?;
                    if let Some(id) = parsed.id {
                        message_id = id;
                    }
                    if let Some(api_usage) = parsed.usage {
                        usage = Some(api_usage.into_token_usage());
                    }

                    for choice in parsed.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty() {
                                saw_output = true;
                                yield StreamEvent::Part(ContentPart::Text { text });
                            }
                        }
                        if let Some(think) = choice.delta.reasoning_content {
                            if !think.is_empty() {
                                saw_output = true;
                                yield StreamEvent::Part(ContentPart::Think { think });
                            }
                        }
                        for delta_call in choice.delta.tool_calls.unwrap_or_default() {
                            let function = delta_call.function.unwrap_or_default();
                            if let Some(id) = delta_call.id {
                                saw_output = true;
                                yield StreamEvent::ToolCallBegin(ToolCall::new(
                                    id,
                                    function.name.unwrap_or_default(),
                                    None,
                                ));
                                if let Some(arguments) = function.arguments {
                                    if !arguments.is_empty() {
                                        yield StreamEvent::ToolCallDelta {
                                            arguments_delta: arguments,
                                        };
                                    }
                                }
                            } else if let Some(arguments) = function.arguments {
                                if !arguments.is_empty() {
                                    yield StreamEvent::ToolCallDelta {
                                        arguments_delta: arguments,
                                    };
                                }
                            }
                        }
                    }
                }
            }

            if !saw_output {
                Err(ChatError::EmptyResponse)?;
            }
            yield StreamEvent::Usage {
                usage: usage.unwrap_or_default(),
                message_id,
            };
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl ApiUsage {
    fn into_token_usage(self) -> TokenUsage {
        let cached = self
            .prompt_tokens_details
            .map(|details| details.cached_tokens)
            .unwrap_or_default();
        TokenUsage {
            input_other: self.prompt_tokens.saturating_sub(cached),
            input_cache_read: cached,
            input_cache_creation: 0,
            output: self.completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_shape() {
        let provider = OpenAiCompat::new("https://api.example.com/v1/", "key", "test-model");
        let tools = vec![ToolSchema {
            name: "Shell".to_string(),
            description: "Run a command".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let history = vec![Message::user("hi")];
        let request = provider.build_request("be helpful", &tools, &history);

        assert_eq!(request["model"], "test-model");
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][1]["role"], "user");
        assert_eq!(request["tools"][0]["function"]["name"], "Shell");
        assert!(request.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_thinking_adds_reasoning_effort() {
        let provider = OpenAiCompat::new("https://api.example.com/v1", "key", "m");
        let thinking = provider.with_thinking(ThinkingEffort::High);
        assert_eq!(thinking.thinking_effort(), Some(ThinkingEffort::High));
    }

    #[test]
    fn test_convert_tool_message() {
        let message = Message {
            role: Role::Tool,
            content: MessageContent::Text("ok\n".to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some("tc-1".to_string()),
        };
        let value = convert_message(&message);
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "tc-1");
    }

    #[test]
    fn test_convert_assistant_think_parts() {
        let message = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Think {
                    think: "hmm".to_string(),
                },
                ContentPart::text("result"),
            ]),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        let value = convert_message(&message);
        assert_eq!(value["reasoning_content"], "hmm");
        assert_eq!(value["content"][0]["type"], "text");
    }

    #[test]
    fn test_api_usage_cache_split() {
        let usage = ApiUsage {
            prompt_tokens: 120,
            completion_tokens: 8,
            prompt_tokens_details: Some(PromptTokensDetails { cached_tokens: 100 }),
        };
        let token_usage = usage.into_token_usage();
        assert_eq!(token_usage.input_other, 20);
        assert_eq!(token_usage.input_cache_read, 100);
        assert_eq!(token_usage.input(), 120);
        assert_eq!(token_usage.output, 8);
    }
}
