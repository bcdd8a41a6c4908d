//! OpenAI-compatible streaming provider.
//!
//! Opens a single streaming `/chat/completions` call per round and converts
//! the SSE chunk protocol into the domain [`StreamEvent`] vocabulary:
//!
//! - `delta.content`             → `TextFragment`
//! - `delta.tool_calls[i]`       → `ToolCallFragment` (passed through raw —
//!   reassembly is the accumulator's job, not the adapter's)
//! - `finish_reason` + `[DONE]`  → `RoundTerminated`
//! - any failure, at any point   → one terminal `UpstreamError`
//!
//! The event channel is the only way anything leaves this module: pre-flight
//! failures (missing key, connect error, non-200) surface in-stream exactly
//! like mid-stream ones, so the round controller has a single error path.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use apotheca_core::message::{Message, Role};
use apotheca_core::stream::{
    CompletionRequest, EventStream, Provider, StreamEvent, Termination, ToolCallFragment,
    ToolDefinition,
};

/// An OpenAI-compatible streaming completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// Convert domain messages to the chat API wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .into(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to the chat API wire format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: CompletionRequest) -> EventStream {
        let (tx, rx) = mpsc::channel::<StreamEvent>(64);

        let Some(api_key) = self.api_key.clone() else {
            let _ = tx
                .send(StreamEvent::UpstreamError {
                    detail: "Missing provider API key (set OPENAI_API_KEY)".into(),
                })
                .await;
            return rx;
        };

        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        debug!(provider = %self.name, model = %request.model, "Opening streaming completion");

        let client = self.client.clone();
        let provider_name = self.name.clone();

        // The whole call lives in this task so every failure mode reaches the
        // channel; a send error means the consumer hung up and we stop
        // reading upstream.
        tokio::spawn(async move {
            let response = match client
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Content-Type", "application/json")
                .header("Accept", "text/event-stream")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::UpstreamError {
                            detail: format!("network error: {e}"),
                        })
                        .await;
                    return;
                }
            };

            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                let _ = tx
                    .send(StreamEvent::UpstreamError {
                        detail: "provider authentication failed: invalid API key".into(),
                    })
                    .await;
                return;
            }
            if status != 200 {
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Provider returned error");
                let _ = tx
                    .send(StreamEvent::UpstreamError {
                        detail: format!("provider returned status {status}: {error_body}"),
                    })
                    .await;
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut termination = Termination::TextComplete;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::UpstreamError {
                                detail: format!("stream interrupted: {e}"),
                            })
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx
                            .send(StreamEvent::RoundTerminated {
                                reason: termination,
                            })
                            .await;
                        return;
                    }

                    let chunk = match serde_json::from_str::<WireChunk>(data) {
                        Ok(c) => c,
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                            continue;
                        }
                    };

                    let Some(choice) = chunk.choices.first() else {
                        continue;
                    };

                    if let Some(reason) = &choice.finish_reason {
                        termination = map_finish_reason(reason);
                    }

                    if let Some(content) = &choice.delta.content
                        && !content.is_empty()
                        && tx
                            .send(StreamEvent::TextFragment {
                                text: content.clone(),
                            })
                            .await
                            .is_err()
                    {
                        return; // receiver dropped — stop consuming upstream
                    }

                    for tc in choice.delta.tool_calls.iter().flatten() {
                        let fragment = ToolCallFragment {
                            index: tc.index,
                            id: tc.id.clone(),
                            name: tc.function.as_ref().and_then(|f| f.name.clone()),
                            arguments: tc.function.as_ref().and_then(|f| f.arguments.clone()),
                        };
                        if tx
                            .send(StreamEvent::ToolCallFragment(fragment))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE] — still terminate the round cleanly.
            let _ = tx
                .send(StreamEvent::RoundTerminated {
                    reason: termination,
                })
                .await;
        });

        rx
    }
}

/// Map the chat API `finish_reason` onto a round termination.
fn map_finish_reason(reason: &str) -> Termination {
    match reason {
        "tool_calls" => Termination::ToolCallsRequested,
        _ => Termination::TextComplete,
    }
}

// --- Chat API wire types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE wire types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
