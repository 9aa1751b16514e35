//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use dawpilot_core::error::ProviderError;
use dawpilot_core::message::{Message, MessageBody, Segment, ToolCallRequest};
use dawpilot_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::sse::{SseDataLines, parse_tool_arguments, status_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert history to Anthropic API format with content blocks.
    ///
    /// Tool-result batches travel as user messages. Consecutive messages with
    /// the same role are merged since the API expects alternation.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let (role, blocks) = match &msg.body {
                MessageBody::User { content } => {
                    ("user", vec![ContentBlock::Text { text: content.clone() }])
                }
                MessageBody::Assistant { content } => {
                    let blocks: Vec<ContentBlock> = content
                        .iter()
                        .map(|segment| match segment {
                            Segment::Text { text } => ContentBlock::Text { text: text.clone() },
                            Segment::ToolCall(call) => ContentBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                input: call.arguments.clone(),
                            },
                        })
                        .collect();
                    ("assistant", blocks)
                }
                MessageBody::ToolResultBatch { results } => {
                    let blocks = results
                        .iter()
                        .map(|r| ContentBlock::ToolResult {
                            tool_use_id: r.id.clone(),
                            content: r.payload_text(),
                            is_error: r.is_error,
                        })
                        .collect();
                    ("user", blocks)
                }
            };

            // The API rejects empty assistant turns
            if blocks.is_empty() {
                continue;
            }

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: blocks,
                }),
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl dawpilot_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseDataLines::default();
            let mut state = StreamState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match state.on_event(&event) {
                        Step::Continue => {}
                        Step::Emit(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Step::Finish(chunk) => {
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                        Step::Fail(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(vec![
            "claude-opus-4-6".into(),
            "claude-sonnet-4-6".into(),
            "claude-haiku-4-5".into(),
        ])
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // Reachable unless the key is rejected
        Ok(response.status().as_u16() != 401)
    }
}

/// What the stream task should do after one SSE event.
#[derive(Debug)]
enum Step {
    Continue,
    Emit(StreamChunk),
    Finish(StreamChunk),
    Fail(ProviderError),
}

#[derive(Debug, Default)]
struct PartialToolUse {
    id: String,
    name: String,
    json: String,
}

/// Accumulates one streamed message.
#[derive(Debug, Default)]
struct StreamState {
    current_tool: Option<PartialToolUse>,
    tool_calls: Vec<ToolCallRequest>,
    stop_reason: Option<StopReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl StreamState {
    fn on_event(&mut self, event: &serde_json::Value) -> Step {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                Step::Continue
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.finish_tool();
                    self.current_tool = Some(PartialToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        json: String::new(),
                    });
                }
                Step::Continue
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => match delta["text"].as_str() {
                        Some(text) if !text.is_empty() => Step::Emit(StreamChunk::text(text)),
                        _ => Step::Continue,
                    },
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.current_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.json.push_str(partial);
                        }
                        Step::Continue
                    }
                    _ => Step::Continue,
                }
            }
            "content_block_stop" => {
                self.finish_tool();
                Step::Continue
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::from_api(reason));
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                }
                Step::Continue
            }
            "message_stop" => {
                self.finish_tool();
                Step::Finish(StreamChunk::finish(
                    self.stop_reason.take().unwrap_or(StopReason::EndTurn),
                    std::mem::take(&mut self.tool_calls),
                    Some(Usage::new(self.input_tokens, self.output_tokens)),
                ))
            }
            "error" => Step::Fail(Self::stream_error(&event["error"])),
            _ => Step::Continue,
        }
    }

    fn finish_tool(&mut self) {
        if let Some(tool) = self.current_tool.take() {
            let arguments = parse_tool_arguments(&tool.name, &tool.json);
            self.tool_calls.push(ToolCallRequest {
                id: tool.id,
                name: tool.name,
                arguments,
            });
        }
    }

    /// Map an in-stream `error` event onto the equivalent HTTP status.
    fn stream_error(error: &serde_json::Value) -> ProviderError {
        let message = error["message"].as_str().unwrap_or("stream error").to_string();
        let status = match error["type"].as_str().unwrap_or("") {
            "overloaded_error" => 529,
            "rate_limit_error" => 429,
            "api_error" => 500,
            "authentication_error" => 401,
            "permission_error" => 403,
            "invalid_request_error" => 400,
            _ => 0,
        };
        ProviderError::from_status(status, message)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawpilot_core::Provider;
    use dawpilot_core::message::ToolCallResult;
    use dawpilot_core::ErrorKind;
    use serde_json::json;

    fn feed(state: &mut StreamState, events: &[serde_json::Value]) -> Vec<Step> {
        events.iter().map(|e| state.on_event(e)).collect()
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn message_conversion_user_assistant() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi!", vec![])];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 2);
        assert_eq!(api_msgs[0].role, "user");
        assert_eq!(api_msgs[1].role, "assistant");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant(
            "Creating it now",
            vec![ToolCallRequest {
                id: "toolu_123".into(),
                name: "create_midi_track".into(),
                arguments: json!({"name": "Bass"}),
            }],
        );

        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs.len(), 1);
        let blocks = &api_msgs[0].content;
        assert_eq!(blocks.len(), 2);
        match &blocks[0] {
            ContentBlock::Text { text } => assert_eq!(text, "Creating it now"),
            _ => panic!("Expected text block"),
        }
        match &blocks[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_123");
                assert_eq!(name, "create_midi_track");
                assert_eq!(input["name"], "Bass");
            }
            _ => panic!("Expected tool_use block"),
        }
    }

    #[test]
    fn tool_results_become_one_user_message() {
        let msg = Message::tool_results(vec![
            ToolCallResult::ok("toolu_1", json!({"status": "ok"})),
            ToolCallResult::error("toolu_2", "timed out"),
        ]);
        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs.len(), 1);
        assert_eq!(api_msgs[0].role, "user");

        let value = serde_json::to_value(&api_msgs[0]).unwrap();
        assert_eq!(value["content"][0]["type"], "tool_result");
        assert_eq!(value["content"][0]["tool_use_id"], "toolu_1");
        assert!(value["content"][0].get("is_error").is_none());
        assert_eq!(value["content"][1]["is_error"], true);
    }

    #[test]
    fn consecutive_user_messages_merge() {
        let messages = vec![
            Message::tool_results(vec![ToolCallResult::ok("t1", json!("done"))]),
            Message::user("and now add reverb"),
        ];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 1);
        assert_eq!(api_msgs[0].content.len(), 2);
    }

    #[test]
    fn empty_assistant_turn_is_dropped() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant("", vec![]),
            Message::user("hello?"),
        ];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 1);
    }

    #[test]
    fn request_body_includes_system_and_tools() {
        let request = ProviderRequest {
            model: "claude-sonnet-4-6".into(),
            system: "You control a DAW.".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.5,
            max_tokens: None,
            tools: vec![ToolDefinition {
                name: "set_tempo".into(),
                description: "Set tempo".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = AnthropicProvider::request_body(&request);
        assert_eq!(body["system"], "You control a DAW.");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn stream_text_then_stop() {
        let mut state = StreamState::default();
        let steps = feed(
            &mut state,
            &[
                json!({"type": "message_start", "message": {"usage": {"input_tokens": 42, "output_tokens": 1}}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
                json!({"type": "message_stop"}),
            ],
        );

        let texts: Vec<_> = steps
            .iter()
            .filter_map(|s| match s {
                Step::Emit(c) => c.content.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);

        match steps.last().unwrap() {
            Step::Finish(chunk) => {
                assert!(chunk.done);
                assert_eq!(chunk.stop_reason, Some(StopReason::EndTurn));
                assert!(chunk.tool_calls.is_empty());
                assert_eq!(chunk.usage, Some(Usage::new(42, 7)));
            }
            other => panic!("Expected finish, got {other:?}"),
        }
    }

    #[test]
    fn stream_tool_use_assembles_arguments() {
        let mut state = StreamState::default();
        let steps = feed(
            &mut state,
            &[
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_a", "name": "delete_track", "input": {}}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"track_"}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "index\": 2, \"confirmed\": false}"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_b", "name": "stop_playback", "input": {}}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 30}}),
                json!({"type": "message_stop"}),
            ],
        );

        // No tool fragments surface before the end
        assert!(steps[..steps.len() - 1].iter().all(|s| matches!(s, Step::Continue)));

        let Step::Finish(chunk) = steps.last().unwrap() else {
            panic!("Expected finish");
        };
        assert_eq!(chunk.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, "toolu_a");
        assert_eq!(chunk.tool_calls[0].arguments, json!({"track_index": 2, "confirmed": false}));
        assert_eq!(chunk.tool_calls[1].name, "stop_playback");
        assert_eq!(chunk.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn stream_error_event_is_classified() {
        let mut state = StreamState::default();
        let step = state.on_event(&json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }));
        match step {
            Step::Fail(err) => assert_eq!(err.kind(), ErrorKind::Overloaded),
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[test]
    fn ping_and_unknown_events_ignored() {
        let mut state = StreamState::default();
        assert!(matches!(state.on_event(&json!({"type": "ping"})), Step::Continue));
        assert!(matches!(state.on_event(&json!({"type": "something_new"})), Step::Continue));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "fire_scene".into(),
            description: "Launch a scene".into(),
            parameters: json!({
                "type": "object",
                "properties": {"scene_index": {"type": "integer"}},
                "required": ["scene_index"]
            }),
        }];
        let api_tools = AnthropicProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].name, "fire_scene");
        assert_eq!(api_tools[0].input_schema["type"].as_str(), Some("object"));
    }

    #[tokio::test]
    async fn list_models_returns_known_models() {
        let provider = AnthropicProvider::new("sk-test");
        let models = provider.list_models().await.unwrap();
        assert!(models.iter().any(|m| m == "claude-sonnet-4-6"));
    }
}
