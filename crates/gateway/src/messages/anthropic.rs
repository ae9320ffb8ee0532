use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages API.
///
/// This is the only wire format prism accepts on its north side. The shape
/// follows the [Anthropic API reference](https://docs.anthropic.com/en/api/messages):
/// content is an array of typed blocks, the system prompt lives outside the
/// messages array, and tool interactions use tool_use/tool_result blocks
/// rather than OpenAI-style function calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// The model to use for the completion.
    ///
    /// Accepts the `big` and `small` aliases as well as concrete Claude
    /// identifiers such as `claude-sonnet-4-20250514`.
    pub model: String,

    /// The conversation so far, alternating user and assistant turns.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate. Required, must be at least 1.
    pub max_tokens: u32,

    /// System prompt, either a bare string or a list of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Controls randomness in the response. Range 0.0 to 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Only sample from the top K tokens. Dropped for upstreams that lack it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that cause the model to stop generating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// When true, the response is sent as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Custom metadata attached to the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tools available for the model to call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,

    /// Controls how the model uses the available tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// The model string exactly as the caller sent it, recorded by the
    /// model mapper before rewriting `model`. Never serialized; responses
    /// echo it back unchanged.
    #[serde(skip)]
    pub original_model: Option<String>,
}

impl MessagesRequest {
    /// The model name to echo in responses: the caller's exact input.
    pub fn echo_model(&self) -> &str {
        self.original_model.as_deref().unwrap_or(&self.model)
    }

    /// Validate the request before any upstream call.
    ///
    /// Violations surface as `invalid_request_error` and never reach the
    /// upstream.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens < 1 {
            return Err("max_tokens must be at least 1".to_string());
        }

        if let Some(tools) = &self.tools {
            let mut seen = std::collections::HashSet::new();

            for tool in tools {
                if !seen.insert(tool.name.as_str()) {
                    return Err(format!("duplicate tool name: {}", tool.name));
                }

                if !tool.input_schema.is_object() {
                    return Err(format!("tool {} input_schema must be a JSON object", tool.name));
                }
            }
        }

        if let Some(ToolChoice::Tool { name }) = &self.tool_choice {
            let known = self
                .tools
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|tool| tool.name == *name);

            if !known {
                return Err(format!("tool_choice names unknown tool: {name}"));
            }
        }

        self.validate_tool_references()
    }

    /// Tool-use ids must be unique within an assistant message, and every
    /// tool_result must answer a tool_use seen earlier in the conversation.
    fn validate_tool_references(&self) -> Result<(), String> {
        let mut known_ids = std::collections::HashSet::new();

        for message in &self.messages {
            let MessageContent::Blocks(blocks) = &message.content else {
                continue;
            };

            let mut in_message = std::collections::HashSet::new();

            for block in blocks {
                match block {
                    ContentBlock::ToolUse { id, .. } => {
                        if message.role == Role::Assistant && !in_message.insert(id.as_str()) {
                            return Err(format!("duplicate tool_use id in assistant message: {id}"));
                        }
                        known_ids.insert(id.clone());
                    }
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        if !known_ids.contains(tool_use_id) {
                            return Err(format!("tool_result references unknown tool_use id: {tool_use_id}"));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    /// Who sent the message.
    pub role: Role,

    /// The message content; a bare string is equivalent to a single text
    /// block and both forms round-trip identically.
    pub content: MessageContent,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// Message content in either of its two accepted wire forms.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Shorthand for a single text block.
    Text(String),

    /// Full block-list form.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Normalize to the block-list form, consuming the container.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Iterate the blocks without normalizing the string form.
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

/// Content block within a message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// Base64-encoded image.
    Image {
        /// The image source.
        source: ImageSource,
    },

    /// Tool invocation requested by the assistant.
    ToolUse {
        /// Unique identifier, referenced by the matching tool_result.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Input parameters as a JSON object.
        input: Value,
    },

    /// Result of a tool invocation, sent back by the user side.
    ToolResult {
        /// The tool_use id this result answers.
        tool_use_id: String,
        /// The result content.
        content: ToolResultContent,
        /// Set when the execution failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// Reasoning content produced before the visible answer.
    Thinking {
        /// The reasoning text.
        thinking: String,
        /// Integrity signature, when the upstream provides one.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Tool result content: a bare string or nested content blocks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Simple text result.
    Text(String),

    /// Structured result with multiple blocks.
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten to the textual form sent to upstreams that lack structured
    /// tool results.
    pub fn to_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Image source for image content blocks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImageSource {
    /// The source encoding; only `base64` is supported.
    #[serde(rename = "type")]
    pub source_type: String,

    /// Media type, e.g. `image/png`.
    pub media_type: String,

    /// Base64-encoded image data, without a data-URL prefix.
    pub data: String,
}

/// System prompt in either of its two accepted wire forms.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Bare string form.
    Text(String),

    /// Block-list form; only text blocks are meaningful here.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten to a single string.
    pub fn to_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|block| {
                    let SystemBlock::Text { text } = block;
                    text.as_str()
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Text block within a system prompt list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
}

/// Request metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    /// Opaque end-user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A tool the model may call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,

    /// What the tool does; helps the model decide when to call it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema describing the tool's input object.
    pub input_schema: Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to use tools.
    Auto,

    /// The model must use at least one tool.
    Any,

    /// The model must use the named tool.
    Tool {
        /// The tool to use.
        name: String,
    },
}

/// Response body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Unique message identifier, `msg_` prefixed.
    pub id: String,

    /// Always `message`.
    #[serde(rename = "type")]
    pub response_type: String,

    /// Always `assistant`.
    pub role: Role,

    /// The generated content blocks.
    pub content: Vec<ContentBlock>,

    /// The model name exactly as the caller requested it. The
    /// backend-resolved name never appears here.
    pub model: String,

    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,

    /// The stop sequence that was matched, if any.
    pub stop_sequence: Option<String>,

    /// Token accounting.
    pub usage: Usage,
}

impl MessagesResponse {
    /// Whether the response asks for any tool invocations.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant's turn.
    EndTurn,
    /// The `max_tokens` limit was hit; the response may be cut off.
    MaxTokens,
    /// A configured stop sequence was generated.
    StopSequence,
    /// The model requested one or more tool invocations.
    ToolUse,
    /// Generation ended because of an upstream error.
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::Error => "error",
        };
        f.write_str(name)
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt, including system and tool definitions.
    pub input_tokens: u32,

    /// Tokens generated by the model.
    pub output_tokens: u32,
}

/// Error envelope; this shape is bit-exact on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `error`.
    #[serde(rename = "type")]
    pub response_type: String,

    /// Error details.
    pub error: ErrorDetails,
}

impl ErrorResponse {
    /// Build the envelope from an error kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: "error".to_string(),
            error: ErrorDetails {
                error_type: kind.into(),
                message: message.into(),
            },
        }
    }
}

/// Error details inside the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error kind, e.g. `rate_limit_error`.
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable message.
    pub message: String,
}

/// Request body for `POST /v1/messages/count_tokens`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountTokensRequest {
    /// The model the count is for.
    pub model: String,

    /// The conversation to count.
    pub messages: Vec<Message>,

    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Optional tool definitions, counted as part of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

/// Response body for `POST /v1/messages/count_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensResponse {
    /// The number of prompt tokens the request would consume.
    pub input_tokens: u32,
}

/// Streaming event in the Anthropic SSE envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagesStreamEvent {
    /// Start of a message.
    MessageStart {
        /// Initial message metadata.
        message: StreamMessageStart,
    },

    /// A content block opens.
    ContentBlockStart {
        /// Block index, dense and assigned in first-seen order.
        index: u32,
        /// The empty shell of the block being started.
        content_block: ContentBlock,
    },

    /// Incremental content for an open block.
    ContentBlockDelta {
        /// The block being extended.
        index: u32,
        /// The delta payload.
        delta: ContentDelta,
    },

    /// A content block closes.
    ContentBlockStop {
        /// The block being closed.
        index: u32,
    },

    /// Terminal metadata for the message.
    MessageDelta {
        /// Stop reason and sequence.
        delta: MessageDeltaBody,
        /// Cumulative usage.
        usage: Usage,
    },

    /// End of the stream.
    MessageStop,

    /// Keep-alive.
    Ping,

    /// Mid-stream error; the HTTP status has already been sent.
    Error {
        /// The error details.
        error: ErrorDetails,
    },
}

/// Initial message metadata for streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Unique message id.
    pub id: String,

    /// Always `message`.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Always `assistant`.
    pub role: Role,

    /// Initially empty.
    pub content: Vec<ContentBlock>,

    /// The echoed model name.
    pub model: String,

    /// Initial usage statistics.
    pub usage: Usage,
}

/// Delta payload for an open content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Additional text for a text block.
    TextDelta {
        /// The text fragment.
        text: String,
    },

    /// Partial JSON for a tool_use input.
    InputJsonDelta {
        /// The JSON fragment; fragments concatenate into the input object.
        partial_json: String,
    },

    /// Additional reasoning text for a thinking block.
    ThinkingDelta {
        /// The reasoning fragment.
        thinking: String,
    },
}

/// Terminal message metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    /// Why generation stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// The matched stop sequence, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_and_block_content_round_trip_identically() {
        let bare: Message = serde_json::from_value(json!({
            "role": "user",
            "content": "Hello"
        }))
        .unwrap();

        let blocks: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "Hello"}]
        }))
        .unwrap();

        assert_eq!(bare.content.into_blocks(), {
            let normalized = blocks.content.into_blocks();
            normalized
        });
    }

    #[test]
    fn deserialize_tool_use_request() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 512,
            "messages": [
                {"role": "user", "content": "what's the weather?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "12C, cloudy"}
                ]}
            ],
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "tool_choice": {"type": "auto"}
        }))
        .unwrap();

        assert!(request.validate().is_ok());
        assert_eq!(request.messages.len(), 3);

        let ContentBlock::ToolUse { id, name, input } = &request.messages[1].content.blocks()[0] else {
            unreachable!("expected tool_use block");
        };
        assert_eq!(id, "toolu_1");
        assert_eq!(name, "get_weather");
        assert_eq!(input["city"], "Paris");
    }

    #[test]
    fn validation_rejects_zero_max_tokens() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 0,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        assert!(request.validate().unwrap_err().contains("max_tokens"));
    }

    #[test]
    fn validation_rejects_duplicate_tool_names() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "echo", "input_schema": {"type": "object"}},
                {"name": "echo", "input_schema": {"type": "object"}}
            ]
        }))
        .unwrap();

        assert!(request.validate().unwrap_err().contains("duplicate tool name"));
    }

    #[test]
    fn validation_rejects_unknown_tool_choice() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "echo", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "tool", "name": "other"}
        }))
        .unwrap();

        assert!(request.validate().unwrap_err().contains("unknown tool"));
    }

    #[test]
    fn validation_rejects_dangling_tool_result() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_missing", "content": "hm"}
                ]}
            ]
        }))
        .unwrap();

        assert!(request.validate().unwrap_err().contains("toolu_missing"));
    }

    #[test]
    fn validation_rejects_non_object_input_schema() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "echo", "input_schema": "not a schema"}]
        }))
        .unwrap();

        assert!(request.validate().unwrap_err().contains("input_schema"));
    }

    #[test]
    fn original_model_never_serializes() {
        let mut request: MessagesRequest = serde_json::from_value(json!({
            "model": "big",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        request.original_model = Some("big".to_string());
        request.model = "openrouter/anthropic/claude-sonnet-4".to_string();

        let serialized = serde_json::to_value(&request).unwrap();
        assert!(serialized.get("original_model").is_none());
        assert_eq!(serialized["model"], "openrouter/anthropic/claude-sonnet-4");
    }

    #[test]
    fn serialize_stream_events() {
        let event = MessagesStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "Hello".to_string(),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content_block_delta");
        assert_eq!(json["delta"]["type"], "text_delta");
        assert_eq!(json["delta"]["text"], "Hello");

        let stop = MessagesStreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(StopReason::ToolUse),
                stop_sequence: None,
            },
            usage: Usage {
                input_tokens: 0,
                output_tokens: 7,
            },
        };

        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["type"], "message_delta");
        assert_eq!(json["delta"]["stop_reason"], "tool_use");
        assert_eq!(json["usage"]["output_tokens"], 7);
    }

    #[test]
    fn error_envelope_is_bit_exact() {
        let envelope = ErrorResponse::new("rate_limit_error", "slow down");
        let json = serde_json::to_string(&envelope).unwrap();

        assert_eq!(
            json,
            r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#
        );
    }

    #[test]
    fn thinking_block_round_trips() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "thinking",
            "thinking": "the user wants a haiku",
            "signature": "sig_abc"
        }))
        .unwrap();

        let ContentBlock::Thinking { thinking, signature } = &block else {
            unreachable!("expected thinking block");
        };
        assert_eq!(thinking, "the user wants a haiku");
        assert_eq!(signature.as_deref(), Some("sig_abc"));
    }
}
