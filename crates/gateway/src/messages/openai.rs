//! OpenAI Chat Completions wire format.
//!
//! These types cover the subset of the Chat Completions API the gateway
//! speaks to its southern upstreams: requests with multi-part content and
//! tools, unary responses, and streaming chunks. Response types are lenient
//! (`default` everywhere) because real-world OpenAI-compatible servers omit
//! fields freely; request types serialize only what is set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Backend-resolved model identifier.
    pub model: String,

    /// Flattened conversation, system prompt first.
    pub messages: Vec<ChatMessage>,

    /// Maximum tokens to generate, already clamped by the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Whether to stream the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Available tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Tool usage policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// End-user identifier, forwarded from request metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// A message in the Chat Completions conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: ChatRole,

    /// Message content; null for assistant messages that only carry tool
    /// calls.
    pub content: Option<ChatContent>,

    /// Tool calls made by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `tool` role messages: the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Sender role in the Chat Completions format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// Chat message content: a bare string or typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    /// Plain text.
    Text(String),

    /// Multi-modal parts.
    Parts(Vec<ContentPart>),
}

/// One part of a multi-modal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part.
    Text {
        /// The text content.
        text: String,
    },

    /// Image part referenced by URL; the gateway always uses data URLs.
    ImageUrl {
        /// The image reference.
        image_url: ImageUrl,
    },
}

/// Image reference for an image part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `https://...` or `data:{media_type};base64,{data}`.
    pub url: String,
}

/// A tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: ToolType,

    /// The function specification.
    pub function: FunctionDefinition,
}

/// Tool type discriminator; only functions exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    /// A callable function.
    Function,
}

/// Function specification inside a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Unique function name.
    pub name: String,

    /// What the function does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// Tool usage policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"`, `"required"` or `"none"`.
    Mode(ToolChoiceMode),

    /// Force a specific function.
    Specific {
        /// Always `function`.
        #[serde(rename = "type")]
        tool_type: ToolType,
        /// The function to force.
        function: FunctionName,
    },
}

/// Mode-based tool choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Tools disabled.
    None,
    /// The model decides.
    Auto,
    /// The model must call at least one tool.
    Required,
}

/// Bare function reference for a specific tool choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionName {
    /// The function name.
    pub name: String,
}

/// A completed tool call in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call identifier.
    pub id: String,

    /// Always `function`.
    #[serde(rename = "type", default = "ToolType::function")]
    pub tool_type: ToolType,

    /// The call payload.
    pub function: FunctionCall,
}

impl ToolType {
    fn function() -> Self {
        ToolType::Function
    }
}

/// Function name and serialized arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,

    /// Arguments as a JSON-encoded string; the model may emit malformed
    /// JSON here, which the gateway preserves rather than rejects.
    #[serde(default)]
    pub arguments: String,
}

/// Unary response body from `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Completion identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// Model that produced the response.
    #[serde(default)]
    pub model: Option<String>,

    /// Response candidates; the gateway only reads the first.
    #[serde(default)]
    pub choices: Vec<ChatChoice>,

    /// Token accounting, when the upstream provides it.
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One response candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Candidate index.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ResponseMessage,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// The assistant message inside a response choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Visible text content.
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Reasoning text, emitted by reasoning-capable upstreams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Structured thinking blocks, emitted by Claude-hosting upstreams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_blocks: Option<Vec<ThinkingBlock>>,
}

/// A structured reasoning block in a response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    /// The reasoning text.
    #[serde(default)]
    pub thinking: String,

    /// Integrity signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Why the model stopped generating.
///
/// Unrecognized reasons deserialize as [`FinishReason::Other`] and map to
/// `end_turn`; an unknown upstream value must not fail the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit reached.
    Length,
    /// The model requested tool calls.
    ToolCalls,
    /// Legacy function-call stop.
    FunctionCall,
    /// Output was filtered.
    ContentFilter,
    /// Anything this gateway does not recognize.
    #[serde(other)]
    Other,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u32,

    /// Sum of the two.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Streaming chunk from `POST /chat/completions` with `stream: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier, shared across all chunks.
    #[serde(default)]
    pub id: String,

    /// Always `chat.completion.chunk`.
    #[serde(default = "chunk_object")]
    pub object: String,

    /// Model producing the chunk.
    #[serde(default)]
    pub model: String,

    /// Incremental candidate updates.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    /// Cumulative usage; typically only on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

/// Incremental update for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Candidate index.
    #[serde(default)]
    pub index: u32,

    /// The incremental payload.
    #[serde(default)]
    pub delta: ChunkDelta,

    /// Present on the final chunk for this candidate.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Text fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Incremental tool-call updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental update to one tool call.
///
/// The first fragment carries the id and function name; later fragments
/// append to `function.arguments` at the same index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position in the message's tool_calls array.
    #[serde(default)]
    pub index: usize,

    /// Call identifier, first fragment only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Function name and argument fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Function fields of a tool-call fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Function name, first fragment only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Error body shape used by OpenAI-compatible upstreams.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Error details, when the body is structured.
    pub error: Option<ErrorBodyDetails>,
}

/// Details inside an upstream error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBodyDetails {
    /// Human-readable message.
    pub message: Option<String>,
}
