//! Re-emission of normalized events in a caller wire format.

use serde_json::json;

use crate::messages::anthropic::{
    self, ContentBlock, ContentDelta, ErrorDetails, MessageDeltaBody, MessagesStreamEvent, StreamMessageStart, Usage,
};
use crate::messages::openai;
use crate::stream::{BlockDelta, BlockStart, StreamEvent};

impl From<StreamEvent> for MessagesStreamEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::MessageStart { id, model, role } => MessagesStreamEvent::MessageStart {
                message: StreamMessageStart {
                    id,
                    message_type: "message".to_string(),
                    role,
                    content: Vec::new(),
                    model,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart { index, block } => MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: match block {
                    BlockStart::Text => ContentBlock::Text { text: String::new() },
                    BlockStart::ToolUse { id, name } => ContentBlock::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                    BlockStart::Thinking => ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                },
            },
            StreamEvent::ContentBlockDelta { index, delta } => MessagesStreamEvent::ContentBlockDelta {
                index,
                delta: match delta {
                    BlockDelta::Text(text) => ContentDelta::TextDelta { text },
                    BlockDelta::ToolInput(partial_json) => ContentDelta::InputJsonDelta { partial_json },
                    BlockDelta::Thinking(thinking) => ContentDelta::ThinkingDelta { thinking },
                },
            },
            StreamEvent::ContentBlockStop { index } => MessagesStreamEvent::ContentBlockStop { index },
            StreamEvent::MessageDelta {
                stop_reason,
                stop_sequence,
                output_tokens,
            } => MessagesStreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason,
                    stop_sequence,
                },
                usage: Usage {
                    input_tokens: 0,
                    output_tokens: output_tokens.unwrap_or(0),
                },
            },
            StreamEvent::MessageStop => MessagesStreamEvent::MessageStop,
            StreamEvent::Error { kind, message } => MessagesStreamEvent::Error {
                error: ErrorDetails {
                    error_type: kind,
                    message,
                },
            },
        }
    }
}

/// Rebuild the OpenAI choice-delta envelope for one normalized event.
///
/// `MessageStop` has no chunk equivalent (the `[DONE]` frame covers it) and
/// returns `None`.
pub fn to_openai_chunk(event: StreamEvent, id: &str, model: &str) -> Option<openai::ChatCompletionChunk> {
    let delta_choice = |delta: openai::ChunkDelta, finish_reason: Option<openai::FinishReason>| {
        Some(openai::ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            model: model.to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        })
    };

    match event {
        StreamEvent::MessageStart { .. } => delta_choice(
            openai::ChunkDelta {
                role: Some(openai::ChatRole::Assistant),
                ..Default::default()
            },
            None,
        ),
        StreamEvent::ContentBlockStart { index, block } => match block {
            BlockStart::ToolUse { id: call_id, name } => delta_choice(
                openai::ChunkDelta {
                    tool_calls: Some(vec![openai::ToolCallDelta {
                        index: index as usize,
                        id: Some(call_id),
                        function: Some(openai::FunctionDelta {
                            name: Some(name),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
            // Text and thinking blocks materialize through their deltas.
            BlockStart::Text | BlockStart::Thinking => None,
        },
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::Text(text) => delta_choice(
                openai::ChunkDelta {
                    content: Some(text),
                    ..Default::default()
                },
                None,
            ),
            BlockDelta::Thinking(thinking) => delta_choice(
                openai::ChunkDelta {
                    reasoning_content: Some(thinking),
                    ..Default::default()
                },
                None,
            ),
            BlockDelta::ToolInput(arguments) => delta_choice(
                openai::ChunkDelta {
                    tool_calls: Some(vec![openai::ToolCallDelta {
                        index: index as usize,
                        id: None,
                        function: Some(openai::FunctionDelta {
                            name: None,
                            arguments: Some(arguments),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
        },
        StreamEvent::ContentBlockStop { .. } => None,
        StreamEvent::MessageDelta {
            stop_reason,
            output_tokens,
            ..
        } => Some(openai::ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            model: model.to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta: openai::ChunkDelta::default(),
                finish_reason: stop_reason.map(finish_reason),
            }],
            usage: output_tokens.map(|tokens| openai::Usage {
                prompt_tokens: 0,
                completion_tokens: tokens,
                total_tokens: tokens,
            }),
        }),
        StreamEvent::MessageStop => None,
        StreamEvent::Error { .. } => None,
    }
}

fn finish_reason(stop_reason: anthropic::StopReason) -> openai::FinishReason {
    match stop_reason {
        anthropic::StopReason::EndTurn => openai::FinishReason::Stop,
        anthropic::StopReason::MaxTokens => openai::FinishReason::Length,
        anthropic::StopReason::StopSequence => openai::FinishReason::Stop,
        anthropic::StopReason::ToolUse => openai::FinishReason::ToolCalls,
        anthropic::StopReason::Error => openai::FinishReason::Stop,
    }
}
