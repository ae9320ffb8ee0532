//! Folding a finished event sequence back into a unary response.
//!
//! The continuation loop uses this to rebuild the assistant message it
//! must append before re-calling the upstream, and the stream-equivalence
//! property tests use it to compare streaming and unary results.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::messages::anthropic::{ContentBlock, MessagesResponse, Role, StopReason, Usage};
use crate::messages::convert::parse_tool_arguments;
use crate::stream::{BlockDelta, BlockStart, StreamEvent};

/// One block being accumulated.
enum PendingBlock {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String, input_json: String },
}

/// Fold a complete event sequence into a [`MessagesResponse`].
///
/// Tool inputs get their single JSON parse here, at block close, with the
/// same raw-input fallback as the unary translator.
pub fn response_from_events(events: &[StreamEvent], echo_model: &str) -> MessagesResponse {
    let mut id = None;
    let mut blocks: BTreeMap<u32, PendingBlock> = BTreeMap::new();
    let mut stop_reason = None;
    let mut stop_sequence = None;
    let mut output_tokens = 0;

    for event in events {
        match event {
            StreamEvent::MessageStart { id: message_id, .. } => {
                id = Some(message_id.clone());
            }
            StreamEvent::ContentBlockStart { index, block } => {
                let pending = match block {
                    BlockStart::Text => PendingBlock::Text(String::new()),
                    BlockStart::Thinking => PendingBlock::Thinking(String::new()),
                    BlockStart::ToolUse { id, name } => PendingBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input_json: String::new(),
                    },
                };
                blocks.insert(*index, pending);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(pending) = blocks.get_mut(index) {
                    match (pending, delta) {
                        (PendingBlock::Text(buffer), BlockDelta::Text(text)) => buffer.push_str(text),
                        (PendingBlock::Thinking(buffer), BlockDelta::Thinking(text)) => buffer.push_str(text),
                        (PendingBlock::ToolUse { input_json, .. }, BlockDelta::ToolInput(fragment)) => {
                            input_json.push_str(fragment);
                        }
                        // Mismatched delta kinds are upstream bugs; ignore
                        // rather than corrupt the block.
                        _ => {}
                    }
                }
            }
            StreamEvent::ContentBlockStop { .. } => {}
            StreamEvent::MessageDelta {
                stop_reason: reason,
                stop_sequence: sequence,
                output_tokens: tokens,
            } => {
                if reason.is_some() {
                    stop_reason = *reason;
                }
                if sequence.is_some() {
                    stop_sequence = sequence.clone();
                }
                if let Some(tokens) = tokens {
                    output_tokens = *tokens;
                }
            }
            StreamEvent::MessageStop => {}
            StreamEvent::Error { .. } => {
                stop_reason = Some(StopReason::Error);
            }
        }
    }

    let content = blocks
        .into_values()
        .map(|pending| match pending {
            PendingBlock::Text(text) => ContentBlock::Text { text },
            PendingBlock::Thinking(thinking) => ContentBlock::Thinking {
                thinking,
                signature: None,
            },
            PendingBlock::ToolUse { id, name, input_json } => ContentBlock::ToolUse {
                id,
                name,
                input: parse_tool_arguments(&input_json),
            },
        })
        .collect();

    MessagesResponse {
        id: id.unwrap_or_else(|| format!("msg_{}", Uuid::new_v4())),
        response_type: "message".to_string(),
        role: Role::Assistant,
        content,
        model: echo_model.to_string(),
        stop_reason: stop_reason.or(Some(StopReason::EndTurn)),
        stop_sequence,
        usage: Usage {
            input_tokens: 0,
            output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn folds_text_and_tool_blocks_in_index_order() {
        let events = vec![
            StreamEvent::MessageStart {
                id: "msg_1".to_string(),
                model: "m".to_string(),
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::Text,
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::Text("Let me ".to_string()),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::Text("check".to_string()),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::ContentBlockStart {
                index: 1,
                block: BlockStart::ToolUse {
                    id: "t1".to_string(),
                    name: "get_weather".to_string(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::ToolInput("{\"city\":".to_string()),
            },
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::ToolInput("\"Paris\"}".to_string()),
            },
            StreamEvent::ContentBlockStop { index: 1 },
            StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::ToolUse),
                stop_sequence: None,
                output_tokens: Some(9),
            },
            StreamEvent::MessageStop,
        ];

        let response = response_from_events(&events, "big");

        assert_eq!(response.id, "msg_1");
        assert_eq!(response.model, "big");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.output_tokens, 9);
        assert_eq!(
            response.content,
            vec![
                ContentBlock::Text {
                    text: "Let me check".to_string()
                },
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "Paris"}),
                },
            ]
        );
    }

    #[test]
    fn malformed_tool_input_falls_back_to_raw() {
        let events = vec![
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::ToolUse {
                    id: "t1".to_string(),
                    name: "x".to_string(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::ToolInput("{\"broken".to_string()),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageStop,
        ];

        let response = response_from_events(&events, "big");

        assert_eq!(
            response.content,
            vec![ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "x".to_string(),
                input: json!({"raw_input": "{\"broken"}),
            }]
        );
    }

    #[test]
    fn stream_error_marks_stop_reason() {
        let events = vec![
            StreamEvent::Error {
                kind: "api_error".to_string(),
                message: "boom".to_string(),
            },
            StreamEvent::MessageStop,
        ];

        let response = response_from_events(&events, "big");
        assert_eq!(response.stop_reason, Some(StopReason::Error));
    }
}
