//! Anthropic request -> OpenAI Chat Completions request.

use crate::messages::anthropic::{
    ContentBlock, ImageSource, MessagesRequest, Role, ToolChoice, ToolSpec,
};
use crate::messages::convert::IMAGE_FALLBACK_TEXT;
use crate::messages::openai;

/// Result of a request conversion.
///
/// Warnings describe lossy normalizations (dropped sampling knobs,
/// replaced image parts); they are logged by the caller, never surfaced to
/// the client, and never fail the request.
pub struct ConvertedRequest {
    pub request: openai::ChatCompletionRequest,
    pub warnings: Vec<String>,
}

/// Translate a mapped Messages request into a Chat Completions body.
///
/// `max_tokens` is clamped to the configured ceiling here so no upstream
/// ever sees an oversized value.
pub fn chat_completion_request(request: MessagesRequest, max_tokens_limit: u32) -> ConvertedRequest {
    let mut warnings = Vec::new();
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(openai::ChatMessage {
            role: openai::ChatRole::System,
            content: Some(openai::ChatContent::Text(system.to_text())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in request.messages {
        convert_message(message.role, message.content.into_blocks(), &mut messages, &mut warnings);
    }

    if request.top_k.is_some() {
        warnings.push("top_k is not supported by this upstream and was dropped".to_string());
    }

    let request = openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: Some(request.max_tokens.min(max_tokens_limit)),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: None,
        tools: request.tools.map(|tools| tools.into_iter().map(tool).collect()),
        tool_choice: request.tool_choice.map(tool_choice),
        user: request.metadata.and_then(|metadata| metadata.user_id),
    };

    ConvertedRequest { request, warnings }
}

/// Convert one Anthropic message into one or more chat messages.
///
/// Tool results split out into separate `tool` role messages immediately
/// following their carrier; an assistant message's tool_use blocks lift
/// into the sibling `tool_calls` array.
fn convert_message(
    role: Role,
    blocks: Vec<ContentBlock>,
    messages: &mut Vec<openai::ChatMessage>,
    warnings: &mut Vec<String>,
) {
    let chat_role = match role {
        Role::User => openai::ChatRole::User,
        Role::Assistant => openai::ChatRole::Assistant,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(openai::ContentPart::Text { text }),
            ContentBlock::Image { source } => parts.push(image_part(source, warnings)),
            ContentBlock::ToolUse { id, name, input } => {
                if role == Role::Assistant {
                    tool_calls.push(openai::ToolCall {
                        id,
                        tool_type: openai::ToolType::Function,
                        function: openai::FunctionCall {
                            name,
                            arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                } else {
                    warnings.push(format!("tool_use block {id} in a user message was dropped"));
                }
            }
            ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                tool_results.push(openai::ChatMessage {
                    role: openai::ChatRole::Tool,
                    content: Some(openai::ChatContent::Text(content.to_text())),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
            // Reasoning is an output-side concept; upstreams reject it in
            // request history.
            ContentBlock::Thinking { .. } => {}
        }
    }

    let content = match parts.len() {
        0 => None,
        1 if matches!(parts[0], openai::ContentPart::Text { .. }) => match parts.remove(0) {
            openai::ContentPart::Text { text } => Some(openai::ChatContent::Text(text)),
            part => Some(openai::ChatContent::Parts(vec![part])),
        },
        _ => Some(openai::ChatContent::Parts(parts)),
    };

    if content.is_some() || !tool_calls.is_empty() {
        messages.push(openai::ChatMessage {
            role: chat_role,
            content,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        });
    }

    messages.extend(tool_results);
}

/// Convert an image block, substituting a text fallback for sources the
/// upstream cannot accept. Availability wins over strictness here.
fn image_part(source: ImageSource, warnings: &mut Vec<String>) -> openai::ContentPart {
    let supported =
        source.source_type == "base64" && source.media_type.starts_with("image/") && !source.data.is_empty();

    if supported {
        openai::ContentPart::ImageUrl {
            image_url: openai::ImageUrl {
                url: format!("data:{};base64,{}", source.media_type, source.data),
            },
        }
    } else {
        warnings.push(format!(
            "unsupported image source (type {:?}, media type {:?}) replaced with text fallback",
            source.source_type, source.media_type
        ));

        openai::ContentPart::Text {
            text: IMAGE_FALLBACK_TEXT.to_string(),
        }
    }
}

fn tool(spec: ToolSpec) -> openai::Tool {
    openai::Tool {
        tool_type: openai::ToolType::Function,
        function: openai::FunctionDefinition {
            name: spec.name,
            description: spec.description,
            parameters: spec.input_schema,
        },
    }
}

fn tool_choice(choice: ToolChoice) -> openai::ToolChoice {
    match choice {
        ToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
        ToolChoice::Any => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
        ToolChoice::Tool { name } => openai::ToolChoice::Specific {
            tool_type: openai::ToolType::Function,
            function: openai::FunctionName { name },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_from(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "system": "be brief",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let converted = chat_completion_request(request, 8192);

        assert_eq!(converted.request.messages.len(), 2);
        assert_eq!(converted.request.messages[0].role, openai::ChatRole::System);
        assert_eq!(
            converted.request.messages[0].content,
            Some(openai::ChatContent::Text("be brief".to_string()))
        );
        assert!(converted.warnings.is_empty());
    }

    #[test]
    fn system_block_list_is_flattened() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "system": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}],
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let converted = chat_completion_request(request, 8192);

        assert_eq!(
            converted.request.messages[0].content,
            Some(openai::ChatContent::Text("one\n\ntwo".to_string()))
        );
    }

    #[test]
    fn assistant_tool_use_lifts_into_tool_calls() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "add 1 and 2"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "sure"},
                    {"type": "tool_use", "id": "toolu_1", "name": "adder", "input": {"a": 1, "b": 2}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "3"}
                ]}
            ]
        }));

        let converted = chat_completion_request(request, 8192);
        let messages = &converted.request.messages;

        assert_eq!(messages.len(), 3);

        let assistant = &messages[1];
        assert_eq!(assistant.role, openai::ChatRole::Assistant);
        assert_eq!(
            assistant.content,
            Some(openai::ChatContent::Text("sure".to_string()))
        );
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "adder");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&calls[0].function.arguments).unwrap(),
            json!({"a": 1, "b": 2})
        );

        let tool = &messages[2];
        assert_eq!(tool.role, openai::ChatRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(tool.content, Some(openai::ChatContent::Text("3".to_string())));
    }

    #[test]
    fn valid_image_becomes_data_url() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
            ]}]
        }));

        let converted = chat_completion_request(request, 8192);

        let Some(openai::ChatContent::Parts(parts)) = &converted.request.messages[0].content else {
            unreachable!("expected multi-part content");
        };
        assert_eq!(
            parts[1],
            openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string()
                }
            }
        );
        assert!(converted.warnings.is_empty());
    }

    #[test]
    fn malformed_image_falls_back_to_text_with_warning() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image", "source": {"type": "base64", "media_type": "application/pdf", "data": "AAAA"}}
            ]}]
        }));

        let converted = chat_completion_request(request, 8192);

        let Some(openai::ChatContent::Parts(parts)) = &converted.request.messages[0].content else {
            unreachable!("expected multi-part content");
        };
        assert_eq!(
            parts[1],
            openai::ContentPart::Text {
                text: IMAGE_FALLBACK_TEXT.to_string()
            }
        );
        assert_eq!(converted.warnings.len(), 1);
    }

    #[test]
    fn max_tokens_is_clamped() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100000,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let converted = chat_completion_request(request, 4096);
        assert_eq!(converted.request.max_tokens, Some(4096));
    }

    #[test]
    fn top_k_is_dropped_with_warning() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "top_k": 40,
            "temperature": 0.5,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let converted = chat_completion_request(request, 8192);

        assert_eq!(converted.request.temperature, Some(0.5));
        assert!(converted.warnings.iter().any(|w| w.contains("top_k")));
    }

    #[test]
    fn tool_choice_mapping() {
        for (choice, expected) in [
            (json!({"type": "auto"}), json!("auto")),
            (json!({"type": "any"}), json!("required")),
            (
                json!({"type": "tool", "name": "echo"}),
                json!({"type": "function", "function": {"name": "echo"}}),
            ),
        ] {
            let request = request_from(json!({
                "model": "m",
                "max_tokens": 100,
                "messages": [{"role": "user", "content": "hi"}],
                "tools": [{"name": "echo", "input_schema": {"type": "object"}}],
                "tool_choice": choice
            }));

            let converted = chat_completion_request(request, 8192);
            assert_eq!(
                serde_json::to_value(converted.request.tool_choice.unwrap()).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn thinking_blocks_are_dropped_from_history() {
        let request = request_from(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "hello"}
                ]}
            ]
        }));

        let converted = chat_completion_request(request, 8192);

        assert_eq!(
            converted.request.messages[1].content,
            Some(openai::ChatContent::Text("hello".to_string()))
        );
    }
}
