//! OpenAI Chat Completions response -> Anthropic Messages response.

use uuid::Uuid;

use crate::messages::anthropic::{ContentBlock, MessagesResponse, Role, StopReason, Usage};
use crate::messages::convert::parse_tool_arguments;
use crate::messages::openai;

/// Translate a Chat Completions response into a Messages response.
///
/// `echo_model` is the caller's original model string; the backend-resolved
/// name in the upstream body is discarded.
pub fn messages_response(response: openai::ChatCompletionResponse, echo_model: &str) -> MessagesResponse {
    let usage = response.usage.map(usage).unwrap_or_default();
    let id = response.id.unwrap_or_else(|| format!("msg_{}", Uuid::new_v4()));

    let Some(choice) = response.choices.into_iter().next() else {
        // An empty choices array is a degenerate but observed upstream
        // response; surface it as an empty turn rather than an error.
        return MessagesResponse {
            id,
            response_type: "message".to_string(),
            role: Role::Assistant,
            content: Vec::new(),
            model: echo_model.to_string(),
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            usage,
        };
    };

    let mut content = Vec::new();

    if let Some(thinking) = choice.message.reasoning_content
        && !thinking.is_empty()
    {
        content.push(ContentBlock::Thinking {
            thinking,
            signature: None,
        });
    }

    for block in choice.message.thinking_blocks.unwrap_or_default() {
        content.push(ContentBlock::Thinking {
            thinking: block.thinking,
            signature: block.signature,
        });
    }

    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::Text { text });
    }

    let mut saw_tool_calls = false;

    for call in choice.message.tool_calls.unwrap_or_default() {
        saw_tool_calls = true;
        content.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_tool_arguments(&call.function.arguments),
        });
    }

    let stop_reason = if saw_tool_calls {
        StopReason::ToolUse
    } else {
        stop_reason(choice.finish_reason)
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: Role::Assistant,
        content,
        model: echo_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Map an OpenAI finish reason to an Anthropic stop reason.
///
/// Unknown reasons map to `end_turn`; an exotic upstream value must not
/// break the conversation.
pub fn stop_reason(finish_reason: Option<openai::FinishReason>) -> StopReason {
    match finish_reason {
        Some(openai::FinishReason::Length) => StopReason::MaxTokens,
        Some(openai::FinishReason::ToolCalls) | Some(openai::FinishReason::FunctionCall) => StopReason::ToolUse,
        Some(openai::FinishReason::ContentFilter) => StopReason::StopSequence,
        Some(openai::FinishReason::Stop) | Some(openai::FinishReason::Other) | None => StopReason::EndTurn,
    }
}

fn usage(usage: openai::Usage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    }
}
