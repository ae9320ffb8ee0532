//! Prompt token counting for the `count_tokens` endpoint.
//!
//! Uses the cl100k BPE as a provider-neutral approximation; the upstreams
//! this gateway fronts do not expose their exact tokenizers.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use crate::messages::anthropic::{ContentBlock, CountTokensRequest, MessageContent};

/// Fixed per-message overhead, approximating role and framing tokens.
const PER_MESSAGE_OVERHEAD: u32 = 4;

fn bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

    BPE.get_or_init(|| {
        tiktoken_rs::cl100k_base()
            .map_err(|error| {
                log::error!("failed to initialize cl100k tokenizer: {error}");
                error
            })
            .ok()
    })
    .as_ref()
}

fn count_text(text: &str) -> u32 {
    match bpe() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        // Rough fallback so the endpoint still answers if the BPE tables
        // failed to load.
        None => text.len().div_ceil(4) as u32,
    }
}

/// Count the prompt tokens a request would consume.
pub(crate) fn count_input_tokens(request: &CountTokensRequest) -> u32 {
    let mut total = 0;

    if let Some(system) = &request.system {
        total += count_text(&system.to_text());
    }

    for message in &request.messages {
        total += PER_MESSAGE_OVERHEAD;

        match &message.content {
            MessageContent::Text(text) => total += count_text(text),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total += count_block(block);
                }
            }
        }
    }

    for tool in request.tools.as_deref().unwrap_or_default() {
        total += count_text(&tool.name);
        if let Some(description) = &tool.description {
            total += count_text(description);
        }
        total += count_text(&tool.input_schema.to_string());
    }

    total
}

fn count_block(block: &ContentBlock) -> u32 {
    match block {
        ContentBlock::Text { text } => count_text(text),
        // Images count as a flat approximation; the real cost depends on
        // resolution, which the gateway does not inspect.
        ContentBlock::Image { .. } => 1568,
        ContentBlock::ToolUse { name, input, .. } => count_text(name) + count_text(&input.to_string()),
        ContentBlock::ToolResult { content, .. } => count_text(&content.to_text()),
        ContentBlock::Thinking { thinking, .. } => count_text(thinking),
    }
}
