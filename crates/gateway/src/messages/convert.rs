//! Bidirectional translation between the Anthropic Messages format and the
//! OpenAI Chat Completions format.
//!
//! Both directions are pure and synchronous over already-materialized data;
//! all I/O happens in the upstream clients.

pub mod from_openai;
pub mod to_openai;

/// Fallback text substituted for image parts the upstream cannot accept.
pub(crate) const IMAGE_FALLBACK_TEXT: &str = "[Image content not supported]";

/// Parse tool-call arguments, preserving malformed JSON instead of failing.
///
/// The model's own output is not trusted to be valid JSON; a parse failure
/// wraps the raw string so the conversation can continue and the handler
/// (or the model, next round) can decide what to do with it.
pub(crate) fn parse_tool_arguments(arguments: &str) -> serde_json::Value {
    let trimmed = arguments.trim();

    if trimmed.is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }

    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::json!({ "raw_input": arguments }))
}
