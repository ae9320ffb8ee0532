//! Normalized streaming events.
//!
//! Every upstream chunk format is reduced to one internal event type,
//! [`StreamEvent`], before anything else looks at it. The continuation loop
//! splices tool results into this representation, and the emit module
//! converts it back to whichever wire format the caller chose.

pub mod collect;
pub mod emit;
pub(crate) mod normalize;

use crate::messages::anthropic::{Role, StopReason};

/// One normalized streaming event.
///
/// Per block index the sequence is exactly one `ContentBlockStart`, zero or
/// more `ContentBlockDelta`, one `ContentBlockStop`; indices are dense in
/// first-seen order; `MessageStart` precedes all blocks and `MessageStop`
/// terminates the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The message opens.
    MessageStart {
        /// Message identifier.
        id: String,
        /// The model name to surface to the caller.
        model: String,
        /// Always assistant.
        role: Role,
    },

    /// A content block opens.
    ContentBlockStart {
        /// Dense block index.
        index: u32,
        /// The kind of block and its identity, without content.
        block: BlockStart,
    },

    /// Incremental content for an open block.
    ContentBlockDelta {
        /// The block being extended.
        index: u32,
        /// The fragment.
        delta: BlockDelta,
    },

    /// A content block closes.
    ContentBlockStop {
        /// The block being closed.
        index: u32,
    },

    /// Terminal message metadata.
    MessageDelta {
        /// Why generation stopped.
        stop_reason: Option<StopReason>,
        /// Matched stop sequence, if any.
        stop_sequence: Option<String>,
        /// Cumulative output tokens, when the upstream reports them.
        output_tokens: Option<u32>,
    },

    /// The stream ends.
    MessageStop,

    /// Mid-stream failure; always followed by `MessageStop`.
    Error {
        /// Anthropic error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

/// The empty shell a content block opens with.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    /// A text block.
    Text,

    /// A tool invocation; input arrives as `ToolInput` deltas.
    ToolUse {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
    },

    /// A reasoning block.
    Thinking,
}

/// Incremental content for an open block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockDelta {
    /// Text fragment.
    Text(String),

    /// Partial JSON for a tool input; fragments concatenate.
    ToolInput(String),

    /// Reasoning fragment.
    Thinking(String),
}
