//! Chunk normalization: upstream stream formats -> [`StreamEvent`].
//!
//! OpenAI-compatible chunks go through a small state machine that assigns
//! dense block indices and guarantees the start/delta/stop ordering
//! invariant even for upstreams that end without a finish_reason.
//! Anthropic-native events map one-to-one.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project::pin_project;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::messages::anthropic::{self, Role, StopReason};
use crate::messages::convert::from_openai;
use crate::messages::openai;
use crate::stream::{BlockDelta, BlockStart, StreamEvent};

/// Stream adapter normalizing OpenAI chunks into [`StreamEvent`]s.
///
/// Transport errors pass through as `Err`; the consumer decides how to
/// represent them on its wire. When the inner stream ends without a
/// finish_reason the adapter flushes the closing sequence itself, so the
/// ordering invariant holds for truncated upstreams too.
#[pin_project]
pub(crate) struct NormalizedChunkStream<S> {
    #[pin]
    inner: S,
    state: ChunkNormalizer,
    pending: VecDeque<StreamEvent>,
    inner_done: bool,
}

impl<S> NormalizedChunkStream<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            state: ChunkNormalizer::new(),
            pending: VecDeque::new(),
            inner_done: false,
        }
    }
}

impl<S> Stream for NormalizedChunkStream<S>
where
    S: Stream<Item = Result<openai::ChatCompletionChunk, GatewayError>>,
{
    type Item = Result<StreamEvent, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            if *this.inner_done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.state.push(chunk));
                }
                Poll::Ready(Some(Err(error))) => {
                    *this.inner_done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    *this.inner_done = true;
                    this.pending.extend(this.state.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Which kind of block is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
    ToolUse,
}

/// State machine translating OpenAI chunk deltas into block events.
///
/// At most one block is open at a time: OpenAI interleaves nothing within
/// a choice, and closing the previous block when a new one starts is what
/// lets the continuation loop dispatch a tool the moment its arguments are
/// complete.
#[derive(Debug)]
pub(crate) struct ChunkNormalizer {
    started: bool,
    finished: bool,
    next_index: u32,
    current: Option<(u32, OpenBlock)>,
    /// Upstream tool_calls array position -> our block index.
    tool_indices: HashMap<usize, u32>,
    output_tokens: Option<u32>,
}

impl ChunkNormalizer {
    pub(crate) fn new() -> Self {
        Self {
            started: false,
            finished: false,
            next_index: 0,
            current: None,
            tool_indices: HashMap::new(),
            output_tokens: None,
        }
    }

    /// Feed one chunk, producing zero or more normalized events.
    pub(crate) fn push(&mut self, chunk: openai::ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if self.finished {
            return events;
        }

        if !self.started {
            self.started = true;

            let id = if chunk.id.is_empty() {
                format!("msg_{}", Uuid::new_v4())
            } else {
                chunk.id.clone()
            };

            events.push(StreamEvent::MessageStart {
                id,
                model: chunk.model.clone(),
                role: Role::Assistant,
            });
        }

        if let Some(usage) = &chunk.usage {
            self.output_tokens = Some(usage.completion_tokens);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(thinking) = choice.delta.reasoning_content
            && !thinking.is_empty()
        {
            self.ensure_open(OpenBlock::Thinking, &mut events, || BlockStart::Thinking);
            let index = self.current_index();
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::Thinking(thinking),
            });
        }

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            self.ensure_open(OpenBlock::Text, &mut events, || BlockStart::Text);
            let index = self.current_index();
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::Text(text),
            });
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            self.push_tool_fragment(call, &mut events);
        }

        if let Some(finish_reason) = choice.finish_reason {
            self.close_current(&mut events);
            events.push(StreamEvent::MessageDelta {
                stop_reason: Some(from_openai::stop_reason(Some(finish_reason))),
                stop_sequence: None,
                output_tokens: self.output_tokens,
            });
            events.push(StreamEvent::MessageStop);
            self.finished = true;
        }

        events
    }

    /// Flush the closing sequence for a stream that ended abruptly.
    pub(crate) fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if self.finished || !self.started {
            return events;
        }

        self.close_current(&mut events);
        events.push(StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            output_tokens: self.output_tokens,
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;

        events
    }

    fn push_tool_fragment(&mut self, call: openai::ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let known = self.tool_indices.contains_key(&call.index);
        let function = call.function.unwrap_or_default();

        if !known {
            let name = function.name.clone().unwrap_or_default();
            let id = call.id.clone().unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4()));

            self.close_current(events);

            let index = self.next_index;
            self.next_index += 1;
            self.tool_indices.insert(call.index, index);
            self.current = Some((index, OpenBlock::ToolUse));

            events.push(StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::ToolUse { id, name },
            });
        }

        if let Some(arguments) = function.arguments
            && !arguments.is_empty()
        {
            let index = self.tool_indices[&call.index];

            // A fragment for a block that already closed (a later tool
            // call opened) would break the start/delta/stop ordering.
            if matches!(self.current, Some((open, OpenBlock::ToolUse)) if open == index) {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::ToolInput(arguments),
                });
            } else {
                log::warn!("dropping tool-call argument fragment for closed block {index}");
            }
        }
    }

    fn ensure_open(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>, start: impl FnOnce() -> BlockStart) {
        if matches!(self.current, Some((_, open)) if open == kind) {
            return;
        }

        self.close_current(events);

        let index = self.next_index;
        self.next_index += 1;
        self.current = Some((index, kind));

        events.push(StreamEvent::ContentBlockStart { index, block: start() });
    }

    fn close_current(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some((index, _)) = self.current.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn current_index(&self) -> u32 {
        self.current.map(|(index, _)| index).unwrap_or_default()
    }
}

/// Map an Anthropic-native SSE event to normalized events.
///
/// This is the identity path for the passthrough backend; the only real
/// work is flattening non-empty start shells into a start plus a delta.
pub(crate) fn from_anthropic_event(event: anthropic::MessagesStreamEvent) -> Vec<StreamEvent> {
    use anthropic::{ContentDelta, MessagesStreamEvent};

    match event {
        MessagesStreamEvent::MessageStart { message } => vec![StreamEvent::MessageStart {
            id: message.id,
            model: message.model,
            role: message.role,
        }],
        MessagesStreamEvent::ContentBlockStart { index, content_block } => match content_block {
            anthropic::ContentBlock::Text { text } => {
                let mut events = vec![StreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::Text,
                }];
                if !text.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::Text(text),
                    });
                }
                events
            }
            anthropic::ContentBlock::ToolUse { id, name, .. } => vec![StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::ToolUse { id, name },
            }],
            anthropic::ContentBlock::Thinking { thinking, .. } => {
                let mut events = vec![StreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::Thinking,
                }];
                if !thinking.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::Thinking(thinking),
                    });
                }
                events
            }
            // Images and tool results do not stream.
            _ => vec![StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::Text,
            }],
        },
        MessagesStreamEvent::ContentBlockDelta { index, delta } => {
            let delta = match delta {
                ContentDelta::TextDelta { text } => BlockDelta::Text(text),
                ContentDelta::InputJsonDelta { partial_json } => BlockDelta::ToolInput(partial_json),
                ContentDelta::ThinkingDelta { thinking } => BlockDelta::Thinking(thinking),
            };
            vec![StreamEvent::ContentBlockDelta { index, delta }]
        }
        MessagesStreamEvent::ContentBlockStop { index } => vec![StreamEvent::ContentBlockStop { index }],
        MessagesStreamEvent::MessageDelta { delta, usage } => vec![StreamEvent::MessageDelta {
            stop_reason: delta.stop_reason,
            stop_sequence: delta.stop_sequence,
            output_tokens: Some(usage.output_tokens),
        }],
        MessagesStreamEvent::MessageStop => vec![StreamEvent::MessageStop],
        MessagesStreamEvent::Ping => Vec::new(),
        MessagesStreamEvent::Error { error } => vec![StreamEvent::Error {
            kind: error.error_type,
            message: error.message,
        }],
    }
}
