//! The conversation continuation loop.
//!
//! One orchestrator instance per process drives the multi-round tool-use /
//! tool-result cycle: send the conversation upstream, inspect the response,
//! execute any requested tools locally, fold the results back in, repeat
//! until the upstream stops asking for tools or the round cap is hit. The
//! orchestrator exclusively owns the in-flight conversation for the
//! duration of one inbound request.

use std::collections::HashMap;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt, future::BoxFuture};

use crate::error::{GatewayError, GatewayResult};
use crate::messages::anthropic::{
    ContentBlock, Message, MessageContent, MessagesRequest, MessagesResponse, Role, StopReason, ToolResultContent,
};
use crate::metrics::Metrics;
use crate::model_map::ModelMapper;
use crate::request::RequestContext;
use crate::stream::{BlockDelta, BlockStart, StreamEvent, collect::response_from_events};
use crate::tools::{ToolExecutionRecord, ToolInvocation, ToolRegistry, executor::ToolExecutor};
use crate::upstream::UpstreamRouter;

/// Outbound event stream handed to the HTTP layer; errors have already
/// been folded into `Error` + `MessageStop` events.
pub type OutboundStream = std::pin::Pin<Box<dyn futures::Stream<Item = StreamEvent> + Send>>;

pub struct Orchestrator {
    router: UpstreamRouter,
    executor: ToolExecutor,
    registry: Arc<ToolRegistry>,
    mapper: ModelMapper,
    max_rounds: u32,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        router: UpstreamRouter,
        executor: ToolExecutor,
        registry: Arc<ToolRegistry>,
        mapper: ModelMapper,
        max_rounds: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            router,
            executor,
            registry,
            mapper,
            max_rounds: max_rounds.max(1),
            metrics,
        }
    }

    /// Unary entry point: run rounds until a terminal response.
    pub async fn messages(
        &self,
        mut request: MessagesRequest,
        context: &RequestContext,
    ) -> GatewayResult<MessagesResponse> {
        request.validate().map_err(GatewayError::InvalidRequest)?;
        self.mapper.map(&mut request);

        for round in 1..=self.max_rounds {
            let response = self.router.send(&request, context).await?;
            let invocations = self.local_invocations(&response);

            if invocations.is_empty() {
                return Ok(response);
            }

            if round == self.max_rounds {
                log::warn!(
                    "request {} hit the tool round cap of {} with unresolved tool use",
                    context.request_id,
                    self.max_rounds
                );
                return Ok(capped(response));
            }

            log::debug!(
                "request {} round {round}: executing {} tool(s)",
                context.request_id,
                invocations.len()
            );
            self.metrics.record_continuation_round();

            let records = self.executor.execute_batch(invocations, context).await;

            if records.iter().any(ToolExecutionRecord::is_security_violation) {
                log::warn!(
                    "request {} blocked by security policy, returning tool use to caller",
                    context.request_id
                );
                return Ok(response);
            }

            extend_conversation(&mut request, response.content, &records);
        }

        // max_rounds >= 1 means the loop always returns from within.
        Err(GatewayError::Internal(None))
    }

    /// Streaming entry point.
    ///
    /// The first upstream round is opened before returning so a non-200
    /// status still surfaces as a proper HTTP error; after that, all
    /// failures become `Error` + `MessageStop` events on the stream.
    pub async fn messages_stream(
        self: Arc<Self>,
        mut request: MessagesRequest,
        context: RequestContext,
    ) -> GatewayResult<OutboundStream> {
        request.validate().map_err(GatewayError::InvalidRequest)?;
        self.mapper.map(&mut request);

        let first_round = self.router.send_stream(&request, &context).await?;

        let (sender, receiver) = mpsc::channel(64);

        tokio::spawn(async move {
            self.drive_rounds(request, context, first_round, sender).await;
        });

        Ok(Box::pin(receiver))
    }

    /// Tool-use blocks this process will execute locally.
    ///
    /// When no tools are registered at all, the gateway is a pure proxy
    /// and tool use belongs to the caller; the loop terminates instead of
    /// manufacturing unknown-tool failures.
    fn local_invocations(&self, response: &MessagesResponse) -> Vec<ToolInvocation> {
        if self.registry.names().is_empty() {
            return Vec::new();
        }

        extract_invocations(&response.content)
    }

    /// Drive all streaming rounds, writing outbound events to `sender`.
    async fn drive_rounds(
        self: Arc<Self>,
        mut request: MessagesRequest,
        context: RequestContext,
        first_round: crate::upstream::EventStream,
        mut sender: mpsc::Sender<StreamEvent>,
    ) {
        let execute_locally = !self.registry.names().is_empty();
        let mut upstream = first_round;
        let mut out = OutboundState::new(request.echo_model().to_string());

        for round in 1..=self.max_rounds {
            let dispatch_tools = execute_locally && round < self.max_rounds;

            let outcome = Self::drive_one_round(&self, &mut upstream, &context, &mut out, dispatch_tools, &mut sender).await;

            match outcome {
                RoundOutcome::ClientGone => return,
                RoundOutcome::Finished { terminal } => {
                    let _ = sender
                        .send(StreamEvent::MessageDelta {
                            stop_reason: Some(terminal.stop_reason),
                            stop_sequence: terminal.stop_sequence,
                            output_tokens: Some(out.total_output_tokens),
                        })
                        .await;
                    let _ = sender.send(StreamEvent::MessageStop).await;
                    return;
                }
                RoundOutcome::ToolsExecuted { assistant_content, records } => {
                    self.metrics.record_continuation_round();
                    extend_conversation(&mut request, assistant_content, &records);

                    match self.router.send_stream(&request, &context).await {
                        Ok(next) => upstream = next,
                        Err(error) => {
                            send_stream_error(&mut sender, &error).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Consume one upstream round, forwarding remapped events and running
    /// tools as their blocks close.
    async fn drive_one_round(
        orchestrator: &Arc<Self>,
        upstream: &mut crate::upstream::EventStream,
        context: &RequestContext,
        out: &mut OutboundState,
        dispatch_tools: bool,
        sender: &mut mpsc::Sender<StreamEvent>,
    ) -> RoundOutcome {
        let mut round = RoundState::new();
        let mut pending: FuturesUnordered<BoxFuture<'static, ToolExecutionRecord>> = FuturesUnordered::new();

        loop {
            tokio::select! {
                event = upstream.next() => match event {
                    None => break,
                    Some(Err(error)) => {
                        send_stream_error(sender, &error).await;
                        return RoundOutcome::ClientGone;
                    }
                    Some(Ok(event)) => {
                        match Self::handle_round_event(orchestrator, event, context, out, &mut round, dispatch_tools, &mut pending, sender).await {
                            ControlFlow::Continue => {}
                            ControlFlow::Stop => break,
                            ControlFlow::ClientGone => return RoundOutcome::ClientGone,
                        }
                    }
                },
                Some(record) = pending.next(), if !pending.is_empty() => {
                    if !orchestrator.emit_tool_record(&record, out, sender).await {
                        return RoundOutcome::ClientGone;
                    }
                    round.completed.insert(record.tool_use_id.clone(), record);
                },
            }
        }

        // Upstream round complete; finish outstanding tool work.
        while let Some(record) = pending.next().await {
            if !orchestrator.emit_tool_record(&record, out, sender).await {
                return RoundOutcome::ClientGone;
            }
            round.completed.insert(record.tool_use_id.clone(), record);
        }

        let assistant = response_from_events(&round.events, "");
        let has_tool_use = assistant.has_tool_use();

        if !has_tool_use || !dispatch_tools {
            return RoundOutcome::Finished {
                terminal: TerminalInfo {
                    stop_reason: if has_tool_use {
                        StopReason::ToolUse
                    } else {
                        round.stop_reason.unwrap_or(StopReason::EndTurn)
                    },
                    stop_sequence: round.stop_sequence,
                },
            };
        }

        // Records in invocation (block) order, matching the unary path.
        let records = round
            .invocation_order
            .iter()
            .filter_map(|id| round.completed.remove(id))
            .collect::<Vec<_>>();

        if records.iter().any(ToolExecutionRecord::is_security_violation) {
            log::warn!(
                "request {} blocked by security policy mid-stream",
                context.request_id
            );
            return RoundOutcome::Finished {
                terminal: TerminalInfo {
                    stop_reason: StopReason::ToolUse,
                    stop_sequence: None,
                },
            };
        }

        RoundOutcome::ToolsExecuted {
            assistant_content: assistant.content,
            records,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_round_event(
        orchestrator: &Arc<Self>,
        event: StreamEvent,
        context: &RequestContext,
        out: &mut OutboundState,
        round: &mut RoundState,
        dispatch_tools: bool,
        pending: &mut FuturesUnordered<BoxFuture<'static, ToolExecutionRecord>>,
        sender: &mut mpsc::Sender<StreamEvent>,
    ) -> ControlFlow {
        match event {
            StreamEvent::MessageStart { id, role, .. } => {
                if !out.started {
                    out.started = true;
                    // The upstream reports its resolved model name; the
                    // caller gets the alias it asked for.
                    if sender
                        .send(StreamEvent::MessageStart {
                            id,
                            model: out.echo_model.clone(),
                            role,
                        })
                        .await
                        .is_err()
                    {
                        return ControlFlow::ClientGone;
                    }
                }
                ControlFlow::Continue
            }
            StreamEvent::ContentBlockStart { index, block } => {
                let outbound_index = out.next_index();
                round.index_map.insert(index, outbound_index);

                if let BlockStart::ToolUse { id, name } = &block {
                    round.open_tools.insert(
                        index,
                        ToolAccumulator {
                            id: id.clone(),
                            name: name.clone(),
                            input_json: String::new(),
                        },
                    );
                }

                let remapped = StreamEvent::ContentBlockStart {
                    index: outbound_index,
                    block,
                };
                round.events.push(remapped.clone());

                if sender.send(remapped).await.is_err() {
                    ControlFlow::ClientGone
                } else {
                    ControlFlow::Continue
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let (Some(accumulator), BlockDelta::ToolInput(fragment)) =
                    (round.open_tools.get_mut(&index), &delta)
                {
                    accumulator.input_json.push_str(fragment);
                }

                let outbound_index = round.index_map.get(&index).copied().unwrap_or(index);
                let remapped = StreamEvent::ContentBlockDelta {
                    index: outbound_index,
                    delta,
                };
                round.events.push(remapped.clone());

                if sender.send(remapped).await.is_err() {
                    ControlFlow::ClientGone
                } else {
                    ControlFlow::Continue
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                let outbound_index = round.index_map.get(&index).copied().unwrap_or(index);
                let remapped = StreamEvent::ContentBlockStop { index: outbound_index };
                round.events.push(remapped.clone());

                if sender.send(remapped).await.is_err() {
                    return ControlFlow::ClientGone;
                }

                // A tool block is complete the moment it closes; dispatch
                // without waiting for the rest of the stream.
                if let Some(accumulator) = round.open_tools.remove(&index) {
                    round.invocation_order.push(accumulator.id.clone());

                    if dispatch_tools {
                        let invocation = ToolInvocation {
                            id: accumulator.id,
                            name: accumulator.name,
                            input: crate::messages::convert::parse_tool_arguments(&accumulator.input_json),
                        };

                        let executor_handle = orchestrator.clone();
                        let task_context = context.clone();
                        pending.push(Box::pin(async move {
                            executor_handle.executor.execute_one(invocation, &task_context).await
                        }));
                    }
                }

                ControlFlow::Continue
            }
            StreamEvent::MessageDelta {
                stop_reason,
                stop_sequence,
                output_tokens,
            } => {
                if let Some(reason) = stop_reason {
                    round.stop_reason = Some(reason);
                }
                if stop_sequence.is_some() {
                    round.stop_sequence = stop_sequence;
                }
                if let Some(tokens) = output_tokens {
                    out.total_output_tokens += tokens;
                }
                ControlFlow::Continue
            }
            StreamEvent::MessageStop => ControlFlow::Stop,
            StreamEvent::Error { kind, message } => {
                let _ = sender.send(StreamEvent::Error { kind, message }).await;
                let _ = sender.send(StreamEvent::MessageStop).await;
                ControlFlow::ClientGone
            }
        }
    }

    /// Splice one completed tool record into the outbound stream as a
    /// synthetic text block.
    async fn emit_tool_record(
        &self,
        record: &ToolExecutionRecord,
        out: &mut OutboundState,
        sender: &mut mpsc::Sender<StreamEvent>,
    ) -> bool {
        let index = out.next_index();
        let text = format!("Tool '{}' result:\n{}", record.tool_name, record.content());

        for event in [
            StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::Text,
            },
            StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::Text(text),
            },
            StreamEvent::ContentBlockStop { index },
        ] {
            if sender.send(event).await.is_err() {
                return false;
            }
        }

        true
    }
}

/// State shared across all rounds of one outbound stream.
struct OutboundState {
    started: bool,
    next_index: u32,
    total_output_tokens: u32,
    echo_model: String,
}

impl OutboundState {
    fn new(echo_model: String) -> Self {
        Self {
            started: false,
            next_index: 0,
            total_output_tokens: 0,
            echo_model,
        }
    }

    fn next_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

/// State for one upstream round.
struct RoundState {
    /// Remapped events, used to rebuild the assistant message.
    events: Vec<StreamEvent>,
    /// Upstream index -> outbound index.
    index_map: HashMap<u32, u32>,
    /// Tool blocks currently open, keyed by upstream index.
    open_tools: HashMap<u32, ToolAccumulator>,
    /// Tool-use ids in block order.
    invocation_order: Vec<String>,
    /// Completed records keyed by tool-use id.
    completed: HashMap<String, ToolExecutionRecord>,
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
}

impl RoundState {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            index_map: HashMap::new(),
            open_tools: HashMap::new(),
            invocation_order: Vec::new(),
            completed: HashMap::new(),
            stop_reason: None,
            stop_sequence: None,
        }
    }
}

struct ToolAccumulator {
    id: String,
    name: String,
    input_json: String,
}

struct TerminalInfo {
    stop_reason: StopReason,
    stop_sequence: Option<String>,
}

enum RoundOutcome {
    /// The receiver went away; stop everything.
    ClientGone,
    /// Terminal round; emit the closing frames.
    Finished { terminal: TerminalInfo },
    /// Tools ran; build the continuation and start the next round.
    ToolsExecuted {
        assistant_content: Vec<ContentBlock>,
        records: Vec<ToolExecutionRecord>,
    },
}

enum ControlFlow {
    Continue,
    Stop,
    ClientGone,
}

/// Force the round-cap stop reason without touching the content.
fn capped(mut response: MessagesResponse) -> MessagesResponse {
    response.stop_reason = Some(StopReason::ToolUse);
    response
}

/// Extract tool invocations from response content, in block order.
fn extract_invocations(content: &[ContentBlock]) -> Vec<ToolInvocation> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Append the assistant turn and the tool results to the conversation.
fn extend_conversation(request: &mut MessagesRequest, assistant_content: Vec<ContentBlock>, records: &[ToolExecutionRecord]) {
    request.messages.push(Message {
        role: Role::Assistant,
        content: MessageContent::Blocks(assistant_content),
    });

    let results = records
        .iter()
        .map(|record| ContentBlock::ToolResult {
            tool_use_id: record.tool_use_id.clone(),
            content: ToolResultContent::Text(record.content()),
            is_error: (!record.success).then_some(true),
        })
        .collect();

    request.messages.push(Message {
        role: Role::User,
        content: MessageContent::Blocks(results),
    });
}

async fn send_stream_error(sender: &mut mpsc::Sender<StreamEvent>, error: &GatewayError) {
    log::error!("stream failed mid-flight: {error}");

    let _ = sender
        .send(StreamEvent::Error {
            kind: error.error_type().to_string(),
            message: error.client_message(),
        })
        .await;
    let _ = sender.send(StreamEvent::MessageStop).await;
}
