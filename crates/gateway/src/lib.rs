//! prism gateway core.
//!
//! Exposes the Anthropic Messages API on its north side and dispatches to
//! a configured upstream backend on its south side, translating wire
//! formats, normalizing streams, and running requested tools locally with
//! multi-round conversation continuation.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State},
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::post,
};
use futures::StreamExt;

mod error;
mod http_client;
pub mod messages;
mod metrics;
mod model_map;
mod orchestrator;
mod request;
pub mod stream;
mod token_counter;
pub mod tools;
pub mod upstream;

pub use error::{GatewayError, GatewayResult};
pub use metrics::{Metrics, MetricsSnapshot};
pub use model_map::ModelMapper;
pub use orchestrator::{Orchestrator, OutboundStream};
pub use request::RequestContext;
pub use stream::StreamEvent;
pub use tools::{ToolHandler, ToolRegistry};
pub use upstream::{EventStream, Upstream, UpstreamRouter};

use messages::anthropic::{CountTokensRequest, CountTokensResponse, MessagesRequest, MessagesStreamEvent};

/// Process-wide gateway state: one orchestrator, one metrics aggregator.
pub struct Gateway {
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
    backend: config::BackendKind,
}

impl Gateway {
    /// Wire the gateway from configuration and an externally-populated
    /// tool registry. This is the composition root: everything downstream
    /// receives its dependencies here, by value.
    pub fn new(config: &config::Config, registry: Arc<ToolRegistry>) -> Self {
        let metrics = Arc::new(Metrics::default());

        let router = UpstreamRouter::from_config(config, metrics.clone());
        let executor = tools::executor::ToolExecutor::new(registry.clone(), config.tools.clone(), metrics.clone());
        let mapper = ModelMapper::new(config.backend, &config.big_model, &config.small_model);

        let orchestrator = Arc::new(Orchestrator::new(
            router,
            executor,
            registry,
            mapper,
            config.max_tool_rounds,
            metrics.clone(),
        ));

        Self {
            orchestrator,
            metrics,
            backend: config.backend,
        }
    }

    /// Build a gateway around an existing orchestrator; used by tests that
    /// script the upstream.
    pub fn with_orchestrator(orchestrator: Arc<Orchestrator>, metrics: Arc<Metrics>, backend: config::BackendKind) -> Self {
        Self {
            orchestrator,
            metrics,
            backend,
        }
    }

    /// Counter snapshot for the status surface.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The configured backend kind, for logs and the status surface.
    pub fn backend(&self) -> config::BackendKind {
        self.backend
    }
}

/// Routes for the Messages surface.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/messages/count_tokens", post(count_tokens_handler))
        .with_state(gateway)
}

/// Handle `POST /v1/messages`, unary or streaming.
async fn messages_handler(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(request): Json<MessagesRequest>,
) -> Result<Response, GatewayError> {
    let context = request::extract_context(&headers);
    let streaming = request.stream.unwrap_or(false);

    log::debug!(
        "request {} for model {} ({} message(s), streaming: {streaming})",
        context.request_id,
        request.model,
        request.messages.len(),
    );

    gateway.metrics.record_request(streaming);

    if streaming {
        let events = gateway.orchestrator.clone().messages_stream(request, context).await?;

        let sse = events
            .map(|event| {
                let wire = MessagesStreamEvent::from(event);
                let data = serde_json::to_string(&wire).unwrap_or_else(|error| {
                    log::error!("failed to serialize stream event: {error}");
                    r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
                });

                Ok::<_, Infallible>(Event::default().data(data))
            })
            .chain(futures::stream::once(async {
                Ok::<_, Infallible>(Event::default().data("[DONE]"))
            }));

        Ok(Sse::new(sse).into_response())
    } else {
        let response = gateway.orchestrator.messages(request, &context).await?;
        Ok(Json(response).into_response())
    }
}

/// Handle `POST /v1/messages/count_tokens`.
async fn count_tokens_handler(
    State(_gateway): State<Arc<Gateway>>,
    Json(request): Json<CountTokensRequest>,
) -> Result<Json<CountTokensResponse>, GatewayError> {
    let input_tokens = token_counter::count_input_tokens(&request);

    Ok(Json(CountTokensResponse { input_tokens }))
}
