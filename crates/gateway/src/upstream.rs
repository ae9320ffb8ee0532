//! Outbound upstream clients and the backend router.
//!
//! Each backend kind gets one [`Upstream`] implementation; the router is
//! the only code that knows the closed [`BackendKind`] enum and builds the
//! wiring once per process. Everything downstream works against the trait.

pub(crate) mod anthropic;
pub(crate) mod databricks;
pub(crate) mod openai;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::{BackendKind, Config, UpstreamConfig};
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{GatewayError, GatewayResult};
use crate::messages::anthropic::{MessagesRequest, MessagesResponse};
use crate::metrics::Metrics;
use crate::request::RequestContext;
use crate::stream::StreamEvent;

/// A lazy, single-consumption stream of normalized events.
pub type EventStream = Pin<Box<dyn Stream<Item = GatewayResult<StreamEvent>> + Send>>;

/// One upstream endpoint, already bound to its wire format.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Unary call: send the conversation, receive a complete response.
    async fn messages(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<MessagesResponse>;

    /// Streaming call: fails fast on a non-200 status, then yields
    /// normalized events until the message stops.
    async fn messages_stream(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<EventStream>;
}

/// Primary/fallback pair with the retry-once policy.
pub struct UpstreamRouter {
    primary: Box<dyn Upstream>,
    fallback: Option<Box<dyn Upstream>>,
    metrics: Arc<Metrics>,
}

impl UpstreamRouter {
    pub fn new(primary: Box<dyn Upstream>, fallback: Option<Box<dyn Upstream>>, metrics: Arc<Metrics>) -> Self {
        Self {
            primary,
            fallback,
            metrics,
        }
    }

    /// Build the router from configuration. This is the only place that
    /// dispatches on [`BackendKind`].
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Self {
        let build = |upstream: &UpstreamConfig| -> Box<dyn Upstream> {
            match config.backend {
                BackendKind::OpenAiCompatible => Box::new(openai::OpenAiUpstream::new(
                    upstream.clone(),
                    config.request_timeout,
                    config.max_tokens_limit,
                )),
                BackendKind::AnthropicPassthrough => Box::new(anthropic::AnthropicUpstream::new(
                    upstream.clone(),
                    config.request_timeout,
                )),
                BackendKind::Databricks => Box::new(databricks::DatabricksUpstream::new(
                    upstream.clone(),
                    config.request_timeout,
                    config.max_tokens_limit,
                )),
            }
        };

        Self::new(
            build(&config.upstream),
            config.fallback.as_ref().map(|fallback| build(fallback)),
            metrics,
        )
    }

    /// Unary call with the fallback policy: 4xx surfaces immediately,
    /// 5xx and transport errors try the fallback exactly once.
    pub async fn send(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<MessagesResponse> {
        match self.primary.messages(request, context).await {
            Ok(response) => Ok(response),
            Err(error) => {
                self.metrics.record_upstream_error();

                let Some(fallback) = self.retryable_fallback(&error, context) else {
                    return Err(error);
                };

                fallback.messages(request, context).await
            }
        }
    }

    /// Streaming call with the same fallback policy; only errors raised
    /// before the first event qualify.
    pub async fn send_stream(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<EventStream> {
        match self.primary.messages_stream(request, context).await {
            Ok(stream) => Ok(stream),
            Err(error) => {
                self.metrics.record_upstream_error();

                let Some(fallback) = self.retryable_fallback(&error, context) else {
                    return Err(error);
                };

                fallback.messages_stream(request, context).await
            }
        }
    }

    fn retryable_fallback(&self, error: &GatewayError, context: &RequestContext) -> Option<&dyn Upstream> {
        if !error.is_retryable() {
            return None;
        }

        let fallback = self.fallback.as_deref()?;

        log::warn!(
            "upstream {} failed for request {} ({error}), trying fallback {}",
            self.primary.name(),
            context.request_id,
            fallback.name()
        );
        self.metrics.record_fallback_attempt();

        Some(fallback)
    }
}

/// Resolve the bearer token for an upstream call: the caller's credential
/// passes through when present, otherwise the configured key applies.
pub(crate) fn bearer_token<'a>(configured: &'a SecretString, context: &'a RequestContext) -> &'a str {
    context
        .bearer_token
        .as_ref()
        .unwrap_or(configured)
        .expose_secret()
}

/// Map a non-success upstream response to a gateway error, extracting the
/// message from the structured body when there is one.
pub(crate) fn error_from_response(status: u16, body: &str) -> GatewayError {
    let message = extract_error_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("upstream returned status {status}")
        } else {
            body.to_string()
        }
    });

    GatewayError::from_upstream_status(status, message)
}

/// Pull `error.message` out of either the OpenAI or the Anthropic error
/// body shape.
fn extract_error_message(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct AnyErrorBody {
        error: Option<AnyErrorDetails>,
    }

    #[derive(serde::Deserialize)]
    struct AnyErrorDetails {
        message: Option<String>,
    }

    let parsed: AnyErrorBody = serde_json::from_str(body).ok()?;
    parsed.error.and_then(|details| details.message)
}

/// Per-call timeout shared by the upstream implementations.
pub(crate) fn apply_timeout(builder: reqwest::RequestBuilder, timeout: Duration) -> reqwest::RequestBuilder {
    builder.timeout(timeout)
}
