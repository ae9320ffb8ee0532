//! The native Anthropic passthrough upstream.
//!
//! The inbound body already speaks this upstream's wire format, so no
//! translation happens in either direction. Model mapping and tool
//! execution still apply; they are local concerns, independent of the wire.

use std::time::Duration;

use async_trait::async_trait;
use config::UpstreamConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;

use crate::error::{GatewayError, GatewayResult};
use crate::http_client::http_client;
use crate::messages::anthropic::{MessagesRequest, MessagesResponse, MessagesStreamEvent};
use crate::request::RequestContext;
use crate::stream::normalize::from_anthropic_event;
use crate::upstream::{EventStream, Upstream, apply_timeout, bearer_token, error_from_response};
use crate::upstream::openai::connection_error;

/// API version header the Messages endpoint requires.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicUpstream {
    client: Client,
    config: UpstreamConfig,
    timeout: Duration,
}

impl AnthropicUpstream {
    pub(crate) fn new(config: UpstreamConfig, timeout: Duration) -> Self {
        Self {
            client: http_client(),
            config,
            timeout,
        }
    }

    async fn post_messages(
        &self,
        request: &MessagesRequest,
        context: &RequestContext,
        stream: bool,
    ) -> GatewayResult<reqwest::Response> {
        let mut body = request.clone();
        body.stream = Some(stream);

        let builder = self
            .client
            .post(format!("{}/v1/messages", self.config.api_base))
            .header("x-api-key", bearer_token(&self.config.api_key, context))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        apply_timeout(builder, self.timeout)
            .send()
            .await
            .map_err(|error| connection_error("Anthropic", error))
    }
}

#[async_trait]
impl Upstream for AnthropicUpstream {
    fn name(&self) -> &'static str {
        "anthropic-passthrough"
    }

    async fn messages(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<MessagesResponse> {
        let response = self.post_messages(request, context, false).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Anthropic upstream error for request {} ({status}): {body}",
                context.request_id
            );
            return Err(error_from_response(status.as_u16(), &body));
        }

        let mut parsed: MessagesResponse = response.json().await.map_err(|error| {
            log::error!("failed to parse Anthropic response: {error}");
            GatewayError::Internal(None)
        })?;

        // Even a passthrough response echoes the caller's alias.
        parsed.model = request.echo_model().to_string();

        Ok(parsed)
    }

    async fn messages_stream(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<EventStream> {
        let response = self.post_messages(request, context, true).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Anthropic streaming upstream error for request {} ({status}): {body}",
                context.request_id
            );
            return Err(error_from_response(status.as_u16(), &body));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        return Some(Err(GatewayError::ConnectionError(format!(
                            "SSE transport error: {error}"
                        ))));
                    }
                };

                match serde_json::from_str::<MessagesStreamEvent>(&event.data) {
                    Ok(wire_event) => Some(Ok(wire_event)),
                    Err(error) => {
                        log::warn!("skipping unparseable Anthropic stream event: {error}");
                        None
                    }
                }
            })
            .flat_map(|result| {
                let events = match result {
                    Ok(wire_event) => from_anthropic_event(wire_event).into_iter().map(Ok).collect(),
                    Err(error) => vec![Err(error)],
                };

                futures::stream::iter(events)
            });

        Ok(Box::pin(events))
    }
}
