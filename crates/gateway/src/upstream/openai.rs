//! The OpenAI-compatible upstream: full translation both ways.

use std::time::Duration;

use async_trait::async_trait;
use config::UpstreamConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};

use crate::error::{GatewayError, GatewayResult};
use crate::http_client::http_client;
use crate::messages::anthropic::{MessagesRequest, MessagesResponse};
use crate::messages::convert::{from_openai, to_openai};
use crate::messages::openai::{ChatCompletionChunk, ChatCompletionResponse};
use crate::request::RequestContext;
use crate::stream::normalize::NormalizedChunkStream;
use crate::upstream::{EventStream, Upstream, apply_timeout, bearer_token, error_from_response};

pub(crate) struct OpenAiUpstream {
    client: Client,
    config: UpstreamConfig,
    timeout: Duration,
    max_tokens_limit: u32,
}

impl OpenAiUpstream {
    pub(crate) fn new(config: UpstreamConfig, timeout: Duration, max_tokens_limit: u32) -> Self {
        Self {
            client: http_client(),
            config,
            timeout,
            max_tokens_limit,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    /// Translate, attach auth, and send; shared by both call modes.
    async fn post_chat(
        &self,
        request: &MessagesRequest,
        context: &RequestContext,
        stream: bool,
    ) -> GatewayResult<reqwest::Response> {
        let converted = to_openai::chat_completion_request(request.clone(), self.max_tokens_limit);

        for warning in &converted.warnings {
            log::warn!("request {} conversion: {warning}", context.request_id);
        }

        let mut body = converted.request;
        body.stream = Some(stream);

        let builder = self
            .client
            .post(self.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", bearer_token(&self.config.api_key, context)))
            .json(&body);

        apply_timeout(builder, self.timeout)
            .send()
            .await
            .map_err(|error| connection_error("OpenAI-compatible", error))
    }
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn messages(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<MessagesResponse> {
        let response = self.post_chat(request, context, false).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAI-compatible upstream error for request {} ({status}): {body}",
                context.request_id
            );
            return Err(error_from_response(status.as_u16(), &body));
        }

        let body = response.text().await.map_err(|error| {
            log::error!("failed to read upstream response body: {error}");
            GatewayError::Internal(None)
        })?;

        let chat_response: ChatCompletionResponse = serde_json::from_str(&body).map_err(|error| {
            log::error!("failed to parse upstream chat completion ({} bytes): {error}", body.len());
            GatewayError::Internal(None)
        })?;

        Ok(from_openai::messages_response(chat_response, request.echo_model()))
    }

    async fn messages_stream(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<EventStream> {
        let response = self.post_chat(request, context, true).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAI-compatible streaming upstream error for request {} ({status}): {body}",
                context.request_id
            );
            return Err(error_from_response(status.as_u16(), &body));
        }

        let chunks = response
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

                if event.data == "[DONE]" {
                    return None;
                }

                match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => Some(Ok(chunk)),
                    Err(error) => {
                        // One malformed chunk is not worth killing the
                        // stream over.
                        log::warn!("skipping unparseable upstream chunk: {error}");
                        None
                    }
                }
            });

        Ok(Box::pin(NormalizedChunkStream::new(chunks)))
    }
}

pub(crate) fn connection_error(upstream: &str, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::ConnectionError(format!("{upstream} upstream timed out: {error}"))
    } else {
        GatewayError::ConnectionError(format!("failed to reach {upstream} upstream: {error}"))
    }
}
