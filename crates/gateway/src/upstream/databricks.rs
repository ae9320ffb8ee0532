//! The Databricks model-serving upstream.
//!
//! Databricks hosts Claude behind OpenAI-shaped serving endpoints; the
//! body translation matches the OpenAI-compatible upstream, but the URL is
//! a per-endpoint invocation path resolved from the mapped model name.

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
use crate::upstream::openai::connection_error;
use crate::upstream::{EventStream, Upstream, apply_timeout, bearer_token, error_from_response};

pub(crate) struct DatabricksUpstream {
    client: Client,
    config: UpstreamConfig,
    timeout: Duration,
    max_tokens_limit: u32,
}

impl DatabricksUpstream {
    pub(crate) fn new(config: UpstreamConfig, timeout: Duration, max_tokens_limit: u32) -> Self {
        Self {
            client: http_client(),
            config,
            timeout,
            max_tokens_limit,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/serving-endpoints/{}/invocations",
            self.config.api_base,
            serving_endpoint_name(model)
        )
    }

    async fn post_invocation(
        &self,
        request: &MessagesRequest,
        context: &RequestContext,
        stream: bool,
    ) -> GatewayResult<reqwest::Response> {
        let url = self.endpoint(&request.model);
        let converted = to_openai::chat_completion_request(request.clone(), self.max_tokens_limit);

        for warning in &converted.warnings {
            log::warn!("request {} conversion: {warning}", context.request_id);
        }

        let mut body = converted.request;
        body.stream = Some(stream);

        let builder = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", bearer_token(&self.config.api_key, context)))
            .json(&body);

        apply_timeout(builder, self.timeout)
            .send()
            .await
            .map_err(|error| connection_error("Databricks", error))
    }
}

#[async_trait]
impl Upstream for DatabricksUpstream {
    fn name(&self) -> &'static str {
        "databricks"
    }

    async fn messages(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<MessagesResponse> {
        let response = self.post_invocation(request, context, false).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Databricks upstream error for request {} ({status}): {body}",
                context.request_id
            );
            return Err(error_from_response(status.as_u16(), &body));
        }

        let chat_response: ChatCompletionResponse = response.json().await.map_err(|error| {
            log::error!("failed to parse Databricks response: {error}");
            GatewayError::Internal(None)
        })?;

        Ok(from_openai::messages_response(chat_response, request.echo_model()))
    }

    async fn messages_stream(&self, request: &MessagesRequest, context: &RequestContext) -> GatewayResult<EventStream> {
        let response = self.post_invocation(request, context, true).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Databricks streaming upstream error for request {} ({status}): {body}",
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
                        log::warn!("skipping unparseable Databricks chunk: {error}");
                        None
                    }
                }
            });

        Ok(Box::pin(NormalizedChunkStream::new(chunks)))
    }
}

/// Resolve a mapped model name to a Databricks serving-endpoint name.
fn serving_endpoint_name(model: &str) -> String {
    if model.starts_with("databricks-") {
        model.to_string()
    } else {
        format!("databricks-{model}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_name_gets_databricks_prefix() {
        assert_eq!(serving_endpoint_name("claude-sonnet-4"), "databricks-claude-sonnet-4");
        assert_eq!(
            serving_endpoint_name("databricks-claude-sonnet-4"),
            "databricks-claude-sonnet-4"
        );
    }

    #[test]
    fn invocation_url_shape() {
        let upstream = DatabricksUpstream::new(
            UpstreamConfig {
                api_base: "https://dbc.cloud.databricks.com".to_string(),
                api_key: secrecy::SecretString::from("token"),
            },
            Duration::from_secs(30),
            4096,
        );

        assert_eq!(
            upstream.endpoint("claude-sonnet-4"),
            "https://dbc.cloud.databricks.com/serving-endpoints/databricks-claude-sonnet-4/invocations"
        );
    }
}
