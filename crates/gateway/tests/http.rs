//! HTTP-level tests for the Messages surface.
//!
//! The axum router is driven directly with `tower::ServiceExt::oneshot`;
//! the upstream is scripted, so no network is involved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use config::{BackendKind, SecurityPolicyConfig, ToolsConfig};
use gateway::messages::anthropic::{MessagesRequest, MessagesResponse};
use gateway::tools::ToolRegistry;
use gateway::tools::executor::ToolExecutor;
use gateway::{
    EventStream, Gateway, GatewayError, GatewayResult, Metrics, ModelMapper, Orchestrator, RequestContext, Upstream,
    UpstreamRouter,
};
use indoc::indoc;
use serde_json::{Value, json};
use tower::ServiceExt;

struct CannedUpstream {
    responses: Mutex<Vec<MessagesResponse>>,
}

#[async_trait]
impl Upstream for CannedUpstream {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn messages(&self, request: &MessagesRequest, _context: &RequestContext) -> GatewayResult<MessagesResponse> {
        let mut responses = self.responses.lock().unwrap();
        assert!(!responses.is_empty(), "upstream script exhausted");
        let mut response = responses.remove(0);
        response.model = request.echo_model().to_string();
        Ok(response)
    }

    async fn messages_stream(
        &self,
        _request: &MessagesRequest,
        _context: &RequestContext,
    ) -> GatewayResult<EventStream> {
        Err(GatewayError::Internal(None))
    }
}

fn test_app(responses: Vec<MessagesResponse>) -> axum::Router {
    let metrics = Arc::new(Metrics::default());
    let registry = Arc::new(ToolRegistry::new());

    let upstream = CannedUpstream {
        responses: Mutex::new(responses),
    };
    let router = UpstreamRouter::new(Box::new(upstream), None, metrics.clone());

    let tools_config = ToolsConfig {
        max_concurrency: 5,
        execution_timeout: Duration::from_secs(5),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 100,
        max_output_bytes: 10_000,
        security: SecurityPolicyConfig {
            restricted_paths: Vec::new(),
            allowed_commands: Vec::new(),
        },
    };
    let executor = ToolExecutor::new(registry.clone(), tools_config, metrics.clone());
    let mapper = ModelMapper::new(BackendKind::OpenAiCompatible, "claude-sonnet-4", "claude-3.5-haiku");

    let orchestrator = Arc::new(Orchestrator::new(router, executor, registry, mapper, 3, metrics.clone()));
    let gateway = Arc::new(Gateway::with_orchestrator(
        orchestrator,
        metrics,
        BackendKind::OpenAiCompatible,
    ));

    gateway::router(gateway)
}

fn canned_text_response() -> MessagesResponse {
    serde_json::from_value(json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": "Hi"}],
        "model": "placeholder",
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {"input_tokens": 2, "output_tokens": 1}
    }))
    .unwrap()
}

async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn messages_endpoint_answers_with_anthropic_shape() {
    let app = test_app(vec![canned_text_response()]);

    let body = indoc! {r#"
        {
            "model": "small",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Hello"}]
        }
    "#};

    let request = Request::post("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let (status, json) = response_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["type"], "message");
    assert_eq!(json["role"], "assistant");
    assert_eq!(json["model"], "small");
    assert_eq!(json["content"][0]["text"], "Hi");
    assert_eq!(json["stop_reason"], "end_turn");
}

#[tokio::test]
async fn invalid_request_gets_the_error_envelope() {
    let app = test_app(vec![]);

    let body = indoc! {r#"
        {
            "model": "small",
            "max_tokens": 0,
            "messages": [{"role": "user", "content": "Hello"}]
        }
    "#};

    let request = Request::post("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let (status, json) = response_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["type"], "invalid_request_error");
    assert!(json["error"]["message"].as_str().unwrap().contains("max_tokens"));
}

#[tokio::test]
async fn count_tokens_endpoint_counts() {
    let app = test_app(vec![]);

    let body = indoc! {r#"
        {
            "model": "small",
            "system": "you are terse",
            "messages": [{"role": "user", "content": "Hello there, how are you today?"}]
        }
    "#};

    let request = Request::post("/v1/messages/count_tokens")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let (status, json) = response_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["input_tokens"].as_u64().unwrap() > 0);
}
