//! Correlation-id propagation.
//!
//! Every response carries an `X-Request-ID`. The id comes from the
//! caller's `x-correlation-id` when present, otherwise it is generated
//! here and injected into the request so handler logs and the response
//! agree on it.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub(crate) async fn propagate(mut request: Request, next: Next) -> Response {
    let id = match request.headers().get(&CORRELATION_ID) {
        Some(value) => value.clone(),
        None => {
            let generated = Uuid::new_v4().to_string();
            let value = HeaderValue::from_str(&generated)
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
            request.headers_mut().insert(CORRELATION_ID.clone(), value.clone());
            value
        }
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID, id);

    response
}
