use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Process-wide HTTP client, shared so upstream calls reuse connections.
///
/// Per-request timeouts are applied at the call site; the builder only
/// sets connection behavior. The short pool idle timeout forces periodic
/// reconnects so upstream DNS changes are picked up.
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = http::HeaderMap::new();
            headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

            Client::builder()
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .unwrap_or_default()
        })
        .clone()
}
