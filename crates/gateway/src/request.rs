use std::collections::HashSet;

use axum::http::HeaderMap;
use secrecy::SecretString;
use uuid::Uuid;

use crate::tools::ToolCategory;

/// Correlation id header echoed back as `X-Request-ID`.
pub(crate) const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying per-request tool permission grants, comma-separated
/// tool or category names.
const TOOL_PERMISSIONS_HEADER: &str = "x-tool-permissions";

/// Per-request runtime context.
///
/// Carries the correlation id, the caller's bearer token for pass-through
/// auth, and the tool permission grants. One context is created per inbound
/// request and shared (cloned) with every tool task it spawns.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Correlation id: the caller's `x-correlation-id` or a generated UUID.
    pub request_id: String,

    /// Caller-provided credential, forwarded to the upstream when present.
    pub bearer_token: Option<SecretString>,

    /// Grants for tools that require permission; tool names or category
    /// names, as sent in `x-tool-permissions`.
    pub tool_grants: HashSet<String>,
}

impl RequestContext {
    /// Whether the context grants a permissioned tool.
    pub fn grants_tool(&self, tool_name: &str, category: ToolCategory) -> bool {
        self.tool_grants.contains(tool_name) || self.tool_grants.contains(category.as_str())
    }
}

/// Build the request context from inbound headers.
pub(crate) fn extract_context(headers: &HeaderMap) -> RequestContext {
    let request_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let bearer_token = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .map(SecretString::from);

    let tool_grants = headers
        .get(TOOL_PERMISSIONS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|grant| !grant.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    RequestContext {
        request_id,
        bearer_token,
        tool_grants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use secrecy::ExposeSecret;

    #[test]
    fn correlation_id_is_honored() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("req-42"));

        let context = extract_context(&headers);
        assert_eq!(context.request_id, "req-42");
    }

    #[test]
    fn missing_correlation_id_generates_one() {
        let context = extract_context(&HeaderMap::new());
        assert!(!context.request_id.is_empty());
    }

    #[test]
    fn x_api_key_wins_over_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-key"));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-other"));

        let context = extract_context(&headers);
        assert_eq!(context.bearer_token.unwrap().expose_secret(), "sk-key");
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-abc"));

        let context = extract_context(&headers);
        assert_eq!(context.bearer_token.unwrap().expose_secret(), "sk-abc");
    }

    #[test]
    fn tool_grants_parse_as_csv() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tool-permissions", HeaderValue::from_static("Bash, system ,web"));

        let context = extract_context(&headers);
        assert!(context.grants_tool("Bash", ToolCategory::FileOps));
        assert!(context.grants_tool("anything", ToolCategory::System));
        assert!(context.grants_tool("WebFetch", ToolCategory::Web));
        assert!(!context.grants_tool("Write", ToolCategory::FileOps));
    }
}
