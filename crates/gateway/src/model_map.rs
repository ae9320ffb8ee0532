//! Model alias resolution.
//!
//! The caller speaks in aliases (`big`, `small`) or concrete Claude ids;
//! the upstream expects a backend-qualified name. Mapping happens exactly
//! once per request, before routing, and records the caller's original
//! string so responses can echo it unchanged.

use config::BackendKind;

use crate::messages::anthropic::MessagesRequest;

/// Namespace prefix the OpenAI-compatible backend expects for Claude models.
const OPENROUTER_PREFIX: &str = "openrouter/anthropic/";

/// Bare provider prefix accepted on input and stripped for passthrough.
const ANTHROPIC_PREFIX: &str = "anthropic/";

/// Dated Claude ids and the base names upstream routers know them by.
const CLAUDE_VERSION_ALIASES: &[(&str, &str)] = &[
    ("claude-sonnet-4-20250514", "claude-sonnet-4"),
    ("claude-3-7-sonnet-20250219", "claude-3.7-sonnet"),
    ("claude-3-opus-20240229", "claude-3-opus"),
    ("claude-3.5-sonnet-20240620", "claude-3.5-sonnet"),
    ("claude-3-5-sonnet-20241022", "claude-3.5-sonnet"),
    ("claude-3-5-haiku-20241022", "claude-3.5-haiku"),
    ("claude-3-haiku-20240307", "claude-3-haiku"),
];

/// Resolves caller-supplied model strings to backend-qualified targets.
#[derive(Debug, Clone)]
pub struct ModelMapper {
    backend: BackendKind,
    big_model: String,
    small_model: String,
}

impl ModelMapper {
    pub fn new(backend: BackendKind, big_model: impl Into<String>, small_model: impl Into<String>) -> Self {
        Self {
            backend,
            big_model: big_model.into(),
            small_model: small_model.into(),
        }
    }

    /// Rewrite `request.model` to the backend-qualified target and record
    /// the caller's exact input in `original_model`.
    ///
    /// After this call `original_model` is what responses echo and
    /// `model` is what the upstream sees; the two never swap back.
    pub fn map(&self, request: &mut MessagesRequest) {
        request.original_model = Some(request.model.clone());

        let base = self.resolve_base(&request.model);
        request.model = self.qualify(base);

        log::debug!(
            "mapped model {:?} -> {:?} for {} backend",
            request.original_model.as_deref().unwrap_or_default(),
            request.model,
            self.backend
        );
    }

    /// Resolve an alias to a bare model name, without backend qualification.
    fn resolve_base(&self, alias: &str) -> String {
        let stripped = alias
            .strip_prefix(OPENROUTER_PREFIX)
            .or_else(|| alias.strip_prefix(ANTHROPIC_PREFIX))
            .unwrap_or(alias);

        match stripped {
            "big" => self.big_model.clone(),
            "small" => self.small_model.clone(),
            other => {
                if let Some((_, base)) = CLAUDE_VERSION_ALIASES.iter().find(|(dated, _)| *dated == other) {
                    (*base).to_string()
                } else if other.starts_with("claude") {
                    other.to_string()
                } else {
                    log::warn!("unknown model alias {other:?}, falling back to big model");
                    self.big_model.clone()
                }
            }
        }
    }

    /// Apply the backend's namespace convention.
    fn qualify(&self, base: String) -> String {
        match self.backend {
            BackendKind::OpenAiCompatible => format!("{OPENROUTER_PREFIX}{base}"),
            // The passthrough upstream and Databricks route on bare names.
            BackendKind::AnthropicPassthrough | BackendKind::Databricks => base,
        }
    }
}
