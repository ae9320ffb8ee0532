//! Configuration for the prism gateway.
//!
//! All configuration is read from environment variables into an immutable
//! [`Config`] snapshot at startup. Nothing re-reads the environment after
//! that point; request handlers only ever see the snapshot.

mod backend;
mod tools;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use secrecy::SecretString;

pub use backend::BackendKind;
pub use tools::{SecurityPolicyConfig, ToolsConfig};

/// Default concrete model the `big` alias resolves to.
const DEFAULT_BIG_MODEL: &str = "claude-sonnet-4";

/// Default concrete model the `small` alias resolves to.
const DEFAULT_SMALL_MODEL: &str = "claude-3.5-haiku";

/// Immutable process-wide configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which backend kind the upstream speaks.
    pub backend: BackendKind,

    /// Primary upstream coordinates.
    pub upstream: UpstreamConfig,

    /// Optional fallback upstream, tried once on 5xx / transport errors.
    pub fallback: Option<UpstreamConfig>,

    /// Concrete model the `big` alias (and unknown aliases) resolve to.
    pub big_model: String,

    /// Concrete model the `small` alias resolves to.
    pub small_model: String,

    /// Upper clamp applied to `max_tokens` before the request goes upstream.
    pub max_tokens_limit: u32,

    /// Timeout for a single upstream call.
    pub request_timeout: Duration,

    /// Maximum number of tool-use / tool-result continuation rounds.
    pub max_tool_rounds: u32,

    /// Tool execution limits and security policy.
    pub tools: ToolsConfig,

    /// Socket address the HTTP server binds to.
    pub listen_address: SocketAddr,

    /// Log filter string passed to the logger (e.g. `info` or `gateway=debug`).
    pub log_filter: String,
}

/// Coordinates of one upstream endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL, without a trailing slash.
    pub api_base: String,

    /// Bearer token forwarded to the upstream.
    pub api_key: SecretString,
}

impl Config {
    /// Load the configuration from environment variables.
    ///
    /// Missing required variables and unparseable values are startup
    /// errors; nothing here is recoverable at request time.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend: BackendKind = require("PROXY_BACKEND")?.parse()?;

        let upstream = UpstreamConfig {
            api_base: trim_base_url(require("UPSTREAM_API_BASE")?),
            api_key: SecretString::from(require("UPSTREAM_API_KEY")?),
        };

        let fallback_enabled = match optional("FALLBACK_ENABLED") {
            Some(raw) => parse_bool("FALLBACK_ENABLED", &raw)?,
            None => false,
        };

        let fallback = if fallback_enabled {
            let Some(api_base) = optional("FALLBACK_API_BASE") else {
                bail!("FALLBACK_ENABLED is true but FALLBACK_API_BASE is not set");
            };

            Some(UpstreamConfig {
                api_base: trim_base_url(api_base),
                api_key: SecretString::from(require("FALLBACK_API_KEY")?),
            })
        } else {
            None
        };

        Ok(Self {
            backend,
            upstream,
            fallback,
            big_model: optional("BIG_MODEL").unwrap_or_else(|| DEFAULT_BIG_MODEL.to_string()),
            small_model: optional("SMALL_MODEL").unwrap_or_else(|| DEFAULT_SMALL_MODEL.to_string()),
            max_tokens_limit: parse_or("MAX_TOKENS_LIMIT", 8192)?,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_S", 90)?),
            max_tool_rounds: parse_or("MAX_TOOL_ROUNDS", 3)?,
            tools: ToolsConfig::from_env()?,
            listen_address: parse_or("LISTEN_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 8787)))?,
            log_filter: optional("LOG_FILTER").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("required environment variable {name} is not set"),
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("invalid value for {name}: {other:?} (expected true or false)"),
    }
}

fn trim_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_minimal_env<R>(extra: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let mut vars: Vec<(&str, Option<&str>)> = vec![
            ("PROXY_BACKEND", Some("OPENAI_COMPATIBLE")),
            ("UPSTREAM_API_BASE", Some("https://openrouter.ai/api/v1/")),
            ("UPSTREAM_API_KEY", Some("sk-test")),
        ];
        vars.extend_from_slice(extra);
        temp_env::with_vars(vars, f)
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        with_minimal_env(&[], || {
            let config = Config::from_env().unwrap();

            assert_eq!(config.backend, BackendKind::OpenAiCompatible);
            assert_eq!(config.upstream.api_base, "https://openrouter.ai/api/v1");
            assert_eq!(config.big_model, DEFAULT_BIG_MODEL);
            assert_eq!(config.small_model, DEFAULT_SMALL_MODEL);
            assert_eq!(config.max_tokens_limit, 8192);
            assert_eq!(config.request_timeout, Duration::from_secs(90));
            assert_eq!(config.max_tool_rounds, 3);
            assert!(config.fallback.is_none());
            assert_eq!(config.tools.max_concurrency, 5);
        });
    }

    #[test]
    fn missing_required_variable_fails() {
        temp_env::with_vars(
            [
                ("PROXY_BACKEND", Some("OPENAI_COMPATIBLE")),
                ("UPSTREAM_API_BASE", None::<&str>),
                ("UPSTREAM_API_KEY", Some("sk-test")),
            ],
            || {
                let error = Config::from_env().unwrap_err();
                assert!(error.to_string().contains("UPSTREAM_API_BASE"));
            },
        );
    }

    #[test]
    fn unknown_backend_kind_fails() {
        with_minimal_env(&[("PROXY_BACKEND", Some("GEMINI"))], || {
            let error = Config::from_env().unwrap_err();
            assert!(error.to_string().contains("GEMINI"));
        });
    }

    #[test]
    fn fallback_requires_base_url() {
        with_minimal_env(&[("FALLBACK_ENABLED", Some("true"))], || {
            let error = Config::from_env().unwrap_err();
            assert!(error.to_string().contains("FALLBACK_API_BASE"));
        });
    }

    #[test]
    fn fallback_is_loaded_when_enabled() {
        with_minimal_env(
            &[
                ("FALLBACK_ENABLED", Some("true")),
                ("FALLBACK_API_BASE", Some("https://fallback.example.com")),
                ("FALLBACK_API_KEY", Some("sk-fallback")),
            ],
            || {
                let config = Config::from_env().unwrap();
                let fallback = config.fallback.expect("fallback should be configured");
                assert_eq!(fallback.api_base, "https://fallback.example.com");
            },
        );
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        with_minimal_env(
            &[
                ("MAX_TOKENS_LIMIT", Some("4096")),
                ("REQUEST_TIMEOUT_S", Some("30")),
                ("MAX_TOOL_ROUNDS", Some("5")),
                ("TOOL_MAX_CONCURRENCY", Some("2")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.max_tokens_limit, 4096);
                assert_eq!(config.request_timeout, Duration::from_secs(30));
                assert_eq!(config.max_tool_rounds, 5);
                assert_eq!(config.tools.max_concurrency, 2);
            },
        );
    }

    #[test]
    fn garbage_numeric_value_fails() {
        with_minimal_env(&[("MAX_TOKENS_LIMIT", Some("lots"))], || {
            let error = Config::from_env().unwrap_err();
            assert!(error.to_string().contains("MAX_TOKENS_LIMIT"));
        });
    }
}
