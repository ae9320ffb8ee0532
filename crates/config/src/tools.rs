use std::time::Duration;

use crate::{parse_or, split_csv};

/// Default path prefixes denied to file-operation tools.
const DEFAULT_RESTRICTED_PATHS: &[&str] = &["/etc", "/var", "/sys", "/proc"];

/// Default command heads allowed for system tools.
const DEFAULT_ALLOWED_COMMANDS: &[&str] = &["ls", "cat", "echo", "grep", "find", "pwd", "which"];

/// Limits and policy applied to local tool execution.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Maximum number of tool handlers running concurrently per request.
    pub max_concurrency: usize,

    /// Default per-tool timeout when the registry metadata omits one.
    pub execution_timeout: Duration,

    /// Sliding rate-limit window length.
    pub rate_limit_window: Duration,

    /// Maximum tool invocations per window, per inbound request.
    pub rate_limit_max: u32,

    /// Byte cap on the stringified output sent back to the upstream.
    pub max_output_bytes: usize,

    /// Security policy applied before any handler is invoked.
    pub security: SecurityPolicyConfig,
}

/// Uniform security policy, consulted regardless of the handler.
#[derive(Debug, Clone)]
pub struct SecurityPolicyConfig {
    /// Path prefixes file-operation tools may not touch.
    pub restricted_paths: Vec<String>,

    /// Command heads system tools are allowed to run.
    pub allowed_commands: Vec<String>,
}

impl ToolsConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            max_concurrency: parse_or("TOOL_MAX_CONCURRENCY", 5)?,
            execution_timeout: Duration::from_secs(parse_or("TOOL_EXECUTION_TIMEOUT_S", 30)?),
            rate_limit_window: Duration::from_secs(parse_or("TOOL_RATE_LIMIT_WINDOW_S", 60)?),
            rate_limit_max: parse_or("TOOL_RATE_LIMIT_MAX", 100)?,
            max_output_bytes: parse_or("TOOL_MAX_OUTPUT_BYTES", 10_000)?,
            security: SecurityPolicyConfig::from_env(),
        })
    }
}

impl SecurityPolicyConfig {
    fn from_env() -> Self {
        let restricted_paths = std::env::var("TOOL_RESTRICTED_PATHS")
            .map(|raw| split_csv(&raw))
            .unwrap_or_else(|_| DEFAULT_RESTRICTED_PATHS.iter().map(|s| s.to_string()).collect());

        let allowed_commands = std::env::var("TOOL_ALLOWED_COMMANDS")
            .map(|raw| split_csv(&raw))
            .unwrap_or_else(|_| DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect());

        Self {
            restricted_paths,
            allowed_commands,
        }
    }
}
