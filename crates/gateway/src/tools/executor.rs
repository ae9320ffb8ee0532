//! Bounded, policy-checked tool execution.
//!
//! The executor never fails a request: every outcome, including refusals,
//! becomes a [`ToolExecutionRecord`] the continuation loop can fold back
//! into the conversation.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use config::{SecurityPolicyConfig, ToolsConfig};
use futures::future::join_all;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::metrics::Metrics;
use crate::request::RequestContext;
use crate::tools::{ToolCategory, ToolExecutionRecord, ToolInvocation, ToolMetadata, ToolRegistry};

/// Error string for policy refusals; the continuation loop matches on it.
pub(crate) const SECURITY_POLICY_VIOLATION: &str = "security_policy_violation";

/// Error string for rate-limit refusals.
pub(crate) const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

/// Error string for missing permission grants.
pub(crate) const PERMISSION_DENIED: &str = "permission_denied";

/// Input fields checked against the path denylist for file_ops tools.
const PATH_FIELDS: &[&str] = &["file_path", "path", "filename", "notebook_path", "directory"];

type RequestKeyedLimiter = DefaultKeyedRateLimiter<String>;

/// Runs batches of tool invocations under the configured limits.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolsConfig,
    semaphore: Arc<Semaphore>,
    rate_limiter: RequestKeyedLimiter,
    metrics: Arc<Metrics>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolsConfig, metrics: Arc<Metrics>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        // A keyed GCRA limiter approximates the sliding window: burst up to
        // the per-window maximum, replenishing one cell per window/max.
        let max_per_window = NonZeroU32::new(config.rate_limit_max.max(1)).unwrap_or(NonZeroU32::MIN);
        let replenish_period = config
            .rate_limit_window
            .checked_div(max_per_window.get())
            .filter(|period| !period.is_zero())
            .unwrap_or(std::time::Duration::from_millis(1));

        let quota = Quota::with_period(replenish_period)
            .unwrap_or_else(|| Quota::per_second(max_per_window))
            .allow_burst(max_per_window);

        Self {
            registry,
            config,
            semaphore,
            rate_limiter: RateLimiter::keyed(quota),
            metrics,
        }
    }

    /// Execute a batch of invocations, returning records in input order
    /// regardless of completion order.
    pub async fn execute_batch(
        &self,
        invocations: Vec<ToolInvocation>,
        context: &RequestContext,
    ) -> Vec<ToolExecutionRecord> {
        join_all(
            invocations
                .into_iter()
                .map(|invocation| self.execute_one(invocation, context)),
        )
        .await
    }

    /// Execute a single invocation; every failure mode yields a record.
    pub async fn execute_one(&self, invocation: ToolInvocation, context: &RequestContext) -> ToolExecutionRecord {
        let started = Instant::now();

        let Some((metadata, handler)) = self.registry.get(&invocation.name) else {
            return self.failure(&invocation, started, format!("unknown tool: {}", invocation.name));
        };

        if self.rate_limiter.check_key(&context.request_id).is_err() {
            log::warn!(
                "tool rate limit exceeded for request {} (tool {})",
                context.request_id,
                invocation.name
            );
            self.metrics.record_tool_rate_limited();
            return self.failure(&invocation, started, RATE_LIMIT_EXCEEDED.to_string());
        }

        if metadata.requires_permission && !context.grants_tool(&invocation.name, metadata.category) {
            return self.failure(&invocation, started, PERMISSION_DENIED.to_string());
        }

        let input_size = serde_json::to_string(&invocation.input).map(|s| s.len()).unwrap_or(0);
        if input_size > metadata.max_input_bytes {
            return self.failure(
                &invocation,
                started,
                format!("input of {input_size} bytes exceeds limit of {}", metadata.max_input_bytes),
            );
        }

        if let Err(detail) = security_check(&metadata, &invocation.input, &self.config.security) {
            log::warn!(
                "security policy blocked tool {} for request {}: {detail}",
                invocation.name,
                context.request_id
            );
            return self.failure(&invocation, started, SECURITY_POLICY_VIOLATION.to_string());
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return self.failure(&invocation, started, "executor is shutting down".to_string());
        };

        let timeout = metadata.timeout.unwrap_or(self.config.execution_timeout);
        let run = handler.run(&invocation.id, &invocation.name, invocation.input.clone());

        match tokio::time::timeout(timeout, run).await {
            Err(_) => {
                self.metrics.record_tool_timeout();
                self.failure(&invocation, started, format!("timeout after {}s", timeout.as_secs()))
            }
            Ok(Err(error)) => self.failure(&invocation, started, error.to_string()),
            Ok(Ok(output)) => {
                let (text, truncated) = truncate(format_output(&output), self.config.max_output_bytes);

                if truncated {
                    self.metrics.record_tool_truncation();
                }
                self.metrics.record_tool_execution(true);

                ToolExecutionRecord {
                    tool_use_id: invocation.id,
                    tool_name: invocation.name,
                    success: true,
                    output: Some(text),
                    error: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    truncated,
                }
            }
        }
    }

    fn failure(&self, invocation: &ToolInvocation, started: Instant, error: String) -> ToolExecutionRecord {
        self.metrics.record_tool_execution(false);

        ToolExecutionRecord {
            tool_use_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            success: false,
            output: None,
            error: Some(error),
            elapsed_ms: started.elapsed().as_millis() as u64,
            truncated: false,
        }
    }
}

/// Uniform pre-handler policy check.
///
/// File-operation tools may not touch denylisted path prefixes; system
/// tools may only run allowlisted command heads. Other categories pass.
fn security_check(metadata: &ToolMetadata, input: &Value, policy: &SecurityPolicyConfig) -> Result<(), String> {
    match metadata.category {
        ToolCategory::FileOps | ToolCategory::Notebook => {
            for field in PATH_FIELDS {
                let Some(path) = input.get(field).and_then(Value::as_str) else {
                    continue;
                };

                for prefix in &policy.restricted_paths {
                    if path.starts_with(prefix.as_str()) {
                        return Err(format!("path {path} matches restricted prefix {prefix}"));
                    }
                }
            }
            Ok(())
        }
        ToolCategory::System => {
            let command = input.get("command").and_then(Value::as_str).unwrap_or_default();
            let head = command.split_whitespace().next().unwrap_or_default();

            if head.is_empty() {
                return Err("empty command".to_string());
            }

            if policy.allowed_commands.iter().any(|allowed| allowed == head) {
                Ok(())
            } else {
                Err(format!("command head {head} is not allowlisted"))
            }
        }
        ToolCategory::Search | ToolCategory::Web | ToolCategory::Todo => Ok(()),
    }
}

/// Stable textual form of a handler output.
///
/// Scalars render as-is, objects as pretty JSON, arrays as newline-joined
/// items; null means the tool had nothing to say.
fn format_output(output: &Value) -> String {
    match output {
        Value::Null => "Tool executed successfully (no output)".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string()),
        other => other.to_string(),
    }
}

/// Cut content at the byte cap, appending the truncation marker.
fn truncate(content: String, max_bytes: usize) -> (String, bool) {
    if content.len() <= max_bytes {
        return (content, false);
    }

    let mut cut = max_bytes;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }

    let total = content.len();
    let mut truncated = content[..cut].to_string();
    truncated.push_str(&format!(
        "\n\n[Content truncated - {total} total characters, showing first {cut}]"
    ));

    (truncated, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{SecurityProfile, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> ToolsConfig {
        ToolsConfig {
            max_concurrency: 2,
            execution_timeout: Duration::from_secs(5),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 100,
            max_output_bytes: 10_000,
            security: SecurityPolicyConfig {
                restricted_paths: vec!["/etc".to_string(), "/var".to_string()],
                allowed_commands: vec!["ls".to_string(), "echo".to_string()],
            },
        }
    }

    fn metadata(category: ToolCategory) -> ToolMetadata {
        ToolMetadata {
            category,
            timeout: None,
            max_input_bytes: 1_000_000,
            requires_permission: false,
            security_profile: SecurityProfile::Open,
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn run(&self, _id: &str, _name: &str, input: Value) -> anyhow::Result<Value> {
            Ok(json!({"out": input["msg"]}))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        async fn run(&self, _id: &str, _name: &str, _input: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn run(&self, _id: &str, _name: &str, _input: Value) -> anyhow::Result<Value> {
            anyhow::bail!("disk on fire")
        }
    }

    struct CountingTool {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        async fn run(&self, _id: &str, _name: &str, _input: Value) -> anyhow::Result<Value> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn executor_with(registry: ToolRegistry, config: ToolsConfig) -> ToolExecutor {
        ToolExecutor::new(Arc::new(registry), config, Arc::new(Metrics::default()))
    }

    fn invocation(id: &str, name: &str, input: Value) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            request_id: "req-1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_execution_produces_pretty_json() {
        let registry = ToolRegistry::new();
        registry.register("echo", metadata(ToolCategory::Search), Arc::new(EchoTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "echo", json!({"msg": "hi"})), &context())
            .await;

        assert!(record.success);
        assert_eq!(record.tool_use_id, "t1");
        assert_eq!(record.content(), "{\n  \"out\": \"hi\"\n}");
        assert!(!record.truncated);
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_record() {
        let executor = executor_with(ToolRegistry::new(), test_config());

        let record = executor
            .execute_one(invocation("t1", "nope", json!({})), &context())
            .await;

        assert!(!record.success);
        assert!(record.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_timeout_record() {
        let registry = ToolRegistry::new();
        let mut slow_metadata = metadata(ToolCategory::Search);
        slow_metadata.timeout = Some(Duration::from_secs(2));
        registry.register("slow", slow_metadata, Arc::new(SlowTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "slow", json!({})), &context())
            .await;

        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("timeout after 2s"));
    }

    #[tokio::test]
    async fn handler_errors_are_captured() {
        let registry = ToolRegistry::new();
        registry.register("broken", metadata(ToolCategory::Search), Arc::new(FailingTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "broken", json!({})), &context())
            .await;

        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("disk on fire"));
        assert_eq!(record.content(), "Error: disk on fire");
    }

    #[tokio::test]
    async fn rate_limit_overflow_refuses_without_running() {
        let registry = ToolRegistry::new();
        registry.register("echo", metadata(ToolCategory::Search), Arc::new(EchoTool));

        let mut config = test_config();
        config.rate_limit_max = 2;
        let executor = executor_with(registry, config);
        let ctx = context();

        let mut errors = Vec::new();
        for i in 0..4 {
            let record = executor
                .execute_one(invocation(&format!("t{i}"), "echo", json!({"msg": "x"})), &ctx)
                .await;
            errors.push(record.error);
        }

        assert!(errors[0].is_none());
        assert!(errors[1].is_none());
        assert_eq!(errors[2].as_deref(), Some(RATE_LIMIT_EXCEEDED));
        assert_eq!(errors[3].as_deref(), Some(RATE_LIMIT_EXCEEDED));
    }

    #[tokio::test]
    async fn rate_limit_is_per_request_id() {
        let registry = ToolRegistry::new();
        registry.register("echo", metadata(ToolCategory::Search), Arc::new(EchoTool));

        let mut config = test_config();
        config.rate_limit_max = 1;
        let executor = executor_with(registry, config);

        let first = executor
            .execute_one(invocation("t1", "echo", json!({"msg": "x"})), &context())
            .await;
        assert!(first.success);

        let other_request = RequestContext {
            request_id: "req-2".to_string(),
            ..Default::default()
        };
        let second = executor
            .execute_one(invocation("t1", "echo", json!({"msg": "x"})), &other_request)
            .await;
        assert!(second.success, "a different request has its own budget");
    }

    #[tokio::test]
    async fn permission_denied_without_grant() {
        let registry = ToolRegistry::new();
        let mut gated = metadata(ToolCategory::System);
        gated.requires_permission = true;
        registry.register("Bash", gated, Arc::new(EchoTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "Bash", json!({"command": "ls /tmp"})), &context())
            .await;
        assert_eq!(record.error.as_deref(), Some(PERMISSION_DENIED));

        let mut granted = context();
        granted.tool_grants.insert("system".to_string());
        let record = executor
            .execute_one(invocation("t2", "Bash", json!({"command": "ls /tmp"})), &granted)
            .await;
        assert!(record.success);
    }

    #[tokio::test]
    async fn restricted_path_is_blocked_before_handler() {
        let registry = ToolRegistry::new();
        registry.register("Read", metadata(ToolCategory::FileOps), Arc::new(EchoTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "Read", json!({"file_path": "/etc/shadow"})), &context())
            .await;

        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some(SECURITY_POLICY_VIOLATION));
        assert!(record.is_security_violation());
    }

    #[tokio::test]
    async fn disallowed_command_head_is_blocked() {
        let registry = ToolRegistry::new();
        let mut gated = metadata(ToolCategory::System);
        gated.requires_permission = false;
        registry.register("Bash", gated, Arc::new(EchoTool));
        let executor = executor_with(registry, test_config());

        let record = executor
            .execute_one(invocation("t1", "Bash", json!({"command": "rm -rf /"})), &context())
            .await;
        assert_eq!(record.error.as_deref(), Some(SECURITY_POLICY_VIOLATION));

        let record = executor
            .execute_one(invocation("t2", "Bash", json!({"command": "echo ok"})), &context())
            .await;
        assert!(record.success);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let registry = ToolRegistry::new();
        registry.register("echo", metadata(ToolCategory::Search), Arc::new(EchoTool));
        let executor = executor_with(registry, test_config());

        let records = executor
            .execute_batch(
                vec![
                    invocation("t1", "echo", json!({"msg": "a"})),
                    invocation("t2", "missing", json!({})),
                    invocation("t3", "echo", json!({"msg": "c"})),
                ],
                &context(),
            )
            .await;

        let ids: Vec<_> = records.iter().map(|record| record.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert!(records[0].success);
        assert!(!records[1].success);
        assert!(records[2].success);
    }

    #[tokio::test]
    async fn concurrency_respects_the_semaphore() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let registry = ToolRegistry::new();
        registry.register(
            "count",
            metadata(ToolCategory::Search),
            Arc::new(CountingTool {
                running: running.clone(),
                peak: peak.clone(),
            }),
        );

        let executor = executor_with(registry, test_config());
        let invocations = (0..6)
            .map(|i| invocation(&format!("t{i}"), "count", json!({})))
            .collect();

        executor.execute_batch(invocations, &context()).await;

        assert!(peak.load(Ordering::SeqCst) <= 2, "semaphore cap of 2 was exceeded");
    }

    #[test]
    fn output_formatting_rules() {
        assert_eq!(format_output(&json!("plain")), "plain");
        assert_eq!(format_output(&json!(42)), "42");
        assert_eq!(format_output(&json!(null)), "Tool executed successfully (no output)");
        assert_eq!(format_output(&json!(["a", "b", 3])), "a\nb\n3");
        assert_eq!(format_output(&json!({"k": 1})), "{\n  \"k\": 1\n}");
    }

    #[test]
    fn truncation_appends_marker_and_flags() {
        let (text, truncated) = truncate("x".repeat(50), 10);
        assert!(truncated);
        assert!(text.starts_with("xxxxxxxxxx"));
        assert!(text.contains("[Content truncated - 50 total characters, showing first 10]"));

        let (text, truncated) = truncate("short".to_string(), 10);
        assert!(!truncated);
        assert_eq!(text, "short");
    }
}
