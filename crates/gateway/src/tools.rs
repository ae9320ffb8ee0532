//! Local tool registry.
//!
//! The gateway executes tools on behalf of the model, but the tools
//! themselves are external collaborators: anything implementing
//! [`ToolHandler`] can be registered. The registry contributes metadata
//! (category, timeout, permission requirements) that the executor enforces
//! uniformly, whatever the handler does.

pub mod executor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Execution category of a tool, used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Reads and writes files.
    FileOps,
    /// Runs commands on the host.
    System,
    /// Searches files or code.
    Search,
    /// Fetches or searches the web.
    Web,
    /// Operates on notebooks.
    Notebook,
    /// Manages task lists.
    Todo,
}

impl ToolCategory {
    /// The policy name for this category, as used in permission grants.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileOps => "file_ops",
            Self::System => "system",
            Self::Search => "search",
            Self::Web => "web",
            Self::Notebook => "notebook",
            Self::Todo => "todo",
        }
    }
}

/// How strictly a tool's execution environment is constrained.
///
/// Informational today; the uniform security policy in the executor is
/// what actually blocks calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProfile {
    /// No special constraints.
    Open,
    /// Runs in a sandbox.
    Sandboxed,
    /// Runs with extra restrictions.
    Restricted,
}

/// Metadata the executor enforces for one tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    /// Execution category.
    pub category: ToolCategory,

    /// Per-tool timeout; the configured default applies when absent.
    pub timeout: Option<Duration>,

    /// Maximum serialized input size accepted.
    pub max_input_bytes: usize,

    /// Whether the request context must carry a grant for this tool.
    pub requires_permission: bool,

    /// Declared execution constraint level.
    pub security_profile: SecurityProfile,
}

impl ToolMetadata {
    /// Reasonable defaults for a tool the catalog does not know.
    pub fn for_category(category: ToolCategory) -> Self {
        Self {
            category,
            timeout: None,
            max_input_bytes: 1_000_000,
            requires_permission: false,
            security_profile: SecurityProfile::Open,
        }
    }
}

/// A local tool implementation.
///
/// Handlers return their output as a JSON value; the executor owns
/// stringification, truncation and error capture. Returning `Err` marks
/// the record failed but never fails the request.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool.
    async fn run(&self, tool_use_id: &str, name: &str, input: Value) -> anyhow::Result<Value>;
}

struct RegisteredTool {
    metadata: ToolMetadata,
    handler: Arc<dyn ToolHandler>,
}

/// Thread-safe name -> handler registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler with explicit metadata.
    pub fn register(&self, name: impl Into<String>, metadata: ToolMetadata, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(name.into(), RegisteredTool { metadata, handler });
    }

    /// Register a handler, taking metadata from the built-in catalog when
    /// the name is known there.
    pub fn register_cataloged(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        let metadata =
            catalog_metadata(&name).unwrap_or_else(|| ToolMetadata::for_category(ToolCategory::FileOps));
        self.register(name, metadata, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }

    fn get(&self, name: &str) -> Option<(ToolMetadata, Arc<dyn ToolHandler>)> {
        self.tools
            .get(name)
            .map(|entry| (entry.metadata.clone(), entry.handler.clone()))
    }
}

/// Built-in metadata for the tool names coding agents send.
///
/// Timeouts and categories follow what those tools actually need: file
/// reads are fast, shell commands and subtasks are not.
pub fn catalog_metadata(name: &str) -> Option<ToolMetadata> {
    let entry = |category, timeout_s: u64, requires_permission, security_profile| {
        Some(ToolMetadata {
            category,
            timeout: Some(Duration::from_secs(timeout_s)),
            max_input_bytes: 10_000_000,
            requires_permission,
            security_profile,
        })
    };

    match name {
        "Read" | "LS" => entry(ToolCategory::FileOps, 10, false, SecurityProfile::Open),
        "Write" | "Edit" | "MultiEdit" => entry(ToolCategory::FileOps, 20, false, SecurityProfile::Open),
        "Glob" => entry(ToolCategory::Search, 15, false, SecurityProfile::Open),
        "Grep" => entry(ToolCategory::Search, 20, false, SecurityProfile::Open),
        "Bash" => entry(ToolCategory::System, 30, true, SecurityProfile::Sandboxed),
        "Task" => entry(ToolCategory::System, 60, true, SecurityProfile::Restricted),
        "WebSearch" => entry(ToolCategory::Web, 25, false, SecurityProfile::Open),
        "WebFetch" => entry(ToolCategory::Web, 30, false, SecurityProfile::Open),
        "NotebookRead" => entry(ToolCategory::Notebook, 15, false, SecurityProfile::Open),
        "NotebookEdit" => entry(ToolCategory::Notebook, 45, false, SecurityProfile::Open),
        "TodoRead" | "TodoWrite" => entry(ToolCategory::Todo, 5, false, SecurityProfile::Open),
        _ => None,
    }
}

/// One tool_use block extracted from an assistant response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// The tool_use id, echoed in the matching record.
    pub id: String,

    /// Tool name.
    pub name: String,

    /// Input object.
    pub input: Value,
}

/// Result of executing (or refusing to execute) one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolExecutionRecord {
    /// The originating tool_use id.
    pub tool_use_id: String,

    /// Tool name, for logs and synthetic content.
    pub tool_name: String,

    /// Whether the handler ran to completion.
    pub success: bool,

    /// Stringified handler output, already truncated to the byte cap.
    pub output: Option<String>,

    /// Failure description when `success` is false.
    pub error: Option<String>,

    /// Wall-clock execution time.
    pub elapsed_ms: u64,

    /// Whether `output` was cut at the byte cap.
    pub truncated: bool,
}

impl ToolExecutionRecord {
    /// The textual content placed in the tool_result block.
    pub fn content(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"));
        }

        match &self.output {
            Some(output) => output.clone(),
            None => "Tool executed successfully (no output)".to_string(),
        }
    }

    /// Whether this record blocks the continuation loop entirely.
    pub fn is_security_violation(&self) -> bool {
        self.error.as_deref() == Some(executor::SECURITY_POLICY_VIOLATION)
    }
}
