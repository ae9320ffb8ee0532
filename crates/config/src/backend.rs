use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Which wire format and endpoint shape the configured upstream speaks.
///
/// This is the only closed enum of backend kinds in the system; the
/// gateway's backend router dispatches on it exactly once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A generic OpenAI Chat Completions endpoint (OpenRouter, vLLM, ...).
    OpenAiCompatible,

    /// An upstream that already speaks the Anthropic Messages format.
    /// Translation is bypassed; model mapping and tool execution are not.
    AnthropicPassthrough,

    /// Databricks model serving hosting Claude; OpenAI-shaped bodies with a
    /// per-endpoint invocation path.
    Databricks,
}

impl BackendKind {
    /// The configuration string for this kind, as accepted in `PROXY_BACKEND`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "OPENAI_COMPATIBLE",
            Self::AnthropicPassthrough => "ANTHROPIC_PASSTHROUGH",
            Self::Databricks => "DATABRICKS",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPENAI_COMPATIBLE" => Ok(Self::OpenAiCompatible),
            "ANTHROPIC_PASSTHROUGH" => Ok(Self::AnthropicPassthrough),
            "DATABRICKS" => Ok(Self::Databricks),
            other => anyhow::bail!(
                "unknown PROXY_BACKEND {other:?}, expected one of \
                 OPENAI_COMPATIBLE, ANTHROPIC_PASSTHROUGH, DATABRICKS"
            ),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_kinds_case_insensitively() {
        assert_eq!(
            "openai_compatible".parse::<BackendKind>().unwrap(),
            BackendKind::OpenAiCompatible
        );
        assert_eq!(
            "ANTHROPIC_PASSTHROUGH".parse::<BackendKind>().unwrap(),
            BackendKind::AnthropicPassthrough
        );
        assert_eq!("Databricks".parse::<BackendKind>().unwrap(), BackendKind::Databricks);
    }

    #[test]
    fn round_trips_through_as_str() {
        for kind in [
            BackendKind::OpenAiCompatible,
            BackendKind::AnthropicPassthrough,
            BackendKind::Databricks,
        ] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
