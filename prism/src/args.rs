use std::net::SocketAddr;

use clap::Parser;

/// prism: an Anthropic-protocol AI gateway with client-side tool execution.
///
/// Backend selection and upstream credentials come from the environment
/// (`PROXY_BACKEND`, `UPSTREAM_API_BASE`, `UPSTREAM_API_KEY`, ...); the
/// flags here only override the serving shell.
#[derive(Debug, Parser)]
#[command(name = "prism", version)]
pub(crate) struct Args {
    /// Address to bind the HTTP server to.
    #[arg(short, long, env = "LISTEN_ADDRESS")]
    pub(crate) listen_address: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `gateway=debug,server=info`.
    #[arg(long, env = "LOG_FILTER")]
    pub(crate) log_filter: Option<String>,
}
