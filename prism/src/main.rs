use std::sync::Arc;

use clap::Parser;
use gateway::ToolRegistry;
use tokio_util::sync::CancellationToken;

use args::Args;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::Config::from_env()?;

    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(log_filter) = args.log_filter {
        config.log_filter = log_filter;
    }

    // Tool handlers are external collaborators; a bare deployment runs as
    // a pure protocol-translating proxy.
    let registry = Arc::new(ToolRegistry::new());

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(server::ServeConfig {
        config,
        registry,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
