mod cli;
mod server;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;

use node_summary_core::clock::SystemClock;
use node_summary_core::rpc::{HttpRpcClient, NodeRpc};
use node_summary_core::{Aggregator, AggregatorConfig, RefreshCache, VersionCache};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let client = HttpRpcClient::new(
        &args.rpc_host,
        args.rpc_port,
        args.rpc_user.as_deref(),
        args.rpc_pass.as_deref(),
        args.rpc_cookie_file.as_deref(),
        args.rpc_requests_per_second,
    )
    .wrap_err("configure Bitcoin Core RPC client")?;
    let rpc_url = client.url().to_string();
    let rpc: Arc<dyn NodeRpc> = Arc::new(client);

    // The service starts even when the node is down; failures surface in the
    // served snapshots until the node comes up.
    match rpc.get_blockchain_info().await {
        Ok(info) => tracing::info!(
            url = %rpc_url,
            blocks = info.blocks,
            headers = info.headers,
            "connected to Bitcoin Core"
        ),
        Err(err) => tracing::warn!("{}", format_rpc_connect_error(&rpc_url, &err.to_string())),
    }

    let aggregator = Arc::new(Aggregator::new(
        rpc.clone(),
        Arc::new(SystemClock),
        AggregatorConfig {
            fee_sampling: args.fee_sampling,
            max_sub_versions: args.max_sub_versions,
        },
    ));
    let state = server::AppState {
        summaries: Arc::new(RefreshCache::new(
            aggregator,
            Duration::from_secs(args.revalidate),
        )),
        versions: Arc::new(VersionCache::new(rpc)),
    };
    let router = server::build_router(state);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 and is accessible from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!(
        revalidate_secs = args.revalidate,
        fee_sampling = %args.fee_sampling,
        "listening on {bind_addr}"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("run HTTP server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn format_rpc_connect_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not reach RPC endpoint `{rpc_url}`"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("401") || source_error.contains("403") {
        lines.push(
            "hint: authentication failed; check BITCOIND_COOKIE_PATH or BITCOIND_USERNAME/BITCOIND_PASSWORD"
                .into(),
        );
    } else if source_error.contains("cookie") {
        lines.push(
            "hint: the cookie file could not be read; it is rewritten each time bitcoind starts"
                .into(),
        );
    } else if source_error.contains("dns error") {
        lines.push("hint: hostname resolution failed; verify BITCOIND_HOST".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify bitcoind is running with -server and BITCOIND_PORT is correct"
                .into(),
        );
    }

    lines.join("\n")
}
