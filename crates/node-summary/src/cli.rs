use std::path::PathBuf;

use clap::Parser;

use node_summary_core::fees::FeeSampling;

/// node-summary: point-in-time summary of a Bitcoin Core node, served as JSON.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Bitcoin Core RPC host, optionally with an `http://` or `https://` scheme.
    #[arg(long, default_value = "http://127.0.0.1", env = "BITCOIND_HOST")]
    pub rpc_host: String,

    /// Bitcoin Core RPC port.
    #[arg(long, default_value = "8332", env = "BITCOIND_PORT")]
    pub rpc_port: u16,

    /// Path to the node's `.cookie` file. Takes precedence over user/pass.
    #[arg(long, env = "BITCOIND_COOKIE_PATH")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// RPC username (used together with --rpc-pass).
    #[arg(long, env = "BITCOIND_USERNAME")]
    pub rpc_user: Option<String>,

    /// RPC password (used together with --rpc-user).
    #[arg(long, env = "BITCOIND_PASSWORD")]
    pub rpc_pass: Option<String>,

    /// Optional cap on outbound RPC requests per second.
    #[arg(long)]
    pub rpc_requests_per_second: Option<u32>,

    /// Seconds a summary is served before the next request refreshes it.
    #[arg(long, default_value = "10", env = "REVALIDATE")]
    pub revalidate: u64,

    /// Fee estimate sampling: `rotate` (one target per refresh) or `all`.
    #[arg(long, default_value_t = FeeSampling::Rotate, env = "FEE_SAMPLING")]
    pub fee_sampling: FeeSampling,

    /// Maximum number of peer sub-versions reported.
    #[arg(long, default_value = "10")]
    pub max_sub_versions: usize,

    /// Log verbosity when RUST_LOG is not set (e.g. `info`, `debug`).
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "3000")]
    pub port: u16,
}
