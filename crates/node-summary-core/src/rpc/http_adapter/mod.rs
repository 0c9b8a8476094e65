//! Native JSON-RPC client for Bitcoin Core compatible endpoints.
//!
//! Implements [`NodeRpc`](super::NodeRpc) over JSON-RPC 2.0 using `reqwest`,
//! with basic auth from a cookie file or a user/password pair and optional
//! request rate limiting.

mod client;
mod connection;
mod protocol;

pub use client::HttpRpcClient;
