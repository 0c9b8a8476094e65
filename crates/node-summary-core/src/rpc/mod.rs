//! Bitcoin Core RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait covering the read-only methods the summary
//! engine polls, an HTTP JSON-RPC implementation ([`HttpRpcClient`]) and a
//! fixture node for tests (`mock::MockRpc`).

mod http_adapter;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod types;

pub use http_adapter::HttpRpcClient;
pub use types::{
    BlockInfo, BlockTemplate, BlockchainInfo, ChainTxStats, FeeEstimate, MempoolInfo,
    NetTotals, NetworkInfo, PeerInfo, TemplateTx,
};

use async_trait::async_trait;
use bitcoin::BlockHash;

use crate::error::CoreError;

/// JSON-RPC method names, shared by the HTTP adapter and the error descriptors
/// produced by the aggregator.
pub mod methods {
    pub const UPTIME: &str = "uptime";
    pub const GET_BLOCKCHAIN_INFO: &str = "getblockchaininfo";
    pub const GET_NET_TOTALS: &str = "getnettotals";
    pub const GET_PEER_INFO: &str = "getpeerinfo";
    pub const GET_BLOCK_TEMPLATE: &str = "getblocktemplate";
    pub const GET_MEMPOOL_INFO: &str = "getmempoolinfo";
    pub const ESTIMATE_SMART_FEE: &str = "estimatesmartfee";
    pub const GET_CHAIN_TX_STATS: &str = "getchaintxstats";
    pub const GET_BLOCK_HASH: &str = "getblockhash";
    pub const GET_BLOCK: &str = "getblock";
    pub const GET_NETWORK_INFO: &str = "getnetworkinfo";
}

/// Estimation mode passed to every `estimatesmartfee` call.
pub const FEE_ESTIMATE_MODE: &str = "CONSERVATIVE";

/// The Bitcoin Core RPC methods polled to build a summary.
///
/// Implementations handle authentication, transport and response decoding.
/// Each method maps to exactly one JSON-RPC call; no retries are attempted.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Seconds since the node started.
    async fn uptime(&self) -> Result<u64, CoreError>;

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreError>;

    async fn get_net_totals(&self) -> Result<NetTotals, CoreError>;

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError>;

    /// Candidate next block (segwit rules). Fails while the node is in IBD.
    async fn get_block_template(&self) -> Result<BlockTemplate, CoreError>;

    async fn get_mempool_info(&self) -> Result<MempoolInfo, CoreError>;

    /// Fee estimate for confirmation within `conf_target` blocks, in
    /// [`FEE_ESTIMATE_MODE`].
    async fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeEstimate, CoreError>;

    async fn get_chain_tx_stats(&self) -> Result<ChainTxStats, CoreError>;

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError>;

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError>;

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError>;
}
