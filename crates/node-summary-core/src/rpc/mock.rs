//! A fixture Bitcoin node for tests.
//!
//! The default fixture is a mainnet-like chain at height 800 000, in the
//! middle of difficulty epoch 397 and halving epoch 4. Individual RPC methods
//! can be made to fail, and every call is counted per method.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;

use crate::error::{CoreError, RpcError};

use super::methods;
use super::types::{
    BlockInfo, BlockTemplate, BlockchainInfo, ChainTxStats, FeeEstimate, MempoolInfo, NetTotals,
    NetworkInfo, PeerInfo, TemplateTx,
};
use super::NodeRpc;

/// Height of the fixture's best block.
pub const FIXTURE_HEIGHT: u64 = 800_000;
/// First block of the fixture's current difficulty epoch (2016 * 396).
pub const FIXTURE_EPOCH_START: u64 = 798_336;
/// Timestamp of [`FIXTURE_EPOCH_START`].
pub const FIXTURE_EPOCH_START_TIME: i64 = 1_689_000_000;
/// Difficulty of the previous epoch.
pub const FIXTURE_PREV_DIFFICULTY: f64 = 50_000_000_000_000.0;
/// Difficulty of the current epoch.
pub const FIXTURE_DIFFICULTY: f64 = 52_000_000_000_000.0;

/// Deterministic block hash for a height.
pub fn hash_for_height(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xb1;
    BlockHash::from_byte_array(bytes)
}

/// Build a block fixture at `height`.
pub fn block_at(height: u64, time: i64, difficulty: f64) -> BlockInfo {
    BlockInfo {
        hash: hash_for_height(height),
        height,
        time,
        difficulty,
    }
}

/// Build a peer fixture.
pub fn peer(network: &str, inbound: bool, subver: &str) -> PeerInfo {
    PeerInfo {
        network: network.to_owned(),
        connection_type: Some(if inbound { "inbound" } else { "outbound-full-relay" }.to_owned()),
        inbound,
        subver: subver.to_owned(),
    }
}

struct MockState {
    blockchain_info: BlockchainInfo,
    uptime: u64,
    net_totals: NetTotals,
    peers: Vec<PeerInfo>,
    template: BlockTemplate,
    mempool: MempoolInfo,
    fee_rates: HashMap<u16, f64>,
    chain_tx_stats: ChainTxStats,
    blocks: HashMap<BlockHash, BlockInfo>,
    heights: HashMap<u64, BlockHash>,
    subversion: String,
    failures: HashSet<&'static str>,
}

pub struct MockRpc {
    state: Mutex<MockState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    latency: Option<Duration>,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        // Blocks arrive every 500s instead of 600s: 20% ahead of schedule.
        let best_time =
            FIXTURE_EPOCH_START_TIME + (FIXTURE_HEIGHT - FIXTURE_EPOCH_START) as i64 * 500;
        let builder = MockRpcBuilder {
            state: MockState {
                blockchain_info: BlockchainInfo {
                    blocks: FIXTURE_HEIGHT,
                    headers: FIXTURE_HEIGHT,
                    best_block_hash: hash_for_height(FIXTURE_HEIGHT),
                    size_on_disk: 590_000_000_000,
                },
                uptime: 2 * 24 * 3600,
                net_totals: NetTotals {
                    total_bytes_recv: 1_000_000,
                    total_bytes_sent: 2_000_000,
                },
                peers: vec![
                    peer("ipv4", false, "/Satoshi:25.0.0/"),
                    peer("ipv4", true, "/Satoshi:24.0.1/"),
                    peer("ipv6", false, "/Satoshi:25.0.0/"),
                    peer("onion", true, "/Satoshi:24.0.1/"),
                    peer("onion", true, "/Satoshi:25.0.0/"),
                    peer("not_publicly_routable", false, "/btcd:0.23.3/"),
                    peer("i2p", false, "/Satoshi:26.0.0/"),
                ],
                template: BlockTemplate {
                    transactions: vec![TemplateTx { fee: 1_000 }, TemplateTx { fee: 2_500 }],
                },
                mempool: MempoolInfo {
                    size: 100,
                    total_fee: 0.5,
                },
                fee_rates: HashMap::from([
                    (1, 0.000_25),
                    (6, 0.000_12),
                    (36, 0.000_05),
                    (144, 0.000_012_345),
                ]),
                chain_tx_stats: ChainTxStats {
                    tx_count: 900_000,
                    tx_rate: Some(7.123_456),
                },
                blocks: HashMap::new(),
                heights: HashMap::new(),
                subversion: "/Satoshi:25.0.0/".to_owned(),
                failures: HashSet::new(),
            },
            latency: None,
        };
        builder
            .with_block(block_at(
                FIXTURE_EPOCH_START - 1,
                FIXTURE_EPOCH_START_TIME - 600,
                FIXTURE_PREV_DIFFICULTY,
            ))
            .with_block(block_at(
                FIXTURE_EPOCH_START,
                FIXTURE_EPOCH_START_TIME,
                FIXTURE_DIFFICULTY,
            ))
            .with_block(block_at(FIXTURE_HEIGHT, best_time, FIXTURE_DIFFICULTY))
    }

    /// Number of times `method` was called.
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("mock call counter poisoned")
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of calls across all methods.
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .expect("mock call counter poisoned")
            .values()
            .sum()
    }

    pub fn set_failure(&self, method: &'static str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failures.insert(method);
        } else {
            state.failures.remove(method);
        }
    }

    pub fn set_mempool_size(&self, size: u64) {
        self.state().mempool.size = size;
    }

    pub fn set_tx_count(&self, tx_count: u64) {
        self.state().chain_tx_stats.tx_count = tx_count;
    }

    /// Move the chain tip. The block must already be registered.
    pub fn set_tip(&self, height: u64, hash: BlockHash) {
        let mut state = self.state();
        state.blockchain_info.blocks = height;
        state.blockchain_info.headers = height;
        state.blockchain_info.best_block_hash = hash;
    }

    pub fn add_block(&self, block: BlockInfo) {
        let mut state = self.state();
        state.heights.insert(block.height, block.hash);
        state.blocks.insert(block.hash, block);
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Count the call, apply latency and failure injection.
    async fn enter(&self, method: &'static str) -> Result<(), CoreError> {
        *self
            .calls
            .lock()
            .expect("mock call counter poisoned")
            .entry(method)
            .or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.state().failures.contains(method) {
            return Err(CoreError::Rpc(RpcError::ServerError {
                code: -1,
                message: format!("{method} failed"),
            }));
        }
        Ok(())
    }
}

pub struct MockRpcBuilder {
    state: MockState,
    latency: Option<Duration>,
}

impl MockRpcBuilder {
    pub fn with_blockchain_info(mut self, info: BlockchainInfo) -> Self {
        self.state.blockchain_info = info;
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.state.heights.insert(block.height, block.hash);
        self.state.blocks.insert(block.hash, block);
        self
    }

    pub fn with_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.state.peers = peers;
        self
    }

    pub fn with_chain_tx_stats(mut self, stats: ChainTxStats) -> Self {
        self.state.chain_tx_stats = stats;
        self
    }

    pub fn with_mempool(mut self, mempool: MempoolInfo) -> Self {
        self.state.mempool = mempool;
        self
    }

    /// Fee rate in BTC/kvB for `target`; targets without a rate answer with
    /// "insufficient data".
    pub fn with_fee_rate(mut self, target: u16, btc_per_kvb: Option<f64>) -> Self {
        match btc_per_kvb {
            Some(rate) => self.state.fee_rates.insert(target, rate),
            None => self.state.fee_rates.remove(&target),
        };
        self
    }

    pub fn with_subversion(mut self, subversion: &str) -> Self {
        self.state.subversion = subversion.to_owned();
        self
    }

    pub fn with_failure(mut self, method: &'static str) -> Self {
        self.state.failures.insert(method);
        self
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(self) -> MockRpc {
        MockRpc {
            state: Mutex::new(self.state),
            calls: Mutex::new(HashMap::new()),
            latency: self.latency,
        }
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn uptime(&self) -> Result<u64, CoreError> {
        self.enter(methods::UPTIME).await?;
        Ok(self.state().uptime)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreError> {
        self.enter(methods::GET_BLOCKCHAIN_INFO).await?;
        Ok(self.state().blockchain_info.clone())
    }

    async fn get_net_totals(&self) -> Result<NetTotals, CoreError> {
        self.enter(methods::GET_NET_TOTALS).await?;
        Ok(self.state().net_totals.clone())
    }

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError> {
        self.enter(methods::GET_PEER_INFO).await?;
        Ok(self.state().peers.clone())
    }

    async fn get_block_template(&self) -> Result<BlockTemplate, CoreError> {
        self.enter(methods::GET_BLOCK_TEMPLATE).await?;
        Ok(self.state().template.clone())
    }

    async fn get_mempool_info(&self) -> Result<MempoolInfo, CoreError> {
        self.enter(methods::GET_MEMPOOL_INFO).await?;
        Ok(self.state().mempool.clone())
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeEstimate, CoreError> {
        self.enter(methods::ESTIMATE_SMART_FEE).await?;
        Ok(match self.state().fee_rates.get(&conf_target) {
            Some(rate) => FeeEstimate {
                feerate: Some(*rate),
                errors: Vec::new(),
            },
            None => FeeEstimate {
                feerate: None,
                errors: vec!["Insufficient data or no feerate found".to_owned()],
            },
        })
    }

    async fn get_chain_tx_stats(&self) -> Result<ChainTxStats, CoreError> {
        self.enter(methods::GET_CHAIN_TX_STATS).await?;
        Ok(self.state().chain_tx_stats.clone())
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        self.enter(methods::GET_BLOCK_HASH).await?;
        self.state()
            .heights
            .get(&height)
            .copied()
            .ok_or_else(|| {
                CoreError::Rpc(RpcError::ServerError {
                    code: -8,
                    message: "Block height out of range".to_owned(),
                })
            })
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError> {
        self.enter(methods::GET_BLOCK).await?;
        self.state().blocks.get(hash).cloned().ok_or_else(|| {
            CoreError::Rpc(RpcError::ServerError {
                code: -5,
                message: "Block not found".to_owned(),
            })
        })
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError> {
        self.enter(methods::GET_NETWORK_INFO).await?;
        Ok(NetworkInfo {
            subversion: self.state().subversion.clone(),
        })
    }
}
