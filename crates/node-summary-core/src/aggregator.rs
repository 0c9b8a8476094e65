//! Summary aggregation.
//!
//! One cycle runs three phases of concurrent RPC calls. Each phase waits for
//! all of its calls before the next one starts, because later phases need the
//! chain height and best block hash found by the first.
//!
//! 1. Node state: uptime, chain, traffic, peers, block template, mempool, fee
//!    estimates and chain transaction stats.
//! 2. Hashes of the two difficulty epoch boundary blocks, plus the best block
//!    unless it is already cached.
//! 3. Boundary blocks that are not cached yet.
//!
//! Any failure aborts the cycle, except `getblocktemplate`, which fails while
//! the node is still in initial block download and is replaced by an empty
//! template.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use bitcoin::{Amount, BlockHash};
use futures::future::try_join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::block_cache::{BlockMeta, BlockMetaCache, PinnedHeights};
use crate::clock::Clock;
use crate::error::{CoreError, FetchError};
use crate::fees::{sats_per_vbyte, FeeRotator, FeeSampling};
use crate::precision::precision4;
use crate::rpc::types::{
    BlockInfo, BlockTemplate, BlockchainInfo, ChainTxStats, MempoolInfo, NetTotals, PeerInfo,
};
use crate::rpc::{methods, NodeRpc};
use crate::summary::{
    MempoolSummary, NetworkKind, NextHalving, NextRetarget, PeerCounts, Peers, Snapshot, Summary,
    TemplateSummary,
};

pub const DIFFICULTY_ADJUSTMENT_BLOCKS: u64 = 2016;
pub const TARGET_BLOCK_TIME_SECS: f64 = 600.0;
/// 24 hours at 6 blocks per hour.
pub const TARGET_BLOCKS_PER_DAY: f64 = 144.0;
/// Not a multiple of [`DIFFICULTY_ADJUSTMENT_BLOCKS`].
pub const HALVING_BLOCKS: u64 = 210_000;

/// Bounds of the block ratio used for the retarget estimate, in percent.
const MIN_BLOCK_RATIO_PERCENT: f64 = 25.0;
const MAX_BLOCK_RATIO_PERCENT: f64 = 400.0;

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub fee_sampling: FeeSampling,
    /// Maximum number of entries kept in the sub-version histogram.
    pub max_sub_versions: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            fee_sampling: FeeSampling::Rotate,
            max_sub_versions: 10,
        }
    }
}

// ==============================================================================
// Aggregator
// ==============================================================================

/// Builds [`Snapshot`]s from a node, keeping the block metadata cache and the
/// fee rotation state alive across cycles.
pub struct Aggregator {
    rpc: Arc<dyn NodeRpc>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    blocks: Mutex<BlockMetaCache>,
    fees: Mutex<FeeRotator>,
}

/// Phase 1 output.
struct NodeState {
    uptime: u64,
    chain: BlockchainInfo,
    net_totals: NetTotals,
    peers: Vec<PeerInfo>,
    template: BlockTemplate,
    mempool: MempoolInfo,
    feerates: BTreeMap<u16, Option<f64>>,
    tx_stats: ChainTxStats,
}

/// Phase 2 output.
struct Boundaries {
    epoch_start_hash: BlockHash,
    prev_epoch_end_hash: BlockHash,
    best: BlockMeta,
    server_time: u64,
}

impl Aggregator {
    pub fn new(rpc: Arc<dyn NodeRpc>, clock: Arc<dyn Clock>, config: AggregatorConfig) -> Self {
        Self {
            rpc,
            clock,
            config,
            blocks: Mutex::new(BlockMetaCache::new()),
            fees: Mutex::new(FeeRotator::default()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one full cycle. Never fails: errors come back as
    /// [`Snapshot::Failed`].
    pub async fn aggregate(&self) -> Snapshot {
        match self.try_aggregate().await {
            Ok(summary) => {
                info!(
                    blocks = summary.blocks,
                    peers = summary.peers.total,
                    mempool_ntx = summary.mempool.ntx,
                    time_since_last_block = summary.time_since_last_block,
                    "summary refreshed"
                );
                Snapshot::Ready(Arc::new(summary))
            }
            Err(err) => {
                error!(
                    method = %err.method,
                    kind = ?err.kind,
                    code = ?err.code,
                    detail = %err.detail,
                    "summary aggregation failed"
                );
                Snapshot::Failed {
                    err,
                    server_time: self.clock.now_ms(),
                }
            }
        }
    }

    async fn try_aggregate(&self) -> Result<Summary, FetchError> {
        let state = self.fetch_node_state().await?;

        let blocks = state.chain.blocks;
        let diff_epoch = blocks / DIFFICULTY_ADJUSTMENT_BLOCKS + 1;
        let halving_epoch = blocks / HALVING_BLOCKS + 1;
        let epoch_start = DIFFICULTY_ADJUSTMENT_BLOCKS * (diff_epoch - 1);
        let pinned = PinnedHeights {
            epoch_start,
            // Epoch 1 has no predecessor; compare genesis with itself.
            prev_epoch_end: epoch_start.saturating_sub(1),
        };

        let boundaries = self
            .fetch_boundaries(state.chain.best_block_hash, pinned)
            .await?;
        let (epoch_start_block, prev_epoch_end_block) =
            self.fetch_boundary_blocks(&boundaries, pinned).await?;

        let forecast = forecast(
            blocks,
            boundaries.best.time,
            &epoch_start_block,
            &prev_epoch_end_block,
        );
        let time_since_last_block =
            (boundaries.server_time as f64 / 1000.0).round() as i64 - boundaries.best.time;

        Ok(Summary {
            uptime_days: precision4(state.uptime as f64 / SECONDS_PER_DAY),
            blocks,
            headers: state.chain.headers,
            diff_epoch,
            halving_epoch,
            size_on_disk: state.chain.size_on_disk,
            total_bytes_sent: state.net_totals.total_bytes_sent,
            total_bytes_recv: state.net_totals.total_bytes_recv,
            peers: count_peers(&state.peers),
            sub_versions: sub_version_histogram(&state.peers, self.config.max_sub_versions),
            template: summarize_template(&state.template),
            mempool: MempoolSummary {
                fees: state.mempool.total_fee,
                ntx: state.mempool.size,
                ntx_per_second: None,
            },
            feerates: state.feerates,
            time_since_last_block,
            server_time: boundaries.server_time,
            prev_diff_adj_percent: forecast.prev_diff_adj_percent,
            next_retarget: forecast.next_retarget,
            next_halving: forecast.next_halving,
            ntx: state.tx_stats.tx_count,
            ntx_per_second: precision4(state.tx_stats.tx_rate.unwrap_or(0.0)),
            previous: None,
        })
    }

    // --------------------------------------------------------------------------
    // Phase 1
    // --------------------------------------------------------------------------

    async fn fetch_node_state(&self) -> Result<NodeState, FetchError> {
        let fee_targets = {
            let mut rotator = self.fees.lock().await;
            match self.config.fee_sampling {
                FeeSampling::Rotate => vec![rotator.next_target()],
                FeeSampling::All => rotator.targets().to_vec(),
            }
        };

        let template = async {
            match self.rpc.get_block_template().await {
                Ok(template) => Ok::<_, FetchError>(template),
                Err(err) => {
                    warn!(error = %err, "getblocktemplate failed; assuming initial block download");
                    Ok(BlockTemplate::default())
                }
            }
        };
        let estimates = try_join_all(fee_targets.iter().map(|target| {
            tag(methods::ESTIMATE_SMART_FEE, self.rpc.estimate_smart_fee(*target))
        }));

        let (uptime, chain, net_totals, peers, template, mempool, estimates, tx_stats) =
            futures::try_join!(
                tag(methods::UPTIME, self.rpc.uptime()),
                tag(methods::GET_BLOCKCHAIN_INFO, self.rpc.get_blockchain_info()),
                tag(methods::GET_NET_TOTALS, self.rpc.get_net_totals()),
                tag(methods::GET_PEER_INFO, self.rpc.get_peer_info()),
                template,
                tag(methods::GET_MEMPOOL_INFO, self.rpc.get_mempool_info()),
                estimates,
                tag(methods::GET_CHAIN_TX_STATS, self.rpc.get_chain_tx_stats()),
            )?;

        let feerates = {
            let mut rotator = self.fees.lock().await;
            for (target, estimate) in fee_targets.iter().zip(estimates) {
                let rate = estimate.feerate.map(sats_per_vbyte);
                if rate.is_none() {
                    debug!(conf_target = *target, errors = ?estimate.errors, "no fee estimate");
                }
                rotator
                    .record(*target, rate)
                    .map_err(|e| FetchError::new(methods::ESTIMATE_SMART_FEE, e))?;
            }
            rotator.rates()
        };

        Ok(NodeState {
            uptime,
            chain,
            net_totals,
            peers,
            template,
            mempool,
            feerates,
            tx_stats,
        })
    }

    // --------------------------------------------------------------------------
    // Phase 2
    // --------------------------------------------------------------------------

    async fn fetch_boundaries(
        &self,
        best_hash: BlockHash,
        pinned: PinnedHeights,
    ) -> Result<Boundaries, FetchError> {
        let best_cached = self.blocks.lock().await.get(&best_hash);
        debug!(best_block.cached = best_cached.is_some(), "fetching epoch boundaries");

        let best = async {
            match best_cached {
                Some(meta) => Ok(meta),
                None => tag(methods::GET_BLOCK, self.rpc.get_block(&best_hash))
                    .await
                    .map(|block| block_meta(&block)),
            }
        };
        let (epoch_start_hash, prev_epoch_end_hash, best) = futures::try_join!(
            tag(
                methods::GET_BLOCK_HASH,
                self.rpc.get_block_hash(pinned.epoch_start)
            ),
            tag(
                methods::GET_BLOCK_HASH,
                self.rpc.get_block_hash(pinned.prev_epoch_end)
            ),
            best,
        )?;

        if best_cached.is_none() {
            self.blocks.lock().await.put(best_hash, best, pinned);
        }

        Ok(Boundaries {
            epoch_start_hash,
            prev_epoch_end_hash,
            best,
            server_time: self.clock.now_ms(),
        })
    }

    // --------------------------------------------------------------------------
    // Phase 3
    // --------------------------------------------------------------------------

    async fn fetch_boundary_blocks(
        &self,
        boundaries: &Boundaries,
        pinned: PinnedHeights,
    ) -> Result<(BlockMeta, BlockMeta), FetchError> {
        let (start_cached, end_cached) = {
            let cache = self.blocks.lock().await;
            (
                cache.get(&boundaries.epoch_start_hash),
                cache.get(&boundaries.prev_epoch_end_hash),
            )
        };

        let mut missing = Vec::with_capacity(2);
        if start_cached.is_none() {
            missing.push(boundaries.epoch_start_hash);
        }
        if end_cached.is_none() && !missing.contains(&boundaries.prev_epoch_end_hash) {
            missing.push(boundaries.prev_epoch_end_hash);
        }
        debug!(missing = missing.len(), "fetching epoch boundary blocks");

        let fetched: HashMap<BlockHash, BlockMeta> = if missing.is_empty() {
            HashMap::new()
        } else {
            let blocks = try_join_all(
                missing
                    .iter()
                    .map(|hash| tag(methods::GET_BLOCK, self.rpc.get_block(hash))),
            )
            .await?;
            let mut cache = self.blocks.lock().await;
            missing
                .iter()
                .zip(blocks)
                .map(|(hash, block)| {
                    let meta = block_meta(&block);
                    cache.put(*hash, meta, pinned);
                    (*hash, meta)
                })
                .collect()
        };

        let resolve = |cached: Option<BlockMeta>, hash: &BlockHash| {
            cached.or_else(|| fetched.get(hash).copied()).ok_or_else(|| {
                FetchError::new(
                    methods::GET_BLOCK,
                    CoreError::InvalidData(format!("block {hash} missing after fetch")),
                )
            })
        };
        Ok((
            resolve(start_cached, &boundaries.epoch_start_hash)?,
            resolve(end_cached, &boundaries.prev_epoch_end_hash)?,
        ))
    }
}

/// Attach the RPC method name to a call's error.
async fn tag<T>(
    method: &'static str,
    call: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, FetchError> {
    call.await.map_err(|err| FetchError::new(method, err))
}

fn block_meta(block: &BlockInfo) -> BlockMeta {
    BlockMeta {
        time: block.time,
        difficulty: block.difficulty,
        height: block.height,
    }
}

// ==============================================================================
// Derived Fields
// ==============================================================================

fn count_peers(peers: &[PeerInfo]) -> Peers {
    let mut by_network: BTreeMap<NetworkKind, PeerCounts> = NetworkKind::ALL
        .iter()
        .map(|kind| (*kind, PeerCounts::default()))
        .collect();
    for peer in peers {
        let Some(kind) = NetworkKind::from_rpc(&peer.network) else {
            continue;
        };
        let counts = by_network.entry(kind).or_default();
        if peer.is_inbound() {
            counts.inbound += 1;
        } else {
            counts.outbound += 1;
        }
    }
    Peers {
        total: peers.len() as u32,
        by_network,
    }
}

/// Count peers per sub-version, most common first. Ties keep the order in
/// which the sub-versions were first seen. Empty sub-versions are skipped.
fn sub_version_histogram(peers: &[PeerInfo], cap: usize) -> Vec<(String, u32)> {
    let mut counts: Vec<(String, u32)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for peer in peers.iter().filter(|p| !p.subver.is_empty()) {
        match index.get(peer.subver.as_str()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(&peer.subver, counts.len());
                counts.push((peer.subver.clone(), 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(cap);
    counts
}

fn summarize_template(template: &BlockTemplate) -> TemplateSummary {
    let fees: u64 = template.transactions.iter().map(|tx| tx.fee).sum();
    TemplateSummary {
        fees: Amount::from_sat(fees).to_btc(),
        ntx: template.transactions.len() as u64,
    }
}

/// Difficulty and halving forecasts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecast {
    pub prev_diff_adj_percent: f64,
    pub next_retarget: NextRetarget,
    pub next_halving: NextHalving,
}

/// Project the next retarget and halving from the chain height, the best
/// block time and the two epoch boundary blocks.
pub fn forecast(
    blocks: u64,
    best_time: i64,
    epoch_start: &BlockMeta,
    prev_epoch_end: &BlockMeta,
) -> Forecast {
    let epoch_start_height = blocks - blocks % DIFFICULTY_ADJUSTMENT_BLOCKS;
    let blocks_since_retarget = blocks - epoch_start_height;
    let (estimated_diff_adj_percent, block_ratio) =
        estimate_adjustment(blocks_since_retarget, best_time - epoch_start.time);

    let blocks_to_retarget = DIFFICULTY_ADJUSTMENT_BLOCKS - blocks_since_retarget;
    let days_to_retarget =
        precision4(blocks_to_retarget as f64 / TARGET_BLOCKS_PER_DAY / block_ratio);

    let halving_epoch = blocks / HALVING_BLOCKS + 1;
    let halving_start_height = HALVING_BLOCKS * (halving_epoch - 1);
    let blocks_to_halving = HALVING_BLOCKS - (blocks - halving_start_height);
    let next_halving_height = HALVING_BLOCKS * halving_epoch;
    let last_retarget_before_halving = next_halving_height / DIFFICULTY_ADJUSTMENT_BLOCKS
        * DIFFICULTY_ADJUSTMENT_BLOCKS;
    let next_retarget_height = blocks + blocks_to_retarget;
    // Both heights are multiples of the epoch length, so this is exact. The
    // result is 0 when the halving comes before the next retarget.
    let retargets = 1
        + (last_retarget_before_halving as i64 - next_retarget_height as i64)
            / DIFFICULTY_ADJUSTMENT_BLOCKS as i64;

    let prev_diff_adj_percent = if prev_epoch_end.difficulty > 0.0 {
        precision4(
            (epoch_start.difficulty - prev_epoch_end.difficulty) / prev_epoch_end.difficulty
                * 100.0,
        )
    } else {
        0.0
    };

    Forecast {
        prev_diff_adj_percent,
        next_retarget: NextRetarget {
            blocks: blocks_to_retarget,
            days: days_to_retarget,
            estimated_diff_adj_percent,
        },
        next_halving: NextHalving {
            blocks: blocks_to_halving,
            retargets: retargets as f64,
            days: precision4(blocks_to_halving as f64 / TARGET_BLOCKS_PER_DAY),
        },
    }
}

/// Estimated difficulty change in percent, and the uncapped ratio of mined to
/// expected blocks since the epoch started.
///
/// The ratio is clamped to `[25%, 400%]` before taking away 100, so the
/// estimate always lies in `[-75, 300]`.
pub fn estimate_adjustment(blocks_since_retarget: u64, elapsed_secs: i64) -> (f64, f64) {
    if blocks_since_retarget == 0 {
        return (0.0, 1.0);
    }
    let predicted_blocks = elapsed_secs as f64 / TARGET_BLOCK_TIME_SECS;
    let ratio = blocks_since_retarget as f64 / predicted_blocks;
    if ratio.is_nan() {
        return (0.0, 1.0);
    }
    let ratio_percent = (100.0 * ratio).clamp(MIN_BLOCK_RATIO_PERCENT, MAX_BLOCK_RATIO_PERCENT);
    (precision4(ratio_percent - 100.0), ratio)
}
