//! The normalized point-in-time record produced by one aggregation cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::FetchError;

// ==============================================================================
// Peers
// ==============================================================================

/// Network kinds broken out in the peer counts. Peers on other networks
/// (i2p, cjdns, ...) only contribute to the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Ipv4,
    Ipv6,
    Onion,
    NotPubliclyRoutable,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 4] = [
        NetworkKind::Ipv4,
        NetworkKind::Ipv6,
        NetworkKind::Onion,
        NetworkKind::NotPubliclyRoutable,
    ];

    /// Map a `getpeerinfo` `network` value.
    pub fn from_rpc(network: &str) -> Option<Self> {
        match network {
            "ipv4" => Some(Self::Ipv4),
            "ipv6" => Some(Self::Ipv6),
            "onion" => Some(Self::Onion),
            "not_publicly_routable" => Some(Self::NotPubliclyRoutable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerCounts {
    #[serde(rename = "in")]
    pub inbound: u32,
    #[serde(rename = "out")]
    pub outbound: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Peers {
    pub total: u32,
    pub by_network: BTreeMap<NetworkKind, PeerCounts>,
}

// ==============================================================================
// Mempool and Template
// ==============================================================================

/// Candidate next block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TemplateSummary {
    /// BTC.
    pub fees: f64,
    pub ntx: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MempoolSummary {
    /// BTC.
    pub fees: f64,
    pub ntx: u64,
    /// Transactions entering mempool or chain per second since the previous
    /// snapshot. Absent on the first snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntx_per_second: Option<f64>,
}

// ==============================================================================
// Forecasts
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NextRetarget {
    pub blocks: u64,
    pub days: f64,
    /// Always within `[-75, 300]`.
    pub estimated_diff_adj_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NextHalving {
    pub blocks: u64,
    /// Difficulty retargets left before the halving; 0 when the halving falls
    /// before the next retarget.
    pub retargets: f64,
    pub days: f64,
}

// ==============================================================================
// Summary
// ==============================================================================

/// A complete, successful snapshot of the node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub uptime_days: f64,
    pub blocks: u64,
    pub headers: u64,
    pub diff_epoch: u64,
    pub halving_epoch: u64,
    pub size_on_disk: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub peers: Peers,
    /// `(agent, count)` by descending count, ties in first-seen order.
    pub sub_versions: Vec<(String, u32)>,
    pub template: TemplateSummary,
    pub mempool: MempoolSummary,
    /// sat/vB per confirmation target; `None` when not (yet) known.
    pub feerates: BTreeMap<u16, Option<f64>>,
    /// Seconds; negative when the local clock is behind the best block.
    pub time_since_last_block: i64,
    /// Milliseconds since the Unix epoch.
    pub server_time: u64,
    pub prev_diff_adj_percent: f64,
    pub next_retarget: NextRetarget,
    pub next_halving: NextHalving,
    /// Total chain transaction count.
    pub ntx: u64,
    /// Long-run chain transaction rate.
    pub ntx_per_second: f64,
    /// The prior successful summary, one level deep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Arc<Summary>>,
}

// ==============================================================================
// Snapshot
// ==============================================================================

/// Outcome of one aggregation cycle: a full summary or `{err, server_time}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Ready(Arc<Summary>),
    Failed { err: FetchError, server_time: u64 },
}

impl Snapshot {
    pub fn server_time(&self) -> u64 {
        match self {
            Self::Ready(summary) => summary.server_time,
            Self::Failed { server_time, .. } => *server_time,
        }
    }

    pub fn summary(&self) -> Option<&Arc<Summary>> {
        match self {
            Self::Ready(summary) => Some(summary),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Ready(_) => None,
            Self::Failed { err, .. } => Some(err),
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
