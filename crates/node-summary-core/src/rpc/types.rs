//! Typed results of the RPC methods the summary engine polls.
//!
//! Only the fields the engine consumes are modelled; everything else in the
//! node's responses is ignored during deserialization.

use bitcoin::BlockHash;
use serde::Deserialize;

// ==============================================================================
// Chain
// ==============================================================================

/// Result of `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub blocks: u64,
    pub headers: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    #[serde(default)]
    pub size_on_disk: u64,
}

/// Result of `getblock` (verbosity 1), reduced to the metadata we cache.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub height: u64,
    /// Block header timestamp, seconds since the Unix epoch.
    pub time: i64,
    pub difficulty: f64,
}

/// Result of `getchaintxstats` with default window.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainTxStats {
    #[serde(rename = "txcount")]
    pub tx_count: u64,
    /// Absent when the window is empty (e.g. fresh regtest chains).
    #[serde(rename = "txrate", default)]
    pub tx_rate: Option<f64>,
}

// ==============================================================================
// Network
// ==============================================================================

/// Result of `getnettotals`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetTotals {
    #[serde(rename = "totalbytesrecv")]
    pub total_bytes_recv: u64,
    #[serde(rename = "totalbytessent")]
    pub total_bytes_sent: u64,
}

/// One entry of `getpeerinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
    /// `ipv4`, `ipv6`, `onion`, `not_publicly_routable`, `i2p`, `cjdns`, ...
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub connection_type: Option<String>,
    /// Older nodes only report this boolean.
    #[serde(default)]
    pub inbound: bool,
    #[serde(default)]
    pub subver: String,
}

impl PeerInfo {
    pub fn is_inbound(&self) -> bool {
        match self.connection_type.as_deref() {
            Some(kind) => kind == "inbound",
            None => self.inbound,
        }
    }
}

/// Result of `getnetworkinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    pub subversion: String,
}

// ==============================================================================
// Mempool and Fees
// ==============================================================================

/// Result of `getblocktemplate`, reduced to its transaction list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockTemplate {
    pub transactions: Vec<TemplateTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTx {
    /// Fee paid by the transaction, in satoshis.
    pub fee: u64,
}

/// Result of `getmempoolinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct MempoolInfo {
    /// Number of transactions.
    pub size: u64,
    /// Total fees in BTC.
    #[serde(default)]
    pub total_fee: f64,
}

/// Result of `estimatesmartfee`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeEstimate {
    /// BTC per kvB. Missing when the node lacks data for the target.
    #[serde(default)]
    pub feerate: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_direction_prefers_connection_type() {
        let peer: PeerInfo = serde_json::from_value(serde_json::json!({
            "network": "ipv4",
            "connection_type": "outbound-full-relay",
            "inbound": true,
            "subver": "/Satoshi:27.0.0/"
        }))
        .expect("peer must decode");
        assert!(!peer.is_inbound());
    }

    #[test]
    fn peer_direction_falls_back_to_inbound_flag() {
        let peer: PeerInfo = serde_json::from_value(serde_json::json!({
            "network": "onion",
            "inbound": true,
            "subver": "/Satoshi:0.20.1/"
        }))
        .expect("peer must decode");
        assert!(peer.is_inbound());
    }

    #[test]
    fn fee_estimate_without_feerate_decodes() {
        let estimate: FeeEstimate = serde_json::from_value(serde_json::json!({
            "errors": ["Insufficient data or no feerate found"],
            "blocks": 2
        }))
        .expect("estimate must decode");
        assert!(estimate.feerate.is_none());
        assert_eq!(estimate.errors.len(), 1);
    }

    #[test]
    fn block_info_ignores_transaction_list() {
        let block: BlockInfo = serde_json::from_value(serde_json::json!({
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "height": 800_000,
            "time": 1_690_168_629,
            "difficulty": 53_911_173_001_054.59,
            "tx": ["aa", "bb"]
        }))
        .expect("block must decode");
        assert_eq!(block.height, 800_000);
        assert_eq!(block.time, 1_690_168_629);
    }
}
