//! Fee estimate sampling.
//!
//! Two policies are supported. [`FeeSampling::All`] asks the node for every
//! confirmation target on every cycle. [`FeeSampling::Rotate`] asks for a
//! single target per cycle, round-robin, and serves the other targets from
//! the last value seen; fee estimates move slowly, so this trades a little
//! staleness for a quarter of the `estimatesmartfee` load.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::precision::precision3_decimals;

/// Confirmation targets, in blocks.
pub const FEE_TARGETS: [u16; 4] = [1, 6, 36, 144];

/// BTC/kvB → sat/vB.
const BTC_PER_KVB_TO_SAT_PER_VB: f64 = 1e5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeeSampling {
    #[default]
    Rotate,
    All,
}

impl FromStr for FeeSampling {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rotate" => Ok(Self::Rotate),
            "all" => Ok(Self::All),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown fee sampling `{other}`; expected `rotate` or `all`"
            ))),
        }
    }
}

impl fmt::Display for FeeSampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotate => f.write_str("rotate"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Convert an `estimatesmartfee` rate to sat/vB with three decimals.
pub fn sats_per_vbyte(btc_per_kvb: f64) -> f64 {
    precision3_decimals(btc_per_kvb * BTC_PER_KVB_TO_SAT_PER_VB)
}

// ==============================================================================
// Rotator
// ==============================================================================

/// Round-robin cursor over the confirmation targets plus the last rate seen
/// for each of them.
#[derive(Debug, Clone)]
pub struct FeeRotator {
    targets: Vec<u16>,
    last_index: Option<usize>,
    cached: Vec<Option<f64>>,
}

impl FeeRotator {
    pub fn targets(&self) -> &[u16] {
        &self.targets
    }

    /// Advance one step and return the target to sample this cycle.
    pub fn next_target(&mut self) -> u16 {
        let index = match self.last_index {
            None => 0,
            Some(i) => (i + 1) % self.targets.len(),
        };
        self.last_index = Some(index);
        self.targets[index]
    }

    /// Remember the rate (sat/vB) observed for `target`. `None` means the node
    /// had no estimate.
    pub fn record(&mut self, target: u16, rate: Option<f64>) -> Result<(), CoreError> {
        let index = self
            .targets
            .iter()
            .position(|t| *t == target)
            .ok_or_else(|| CoreError::InvalidData(format!("unexpected fee target {target}")))?;
        self.cached[index] = rate;
        Ok(())
    }

    /// Every configured target with its last known rate.
    pub fn rates(&self) -> BTreeMap<u16, Option<f64>> {
        self.targets
            .iter()
            .copied()
            .zip(self.cached.iter().copied())
            .collect()
    }
}

impl Default for FeeRotator {
    fn default() -> Self {
        Self {
            targets: FEE_TARGETS.to_vec(),
            last_index: None,
            cached: vec![None; FEE_TARGETS.len()],
        }
    }
}
