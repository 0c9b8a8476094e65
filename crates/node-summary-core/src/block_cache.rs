use std::num::NonZeroUsize;

use bitcoin::BlockHash;
use lru::LruCache;

/// Number of blocks kept across refresh cycles. Only three are needed (best
/// block and the two difficulty epoch boundaries); the slack absorbs reorgs.
pub const BLOCK_CACHE_CAPACITY: usize = 9;

// ==============================================================================
// Block Metadata
// ==============================================================================

/// The parts of a block the difficulty-adjustment math needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockMeta {
    /// Header timestamp, seconds since the Unix epoch.
    pub time: i64,
    pub difficulty: f64,
    pub height: u64,
}

/// Heights that must survive eviction: the first block of the current
/// difficulty epoch and the last block of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedHeights {
    pub epoch_start: u64,
    pub prev_epoch_end: u64,
}

impl PinnedHeights {
    fn contains(self, height: u64) -> bool {
        height == self.epoch_start || height == self.prev_epoch_end
    }
}

// ==============================================================================
// Cache
// ==============================================================================

/// Bounded block-hash → [`BlockMeta`] map with boundary pinning.
///
/// Entries are only ever read with `peek`, so the LRU order of the backing
/// cache is plain insertion order. When full, the victim is chosen in this
/// order:
/// 1. a pinned entry at the incoming block's height (reorg replacement)
/// 2. the oldest entry at an unpinned height
/// 3. the oldest entry
pub struct BlockMetaCache {
    entries: LruCache<BlockHash, BlockMeta>,
}

impl BlockMetaCache {
    pub fn new() -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(BLOCK_CACHE_CAPACITY).expect("BLOCK_CACHE_CAPACITY is non-zero"),
            ),
        }
    }

    pub fn get(&self, hash: &BlockHash) -> Option<BlockMeta> {
        self.entries.peek(hash).copied()
    }

    pub fn put(&mut self, hash: BlockHash, meta: BlockMeta, pinned: PinnedHeights) {
        if let Some(existing) = self.entries.peek_mut(&hash) {
            *existing = meta;
            return;
        }

        if self.entries.len() >= self.entries.cap().get() {
            if let Some(victim) = self.pick_victim(meta.height, pinned) {
                tracing::trace!(block.hash = %victim, "evicting cached block");
                self.entries.pop(&victim);
            }
        }
        self.entries.put(hash, meta);
    }

    fn pick_victim(&self, incoming_height: u64, pinned: PinnedHeights) -> Option<BlockHash> {
        // `iter` yields the most recent entry first.
        let oldest_first = || self.entries.iter().rev();
        let reorged = pinned
            .contains(incoming_height)
            .then(|| oldest_first().find(|(_, meta)| meta.height == incoming_height))
            .flatten();
        reorged
            .or_else(|| oldest_first().find(|(_, meta)| !pinned.contains(meta.height)))
            .or_else(|| oldest_first().next())
            .map(|(hash, _)| *hash)
    }
}

impl Default for BlockMetaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::hash_for_height;
    use bitcoin::hashes::Hash;

    const PINNED: PinnedHeights = PinnedHeights {
        epoch_start: 2016,
        prev_epoch_end: 2015,
    };

    fn meta(height: u64) -> BlockMeta {
        BlockMeta {
            time: 1_700_000_000 + height as i64 * 600,
            difficulty: 1.0,
            height,
        }
    }

    fn reorged_hash(height: u64) -> BlockHash {
        let mut bytes = hash_for_height(height).to_byte_array();
        bytes[30] = 0xee;
        BlockHash::from_byte_array(bytes)
    }

    fn filled_cache() -> BlockMetaCache {
        let mut cache = BlockMetaCache::new();
        cache.put(hash_for_height(2015), meta(2015), PINNED);
        cache.put(hash_for_height(2016), meta(2016), PINNED);
        for height in 3000..3007 {
            cache.put(hash_for_height(height), meta(height), PINNED);
        }
        assert_eq!(cache.entries.len(), BLOCK_CACHE_CAPACITY);
        cache
    }

    #[test]
    fn evicts_oldest_unpinned_entry() {
        let mut cache = filled_cache();
        cache.put(hash_for_height(3007), meta(3007), PINNED);

        assert_eq!(cache.entries.len(), BLOCK_CACHE_CAPACITY);
        assert!(cache.entries.contains(&hash_for_height(2015)));
        assert!(cache.entries.contains(&hash_for_height(2016)));
        assert!(!cache.entries.contains(&hash_for_height(3000)));
        assert!(cache.entries.contains(&hash_for_height(3007)));
    }

    #[test]
    fn pinned_entries_survive_many_insertions() {
        let mut cache = filled_cache();
        for height in 4000..4100 {
            cache.put(hash_for_height(height), meta(height), PINNED);
            assert!(cache.entries.len() <= BLOCK_CACHE_CAPACITY);
        }
        assert!(cache.entries.contains(&hash_for_height(2015)));
        assert!(cache.entries.contains(&hash_for_height(2016)));
    }

    #[test]
    fn reorg_at_pinned_height_replaces_that_entry() {
        let mut cache = filled_cache();
        let replacement = reorged_hash(2016);
        cache.put(replacement, meta(2016), PINNED);

        assert_eq!(cache.entries.len(), BLOCK_CACHE_CAPACITY);
        assert!(!cache.entries.contains(&hash_for_height(2016)));
        assert!(cache.entries.contains(&hash_for_height(2015)));
        assert!(cache.entries.contains(&hash_for_height(3000)));
        assert_eq!(cache.get(&replacement), Some(meta(2016)));
    }

    #[test]
    fn old_boundaries_become_evictable_after_retarget() {
        let mut cache = filled_cache();
        let next = PinnedHeights {
            epoch_start: 4032,
            prev_epoch_end: 4031,
        };
        cache.put(hash_for_height(4031), meta(4031), next);
        assert!(!cache.entries.contains(&hash_for_height(2015)));
        cache.put(hash_for_height(4032), meta(4032), next);
        assert!(!cache.entries.contains(&hash_for_height(2016)));
    }

    #[test]
    fn all_pinned_cache_still_respects_capacity() {
        let mut cache = BlockMetaCache::new();
        for i in 0..BLOCK_CACHE_CAPACITY as u64 {
            let height = if i % 2 == 0 { 2015 } else { 2016 };
            let mut bytes = [0u8; 32];
            bytes[0] = i as u8;
            cache.put(BlockHash::from_byte_array(bytes), meta(height), PINNED);
        }
        cache.put(hash_for_height(5000), meta(5000), PINNED);
        assert_eq!(cache.entries.len(), BLOCK_CACHE_CAPACITY);
        assert!(cache.entries.contains(&hash_for_height(5000)));
    }

    #[test]
    fn re_put_updates_in_place() {
        let mut cache = filled_cache();
        let updated = BlockMeta {
            difficulty: 2.0,
            ..meta(3003)
        };
        cache.put(hash_for_height(3003), updated, PINNED);
        assert_eq!(cache.entries.len(), BLOCK_CACHE_CAPACITY);
        assert!(cache.entries.contains(&hash_for_height(3000)));
        assert_eq!(cache.get(&hash_for_height(3003)), Some(updated));
    }
}
