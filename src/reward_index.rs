//! Incremental cache of on-chain reward-set slots.
//!
//! The reward set for a cycle is only discoverable by probing the contract
//! map at `(cycle, index)` for increasing indexes until a probe comes back
//! absent. Probed cycles are cached durably so later runs resume where the
//! last one stopped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::PoxApi;
use crate::db::Store;
use crate::error::KeeperResult;
use crate::planner::clamp_horizon;

/// Read-only mirror of one on-chain reward-set slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardIndexEntry {
    pub cycle: u64,
    pub reward_index: u64,
    pub pox_address: String,
    /// Signer public key, `0x`-prefixed lowercase hex.
    pub signer: String,
    /// Present for solo-stacked slots; aggregate slots carry none.
    pub stacker: Option<String>,
    pub total_ustx: u128,
}

/// Per-cycle reward-set entries, ordered by slot index.
pub type RewardIndexMap = BTreeMap<u64, Vec<RewardIndexEntry>>;

/// Bring the cache up to date and return the union of cached and fresh
/// entries.
///
/// A cached cycle beyond `current_cycle` means an earlier run scanned with a
/// larger horizon than is configured now; the cache is discarded and the
/// scan restarts from the first supported cycle. Only newly probed cycles
/// are persisted.
pub async fn sync_reward_indexes(
    api: &dyn PoxApi,
    store: &Store,
    current_cycle: u64,
    horizon: u64,
    first_cycle: u64,
) -> KeeperResult<RewardIndexMap> {
    let horizon = clamp_horizon(horizon);
    let mut cached = store.load_reward_indexes().await?;

    let start_cycle = match cached.keys().max().copied() {
        Some(max) if max > current_cycle => {
            info!(
                max_cached_cycle = max,
                current_cycle, "cached reward indexes ahead of chain, rescanning"
            );
            store.clear_reward_indexes().await?;
            cached.clear();
            first_cycle
        }
        Some(max) => max + 1,
        None => first_cycle,
    };

    let mut fresh = RewardIndexMap::new();
    let mut cycle = start_cycle;
    loop {
        let mut index = 0u64;
        while let Some(entry) = api.reward_index_entry(cycle, index).await? {
            fresh.entry(cycle).or_default().push(entry);
            index += 1;
        }
        debug!(cycle, slots = index, "probed reward set");
        // An empty cycle past the planning horizon ends the scan.
        if index == 0 && cycle > current_cycle + horizon {
            break;
        }
        cycle += 1;
    }

    for (cycle, entries) in &fresh {
        store.save_reward_indexes(*cycle, entries).await?;
    }
    cached.extend(fresh);
    Ok(cached)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::{PoxInfo, TxStatus};
    use crate::events::RawLogEntry;

    struct MapApi {
        slots: HashMap<(u64, u64), RewardIndexEntry>,
    }

    fn slot(cycle: u64, index: u64, total: u128) -> RewardIndexEntry {
        RewardIndexEntry {
            cycle,
            reward_index: index,
            pox_address: "bc1qpool".to_string(),
            signer: "0xsigner".to_string(),
            stacker: None,
            total_ustx: total,
        }
    }

    #[async_trait]
    impl PoxApi for MapApi {
        async fn events_page(
            &self,
            _address: &str,
            _limit: u64,
            _offset: u64,
        ) -> KeeperResult<Vec<RawLogEntry>> {
            Ok(Vec::new())
        }

        async fn pox_info(&self) -> KeeperResult<PoxInfo> {
            unimplemented!()
        }

        async fn reward_index_entry(
            &self,
            cycle: u64,
            index: u64,
        ) -> KeeperResult<Option<RewardIndexEntry>> {
            Ok(self.slots.get(&(cycle, index)).cloned())
        }

        async fn transaction_status(&self, _txid: &str) -> KeeperResult<Option<TxStatus>> {
            Ok(None)
        }

        async fn account_nonce(&self, _principal: &str) -> KeeperResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn probes_until_horizon_and_persists() {
        let mut slots = HashMap::new();
        slots.insert((1, 0), slot(1, 0, 100));
        slots.insert((1, 1), slot(1, 1, 200));
        slots.insert((2, 0), slot(2, 0, 300));
        let api = MapApi { slots };
        let store = Store::connect_in_memory().await.unwrap();

        let map = sync_reward_indexes(&api, &store, 2, 2, 1).await.unwrap();
        assert_eq!(map[&1].len(), 2);
        assert_eq!(map[&2].len(), 1);
        assert!(!map.contains_key(&3));

        // A later run resumes past the cached cycles.
        let persisted = store.load_reward_indexes().await.unwrap();
        assert_eq!(persisted.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn discards_cache_ahead_of_chain() {
        let mut slots = HashMap::new();
        slots.insert((1, 0), slot(1, 0, 100));
        let api = MapApi { slots };
        let store = Store::connect_in_memory().await.unwrap();
        // Simulate a previous run with a larger horizon.
        store.save_reward_indexes(9, &[slot(9, 0, 500)]).await.unwrap();

        let map = sync_reward_indexes(&api, &store, 2, 1, 1).await.unwrap();
        assert!(!map.contains_key(&9));
        assert_eq!(map[&1].len(), 1);
    }
}
