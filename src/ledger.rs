//! Durable cache of the raw contract-log ledger.
//!
//! The events endpoint serves pages newest first. Synchronization walks
//! pages until it either runs out or reaches an entry structurally equal to
//! the newest cached one, reverses the fresh prefix to chronological order
//! and appends it. The full unfiltered ledger is persisted so future runs
//! can still match against true history.

use tracing::debug;

use crate::chain::PoxApi;
use crate::db::Store;
use crate::error::KeeperResult;
use crate::events::RawLogEntry;

/// Bring the cached ledger up to date and return it in full, oldest first.
pub async fn sync_ledger(
    api: &dyn PoxApi,
    store: &Store,
    operator: &str,
    page_limit: u64,
) -> KeeperResult<Vec<RawLogEntry>> {
    let mut ledger = store.load_ledger().await?;
    let newest_cached = ledger.last().cloned();

    let mut fresh = Vec::new();
    let mut offset = 0u64;
    'pages: loop {
        let page = api.events_page(operator, page_limit, offset).await?;
        if page.is_empty() {
            break;
        }
        for entry in page {
            // Full structural comparison, not just id, to tolerate backend
            // reordering of same-transaction events.
            if newest_cached.as_ref() == Some(&entry) {
                break 'pages;
            }
            fresh.push(entry);
        }
        offset += page_limit;
    }

    fresh.reverse();
    debug!(new_entries = fresh.len(), total = ledger.len() + fresh.len(), "ledger synced");
    store.append_ledger(&fresh).await?;
    ledger.extend(fresh);
    Ok(ledger)
}

/// Narrow the ledger to entries of the pool's PoX contract that mention the
/// operator principal. A cheap text pre-filter before full parsing.
pub fn pool_events<'a>(
    ledger: &'a [RawLogEntry],
    contract_id: &str,
    operator: &str,
) -> Vec<&'a RawLogEntry> {
    ledger
        .iter()
        .filter(|entry| {
            entry.contract_id.as_deref() == Some(contract_id)
                && entry.repr.as_deref().is_some_and(|repr| repr.contains(operator))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::chain::{PoxInfo, TxStatus};
    use crate::error::KeeperResult;
    use crate::reward_index::RewardIndexEntry;

    struct PagedApi {
        /// Newest-first event stream, pre-paginated by offset.
        stream: Vec<RawLogEntry>,
    }

    #[async_trait]
    impl PoxApi for PagedApi {
        async fn events_page(
            &self,
            _address: &str,
            limit: u64,
            offset: u64,
        ) -> KeeperResult<Vec<RawLogEntry>> {
            let start = (offset as usize).min(self.stream.len());
            let end = (start + limit as usize).min(self.stream.len());
            Ok(self.stream[start..end].to_vec())
        }

        async fn pox_info(&self) -> KeeperResult<PoxInfo> {
            unimplemented!()
        }

        async fn reward_index_entry(
            &self,
            _cycle: u64,
            _index: u64,
        ) -> KeeperResult<Option<RewardIndexEntry>> {
            Ok(None)
        }

        async fn transaction_status(&self, _txid: &str) -> KeeperResult<Option<TxStatus>> {
            Ok(None)
        }

        async fn account_nonce(&self, _principal: &str) -> KeeperResult<u64> {
            Ok(0)
        }
    }

    fn entry(tx_id: &str) -> RawLogEntry {
        RawLogEntry {
            event_index: 0,
            event_type: "smart_contract_log".to_string(),
            tx_id: tx_id.to_string(),
            contract_id: Some("SP000000000000000000002Q6VF78.pox-4".to_string()),
            topic: Some("print".to_string()),
            hex: None,
            repr: Some("(tuple (name \"x\") (stacker 'SPOP))".to_string()),
        }
    }

    #[tokio::test]
    async fn initial_sync_reverses_to_chronological() {
        let api = PagedApi {
            stream: vec![entry("0x03"), entry("0x02"), entry("0x01")],
        };
        let store = Store::connect_in_memory().await.unwrap();
        let ledger = sync_ledger(&api, &store, "SPOP", 2).await.unwrap();
        let ids: Vec<_> = ledger.iter().map(|e| e.tx_id.as_str()).collect();
        assert_eq!(ids, vec!["0x01", "0x02", "0x03"]);
    }

    #[tokio::test]
    async fn incremental_sync_stops_at_cached_entry() {
        let store = Store::connect_in_memory().await.unwrap();
        store
            .append_ledger(&[entry("0x01"), entry("0x02")])
            .await
            .unwrap();

        let api = PagedApi {
            stream: vec![entry("0x04"), entry("0x03"), entry("0x02"), entry("0x01")],
        };
        let ledger = sync_ledger(&api, &store, "SPOP", 2).await.unwrap();
        let ids: Vec<_> = ledger.iter().map(|e| e.tx_id.as_str()).collect();
        assert_eq!(ids, vec!["0x01", "0x02", "0x03", "0x04"]);

        // And the appended entries are durable.
        assert_eq!(store.load_ledger().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn sync_with_no_new_entries_is_stable() {
        let store = Store::connect_in_memory().await.unwrap();
        store.append_ledger(&[entry("0x01")]).await.unwrap();
        let api = PagedApi {
            stream: vec![entry("0x01")],
        };
        let ledger = sync_ledger(&api, &store, "SPOP", 100).await.unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn filters_to_pool_contract_and_operator() {
        let relevant = entry("0x01");
        let mut other_contract = entry("0x02");
        other_contract.contract_id = Some("SP000000000000000000002Q6VF78.other".to_string());
        let mut other_operator = entry("0x03");
        other_operator.repr = Some("(tuple (stacker 'SPELSE))".to_string());

        let ledger = vec![relevant.clone(), other_contract, other_operator];
        let filtered = pool_events(&ledger, "SP000000000000000000002Q6VF78.pox-4", "SPOP");
        assert_eq!(filtered, vec![&relevant]);
    }
}
