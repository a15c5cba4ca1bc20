//! Broadcast execution: dedupe planned operations against pending ones,
//! submit the rest sequentially, and prune pending records once anchored.

use tracing::{debug, info, warn};

use crate::chain::{PoxApi, TransactionSubmitter};
use crate::db::Store;
use crate::error::KeeperResult;
use crate::planner::{PendingTransaction, PlannedTransaction};

/// Whether an equivalent operation is already in flight.
///
/// The match key is the operation's identity: function name, stacker, pox
/// address and reward cycle, each equal or both absent. Amounts are not part
/// of the key; re-submission is keyed on what the operation is, not on its
/// payload.
pub fn was_already_broadcast(pending: &[PendingTransaction], plan: &PlannedTransaction) -> bool {
    pending.iter().any(|p| {
        p.function_name == plan.function_name()
            && p.stacker.as_deref() == plan.stacker()
            && p.pox_address.as_deref() == plan.pox_address()
            && p.reward_cycle == plan.reward_cycle()
    })
}

/// Drop pending records whose transaction is anchored or no longer known to
/// the API, returning the ones still in flight.
pub async fn prune_anchored(
    api: &dyn PoxApi,
    store: &Store,
) -> KeeperResult<Vec<PendingTransaction>> {
    let mut still_pending = Vec::new();
    for pending in store.load_pending().await? {
        let settled = match api.transaction_status(&pending.txid).await? {
            Some(status) => status.anchored,
            // Dropped from the mempool; forget it so it can be re-planned.
            None => true,
        };
        if settled {
            debug!(txid = %pending.txid, function = %pending.function_name, "pruning settled transaction");
            store.delete_pending(&pending.txid).await?;
        } else {
            still_pending.push(pending);
        }
    }
    Ok(still_pending)
}

/// Submit the planned transactions that are not already in flight.
///
/// The nonce is fetched once per pass and advanced only after a successful
/// submission; a failed submission is logged and skipped so one bad
/// operation cannot stall the rest.
pub async fn execute(
    api: &dyn PoxApi,
    submitter: &dyn TransactionSubmitter,
    store: &Store,
    operator: &str,
    plans: &[PlannedTransaction],
    pending: &[PendingTransaction],
) -> KeeperResult<usize> {
    if plans.is_empty() {
        return Ok(0);
    }
    let mut nonce = api.account_nonce(operator).await?;
    let mut submitted = 0usize;
    for plan in plans {
        if was_already_broadcast(pending, plan) {
            debug!(function = plan.function_name(), "operation already in flight, skipping");
            continue;
        }
        match submitter.submit(plan, nonce).await {
            Ok(Some(txid)) => {
                store.save_pending(&plan.to_pending(txid.clone())).await?;
                info!(function = plan.function_name(), %txid, nonce, "transaction submitted");
                nonce += 1;
                submitted += 1;
            }
            Ok(None) => {
                // Dry run: nothing was broadcast, nothing to record.
            }
            Err(e) => {
                warn!(function = plan.function_name(), error = %e, "submission failed, continuing");
            }
        }
    }
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::{PoxInfo, TxStatus};
    use crate::error::KeeperError;
    use crate::events::RawLogEntry;
    use crate::reward_index::RewardIndexEntry;

    struct StaticApi {
        nonce: u64,
        anchored: Vec<String>,
    }

    #[async_trait]
    impl PoxApi for StaticApi {
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
            _cycle: u64,
            _index: u64,
        ) -> KeeperResult<Option<RewardIndexEntry>> {
            Ok(None)
        }

        async fn transaction_status(&self, txid: &str) -> KeeperResult<Option<TxStatus>> {
            Ok(Some(TxStatus {
                anchored: self.anchored.iter().any(|t| t == txid),
            }))
        }

        async fn account_nonce(&self, _principal: &str) -> KeeperResult<u64> {
            Ok(self.nonce)
        }
    }

    /// Records submissions; fails on functions listed in `fail`.
    struct RecordingSubmitter {
        calls: Mutex<Vec<(String, u64)>>,
        fail: Vec<&'static str>,
    }

    impl RecordingSubmitter {
        fn new(fail: Vec<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl TransactionSubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            transaction: &PlannedTransaction,
            nonce: u64,
        ) -> KeeperResult<Option<String>> {
            let name = transaction.function_name();
            self.calls.lock().unwrap().push((name.to_string(), nonce));
            if self.fail.contains(&name) {
                return Err(KeeperError::Submission("rejected".into()));
            }
            Ok(Some(format!("0xtx-{nonce}")))
        }
    }

    fn commit_plan(cycle: u64) -> PlannedTransaction {
        PlannedTransaction::StackAggregationCommitIndexed {
            pox_address: "bc1qpool".to_string(),
            reward_cycle: cycle,
        }
    }

    fn extend_plan(stacker: &str) -> PlannedTransaction {
        PlannedTransaction::DelegateStackExtend {
            stacker: stacker.to_string(),
            pox_address: Some("bc1qpool".to_string()),
            extend_count: 2,
        }
    }

    #[test]
    fn dedupe_ignores_amounts_and_matches_absent_fields() {
        let pending = vec![PendingTransaction {
            txid: "0x01".to_string(),
            function_name: "stack-aggregation-commit-indexed".to_string(),
            stacker: None,
            pox_address: Some("bc1qpool".to_string()),
            reward_cycle: Some(8),
            reward_index: None,
        }];
        assert!(was_already_broadcast(&pending, &commit_plan(8)));
        assert!(!was_already_broadcast(&pending, &commit_plan(9)));
        assert!(!was_already_broadcast(&pending, &extend_plan("SPA")));
    }

    #[tokio::test]
    async fn submits_with_sequential_nonces_and_skips_failures() {
        let api = StaticApi {
            nonce: 7,
            anchored: Vec::new(),
        };
        let submitter = RecordingSubmitter::new(vec!["delegate-stack-extend"]);
        let store = Store::connect_in_memory().await.unwrap();

        let plans = vec![commit_plan(8), extend_plan("SPA"), commit_plan(9)];
        let submitted = execute(&api, &submitter, &store, "SPOP", &plans, &[])
            .await
            .unwrap();
        assert_eq!(submitted, 2);

        // The failed extend does not burn a nonce.
        let calls = submitter.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("stack-aggregation-commit-indexed".to_string(), 7),
                ("delegate-stack-extend".to_string(), 8),
                ("stack-aggregation-commit-indexed".to_string(), 8),
            ]
        );
        assert_eq!(store.load_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_plans_are_not_resubmitted() {
        let api = StaticApi {
            nonce: 0,
            anchored: Vec::new(),
        };
        let submitter = RecordingSubmitter::new(Vec::new());
        let store = Store::connect_in_memory().await.unwrap();

        let plans = vec![commit_plan(8)];
        let pending = vec![commit_plan(8).to_pending("0x01".to_string())];
        let submitted = execute(&api, &submitter, &store, "SPOP", &plans, &pending)
            .await
            .unwrap();
        assert_eq!(submitted, 0);
        assert!(submitter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn prunes_anchored_and_dropped_transactions() {
        let api = StaticApi {
            nonce: 0,
            anchored: vec!["0x01".to_string()],
        };
        let store = Store::connect_in_memory().await.unwrap();
        store
            .save_pending(&commit_plan(8).to_pending("0x01".to_string()))
            .await
            .unwrap();
        store
            .save_pending(&commit_plan(9).to_pending("0x02".to_string()))
            .await
            .unwrap();

        let remaining = prune_anchored(&api, &store).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].txid, "0x02");
        assert_eq!(store.load_pending().await.unwrap().len(), 1);
    }
}
