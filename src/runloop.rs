//! The keeper's reconciliation loop: one full pass per iteration, with a
//! fixed delay in between. Recoverable failures are logged and the loop
//! keeps going.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::broadcast::{execute, prune_anchored};
use crate::chain::{PoxApi, TransactionSubmitter};
use crate::config::KeeperConfig;
use crate::db::Store;
use crate::error::KeeperResult;
use crate::events::extract_events;
use crate::ledger::{pool_events, sync_ledger};
use crate::planner::{plan_transactions, prune_expired};
use crate::reward_index::sync_reward_indexes;
use crate::state::project;

/// What a single reconciliation pass did.
#[derive(Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The chain is in (or about to enter) the prepare phase; commitments
    /// for the next cycle would no longer land, so the pass is skipped.
    PreparePhase,
    Completed { planned: usize, submitted: usize },
}

pub struct Keeper {
    config: KeeperConfig,
    api: Arc<dyn PoxApi>,
    submitter: Arc<dyn TransactionSubmitter>,
    store: Store,
}

impl Keeper {
    pub fn new(
        config: KeeperConfig,
        api: Arc<dyn PoxApi>,
        submitter: Arc<dyn TransactionSubmitter>,
        store: Store,
    ) -> Self {
        Self {
            config,
            api,
            submitter,
            store,
        }
    }

    /// Run reconciliation passes forever.
    pub async fn run(&self) {
        let delay = Duration::from_secs(self.config.loop_delay_secs);
        loop {
            match self.run_pass().await {
                Ok(PassOutcome::PreparePhase) => {
                    info!("in prepare phase, skipping pass");
                }
                Ok(PassOutcome::Completed { planned, submitted }) => {
                    info!(planned, submitted, "reconciliation pass completed");
                }
                Err(e) => {
                    error!(error = %e, "reconciliation pass failed");
                }
            }
            sleep(delay).await;
        }
    }

    /// One full reconciliation pass.
    pub async fn run_pass(&self) -> KeeperResult<PassOutcome> {
        let api = self.api.as_ref();
        let pox_info = api.pox_info().await?;
        if pox_info.blocks_until_prepare_phase <= 0 {
            return Ok(PassOutcome::PreparePhase);
        }

        // Settle last pass's submissions before planning new ones.
        let pending = prune_anchored(api, &self.store).await?;

        let operator = &self.config.pool_operator;
        let ledger =
            sync_ledger(api, &self.store, operator, self.config.page_limit).await?;
        let filtered = pool_events(&ledger, self.config.network.pox_contract_id(), operator);
        let events = extract_events(&filtered, self.config.network.is_mainnet());

        let reward_indexes = sync_reward_indexes(
            api,
            &self.store,
            pox_info.current_cycle,
            self.config.max_cycles_for_operations,
            self.config.network.first_pox_cycle(),
        )
        .await?;

        let mut state = project(&events, &reward_indexes);
        info!(
            cycle = pox_info.current_cycle,
            delegations = state.delegations.len(),
            accepted = state.accepted.len(),
            committed = state.committed.values().map(Vec::len).sum::<usize>(),
            pending = pending.len(),
            "state projected"
        );
        self.store.replace_snapshot(&state).await?;

        prune_expired(&mut state, pox_info.current_cycle);
        let plans = plan_transactions(
            &state,
            pox_info.current_cycle,
            pox_info.current_block,
            self.config.max_cycles_for_operations,
            &self.config.pool_btc_address,
        );

        let submitted = execute(
            api,
            self.submitter.as_ref(),
            &self.store,
            operator,
            &plans,
            &pending,
        )
        .await?;

        Ok(PassOutcome::Completed {
            planned: plans.len(),
            submitted,
        })
    }
}
