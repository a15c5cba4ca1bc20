//! Reconciliation planning: compares the projected pool state against what
//! the delegations ask for and emits the transactions still needed.

use serde::{Deserialize, Serialize};

use crate::state::PoolState;

/// One not-yet-submitted pool operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlannedTransaction {
    DelegateStackStx {
        stacker: String,
        amount_ustx: u128,
        current_block: u64,
        pox_address: Option<String>,
        max_cycles: u64,
    },
    DelegateStackExtend {
        stacker: String,
        pox_address: Option<String>,
        extend_count: u64,
    },
    DelegateStackIncrease {
        stacker: String,
        pox_address: Option<String>,
        increase_by: u128,
    },
    StackAggregationCommitIndexed {
        pox_address: String,
        reward_cycle: u64,
    },
    StackAggregationIncrease {
        pox_address: String,
        reward_cycle: u64,
        reward_index: Option<u64>,
        committed_ustx: u128,
        total_ustx: u128,
    },
}

/// A submitted-but-unconfirmed operation, persisted across passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub txid: String,
    pub function_name: String,
    pub stacker: Option<String>,
    pub pox_address: Option<String>,
    pub reward_cycle: Option<u64>,
    pub reward_index: Option<u64>,
}

impl PlannedTransaction {
    pub fn function_name(&self) -> &'static str {
        match self {
            PlannedTransaction::DelegateStackStx { .. } => "delegate-stack-stx",
            PlannedTransaction::DelegateStackExtend { .. } => "delegate-stack-extend",
            PlannedTransaction::DelegateStackIncrease { .. } => "delegate-stack-increase",
            PlannedTransaction::StackAggregationCommitIndexed { .. } => {
                "stack-aggregation-commit-indexed"
            }
            PlannedTransaction::StackAggregationIncrease { .. } => "stack-aggregation-increase",
        }
    }

    pub fn stacker(&self) -> Option<&str> {
        match self {
            PlannedTransaction::DelegateStackStx { stacker, .. }
            | PlannedTransaction::DelegateStackExtend { stacker, .. }
            | PlannedTransaction::DelegateStackIncrease { stacker, .. } => Some(stacker),
            _ => None,
        }
    }

    pub fn pox_address(&self) -> Option<&str> {
        match self {
            PlannedTransaction::DelegateStackStx { pox_address, .. }
            | PlannedTransaction::DelegateStackExtend { pox_address, .. }
            | PlannedTransaction::DelegateStackIncrease { pox_address, .. } => {
                pox_address.as_deref()
            }
            PlannedTransaction::StackAggregationCommitIndexed { pox_address, .. }
            | PlannedTransaction::StackAggregationIncrease { pox_address, .. } => {
                Some(pox_address)
            }
        }
    }

    pub fn reward_cycle(&self) -> Option<u64> {
        match self {
            PlannedTransaction::StackAggregationCommitIndexed { reward_cycle, .. }
            | PlannedTransaction::StackAggregationIncrease { reward_cycle, .. } => {
                Some(*reward_cycle)
            }
            _ => None,
        }
    }

    pub fn to_pending(&self, txid: String) -> PendingTransaction {
        let reward_index = match self {
            PlannedTransaction::StackAggregationIncrease { reward_index, .. } => *reward_index,
            _ => None,
        };
        PendingTransaction {
            txid,
            function_name: self.function_name().to_string(),
            stacker: self.stacker().map(str::to_string),
            pox_address: self.pox_address().map(str::to_string),
            reward_cycle: self.reward_cycle(),
            reward_index,
        }
    }
}

/// The operator's horizon setting, bounded to the protocol maximum.
pub fn clamp_horizon(max_cycles: u64) -> u64 {
    max_cycles.clamp(1, 12)
}

/// Drop entries the current cycle has made irrelevant.
///
/// Expired delegations are removed outright; accepted and committed segment
/// lists keep only segments still covering a future cycle.
pub fn prune_expired(state: &mut PoolState, current_cycle: u64) {
    state
        .delegations
        .retain(|_, d| d.end_cycle.map_or(true, |end| end > current_cycle));
    state.accepted.retain(|_, segments| {
        segments.retain(|s| s.end_cycle > current_cycle);
        !segments.is_empty()
    });
    state.committed.retain(|_, segments| {
        segments.retain(|s| s.end_cycle > current_cycle);
        !segments.is_empty()
    });
}

/// Compute the ordered list of transactions needed to reconcile the pool
/// state with its delegations over the planning horizon.
pub fn plan_transactions(
    state: &PoolState,
    current_cycle: u64,
    current_block: u64,
    horizon: u64,
    pool_btc_address: &str,
) -> Vec<PlannedTransaction> {
    let horizon = clamp_horizon(horizon);
    let cc = current_cycle as i128;
    let h = horizon as i128;
    let mut plans = Vec::new();

    // 1. Accept delegations the pool has not locked yet.
    for (stacker, delegation) in &state.delegations {
        if state.accepted.contains_key(stacker) {
            continue;
        }
        // Only delegations directed at the pool's own reward address.
        if delegation
            .pox_address
            .as_deref()
            .is_some_and(|addr| addr != pool_btc_address)
        {
            continue;
        }
        let desired = delegation
            .end_cycle
            .map_or(h, |end| end as i128 - cc - 1);
        let max_cycles = desired.min(h);
        if max_cycles > 0 {
            plans.push(PlannedTransaction::DelegateStackStx {
                stacker: stacker.clone(),
                amount_ustx: delegation.amount_ustx,
                current_block,
                pox_address: delegation.pox_address.clone(),
                max_cycles: max_cycles as u64,
            });
        }
    }

    // 2 & 3. Extend, then top up, segments that fall short of the delegation.
    for (stacker, delegation) in &state.delegations {
        let Some(last) = state.accepted.get(stacker).and_then(|s| s.last()) else {
            continue;
        };

        // The last cycle before a boundary is spent in the prepare phase, so
        // plan one cycle short of the horizon unless it is already maximal.
        let offset: i128 = if horizon == 12 { 0 } else { 1 };
        let last_end = last.end_cycle as i128;
        let within_horizon = h - (last_end - cc - offset);
        let delegation_remaining = delegation
            .end_cycle
            .map_or(h, |end| end as i128 - cc - 1);
        let until_delegation_end = delegation
            .end_cycle
            .map_or(h, |end| end as i128 - last_end);
        let max_extend = within_horizon
            .min(delegation_remaining)
            .min(until_delegation_end);
        if max_extend > 0 && last.amount_ustx <= delegation.amount_ustx {
            plans.push(PlannedTransaction::DelegateStackExtend {
                stacker: stacker.clone(),
                pox_address: last.pox_address.clone(),
                extend_count: max_extend as u64,
            });
        }

        if delegation.amount_ustx > last.amount_ustx {
            plans.push(PlannedTransaction::DelegateStackIncrease {
                stacker: stacker.clone(),
                pox_address: last.pox_address.clone(),
                increase_by: delegation.amount_ustx - last.amount_ustx,
            });
        }
    }

    // 4. Commit every uncovered cycle in the accepted span.
    let pool_segments: Vec<_> = state
        .accepted
        .values()
        .flatten()
        .filter(|s| s.pox_address.as_deref().unwrap_or(pool_btc_address) == pool_btc_address)
        .collect();
    if let (Some(min_start), Some(max_end)) = (
        pool_segments.iter().map(|s| s.start_cycle).min(),
        pool_segments.iter().map(|s| s.end_cycle).max(),
    ) {
        let committed_cycles: Vec<u64> = state
            .committed
            .get(pool_btc_address)
            .map(|segments| segments.iter().map(|s| s.start_cycle).collect())
            .unwrap_or_default();
        let span_start = (current_cycle + 1).max(min_start);
        let span_end = (current_cycle + horizon + 1).min(max_end);
        for cycle in span_start..span_end {
            if !committed_cycles.contains(&cycle) {
                plans.push(PlannedTransaction::StackAggregationCommitIndexed {
                    pox_address: pool_btc_address.to_string(),
                    reward_cycle: cycle,
                });
            }
        }
    }

    // 5. Top up commitments that lag behind the accepted total.
    if let Some(committed) = state.committed.get(pool_btc_address) {
        for segment in committed {
            let cycle = segment.start_cycle;
            if cycle > current_cycle + horizon {
                continue;
            }
            let true_total: u128 = pool_segments
                .iter()
                .filter(|s| s.start_cycle <= cycle && cycle < s.end_cycle)
                .map(|s| s.amount_ustx)
                .sum();
            if segment.amount_ustx < true_total {
                plans.push(PlannedTransaction::StackAggregationIncrease {
                    pox_address: pool_btc_address.to_string(),
                    reward_cycle: cycle,
                    reward_index: segment.reward_index,
                    committed_ustx: segment.amount_ustx,
                    total_ustx: true_total,
                });
            }
        }
    }

    plans
}
