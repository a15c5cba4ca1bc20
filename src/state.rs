//! Event-sourced projection of the pool's delegation state.
//!
//! A strict left fold over the chronological domain-event sequence produces
//! four maps. The fold is pure and deterministic: replaying the same log
//! always yields the same maps, which is what lets every pass rebuild them
//! from scratch instead of patching stored state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::DomainEvent;
use crate::reward_index::RewardIndexMap;

/// A stacker's standing intent, at most one live entry per stacker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub start_cycle: u64,
    pub end_cycle: Option<u64>,
    pub pox_address: Option<String>,
    pub amount_ustx: u128,
}

/// A pool-side lock commitment already placed for a stacker.
///
/// Segments for one stacker are contiguous, non-overlapping and ordered by
/// `start_cycle`; `end_cycle` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedSegment {
    pub start_cycle: u64,
    pub end_cycle: u64,
    pub pox_address: Option<String>,
    pub amount_ustx: u128,
}

/// The pool's on-chain aggregate commitment for one reward cycle.
///
/// `end_cycle` is always `start_cycle + 1`; `reward_index` stays unresolved
/// until a matching reward-set slot is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSegment {
    pub start_cycle: u64,
    pub end_cycle: u64,
    pub amount_ustx: u128,
    pub reward_index: Option<u64>,
}

/// The four projection maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Active delegations, keyed by stacker.
    pub delegations: BTreeMap<String, Delegation>,
    /// Accepted lock segments, keyed by stacker.
    pub accepted: BTreeMap<String, Vec<AcceptedSegment>>,
    /// Aggregate commitments, keyed by pool BTC address.
    pub committed: BTreeMap<String, Vec<CommittedSegment>>,
    /// Archived delegations, keyed by stacker, append-only.
    pub previous: BTreeMap<String, Vec<Delegation>>,
}

/// Fold the chronological event sequence into the four maps.
pub fn project(events: &[DomainEvent], reward_indexes: &RewardIndexMap) -> PoolState {
    let mut state = PoolState::default();
    for event in events {
        apply(&mut state, event, reward_indexes);
    }
    state
}

fn apply(state: &mut PoolState, event: &DomainEvent, reward_indexes: &RewardIndexMap) {
    match event {
        DomainEvent::DelegateStx {
            stacker,
            amount_ustx,
            start_cycle,
            end_cycle,
            pox_address,
        } => {
            state.delegations.insert(
                stacker.clone(),
                Delegation {
                    start_cycle: *start_cycle,
                    end_cycle: *end_cycle,
                    pox_address: pox_address.clone(),
                    amount_ustx: *amount_ustx,
                },
            );
        }

        DomainEvent::RevokeDelegateStx { stacker } => {
            // Tolerates replays: revoking an unknown stacker is a no-op.
            if let Some(delegation) = state.delegations.remove(stacker) {
                state
                    .previous
                    .entry(stacker.clone())
                    .or_default()
                    .push(delegation);
            }
        }

        DomainEvent::DelegateStackStx {
            stacker,
            amount_ustx,
            start_cycle,
            end_cycle,
            pox_address,
        } => {
            // A fresh stack action replaces the whole segment list.
            state.accepted.insert(
                stacker.clone(),
                vec![AcceptedSegment {
                    start_cycle: *start_cycle,
                    end_cycle: *end_cycle,
                    pox_address: pox_address.clone(),
                    amount_ustx: *amount_ustx,
                }],
            );
        }

        DomainEvent::DelegateStackExtend { stacker, end_cycle } => {
            if let Some(last) = state
                .accepted
                .get_mut(stacker)
                .and_then(|segments| segments.last_mut())
            {
                last.end_cycle = *end_cycle;
            }
        }

        DomainEvent::DelegateStackIncrease {
            stacker,
            start_cycle,
            increase_by,
            total_locked,
        } => {
            let Some(segments) = state.accepted.get_mut(stacker) else {
                return;
            };
            let Some(last) = segments.last_mut() else {
                return;
            };
            // Ignore increases whose arithmetic does not reconcile,
            // overflow included.
            let Some(new_amount) = last.amount_ustx.checked_add(*increase_by) else {
                return;
            };
            if new_amount != *total_locked {
                return;
            }
            if last.start_cycle == *start_cycle {
                last.amount_ustx = new_amount;
            } else {
                // The increase landed after an extend shifted the window:
                // split the segment at the increase's start cycle.
                let split = AcceptedSegment {
                    start_cycle: *start_cycle,
                    end_cycle: last.end_cycle,
                    pox_address: last.pox_address.clone(),
                    amount_ustx: new_amount,
                };
                last.end_cycle = *start_cycle;
                segments.push(split);
            }
        }

        DomainEvent::StackAggregationCommit {
            cycle,
            amount_ustx,
            signer_key,
            pox_address,
            indexed,
        } => {
            let Some(address) = pox_address else {
                return;
            };
            let reward_index = if *indexed {
                resolve_reward_index(
                    reward_indexes,
                    *cycle,
                    address,
                    signer_key.as_deref(),
                    *amount_ustx,
                )
            } else {
                None
            };
            state
                .committed
                .entry(address.clone())
                .or_default()
                .push(CommittedSegment {
                    start_cycle: *cycle,
                    end_cycle: cycle + 1,
                    amount_ustx: *amount_ustx,
                    reward_index,
                });
        }

        DomainEvent::StackAggregationIncrease {
            cycle,
            amount_ustx,
            signer_key,
            pox_address,
        } => {
            let Some(address) = pox_address else {
                return;
            };
            let Some(segments) = state.committed.get_mut(address) else {
                return;
            };
            if let Some(segment) = segments.iter_mut().find(|s| s.start_cycle == *cycle) {
                segment.amount_ustx += amount_ustx;
                segment.reward_index = resolve_reward_index(
                    reward_indexes,
                    *cycle,
                    address,
                    signer_key.as_deref(),
                    segment.amount_ustx,
                );
            }
        }
    }
}

/// Find the reward-set slot of an aggregate commitment.
///
/// Matches on pox address, absent stacker (aggregate slots only) and exact
/// total; the signer key is matched when the event carried one.
fn resolve_reward_index(
    reward_indexes: &RewardIndexMap,
    cycle: u64,
    pox_address: &str,
    signer_key: Option<&str>,
    total_ustx: u128,
) -> Option<u64> {
    let entries = reward_indexes.get(&cycle)?;
    entries
        .iter()
        .find(|entry| {
            entry.pox_address == pox_address
                && entry.stacker.is_none()
                && entry.total_ustx == total_ustx
                && signer_key.map_or(true, |key| entry.signer == key)
        })
        .map(|entry| entry.reward_index)
}
