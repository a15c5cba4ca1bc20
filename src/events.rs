//! Raw contract-log entries and their classification into domain events.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clarity::{parse_repr, pox_to_btc_address, ReprValue};

/// One row of the chain's contract event log, as cached in the ledger.
///
/// Identity is `(tx_id, event_index)`, but ledger synchronization compares
/// entries by full structural equality to tolerate backend reordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEntry {
    pub event_index: u64,
    pub event_type: String,
    pub tx_id: String,
    pub contract_id: Option<String>,
    pub topic: Option<String>,
    pub hex: Option<String>,
    pub repr: Option<String>,
}

/// A pool-relevant contract event, decoded and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    DelegateStx {
        stacker: String,
        amount_ustx: u128,
        start_cycle: u64,
        end_cycle: Option<u64>,
        pox_address: Option<String>,
    },
    RevokeDelegateStx {
        stacker: String,
    },
    DelegateStackStx {
        stacker: String,
        amount_ustx: u128,
        start_cycle: u64,
        end_cycle: u64,
        pox_address: Option<String>,
    },
    DelegateStackExtend {
        stacker: String,
        end_cycle: u64,
    },
    DelegateStackIncrease {
        stacker: String,
        start_cycle: u64,
        increase_by: u128,
        total_locked: u128,
    },
    StackAggregationCommit {
        cycle: u64,
        amount_ustx: u128,
        signer_key: Option<String>,
        pox_address: Option<String>,
        indexed: bool,
    },
    StackAggregationIncrease {
        cycle: u64,
        amount_ustx: u128,
        signer_key: Option<String>,
        pox_address: Option<String>,
    },
}

/// Classify a decoded root tuple into a domain event.
///
/// Unrecognized event names yield `None` (ignored); so does any recognized
/// event with missing or malformed fields — a per-entry data anomaly, never
/// fatal.
pub fn classify(root: &ReprValue, mainnet: bool) -> Option<DomainEvent> {
    let name = root.get("name")?.as_str()?;
    let data = root.get("data")?;

    match name {
        "delegate-stx" => Some(DomainEvent::DelegateStx {
            stacker: root.get("stacker")?.as_str()?.to_string(),
            amount_ustx: data.get("amount-ustx")?.as_u128()?,
            start_cycle: data.get("start-cycle-id")?.as_u64()?,
            end_cycle: optional_cycle(data.get("end-cycle-id")?)?,
            pox_address: decode_pox_addr(data.get("pox-addr")?, mainnet)?,
        }),
        "revoke-delegate-stx" => Some(DomainEvent::RevokeDelegateStx {
            stacker: root.get("stacker")?.as_str()?.to_string(),
        }),
        "delegate-stack-stx" => Some(DomainEvent::DelegateStackStx {
            stacker: data.get("stacker")?.as_str()?.to_string(),
            amount_ustx: data.get("lock-amount")?.as_u128()?,
            start_cycle: data.get("start-cycle-id")?.as_u64()?,
            end_cycle: data.get("end-cycle-id")?.as_u64()?,
            pox_address: decode_pox_addr(data.get("pox-addr")?, mainnet)?,
        }),
        "delegate-stack-extend" => Some(DomainEvent::DelegateStackExtend {
            stacker: data.get("stacker")?.as_str()?.to_string(),
            end_cycle: data.get("end-cycle-id")?.as_u64()?,
        }),
        "delegate-stack-increase" => Some(DomainEvent::DelegateStackIncrease {
            stacker: data.get("stacker")?.as_str()?.to_string(),
            start_cycle: data.get("start-cycle-id")?.as_u64()?,
            increase_by: data.get("increase-by")?.as_u128()?,
            total_locked: data.get("total-locked")?.as_u128()?,
        }),
        "stack-aggregation-commit" | "stack-aggregation-commit-indexed" => {
            Some(DomainEvent::StackAggregationCommit {
                cycle: data.get("reward-cycle")?.as_u64()?,
                amount_ustx: data.get("amount-ustx")?.as_u128()?,
                signer_key: data
                    .get("signer-key")
                    .and_then(|v| v.as_str())
                    .map(normalize_hex),
                pox_address: decode_pox_addr(data.get("pox-addr")?, mainnet)?,
                indexed: name == "stack-aggregation-commit-indexed",
            })
        }
        "stack-aggregation-increase" => Some(DomainEvent::StackAggregationIncrease {
            cycle: data.get("reward-cycle")?.as_u64()?,
            amount_ustx: data.get("amount-ustx")?.as_u128()?,
            signer_key: data
                .get("signer-key")
                .and_then(|v| v.as_str())
                .map(normalize_hex),
            pox_address: decode_pox_addr(data.get("pox-addr")?, mainnet)?,
        }),
        _ => None,
    }
}

/// Decode the filtered ledger slice into chronological domain events.
///
/// Entries that fail to parse or classify are skipped with a debug log.
pub fn extract_events(entries: &[&RawLogEntry], mainnet: bool) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    for entry in entries {
        let Some(repr) = entry.repr.as_deref() else {
            continue;
        };
        let root = match parse_repr(repr) {
            Ok(root) => root,
            Err(e) => {
                debug!(tx_id = %entry.tx_id, event_index = entry.event_index, error = %e,
                       "skipping unparseable event repr");
                continue;
            }
        };
        if let Some(event) = classify(&root, mainnet) {
            events.push(event);
        }
    }
    events
}

/// An `end-cycle-id` is an optional in the contract; `none` means open-ended.
/// Returns `None` (skip the event) only on a malformed value.
fn optional_cycle(value: &ReprValue) -> Option<Option<u64>> {
    if value.is_none() {
        Some(None)
    } else {
        value.as_u64().map(Some)
    }
}

/// A `none` pox-addr means "use the pool's own canonical address" and maps to
/// `Ok(None)` here; a present tuple is decoded to a BTC address. Returns
/// outer `None` (skip the event) on malformed input.
fn decode_pox_addr(value: &ReprValue, mainnet: bool) -> Option<Option<String>> {
    if value.is_none() {
        return Some(None);
    }
    let version_hex = value.get("version")?.as_str()?;
    let version = u8::from_str_radix(version_hex.strip_prefix("0x")?, 16).ok()?;
    let hashbytes_hex = value.get("hashbytes")?.as_str()?;
    let hashbytes = hex::decode(hashbytes_hex.strip_prefix("0x")?).ok()?;
    pox_to_btc_address(version, &hashbytes, mainnet)
        .ok()
        .map(Some)
}

fn normalize_hex(raw: &str) -> String {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    format!("0x{}", stripped.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_repr(repr: &str) -> Option<DomainEvent> {
        classify(&parse_repr(repr).unwrap(), true)
    }

    #[test]
    fn classifies_delegate_stx_with_no_pox_addr() {
        let event = classify_repr(
            "(tuple (name \"delegate-stx\") \
             (stacker 'SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7) \
             (data (tuple (amount-ustx u500) (start-cycle-id u8) \
             (end-cycle-id (some u10)) (pox-addr none))))",
        )
        .unwrap();
        assert_eq!(
            event,
            DomainEvent::DelegateStx {
                stacker: "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
                amount_ustx: 500,
                start_cycle: 8,
                end_cycle: Some(10),
                pox_address: None,
            }
        );
    }

    #[test]
    fn classifies_open_ended_delegation() {
        let event = classify_repr(
            "(tuple (name \"delegate-stx\") (stacker 'SPSTACKER) \
             (data (tuple (amount-ustx u100) (start-cycle-id u8) \
             (end-cycle-id none) (pox-addr none))))",
        )
        .unwrap();
        assert!(matches!(
            event,
            DomainEvent::DelegateStx { end_cycle: None, .. }
        ));
    }

    #[test]
    fn decodes_segwit_pox_addr() {
        let event = classify_repr(
            "(tuple (name \"delegate-stack-stx\") (stacker 'SPOPERATOR) \
             (data (tuple (stacker 'SPSTACKER) (lock-amount u100) \
             (start-cycle-id u8) (end-cycle-id u10) \
             (pox-addr (tuple (hashbytes 0x751e76e8199196d454941c45d1b3a323f1433bd6) (version 0x04))))))",
        )
        .unwrap();
        assert_eq!(
            event,
            DomainEvent::DelegateStackStx {
                stacker: "SPSTACKER".to_string(),
                amount_ustx: 100,
                start_cycle: 8,
                end_cycle: 10,
                pox_address: Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_string()),
            }
        );
    }

    #[test]
    fn classifies_indexed_commit() {
        let event = classify_repr(
            "(tuple (name \"stack-aggregation-commit-indexed\") (stacker 'SPOPERATOR) \
             (data (tuple (reward-cycle u8) (amount-ustx u100) \
             (signer-key 0xAB01) \
             (pox-addr (tuple (hashbytes 0x751e76e8199196d454941c45d1b3a323f1433bd6) (version 0x04))))))",
        )
        .unwrap();
        match event {
            DomainEvent::StackAggregationCommit {
                cycle,
                indexed,
                signer_key,
                ..
            } => {
                assert_eq!(cycle, 8);
                assert!(indexed);
                assert_eq!(signer_key.as_deref(), Some("0xab01"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_names_and_malformed_data() {
        assert!(classify_repr("(tuple (name \"handle-unlock\") (data (tuple (a u1))))").is_none());
        // missing amount-ustx
        assert!(classify_repr(
            "(tuple (name \"delegate-stx\") (stacker 'SPX) \
             (data (tuple (start-cycle-id u8) (end-cycle-id none) (pox-addr none))))"
        )
        .is_none());
    }

    #[test]
    fn extract_skips_bad_entries() {
        let good = RawLogEntry {
            event_index: 0,
            event_type: "smart_contract_log".to_string(),
            tx_id: "0x01".to_string(),
            contract_id: Some("SP000000000000000000002Q6VF78.pox-4".to_string()),
            topic: Some("print".to_string()),
            hex: None,
            repr: Some(
                "(tuple (name \"revoke-delegate-stx\") (stacker 'SPX) (data (tuple (a u1))))"
                    .to_string(),
            ),
        };
        let mut bad = good.clone();
        bad.repr = Some("(tuple (oops".to_string());
        let entries = vec![&good, &bad];
        let events = extract_events(&entries, true);
        assert_eq!(
            events,
            vec![DomainEvent::RevokeDelegateStx {
                stacker: "SPX".to_string()
            }]
        );
    }
}
