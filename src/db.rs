//! SQLite persistence for the ledger, reward-index cache, pending
//! transactions and the projection snapshot.
//!
//! A single-connection pool keeps writes serialized; the keeper is the only
//! writer and the dashboard endpoint only reads.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::{KeeperError, KeeperResult};
use crate::events::RawLogEntry;
use crate::planner::PendingTransaction;
use crate::reward_index::{RewardIndexEntry, RewardIndexMap};
use crate::state::{AcceptedSegment, CommittedSegment, Delegation, PoolState};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// µSTX amounts exceed i64 range, so they are stored as decimal text.
fn parse_amount(text: &str) -> KeeperResult<u128> {
    text.parse::<u128>()
        .map_err(|_| KeeperError::Codec(format!("bad stored amount '{text}'")))
}

impl Store {
    pub async fn connect(path: &str) -> KeeperResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(KeeperError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn connect_in_memory() -> KeeperResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(KeeperError::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    pub async fn create_tables(&self) -> KeeperResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_index INTEGER NOT NULL,
                event_type  TEXT NOT NULL,
                tx_id       TEXT NOT NULL,
                contract_id TEXT,
                topic       TEXT,
                hex         TEXT,
                repr        TEXT
            );
            CREATE TABLE IF NOT EXISTS reward_indexes (
                cycle        INTEGER NOT NULL,
                reward_index INTEGER NOT NULL,
                pox_address  TEXT NOT NULL,
                signer       TEXT NOT NULL,
                stacker      TEXT,
                total_ustx   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending_transactions (
                txid          TEXT PRIMARY KEY,
                function_name TEXT NOT NULL,
                stacker       TEXT,
                pox_address   TEXT,
                reward_cycle  INTEGER,
                reward_index  INTEGER
            );
            CREATE TABLE IF NOT EXISTS delegations (
                stacker     TEXT PRIMARY KEY,
                start_cycle INTEGER NOT NULL,
                end_cycle   INTEGER,
                pox_address TEXT,
                amount_ustx TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS previous_delegations (
                stacker     TEXT NOT NULL,
                start_cycle INTEGER NOT NULL,
                end_cycle   INTEGER,
                pox_address TEXT,
                amount_ustx TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS accepted_delegations (
                stacker     TEXT NOT NULL,
                start_cycle INTEGER NOT NULL,
                end_cycle   INTEGER NOT NULL,
                pox_address TEXT,
                amount_ustx TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS committed_delegations (
                pox_address  TEXT NOT NULL,
                start_cycle  INTEGER NOT NULL,
                end_cycle    INTEGER NOT NULL,
                amount_ustx  TEXT NOT NULL,
                reward_index INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- ledger -----------------------------------------------------------

    /// The full unfiltered ledger in chronological (insertion) order.
    pub async fn load_ledger(&self) -> KeeperResult<Vec<RawLogEntry>> {
        let rows = sqlx::query(
            "SELECT event_index, event_type, tx_id, contract_id, topic, hex, repr
             FROM events ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RawLogEntry {
                event_index: row.get::<i64, _>("event_index") as u64,
                event_type: row.get("event_type"),
                tx_id: row.get("tx_id"),
                contract_id: row.get("contract_id"),
                topic: row.get("topic"),
                hex: row.get("hex"),
                repr: row.get("repr"),
            })
            .collect())
    }

    pub async fn append_ledger(&self, entries: &[RawLogEntry]) -> KeeperResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO events (event_index, event_type, tx_id, contract_id, topic, hex, repr)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(entry.event_index as i64)
            .bind(&entry.event_type)
            .bind(&entry.tx_id)
            .bind(&entry.contract_id)
            .bind(&entry.topic)
            .bind(&entry.hex)
            .bind(&entry.repr)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // --- reward indexes ---------------------------------------------------

    pub async fn load_reward_indexes(&self) -> KeeperResult<RewardIndexMap> {
        let rows = sqlx::query(
            "SELECT cycle, reward_index, pox_address, signer, stacker, total_ustx
             FROM reward_indexes ORDER BY cycle, reward_index",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut map = RewardIndexMap::new();
        for row in rows {
            let total: String = row.get("total_ustx");
            let entry = RewardIndexEntry {
                cycle: row.get::<i64, _>("cycle") as u64,
                reward_index: row.get::<i64, _>("reward_index") as u64,
                pox_address: row.get("pox_address"),
                signer: row.get("signer"),
                stacker: row.get("stacker"),
                total_ustx: parse_amount(&total)?,
            };
            map.entry(entry.cycle).or_default().push(entry);
        }
        Ok(map)
    }

    pub async fn save_reward_indexes(
        &self,
        cycle: u64,
        entries: &[RewardIndexEntry],
    ) -> KeeperResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO reward_indexes (cycle, reward_index, pox_address, signer, stacker, total_ustx)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(cycle as i64)
            .bind(entry.reward_index as i64)
            .bind(&entry.pox_address)
            .bind(&entry.signer)
            .bind(&entry.stacker)
            .bind(entry.total_ustx.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_reward_indexes(&self) -> KeeperResult<()> {
        sqlx::query("DELETE FROM reward_indexes")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- pending transactions ---------------------------------------------

    pub async fn load_pending(&self) -> KeeperResult<Vec<PendingTransaction>> {
        let rows = sqlx::query(
            "SELECT txid, function_name, stacker, pox_address, reward_cycle, reward_index
             FROM pending_transactions ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingTransaction {
                txid: row.get("txid"),
                function_name: row.get("function_name"),
                stacker: row.get("stacker"),
                pox_address: row.get("pox_address"),
                reward_cycle: row.get::<Option<i64>, _>("reward_cycle").map(|n| n as u64),
                reward_index: row.get::<Option<i64>, _>("reward_index").map(|n| n as u64),
            })
            .collect())
    }

    pub async fn save_pending(&self, pending: &PendingTransaction) -> KeeperResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO pending_transactions
             (txid, function_name, stacker, pox_address, reward_cycle, reward_index)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&pending.txid)
        .bind(&pending.function_name)
        .bind(&pending.stacker)
        .bind(&pending.pox_address)
        .bind(pending.reward_cycle.map(|n| n as i64))
        .bind(pending.reward_index.map(|n| n as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_pending(&self, txid: &str) -> KeeperResult<()> {
        sqlx::query("DELETE FROM pending_transactions WHERE txid = ?")
            .bind(txid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- projection snapshot ----------------------------------------------

    /// Atomically replace the four snapshot tables with a fresh projection.
    pub async fn replace_snapshot(&self, state: &PoolState) -> KeeperResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "delegations",
            "previous_delegations",
            "accepted_delegations",
            "committed_delegations",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        for (stacker, d) in &state.delegations {
            sqlx::query(
                "INSERT INTO delegations (stacker, start_cycle, end_cycle, pox_address, amount_ustx)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(stacker)
            .bind(d.start_cycle as i64)
            .bind(d.end_cycle.map(|n| n as i64))
            .bind(&d.pox_address)
            .bind(d.amount_ustx.to_string())
            .execute(&mut *tx)
            .await?;
        }
        for (stacker, list) in &state.previous {
            for d in list {
                sqlx::query(
                    "INSERT INTO previous_delegations (stacker, start_cycle, end_cycle, pox_address, amount_ustx)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(stacker)
                .bind(d.start_cycle as i64)
                .bind(d.end_cycle.map(|n| n as i64))
                .bind(&d.pox_address)
                .bind(d.amount_ustx.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }
        for (stacker, segments) in &state.accepted {
            for s in segments {
                sqlx::query(
                    "INSERT INTO accepted_delegations (stacker, start_cycle, end_cycle, pox_address, amount_ustx)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(stacker)
                .bind(s.start_cycle as i64)
                .bind(s.end_cycle as i64)
                .bind(&s.pox_address)
                .bind(s.amount_ustx.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }
        for (address, segments) in &state.committed {
            for s in segments {
                sqlx::query(
                    "INSERT INTO committed_delegations (pox_address, start_cycle, end_cycle, amount_ustx, reward_index)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(address)
                .bind(s.start_cycle as i64)
                .bind(s.end_cycle as i64)
                .bind(s.amount_ustx.to_string())
                .bind(s.reward_index.map(|n| n as i64))
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// The latest persisted projection, for the dashboard endpoint.
    pub async fn load_snapshot(&self) -> KeeperResult<PoolState> {
        let mut state = PoolState::default();

        let rows = sqlx::query(
            "SELECT stacker, start_cycle, end_cycle, pox_address, amount_ustx FROM delegations",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let amount: String = row.get("amount_ustx");
            state.delegations.insert(
                row.get("stacker"),
                Delegation {
                    start_cycle: row.get::<i64, _>("start_cycle") as u64,
                    end_cycle: row.get::<Option<i64>, _>("end_cycle").map(|n| n as u64),
                    pox_address: row.get("pox_address"),
                    amount_ustx: parse_amount(&amount)?,
                },
            );
        }

        let rows = sqlx::query(
            "SELECT stacker, start_cycle, end_cycle, pox_address, amount_ustx
             FROM previous_delegations ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let amount: String = row.get("amount_ustx");
            state
                .previous
                .entry(row.get("stacker"))
                .or_default()
                .push(Delegation {
                    start_cycle: row.get::<i64, _>("start_cycle") as u64,
                    end_cycle: row.get::<Option<i64>, _>("end_cycle").map(|n| n as u64),
                    pox_address: row.get("pox_address"),
                    amount_ustx: parse_amount(&amount)?,
                });
        }

        let rows = sqlx::query(
            "SELECT stacker, start_cycle, end_cycle, pox_address, amount_ustx
             FROM accepted_delegations ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let amount: String = row.get("amount_ustx");
            state
                .accepted
                .entry(row.get("stacker"))
                .or_default()
                .push(AcceptedSegment {
                    start_cycle: row.get::<i64, _>("start_cycle") as u64,
                    end_cycle: row.get::<i64, _>("end_cycle") as u64,
                    pox_address: row.get("pox_address"),
                    amount_ustx: parse_amount(&amount)?,
                });
        }

        let rows = sqlx::query(
            "SELECT pox_address, start_cycle, end_cycle, amount_ustx, reward_index
             FROM committed_delegations ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let amount: String = row.get("amount_ustx");
            state
                .committed
                .entry(row.get("pox_address"))
                .or_default()
                .push(CommittedSegment {
                    start_cycle: row.get::<i64, _>("start_cycle") as u64,
                    end_cycle: row.get::<i64, _>("end_cycle") as u64,
                    amount_ustx: parse_amount(&amount)?,
                    reward_index: row.get::<Option<i64>, _>("reward_index").map(|n| n as u64),
                });
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx_id: &str, event_index: u64) -> RawLogEntry {
        RawLogEntry {
            event_index,
            event_type: "smart_contract_log".to_string(),
            tx_id: tx_id.to_string(),
            contract_id: Some("SP000000000000000000002Q6VF78.pox-4".to_string()),
            topic: Some("print".to_string()),
            hex: None,
            repr: Some("(tuple (name \"x\"))".to_string()),
        }
    }

    #[tokio::test]
    async fn ledger_round_trips_in_order() {
        let store = Store::connect_in_memory().await.unwrap();
        let entries = vec![entry("0x01", 0), entry("0x01", 1), entry("0x02", 0)];
        store.append_ledger(&entries).await.unwrap();
        store.append_ledger(&[entry("0x03", 0)]).await.unwrap();

        let loaded = store.load_ledger().await.unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[..3], entries[..]);
        assert_eq!(loaded[3].tx_id, "0x03");
    }

    #[tokio::test]
    async fn pending_transactions_round_trip() {
        let store = Store::connect_in_memory().await.unwrap();
        let pending = PendingTransaction {
            txid: "0xabc".to_string(),
            function_name: "delegate-stack-stx".to_string(),
            stacker: Some("SPA".to_string()),
            pox_address: None,
            reward_cycle: None,
            reward_index: None,
        };
        store.save_pending(&pending).await.unwrap();
        assert_eq!(store.load_pending().await.unwrap(), vec![pending]);

        store.delete_pending("0xabc").await.unwrap();
        assert!(store.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_round_trips_large_amounts() {
        let store = Store::connect_in_memory().await.unwrap();
        let mut state = PoolState::default();
        state.delegations.insert(
            "SPA".to_string(),
            Delegation {
                start_cycle: 8,
                end_cycle: None,
                pox_address: None,
                // exceeds i64
                amount_ustx: 40_000_000_000_000_000_000,
            },
        );
        state.accepted.insert(
            "SPA".to_string(),
            vec![AcceptedSegment {
                start_cycle: 8,
                end_cycle: 10,
                pox_address: Some("bc1qpool".to_string()),
                amount_ustx: 40_000_000_000_000_000_000,
            }],
        );
        store.replace_snapshot(&state).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap(), state);

        // A second snapshot fully replaces the first.
        let empty = PoolState::default();
        store.replace_snapshot(&empty).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap(), empty);
    }
}
