//! Chain access seams: the read-side API trait and the transaction
//! submission trait, plus the HTTP implementations of both.

pub mod client;
pub mod submitter;

use async_trait::async_trait;

use crate::error::KeeperResult;
use crate::events::RawLogEntry;
use crate::planner::PlannedTransaction;
use crate::reward_index::RewardIndexEntry;

pub use client::HiroClient;
pub use submitter::{DryRunSubmitter, SignerServiceClient};

/// Point-in-time PoX status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoxInfo {
    pub current_cycle: u64,
    pub current_block: u64,
    /// Burn blocks until the next prepare phase; zero or negative means the
    /// prepare phase is underway.
    pub blocks_until_prepare_phase: i64,
}

/// Confirmation status of a previously submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    /// True once the transaction is in an anchored block (any outcome).
    pub anchored: bool,
}

/// Read-side chain access. Every call is fallible; transient failures are
/// the caller's to tolerate.
#[async_trait]
pub trait PoxApi: Send + Sync {
    /// One page of contract-log events mentioning `address`, newest first.
    async fn events_page(
        &self,
        address: &str,
        limit: u64,
        offset: u64,
    ) -> KeeperResult<Vec<RawLogEntry>>;

    /// Current PoX cycle and burn-block position.
    async fn pox_info(&self) -> KeeperResult<PoxInfo>;

    /// One slot of a cycle's reward set; `None` when the slot is absent.
    async fn reward_index_entry(
        &self,
        cycle: u64,
        index: u64,
    ) -> KeeperResult<Option<RewardIndexEntry>>;

    /// Status of a transaction; `None` when the API no longer knows it.
    async fn transaction_status(&self, txid: &str) -> KeeperResult<Option<TxStatus>>;

    /// The account's next usable nonce.
    async fn account_nonce(&self, principal: &str) -> KeeperResult<u64>;
}

/// Write-side seam. Implementations sign and broadcast a planned operation.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit one planned transaction with the given nonce.
    ///
    /// Returns `Ok(Some(txid))` on broadcast, `Ok(None)` when the submitter
    /// intentionally did nothing (dry run), `Err` on failure.
    async fn submit(
        &self,
        transaction: &PlannedTransaction,
        nonce: u64,
    ) -> KeeperResult<Option<String>>;
}
