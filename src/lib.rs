//! Stacking pool operator automation for the PoX delegation protocol.
//!
//! The keeper mirrors the chain's contract-event log into a local ledger,
//! folds it into the pool's delegation state, plans the lock and commit
//! transactions still needed to honor every delegation over the operator's
//! horizon, and submits them. A small HTTP endpoint exposes the latest
//! state snapshot for dashboards.

pub mod broadcast;
pub mod chain;
pub mod clarity;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;
pub mod planner;
pub mod reward_index;
pub mod runloop;
pub mod server;
pub mod state;

pub use config::{KeeperConfig, Network};
pub use error::{KeeperError, KeeperResult};
pub use runloop::{Keeper, PassOutcome};
