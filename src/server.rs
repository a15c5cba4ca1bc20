//! Read-only dashboard API serving the latest projection snapshot.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::db::Store;
use crate::error::KeeperResult;
use crate::planner::PendingTransaction;
use crate::state::PoolState;

#[derive(Debug, Serialize)]
struct Snapshot {
    #[serde(flatten)]
    state: PoolState,
    pending_transactions: Vec<PendingTransaction>,
}

pub fn router(store: Store) -> Router {
    Router::new()
        .route("/data", get(data))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(store)
}

async fn data(State(store): State<Store>) -> Result<Json<Snapshot>, StatusCode> {
    let state = store.load_snapshot().await.map_err(|e| {
        error!(error = %e, "failed to load snapshot");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let pending = store.load_pending().await.map_err(|e| {
        error!(error = %e, "failed to load pending transactions");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(Snapshot {
        state,
        pending_transactions: pending,
    }))
}

pub async fn serve(store: Store, port: u16) -> KeeperResult<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dashboard api listening");
    axum::serve(listener, router(store)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Delegation;

    #[tokio::test]
    async fn snapshot_endpoint_returns_persisted_state() {
        let store = Store::connect_in_memory().await.unwrap();
        let mut state = PoolState::default();
        state.delegations.insert(
            "SPA".to_string(),
            Delegation {
                start_cycle: 8,
                end_cycle: Some(10),
                pox_address: None,
                amount_ustx: 100,
            },
        );
        store.replace_snapshot(&state).await.unwrap();

        let Json(snapshot) = data(State(store)).await.unwrap();
        assert_eq!(snapshot.state, state);
        assert!(snapshot.pending_transactions.is_empty());
    }
}
