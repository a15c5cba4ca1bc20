//! Transaction submitters: a dry-run stub and a signing-sidecar client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::chain::TransactionSubmitter;
use crate::error::{KeeperError, KeeperResult};
use crate::planner::PlannedTransaction;

/// Logs the operations a live keeper would broadcast and submits nothing.
pub struct DryRunSubmitter;

#[async_trait]
impl TransactionSubmitter for DryRunSubmitter {
    async fn submit(
        &self,
        transaction: &PlannedTransaction,
        nonce: u64,
    ) -> KeeperResult<Option<String>> {
        info!(
            function = transaction.function_name(),
            nonce,
            detail = ?transaction,
            "dry run: would submit transaction"
        );
        Ok(None)
    }
}

/// Client for an external signing sidecar that holds the pool keys, signs
/// the operation and broadcasts it.
pub struct SignerServiceClient {
    http: reqwest::Client,
    submit_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    txid: String,
}

impl SignerServiceClient {
    pub fn new(submit_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            submit_url,
        }
    }
}

#[async_trait]
impl TransactionSubmitter for SignerServiceClient {
    async fn submit(
        &self,
        transaction: &PlannedTransaction,
        nonce: u64,
    ) -> KeeperResult<Option<String>> {
        let body = json!({
            "function": transaction.function_name(),
            "nonce": nonce,
            "operation": transaction,
        });
        let response = self
            .http
            .post(&self.submit_url)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(KeeperError::Submission(format!(
                "signer service returned {status}: {detail}"
            )));
        }
        let submitted: SubmitResponse = response.json().await?;
        info!(
            function = transaction.function_name(),
            nonce,
            txid = %submitted.txid,
            "submitted transaction"
        );
        Ok(Some(submitted.txid))
    }
}
