//! HTTP client for the Hiro indexing API.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::chain::{PoxApi, PoxInfo, TxStatus};
use crate::clarity::{decode_hex, encode_map_key, pox_to_btc_address, ClarityValue};
use crate::config::KeeperConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::events::RawLogEntry;
use crate::reward_index::RewardIndexEntry;

pub struct HiroClient {
    http: reqwest::Client,
    config: KeeperConfig,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    event_index: u64,
    event_type: String,
    tx_id: String,
    contract_log: Option<WireContractLog>,
}

#[derive(Debug, Deserialize)]
struct WireContractLog {
    contract_id: String,
    topic: String,
    value: WireLogValue,
}

#[derive(Debug, Deserialize)]
struct WireLogValue {
    hex: Option<String>,
    repr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePoxInfo {
    current_cycle: WireCycle,
    current_burnchain_block_height: u64,
    next_cycle: WireNextCycle,
}

#[derive(Debug, Deserialize)]
struct WireCycle {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireNextCycle {
    blocks_until_prepare_phase: i64,
}

#[derive(Debug, Deserialize)]
struct WireMapEntry {
    data: String,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    is_unanchored: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireNonces {
    possible_next_nonce: u64,
}

impl HiroClient {
    pub fn new(config: KeeperConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Issue a request with bounded fixed-delay retries on transport errors
    /// and rate limiting. Returns `None` on 404.
    async fn request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> KeeperResult<Option<String>> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            let mut request = self.http.request(method.clone(), url).query(query);
            if let Some(body) = &body {
                request = request
                    .header("Content-Type", "application/json")
                    .body(body.clone());
            }
            let err: KeeperError = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(response.text().await?));
                    }
                    KeeperError::Api(format!("{url} returned {status}"))
                }
                Err(e) => e.into(),
            };
            if attempt >= retry.max_retries {
                return Err(err);
            }
            attempt += 1;
            warn!(%url, attempt, error = %err, "api call failed, retrying");
            sleep(Duration::from_secs(retry.delay_secs)).await;
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> KeeperResult<Option<T>> {
        let Some(text) = self.request(Method::GET, url, query, None).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn decode_reward_entry(
        &self,
        cycle: u64,
        index: u64,
        data_hex: &str,
    ) -> KeeperResult<Option<RewardIndexEntry>> {
        let value = decode_hex(data_hex)?;
        let Some(entry) = value.as_option() else {
            // (none): the slot does not exist.
            return Ok(None);
        };

        let pox_addr = entry
            .get("pox-addr")
            .ok_or_else(|| KeeperError::Codec("reward entry missing pox-addr".into()))?;
        let version = pox_addr
            .get("version")
            .and_then(ClarityValue::as_buffer)
            .and_then(|b| b.first().copied())
            .ok_or_else(|| KeeperError::Codec("reward entry missing pox-addr version".into()))?;
        let hashbytes = pox_addr
            .get("hashbytes")
            .and_then(ClarityValue::as_buffer)
            .ok_or_else(|| KeeperError::Codec("reward entry missing pox-addr hashbytes".into()))?;
        let pox_address =
            pox_to_btc_address(version, hashbytes, self.config.network.is_mainnet())?;

        let signer = entry
            .get("signer")
            .and_then(ClarityValue::as_buffer)
            .map(|b| format!("0x{}", hex::encode(b)))
            .ok_or_else(|| KeeperError::Codec("reward entry missing signer".into()))?;

        let stacker = match entry.get("stacker") {
            Some(ClarityValue::OptionalSome(inner)) => match inner.as_ref() {
                ClarityValue::Principal(address) => Some(address.clone()),
                _ => None,
            },
            _ => None,
        };

        let total_ustx = entry
            .get("total-ustx")
            .and_then(ClarityValue::as_u128)
            .ok_or_else(|| KeeperError::Codec("reward entry missing total-ustx".into()))?;

        Ok(Some(RewardIndexEntry {
            cycle,
            reward_index: index,
            pox_address,
            signer,
            stacker,
            total_ustx,
        }))
    }
}

#[async_trait]
impl PoxApi for HiroClient {
    async fn events_page(
        &self,
        address: &str,
        limit: u64,
        offset: u64,
    ) -> KeeperResult<Vec<RawLogEntry>> {
        let query = [
            ("address", address.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        // Exhausted retries degrade to "no data this pass": the caller keeps
        // working from the cached ledger instead of abandoning the pass.
        let page: EventsPage = match self.get(&self.config.events_url(), &query).await {
            Ok(Some(page)) => page,
            Ok(None) => EventsPage { events: Vec::new() },
            Err(e) => {
                warn!(offset, error = %e, "events fetch failed, treating as end of pages");
                return Ok(Vec::new());
            }
        };
        debug!(offset, count = page.events.len(), "fetched events page");
        Ok(page
            .events
            .into_iter()
            .map(|event| {
                let log = event.contract_log;
                RawLogEntry {
                    event_index: event.event_index,
                    event_type: event.event_type,
                    tx_id: event.tx_id,
                    contract_id: log.as_ref().map(|l| l.contract_id.clone()),
                    topic: log.as_ref().map(|l| l.topic.clone()),
                    hex: log.as_ref().and_then(|l| l.value.hex.clone()),
                    repr: log.and_then(|l| l.value.repr),
                }
            })
            .collect())
    }

    async fn pox_info(&self) -> KeeperResult<PoxInfo> {
        let info: WirePoxInfo = self
            .get(&self.config.pox_info_url(), &[])
            .await?
            .ok_or_else(|| KeeperError::Api("pox endpoint returned 404".into()))?;
        Ok(PoxInfo {
            current_cycle: info.current_cycle.id,
            current_block: info.current_burnchain_block_height,
            blocks_until_prepare_phase: info.next_cycle.blocks_until_prepare_phase,
        })
    }

    async fn reward_index_entry(
        &self,
        cycle: u64,
        index: u64,
    ) -> KeeperResult<Option<RewardIndexEntry>> {
        let key = encode_map_key(cycle, index);
        // The node expects the hex key as a JSON string literal.
        let body = serde_json::to_string(&key)?;
        let Some(text) = self
            .request(Method::POST, &self.config.reward_map_url(), &[], Some(body))
            .await?
        else {
            return Ok(None);
        };
        let entry: WireMapEntry = serde_json::from_str(&text)?;
        self.decode_reward_entry(cycle, index, &entry.data)
    }

    async fn transaction_status(&self, txid: &str) -> KeeperResult<Option<TxStatus>> {
        let tx: Option<WireTransaction> =
            self.get(&self.config.transaction_url(txid), &[]).await?;
        Ok(tx.map(|tx| TxStatus {
            anchored: tx.is_unanchored == Some(false),
        }))
    }

    async fn account_nonce(&self, principal: &str) -> KeeperResult<u64> {
        let nonces: WireNonces = self
            .get(&self.config.nonces_url(principal), &[])
            .await?
            .ok_or_else(|| KeeperError::Api(format!("no nonce data for {principal}")))?;
        Ok(nonces.possible_next_nonce)
    }
}
