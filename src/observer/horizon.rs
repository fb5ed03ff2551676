//! Horizon Ledger Client
//!
//! Polls the Stellar Horizon payments endpoint in ascending order and
//! turns each record into a [`PaymentEvent`]. The record's `paging_token`
//! is the cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::cursor::Cursor;
use super::error::StreamError;
use super::ledger::{Asset, EventStream, LedgerClient, PaymentEvent, PaymentKind};

/// Cursor before the first operation, used as the head of an empty account
const GENESIS_CURSOR: &str = "0";

#[derive(Debug, Clone)]
pub struct HorizonConfig {
    pub url: String,
    /// Only payments touching this account; all payments when `None`
    pub account: Option<String>,
    pub page_limit: u32,
    /// Wait between polls when a page comes back empty
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            url: "https://horizon-testnet.stellar.org".to_string(),
            account: None,
            page_limit: 100,
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HorizonLedger {
    config: HorizonConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(rename = "_embedded")]
    embedded: Embedded<T>,
}

#[derive(Deserialize)]
struct Embedded<T> {
    records: Vec<T>,
}

/// Only the position of a record
#[derive(Deserialize)]
struct PagingToken {
    paging_token: String,
}

/// Payment-family operation as returned by Horizon
#[derive(Deserialize, Debug)]
struct OperationRecord {
    id: String,
    paging_token: String,
    #[serde(rename = "type")]
    op_type: String,
    #[serde(default)]
    transaction_hash: String,
    #[serde(default = "default_true")]
    transaction_successful: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    source_account: Option<String>,
    // payment / path payments
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
    // create_account
    #[serde(default)]
    funder: Option<String>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    starting_balance: Option<String>,
}

fn default_true() -> bool {
    true
}

impl OperationRecord {
    fn into_event(self) -> Result<PaymentEvent, StreamError> {
        let kind = PaymentKind::from_type(&self.op_type);

        let (from, to, raw_amount) = match kind {
            PaymentKind::CreateAccount => (self.funder, self.account, self.starting_balance),
            PaymentKind::Other(_) => (self.source_account, None, None),
            _ => (self.from, self.to, self.amount),
        };

        let amount = match raw_amount {
            Some(raw) => Decimal::from_str(&raw).map_err(|e| {
                StreamError::Decode(format!("operation {}: bad amount {:?}: {}", self.id, raw, e))
            })?,
            None => Decimal::ZERO,
        };

        let asset = match (self.asset_type.as_deref(), self.asset_code, self.asset_issuer) {
            (None | Some("native"), _, _) => Asset::Native,
            (Some(_), Some(code), Some(issuer)) => Asset::Credit { code, issuer },
            (Some(t), _, _) => {
                return Err(StreamError::Decode(format!(
                    "operation {}: asset type {} without code/issuer",
                    self.id, t
                )));
            }
        };

        Ok(PaymentEvent {
            id: self.id,
            cursor: Cursor::new(self.paging_token),
            kind,
            transaction_hash: self.transaction_hash,
            from: from.unwrap_or_default(),
            to: to.unwrap_or_default(),
            asset,
            amount,
            transaction_successful: self.transaction_successful,
            created_at: self.created_at,
        })
    }
}

fn decode_records<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, StreamError> {
    let page: Page<T> =
        serde_json::from_str(body).map_err(|e| StreamError::Decode(e.to_string()))?;
    Ok(page.embedded.records)
}

/// Decode one page body into events, in page order
fn decode_page(body: &str) -> Result<Vec<PaymentEvent>, StreamError> {
    decode_records::<OperationRecord>(body)?
        .into_iter()
        .map(OperationRecord::into_event)
        .collect()
}

/// Newest paging token on a `order=desc&limit=1` page
fn decode_head(body: &str) -> Result<Cursor, StreamError> {
    let newest = decode_records::<PagingToken>(body)?.into_iter().next();
    Ok(Cursor::new(
        newest.map_or_else(|| GENESIS_CURSOR.to_string(), |r| r.paging_token),
    ))
}

/// GET a payments page; non-2xx answers become [`StreamError::Status`]
async fn get_page(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<String, StreamError> {
    let response = client.get(url).query(query).send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StreamError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

impl HorizonLedger {
    pub fn new(config: HorizonConfig) -> Result<Self, StreamError> {
        info!(
            url = %config.url,
            account = config.account.as_deref().unwrap_or("*"),
            "Initializing Horizon ledger client"
        );

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                StreamError::Connection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    fn payments_url(&self) -> String {
        let base = self.config.url.trim_end_matches('/');
        match &self.config.account {
            Some(account) => format!("{}/accounts/{}/payments", base, account),
            None => format!("{}/payments", base),
        }
    }
}

/// Polling state carried between stream items
struct Poller {
    client: reqwest::Client,
    url: String,
    cursor: String,
    limit: u32,
    poll_interval: Duration,
    buffer: VecDeque<PaymentEvent>,
}

impl Poller {
    async fn fetch_page(&mut self) -> Result<(), StreamError> {
        let limit = self.limit.to_string();
        let body = get_page(
            &self.client,
            &self.url,
            &[
                ("cursor", self.cursor.as_str()),
                ("order", "asc"),
                ("limit", limit.as_str()),
                ("include_failed", "false"),
            ],
        )
        .await?;

        let events = decode_page(&body)?;
        if let Some(last) = events.last() {
            self.cursor = last.cursor.as_str().to_string();
        }
        debug!(count = events.len(), next_cursor = %self.cursor, "Fetched Horizon page");
        self.buffer.extend(events);
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for HorizonLedger {
    async fn open_stream(&self, after: &Cursor) -> Result<EventStream, StreamError> {
        let cursor = after.as_str().to_string();

        info!(url = %self.payments_url(), cursor = %cursor, "Opening Horizon payment stream");

        let mut poller = Poller {
            client: self.client.clone(),
            url: self.payments_url(),
            cursor,
            limit: self.config.page_limit,
            poll_interval: self.config.poll_interval,
            buffer: VecDeque::new(),
        };

        // Fail fast on an unreachable ledger instead of on the first read
        poller.fetch_page().await?;

        let events = stream::unfold(Some(poller), |state| async move {
            let mut poller = state?;
            loop {
                if let Some(event) = poller.buffer.pop_front() {
                    return Some((Ok(event), Some(poller)));
                }
                match poller.fetch_page().await {
                    Ok(()) if poller.buffer.is_empty() => {
                        tokio::time::sleep(poller.poll_interval).await
                    }
                    Ok(()) => {}
                    // Yield the error, then end the stream
                    Err(e) => return Some((Err(e), None)),
                }
            }
        });

        Ok(events.boxed())
    }

    async fn head(&self) -> Result<Cursor, StreamError> {
        let body = get_page(
            &self.client,
            &self.payments_url(),
            &[("order", "desc"), ("limit", "1")],
        )
        .await?;
        let head = decode_head(&body)?;
        info!(head = %head, "Resolved Horizon head cursor");
        Ok(head)
    }
}
