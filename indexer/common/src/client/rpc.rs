//! JSON-RPC client for a ledger node.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::{Address, EventKind, RawEvent};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{IndexerError, IndexerErrorResultExt};

use super::LedgerClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetEventsParams<'a> {
    address: &'a Address,
    from_block: u64,
    to_block: u64,
    events: Vec<&'static str>,
}

/// Talks to a ledger node over JSON-RPC 2.0.
///
/// Every failure, including JSON-RPC error objects, is reported as a
/// [IndexerError::Fetch] so that callers can retry it.
pub struct JsonRpcLedgerClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedgerClient {
    pub fn new(url: impl Into<String>) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .configuration("failed to build http client")?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R, IndexerError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method, id, "sending ledger request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .fetch(&format!("failed to send {method} request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexerError::fetch(&format!(
                "{method} request failed with status {status}"
            )));
        }

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .fetch(&format!("failed to decode {method} response"))?;

        if let Some(error) = body.error {
            return Err(IndexerError::fetch(&format!(
                "{method} returned error {}: {}",
                error.code, error.message
            )));
        }

        body.result
            .ok_or_else(|| IndexerError::fetch(&format!("{method} response has no result")))
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn head(&self) -> Result<u64, IndexerError> {
        self.call("ledger_headHeight", Vec::<()>::new()).await
    }

    async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
    ) -> Result<Vec<RawEvent>, IndexerError> {
        let params = GetEventsParams {
            address: contract,
            from_block,
            to_block,
            events: kinds.iter().map(|kind| kind.as_str()).collect(),
        };

        self.call("ledger_getEvents", [params]).await
    }
}
