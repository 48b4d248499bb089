//! JSON-RPC provider over HTTP.

use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{BlockData, ChainProvider, LogFilter, RpcError, TransactionData};
use crate::events::types::RawLog;

/// JSON-RPC chain provider backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    hash: String,
    #[serde(rename = "parentHash")]
    parent_hash: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "transactionHash")]
    tx_hash: String,
    #[serde(rename = "transactionIndex")]
    tx_index: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    input: String,
}

impl HttpProvider {
    /// Creates a provider for the given endpoint with a bounded
    /// request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(RpcError::Transport(format!(
                "rpc error {}: {}",
                error.code, error.message
            )));
        }
        parsed
            .result
            .ok_or_else(|| RpcError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl ChainProvider for HttpProvider {
    async fn get_block(&self, number: u64) -> Result<BlockData, RpcError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{number:x}"), false]),
            )
            .await?;

        if result.is_null() {
            return Err(RpcError::BlockNotFound(number));
        }

        let block: RpcBlock = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        Ok(BlockData {
            number: parse_quantity(&block.number)?,
            hash: parse_b256(&block.hash)?,
            parent_hash: parse_b256(&block.parent_hash)?,
            timestamp: parse_quantity(&block.timestamp)?
                .try_into()
                .map_err(|_| RpcError::InvalidResponse("timestamp out of range".to_string()))?,
        })
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let mut params = json!({
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        });
        if !filter.topics.is_empty() {
            params["topics"] = json!([filter.topics]);
        }
        if let Some(address) = filter.address {
            params["address"] = json!(address);
        }

        let result = self.call("eth_getLogs", json!([params])).await?;
        let logs: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        let mut raw = Vec::with_capacity(logs.len());
        for log in logs {
            raw.push(RawLog {
                address: parse_address(&log.address)?,
                topics: log
                    .topics
                    .iter()
                    .map(|t| parse_b256(t))
                    .collect::<Result<_, _>>()?,
                data: parse_bytes(&log.data)?,
                block_number: parse_quantity(&log.block_number)?,
                block_hash: parse_b256(&log.block_hash)?,
                tx_hash: parse_b256(&log.tx_hash)?,
                tx_index: parse_index(&log.tx_index)?,
                log_index: parse_index(&log.log_index)?,
            });
        }
        // The provider returns logs ordered within blocks, but enforce
        // the ordering the pipeline depends on.
        raw.sort_by_key(|log| (log.block_number, log.tx_index, log.log_index));
        Ok(raw)
    }

    async fn get_transaction(&self, hash: B256) -> Result<TransactionData, RpcError> {
        let result = self
            .call("eth_getTransactionByHash", json!([hash]))
            .await?;

        if result.is_null() {
            return Err(RpcError::InvalidResponse(format!(
                "transaction {hash} not found"
            )));
        }

        let tx: RpcTransaction = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        Ok(TransactionData {
            hash: parse_b256(&tx.hash)?,
            from: parse_address(&tx.from)?,
            to: tx.to.as_deref().map(parse_address).transpose()?,
            data: parse_bytes(&tx.input)?,
        })
    }
}

fn strip_hex(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

fn parse_quantity(value: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(strip_hex(value), 16)
        .map_err(|_| RpcError::InvalidResponse(format!("bad quantity {value}")))
}

fn parse_index(value: &str) -> Result<u32, RpcError> {
    parse_quantity(value)?
        .try_into()
        .map_err(|_| RpcError::InvalidResponse(format!("index out of range {value}")))
}

fn parse_b256(value: &str) -> Result<B256, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::InvalidResponse(format!("bad hash {value}")))
}

fn parse_address(value: &str) -> Result<Address, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::InvalidResponse(format!("bad address {value}")))
}

fn parse_bytes(value: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(strip_hex(value))
        .map_err(|_| RpcError::InvalidResponse(format!("bad hex data {value}")))
}
