//! # JSON-RPC Gateway
//!
//! `SettlementGateway` over an Ethereum node's HTTP JSON-RPC endpoint.

use crate::config::NetworkConfig;
use crate::domain::abi::{decode_channel_info, ContractCall, TokenCall};
use crate::domain::entities::{ChannelInfo, EventKind, EventLog, LogFilter, RawLog};
use crate::domain::errors::GatewayError;
use crate::ports::outbound::SettlementGateway;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::{
    decode_hex, encode_hex, parse_address, parse_h256, Address, BlockHash, BlockNumber, TxHash,
    H256, U256,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A log entry as serialized by `eth_getLogs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

/// Settlement gateway backed by a node's HTTP endpoint.
pub struct JsonRpcGateway {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: AtomicU64,
    config: NetworkConfig,
}

impl JsonRpcGateway {
    /// Create a gateway with a 10 second request timeout.
    pub fn new(rpc_url: impl Into<String>, config: NetworkConfig) -> Self {
        Self::with_timeout(rpc_url, config, Duration::from_secs(10))
    }

    /// Create a gateway with a custom request timeout.
    pub fn with_timeout(rpc_url: impl Into<String>, config: NetworkConfig, timeout: Duration) -> Self {
        // reqwest::Client::new() is infallible if the builder is not
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
            config,
        }
    }

    /// Make a JSON-RPC call; a `null` result is returned as `Value::Null`.
    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to parse response: {e}")))?;

        if let Some(error) = rpc_response.error {
            debug!("[ur-02] {} failed: {} {}", method, error.code, error.message);
            return Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, GatewayError> {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidResponse(format!("{method}: {e}")))
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        let result: String = self
            .call(
                "eth_call",
                json!([{ "to": encode_hex(to.as_bytes()), "data": encode_hex(&data) }, "latest"]),
            )
            .await?;
        decode_hex(&result).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn parse_quantity(s: &str) -> Result<U256, GatewayError> {
    let body = s.trim_start_matches("0x");
    if body.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(body, 16).map_err(|e| GatewayError::InvalidResponse(format!("{s}: {e:?}")))
}

fn parse_u64(s: &str) -> Result<u64, GatewayError> {
    let value = parse_quantity(s)?;
    if value > U256::from(u64::MAX) {
        return Err(GatewayError::InvalidResponse(format!("{s} exceeds u64")));
    }
    Ok(value.low_u64())
}

fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

fn invalid<E: std::fmt::Display>(e: E) -> GatewayError {
    GatewayError::InvalidResponse(e.to_string())
}

impl RpcLog {
    fn into_raw(self) -> Result<RawLog, GatewayError> {
        let missing = |field: &str| GatewayError::InvalidResponse(format!("pending log without {field}"));
        Ok(RawLog {
            address: parse_address(&self.address).map_err(invalid)?,
            topics: self
                .topics
                .iter()
                .map(|t| parse_h256(t).map_err(invalid))
                .collect::<Result<Vec<H256>, _>>()?,
            data: decode_hex(&self.data).map_err(invalid)?,
            block_number: parse_u64(self.block_number.as_deref().ok_or_else(|| missing("blockNumber"))?)?,
            transaction_hash: parse_h256(
                self.transaction_hash
                    .as_deref()
                    .ok_or_else(|| missing("transactionHash"))?,
            )
            .map_err(invalid)?,
            log_index: parse_u64(self.log_index.as_deref().ok_or_else(|| missing("logIndex"))?)?,
        })
    }
}

#[async_trait]
impl SettlementGateway for JsonRpcGateway {
    fn contract_address(&self) -> Address {
        self.config.contract_address
    }

    fn token_address(&self) -> Address {
        self.config.token_address
    }

    async fn block_number(&self) -> Result<BlockNumber, GatewayError> {
        let result: String = self.call("eth_blockNumber", json!([])).await?;
        parse_u64(&result)
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>, GatewayError> {
        let block = self
            .call_raw("eth_getBlockByNumber", json!([quantity(number), false]))
            .await?;
        match block.get("hash").and_then(Value::as_str) {
            Some(hash) => Ok(Some(parse_h256(hash).map_err(invalid)?)),
            None => Ok(None),
        }
    }

    async fn block_exists(&self, hash: BlockHash) -> Result<bool, GatewayError> {
        let block = self
            .call_raw("eth_getBlockByHash", json!([encode_hex(hash.as_bytes()), false]))
            .await?;
        Ok(!block.is_null())
    }

    async fn network_id(&self) -> Result<u64, GatewayError> {
        let result: String = self.call("net_version", json!([])).await?;
        result
            .parse::<u64>()
            .or_else(|_| parse_u64(&result))
            .map_err(|_| GatewayError::InvalidResponse(format!("net_version: {result}")))
    }

    async fn channel_info(
        &self,
        sender: Address,
        receiver: Address,
        open_block_number: u32,
    ) -> Result<Option<ChannelInfo>, GatewayError> {
        let data = ContractCall::GetChannelInfo {
            sender,
            receiver,
            open_block_number,
        }
        .encode();

        match self.eth_call(self.config.contract_address, data).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(decode_channel_info(&bytes)?)),
            // The node reports a revert as an RPC error
            Err(GatewayError::Rpc { message, .. }) => {
                debug!("[ur-02] getChannelInfo reverted: {}", message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn query_logs(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        to_block: BlockNumber,
        filter: &LogFilter,
    ) -> Result<Vec<EventLog>, GatewayError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let topics: Vec<Value> = filter
            .topics(kind)
            .into_iter()
            .map(|t| t.map_or(Value::Null, |h| Value::String(encode_hex(h.as_bytes()))))
            .collect();

        let logs: Vec<RpcLog> = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": encode_hex(self.config.contract_address.as_bytes()),
                    "fromBlock": quantity(from_block),
                    "toBlock": quantity(to_block),
                    "topics": topics,
                }]),
            )
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs.into_iter().filter(|l| !l.removed) {
            match log.into_raw().and_then(|raw| EventLog::decode(&raw)) {
                Ok(event) => events.push(event),
                Err(e) => warn!("[ur-02] Skipping undecodable {:?} log: {}", kind, e),
            }
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxHash, GatewayError> {
        let result: Result<String, GatewayError> = self
            .call("eth_sendRawTransaction", json!([encode_hex(&raw)]))
            .await;
        match result {
            Ok(hash) => parse_h256(&hash).map_err(invalid),
            Err(e) if e.is_insufficient_funds() => Err(GatewayError::InsufficientFunds(e.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, GatewayError> {
        let result: String = self
            .call(
                "eth_getTransactionCount",
                json!([encode_hex(address.as_bytes()), "pending"]),
            )
            .await?;
        parse_u64(&result)
    }

    async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
        let result: String = self
            .call("eth_getBalance", json!([encode_hex(address.as_bytes()), "latest"]))
            .await?;
        parse_quantity(&result)
    }

    async fn token_balance(&self, address: Address) -> Result<U256, GatewayError> {
        let data = TokenCall::BalanceOf { owner: address }.encode();
        let bytes = self.eth_call(self.config.token_address, data).await?;
        if bytes.len() < 32 {
            return Err(GatewayError::InvalidResponse("balanceOf returned short data".into()));
        }
        Ok(U256::from_big_endian(&bytes[..32]))
    }
}
