use std::num::NonZeroU32;
use std::path::Path;

use async_trait::async_trait;
use bitcoin::BlockHash;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{CoreError, RpcError};

use super::super::methods;
use super::super::types::{
    BlockInfo, BlockTemplate, BlockchainInfo, ChainTxStats, FeeEstimate, MempoolInfo, NetTotals,
    NetworkInfo, PeerInfo,
};
use super::super::{NodeRpc, FEE_ESTIMATE_MODE};
use super::connection::{endpoint_url, resolve_credentials, Credentials};
use super::protocol::{parse_jsonrpc_error, JsonRpcRequest, JsonRpcResponse, REQUEST_ID};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bitcoin Core JSON-RPC client over HTTP(S).
///
/// One HTTP POST per call. A non-200 status fails the call as a transport
/// error without looking at the body. No retries and no request timeout
/// beyond the HTTP stack defaults.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
    limiter: Option<DirectRateLimiter>,
}

impl HttpRpcClient {
    /// Create a new client for `host:port`.
    ///
    /// `host` may carry a scheme (`http://` or `https://`); `http` is implied
    /// otherwise.
    ///
    /// Authentication precedence:
    /// 1. cookie file (`username:password`), re-read on every call
    /// 2. explicit `user` + `pass`
    /// 3. no auth
    ///
    /// If `requests_per_second` is set, outbound requests are rate-limited.
    pub fn new(
        host: &str,
        port: u16,
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
        requests_per_second: Option<u32>,
    ) -> Result<Self, CoreError> {
        let credentials = resolve_credentials(user, pass, cookie_file)?;
        let url = endpoint_url(host, port)?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .tcp_nodelay(true)
            .build()
            .map_err(RpcError::Transport)?;

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidConfig("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            url,
            credentials,
            limiter,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        let auth = self.credentials.resolve()?;
        self.wait_for_rate_limit().await;
        debug!(rpc.method = method, rpc.params = params.len(), "rpc call");
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: REQUEST_ID,
            method,
            params,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&req);
        if let Some((ref user, ref pass)) = auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            debug!(rpc.method = method, %status, "rpc rejected by transport");
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.text().await.map_err(RpcError::Transport)?;
        debug!(rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;

        if let Some(err) = decoded.error.filter(|e| !e.is_null()) {
            return Err(parse_jsonrpc_error(err));
        }

        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, CoreError> {
        let raw = self.rpc_call(method, params).await?;
        serde_json::from_value(raw)
            .map_err(|e| CoreError::InvalidData(format!("invalid {method} result: {e}")))
    }
}

#[async_trait]
impl NodeRpc for HttpRpcClient {
    async fn uptime(&self) -> Result<u64, CoreError> {
        self.call(methods::UPTIME, Vec::new()).await
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreError> {
        self.call(methods::GET_BLOCKCHAIN_INFO, Vec::new()).await
    }

    async fn get_net_totals(&self) -> Result<NetTotals, CoreError> {
        self.call(methods::GET_NET_TOTALS, Vec::new()).await
    }

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError> {
        self.call(methods::GET_PEER_INFO, Vec::new()).await
    }

    async fn get_block_template(&self) -> Result<BlockTemplate, CoreError> {
        self.call(
            methods::GET_BLOCK_TEMPLATE,
            vec![serde_json::json!({ "rules": ["segwit"] })],
        )
        .await
    }

    async fn get_mempool_info(&self) -> Result<MempoolInfo, CoreError> {
        self.call(methods::GET_MEMPOOL_INFO, Vec::new()).await
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeEstimate, CoreError> {
        self.call(
            methods::ESTIMATE_SMART_FEE,
            vec![
                serde_json::json!(conf_target),
                serde_json::json!(FEE_ESTIMATE_MODE),
            ],
        )
        .await
    }

    async fn get_chain_tx_stats(&self) -> Result<ChainTxStats, CoreError> {
        self.call(methods::GET_CHAIN_TX_STATS, Vec::new()).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        self.call(methods::GET_BLOCK_HASH, vec![serde_json::json!(height)])
            .await
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, CoreError> {
        self.call(methods::GET_BLOCK, vec![serde_json::json!(hash.to_string())])
            .await
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, CoreError> {
        self.call(methods::GET_NETWORK_INFO, Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_zero_rate_limit() {
        let err = HttpRpcClient::new("127.0.0.1", 8332, None, None, None, Some(0))
            .err()
            .expect("zero rate limit must be rejected");
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn new_builds_endpoint_from_host_and_port() {
        let client = HttpRpcClient::new("localhost", 18443, Some("u"), Some("p"), None, None)
            .expect("client must construct");
        assert_eq!(client.url(), "http://localhost:18443/");
    }
}
