use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;
use uuid::Uuid;
use vg_api_types::ProviderInfo;
use vg_provider::{
    EventSink, ProviderCapabilities, ProviderError, ProviderRecord, Subscription, WalletProvider,
    methods,
};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const RPC_RDNS: &str = "local.jsonrpc";

/// Wallet provider backed by a plain JSON-RPC node (anvil, hardhat, geth --dev).
///
/// Nodes have no permission prompt, so `eth_requestAccounts` is sent as
/// `eth_accounts`. Nodes push no events and cannot switch chains or revoke
/// permissions; capabilities say so.
///
/// Reads `VG_RPC_URL` from environment when no endpoint is given
/// (default: `http://127.0.0.1:8545`).
pub struct JsonRpcProvider {
    info: ProviderInfo,
    endpoint: String,
    http: reqwest::Client,
    next_id: Cell<u64>,
}

impl JsonRpcProvider {
    pub fn new(name: impl Into<String>, endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("VG_RPC_URL").ok())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        Self {
            info: ProviderInfo {
                uuid: Uuid::new_v4().to_string(),
                name: name.into(),
                icon: String::new(),
                rdns: RPC_RDNS.to_owned(),
            },
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: Cell::new(1),
        }
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn into_record(self) -> ProviderRecord {
        let info = self.info.clone();
        ProviderRecord::new(info, Rc::new(self))
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        id
    }
}

// ── JSON-RPC 2.0 envelopes ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn wire_method(method: &str) -> &str {
    match method {
        methods::REQUEST_ACCOUNTS => methods::ACCOUNTS,
        other => other,
    }
}

#[async_trait(?Send)]
impl WalletProvider for JsonRpcProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: wire_method(method),
            params: &params,
        };
        debug!("json-rpc {} -> {}", body.method, self.endpoint);

        let transport = |message: String| ProviderError::Transport {
            method: method.to_owned(),
            message,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        let parsed = match serde_json::from_str::<RpcResponse>(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(transport(format!("HTTP {status}: {text}")));
            }
            Err(err) => {
                return Err(ProviderError::invalid_response(
                    method,
                    format!("{err}: {text}"),
                ));
            }
        };

        match parsed.error {
            Some(error) => Err(ProviderError::rejected(method, error.code, error.message, error.data)),
            None => Ok(parsed.result),
        }
    }

    fn subscribe(&self, _sink: EventSink) -> Subscription {
        Subscription::noop()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::request_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::json;
    use std::net::SocketAddr;

    async fn node(Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let reply = match request["method"].as_str() {
            Some("eth_accounts") => json!({
                "jsonrpc": "2.0", "id": id,
                "result": ["0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"]
            }),
            Some("eth_chainId") => json!({ "jsonrpc": "2.0", "id": id, "result": "0x7a69" }),
            Some("echo_params") => json!({ "jsonrpc": "2.0", "id": id, "result": request["params"] }),
            _ => json!({
                "jsonrpc": "2.0", "id": id,
                "error": { "code": -32601, "message": "Method not found", "data": { "hint": "anvil" } }
            }),
        };
        Json(reply)
    }

    async fn spawn_node() -> anyhow::Result<String> {
        let app = Router::new().route("/", post(node));
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/"))
    }

    #[tokio::test]
    async fn request_accounts_maps_to_eth_accounts() -> anyhow::Result<()> {
        let endpoint = spawn_node().await?;
        let provider = JsonRpcProvider::new("Local Node", Some(endpoint));

        let accounts = provider.request(methods::REQUEST_ACCOUNTS, json!([])).await?;
        assert_eq!(accounts, json!(["0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"]));

        let chain = provider.request(methods::CHAIN_ID, json!([])).await?;
        assert_eq!(chain, json!("0x7a69"));

        let echoed = provider.request("echo_params", json!([{ "chainId": "0x1" }])).await?;
        assert_eq!(echoed, json!([{ "chainId": "0x1" }]));
        Ok(())
    }

    #[tokio::test]
    async fn rpc_errors_keep_their_payload() -> anyhow::Result<()> {
        let endpoint = spawn_node().await?;
        let provider = JsonRpcProvider::new("Local Node", Some(endpoint));

        let err = provider
            .request(methods::REVOKE_PERMISSIONS, json!([{ "eth_accounts": {} }]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::rejected(
                methods::REVOKE_PERMISSIONS,
                -32601,
                "Method not found",
                Some(json!({ "hint": "anvil" })),
            )
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transport_error() {
        let provider = JsonRpcProvider::new("Offline", Some("http://127.0.0.1:9/".to_owned()));
        let err = provider.request(methods::CHAIN_ID, json!([])).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[test]
    fn record_reports_request_only_capabilities() {
        let provider = JsonRpcProvider::new("Local Node", Some("http://127.0.0.1:8545/".to_owned()));
        assert_eq!(provider.endpoint(), "http://127.0.0.1:8545");
        let record = provider.into_record();
        assert_eq!(record.info.rdns, RPC_RDNS);
        assert_eq!(record.capabilities, ProviderCapabilities::request_only());
    }
}
