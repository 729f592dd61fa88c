use std::time::Duration;

use anyhow::{Context, Result};
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;

mod flow;
mod wallet;

pub use flow::FlowAccessClient;
pub use wallet::WalletBridge;

#[derive(Clone)]
pub struct RpcClient {
    inner: HttpClient,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        assert!(
            self.timeout >= Duration::from_millis(100),
            "Timeout invariant broken"
        );
        assert!(
            self.timeout <= Duration::from_secs(60),
            "Timeout exceeds maximum bound"
        );
        self.timeout
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: ObjectParams,
    ) -> Result<R, ClientError> {
        self.inner.request(method, params).await
    }
}

/// Error code and message of a JSON-RPC error response, if that is what
/// failed.
fn call_error(err: &ClientError) -> Option<(i32, &str)> {
    match err {
        ClientError::Call(object) => Some((object.code(), object.message())),
        _ => None,
    }
}

fn encode_params<'a>(
    entries: impl IntoIterator<Item = (&'a str, serde_json::Value)>,
) -> Result<ObjectParams, String> {
    let mut params = ObjectParams::new();
    for (name, value) in entries {
        params
            .insert(name, value)
            .map_err(|err| format!("Failed to encode {name} parameter: {err}"))?;
    }
    Ok(params)
}
