use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonrpsee::core::ClientError;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{RpcClient, call_error, encode_params};
use crate::ledger::cadence::{self, CadenceValue, DecodeError};
use crate::ledger::{
    LedgerMutation, LedgerQuery, QueryError, SubmissionError, TerminalStatus, TransactionDescriptor,
    TransactionHandle, WalletProvider,
};
use crate::models::{Address, CreatorRecord, TipEvent, TokenAmount};

const STATUS_SEALED: u8 = 4;
const STATUS_EXPIRED: u8 = 5;

/// Read path and finality tracking against a Flow access node.
pub struct FlowAccessClient {
    rpc: RpcClient,
    contract: Address,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ScriptResponse {
    value: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResultResponse {
    status: u8,
    #[serde(default)]
    error_message: String,
}

impl FlowAccessClient {
    pub fn new(rpc: RpcClient, contract: Address, poll_interval: Duration) -> Self {
        assert!(
            poll_interval >= Duration::from_millis(100),
            "Finality poll interval must be >= 100ms"
        );
        Self {
            rpc,
            contract,
            poll_interval,
        }
    }

    async fn execute(
        &self,
        script: &'static str,
        template: &str,
        arguments: Vec<CadenceValue>,
    ) -> Result<CadenceValue, QueryError> {
        let source = cadence::bind(template, &self.contract);
        let encoded_args = arguments
            .iter()
            .map(encode_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| QueryError::Malformed { script, reason })?;
        let params = encode_params([
            ("script", json!(STANDARD.encode(source))),
            ("arguments", json!(encoded_args)),
        ])
        .map_err(|reason| QueryError::Malformed { script, reason })?;

        let response: ScriptResponse = self
            .rpc
            .call("flow_executeScript", params)
            .await
            .map_err(|err| script_error(script, &err))?;
        debug!("Script {script} returned {} bytes", response.value.len());
        decode_value(&response.value).map_err(|reason| QueryError::Malformed { script, reason })
    }

    async fn fetch_result(&self, id: &str) -> Result<TransactionResultResponse, ClientError> {
        let params = encode_params([("id", json!(id))])
            .map_err(ClientError::Custom)?;
        self.rpc.call("flow_getTransactionResult", params).await
    }
}

fn malformed(script: &'static str) -> impl Fn(DecodeError) -> QueryError {
    move |err| QueryError::Malformed {
        script,
        reason: err.to_string(),
    }
}

fn encode_value(value: &CadenceValue) -> Result<String, String> {
    serde_json::to_vec(value)
        .map(|bytes| STANDARD.encode(bytes))
        .map_err(|err| format!("Failed to encode argument: {err}"))
}

fn decode_value(encoded: &str) -> Result<CadenceValue, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| format!("value is not base64: {err}"))?;
    serde_json::from_slice(&bytes).map_err(|err| format!("value is not JSON-Cadence: {err}"))
}

/// A script that panics while borrowing the creator capability surfaces as
/// an RPC error; keep that apart from plain transport failures.
fn script_error(script: &'static str, err: &ClientError) -> QueryError {
    if let Some((_, message)) = call_error(err) {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("borrow") || lowered.contains("capability") {
            return QueryError::Capability {
                script,
                reason: message.to_string(),
            };
        }
    }
    QueryError::Transport {
        script,
        reason: err.to_string(),
    }
}

fn terminal_status(result: &TransactionResultResponse) -> Option<TerminalStatus> {
    if !result.error_message.is_empty() {
        return Some(TerminalStatus::Rejected(result.error_message.clone()));
    }
    match result.status {
        STATUS_SEALED => Some(TerminalStatus::Sealed),
        STATUS_EXPIRED => Some(TerminalStatus::Expired),
        _ => None,
    }
}

#[async_trait]
impl LedgerQuery for FlowAccessClient {
    async fn query_registry_membership(&self, address: &Address) -> Result<bool, QueryError> {
        const SCRIPT: &str = "is_registered";
        self.execute(SCRIPT, cadence::IS_REGISTERED, vec![CadenceValue::address(address)])
            .await?
            .into_bool()
            .map_err(malformed(SCRIPT))
    }

    async fn query_resource_exists(&self, address: &Address) -> Result<bool, QueryError> {
        const SCRIPT: &str = "has_creator_resource";
        self.execute(
            SCRIPT,
            cadence::HAS_CREATOR_RESOURCE,
            vec![CadenceValue::address(address)],
        )
        .await?
        .into_bool()
        .map_err(malformed(SCRIPT))
    }

    async fn query_creator_record(&self, address: &Address) -> Result<Option<CreatorRecord>, QueryError> {
        const SCRIPT: &str = "get_creator";
        let value = self
            .execute(SCRIPT, cadence::GET_CREATOR, vec![CadenceValue::address(address)])
            .await?;
        let record = cadence::decode_creator(value).map_err(malformed(SCRIPT))?;
        if let Some(record) = &record {
            if &record.address != address {
                return Err(QueryError::Malformed {
                    script: SCRIPT,
                    reason: format!("record for {} returned for {address}", record.address),
                });
            }
        }
        Ok(record)
    }

    async fn query_tip_history(&self, address: &Address) -> Result<Vec<TipEvent>, QueryError> {
        const SCRIPT: &str = "get_tip_history";
        let value = self
            .execute(SCRIPT, cadence::GET_TIP_HISTORY, vec![CadenceValue::address(address)])
            .await?;
        cadence::decode_tips(value).map_err(malformed(SCRIPT))
    }

    async fn query_creators(&self) -> Result<Vec<CreatorRecord>, QueryError> {
        const SCRIPT: &str = "get_creators";
        let value = self.execute(SCRIPT, cadence::GET_CREATORS, Vec::new()).await?;
        cadence::decode_creators(value).map_err(malformed(SCRIPT))
    }

    async fn query_withdrawable_balance(&self, address: &Address) -> Result<TokenAmount, QueryError> {
        const SCRIPT: &str = "get_withdrawable_balance";
        self.execute(
            SCRIPT,
            cadence::GET_WITHDRAWABLE_BALANCE,
            vec![CadenceValue::address(address)],
        )
        .await?
        .into_amount()
        .map_err(malformed(SCRIPT))
    }

    async fn query_account_balance(&self, address: &Address) -> Result<TokenAmount, QueryError> {
        const SCRIPT: &str = "get_account_balance";
        self.execute(
            SCRIPT,
            cadence::GET_ACCOUNT_BALANCE,
            vec![CadenceValue::address(address)],
        )
        .await?
        .into_amount()
        .map_err(malformed(SCRIPT))
    }
}

#[async_trait]
impl LedgerMutation for FlowAccessClient {
    async fn submit(
        &self,
        transaction: &TransactionDescriptor,
        signer: &dyn WalletProvider,
    ) -> Result<TransactionHandle, SubmissionError> {
        assert!(
            transaction.compute_limit > 0,
            "Transaction compute limit must be positive"
        );
        signer.sign_and_send(transaction).await
    }

    async fn await_finality(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> Result<TerminalStatus, SubmissionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.fetch_result(&handle.id).await {
                Ok(result) => {
                    if let Some(status) = terminal_status(&result) {
                        return Ok(status);
                    }
                    debug!("Transaction {} at status {}", handle.id, result.status);
                }
                Err(err) => warn!("Transaction {} status poll failed: {err}", handle.id),
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(SubmissionError::Timeout);
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use jsonrpsee::types::ErrorObjectOwned;

    use super::*;

    fn rpc_error(message: &str) -> ClientError {
        ClientError::Call(ErrorObjectOwned::owned(-32000, message.to_string(), None::<()>))
    }

    #[test]
    fn capability_panics_are_classified_apart_from_transport() {
        let err = script_error(
            "get_creator",
            &rpc_error("panic: Could not borrow creator capability"),
        );
        assert!(matches!(err, QueryError::Capability { script: "get_creator", .. }));

        let err = script_error("get_creator", &rpc_error("access node overloaded"));
        assert!(matches!(err, QueryError::Transport { .. }));

        let err = script_error("get_creator", &ClientError::RequestTimeout);
        assert!(matches!(err, QueryError::Transport { .. }));
    }

    #[test]
    fn error_message_wins_over_status() {
        let rejected = TransactionResultResponse {
            status: STATUS_SEALED,
            error_message: "[Error Code: 1101] unauthorized".to_string(),
        };
        assert_eq!(
            terminal_status(&rejected),
            Some(TerminalStatus::Rejected("[Error Code: 1101] unauthorized".to_string()))
        );

        let pending = TransactionResultResponse {
            status: 2,
            error_message: String::new(),
        };
        assert_eq!(terminal_status(&pending), None);

        let expired = TransactionResultResponse {
            status: STATUS_EXPIRED,
            error_message: String::new(),
        };
        assert_eq!(terminal_status(&expired), Some(TerminalStatus::Expired));
    }

    #[tokio::test]
    async fn finality_polling_stops_at_deadline() {
        let rpc = RpcClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let client = FlowAccessClient::new(
            rpc,
            Address::parse("0x6c1b12e35dca8863").unwrap(),
            Duration::from_millis(100),
        );
        let handle = TransactionHandle {
            id: "4a1d".to_string(),
        };

        let started = Instant::now();
        let err = client
            .await_finality(&handle, Duration::from_millis(350))
            .await
            .unwrap_err();
        assert_eq!(err, SubmissionError::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn script_values_decode_from_base64_json() {
        let encoded = STANDARD.encode(r#"{"type":"Bool","value":true}"#);
        assert_eq!(decode_value(&encoded).unwrap(), CadenceValue::Bool(true));
        assert!(decode_value("not base64!").is_err());

        let argument = encode_value(&CadenceValue::UFix64("1.00000000".to_string())).unwrap();
        let round = String::from_utf8(STANDARD.decode(argument).unwrap()).unwrap();
        assert_eq!(round, r#"{"type":"UFix64","value":"1.00000000"}"#);
    }
}
