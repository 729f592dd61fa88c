use async_trait::async_trait;
use jsonrpsee::core::ClientError;
use jsonrpsee::core::params::ObjectParams;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{RpcClient, call_error, encode_params};
use crate::ledger::{SubmissionError, TransactionDescriptor, TransactionHandle, WalletError, WalletProvider};
use crate::models::{Address, WalletIdentity};

/// Error code the bridge uses when the user dismisses a wallet prompt.
const USER_REJECTED: i32 = 4001;

/// JSON-RPC bridge to the user's wallet: authentication and signing.
pub struct WalletBridge {
    rpc: RpcClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUser {
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    logged_in: bool,
}

#[derive(Debug, Deserialize)]
struct SignAndSendResponse {
    transaction_id: String,
}

impl WalletBridge {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    async fn fetch_user(&self, method: &str) -> Result<WalletIdentity, WalletError> {
        let user: CurrentUser = self
            .rpc
            .call(method, ObjectParams::new())
            .await
            .map_err(wallet_error)?;
        identity_from(user)
    }
}

fn identity_from(user: CurrentUser) -> Result<WalletIdentity, WalletError> {
    match (user.logged_in, user.addr) {
        (true, Some(raw)) => Address::parse(&raw)
            .map(WalletIdentity::connected)
            .map_err(|err| WalletError::Malformed(format!("{raw:?}: {err}"))),
        (true, None) => Err(WalletError::Malformed(
            "logged in without an address".to_string(),
        )),
        (false, _) => Ok(WalletIdentity::disconnected()),
    }
}

fn wallet_error(err: ClientError) -> WalletError {
    match call_error(&err) {
        Some((USER_REJECTED, _)) => WalletError::Declined,
        _ => WalletError::Transport(err.to_string()),
    }
}

fn submission_error(err: ClientError) -> SubmissionError {
    match call_error(&err) {
        Some((USER_REJECTED, _)) => SubmissionError::UserCancelled,
        Some((_, message)) => SubmissionError::rejected(message),
        None => SubmissionError::Unknown(err.to_string()),
    }
}

#[async_trait]
impl WalletProvider for WalletBridge {
    async fn connect(&self) -> Result<WalletIdentity, WalletError> {
        let identity = self.fetch_user("wallet_authenticate").await?;
        if identity.active_address().is_none() {
            return Err(WalletError::Declined);
        }
        Ok(identity)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .rpc
            .call("wallet_unauthenticate", ObjectParams::new())
            .await
            .map_err(wallet_error)?;
        info!("Wallet bridge session closed");
        Ok(())
    }

    async fn current_identity(&self) -> Result<WalletIdentity, WalletError> {
        self.fetch_user("wallet_currentUser").await
    }

    async fn sign_and_send(
        &self,
        transaction: &TransactionDescriptor,
    ) -> Result<TransactionHandle, SubmissionError> {
        let params = encode_params([
            ("cadence", json!(transaction.cadence)),
            ("arguments", json!(transaction.arguments)),
            ("compute_limit", json!(transaction.compute_limit)),
        ])
        .map_err(SubmissionError::Unknown)?;

        let response: SignAndSendResponse = self
            .rpc
            .call("wallet_signAndSend", params)
            .await
            .map_err(submission_error)?;
        if response.transaction_id.is_empty() {
            return Err(SubmissionError::Unknown(
                "wallet returned an empty transaction id".to_string(),
            ));
        }
        debug!(
            "Wallet signed {} as {}",
            transaction.kind.as_str(),
            response.transaction_id
        );
        Ok(TransactionHandle {
            id: response.transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use jsonrpsee::types::ErrorObjectOwned;

    use super::*;

    fn rpc_error(code: i32, message: &str) -> ClientError {
        ClientError::Call(ErrorObjectOwned::owned(code, message.to_string(), None::<()>))
    }

    #[test]
    fn user_rejection_maps_to_cancel() {
        assert_eq!(
            submission_error(rpc_error(USER_REJECTED, "User rejected")),
            SubmissionError::UserCancelled
        );
        assert_eq!(
            wallet_error(rpc_error(USER_REJECTED, "User rejected")),
            WalletError::Declined
        );
        assert_eq!(
            submission_error(rpc_error(-32000, "payer has insufficient balance")),
            SubmissionError::TransactionRejected("payer has insufficient balance".to_string())
        );
        assert!(matches!(
            submission_error(ClientError::RequestTimeout),
            SubmissionError::Unknown(_)
        ));
        assert_eq!(
            submission_error(rpc_error(-32000, "")),
            SubmissionError::TransactionRejected("transaction rejected".to_string())
        );
    }

    #[test]
    fn identity_requires_session_and_valid_address() {
        let identity = identity_from(CurrentUser {
            addr: Some("0xAA".to_string()),
            logged_in: true,
        })
        .unwrap();
        assert_eq!(identity.active_address().unwrap().as_str(), "0x00000000000000aa");

        let logged_out = identity_from(CurrentUser {
            addr: Some("0xAA".to_string()),
            logged_in: false,
        })
        .unwrap();
        assert_eq!(logged_out, WalletIdentity::disconnected());

        assert!(matches!(
            identity_from(CurrentUser {
                addr: Some("0xZZ".to_string()),
                logged_in: true,
            }),
            Err(WalletError::Malformed(_))
        ));
    }
}
