//! Collaborator interfaces the service drives: read-only ledger queries,
//! transaction submission with finality tracking, and the wallet that signs.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Address, CreatorProfile, CreatorRecord, TipEvent, TokenAmount, WalletIdentity};

pub mod cadence;

use cadence::CadenceValue;

const REGISTER_COMPUTE_LIMIT: u64 = 9_999;
const FIX_REGISTRY_COMPUTE_LIMIT: u64 = 50_000;
const TRANSFER_COMPUTE_LIMIT: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("ledger query {script} failed: {reason}")]
    Transport { script: &'static str, reason: String },
    /// The script ran but could not borrow the creator capability.
    #[error("ledger query {script} could not borrow the creator capability: {reason}")]
    Capability { script: &'static str, reason: String },
    #[error("ledger query {script} returned a malformed response: {reason}")]
    Malformed { script: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("transaction signing was declined in the wallet")]
    UserCancelled,
    #[error("transaction did not reach finality in time")]
    Timeout,
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("transaction failed: {0}")]
    Unknown(String),
}

const GENERIC_REJECTION: &str = "transaction rejected";

impl SubmissionError {
    /// Rejection with the ledger's reason, or a generic one when it gave none.
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Self::TransactionRejected(GENERIC_REJECTION.to_string());
        }
        Self::TransactionRejected(reason)
    }

    /// Short, never blank reason for display and repair records.
    pub fn reason(&self) -> String {
        match self {
            Self::UserCancelled => "cancelled".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::TransactionRejected(reason) | Self::Unknown(reason) if !reason.trim().is_empty() => {
                reason.clone()
            }
            Self::TransactionRejected(_) => GENERIC_REJECTION.to_string(),
            Self::Unknown(_) => "transaction failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet bridge request failed: {0}")]
    Transport(String),
    #[error("wallet authentication was declined")]
    Declined,
    #[error("wallet bridge returned a malformed identity: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    RegisterCreator,
    UpdateProfile,
    FixRegistry,
    SendTip,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterCreator => "register_creator",
            Self::UpdateProfile => "update_profile",
            Self::FixRegistry => "fix_registry",
            Self::SendTip => "send_tip",
            Self::Withdraw => "withdraw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescriptor {
    pub kind: TransactionKind,
    pub cadence: String,
    pub arguments: Vec<CadenceValue>,
    pub compute_limit: u64,
}

impl TransactionDescriptor {
    pub fn register_creator(contract: &Address, profile: &CreatorProfile) -> Self {
        Self {
            kind: TransactionKind::RegisterCreator,
            cadence: cadence::bind(cadence::REGISTER_CREATOR, contract),
            arguments: profile_arguments(profile),
            compute_limit: REGISTER_COMPUTE_LIMIT,
        }
    }

    pub fn update_profile(contract: &Address, profile: &CreatorProfile) -> Self {
        Self {
            kind: TransactionKind::UpdateProfile,
            cadence: cadence::bind(cadence::UPDATE_PROFILE, contract),
            arguments: profile_arguments(profile),
            compute_limit: REGISTER_COMPUTE_LIMIT,
        }
    }

    pub fn fix_registry(contract: &Address) -> Self {
        Self {
            kind: TransactionKind::FixRegistry,
            cadence: cadence::bind(cadence::FIX_REGISTRY, contract),
            arguments: Vec::new(),
            compute_limit: FIX_REGISTRY_COMPUTE_LIMIT,
        }
    }

    pub fn send_tip(contract: &Address, recipient: &Address, amount: TokenAmount, message: &str) -> Self {
        Self {
            kind: TransactionKind::SendTip,
            cadence: cadence::bind(cadence::SEND_TIP, contract),
            arguments: vec![
                CadenceValue::address(recipient),
                CadenceValue::amount(amount),
                CadenceValue::string(message),
            ],
            compute_limit: TRANSFER_COMPUTE_LIMIT,
        }
    }

    pub fn withdraw(contract: &Address, amount: TokenAmount) -> Self {
        Self {
            kind: TransactionKind::Withdraw,
            cadence: cadence::bind(cadence::WITHDRAW, contract),
            arguments: vec![CadenceValue::amount(amount)],
            compute_limit: TRANSFER_COMPUTE_LIMIT,
        }
    }
}

fn profile_arguments(profile: &CreatorProfile) -> Vec<CadenceValue> {
    vec![
        CadenceValue::string(&profile.display_name),
        CadenceValue::string(&profile.description),
        CadenceValue::string(&profile.image_url),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Sealed,
    Expired,
    Rejected(String),
}

#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn query_registry_membership(&self, address: &Address) -> Result<bool, QueryError>;

    async fn query_resource_exists(&self, address: &Address) -> Result<bool, QueryError>;

    async fn query_creator_record(&self, address: &Address) -> Result<Option<CreatorRecord>, QueryError>;

    /// Newest first. Each call re-fetches the full history.
    async fn query_tip_history(&self, address: &Address) -> Result<Vec<TipEvent>, QueryError>;

    async fn query_creators(&self) -> Result<Vec<CreatorRecord>, QueryError>;

    async fn query_withdrawable_balance(&self, address: &Address) -> Result<TokenAmount, QueryError>;

    async fn query_account_balance(&self, address: &Address) -> Result<TokenAmount, QueryError>;
}

#[async_trait]
pub trait LedgerMutation: Send + Sync {
    async fn submit(
        &self,
        transaction: &TransactionDescriptor,
        signer: &dyn WalletProvider,
    ) -> Result<TransactionHandle, SubmissionError>;

    async fn await_finality(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> Result<TerminalStatus, SubmissionError>;
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn connect(&self) -> Result<WalletIdentity, WalletError>;

    async fn disconnect(&self) -> Result<(), WalletError>;

    async fn current_identity(&self) -> Result<WalletIdentity, WalletError>;

    async fn sign_and_send(
        &self,
        transaction: &TransactionDescriptor,
    ) -> Result<TransactionHandle, SubmissionError>;
}

/// Blocks until `handle` is sealed or `timeout` passes. Never resubmits.
pub async fn await_sealed(
    mutations: &dyn LedgerMutation,
    handle: &TransactionHandle,
    timeout: Duration,
) -> Result<(), SubmissionError> {
    assert!(!handle.id.is_empty(), "Transaction handle must carry an id");
    let status = match tokio::time::timeout(timeout, mutations.await_finality(handle, timeout)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("Transaction {} not sealed within {timeout:?}", handle.id);
            return Err(SubmissionError::Timeout);
        }
    };

    match status {
        TerminalStatus::Sealed => {
            info!("Transaction {} sealed", handle.id);
            Ok(())
        }
        TerminalStatus::Expired => {
            warn!("Transaction {} expired before sealing", handle.id);
            Err(SubmissionError::rejected("transaction expired before sealing"))
        }
        TerminalStatus::Rejected(reason) => {
            warn!("Transaction {} rejected: {reason}", handle.id);
            Err(SubmissionError::rejected(reason))
        }
    }
}

/// Guidance for well-known ledger failure messages. The reason itself is
/// always surfaced verbatim alongside.
pub fn rejection_hint(reason: &str) -> Option<&'static str> {
    let lowered = reason.to_ascii_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("1101") {
        Some("Transaction authorization failed. Please check your wallet connection and try again.")
    } else if lowered.contains("insufficient") {
        Some("Insufficient balance for this transaction.")
    } else if lowered.contains("could not borrow") {
        Some("Creator resource not found. Please ensure your creator profile is properly set up.")
    } else if lowered.contains("expired") {
        Some("The transaction expired before it was sealed. It is safe to try again.")
    } else {
        None
    }
}
