//! Tip and withdrawal submission.
//!
//! Amounts are validated locally before any ledger round trip. A sealed
//! transfer only tells the caller which creator record to re-read; nothing
//! here adjusts balances or counters locally, and nothing is ever resubmitted
//! automatically since transfers are not idempotent.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ledger::{
    LedgerMutation, LedgerQuery, QueryError, SubmissionError, TransactionDescriptor,
    WalletProvider, await_sealed,
};
use crate::models::{Address, TokenAmount, WalletIdentity};
use crate::state::ApiCache;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("wallet is not connected")]
    NotConnected,
    #[error("recipient {0} does not have a creator profile")]
    RecipientNotCreator(Address),
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: TokenAmount,
        requested: TokenAmount,
    },
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountBounds {
    pub minimum: TokenAmount,
    pub maximum: Option<TokenAmount>,
}

impl AmountBounds {
    pub fn validate(&self, raw: &str) -> Result<TokenAmount, TransferError> {
        let amount: TokenAmount = raw
            .parse()
            .map_err(|err: crate::models::AmountError| TransferError::InvalidAmount(err.to_string()))?;
        if amount.is_zero() {
            return Err(TransferError::InvalidAmount(
                "amount must be greater than 0".to_string(),
            ));
        }
        if amount < self.minimum {
            return Err(TransferError::InvalidAmount(format!(
                "minimum amount is {}",
                self.minimum.format_balance()
            )));
        }
        if let Some(maximum) = self.maximum {
            if amount > maximum {
                return Err(TransferError::InvalidAmount(format!(
                    "maximum amount is {}",
                    maximum.format_balance()
                )));
            }
        }
        Ok(amount)
    }
}

/// Returned once a transfer is sealed. `refresh` names the creator whose
/// record must be re-read to observe the new balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub transaction_id: String,
    pub amount: TokenAmount,
    pub refresh: Address,
}

pub struct TransferService {
    ledger: Arc<dyn LedgerQuery>,
    mutations: Arc<dyn LedgerMutation>,
    signer: Arc<dyn WalletProvider>,
    cache: Arc<ApiCache>,
    contract: Address,
    identity: watch::Receiver<WalletIdentity>,
    tip_bounds: AmountBounds,
    withdraw_bounds: AmountBounds,
    max_message_len: usize,
    finality_timeout: Duration,
}

pub struct TransferLimits {
    pub tip_bounds: AmountBounds,
    pub withdraw_minimum: TokenAmount,
    pub max_message_len: usize,
    pub finality_timeout: Duration,
}

impl TransferService {
    pub fn new(
        ledger: Arc<dyn LedgerQuery>,
        mutations: Arc<dyn LedgerMutation>,
        signer: Arc<dyn WalletProvider>,
        cache: Arc<ApiCache>,
        contract: Address,
        identity: watch::Receiver<WalletIdentity>,
        limits: TransferLimits,
    ) -> Self {
        assert!(
            !limits.tip_bounds.minimum.is_zero(),
            "Tip minimum must be positive"
        );
        Self {
            ledger,
            mutations,
            signer,
            cache,
            contract,
            identity,
            tip_bounds: limits.tip_bounds,
            withdraw_bounds: AmountBounds {
                minimum: limits.withdraw_minimum,
                maximum: None,
            },
            max_message_len: limits.max_message_len,
            finality_timeout: limits.finality_timeout,
        }
    }

    pub async fn send_tip(
        &self,
        recipient: &Address,
        raw_amount: &str,
        message: &str,
    ) -> Result<TransferReceipt, TransferError> {
        let amount = self.tip_bounds.validate(raw_amount)?;
        let message = message.trim();
        if message.chars().count() > self.max_message_len {
            return Err(TransferError::MessageTooLong(self.max_message_len));
        }
        let sender = self.connected_address()?;

        if !self.ledger.query_resource_exists(recipient).await? {
            return Err(TransferError::RecipientNotCreator(recipient.clone()));
        }
        match self.ledger.query_account_balance(&sender).await {
            Ok(available) if available < amount => {
                return Err(TransferError::InsufficientBalance {
                    available,
                    requested: amount,
                });
            }
            Ok(_) => {}
            Err(err) => warn!("Could not check balance of {sender}: {err}"),
        }

        let transaction = TransactionDescriptor::send_tip(&self.contract, recipient, amount, message);
        let transaction_id = self.submit_and_seal(recipient, &transaction).await?;
        info!(
            "Tip of {} from {sender} to {recipient} sealed in {transaction_id}",
            amount.format_balance()
        );
        Ok(TransferReceipt {
            transaction_id,
            amount,
            refresh: recipient.clone(),
        })
    }

    pub async fn withdraw(&self, raw_amount: &str) -> Result<TransferReceipt, TransferError> {
        let amount = self.withdraw_bounds.validate(raw_amount)?;
        let creator = self.connected_address()?;

        let available = self.ledger.query_withdrawable_balance(&creator).await?;
        if amount > available {
            return Err(TransferError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let transaction = TransactionDescriptor::withdraw(&self.contract, amount);
        let transaction_id = self.submit_and_seal(&creator, &transaction).await?;
        info!(
            "Withdrawal of {} by {creator} sealed in {transaction_id}",
            amount.format_balance()
        );
        Ok(TransferReceipt {
            transaction_id,
            amount,
            refresh: creator,
        })
    }

    fn connected_address(&self) -> Result<Address, TransferError> {
        self.identity
            .borrow()
            .active_address()
            .cloned()
            .ok_or(TransferError::NotConnected)
    }

    async fn submit_and_seal(
        &self,
        affected: &Address,
        transaction: &TransactionDescriptor,
    ) -> Result<String, SubmissionError> {
        let handle = self
            .mutations
            .submit(transaction, self.signer.as_ref())
            .await?;
        info!("Submitted {} as {}", transaction.kind.as_str(), handle.id);
        self.cache.invalidate_creator(affected).await;
        let sealed = await_sealed(self.mutations.as_ref(), &handle, self.finality_timeout).await;
        self.cache.invalidate_creator(affected).await;
        sealed.map(|()| handle.id)
    }
}
