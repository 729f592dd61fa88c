use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::SubmissionError;
use crate::models::{Address, CreatorRecord};

/// What the ledger says about an address. `Unknown` is transient and is
/// never treated as `NotACreator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CreatorRegistrationState {
    NotACreator,
    FullyRegistered { record: CreatorRecord },
    /// Resource present but the registry does not list the address.
    NeedsRepair { address: Address },
    Unknown,
}

impl CreatorRegistrationState {
    pub fn is_fully_registered(&self) -> bool {
        matches!(self, Self::FullyRegistered { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotACreator => "not_a_creator",
            Self::FullyRegistered { .. } => "fully_registered",
            Self::NeedsRepair { .. } => "needs_repair",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "registration", rename_all = "snake_case")]
pub enum ControllerPhase {
    Disconnected,
    Classifying,
    Settled(CreatorRegistrationState),
    Repairing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Lives from the moment a repair is requested until the UI acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairAttempt {
    pub started_at: DateTime<Utc>,
    pub status: RepairStatus,
    pub error_reason: Option<String>,
}

impl RepairAttempt {
    pub fn pending() -> Self {
        Self {
            started_at: Utc::now(),
            status: RepairStatus::Pending,
            error_reason: None,
        }
    }

    pub fn succeeded(self) -> Self {
        Self {
            status: RepairStatus::Succeeded,
            error_reason: None,
            ..self
        }
    }

    pub fn failed(self, reason: impl Into<String>) -> Self {
        Self {
            status: RepairStatus::Failed,
            error_reason: Some(reason.into()),
            ..self
        }
    }
}

/// Read-only snapshot handed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerView {
    pub address: Option<Address>,
    #[serde(flatten)]
    pub phase: ControllerPhase,
    pub last_repair: Option<RepairAttempt>,
    #[serde(skip)]
    pub generation: u64,
}

impl ControllerView {
    pub fn disconnected(generation: u64) -> Self {
        Self {
            address: None,
            phase: ControllerPhase::Disconnected,
            last_repair: None,
            generation,
        }
    }

    pub fn registration(&self) -> Option<&CreatorRegistrationState> {
        match &self.phase {
            ControllerPhase::Settled(state) => Some(state),
            _ => None,
        }
    }

    pub fn needs_fix(&self) -> bool {
        matches!(
            self.registration(),
            Some(CreatorRegistrationState::NeedsRepair { .. })
        )
    }
}

/// Result of an operation that mutates registration and then waits for
/// the read path to agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Precondition did not hold; nothing was submitted.
    NotApplicable,
    Converged(CreatorRecord),
    /// Sealed, but re-classification never observed the expected state.
    Unconfirmed(CreatorRegistrationState),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("another registration operation for {0} is still in flight")]
    InFlight(Address),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
