//! Creator registration consistency controller.
//!
//! Registry membership and the creator resource are checked through two
//! independent ledger paths, so an address can end up with a resource the
//! registry does not list. The controller classifies the connected address,
//! exposes a single idempotent repair, and after every sealed registration
//! mutation re-reads the ledger until the read path agrees.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::ledger::{
    LedgerMutation, LedgerQuery, QueryError, SubmissionError, TransactionDescriptor,
    WalletProvider, await_sealed,
};
use crate::models::{Address, CreatorProfile, WalletIdentity};
use crate::state::ApiCache;

mod state;

pub use state::{
    ControllerError, ControllerPhase, ControllerView, CreatorRegistrationState, ReconcileOutcome,
    RepairAttempt, RepairStatus,
};

pub struct ConsistencyController {
    ledger: Arc<dyn LedgerQuery>,
    mutations: Arc<dyn LedgerMutation>,
    signer: Arc<dyn WalletProvider>,
    cache: Arc<ApiCache>,
    contract: Address,
    settings: ControllerConfig,
    view: watch::Sender<ControllerView>,
    in_flight: Mutex<HashSet<Address>>,
    released: Notify,
}

impl ConsistencyController {
    pub fn new(
        ledger: Arc<dyn LedgerQuery>,
        mutations: Arc<dyn LedgerMutation>,
        signer: Arc<dyn WalletProvider>,
        cache: Arc<ApiCache>,
        contract: Address,
        settings: ControllerConfig,
    ) -> Self {
        assert!(
            settings.reclassify_attempts > 0,
            "At least one re-classification attempt is required"
        );
        let (view, _) = watch::channel(ControllerView::disconnected(0));
        Self {
            ledger,
            mutations,
            signer,
            cache,
            contract,
            settings,
            view,
            in_flight: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    pub fn view(&self) -> ControllerView {
        self.view.borrow().clone()
    }

    /// Follows a wallet identity change. A new address resets the view and
    /// is classified from scratch; the same address is left alone.
    pub async fn observe(&self, identity: &WalletIdentity) -> ControllerView {
        let Some(address) = identity.active_address() else {
            self.view.send_if_modified(|view| {
                if view.address.is_none() && view.phase == ControllerPhase::Disconnected {
                    return false;
                }
                *view = ControllerView::disconnected(view.generation + 1);
                debug!("Controller reset to disconnected");
                true
            });
            return self.view();
        };

        let changed = self.view.send_if_modified(|view| {
            if view.address.as_ref() == Some(address) {
                return false;
            }
            *view = ControllerView {
                address: Some(address.clone()),
                phase: ControllerPhase::Classifying,
                last_repair: None,
                generation: view.generation + 1,
            };
            true
        });

        if changed {
            info!("Tracking creator registration for {address}");
            self.classify_when_idle(address).await;
        }
        self.view()
    }

    /// Classifies `address` for the current generation, first waiting out
    /// an operation still holding the address from an earlier generation.
    async fn classify_when_idle(&self, address: &Address) {
        let generation = self.view.borrow().generation;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.view.borrow().generation != generation {
                debug!("Classification of {address} superseded");
                return;
            }
            match self.classify(address).await {
                Err(ControllerError::InFlight(_)) => {
                    debug!("Waiting for in-flight operation on {address} before classifying");
                    released.await;
                }
                Err(err) => {
                    warn!("Classification of {address} failed: {err}");
                    return;
                }
                Ok(_) => return,
            }
        }
    }

    /// Derives the registration state of `address` straight from the ledger.
    /// Updates the published view when `address` is the tracked one.
    pub async fn classify(
        &self,
        address: &Address,
    ) -> Result<CreatorRegistrationState, ControllerError> {
        let _guard = self.acquire(address)?;
        let generation = self.view.borrow().generation;
        self.publish(address, generation, |view| {
            view.phase = ControllerPhase::Classifying;
        });

        let state = self.derive_state(address).await;
        self.publish(address, generation, |view| {
            view.phase = ControllerPhase::Settled(state.clone());
        });
        Ok(state)
    }

    /// Restores the missing registry entry for the tracked address. Only
    /// acts from `NeedsRepair`; every other state yields `NotApplicable`
    /// without touching the ledger.
    pub async fn repair(&self, address: &Address) -> Result<ReconcileOutcome, ControllerError> {
        let _guard = self.acquire(address)?;
        let Some(generation) = self.tracked_generation(address, |state| {
            matches!(state, CreatorRegistrationState::NeedsRepair { .. })
        }) else {
            info!("Repair for {address} not applicable in current state");
            return Ok(ReconcileOutcome::NotApplicable);
        };

        let attempt = RepairAttempt::pending();
        self.publish(address, generation, |view| {
            view.phase = ControllerPhase::Repairing;
            view.last_repair = Some(attempt.clone());
        });

        let transaction = TransactionDescriptor::fix_registry(&self.contract);
        if let Err(err) = self.submit_and_seal(address, &transaction).await {
            warn!("Repair for {address} failed: {err}");
            let reason = err.reason();
            self.publish(address, generation, |view| {
                view.phase = ControllerPhase::Settled(CreatorRegistrationState::NeedsRepair {
                    address: address.clone(),
                });
                view.last_repair = Some(attempt.clone().failed(reason));
            });
            return Err(err.into());
        }

        let outcome = self
            .reconcile(address, generation, CreatorRegistrationState::is_fully_registered)
            .await;
        let finished = match &outcome {
            ReconcileOutcome::Converged(_) => attempt.succeeded(),
            _ => attempt.failed("convergence not observed"),
        };
        self.publish(address, generation, |view| {
            view.last_repair = Some(finished);
        });
        info!("Repair for {address} finished: {outcome:?}");
        Ok(outcome)
    }

    /// Registers the tracked address as a creator. Only acts from `NotACreator`.
    pub async fn register(
        &self,
        address: &Address,
        profile: &CreatorProfile,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let _guard = self.acquire(address)?;
        let Some(generation) = self.tracked_generation(address, |state| {
            matches!(state, CreatorRegistrationState::NotACreator)
        }) else {
            info!("Registration for {address} not applicable in current state");
            return Ok(ReconcileOutcome::NotApplicable);
        };

        let transaction = TransactionDescriptor::register_creator(&self.contract, profile);
        self.mutate_and_reconcile(address, generation, &transaction, |state| {
            state.is_fully_registered()
        })
        .await
    }

    /// Updates the profile of a fully registered creator. Never re-registers.
    pub async fn update_profile(
        &self,
        address: &Address,
        profile: &CreatorProfile,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let _guard = self.acquire(address)?;
        let Some(generation) = self.tracked_generation(address, |state| {
            state.is_fully_registered()
        }) else {
            info!("Profile update for {address} not applicable in current state");
            return Ok(ReconcileOutcome::NotApplicable);
        };

        let transaction = TransactionDescriptor::update_profile(&self.contract, profile);
        self.mutate_and_reconcile(address, generation, &transaction, |state| match state {
            CreatorRegistrationState::FullyRegistered { record } => {
                record.display_name == profile.display_name
                    && record.description == profile.description
                    && record.image_url == profile.image_url
            }
            _ => false,
        })
        .await
    }

    /// Drops the last repair attempt once the UI has shown it.
    pub fn acknowledge_repair(&self) {
        self.view.send_if_modified(|view| view.last_repair.take().is_some());
    }

    async fn mutate_and_reconcile(
        &self,
        address: &Address,
        generation: u64,
        transaction: &TransactionDescriptor,
        converged: impl Fn(&CreatorRegistrationState) -> bool,
    ) -> Result<ReconcileOutcome, ControllerError> {
        // The settled phase stands until the transaction seals.
        if let Err(err) = self.submit_and_seal(address, transaction).await {
            warn!("{} for {address} failed: {err}", transaction.kind.as_str());
            return Err(err.into());
        }
        Ok(self.reconcile(address, generation, converged).await)
    }

    async fn submit_and_seal(
        &self,
        address: &Address,
        transaction: &TransactionDescriptor,
    ) -> Result<(), SubmissionError> {
        let handle = self
            .mutations
            .submit(transaction, self.signer.as_ref())
            .await?;
        info!(
            "Submitted {} for {address} as {}",
            transaction.kind.as_str(),
            handle.id
        );
        self.cache.invalidate_creator(address).await;
        let sealed = await_sealed(
            self.mutations.as_ref(),
            &handle,
            self.settings.finality_timeout(),
        )
        .await;
        // A timed out transaction may still land; drop anything read meanwhile.
        self.cache.invalidate_creator(address).await;
        sealed
    }

    /// Re-classifies after a sealed mutation until `converged` holds or the
    /// configured attempts run out. The first read may still be stale.
    async fn reconcile(
        &self,
        address: &Address,
        generation: u64,
        converged: impl Fn(&CreatorRegistrationState) -> bool,
    ) -> ReconcileOutcome {
        let attempts = self.settings.reclassify_attempts;
        let mut state = CreatorRegistrationState::Unknown;
        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(self.settings.reclassify_backoff() * attempt).await;
            }
            self.publish(address, generation, |view| {
                view.phase = ControllerPhase::Classifying;
            });
            state = self.derive_state(address).await;
            self.publish(address, generation, |view| {
                view.phase = ControllerPhase::Settled(state.clone());
            });
            if converged(&state) {
                break;
            }
            debug!(
                "Re-classification {}/{attempts} for {address} observed {}",
                attempt + 1,
                state.label()
            );
        }

        let done = converged(&state);
        match state {
            CreatorRegistrationState::FullyRegistered { record } if done => {
                ReconcileOutcome::Converged(record)
            }
            other => ReconcileOutcome::Unconfirmed(other),
        }
    }

    async fn derive_state(&self, address: &Address) -> CreatorRegistrationState {
        let registered = match self.ledger.query_registry_membership(address).await {
            Ok(registered) => registered,
            Err(err) => {
                warn!("Registry lookup for {address} failed: {err}");
                return CreatorRegistrationState::Unknown;
            }
        };

        if registered {
            return match self.ledger.query_creator_record(address).await {
                Ok(Some(record)) => {
                    self.cache
                        .creator_records
                        .insert(address.clone(), Arc::new(record.clone()))
                        .await;
                    CreatorRegistrationState::FullyRegistered { record }
                }
                Ok(None) | Err(QueryError::Capability { .. }) => {
                    info!("{address} is registered but its creator capability is unusable");
                    CreatorRegistrationState::NeedsRepair {
                        address: address.clone(),
                    }
                }
                Err(err) => {
                    warn!("Creator record lookup for {address} failed: {err}");
                    CreatorRegistrationState::Unknown
                }
            };
        }

        match self.ledger.query_resource_exists(address).await {
            Ok(true) => {
                info!("{address} holds a creator resource missing from the registry");
                CreatorRegistrationState::NeedsRepair {
                    address: address.clone(),
                }
            }
            Ok(false) => CreatorRegistrationState::NotACreator,
            Err(err) => {
                warn!("Resource lookup for {address} failed: {err}");
                CreatorRegistrationState::Unknown
            }
        }
    }

    /// Generation of the view when it tracks `address` in a settled state
    /// accepted by `allowed`.
    fn tracked_generation(
        &self,
        address: &Address,
        allowed: impl Fn(&CreatorRegistrationState) -> bool,
    ) -> Option<u64> {
        let view = self.view.borrow();
        if view.address.as_ref() != Some(address) {
            return None;
        }
        match &view.phase {
            ControllerPhase::Settled(state) if allowed(state) => Some(view.generation),
            _ => None,
        }
    }

    /// Applies `update` only while the view still tracks `address` at `generation`.
    fn publish(&self, address: &Address, generation: u64, update: impl FnOnce(&mut ControllerView)) {
        self.view.send_if_modified(|view| {
            if view.generation != generation || view.address.as_ref() != Some(address) {
                return false;
            }
            update(view);
            debug!("Controller view for {address}: {:?}", view.phase);
            true
        });
    }

    fn acquire(&self, address: &Address) -> Result<InFlightGuard<'_>, ControllerError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(address.clone()) {
            return Err(ControllerError::InFlight(address.clone()));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            released: &self.released,
            address: address.clone(),
        })
    }
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Address>>,
    released: &'a Notify,
    address: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.address);
        self.released.notify_waiters();
    }
}
