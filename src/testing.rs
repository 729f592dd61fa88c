//! In-memory ledger and wallet used by the unit tests. One value plays all
//! three collaborator roles so a test can seed state, trigger a flow and
//! then inspect what was submitted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::analytics::AnalyticsStore;
use crate::config::{CacheConfig, ControllerConfig};
use crate::controller::ConsistencyController;
use crate::ledger::cadence::CadenceValue;
use crate::ledger::{
    LedgerMutation, LedgerQuery, QueryError, SubmissionError, TerminalStatus, TransactionDescriptor,
    TransactionHandle, TransactionKind, WalletError, WalletProvider,
};
use crate::models::{Address, CreatorRecord, TipEvent, TokenAmount, WalletIdentity};
use crate::session::WalletSession;
use crate::state::ApiCache;
use crate::transfers::{AmountBounds, TransferLimits, TransferService};

pub const CONTRACT: &str = "0x6c1b12e35dca8863";

/// How the next transactions end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Seal,
    /// Effects land on the ledger but finality is never observed.
    SealAfterTimeout,
    /// Finality is never reported; effects land once the delay has passed.
    LandAfter(Duration),
    Reject(String),
    Expire,
    Decline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub registry_reads: u32,
    pub resource_reads: u32,
    pub record_reads: u32,
}

struct Pending {
    transaction: TransactionDescriptor,
    signer: Option<Address>,
}

struct Inner {
    registry: HashSet<Address>,
    resources: HashMap<Address, CreatorRecord>,
    capability_broken: HashSet<Address>,
    balances: HashMap<Address, TokenAmount>,
    withdrawable: HashMap<Address, TokenAmount>,
    tips: HashMap<Address, Vec<TipEvent>>,
    identity: WalletIdentity,
    outcome: Outcome,
    registry_lag: u32,
    lagging: HashMap<Address, u32>,
    finality_delay: Duration,
    fail_queries: bool,
    fail_wallet: bool,
    pending: HashMap<String, Pending>,
    landing: Vec<(Instant, Pending)>,
    submitted: Vec<TransactionDescriptor>,
    counts: Counts,
    next_id: u64,
}

pub struct FakeLedger {
    inner: Mutex<Inner>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: HashSet::new(),
                resources: HashMap::new(),
                capability_broken: HashSet::new(),
                balances: HashMap::new(),
                withdrawable: HashMap::new(),
                tips: HashMap::new(),
                identity: WalletIdentity::disconnected(),
                outcome: Outcome::Seal,
                registry_lag: 0,
                lagging: HashMap::new(),
                finality_delay: Duration::ZERO,
                fail_queries: false,
                fail_wallet: false,
                pending: HashMap::new(),
                landing: Vec::new(),
                submitted: Vec::new(),
                counts: Counts::default(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Registry entry plus resource.
    pub fn add_creator(&self, address: &Address, name: &str) {
        self.add_resource(address, name);
        self.lock().registry.insert(address.clone());
    }

    /// Resource without a registry entry.
    pub fn add_resource(&self, address: &Address, name: &str) {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.resources.insert(address.clone(), record(id, address, name, "", ""));
    }

    pub fn break_capability(&self, address: &Address) {
        self.lock().capability_broken.insert(address.clone());
    }

    pub fn set_balance(&self, address: &Address, amount: &str) {
        self.lock().balances.insert(address.clone(), amount.parse().unwrap());
    }

    pub fn set_withdrawable(&self, address: &Address, amount: &str) {
        self.lock().withdrawable.insert(address.clone(), amount.parse().unwrap());
    }

    pub fn set_identity(&self, identity: WalletIdentity) {
        self.lock().identity = identity;
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        self.lock().outcome = outcome;
    }

    /// Registry reads keep missing a newly added entry this many times.
    pub fn set_registry_lag(&self, reads: u32) {
        self.lock().registry_lag = reads;
    }

    pub fn set_finality_delay(&self, delay: Duration) {
        self.lock().finality_delay = delay;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    pub fn fail_wallet(&self, fail: bool) {
        self.lock().fail_wallet = fail;
    }

    pub fn submitted(&self) -> Vec<TransactionKind> {
        self.lock().submitted.iter().map(|tx| tx.kind).collect()
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.lock().registry.contains(address)
    }

    pub fn record(&self, address: &Address) -> Option<CreatorRecord> {
        self.lock().resources.get(address).cloned()
    }

    pub fn balance(&self, address: &Address) -> TokenAmount {
        self.lock().balances.get(address).copied().unwrap_or(TokenAmount::ZERO)
    }

    pub fn withdrawable(&self, address: &Address) -> TokenAmount {
        self.lock().withdrawable.get(address).copied().unwrap_or(TokenAmount::ZERO)
    }

    fn take_pending(inner: &mut Inner, id: &str) -> Result<Pending, SubmissionError> {
        inner
            .pending
            .remove(id)
            .ok_or_else(|| SubmissionError::Unknown(format!("unknown transaction {id}")))
    }

    fn schedule_landing(&self, id: &str, after: Duration) -> Result<(), SubmissionError> {
        let mut inner = self.lock();
        let pending = Self::take_pending(&mut inner, id)?;
        inner.landing.push((Instant::now() + after, pending));
        Ok(())
    }

    fn check_queries(&self, script: &'static str) -> Result<(), QueryError> {
        let mut inner = self.lock();
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.landing)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        inner.landing = waiting;
        for (_, pending) in due {
            inner.apply(pending);
        }
        if inner.fail_queries {
            return Err(QueryError::Transport {
                script,
                reason: "access node unreachable".to_string(),
            });
        }
        Ok(())
    }
}

impl Inner {
    fn apply(&mut self, pending: Pending) {
        let Pending { transaction, signer } = pending;
        let Some(signer) = signer else {
            return;
        };
        let args = &transaction.arguments;
        match transaction.kind {
            TransactionKind::RegisterCreator => {
                let id = self.next_id;
                self.next_id += 1;
                let created = record(id, &signer, text(&args[0]), text(&args[1]), text(&args[2]));
                self.resources.insert(signer.clone(), created);
                self.add_to_registry(&signer);
            }
            TransactionKind::UpdateProfile => {
                if let Some(existing) = self.resources.get_mut(&signer) {
                    existing.display_name = text(&args[0]).to_string();
                    existing.description = text(&args[1]).to_string();
                    existing.image_url = text(&args[2]).to_string();
                }
            }
            TransactionKind::FixRegistry => {
                if self.resources.contains_key(&signer) {
                    self.capability_broken.remove(&signer);
                    if !self.registry.contains(&signer) {
                        self.add_to_registry(&signer);
                    }
                }
            }
            TransactionKind::SendTip => {
                let recipient = match &args[0] {
                    CadenceValue::Address(raw) => Address::parse(raw).unwrap(),
                    other => panic!("unexpected tip recipient {other:?}"),
                };
                let amount = units(&args[1]);
                let balance = self.balances.entry(signer.clone()).or_insert(TokenAmount::ZERO);
                *balance = TokenAmount::from_base_units(balance.base_units().saturating_sub(amount.base_units()));
                let pot = self.withdrawable.entry(recipient.clone()).or_insert(TokenAmount::ZERO);
                *pot = pot.checked_add(amount).unwrap();
                if let Some(creator) = self.resources.get_mut(&recipient) {
                    creator.tip_count += 1;
                    creator.total_tipped = creator.total_tipped.checked_add(amount).unwrap();
                    let id = creator.tip_count;
                    self.tips.entry(recipient).or_default().push(TipEvent {
                        id,
                        amount,
                        from: signer,
                        message: text(&args[2]).to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
            TransactionKind::Withdraw => {
                let amount = units(&args[0]);
                let pot = self.withdrawable.entry(signer.clone()).or_insert(TokenAmount::ZERO);
                *pot = TokenAmount::from_base_units(pot.base_units().saturating_sub(amount.base_units()));
                let balance = self.balances.entry(signer).or_insert(TokenAmount::ZERO);
                *balance = balance.checked_add(amount).unwrap();
            }
        }
    }

    fn add_to_registry(&mut self, address: &Address) {
        self.registry.insert(address.clone());
        if self.registry_lag > 0 {
            self.lagging.insert(address.clone(), self.registry_lag);
        }
    }
}

fn record(id: u64, address: &Address, name: &str, description: &str, image_url: &str) -> CreatorRecord {
    CreatorRecord {
        id,
        address: address.clone(),
        display_name: name.to_string(),
        description: description.to_string(),
        image_url: image_url.to_string(),
        tip_count: 0,
        total_tipped: TokenAmount::ZERO,
    }
}

fn text(value: &CadenceValue) -> &str {
    match value {
        CadenceValue::String(value) => value,
        other => panic!("expected string argument, found {other:?}"),
    }
}

fn units(value: &CadenceValue) -> TokenAmount {
    value.clone().into_amount().unwrap()
}

#[async_trait]
impl LedgerQuery for FakeLedger {
    async fn query_registry_membership(&self, address: &Address) -> Result<bool, QueryError> {
        self.check_queries("is_registered")?;
        let mut inner = self.lock();
        inner.counts.registry_reads += 1;
        if let Some(remaining) = inner.lagging.get_mut(address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(inner.registry.contains(address))
    }

    async fn query_resource_exists(&self, address: &Address) -> Result<bool, QueryError> {
        self.check_queries("has_creator_resource")?;
        let mut inner = self.lock();
        inner.counts.resource_reads += 1;
        Ok(inner.resources.contains_key(address))
    }

    async fn query_creator_record(&self, address: &Address) -> Result<Option<CreatorRecord>, QueryError> {
        self.check_queries("get_creator")?;
        let mut inner = self.lock();
        inner.counts.record_reads += 1;
        if inner.capability_broken.contains(address) {
            return Err(QueryError::Capability {
                script: "get_creator",
                reason: "Could not borrow creator capability".to_string(),
            });
        }
        Ok(inner.resources.get(address).cloned())
    }

    async fn query_tip_history(&self, address: &Address) -> Result<Vec<TipEvent>, QueryError> {
        self.check_queries("get_tip_history")?;
        let inner = self.lock();
        let mut tips = inner.tips.get(address).cloned().unwrap_or_default();
        tips.reverse();
        Ok(tips)
    }

    async fn query_creators(&self) -> Result<Vec<CreatorRecord>, QueryError> {
        self.check_queries("get_creators")?;
        let inner = self.lock();
        let mut creators: Vec<CreatorRecord> = inner
            .registry
            .iter()
            .filter(|address| !inner.capability_broken.contains(*address))
            .filter_map(|address| inner.resources.get(address).cloned())
            .collect();
        creators.sort_by_key(|creator| creator.id);
        Ok(creators)
    }

    async fn query_withdrawable_balance(&self, address: &Address) -> Result<TokenAmount, QueryError> {
        self.check_queries("get_withdrawable_balance")?;
        Ok(self.withdrawable(address))
    }

    async fn query_account_balance(&self, address: &Address) -> Result<TokenAmount, QueryError> {
        self.check_queries("get_account_balance")?;
        Ok(self.balance(address))
    }
}

#[async_trait]
impl LedgerMutation for FakeLedger {
    async fn submit(
        &self,
        transaction: &TransactionDescriptor,
        signer: &dyn WalletProvider,
    ) -> Result<TransactionHandle, SubmissionError> {
        signer.sign_and_send(transaction).await
    }

    async fn await_finality(
        &self,
        handle: &TransactionHandle,
        _timeout: Duration,
    ) -> Result<TerminalStatus, SubmissionError> {
        let (delay, outcome) = {
            let inner = self.lock();
            (inner.finality_delay, inner.outcome.clone())
        };
        if let Outcome::LandAfter(after) = outcome {
            self.schedule_landing(&handle.id, after)?;
            return std::future::pending().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        let pending = Self::take_pending(&mut inner, &handle.id)?;
        match inner.outcome.clone() {
            Outcome::Seal => {
                inner.apply(pending);
                Ok(TerminalStatus::Sealed)
            }
            Outcome::SealAfterTimeout => {
                inner.apply(pending);
                Err(SubmissionError::Timeout)
            }
            Outcome::LandAfter(_) => unreachable!("handled before the finality delay"),
            Outcome::Reject(reason) => Ok(TerminalStatus::Rejected(reason)),
            Outcome::Expire => Ok(TerminalStatus::Expired),
            Outcome::Decline => Err(SubmissionError::UserCancelled),
        }
    }
}

#[async_trait]
impl WalletProvider for FakeLedger {
    async fn connect(&self) -> Result<WalletIdentity, WalletError> {
        let inner = self.lock();
        if inner.fail_wallet {
            return Err(WalletError::Transport("bridge offline".to_string()));
        }
        if inner.identity.active_address().is_none() {
            return Err(WalletError::Declined);
        }
        Ok(inner.identity.clone())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        let mut inner = self.lock();
        inner.identity = WalletIdentity::disconnected();
        if inner.fail_wallet {
            return Err(WalletError::Transport("bridge offline".to_string()));
        }
        Ok(())
    }

    async fn current_identity(&self) -> Result<WalletIdentity, WalletError> {
        let inner = self.lock();
        if inner.fail_wallet {
            return Err(WalletError::Transport("bridge offline".to_string()));
        }
        Ok(inner.identity.clone())
    }

    async fn sign_and_send(
        &self,
        transaction: &TransactionDescriptor,
    ) -> Result<TransactionHandle, SubmissionError> {
        let mut inner = self.lock();
        if inner.outcome == Outcome::Decline {
            return Err(SubmissionError::UserCancelled);
        }
        let id = format!("tx-{}", inner.submitted.len() + 1);
        let signer = inner.identity.active_address().cloned();
        inner.submitted.push(transaction.clone());
        inner.pending.insert(
            id.clone(),
            Pending {
                transaction: transaction.clone(),
                signer,
            },
        );
        Ok(TransactionHandle { id })
    }
}

pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub cache: Arc<ApiCache>,
    pub controller: Arc<ConsistencyController>,
    pub session: Arc<WalletSession>,
    pub transfers: Arc<TransferService>,
}

impl Harness {
    /// Points the fake wallet at `address` and runs it through the session.
    pub async fn connect(&self, address: &Address) {
        self.ledger.set_identity(WalletIdentity::connected(address.clone()));
        self.session
            .apply(WalletIdentity::connected(address.clone()))
            .await;
    }
}

pub fn controller_settings() -> ControllerConfig {
    ControllerConfig {
        finality_timeout_secs: 1,
        finality_poll_interval_ms: 100,
        reclassify_attempts: 3,
        reclassify_backoff_ms: 1,
    }
}

pub fn harness(ledger: Arc<FakeLedger>) -> Harness {
    let contract = Address::parse(CONTRACT).unwrap();
    let cache = Arc::new(ApiCache::new(&CacheConfig {
        creator_records_max_capacity: 100,
        creator_records_ttl_seconds: 60,
    }));
    let controller = Arc::new(ConsistencyController::new(
        ledger.clone(),
        ledger.clone(),
        ledger.clone(),
        cache.clone(),
        contract.clone(),
        controller_settings(),
    ));
    let session = Arc::new(WalletSession::new(
        ledger.clone(),
        controller.clone(),
        AnalyticsStore::disabled(),
    ));
    let transfers = Arc::new(TransferService::new(
        ledger.clone(),
        ledger.clone(),
        ledger.clone(),
        cache.clone(),
        contract,
        session.subscribe(),
        TransferLimits {
            tip_bounds: AmountBounds {
                minimum: "0.1".parse().unwrap(),
                maximum: Some("1000".parse().unwrap()),
            },
            withdraw_minimum: "0.1".parse().unwrap(),
            max_message_len: 280,
            finality_timeout: Duration::from_secs(1),
        },
    ));
    Harness {
        ledger,
        cache,
        controller,
        session,
        transfers,
    }
}
