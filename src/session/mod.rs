//! The wallet session store: sole writer of [`WalletIdentity`]. Every
//! identity change flows through [`WalletSession::apply`], which feeds the
//! consistency controller; everything else only subscribes.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::analytics::AnalyticsStore;
use crate::controller::{ConsistencyController, ControllerView};
use crate::ledger::{WalletError, WalletProvider};
use crate::models::WalletIdentity;

mod watcher;

pub use watcher::IdentityWatcher;

pub struct WalletSession {
    wallet: Arc<dyn WalletProvider>,
    controller: Arc<ConsistencyController>,
    analytics: AnalyticsStore,
    identity: watch::Sender<WalletIdentity>,
    applying: Mutex<()>,
}

impl WalletSession {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        controller: Arc<ConsistencyController>,
        analytics: AnalyticsStore,
    ) -> Self {
        let (identity, _) = watch::channel(WalletIdentity::disconnected());
        Self {
            wallet,
            controller,
            analytics,
            identity,
            applying: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletIdentity> {
        self.identity.subscribe()
    }

    pub fn identity(&self) -> WalletIdentity {
        self.identity.borrow().clone()
    }

    pub async fn connect(&self) -> Result<(WalletIdentity, ControllerView), WalletError> {
        let identity = self.wallet.connect().await?;
        let view = self.apply(identity.clone()).await;
        Ok((identity, view))
    }

    /// Always ends disconnected locally, even if the bridge call fails.
    pub async fn disconnect(&self) -> Result<(), WalletError> {
        let result = self.wallet.disconnect().await;
        if let Err(err) = &result {
            warn!("Wallet bridge logout failed: {err}");
        }
        self.apply(WalletIdentity::disconnected()).await;
        result
    }

    /// Publishes `identity` and lets the controller react to it.
    pub async fn apply(&self, identity: WalletIdentity) -> ControllerView {
        let _serial = self.applying.lock().await;
        let previous = self.identity.send_replace(identity.clone());

        let newly_connected = identity
            .active_address()
            .filter(|address| previous.active_address() != Some(*address))
            .cloned();
        if let Some(address) = newly_connected {
            info!("Wallet connected as {address}");
            let analytics = self.analytics.clone();
            tokio::spawn(async move {
                analytics.record_connect(&address).await;
            });
        } else if previous.active_address().is_some() && identity.active_address().is_none() {
            info!("Wallet disconnected");
        }

        self.controller.observe(&identity).await
    }
}
