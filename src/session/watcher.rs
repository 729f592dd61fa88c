use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::ledger::WalletProvider;

use super::WalletSession;

/// Polls the wallet bridge for account switches made outside this service
/// and hands them to the session store.
pub struct IdentityWatcher {
    session: Arc<WalletSession>,
    wallet: Arc<dyn WalletProvider>,
    poll_interval: Duration,
}

impl IdentityWatcher {
    pub fn new(
        session: Arc<WalletSession>,
        wallet: Arc<dyn WalletProvider>,
        poll_interval: Duration,
    ) -> Self {
        assert!(
            poll_interval >= Duration::from_millis(10),
            "Identity poll interval too small"
        );
        Self {
            session,
            wallet,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting wallet identity watcher");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Identity watcher shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting identity watcher");
                            break;
                        }
                    }
                }
                _ = sleep(self.poll_interval) => {
                    self.tick().await;
                }
            }
        }

        Ok(())
    }

    async fn tick(&self) {
        let identity = match self.wallet.current_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Wallet identity poll failed: {err}");
                return;
            }
        };
        if identity == self.session.identity() {
            debug!("Wallet identity unchanged");
            return;
        }
        self.session.apply(identity).await;
    }
}
