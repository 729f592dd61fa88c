use serde::Serialize;

use super::address::Address;

/// Who the wallet says is signed in. Owned by the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletIdentity {
    pub address: Option<Address>,
    pub connected: bool,
}

impl WalletIdentity {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(address: Address) -> Self {
        Self {
            address: Some(address),
            connected: true,
        }
    }

    /// The address only counts while the wallet reports a live session.
    pub fn active_address(&self) -> Option<&Address> {
        if self.connected {
            self.address.as_ref()
        } else {
            None
        }
    }
}
