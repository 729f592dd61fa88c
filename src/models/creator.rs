use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::Address;
use super::amount::TokenAmount;

/// Snapshot of a creator resource as read from the ledger. Replaced
/// wholesale on refresh, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorRecord {
    pub id: u64,
    pub address: Address,
    pub display_name: String,
    pub description: String,
    pub image_url: String,
    pub tip_count: u64,
    pub total_tipped: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipEvent {
    pub id: u64,
    pub amount: TokenAmount,
    pub from: Address,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Profile fields submitted on registration or update, already canonicalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorProfile {
    pub display_name: String,
    pub description: String,
    pub image_url: String,
}

/// Raw profile form as received from the front-end.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatorProfileRequest {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}
