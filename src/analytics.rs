use std::sync::Arc;

use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use tracing::{debug, warn};

use crate::entities::wallet_connection;
use crate::models::Address;

/// Best-effort analytics writer. Failures are logged and swallowed so
/// they can never hold up a wallet connect.
#[derive(Clone, Default)]
pub struct AnalyticsStore {
    database: Option<Arc<DatabaseConnection>>,
}

impl AnalyticsStore {
    pub fn new(database: Option<Arc<DatabaseConnection>>) -> Self {
        Self { database }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.database.is_some()
    }

    /// Returns whether a row was written.
    pub async fn record_connect(&self, address: &Address) -> bool {
        let Some(database) = &self.database else {
            return false;
        };

        let row = wallet_connection::ActiveModel {
            id: NotSet,
            address: Set(address.as_str().to_string()),
            connected_at: Set(Utc::now().fixed_offset()),
        };
        match wallet_connection::Entity::insert(row)
            .exec_without_returning(database.as_ref())
            .await
        {
            Ok(_) => {
                debug!("Recorded wallet connection for {address}");
                true
            }
            Err(err) => {
                warn!("Failed to record wallet connection for {address}: {err}");
                false
            }
        }
    }

    pub async fn ping(&self) -> Result<(), DbErr> {
        match &self.database {
            Some(database) => database.ping().await,
            None => Ok(()),
        }
    }
}
