use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;

use crate::analytics::AnalyticsStore;
use crate::config::CacheConfig;
use crate::controller::ConsistencyController;
use crate::ledger::LedgerQuery;
use crate::models::{Address, CreatorRecord};
use crate::session::WalletSession;
use crate::transfers::TransferService;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerQuery>,
    pub controller: Arc<ConsistencyController>,
    pub session: Arc<WalletSession>,
    pub transfers: Arc<TransferService>,
    pub analytics: AnalyticsStore,
    pub cache: Arc<ApiCache>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn LedgerQuery>,
        controller: Arc<ConsistencyController>,
        session: Arc<WalletSession>,
        transfers: Arc<TransferService>,
        analytics: AnalyticsStore,
        cache: Arc<ApiCache>,
    ) -> Self {
        assert!(
            cache.creator_capacity >= 100,
            "Creator record cache capacity must be configured"
        );
        Self {
            ledger,
            controller,
            session,
            transfers,
            analytics,
            cache,
            start_time: Instant::now(),
        }
    }
}

/// Per-address creator record snapshots for public profile reads.
/// Classification never reads from here.
pub struct ApiCache {
    pub creator_records: Cache<Address, Arc<CreatorRecord>>,
    pub creator_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.creator_records_max_capacity >= 100,
            "Creator record cache capacity threshold"
        );

        let creator_records = Cache::builder()
            .max_capacity(config.creator_records_max_capacity)
            .time_to_live(Duration::from_secs(config.creator_records_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.creator_records_ttl_seconds / 2 + 1))
            .build();

        Self {
            creator_records,
            creator_capacity: config.creator_records_max_capacity,
        }
    }

    /// Called whenever a transaction touching `address` is submitted.
    pub async fn invalidate_creator(&self, address: &Address) {
        self.creator_records.invalidate(address).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenAmount;

    #[tokio::test]
    async fn invalidation_drops_only_that_address() {
        let cache = ApiCache::new(&CacheConfig {
            creator_records_max_capacity: 100,
            creator_records_ttl_seconds: 60,
        });
        let record = |address: &Address| CreatorRecord {
            id: 1,
            address: address.clone(),
            display_name: "Dana".to_string(),
            description: String::new(),
            image_url: String::new(),
            tip_count: 0,
            total_tipped: TokenAmount::ZERO,
        };
        let first = Address::parse("0x01").unwrap();
        let second = Address::parse("0x02").unwrap();
        cache.creator_records.insert(first.clone(), Arc::new(record(&first))).await;
        cache.creator_records.insert(second.clone(), Arc::new(record(&second))).await;

        cache.invalidate_creator(&first).await;

        assert!(cache.creator_records.get(&first).await.is_none());
        assert!(cache.creator_records.get(&second).await.is_some());
    }
}
