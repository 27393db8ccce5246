use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{
    sort_records, tracking_key, write_version, CustomerStats, StatsDelta, TrackingError,
    TrackingRecord, TrackingRemoval, TrackingSink,
};
use crate::domain::order::{CustomerId, OrderId, SalesRepId};

/// Tracking sink kept in process memory, keyed like the Redis sink
#[derive(Default)]
pub struct MemoryTrackingStore {
    state: RwLock<MirrorState>,
}

#[derive(Default)]
struct MirrorState {
    records: BTreeMap<String, TrackingRecord>,
    /// Last applied write version per record key, removals included
    versions: HashMap<String, i64>,
    stats: HashMap<CustomerId, CustomerStats>,
}

impl MirrorState {
    fn accepts(&self, key: &str, version: i64) -> bool {
        self.versions.get(key).map_or(true, |current| version >= *current)
    }

    fn apply_stats(&mut self, customer_id: &CustomerId, delta: &StatsDelta) {
        if delta.is_empty() {
            return;
        }
        self.stats
            .entry(customer_id.clone())
            .or_insert_with(|| CustomerStats::empty(customer_id.clone()))
            .apply(delta);
    }
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    async fn matching(&self, keep: impl Fn(&TrackingRecord) -> bool) -> Vec<TrackingRecord> {
        let mut found: Vec<TrackingRecord> = self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|record| keep(record))
            .cloned()
            .collect();
        sort_records(&mut found);
        found
    }
}

#[async_trait]
impl TrackingSink for MemoryTrackingStore {
    async fn put(&self, record: &TrackingRecord, stats: &StatsDelta) -> Result<(), TrackingError> {
        let key = tracking_key(&record.order_id);
        let version = write_version(record.updated_at);
        let mut state = self.state.write().await;

        if state.accepts(&key, version) {
            state.versions.insert(key.clone(), version);
            state.records.insert(key, record.clone());
        } else {
            tracing::debug!(order_id = %record.order_id, "Skipped stale tracking write");
        }
        state.apply_stats(&record.customer_id, stats);
        Ok(())
    }

    async fn remove(
        &self,
        removal: &TrackingRemoval,
        stats: &StatsDelta,
    ) -> Result<(), TrackingError> {
        let key = tracking_key(&removal.order_id);
        let mut state = self.state.write().await;

        if state.accepts(&key, removal.version()) {
            state.versions.insert(key.clone(), removal.version());
            state.records.remove(&key);
        }
        state.apply_stats(&removal.customer_id, stats);
        Ok(())
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<TrackingRecord>, TrackingError> {
        Ok(self.state.read().await.records.get(&tracking_key(order_id)).cloned())
    }

    async fn records_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        Ok(self.matching(|record| &record.customer_id == customer_id).await)
    }

    async fn records_for_rep(
        &self,
        sales_rep_id: &SalesRepId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        Ok(self.matching(|record| &record.sales_rep_id == sales_rep_id).await)
    }

    async fn customer_stats(&self, customer_id: &CustomerId) -> Result<CustomerStats, TrackingError> {
        Ok(self
            .state
            .read()
            .await
            .stats
            .get(customer_id)
            .cloned()
            .unwrap_or_else(|| CustomerStats::empty(customer_id.clone())))
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        Ok(())
    }
}
