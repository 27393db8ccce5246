use async_trait::async_trait;
use chrono::DateTime;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    sort_records, tracking_key, write_version, CustomerStats, StatsDelta, TrackingError,
    TrackingRecord, TrackingRemoval, TrackingSink,
};
use crate::domain::order::{CustomerId, OrderId, SalesRepId};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redis Tracking Store
// ============================================================================
//
// Keys:
//   sale:{orderId}                    JSON TrackingRecord
//   sale:{orderId}:version            last applied write version (micros)
//   sales:by-customer:{customerId}    SET of order ids
//   sales:by-rep:{salesRepId}         SET of order ids
//   sales:customer-stats:{customerId} HASH totalOrders, totalValueCents,
//                                     lastOrderAt (micros)
//
// Record writes and removals run as Lua scripts so the version check, the
// record, its indexes and the customer rollup change together.
//
// The connection is opened lazily so the engine starts while Redis is down,
// and is dropped after any failed command so the next call reconnects. All
// calls go through a circuit breaker.
//
// ============================================================================

/// How long a removal keeps fencing off late writes
const REMOVAL_FENCE_SECS: u64 = 24 * 60 * 60;

// ARGV[1..3]: order delta, value delta in cents, last order time or ''
const APPLY_STATS: &str = r#"
if tonumber(ARGV[1]) ~= 0 then
  redis.call('HINCRBY', KEYS[5], 'totalOrders', ARGV[1])
end
if tonumber(ARGV[2]) ~= 0 then
  redis.call('HINCRBY', KEYS[5], 'totalValueCents', ARGV[2])
end
if ARGV[3] ~= '' then
  local last = redis.call('HGET', KEYS[5], 'lastOrderAt')
  if not last or tonumber(ARGV[3]) > tonumber(last) then
    redis.call('HSET', KEYS[5], 'lastOrderAt', ARGV[3])
  end
end
"#;

// KEYS: record, version, customer index, rep index, customer stats
// ARGV[4..6]: payload, version, order id
const PUT_RECORD: &str = r#"
local applied = 0
local current = redis.call('GET', KEYS[2])
if not current or tonumber(ARGV[5]) >= tonumber(current) then
  redis.call('SET', KEYS[1], ARGV[4])
  redis.call('SET', KEYS[2], ARGV[5])
  redis.call('SADD', KEYS[3], ARGV[6])
  redis.call('SADD', KEYS[4], ARGV[6])
  applied = 1
end
"#;

// KEYS as for PUT_RECORD; ARGV[4..6]: version, order id, fence ttl
const REMOVE_RECORD: &str = r#"
local applied = 0
local current = redis.call('GET', KEYS[2])
if not current or tonumber(ARGV[4]) >= tonumber(current) then
  redis.call('DEL', KEYS[1])
  redis.call('SET', KEYS[2], ARGV[4], 'EX', ARGV[6])
  redis.call('SREM', KEYS[3], ARGV[5])
  redis.call('SREM', KEYS[4], ARGV[5])
  applied = 1
end
"#;

pub struct RedisTrackingStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
    put_script: Script,
    remove_script: Script,
}

impl RedisTrackingStore {
    pub fn new(url: &str, breaker: CircuitBreakerConfig) -> Result<Self, TrackingError> {
        let client = Client::open(url)?;

        tracing::info!(url = %url, "Redis tracking store configured");

        Ok(Self {
            client,
            connection: Mutex::new(None),
            breaker: CircuitBreaker::new("redis-tracking", breaker),
            metrics: None,
            put_script: Script::new(&format!("{PUT_RECORD}{APPLY_STATS}return applied")),
            remove_script: Script::new(&format!("{REMOVE_RECORD}{APPLY_STATS}return applied")),
        })
    }

    /// Publish the breaker state to the `tracking_circuit_state` gauge
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    fn customer_index(customer_id: &CustomerId) -> String {
        format!("sales:by-customer:{customer_id}")
    }

    fn rep_index(sales_rep_id: &SalesRepId) -> String {
        format!("sales:by-rep:{sales_rep_id}")
    }

    fn version_key(order_id: &OrderId) -> String {
        format!("{}:version", tracking_key(order_id))
    }

    fn stats_key(customer_id: &CustomerId) -> String {
        format!("sales:customer-stats:{customer_id}")
    }

    /// ARGV[1..3] shared by both scripts
    fn stats_args(stats: &StatsDelta) -> Result<(i64, i64, String), TrackingError> {
        let cents = stats
            .value_cents()
            .ok_or_else(|| TrackingError::OutOfRange(stats.value.to_string()))?;
        let last = stats
            .last_order_at
            .map(|at| write_version(at).to_string())
            .unwrap_or_default();
        Ok((stats.orders, cents, last))
    }

    async fn connection(&self) -> Result<MultiplexedConnection, TrackingError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        tracing::debug!("Opened Redis tracking connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one Redis exchange behind the breaker
    async fn guarded<T, F, Fut>(&self, exchange: F) -> Result<T, TrackingError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, TrackingError>>,
    {
        let result = self
            .breaker
            .call(async {
                let conn = self.connection().await?;
                exchange(conn).await
            })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.update_tracking_circuit_state(self.breaker.state().await.as_gauge());
        }

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen) => Err(TrackingError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => {
                self.connection.lock().await.take();
                Err(e)
            }
        }
    }

    async fn records_in(&self, index_key: String) -> Result<Vec<TrackingRecord>, TrackingError> {
        self.guarded(|mut conn| async move {
            let order_ids: Vec<String> = conn.smembers(&index_key).await?;
            if order_ids.is_empty() {
                return Ok(Vec::new());
            }

            let keys: Vec<String> = order_ids
                .iter()
                .map(|id| tracking_key(&OrderId::new(id.as_str())))
                .collect();
            let payloads: Vec<Option<String>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await?;

            // Index entries can outlive their record; skip them
            let mut records = payloads
                .into_iter()
                .flatten()
                .map(|json| serde_json::from_str::<TrackingRecord>(&json))
                .collect::<Result<Vec<_>, _>>()?;
            sort_records(&mut records);
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl TrackingSink for RedisTrackingStore {
    async fn put(&self, record: &TrackingRecord, stats: &StatsDelta) -> Result<(), TrackingError> {
        let payload = serde_json::to_string(record)?;
        let (orders, cents, last) = Self::stats_args(stats)?;
        let mut invocation = self.put_script.prepare_invoke();
        invocation
            .key(tracking_key(&record.order_id))
            .key(Self::version_key(&record.order_id))
            .key(Self::customer_index(&record.customer_id))
            .key(Self::rep_index(&record.sales_rep_id))
            .key(Self::stats_key(&record.customer_id))
            .arg(orders)
            .arg(cents)
            .arg(last)
            .arg(payload)
            .arg(write_version(record.updated_at))
            .arg(record.order_id.as_str());

        let applied: i64 = self
            .guarded(|mut conn| async move { Ok(invocation.invoke_async(&mut conn).await?) })
            .await?;
        if applied == 0 {
            tracing::debug!(order_id = %record.order_id, "Skipped stale tracking write");
        }
        Ok(())
    }

    async fn remove(
        &self,
        removal: &TrackingRemoval,
        stats: &StatsDelta,
    ) -> Result<(), TrackingError> {
        let (orders, cents, last) = Self::stats_args(stats)?;
        let mut invocation = self.remove_script.prepare_invoke();
        invocation
            .key(tracking_key(&removal.order_id))
            .key(Self::version_key(&removal.order_id))
            .key(Self::customer_index(&removal.customer_id))
            .key(Self::rep_index(&removal.sales_rep_id))
            .key(Self::stats_key(&removal.customer_id))
            .arg(orders)
            .arg(cents)
            .arg(last)
            .arg(removal.version())
            .arg(removal.order_id.as_str())
            .arg(REMOVAL_FENCE_SECS);

        self.guarded(|mut conn| async move {
            let _applied: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<TrackingRecord>, TrackingError> {
        let key = tracking_key(order_id);

        self.guarded(|mut conn| async move {
            let payload: Option<String> = conn.get(&key).await?;
            payload
                .map(|json| serde_json::from_str(&json))
                .transpose()
                .map_err(TrackingError::from)
        })
        .await
    }

    async fn records_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        self.records_in(Self::customer_index(customer_id)).await
    }

    async fn records_for_rep(
        &self,
        sales_rep_id: &SalesRepId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        self.records_in(Self::rep_index(sales_rep_id)).await
    }

    async fn customer_stats(&self, customer_id: &CustomerId) -> Result<CustomerStats, TrackingError> {
        let key = Self::stats_key(customer_id);

        let (orders, cents, last): (Option<i64>, Option<i64>, Option<i64>) = self
            .guarded(|mut conn| async move {
                Ok(redis::cmd("HMGET")
                    .arg(&key)
                    .arg("totalOrders")
                    .arg("totalValueCents")
                    .arg("lastOrderAt")
                    .query_async(&mut conn)
                    .await?)
            })
            .await?;

        Ok(CustomerStats {
            customer_id: customer_id.clone(),
            total_orders: orders.unwrap_or(0),
            total_value: Decimal::new(cents.unwrap_or(0), 2),
            last_order_at: last.and_then(DateTime::from_timestamp_micros),
        })
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        self.guarded(|mut conn| async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            if pong == "PONG" {
                Ok(())
            } else {
                Err(TrackingError::Unavailable(format!("unexpected PING reply '{pong}'")))
            }
        })
        .await
    }
}
