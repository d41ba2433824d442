use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    config::PipelineConfig,
    db::{Cache, CacheKey, Store},
    error::{AppError, AppResult},
    models::{DetailPayload, DetailRecord, ItemId, SearchIndexEntry},
    services::providers::DetailFetcher,
};

/// Source of "now" in unix seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp())
}

/// TTL cache over remote app-detail lookups
///
/// The persistent store is the cache: a record younger than the TTL is served
/// without touching the catalog. Misses and stale records are refreshed from
/// the fetcher, and concurrent refreshes of the same item are collapsed into
/// a single remote call.
pub struct DetailCache {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn DetailFetcher>,
    accelerator: Option<Cache>,
    config: PipelineConfig,
    in_flight: std::sync::Mutex<HashMap<ItemId, Gate>>,
    clock: Clock,
}

type Gate = Arc<Mutex<()>>;

/// Holds an item's refresh gate. Dropping it, including when the request is
/// cancelled mid-fetch, removes the gate once no other caller shares it.
struct InFlight<'a> {
    cache: &'a DetailCache,
    item_id: ItemId,
    gate: Gate,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.lock_in_flight();
        let is_current = in_flight
            .get(&self.item_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.gate));
        // one reference in the map, one held here
        if is_current && Arc::strong_count(&self.gate) <= 2 {
            in_flight.remove(&self.item_id);
        }
    }
}

/// Keeps an accelerator hit only while the record is inside the TTL
fn fresh_only(record: DetailRecord, now: i64, ttl_secs: i64) -> Option<DetailRecord> {
    record.is_fresh(now, ttl_secs).then_some(record)
}

/// Seconds a record may live in the accelerator, `None` once it has expired
fn mirror_ttl(record: &DetailRecord, now: i64, ttl_secs: i64) -> Option<u64> {
    let remaining = ttl_secs - record.age(now);
    (remaining > 0).then_some(remaining as u64)
}

impl DetailCache {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn DetailFetcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            accelerator: None,
            config,
            in_flight: std::sync::Mutex::new(HashMap::new()),
            clock: system_clock(),
        }
    }

    /// Puts a Redis read-through layer in front of the store
    pub fn with_accelerator(mut self, cache: Cache) -> Self {
        self.accelerator = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn ttl(&self) -> i64 {
        self.config.detail_ttl_secs
    }

    /// Returns the item's detail, refreshing it from the catalog when needed.
    ///
    /// `Ok(None)` when the catalog does not know the item. Upstream failures
    /// propagate unless an expired record exists and serving stale data on
    /// outage is enabled.
    pub async fn get_detail(&self, item_id: ItemId) -> AppResult<Option<DetailPayload>> {
        let now = self.now();

        if let Some(record) = self.accelerated(item_id, now).await {
            tracing::debug!(item_id = item_id, "Detail accelerator hit");
            return Ok(Some(record.payload));
        }

        if let Some(record) = self.store.detail(item_id).await? {
            if record.is_fresh(now, self.ttl()) {
                tracing::debug!(item_id = item_id, age = record.age(now), "Detail cache hit");
                self.accelerate(&record, now);
                return Ok(Some(record.payload));
            }
        }

        let in_flight = self.enter(item_id);
        let _guard = in_flight.gate.lock().await;
        self.refresh(item_id).await
    }

    /// Genre labels of the item, `None` when the item is unknown
    pub async fn get_genres(&self, item_id: ItemId) -> AppResult<Option<Vec<String>>> {
        Ok(self
            .get_detail(item_id)
            .await?
            .map(|payload| payload.genre_labels()))
    }

    /// Runs under the item's gate; re-checks the store because another caller
    /// may have refreshed the record while this one waited.
    async fn refresh(&self, item_id: ItemId) -> AppResult<Option<DetailPayload>> {
        let existing = self.store.detail(item_id).await?;
        if let Some(record) = &existing {
            let now = self.now();
            if record.is_fresh(now, self.ttl()) {
                tracing::debug!(item_id = item_id, "Detail refreshed by concurrent caller");
                return Ok(Some(record.payload.clone()));
            }
        }

        tracing::debug!(
            item_id = item_id,
            stale = existing.is_some(),
            provider = self.fetcher.name(),
            "Detail cache miss"
        );

        match self.fetch_with_retry(item_id).await {
            Ok(Some(payload)) => {
                let record = DetailRecord {
                    item_id,
                    payload,
                    fetched_at: self.now(),
                };
                self.write_back(&record).await?;
                Ok(Some(record.payload))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_upstream() && self.config.serve_stale_on_outage => match existing {
                Some(stale) => {
                    tracing::warn!(
                        item_id = item_id,
                        age = stale.age(self.now()),
                        error = %e,
                        "Catalog unavailable, serving stale detail"
                    );
                    Ok(Some(stale.payload))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// One timed call per attempt, backing off between upstream failures
    async fn fetch_with_retry(&self, item_id: ItemId) -> AppResult<Option<DetailPayload>> {
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(
                self.config.fetch_timeout(),
                self.fetcher.fetch_detail(item_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::Upstream(format!(
                    "Detail fetch for {} timed out after {}s",
                    item_id, self.config.fetch_timeout_secs
                ))),
            };

            match result {
                Err(e) if e.is_upstream() && attempt < self.config.fetch_max_retries => {
                    let backoff = self.config.retry_backoff_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        item_id = item_id,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Detail fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Persists a freshly fetched record together with its search index
    /// projection. A newer record written concurrently is left in place.
    async fn write_back(&self, record: &DetailRecord) -> AppResult<()> {
        let entry = SearchIndexEntry::from_payload(record.item_id, &record.payload, record.fetched_at);

        if !self.store.upsert_detail_with_index(record, &entry).await? {
            tracing::debug!(item_id = record.item_id, "Newer detail already stored");
            return Ok(());
        }

        self.accelerate(record, record.fetched_at);

        tracing::info!(
            item_id = record.item_id,
            genres = entry.genres.len(),
            "Cached app details"
        );

        Ok(())
    }

    async fn accelerated(&self, item_id: ItemId, now: i64) -> Option<DetailRecord> {
        let cache = self.accelerator.as_ref()?;

        match cache.get_from_cache::<DetailRecord>(&CacheKey::Detail(item_id)).await {
            Ok(record) => record.and_then(|record| fresh_only(record, now, self.ttl())),
            Err(e) => {
                tracing::warn!(error = %e, item_id = item_id, "Detail accelerator read failed");
                None
            }
        }
    }

    /// Mirrors a record into Redis for the rest of its freshness window
    fn accelerate(&self, record: &DetailRecord, now: i64) {
        if let Some(cache) = &self.accelerator {
            if let Some(ttl) = mirror_ttl(record, now, self.ttl()) {
                cache.set_in_background(&CacheKey::Detail(record.item_id), record, ttl);
            }
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<ItemId, Gate>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, item_id: ItemId) -> InFlight<'_> {
        let gate = Arc::clone(
            self.lock_in_flight()
                .entry(item_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );

        InFlight {
            cache: self,
            item_id,
            gate,
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.lock_in_flight().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, SqliteStore};
    use crate::services::providers::MockDetailFetcher;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            detail_ttl_secs: 3600,
            fetch_max_retries: 0,
            retry_backoff_ms: 0,
            ..PipelineConfig::default()
        }
    }

    fn rpg_payload(name: &str) -> DetailPayload {
        DetailPayload::new(json!({
            "name": name,
            "genres": [{"id": "3", "description": "RPG"}],
            "categories": [{"id": 2, "description": "Single-player"}]
        }))
    }

    async fn setup_store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(create_memory_pool().await.unwrap()))
    }

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, Clock) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = Arc::clone(&now);
        (now, Arc::new(move || handle.load(Ordering::SeqCst)))
    }

    fn cache_with(store: Arc<SqliteStore>, fetcher: MockDetailFetcher, config: PipelineConfig) -> DetailCache {
        let (_, clock) = manual_clock(NOW);
        DetailCache::new(store, Arc::new(fetcher), config).with_clock(clock)
    }

    fn mock_fetcher() -> MockDetailFetcher {
        let mut fetcher = MockDetailFetcher::new();
        fetcher.expect_name().return_const("mock");
        fetcher
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_a_cache_hit() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(1)
            .returning(|_| Ok(Some(rpg_payload("Disco Elysium"))));

        let cache = cache_with(store, fetcher, test_config());

        let first = cache.get_detail(632470).await.unwrap();
        let second = cache.get_detail(632470).await.unwrap();

        assert_eq!(first, Some(rpg_payload("Disco Elysium")));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_expired_record_is_refetched_and_fetched_at_updated() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(2)
            .returning(|_| Ok(Some(rpg_payload("Disco Elysium"))));

        let (now, clock) = manual_clock(NOW);
        let cache = DetailCache::new(store.clone(), Arc::new(fetcher), test_config()).with_clock(clock);

        cache.get_detail(632470).await.unwrap();
        assert_eq!(store.detail(632470).await.unwrap().unwrap().fetched_at, NOW);

        now.store(NOW + 3599, Ordering::SeqCst);
        cache.get_detail(632470).await.unwrap();
        assert_eq!(store.detail(632470).await.unwrap().unwrap().fetched_at, NOW);

        now.store(NOW + 3600, Ordering::SeqCst);
        cache.get_detail(632470).await.unwrap();
        assert_eq!(
            store.detail(632470).await.unwrap().unwrap().fetched_at,
            NOW + 3600
        );
    }

    #[tokio::test]
    async fn test_not_found_returns_none_and_writes_nothing() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher.expect_fetch_detail().times(1).returning(|_| Ok(None));

        let cache = cache_with(store.clone(), fetcher, test_config());

        assert_eq!(cache.get_detail(1).await.unwrap(), None);
        assert_eq!(store.detail(1).await.unwrap(), None);
        assert!(store.index_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_on_stale_record_returns_none() {
        let store = setup_store().await;
        store
            .upsert_detail(&DetailRecord {
                item_id: 7,
                payload: rpg_payload("Delisted"),
                fetched_at: NOW - 10_000,
            })
            .await
            .unwrap();

        let mut fetcher = mock_fetcher();
        fetcher.expect_fetch_detail().times(1).returning(|_| Ok(None));

        let cache = cache_with(store.clone(), fetcher, test_config());

        assert_eq!(cache.get_detail(7).await.unwrap(), None);
        // the stale row is left as it was
        assert_eq!(
            store.detail(7).await.unwrap().unwrap().fetched_at,
            NOW - 10_000
        );
    }

    #[tokio::test]
    async fn test_refresh_updates_search_index() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .returning(|_| Ok(Some(rpg_payload("Baldur's Gate 3"))));

        let cache = cache_with(store.clone(), fetcher, test_config());
        cache.get_detail(1086940).await.unwrap();

        let entries = store.index_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item_id, 1086940);
        assert_eq!(entries[0].name.as_deref(), Some("Baldur's Gate 3"));
        assert_eq!(entries[0].genres, vec!["RPG"]);
        assert_eq!(entries[0].categories, vec!["Single-player"]);
        assert_eq!(entries[0].updated_at, NOW);
    }

    #[tokio::test]
    async fn test_upstream_error_without_record_propagates() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(1)
            .returning(|_| Err(AppError::Upstream("503".to_string())));

        let cache = cache_with(store, fetcher, test_config());

        let result = cache.get_detail(10).await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_upstream_error_serves_stale_record() {
        let store = setup_store().await;
        store
            .upsert_detail(&DetailRecord {
                item_id: 10,
                payload: rpg_payload("Old"),
                fetched_at: NOW - 10_000,
            })
            .await
            .unwrap();

        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(1)
            .returning(|_| Err(AppError::Upstream("503".to_string())));

        let cache = cache_with(store, fetcher, test_config());

        assert_eq!(cache.get_detail(10).await.unwrap(), Some(rpg_payload("Old")));
    }

    #[tokio::test]
    async fn test_upstream_error_with_stale_disabled_propagates() {
        let store = setup_store().await;
        store
            .upsert_detail(&DetailRecord {
                item_id: 10,
                payload: rpg_payload("Old"),
                fetched_at: NOW - 10_000,
            })
            .await
            .unwrap();

        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .returning(|_| Err(AppError::Upstream("503".to_string())));

        let config = PipelineConfig {
            serve_stale_on_outage: false,
            ..test_config()
        };
        let cache = cache_with(store, fetcher, config);

        assert!(cache.get_detail(10).await.unwrap_err().is_upstream());
    }

    #[tokio::test]
    async fn test_upstream_error_is_retried() {
        let store = setup_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut fetcher = mock_fetcher();
        fetcher.expect_fetch_detail().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Upstream("429".to_string()))
            } else {
                Ok(Some(rpg_payload("Eventually")))
            }
        });

        let config = PipelineConfig {
            fetch_max_retries: 2,
            ..test_config()
        };
        let cache = cache_with(store, fetcher, config);

        assert_eq!(
            cache.get_detail(5).await.unwrap(),
            Some(rpg_payload("Eventually"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_upstream_error_is_not_retried() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(1)
            .returning(|_| Err(AppError::Internal("bad payload".to_string())));

        let config = PipelineConfig {
            fetch_max_retries: 3,
            ..test_config()
        };
        let cache = cache_with(store, fetcher, config);

        assert!(matches!(cache.get_detail(5).await, Err(AppError::Internal(_))));
    }

    /// Fetcher that sleeps before answering so callers pile up on the gate
    struct SlowFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl DetailFetcher for SlowFetcher {
        async fn fetch_detail(&self, _item_id: ItemId) -> AppResult<Option<DetailPayload>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Some(rpg_payload("Slow")))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let store = setup_store().await;
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let cache = Arc::new(DetailCache::new(store, fetcher.clone(), test_config()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.get_detail(42).await }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Some(rpg_payload("Slow")));
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_as_upstream_error() {
        let store = setup_store().await;
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(5),
        });
        let config = PipelineConfig {
            fetch_timeout_secs: 0,
            ..test_config()
        };
        let cache = DetailCache::new(store, fetcher, config);

        let result = cache.get_detail(42).await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_get_genres() {
        let store = setup_store().await;
        let mut fetcher = mock_fetcher();
        fetcher.expect_fetch_detail().returning(|id| {
            if id == 1 {
                Ok(Some(rpg_payload("One")))
            } else {
                Ok(None)
            }
        });

        let cache = cache_with(store, fetcher, test_config());

        assert_eq!(cache.get_genres(1).await.unwrap(), Some(vec!["RPG".to_string()]));
        assert_eq!(cache.get_genres(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_index_write_leaves_no_fresh_detail() {
        let store = setup_store().await;
        sqlx::query("DROP TABLE app_index")
            .execute(store.pool())
            .await
            .unwrap();

        let mut fetcher = mock_fetcher();
        fetcher
            .expect_fetch_detail()
            .times(3)
            .returning(|_| Ok(Some(rpg_payload("Hades"))));

        let cache = cache_with(store.clone(), fetcher, test_config());

        assert!(matches!(cache.get_detail(1145360).await, Err(AppError::Database(_))));
        assert_eq!(store.detail(1145360).await.unwrap(), None);

        // nothing was cached, so the next call goes back to the catalog
        assert!(cache.get_detail(1145360).await.is_err());

        crate::db::init_schema(store.pool()).await.unwrap();
        assert_eq!(
            cache.get_detail(1145360).await.unwrap(),
            Some(rpg_payload("Hades"))
        );
        assert_eq!(store.index_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_releases_gate() {
        let store = setup_store().await;
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(60),
        });
        let cache = Arc::new(DetailCache::new(store, fetcher.clone(), test_config()));

        let task = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_detail(42).await })
        };
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.in_flight_len(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight_len(), 0);
    }

    fn record_fetched_at(fetched_at: i64) -> DetailRecord {
        DetailRecord {
            item_id: 1,
            payload: rpg_payload("Mirrored"),
            fetched_at,
        }
    }

    #[test]
    fn test_accelerator_hit_freshness_boundary() {
        let record = record_fetched_at(NOW);

        assert_eq!(fresh_only(record.clone(), NOW + 3599, 3600), Some(record.clone()));
        assert_eq!(fresh_only(record.clone(), NOW + 3600, 3600), None);
        assert_eq!(fresh_only(record, NOW + 90_000, 3600), None);
    }

    #[test]
    fn test_mirror_ttl_is_remaining_freshness() {
        let record = record_fetched_at(NOW);

        assert_eq!(mirror_ttl(&record, NOW, 3600), Some(3600));
        assert_eq!(mirror_ttl(&record, NOW + 3599, 3600), Some(1));
        assert_eq!(mirror_ttl(&record, NOW + 3600, 3600), None);
        assert_eq!(mirror_ttl(&record, NOW + 7200, 3600), None);
    }
}
