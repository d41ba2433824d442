use std::sync::Arc;
use std::time::Duration;

use crate::{
    db::Store,
    error::AppResult,
    models::{IndexReport, ItemId},
    services::detail_cache::DetailCache,
};

pub const OWNED_INDEX_LIMIT: usize = 100;
pub const LIST_INDEX_LIMIT: usize = 200;

/// Warms the detail cache (and with it the search index) ahead of scoring
pub struct Indexer {
    store: Arc<dyn Store>,
    details: Arc<DetailCache>,
    delay: Duration,
}

/// Parses a comma separated id list, silently dropping anything non-numeric
pub fn parse_item_list(raw: &str) -> Vec<ItemId> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|part| part.parse().ok())
        .collect()
}

impl Indexer {
    pub fn new(store: Arc<dyn Store>, details: Arc<DetailCache>, delay: Duration) -> Self {
        Self {
            store,
            details,
            delay,
        }
    }

    /// Indexes the first owned games of an owner, in item id order
    pub async fn index_from_owned(&self, owner_id: &str) -> AppResult<IndexReport> {
        let item_ids = self.store.owned_item_ids(owner_id).await?;
        self.index_items(&item_ids, OWNED_INDEX_LIMIT).await
    }

    pub async fn index_from_list(&self, raw: &str) -> AppResult<IndexReport> {
        let item_ids = parse_item_list(raw);
        self.index_items(&item_ids, LIST_INDEX_LIMIT).await
    }

    /// Looks up at most `limit` items, pausing between catalog calls.
    ///
    /// Unknown items and upstream failures count as not indexed.
    pub async fn index_items(&self, item_ids: &[ItemId], limit: usize) -> AppResult<IndexReport> {
        let batch = &item_ids[..item_ids.len().min(limit)];
        let mut indexed = 0;

        for (position, &item_id) in batch.iter().enumerate() {
            if position > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.details.get_detail(item_id).await {
                Ok(Some(_)) => indexed += 1,
                Ok(None) => tracing::debug!(item_id = item_id, "Not in catalog, skipped"),
                Err(e) if e.is_upstream() => {
                    tracing::warn!(item_id = item_id, error = %e, "Index lookup failed")
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(indexed = indexed, checked = batch.len(), "Index pass complete");

        Ok(IndexReport {
            indexed,
            checked: batch.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::db::{create_memory_pool, SqliteStore};
    use crate::error::AppError;
    use crate::models::{DetailPayload, OwnedItem};
    use crate::services::providers::MockDetailFetcher;
    use serde_json::json;

    async fn setup(fetcher: MockDetailFetcher) -> (Arc<SqliteStore>, Indexer) {
        let store = Arc::new(SqliteStore::new(create_memory_pool().await.unwrap()));
        let config = PipelineConfig {
            fetch_max_retries: 0,
            ..PipelineConfig::default()
        };
        let details = Arc::new(DetailCache::new(store.clone(), Arc::new(fetcher), config));
        (store.clone(), Indexer::new(store, details, Duration::ZERO))
    }

    fn odd_ids_exist() -> MockDetailFetcher {
        let mut fetcher = MockDetailFetcher::new();
        fetcher.expect_name().return_const("mock");
        fetcher.expect_fetch_detail().returning(|id| match id {
            13 => Err(AppError::Upstream("503".to_string())),
            id if id % 2 == 1 => Ok(Some(DetailPayload::new(json!({"name": "odd"})))),
            _ => Ok(None),
        });
        fetcher
    }

    #[test]
    fn test_parse_item_list() {
        assert_eq!(parse_item_list("620, 440,abc,,-5, 70 "), vec![620, 440, 70]);
        assert!(parse_item_list("").is_empty());
    }

    #[tokio::test]
    async fn test_index_from_list_counts_found_items() {
        let (store, indexer) = setup(odd_ids_exist()).await;

        let report = indexer.index_from_list("1,2,3,13,x").await.unwrap();

        assert_eq!(report, IndexReport { indexed: 2, checked: 4 });
        assert_eq!(store.index_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_index_items_respects_limit() {
        let (_store, indexer) = setup(odd_ids_exist()).await;

        let report = indexer.index_items(&[1, 3, 5, 7], 2).await.unwrap();
        assert_eq!(report, IndexReport { indexed: 2, checked: 2 });
    }

    #[tokio::test]
    async fn test_index_from_owned() {
        let (store, indexer) = setup(odd_ids_exist()).await;
        for item_id in [1, 2, 5] {
            store
                .upsert_owned_item(&OwnedItem {
                    owner_id: "owner".to_string(),
                    item_id,
                    display_name: None,
                    playtime_minutes: 0,
                    last_synced_at: 0,
                })
                .await
                .unwrap();
        }

        let report = indexer.index_from_owned("owner").await.unwrap();
        assert_eq!(report, IndexReport { indexed: 2, checked: 3 });
    }
}
