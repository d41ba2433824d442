use crate::{
    error::AppResult,
    models::{DetailRecord, ItemId, OwnedItem, SearchIndexEntry},
};

/// Persistent storage consumed by the recommendation pipeline
///
/// All writes are single-row upserts keyed by the row's natural key, so
/// concurrent writers to the same key resolve as last-write-wins.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Records the owner on first sight; later calls leave the row untouched
    async fn ensure_user(&self, owner_id: &str, created_at: i64) -> AppResult<()>;

    /// Inserts or refreshes one owned game
    async fn upsert_owned_item(&self, item: &OwnedItem) -> AppResult<()>;

    /// Up to `limit` owned games, most played first, ties by item id ascending
    async fn owned_items(&self, owner_id: &str, limit: u32) -> AppResult<Vec<OwnedItem>>;

    /// Every item id the owner has synced, in item id order
    async fn owned_item_ids(&self, owner_id: &str) -> AppResult<Vec<ItemId>>;

    async fn detail(&self, item_id: ItemId) -> AppResult<Option<DetailRecord>>;

    /// Overwrites the cached detail for the record's item.
    ///
    /// A write carrying an older `fetched_at` than the stored row is ignored.
    async fn upsert_detail(&self, record: &DetailRecord) -> AppResult<()>;

    /// Overwrites the index entry, ignoring writes older than the stored one
    async fn upsert_index_entry(&self, entry: &SearchIndexEntry) -> AppResult<()>;

    /// Writes a refreshed detail and its index entry in one transaction.
    ///
    /// Returns `false`, with nothing written, when the stored detail is newer.
    async fn upsert_detail_with_index(
        &self,
        record: &DetailRecord,
        entry: &SearchIndexEntry,
    ) -> AppResult<bool>;

    /// The whole search index, in item id order
    async fn index_entries(&self) -> AppResult<Vec<SearchIndexEntry>>;
}
