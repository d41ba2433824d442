use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqlitePoolOptions},
    Row, Sqlite, SqlitePool,
};

use crate::{
    db::Store,
    error::{AppError, AppResult},
    models::{DetailPayload, DetailRecord, ItemId, OwnedItem, SearchIndexEntry},
};

/// Creates a SQLite connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    Ok(pool)
}

/// Creates a single-connection in-memory database with the schema applied.
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// pinned to one connection that is never recycled.
pub async fn create_memory_pool() -> AppResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Creates the tables if they do not exist yet (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            owner_id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS owned_games (
            owner_id TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            display_name TEXT,
            playtime_minutes INTEGER NOT NULL,
            last_synced_at INTEGER NOT NULL,
            PRIMARY KEY (owner_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_details (
            item_id INTEGER PRIMARY KEY,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_index (
            item_id INTEGER PRIMARY KEY,
            name TEXT,
            genres TEXT NOT NULL,
            categories TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database schema ready");

    Ok(())
}

/// `Store` backed by SQLite
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Serialization error: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> AppResult<T> {
    serde_json::from_str(json)
        .map_err(|e| AppError::Internal(format!("Stored JSON is corrupt: {}", e)))
}

type SqliteQuery = Query<'static, Sqlite, SqliteArguments<'static>>;

fn detail_upsert(record: &DetailRecord) -> AppResult<SqliteQuery> {
    Ok(sqlx::query(
        r#"
        INSERT INTO app_details (item_id, payload, fetched_at)
        VALUES (?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            payload = excluded.payload,
            fetched_at = excluded.fetched_at
        WHERE excluded.fetched_at >= app_details.fetched_at
        "#,
    )
    .bind(record.item_id)
    .bind(to_json(record.payload.as_value())?)
    .bind(record.fetched_at))
}

fn index_upsert(entry: &SearchIndexEntry) -> AppResult<SqliteQuery> {
    Ok(sqlx::query(
        r#"
        INSERT INTO app_index (item_id, name, genres, categories, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            name = excluded.name,
            genres = excluded.genres,
            categories = excluded.categories,
            updated_at = excluded.updated_at
        WHERE excluded.updated_at >= app_index.updated_at
        "#,
    )
    .bind(entry.item_id)
    .bind(entry.name.clone())
    .bind(to_json(&entry.genres)?)
    .bind(to_json(&entry.categories)?)
    .bind(entry.updated_at))
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn ensure_user(&self, owner_id: &str, created_at: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (owner_id, created_at)
            VALUES (?, ?)
            ON CONFLICT(owner_id) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_owned_item(&self, item: &OwnedItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO owned_games (owner_id, item_id, display_name, playtime_minutes, last_synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, item_id) DO UPDATE SET
                display_name = excluded.display_name,
                playtime_minutes = excluded.playtime_minutes,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(&item.owner_id)
        .bind(item.item_id)
        .bind(&item.display_name)
        .bind(item.playtime_minutes)
        .bind(item.last_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn owned_items(&self, owner_id: &str, limit: u32) -> AppResult<Vec<OwnedItem>> {
        let items = sqlx::query_as::<_, OwnedItem>(
            r#"
            SELECT owner_id, item_id, display_name, playtime_minutes, last_synced_at
            FROM owned_games
            WHERE owner_id = ?
            ORDER BY playtime_minutes DESC, item_id ASC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn owned_item_ids(&self, owner_id: &str) -> AppResult<Vec<ItemId>> {
        let ids = sqlx::query_scalar::<_, ItemId>(
            "SELECT item_id FROM owned_games WHERE owner_id = ? ORDER BY item_id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn detail(&self, item_id: ItemId) -> AppResult<Option<DetailRecord>> {
        let row = sqlx::query("SELECT payload, fetched_at FROM app_details WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(DetailRecord {
                    item_id,
                    payload: DetailPayload::new(from_json(&payload)?),
                    fetched_at: row.try_get("fetched_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_detail(&self, record: &DetailRecord) -> AppResult<()> {
        detail_upsert(record)?.execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_index_entry(&self, entry: &SearchIndexEntry) -> AppResult<()> {
        index_upsert(entry)?.execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_detail_with_index(
        &self,
        record: &DetailRecord,
        entry: &SearchIndexEntry,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let applied = detail_upsert(record)?
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if applied {
            index_upsert(entry)?.execute(&mut *tx).await?;
        }

        // dropping the transaction on an error path rolls both writes back
        tx.commit().await?;
        Ok(applied)
    }

    async fn index_entries(&self) -> AppResult<Vec<SearchIndexEntry>> {
        let rows = sqlx::query(
            "SELECT item_id, name, genres, categories, updated_at FROM app_index ORDER BY item_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let genres: String = row.try_get("genres")?;
            let categories: String = row.try_get("categories")?;
            entries.push(SearchIndexEntry {
                item_id: row.try_get("item_id")?,
                name: row.try_get("name")?,
                genres: from_json(&genres)?,
                categories: from_json(&categories)?,
                updated_at: row.try_get("updated_at")?,
            });
        }

        Ok(entries)
    }
}
