use chrono::Utc;
use std::sync::Arc;

use crate::{
    db::{Cache, CacheKey, Store},
    error::AppResult,
    models::{OwnedGamesView, OwnedItem, SyncReport, TopOwnedGame},
    services::providers::LibraryProvider,
};

const OWNED_VIEW_LIMIT: usize = 30;
const OWNED_VIEW_CACHE_TTL: u64 = 300; // 5 minutes

/// Keeps the local copy of owners' Steam libraries up to date
pub struct LibraryService {
    store: Arc<dyn Store>,
    provider: Arc<dyn LibraryProvider>,
    cache: Option<Cache>,
}

impl LibraryService {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn LibraryProvider>) -> Self {
        Self {
            store,
            provider,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Pulls the owner's library from Steam and upserts every game
    pub async fn sync_owned(&self, owner_id: &str) -> AppResult<SyncReport> {
        let synced_at = Utc::now().timestamp();
        self.store.ensure_user(owner_id, synced_at).await?;

        let games = self.provider.fetch_owned_games(owner_id).await?;

        for game in &games {
            self.store
                .upsert_owned_item(&OwnedItem {
                    owner_id: owner_id.to_string(),
                    item_id: game.appid,
                    display_name: game.name.clone(),
                    playtime_minutes: game.playtime_forever,
                    last_synced_at: synced_at,
                })
                .await?;
        }

        tracing::info!(owner_id = %owner_id, games = games.len(), "Synced owned games");

        Ok(SyncReport {
            owner_id: owner_id.to_string(),
            synced_games: games.len(),
            last_synced: synced_at,
        })
    }

    /// Live view of the owner's most played games, straight from Steam
    pub async fn owned_games_view(&self, owner_id: &str) -> AppResult<OwnedGamesView> {
        let key = CacheKey::OwnedGames(owner_id.to_string());

        if let Some(cache) = &self.cache {
            match cache.get_from_cache::<OwnedGamesView>(&key).await {
                Ok(Some(view)) => return Ok(view),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Owned games cache read failed"),
            }
        }

        let mut games = self.provider.fetch_owned_games(owner_id).await?;
        games.sort_by(|a, b| b.playtime_forever.cmp(&a.playtime_forever));

        let view = OwnedGamesView {
            owner_id: owner_id.to_string(),
            total_games: games.len(),
            top_games: games
                .into_iter()
                .take(OWNED_VIEW_LIMIT)
                .map(|game| TopOwnedGame {
                    item_id: game.appid,
                    name: game.name,
                    playtime_minutes: game.playtime_forever,
                })
                .collect(),
        };

        if let Some(cache) = &self.cache {
            cache.set_in_background(&key, &view, OWNED_VIEW_CACHE_TTL);
        }

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, SqliteStore};
    use crate::error::AppError;
    use crate::models::ApiOwnedGame;
    use crate::services::providers::MockLibraryProvider;
    use tokio_test::{assert_err, assert_ok};

    const OWNER: &str = "76561198000000001";

    fn api_game(appid: u32, playtime_forever: i64) -> ApiOwnedGame {
        ApiOwnedGame {
            appid,
            name: Some(format!("Game {}", appid)),
            playtime_forever,
        }
    }

    async fn setup(provider: MockLibraryProvider) -> (Arc<SqliteStore>, LibraryService) {
        let store = Arc::new(SqliteStore::new(create_memory_pool().await.unwrap()));
        let service = LibraryService::new(store.clone(), Arc::new(provider));
        (store, service)
    }

    #[tokio::test]
    async fn test_sync_upserts_every_game() {
        let mut provider = MockLibraryProvider::new();
        provider
            .expect_fetch_owned_games()
            .times(2)
            .returning(|_| Ok(vec![api_game(620, 754), api_game(440, 12)]));
        let (store, service) = setup(provider).await;

        let report = assert_ok!(service.sync_owned(OWNER).await);
        assert_eq!(report.synced_games, 2);
        assert_eq!(report.owner_id, OWNER);

        // a second sync updates in place
        service.sync_owned(OWNER).await.unwrap();
        let items = store.owned_items(OWNER, 50).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, 620);
        assert_eq!(items[0].display_name.as_deref(), Some("Game 620"));
    }

    #[tokio::test]
    async fn test_sync_failure_propagates() {
        let mut provider = MockLibraryProvider::new();
        provider
            .expect_fetch_owned_games()
            .returning(|_| Err(AppError::Upstream("500".to_string())));
        let (store, service) = setup(provider).await;

        let err = assert_err!(service.sync_owned(OWNER).await);
        assert!(err.is_upstream());
        assert!(store.owned_items(OWNER, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owned_view_sorted_and_trimmed() {
        let mut provider = MockLibraryProvider::new();
        provider
            .expect_fetch_owned_games()
            .returning(|_| Ok((1..=40).map(|id| api_game(id, id as i64 * 10)).collect()));
        let (_store, service) = setup(provider).await;

        let view = service.owned_games_view(OWNER).await.unwrap();

        assert_eq!(view.total_games, 40);
        assert_eq!(view.top_games.len(), 30);
        assert_eq!(view.top_games[0].item_id, 40);
        assert_eq!(view.top_games[29].item_id, 11);
    }
}
