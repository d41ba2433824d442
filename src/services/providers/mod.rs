/// Remote catalog and library abstractions
///
/// The recommendation pipeline only ever talks to these traits, so the
/// Steam-backed implementation can be swapped for fakes in tests.
use std::collections::HashMap;

use crate::{
    error::AppResult,
    models::{ApiOwnedGame, DetailPayload, ItemId},
};

pub mod steam;

pub use steam::SteamClient;

/// Fetches item details from the remote catalog
///
/// `Ok(None)` means the catalog answered and the item does not exist.
/// Transport and HTTP failures are `Err(AppError::Upstream | HttpClient)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, item_id: ItemId) -> AppResult<Option<DetailPayload>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Lists the games an owner has in their library
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LibraryProvider: Send + Sync {
    async fn fetch_owned_games(&self, owner_id: &str) -> AppResult<Vec<ApiOwnedGame>>;
}

/// Confirms an OpenID positive assertion with the identity provider
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// URL the browser is sent to for login
    fn login_url(&self) -> String;

    /// True when the provider confirms the callback parameters are authentic
    async fn verify(&self, params: &HashMap<String, String>) -> AppResult<bool>;
}
