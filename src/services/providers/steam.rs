/// Steam provider
///
/// Backs all three collaborator traits:
/// 1. App details: store.steampowered.com/api/appdetails?appids={id}
/// 2. Owned games: api.steampowered.com/IPlayerService/GetOwnedGames/v0001/
/// 3. OpenID 2.0 login against steamcommunity.com
use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode, Url};

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{ApiAppDetailsEntry, ApiOwnedGame, ApiOwnedGamesEnvelope, DetailPayload, ItemId},
    services::providers::{DetailFetcher, IdentityVerifier, LibraryProvider},
};

const USER_AGENT: &str = concat!("steamrec-api/", env!("CARGO_PKG_VERSION"));
const OPENID_NS: &str = "http://specs.openid.net/auth/2.0";
const OPENID_IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";
const CLAIMED_ID_PREFIXES: [&str; 2] = [
    "https://steamcommunity.com/openid/id/",
    "http://steamcommunity.com/openid/id/",
];

#[derive(Clone)]
pub struct SteamClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    store_url: String,
    openid_url: String,
    base_url: String,
}

impl SteamClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.pipeline.fetch_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.steam_api_key.clone(),
            api_url: config.steam_api_url.trim_end_matches('/').to_string(),
            store_url: config.steam_store_url.trim_end_matches('/').to_string(),
            openid_url: config.steam_openid_url.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Turns a non-success status into an upstream error, keeping the body for the log
    async fn check_status(response: reqwest::Response, what: &str) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "{} request failed", what);

        let reason = if status == StatusCode::TOO_MANY_REQUESTS {
            "rate limited".to_string()
        } else {
            format!("status {}", status)
        };
        Err(AppError::Upstream(format!("Steam {} returned {}", what, reason)))
    }
}

/// Pulls the SteamID64 out of an OpenID claimed id URL
pub fn extract_steam_id(claimed_id: &str) -> Option<String> {
    let id = CLAIMED_ID_PREFIXES
        .iter()
        .find_map(|prefix| claimed_id.strip_prefix(prefix))?;

    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

#[async_trait::async_trait]
impl DetailFetcher for SteamClient {
    async fn fetch_detail(&self, item_id: ItemId) -> AppResult<Option<DetailPayload>> {
        let url = format!("{}/api/appdetails", self.store_url);
        let key = item_id.to_string();

        tracing::debug!(item_id = item_id, "Fetching app details from Steam store");

        let response = self
            .http_client
            .get(&url)
            .query(&[("appids", key.as_str())])
            .send()
            .await?;
        let response = Self::check_status(response, "appdetails").await?;

        // Steam answers `null` for ids it has never heard of
        let envelope: Option<HashMap<String, ApiAppDetailsEntry>> = response.json().await?;
        let payload = envelope
            .and_then(|mut entries| entries.remove(&key))
            .filter(|entry| entry.success)
            .and_then(|entry| entry.data)
            .map(DetailPayload::new);

        if payload.is_none() {
            tracing::debug!(item_id = item_id, "App not found in Steam store");
        }

        Ok(payload)
    }

    fn name(&self) -> &'static str {
        "steam"
    }
}

#[async_trait::async_trait]
impl LibraryProvider for SteamClient {
    async fn fetch_owned_games(&self, owner_id: &str) -> AppResult<Vec<ApiOwnedGame>> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Internal(
                "Steam API key is not configured".to_string(),
            ));
        }

        let url = format!("{}/IPlayerService/GetOwnedGames/v0001/", self.api_url);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamid", owner_id),
                ("include_appinfo", "1"),
                ("include_played_free_games", "1"),
                ("format", "json"),
            ])
            .send()
            .await?;
        let response = Self::check_status(response, "GetOwnedGames").await?;

        let envelope: ApiOwnedGamesEnvelope = response.json().await?;
        let games = envelope.response.games.unwrap_or_default();

        tracing::info!(owner_id = %owner_id, games = games.len(), "Fetched owned games");

        Ok(games)
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for SteamClient {
    fn login_url(&self) -> String {
        let return_to = format!("{}/auth/steam/callback", self.base_url);
        let params = [
            ("openid.ns", OPENID_NS),
            ("openid.mode", "checkid_setup"),
            ("openid.return_to", return_to.as_str()),
            ("openid.realm", self.base_url.as_str()),
            ("openid.identity", OPENID_IDENTIFIER_SELECT),
            ("openid.claimed_id", OPENID_IDENTIFIER_SELECT),
        ];

        match Url::parse_with_params(&self.openid_url, &params) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::error!(error = %e, url = %self.openid_url, "Invalid OpenID endpoint");
                self.openid_url.clone()
            }
        }
    }

    async fn verify(&self, params: &HashMap<String, String>) -> AppResult<bool> {
        let mut form = params.clone();
        form.insert("openid.mode".to_string(), "check_authentication".to_string());

        let response = self
            .http_client
            .post(&self.openid_url)
            .form(&form)
            .send()
            .await?;
        let response = Self::check_status(response, "OpenID").await?;
        let body = response.text().await?;

        Ok(body.contains("is_valid:true"))
    }
}
