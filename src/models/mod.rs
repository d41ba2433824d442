use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod profile;
pub mod steam;

pub use profile::{Profile, ScoredCandidate};
pub use steam::{ApiAppDetailsEntry, ApiOwnedGame, ApiOwnedGamesEnvelope};

/// Steam application id
pub type ItemId = u32;

/// SteamID64 of the authenticated user, kept as text like Steam reports it
pub type OwnerId = String;

/// A game in an owner's library with its cumulative playtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct OwnedItem {
    pub owner_id: OwnerId,
    pub item_id: ItemId,
    pub display_name: Option<String>,
    pub playtime_minutes: i64,
    pub last_synced_at: i64,
}

/// Cached store metadata for one item, shared across all owners
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRecord {
    pub item_id: ItemId,
    pub payload: DetailPayload,
    /// Unix seconds
    pub fetched_at: i64,
}

impl DetailRecord {
    /// Age in seconds relative to `now`
    pub fn age(&self, now: i64) -> i64 {
        now - self.fetched_at
    }

    /// Fresh while strictly younger than the TTL
    pub fn is_fresh(&self, now: i64, ttl_secs: i64) -> bool {
        self.age(now) < ttl_secs
    }
}

/// Parsed app details document as returned by the store catalog
///
/// Fields are read through typed accessors; an absent field is `None`
/// rather than an empty default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DetailPayload(Value);

impl DetailPayload {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Genre descriptions, or `None` when the document has no genre list
    pub fn genres(&self) -> Option<Vec<String>> {
        self.descriptions("genres")
    }

    /// Category descriptions, or `None` when the document has no category list
    pub fn categories(&self) -> Option<Vec<String>> {
        self.descriptions("categories")
    }

    /// Genres with "absent" folded into "no genres"
    pub fn genre_labels(&self) -> Vec<String> {
        self.genres().unwrap_or_default()
    }

    // Steam shapes these as [{"id": "1", "description": "Action"}, ...]
    fn descriptions(&self, field: &str) -> Option<Vec<String>> {
        let entries = self.0.get(field)?.as_array()?;
        Some(
            entries
                .iter()
                .filter_map(|entry| entry.get("description").and_then(Value::as_str))
                .filter(|description| !description.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Derived, queryable projection of a detail record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchIndexEntry {
    pub item_id: ItemId,
    pub name: Option<String>,
    pub genres: Vec<String>,
    pub categories: Vec<String>,
    pub updated_at: i64,
}

impl SearchIndexEntry {
    pub fn from_payload(item_id: ItemId, payload: &DetailPayload, updated_at: i64) -> Self {
        Self {
            item_id,
            name: payload.name().map(str::to_string),
            genres: payload.genre_labels(),
            categories: payload.categories().unwrap_or_default(),
            updated_at,
        }
    }
}

/// Summary returned after syncing an owner's library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub owner_id: OwnerId,
    pub synced_games: usize,
    pub last_synced: i64,
}

/// Summary returned after warming the detail cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexReport {
    pub indexed: usize,
    pub checked: usize,
}

/// Trimmed view of an owned game for the live library endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopOwnedGame {
    pub item_id: ItemId,
    pub name: Option<String>,
    pub playtime_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnedGamesView {
    pub owner_id: OwnerId,
    pub top_games: Vec<TopOwnedGame>,
    pub total_games: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub owner_id: OwnerId,
    pub recommendations: Vec<ScoredCandidate>,
}
