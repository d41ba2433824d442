use serde::Deserialize;
use serde_json::Value;

use super::ItemId;

// ============================================================================
// Steam Store API Types
// ============================================================================

/// One entry of the `appdetails` response, keyed by app id in the envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiAppDetailsEntry {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

// ============================================================================
// Steam Web API Types
// ============================================================================

/// Response from IPlayerService/GetOwnedGames
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOwnedGamesEnvelope {
    #[serde(default)]
    pub response: ApiOwnedGamesResponse,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiOwnedGamesResponse {
    #[serde(default)]
    pub game_count: Option<u32>,
    #[serde(default)]
    pub games: Option<Vec<ApiOwnedGame>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiOwnedGame {
    pub appid: ItemId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub playtime_forever: i64,
}
