use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::IndexReport,
};

use super::{auth::CurrentOwner, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    appids: Option<String>,
}

/// Fetches details for the caller's owned games
pub async fn from_owned(
    State(state): State<AppState>,
    CurrentOwner(owner_id): CurrentOwner,
) -> AppResult<Json<IndexReport>> {
    let report = state.indexer.index_from_owned(&owner_id).await?;
    Ok(Json(report))
}

/// Fetches details for an explicit `appids=1,2,3` list
pub async fn from_list(
    State(state): State<AppState>,
    _owner: CurrentOwner,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<IndexReport>> {
    let raw = params
        .appids
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing appids".to_string()))?;

    let report = state.indexer.index_from_list(&raw).await?;
    Ok(Json(report))
}
