use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    models::{OwnedGamesView, SyncReport},
};

use super::{auth::CurrentOwner, AppState};

/// Live top-played view of the caller's library
pub async fn owned_games(
    State(state): State<AppState>,
    CurrentOwner(owner_id): CurrentOwner,
) -> AppResult<Json<OwnedGamesView>> {
    let view = state.library.owned_games_view(&owner_id).await?;
    Ok(Json(view))
}

/// Copies the caller's library into the local store
pub async fn sync(
    State(state): State<AppState>,
    CurrentOwner(owner_id): CurrentOwner,
) -> AppResult<Json<SyncReport>> {
    let report = state.library.sync_owned(&owner_id).await?;
    Ok(Json(report))
}
