use axum::{extract::State, Extension, Json};

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{Profile, RecommendationResponse},
};

use super::{auth::CurrentOwner, AppState};

/// Genre weights derived from the caller's most played games
pub async fn profile(
    State(state): State<AppState>,
    CurrentOwner(owner_id): CurrentOwner,
) -> AppResult<Json<Profile>> {
    let profile = state.recommender.build_profile(&owner_id).await?;
    Ok(Json(profile))
}

/// Handler for recommendations endpoint
pub async fn recommend(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    CurrentOwner(owner_id): CurrentOwner,
) -> AppResult<Json<RecommendationResponse>> {
    tracing::debug!(request_id = %request_id, owner_id = %owner_id, "Building recommendations");

    let recommendations = state.recommender.recommend(&owner_id).await?;
    Ok(Json(RecommendationResponse {
        owner_id,
        recommendations,
    }))
}
