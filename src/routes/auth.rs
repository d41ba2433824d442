use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::{
    error::{AppError, AppResult},
    models::OwnerId,
    services::{
        providers::steam::extract_steam_id,
        session::{cookie_value, expired_session_cookie, session_cookie, SESSION_COOKIE},
    },
};

use super::AppState;

/// Owner id of the logged-in caller, resolved from the session cookie
#[derive(Debug, Clone)]
pub struct CurrentOwner(pub OwnerId);

#[async_trait]
impl FromRequestParts<AppState> for CurrentOwner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|raw| cookie_value(raw, SESSION_COOKIE))
            .and_then(|token| state.sessions.resolve(token))
            .map(CurrentOwner)
            .ok_or_else(|| AppError::Unauthorized("Not logged in".to_string()))
    }
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Sends the browser to the Steam OpenID login page
pub async fn login(State(state): State<AppState>) -> Response {
    redirect(&state.identity.login_url())
}

/// OpenID return endpoint: verifies the assertion and opens a session
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let claimed_id = params
        .get("openid.claimed_id")
        .cloned()
        .ok_or_else(|| AppError::InvalidInput("Missing openid.claimed_id".to_string()))?;

    if !state.identity.verify(&params).await? {
        tracing::warn!(claimed_id = %claimed_id, "OpenID assertion rejected");
        return Err(AppError::InvalidInput("OpenID authentication failed".to_string()));
    }

    let owner_id = extract_steam_id(&claimed_id)
        .ok_or_else(|| AppError::InvalidInput("Could not extract SteamID".to_string()))?;

    tracing::info!(owner_id = %owner_id, "Logged in");

    let token = state.sessions.sign(&owner_id)?;
    Ok((
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, session_cookie(&token)),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response())
}

pub async fn logout() -> Response {
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, expired_session_cookie()),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response()
}

pub async fn me(CurrentOwner(owner_id): CurrentOwner) -> Json<Value> {
    Json(json!({ "owner_id": owner_id }))
}
