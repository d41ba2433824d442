use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    db::{Cache, Store},
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{
        providers::{DetailFetcher, IdentityVerifier, LibraryProvider},
        DetailCache, Indexer, LibraryService, ProfileBuilder, Recommender, Scorer, SessionSigner,
    },
};

pub mod auth;
pub mod index;
pub mod library;
pub mod recommendations;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recommender: Arc<Recommender>,
    pub indexer: Arc<Indexer>,
    pub library: Arc<LibraryService>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub sessions: SessionSigner,
}

impl AppState {
    /// Wires the pipeline together from its collaborators
    pub fn build(
        config: &Config,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn DetailFetcher>,
        library: Arc<dyn LibraryProvider>,
        identity: Arc<dyn IdentityVerifier>,
        cache: Option<Cache>,
    ) -> Self {
        let pipeline = config.pipeline.clone();

        let mut details = DetailCache::new(store.clone(), fetcher, pipeline.clone());
        let mut library = LibraryService::new(store.clone(), library);
        if let Some(cache) = cache {
            details = details.with_accelerator(cache.clone());
            library = library.with_cache(cache);
        }
        let details = Arc::new(details);

        let recommender = Recommender::new(
            store.clone(),
            ProfileBuilder::new(store.clone(), details.clone(), pipeline.min_playtime_minutes),
            Scorer::new(details.clone(), pipeline.max_reasons),
            pipeline.clone(),
        );
        let indexer = Indexer::new(store, details, pipeline.index_delay());

        Self {
            recommender: Arc::new(recommender),
            indexer: Arc::new(indexer),
            library: Arc::new(library),
            identity,
            sessions: SessionSigner::new(&config.session_secret),
        }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Authentication
        .route("/login", get(auth::login))
        .route("/auth/steam/callback", get(auth::callback))
        .route("/logout", get(auth::logout))
        .route("/me", get(auth::me))
        // Library
        .route("/me/owned-games", get(library::owned_games))
        .route("/sync/owned-games", get(library::sync).post(library::sync))
        // Detail indexing
        .route("/index/from-owned", get(index::from_owned))
        .route("/index/from-list", get(index::from_list))
        // Recommendations
        .route("/me/profile", get(recommendations::profile))
        .route("/recommendations", get(recommendations::recommend))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
