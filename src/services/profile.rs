use std::sync::Arc;

use crate::{
    db::Store,
    error::AppResult,
    models::{OwnedItem, Profile},
    services::detail_cache::DetailCache,
};

/// Dampens playtime so a single thousand-hour game cannot drown out the rest
pub fn playtime_weight(playtime_minutes: i64) -> f64 {
    (1.0 + playtime_minutes.max(0) as f64).ln()
}

/// Builds genre-affinity profiles from an owner's most played games
pub struct ProfileBuilder {
    store: Arc<dyn Store>,
    details: Arc<DetailCache>,
    min_playtime_minutes: i64,
}

impl ProfileBuilder {
    pub fn new(store: Arc<dyn Store>, details: Arc<DetailCache>, min_playtime_minutes: i64) -> Self {
        Self {
            store,
            details,
            min_playtime_minutes,
        }
    }

    /// Accumulates `ln(1 + playtime)` onto every genre of each of the owner's
    /// `top_n` most played games.
    ///
    /// Games under the playtime threshold, unknown to the catalog, or whose
    /// detail lookup hits an upstream failure are skipped. Store failures
    /// abort the build.
    pub async fn build_profile(&self, owner_id: &str, top_n: u32) -> AppResult<Profile> {
        let rows = self.store.owned_items(owner_id, top_n).await?;
        let mut profile = Profile::new();
        let mut contributing = 0usize;

        for row in &rows {
            if row.playtime_minutes < self.min_playtime_minutes {
                continue;
            }

            if self.accumulate(&mut profile, row).await? {
                contributing += 1;
            }
        }

        tracing::info!(
            owner_id = %owner_id,
            rows = rows.len(),
            contributing = contributing,
            genres = profile.len(),
            "Built genre profile"
        );

        Ok(profile)
    }

    /// Adds one game's weight to the profile, returning whether it contributed
    async fn accumulate(&self, profile: &mut Profile, row: &OwnedItem) -> AppResult<bool> {
        let payload = match self.details.get_detail(row.item_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(false),
            Err(e) if e.is_upstream() => {
                tracing::warn!(
                    item_id = row.item_id,
                    error = %e,
                    "Skipping owned game, detail unavailable"
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let weight = playtime_weight(row.playtime_minutes);
        for genre in payload.genre_labels() {
            profile.add(&genre, weight);
        }

        Ok(true)
    }
}
