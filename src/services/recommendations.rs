use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    config::PipelineConfig,
    db::Store,
    error::AppResult,
    models::{ItemId, Profile, ScoredCandidate},
    services::{
        profile::ProfileBuilder,
        scorer::{rank, Scorer},
    },
};

/// Generates personalized game recommendations
///
/// Candidates are every indexed game the owner does not already own. Each is
/// scored against the owner's genre profile and the best are returned.
pub struct Recommender {
    store: Arc<dyn Store>,
    profiles: ProfileBuilder,
    scorer: Scorer,
    config: PipelineConfig,
}

impl Recommender {
    pub fn new(
        store: Arc<dyn Store>,
        profiles: ProfileBuilder,
        scorer: Scorer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            scorer,
            config,
        }
    }

    pub async fn build_profile(&self, owner_id: &str) -> AppResult<Profile> {
        self.profiles
            .build_profile(owner_id, self.config.profile_top_n)
            .await
    }

    pub async fn recommend(&self, owner_id: &str) -> AppResult<Vec<ScoredCandidate>> {
        let profile = self.build_profile(owner_id).await?;
        let candidates = self.candidates(owner_id).await?;

        tracing::info!(
            owner_id = %owner_id,
            candidates = candidates.len(),
            profile_genres = profile.len(),
            "Scoring recommendation candidates"
        );

        let mut ranked = self.score_all(&candidates, &profile).await?;
        ranked.truncate(self.config.recommendation_limit);

        Ok(ranked)
    }

    /// Indexed games minus those the owner already has
    pub async fn candidates(&self, owner_id: &str) -> AppResult<Vec<ItemId>> {
        let owned: HashSet<ItemId> = self
            .store
            .owned_item_ids(owner_id)
            .await?
            .into_iter()
            .collect();

        Ok(self
            .store
            .index_entries()
            .await?
            .into_iter()
            .map(|entry| entry.item_id)
            .filter(|item_id| !owned.contains(item_id))
            .collect())
    }

    /// Scores and ranks a batch of items.
    ///
    /// An upstream failure on one item drops that item; store failures abort.
    pub async fn score_all(&self, item_ids: &[ItemId], profile: &Profile) -> AppResult<Vec<ScoredCandidate>> {
        let mut scored = Vec::with_capacity(item_ids.len());
        let mut skipped = 0usize;

        for &item_id in item_ids {
            match self.scorer.score_candidate(item_id, profile).await {
                Ok(candidate) => scored.push(candidate),
                Err(e) if e.is_upstream() => {
                    skipped += 1;
                    tracing::warn!(item_id = item_id, error = %e, "Skipping candidate");
                }
                Err(e) => return Err(e),
            }
        }

        if skipped > 0 {
            tracing::warn!(
                scored = scored.len(),
                skipped = skipped,
                "Partial candidate scoring failure"
            );
        }

        rank(&mut scored);
        Ok(scored)
    }
}
