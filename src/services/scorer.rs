use std::cmp::Ordering;
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{ItemId, Profile, ScoredCandidate},
    services::detail_cache::DetailCache,
};

/// Scores candidates by summing the profile weight of each of their genres
pub struct Scorer {
    details: Arc<DetailCache>,
    max_reasons: usize,
}

impl Scorer {
    pub fn new(details: Arc<DetailCache>, max_reasons: usize) -> Self {
        Self {
            details,
            max_reasons,
        }
    }

    /// Scores one candidate; an item unknown to the catalog scores zero
    pub async fn score_candidate(&self, item_id: ItemId, profile: &Profile) -> AppResult<ScoredCandidate> {
        match self.details.get_genres(item_id).await? {
            Some(genres) => Ok(score_genres(item_id, &genres, profile, self.max_reasons)),
            None => Ok(ScoredCandidate::zero(item_id)),
        }
    }
}

/// Pure scoring step.
///
/// Reasons are the candidate's genres ordered by profile weight (stable for
/// ties), cut to `max_reasons`, then stripped of non-positive weights.
pub fn score_genres(
    item_id: ItemId,
    genres: &[String],
    profile: &Profile,
    max_reasons: usize,
) -> ScoredCandidate {
    let score: f64 = genres.iter().map(|genre| profile.weight(genre)).sum();

    let mut reasons: Vec<&String> = genres.iter().collect();
    reasons.sort_by(|a, b| profile.weight(b).total_cmp(&profile.weight(a)));
    reasons.truncate(max_reasons);
    reasons.retain(|genre| profile.weight(genre) > 0.0);

    ScoredCandidate {
        item_id,
        score,
        reasons: reasons.into_iter().cloned().collect(),
    }
}

/// Orders candidates by descending score, then ascending item id
pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.item_id.cmp(&b.item_id),
        other => other,
    });
}
