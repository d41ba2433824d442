use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ItemId;

/// Genre-affinity vector built from an owner's playtime history
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Profile {
    weights: HashMap<String, f64>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to the accumulator for `genre`
    pub fn add(&mut self, genre: &str, weight: f64) {
        *self.weights.entry(genre.to_string()).or_insert(0.0) += weight;
    }

    /// Accumulated weight, zero for unknown genres
    pub fn weight(&self, genre: &str) -> f64 {
        self.weights.get(genre).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, genre: &str) -> bool {
        self.weights.contains_key(genre)
    }

    pub fn genres(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl FromIterator<(String, f64)> for Profile {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut profile = Profile::new();
        for (genre, weight) in iter {
            profile.add(&genre, weight);
        }
        profile
    }
}

/// A candidate item with its affinity score and strongest matching genres
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub item_id: ItemId,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl ScoredCandidate {
    pub fn zero(item_id: ItemId) -> Self {
        Self {
            item_id,
            score: 0.0,
            reasons: Vec::new(),
        }
    }
}
