//! User-based collaborative filtering
//!
//! Ratings are centered per user into a preference matrix (unobserved cells
//! imputed to 0), users are compared by cosine similarity of their preference
//! rows, and a missing rating is predicted as the user's mean plus the
//! similarity-weighted preferences of the closest users who rated the item.

use crate::config::CollaborativeConfig;
use crate::error::{RecsysError, Result};
use crate::matrix::RatingMatrix;
use crate::persistence::{PersistentModel, StoredMatrix};
use crate::types::{rank_scored, ItemId, Prediction, Rating, ScoredItem, UserId};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Fitted user-kNN model, immutable once built
#[derive(Debug, Clone)]
pub struct CollaborativeFilteringModel {
    config: CollaborativeConfig,
    matrix: RatingMatrix,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    /// Centered ratings, 0 where unobserved. Similarity input only.
    preferences: Array2<f64>,
    /// Symmetric user x user cosine similarity
    similarity: Array2<f64>,
}

impl CollaborativeFilteringModel {
    /// Fit the model on `ratings`
    ///
    /// # Errors
    /// Returns `EmptyDataset` when there are no ratings to fit on.
    pub fn fit(ratings: &[Rating], config: CollaborativeConfig) -> Result<Self> {
        let start = Instant::now();

        let matrix = RatingMatrix::from_ratings(ratings);
        if matrix.is_empty() {
            return Err(RecsysError::EmptyDataset(
                "collaborative filtering needs at least one rating".to_string(),
            ));
        }

        let dense = matrix.to_dense(|_| 0.0);
        let preferences = Self::build_preferences(&matrix, &dense.user_ids, &dense.item_index);
        let similarity = Self::cosine_similarity_matrix(&preferences);

        tracing::info!(
            "Fitted collaborative filtering on {} users x {} items ({} ratings) in {:?}",
            matrix.num_users(),
            matrix.num_items(),
            matrix.nnz(),
            start.elapsed()
        );

        Ok(Self {
            config,
            user_index: dense.user_index,
            item_index: dense.item_index,
            matrix,
            preferences,
            similarity,
        })
    }

    fn build_preferences(
        matrix: &RatingMatrix,
        user_ids: &[UserId],
        item_index: &HashMap<ItemId, usize>,
    ) -> Array2<f64> {
        let mut preferences = Array2::<f64>::zeros((user_ids.len(), item_index.len()));

        for (u, &user) in user_ids.iter().enumerate() {
            let mean = matrix.user_mean(user).unwrap_or(0.0);
            if let Some(row) = matrix.user_row(user) {
                for (item, &rating) in row {
                    preferences[[u, item_index[item]]] = rating - mean;
                }
            }
        }

        preferences
    }

    /// Pairwise cosine similarity of the rows of `preferences`.
    ///
    /// Rows are L2-normalized once and multiplied; zero rows have similarity 0
    /// to everyone else. The diagonal is fixed to 1 and the upper triangle is
    /// mirrored so the result is exactly symmetric.
    fn cosine_similarity_matrix(preferences: &Array2<f64>) -> Array2<f64> {
        let mut normalized = preferences.clone();
        for mut row in normalized.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }

        let mut similarity = normalized.dot(&normalized.t());
        let n = similarity.nrows();
        for i in 0..n {
            similarity[[i, i]] = 1.0;
            for j in (i + 1)..n {
                let value = similarity[[i, j]].clamp(-1.0, 1.0);
                similarity[[i, j]] = value;
                similarity[[j, i]] = value;
            }
        }

        similarity
    }

    pub fn config(&self) -> &CollaborativeConfig {
        &self.config
    }

    pub fn rating_matrix(&self) -> &RatingMatrix {
        &self.matrix
    }

    /// Cosine similarity of two fitted users' preference vectors
    pub fn similarity(&self, a: UserId, b: UserId) -> Result<f64> {
        let ia = *self.user_index.get(&a).ok_or(RecsysError::UnknownUser(a))?;
        let ib = *self.user_index.get(&b).ok_or(RecsysError::UnknownUser(b))?;
        Ok(self.similarity[[ia, ib]])
    }

    /// Centered rating of `user` for `item`, 0 when unobserved
    pub fn preference(&self, user: UserId, item: ItemId) -> Option<f64> {
        let u = *self.user_index.get(&user)?;
        let i = *self.item_index.get(&item)?;
        Some(self.preferences[[u, i]])
    }

    /// The `k` most similar other users, most similar first
    pub fn similar_users(&self, user: UserId, k: usize) -> Result<Vec<(UserId, f64)>> {
        let u = *self
            .user_index
            .get(&user)
            .ok_or(RecsysError::UnknownUser(user))?;

        let mut similar: Vec<(UserId, f64)> = self
            .matrix
            .users()
            .filter(|&other| other != user)
            .map(|other| (other, self.similarity[[u, self.user_index[&other]]]))
            .collect();

        similar.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        similar.truncate(k);
        Ok(similar)
    }

    /// Predict a rating with the configured neighborhood parameters
    pub fn predict_one(&self, user: UserId, item: ItemId) -> f64 {
        self.predict_one_with(
            user,
            item,
            self.config.k_neighbors,
            self.config.similarity_threshold,
        )
    }

    /// Predict a rating for `(user, item)`
    ///
    /// - user and item known: user mean + weighted preferences of the
    ///   `k_neighbors` most similar raters above `similarity_threshold`
    ///   (user mean alone if none qualify)
    /// - user unknown: mean rating of the item
    /// - item unknown: user mean, or global mean if the user is unknown too
    pub fn predict_one_with(
        &self,
        user: UserId,
        item: ItemId,
        k_neighbors: usize,
        similarity_threshold: f64,
    ) -> f64 {
        let (Some(&u), true) = (self.user_index.get(&user), self.matrix.contains_item(item))
        else {
            return self.matrix.fallback_rating(user, item);
        };

        let user_mean = self.matrix.user_mean(user).unwrap_or(self.matrix.global_mean());
        let i = self.item_index[&item];

        let mut neighbors: Vec<(UserId, f64)> = self
            .matrix
            .raters_of(item)
            .map(|(rater, _)| (rater, self.similarity[[u, self.user_index[&rater]]]))
            .filter(|&(_, sim)| sim > similarity_threshold)
            .collect();

        neighbors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        neighbors.truncate(k_neighbors);

        let total: f64 = neighbors.iter().map(|(_, sim)| sim).sum();
        if neighbors.is_empty() || total.abs() < f64::EPSILON {
            return user_mean;
        }

        let delta: f64 = neighbors
            .iter()
            .map(|(rater, sim)| (sim / total) * self.preferences[[self.user_index[rater], i]])
            .sum();

        user_mean + delta
    }

    /// Predict every `(user, item)` pair, preserving input order
    pub fn predict(&self, pairs: &[(UserId, ItemId)]) -> Vec<f64> {
        pairs
            .iter()
            .map(|&(user, item)| self.predict_one(user, item))
            .collect()
    }

    /// Pair held-out ratings with predictions for evaluation
    pub fn predict_ratings(&self, ratings: &[Rating]) -> Vec<Prediction> {
        ratings
            .iter()
            .map(|r| Prediction {
                user_id: r.user_id,
                item_id: r.item_id,
                rating: r.rating,
                predicted: self.predict_one(r.user_id, r.item_id),
            })
            .collect()
    }

    /// Top `n` items of the fitted universe by predicted rating.
    ///
    /// Items the user already rated are not excluded.
    pub fn top_n(&self, user: UserId, n: usize) -> Result<Vec<ScoredItem>> {
        if n == 0 {
            return Err(RecsysError::invalid_config("n must be greater than 0"));
        }

        let mut scored: Vec<ScoredItem> = self
            .matrix
            .items()
            .map(|item_id| ScoredItem {
                item_id,
                score: self.predict_one(user, item_id),
            })
            .collect();

        rank_scored(&mut scored);
        scored.truncate(n);
        Ok(scored)
    }
}

/// Serializable representation of a fitted collaborative model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborativeState {
    config: CollaborativeConfig,
    matrix: RatingMatrix,
    similarity: StoredMatrix,
}

impl PersistentModel for CollaborativeFilteringModel {
    const MODEL_NAME: &'static str = "collaborative_filtering";

    type State = CollaborativeState;

    fn to_state(&self) -> Self::State {
        CollaborativeState {
            config: self.config.clone(),
            matrix: self.matrix.clone(),
            similarity: StoredMatrix::from_array(&self.similarity),
        }
    }

    fn from_state(state: Self::State) -> Result<Self> {
        let similarity = state.similarity.to_array()?;
        let users = state.matrix.num_users();
        if similarity.dim() != (users, users) {
            return Err(RecsysError::DataFormat(format!(
                "similarity matrix is {:?} but the rating matrix has {} users",
                similarity.dim(),
                users
            )));
        }

        let dense = state.matrix.to_dense(|_| 0.0);
        let preferences =
            Self::build_preferences(&state.matrix, &dense.user_ids, &dense.item_index);

        Ok(Self {
            config: state.config,
            user_index: dense.user_index,
            item_index: dense.item_index,
            matrix: state.matrix,
            preferences,
            similarity,
        })
    }
}
