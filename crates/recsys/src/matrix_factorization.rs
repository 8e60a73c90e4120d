//! Non-negative Matrix Factorization (NMF)
//!
//! Factors the dense user x item rating matrix `V` into non-negative user
//! factors `W` (users x k) and item factors `H` (k x items) with the
//! multiplicative update rules of Lee & Seung, minimizing the Frobenius norm
//! of `V - WH`. Unobserved train cells are filled per [`FillStrategy`] before
//! factoring.
//!
//! Held-out scoring defaults to [`HeldOutStrategy::RefitOnHeldOut`]: the
//! retained test rows are pivoted, filled with per-user means and factored
//! afresh, so held-out predictions do not come from the train-time factors.
//! [`HeldOutStrategy::TrainFactors`] scores them with the train factors
//! instead.

use crate::config::FactorizationConfig;
use crate::error::{RecsysError, Result};
use crate::matrix::RatingMatrix;
use crate::persistence::{PersistentModel, StoredMatrix};
use crate::types::{rank_scored, ItemId, Prediction, Rating, ScoredItem, UserId};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;

const EPSILON: f64 = 1e-10;
const CONVERGENCE_CHECK_INTERVAL: usize = 10;

/// How unobserved train cells are filled before factoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Zeros,
    #[serde(alias = "average", alias = "per-user-mean")]
    PerUserMean,
}

impl FromStr for FillStrategy {
    type Err = RecsysError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zeros" => Ok(Self::Zeros),
            "average" | "per_user_mean" | "per-user-mean" => Ok(Self::PerUserMean),
            other => Err(RecsysError::invalid_config(format!(
                "unsupported fill strategy '{}': only zeros or average",
                other
            ))),
        }
    }
}

/// How held-out ratings are scored by [`MatrixFactorization::predict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeldOutStrategy {
    /// Factor the retained held-out rows afresh and reconstruct from that
    RefitOnHeldOut,
    /// Reconstruct from the train-time factors
    TrainFactors,
}

impl FromStr for HeldOutStrategy {
    type Err = RecsysError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "refit" | "refit_on_held_out" => Ok(Self::RefitOnHeldOut),
            "train" | "train_factors" => Ok(Self::TrainFactors),
            other => Err(RecsysError::invalid_config(format!(
                "unsupported held-out strategy '{}'",
                other
            ))),
        }
    }
}

/// Result of one NMF run
#[derive(Debug, Clone)]
pub struct Factors {
    /// rows x k
    pub w: Array2<f64>,
    /// k x columns
    pub h: Array2<f64>,
    /// Frobenius norm of `V - WH`
    pub error: f64,
    pub iterations: usize,
}

/// Factor a non-negative matrix into rank-`k` non-negative factors
///
/// # Errors
/// `InvalidConfiguration` for `k == 0`, `max_iterations == 0` or a matrix
/// with negative entries.
pub fn nmf(
    v: &Array2<f64>,
    k: usize,
    max_iterations: usize,
    tolerance: f64,
    seed: u64,
) -> Result<Factors> {
    if k == 0 {
        return Err(RecsysError::invalid_config(
            "latent_factors must be greater than 0",
        ));
    }
    if max_iterations == 0 {
        return Err(RecsysError::invalid_config(
            "max_iterations must be greater than 0",
        ));
    }
    if v.iter().any(|&x| x < 0.0) {
        return Err(RecsysError::invalid_config(
            "NMF requires a non-negative matrix",
        ));
    }

    let (rows, cols) = v.dim();
    let scale = (v.mean().unwrap_or(0.0) / k as f64).sqrt();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut w = Array2::<f64>::zeros((rows, k));
    let mut h = Array2::<f64>::zeros((k, cols));
    w.mapv_inplace(|_| scale * rng.gen::<f64>());
    h.mapv_inplace(|_| scale * rng.gen::<f64>());

    let initial_error = frobenius_error(v, &w, &h);
    let mut previous_error = initial_error;
    let mut iterations = 0;

    for iteration in 1..=max_iterations {
        iterations = iteration;

        // H <- H * (W^T V) / (W^T W H)
        let numerator = w.t().dot(v);
        let denominator = w.t().dot(&w).dot(&h);
        h = &h * &(&numerator / &denominator.mapv(|x| x + EPSILON));

        // W <- W * (V H^T) / (W H H^T)
        let numerator = v.dot(&h.t());
        let denominator = w.dot(&h).dot(&h.t());
        w = &w * &(&numerator / &denominator.mapv(|x| x + EPSILON));

        if iteration % CONVERGENCE_CHECK_INTERVAL == 0 {
            let error = frobenius_error(v, &w, &h);
            tracing::debug!("NMF iteration {}: error = {:.4}", iteration, error);

            if initial_error > 0.0 && (previous_error - error) / initial_error < tolerance {
                break;
            }
            previous_error = error;
        }
    }

    let error = frobenius_error(v, &w, &h);
    Ok(Factors {
        w,
        h,
        error,
        iterations,
    })
}

fn frobenius_error(v: &Array2<f64>, w: &Array2<f64>, h: &Array2<f64>) -> f64 {
    let residual = v - &w.dot(h);
    residual.mapv(|x| x * x).sum().sqrt()
}

/// NMF-based rating predictor
#[derive(Debug, Clone)]
pub struct MatrixFactorization {
    config: FactorizationConfig,
    matrix: RatingMatrix,
    /// User latent factors: [num_users x latent_factors]
    user_factors: Array2<f64>,
    /// Item latent factors: [latent_factors x num_items]
    item_factors: Array2<f64>,
    user_id_map: HashMap<UserId, usize>,
    item_id_map: HashMap<ItemId, usize>,
    reconstruction_error: f64,
}

impl MatrixFactorization {
    /// Pivot `train`, fill unobserved cells and factor
    pub fn fit(train: &[Rating], config: FactorizationConfig) -> Result<Self> {
        let start = Instant::now();

        let matrix = RatingMatrix::from_ratings(train);
        if matrix.is_empty() {
            return Err(RecsysError::EmptyDataset(
                "matrix factorization needs at least one rating".to_string(),
            ));
        }

        let dense = match config.fill_strategy {
            FillStrategy::Zeros => matrix.to_dense(|_| 0.0),
            FillStrategy::PerUserMean => {
                matrix.to_dense(|user| matrix.user_mean(user).unwrap_or(0.0))
            }
        };

        let factors = nmf(
            &dense.values,
            config.latent_factors,
            config.max_iterations,
            config.tolerance,
            config.seed,
        )?;

        tracing::info!(
            "Fitted NMF (k={}, fill={:?}) on {} users x {} items in {} iterations, error {:.4}, {:?}",
            config.latent_factors,
            config.fill_strategy,
            matrix.num_users(),
            matrix.num_items(),
            factors.iterations,
            factors.error,
            start.elapsed()
        );

        Ok(Self {
            config,
            matrix,
            user_factors: factors.w,
            item_factors: factors.h,
            user_id_map: dense.user_index,
            item_id_map: dense.item_index,
            reconstruction_error: factors.error,
        })
    }

    pub fn config(&self) -> &FactorizationConfig {
        &self.config
    }

    pub fn rating_matrix(&self) -> &RatingMatrix {
        &self.matrix
    }

    /// Frobenius reconstruction error of the train factorization
    pub fn reconstruction_error(&self) -> f64 {
        self.reconstruction_error
    }

    pub fn user_factors(&self) -> &Array2<f64> {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &Array2<f64> {
        &self.item_factors
    }

    /// Latent vector of a train user
    pub fn user_embedding(&self, user: UserId) -> Result<Vec<f64>> {
        let u = self
            .user_id_map
            .get(&user)
            .ok_or(RecsysError::UnknownUser(user))?;
        Ok(self.user_factors.row(*u).to_vec())
    }

    /// Latent vector of a train item
    pub fn item_embedding(&self, item: ItemId) -> Result<Vec<f64>> {
        let i = self
            .item_id_map
            .get(&item)
            .ok_or(RecsysError::UnknownItem(item))?;
        Ok(self.item_factors.column(*i).to_vec())
    }

    /// Train reconstruction for a known pair, mean fallback otherwise
    pub fn predict_one(&self, user: UserId, item: ItemId) -> f64 {
        match (self.user_id_map.get(&user), self.item_id_map.get(&item)) {
            (Some(&u), Some(&i)) => self.user_factors.row(u).dot(&self.item_factors.column(i)),
            _ => self.matrix.fallback_rating(user, item),
        }
    }

    /// Score held-out ratings.
    ///
    /// Rows whose user or item is not in the train factorization are
    /// dropped; the result holds one prediction per retained row, in input
    /// order.
    pub fn predict(&self, test: &[Rating]) -> Result<Vec<Prediction>> {
        let retained: Vec<Rating> = test
            .iter()
            .filter(|r| {
                self.user_id_map.contains_key(&r.user_id)
                    && self.item_id_map.contains_key(&r.item_id)
            })
            .copied()
            .collect();

        let dropped = test.len() - retained.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} held-out rows with unseen users or items", dropped);
        }
        if retained.is_empty() {
            return Ok(Vec::new());
        }

        let predicted: Vec<f64> = match self.config.held_out_strategy {
            HeldOutStrategy::TrainFactors => retained
                .iter()
                .map(|r| self.predict_one(r.user_id, r.item_id))
                .collect(),
            HeldOutStrategy::RefitOnHeldOut => self.refit_on_held_out(&retained)?,
        };

        Ok(retained
            .iter()
            .zip(predicted)
            .map(|(r, predicted)| Prediction {
                user_id: r.user_id,
                item_id: r.item_id,
                rating: r.rating,
                predicted,
            })
            .collect())
    }

    fn refit_on_held_out(&self, retained: &[Rating]) -> Result<Vec<f64>> {
        let test_matrix = RatingMatrix::from_ratings(retained);
        let dense = test_matrix.to_dense(|user| test_matrix.user_mean(user).unwrap_or(0.0));

        let factors = nmf(
            &dense.values,
            self.config.latent_factors,
            self.config.max_iterations,
            self.config.tolerance,
            self.config.seed,
        )?;
        let reconstruction = factors.w.dot(&factors.h);

        tracing::debug!(
            "Refitted NMF on {} held-out users x {} items, error {:.4}",
            test_matrix.num_users(),
            test_matrix.num_items(),
            factors.error
        );

        Ok(retained
            .iter()
            .map(|r| {
                reconstruction[[dense.user_index[&r.user_id], dense.item_index[&r.item_id]]]
            })
            .collect())
    }

    /// Top `n` items by train reconstruction; already rated items included
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

/// Serializable representation of a fitted factorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorizationState {
    config: FactorizationConfig,
    matrix: RatingMatrix,
    user_factors: StoredMatrix,
    item_factors: StoredMatrix,
    reconstruction_error: f64,
}

impl PersistentModel for MatrixFactorization {
    const MODEL_NAME: &'static str = "matrix_factorization";

    type State = FactorizationState;

    fn to_state(&self) -> Self::State {
        FactorizationState {
            config: self.config.clone(),
            matrix: self.matrix.clone(),
            user_factors: StoredMatrix::from_array(&self.user_factors),
            item_factors: StoredMatrix::from_array(&self.item_factors),
            reconstruction_error: self.reconstruction_error,
        }
    }

    fn from_state(state: Self::State) -> Result<Self> {
        let user_factors = state.user_factors.to_array()?;
        let item_factors = state.item_factors.to_array()?;

        if user_factors.len_of(Axis(0)) != state.matrix.num_users()
            || item_factors.len_of(Axis(1)) != state.matrix.num_items()
            || user_factors.ncols() != item_factors.nrows()
        {
            return Err(RecsysError::DataFormat(
                "stored factors do not match the stored rating matrix".to_string(),
            ));
        }

        let dense = state.matrix.to_dense(|_| 0.0);
        Ok(Self {
            config: state.config,
            matrix: state.matrix,
            user_factors,
            item_factors,
            user_id_map: dense.user_index,
            item_id_map: dense.item_index,
            reconstruction_error: state.reconstruction_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config(k: usize) -> FactorizationConfig {
        FactorizationConfig {
            latent_factors: k,
            max_iterations: 500,
            tolerance: 0.0,
            ..FactorizationConfig::default()
        }
    }

    fn train() -> Vec<Rating> {
        vec![
            Rating::new(1, 10, 5.0, 1),
            Rating::new(1, 20, 3.0, 2),
            Rating::new(2, 10, 4.0, 3),
            Rating::new(2, 30, 1.0, 4),
            Rating::new(3, 20, 2.0, 5),
            Rating::new(3, 30, 5.0, 6),
        ]
    }

    #[test]
    fn test_fill_strategy_from_str() {
        assert_eq!("zeros".parse::<FillStrategy>().unwrap(), FillStrategy::Zeros);
        assert_eq!(
            "average".parse::<FillStrategy>().unwrap(),
            FillStrategy::PerUserMean
        );
        assert!(matches!(
            "median".parse::<FillStrategy>(),
            Err(RecsysError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_nmf_recovers_rank_one_matrix() {
        let v = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let factors = nmf(&v, 1, 1000, 0.0, 0).unwrap();

        let norm = v.mapv(|x: f64| x * x).sum().sqrt();
        assert!(factors.error / norm < 0.01);
        assert!(factors.w.iter().all(|&x| x >= 0.0));
        assert!(factors.h.iter().all(|&x| x >= 0.0));
        assert_eq!(factors.w.dim(), (3, 1));
        assert_eq!(factors.h.dim(), (1, 2));
    }

    #[test]
    fn test_nmf_rejects_invalid_input() {
        let v = array![[1.0, -1.0]];
        assert!(nmf(&v, 1, 10, 0.0, 0).is_err());

        let v = array![[1.0, 1.0]];
        assert!(nmf(&v, 0, 10, 0.0, 0).is_err());
        assert!(nmf(&v, 1, 0, 0.0, 0).is_err());
    }

    #[test]
    fn test_fit_shapes_and_non_negativity() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();

        assert_eq!(model.user_factors().dim(), (3, 2));
        assert_eq!(model.item_factors().dim(), (2, 3));
        assert!(model.user_factors().iter().all(|&x| x >= 0.0));
        assert!(model.item_factors().iter().all(|&x| x >= 0.0));
        assert_eq!(model.user_embedding(1).unwrap().len(), 2);
        assert_eq!(model.item_embedding(30).unwrap().len(), 2);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let a = MatrixFactorization::fit(&train(), config(2)).unwrap();
        let b = MatrixFactorization::fit(&train(), config(2)).unwrap();
        assert_eq!(a.user_factors(), b.user_factors());
        assert_eq!(a.predict_one(1, 30), b.predict_one(1, 30));
    }

    #[test]
    fn test_fill_strategy_changes_fit() {
        let zeros = MatrixFactorization::fit(&train(), config(1)).unwrap();
        let mut mean_config = config(1);
        mean_config.fill_strategy = FillStrategy::PerUserMean;
        let means = MatrixFactorization::fit(&train(), mean_config).unwrap();

        // user 1 never rated item 30; mean filling pulls it towards 4
        assert!(means.predict_one(1, 30) > zeros.predict_one(1, 30));
    }

    #[test]
    fn test_unknown_embeddings() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();
        assert!(matches!(
            model.user_embedding(99),
            Err(RecsysError::UnknownUser(99))
        ));
        assert!(matches!(
            model.item_embedding(99),
            Err(RecsysError::UnknownItem(99))
        ));
    }

    #[test]
    fn test_predict_one_fallbacks() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();
        assert_eq!(model.predict_one(99, 10), 4.5);
        assert_eq!(model.predict_one(1, 99), 4.0);
        assert_eq!(model.predict_one(99, 99), 20.0 / 6.0);
    }

    #[test]
    fn test_predict_drops_unknown_rows() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();
        let test = vec![
            Rating::new(1, 30, 2.0, 10),
            Rating::new(99, 10, 4.0, 11),
            Rating::new(2, 99, 3.0, 12),
            Rating::new(3, 10, 4.0, 13),
        ];

        let predictions = model.predict(&test).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!((predictions[0].user_id, predictions[0].item_id), (1, 30));
        assert_eq!((predictions[1].user_id, predictions[1].item_id), (3, 10));
        assert!(predictions.iter().all(|p| p.predicted.is_finite()));
    }

    #[test]
    fn test_held_out_strategies() {
        let test = vec![
            Rating::new(1, 30, 2.0, 10),
            Rating::new(3, 10, 4.0, 13),
        ];

        let mut train_config = config(1);
        train_config.held_out_strategy = HeldOutStrategy::TrainFactors;
        let model = MatrixFactorization::fit(&train(), train_config).unwrap();
        let predictions = model.predict(&test).unwrap();
        assert_eq!(predictions[0].predicted, model.predict_one(1, 30));

        // each held-out user has a single rating, so the refit matrix is
        // constant per row and reconstructs it closely
        let refit = MatrixFactorization::fit(&train(), config(1)).unwrap();
        let predictions = refit.predict(&test).unwrap();
        assert_eq!(predictions.len(), 2);
        assert!((predictions[0].predicted - 2.0).abs() < 0.1);
        assert!((predictions[1].predicted - 4.0).abs() < 0.1);
    }

    #[test]
    fn test_top_n_ordering() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();
        let top = model.top_n(2, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert!(top[0].score >= top[1].score);
        assert!(model.top_n(2, 0).is_err());
    }

    #[test]
    fn test_state_round_trip() {
        let model = MatrixFactorization::fit(&train(), config(2)).unwrap();
        let restored = MatrixFactorization::from_state(model.to_state()).unwrap();

        assert_eq!(model.top_n(1, 3).unwrap(), restored.top_n(1, 3).unwrap());
        assert_eq!(model.reconstruction_error(), restored.reconstruction_error());
    }
}
