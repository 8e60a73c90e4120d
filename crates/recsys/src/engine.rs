//! Recommender engine
//!
//! Holds the three fitted models as one immutable snapshot behind an
//! atomically swapped `Arc`. A refit builds a complete new snapshot and
//! publishes it with a single write; requests already holding a
//! [`RequestContext`] keep serving from their own snapshot.

use crate::collaborative::CollaborativeFilteringModel;
use crate::config::RecsysConfig;
use crate::content_based::ContentBasedModel;
use crate::error::{RecsysError, Result};
use crate::matrix_factorization::MatrixFactorization;
use crate::persistence::PersistentModel;
use crate::types::{Item, ItemId, Neighbor, Rating, ScoredItem, UserId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// One consistent set of fitted models
#[derive(Debug)]
pub struct FittedModels {
    pub collaborative: CollaborativeFilteringModel,
    pub content: ContentBasedModel,
    pub factorization: MatrixFactorization,
    /// When this snapshot was fitted or loaded
    pub published_at: DateTime<Utc>,
}

impl FittedModels {
    /// Fit every model on the same data
    pub fn fit(config: &RecsysConfig, ratings: &[Rating], items: &[Item]) -> Result<Self> {
        Ok(Self {
            collaborative: CollaborativeFilteringModel::fit(ratings, config.collaborative.clone())?,
            content: ContentBasedModel::fit(items, ratings, config.content.clone())?,
            factorization: MatrixFactorization::fit(ratings, config.factorization.clone())?,
            published_at: Utc::now(),
        })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.collaborative.save(dir)?;
        self.content.save(dir)?;
        self.factorization.save(dir)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            collaborative: CollaborativeFilteringModel::load(dir)?,
            content: ContentBasedModel::load(dir)?,
            factorization: MatrixFactorization::load(dir)?,
            published_at: Utc::now(),
        })
    }

    /// Whether every model has saved state (and index) under `dir`
    pub fn exists(dir: &Path) -> bool {
        CollaborativeFilteringModel::exists(dir)
            && ContentBasedModel::exists(dir)
            && MatrixFactorization::exists(dir)
    }
}

/// Per-request view of the engine: one user and one model snapshot
#[derive(Debug, Clone)]
pub struct RequestContext {
    user_id: UserId,
    models: Arc<FittedModels>,
}

impl RequestContext {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn models(&self) -> &FittedModels {
        &self.models
    }

    /// Collaborative rating estimate for `item`
    pub fn predict(&self, item: ItemId) -> f64 {
        self.models.collaborative.predict_one(self.user_id, item)
    }

    pub fn collaborative_top_n(&self, n: usize) -> Result<Vec<ScoredItem>> {
        self.models.collaborative.top_n(self.user_id, n)
    }

    pub fn content_top_n(&self, n: usize) -> Result<Vec<Neighbor>> {
        self.models.content.top_n(self.user_id, n)
    }

    pub fn factorization_top_n(&self, n: usize) -> Result<Vec<ScoredItem>> {
        self.models.factorization.top_n(self.user_id, n)
    }
}

/// Service-level facade over the fitted models
pub struct RecommenderEngine {
    config: RecsysConfig,
    models: RwLock<Option<Arc<FittedModels>>>,
    /// Serializes refits; readers never take it
    fit_lock: Mutex<()>,
}

impl RecommenderEngine {
    /// Create an engine with no fitted models
    ///
    /// # Errors
    /// `InvalidConfiguration` when `config` fails validation.
    pub fn new(config: RecsysConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            models: RwLock::new(None),
            fit_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RecsysConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.models.read().is_some()
    }

    /// Current snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<FittedModels>> {
        self.models.read().clone()
    }

    /// Fit all models and publish them, replacing any previous snapshot.
    ///
    /// On error the previously published snapshot stays in place.
    pub fn fit(&self, ratings: &[Rating], items: &[Item]) -> Result<Arc<FittedModels>> {
        let _guard = self.fit_lock.lock();
        let start = Instant::now();

        let fitted = Arc::new(FittedModels::fit(&self.config, ratings, items)?);
        self.publish(Arc::clone(&fitted));

        tracing::info!(
            "Fitted models on {} ratings and {} items in {:?}",
            ratings.len(),
            items.len(),
            start.elapsed()
        );
        Ok(fitted)
    }

    /// Bind a request to `user_id` and the current snapshot
    ///
    /// # Errors
    /// `StaleIndex` when nothing has been fitted or loaded yet.
    pub fn context(&self, user_id: UserId) -> Result<RequestContext> {
        let models = self
            .snapshot()
            .ok_or_else(|| RecsysError::stale_index("engine has no fitted models"))?;
        Ok(RequestContext { user_id, models })
    }

    pub fn predict(&self, user: UserId, item: ItemId) -> Result<f64> {
        Ok(self.context(user)?.predict(item))
    }

    pub fn collaborative_top_n(&self, user: UserId, n: usize) -> Result<Vec<ScoredItem>> {
        self.context(user)?.collaborative_top_n(n)
    }

    pub fn content_top_n(&self, user: UserId, n: usize) -> Result<Vec<Neighbor>> {
        self.context(user)?.content_top_n(n)
    }

    pub fn factorization_top_n(&self, user: UserId, n: usize) -> Result<Vec<ScoredItem>> {
        self.context(user)?.factorization_top_n(n)
    }

    /// Save the current snapshot under `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let models = self
            .snapshot()
            .ok_or_else(|| RecsysError::stale_index("engine has no fitted models to save"))?;
        models.save(dir)
    }

    /// Load a saved snapshot from `dir` and publish it
    pub fn load(&self, dir: &Path) -> Result<Arc<FittedModels>> {
        let _guard = self.fit_lock.lock();

        let loaded = Arc::new(FittedModels::load(dir)?);
        self.publish(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Load saved models from `dir` when all are present, else fit and save
    pub fn load_or_fit(
        &self,
        dir: &Path,
        ratings: &[Rating],
        items: &[Item],
    ) -> Result<Arc<FittedModels>> {
        if FittedModels::exists(dir) {
            tracing::info!("Loading saved models from {}", dir.display());
            return self.load(dir);
        }

        tracing::info!("No saved models in {}, fitting", dir.display());
        let fitted = self.fit(ratings, items)?;
        fitted.save(dir)?;
        Ok(fitted)
    }

    fn publish(&self, models: Arc<FittedModels>) {
        *self.models.write() = Some(models);
    }
}
