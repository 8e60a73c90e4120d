//! Movie recommendation engine
//!
//! Offline recommenders over explicit user ratings:
//! - user-based collaborative filtering over mean-centered ratings
//! - content-based ranking of genre/release-year vectors in an angular
//!   nearest-neighbor index
//! - non-negative matrix factorization
//!
//! plus a timestamp-aligned train/test split and per-user MAE/RMSE
//! evaluation. [`RecommenderEngine`] publishes fitted models as one
//! immutable snapshot and serves requests through a [`RequestContext`].

pub mod collaborative;
pub mod config;
pub mod content_based;
pub mod data;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod index;
pub mod matrix;
pub mod matrix_factorization;
pub mod persistence;
pub mod split;
pub mod types;

// Re-export key types
pub use collaborative::CollaborativeFilteringModel;
pub use config::{
    CollaborativeConfig, ContentConfig, FactorizationConfig, RecsysConfig, SplitConfig,
};
pub use content_based::ContentBasedModel;
pub use engine::{FittedModels, RecommenderEngine, RequestContext};
pub use error::{RecsysError, Result};
pub use evaluation::{evaluate, ranking_metrics, EvaluationReport, RankingReport};
pub use index::AngularIndex;
pub use matrix::RatingMatrix;
pub use matrix_factorization::{FillStrategy, HeldOutStrategy, MatrixFactorization};
pub use persistence::PersistentModel;
pub use split::{split, TimeSplit};
pub use types::*;

#[cfg(test)]
mod tests;
