//! Engine configuration
//!
//! Configuration is layered: built-in defaults < optional `config/recsys.{toml,yaml,json}`
//! file < `RECSYS__*` environment variables. Nested keys use `__` as separator,
//! e.g. `RECSYS__COLLABORATIVE__K_NEIGHBORS=20`.
//!
//! # Example
//!
//! ```no_run
//! use media_recsys::config::{load_dotenv, RecsysConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! load_dotenv();
//! let config = RecsysConfig::load()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{RecsysError, Result};
use crate::matrix_factorization::{FillStrategy, HeldOutStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecsysConfig {
    pub collaborative: CollaborativeConfig,
    pub content: ContentConfig,
    pub factorization: FactorizationConfig,
    pub split: SplitConfig,
    /// Directory holding saved model state and index files
    pub models_dir: PathBuf,
    pub log_level: String,
}

impl Default for RecsysConfig {
    fn default() -> Self {
        Self {
            collaborative: CollaborativeConfig::default(),
            content: ContentConfig::default(),
            factorization: FactorizationConfig::default(),
            split: SplitConfig::default(),
            models_dir: PathBuf::from("models"),
            log_level: "info".to_string(),
        }
    }
}

/// User-based collaborative filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborativeConfig {
    /// Maximum neighbors aggregated per prediction (default: 10)
    pub k_neighbors: usize,
    /// Neighbors must be strictly more similar than this (default: 0.15)
    pub similarity_threshold: f64,
}

impl Default for CollaborativeConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 10,
            similarity_threshold: 0.15,
        }
    }
}

/// Content-based encoder and index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Length of every item feature vector (default: 20)
    pub feature_dim: usize,
    /// Number of random-projection trees in the index (default: 10)
    pub n_trees: usize,
    /// Seed for hyperplane selection
    pub seed: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            feature_dim: 20,
            n_trees: 10,
            seed: 42,
        }
    }
}

/// Non-negative matrix factorization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorizationConfig {
    /// Rank of the factorization (default: 2)
    pub latent_factors: usize,
    /// How unobserved train entries are filled before factoring
    pub fill_strategy: FillStrategy,
    /// How held-out rows are scored
    pub held_out_strategy: HeldOutStrategy,
    pub max_iterations: usize,
    /// Relative loss improvement below which iteration stops
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            latent_factors: 2,
            fill_strategy: FillStrategy::Zeros,
            held_out_strategy: HeldOutStrategy::RefitOnHeldOut,
            max_iterations: 200,
            tolerance: 1e-4,
            seed: 0,
        }
    }
}

/// Temporal train/test split parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.75,
        }
    }
}

impl RecsysConfig {
    /// Load configuration from an optional config file and the environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/recsys").required(false))
            .add_source(config::Environment::with_prefix("RECSYS").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.collaborative.k_neighbors == 0 {
            return Err(RecsysError::invalid_config(
                "collaborative.k_neighbors must be greater than 0",
            ));
        }

        let threshold = self.collaborative.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(RecsysError::invalid_config(format!(
                "collaborative.similarity_threshold ({}) must be within [-1, 1]",
                threshold
            )));
        }

        if self.content.feature_dim == 0 {
            return Err(RecsysError::invalid_config(
                "content.feature_dim must be greater than 0",
            ));
        }

        if self.content.n_trees == 0 {
            return Err(RecsysError::invalid_config(
                "content.n_trees must be greater than 0",
            ));
        }

        if self.factorization.latent_factors == 0 {
            return Err(RecsysError::invalid_config(
                "factorization.latent_factors must be greater than 0",
            ));
        }

        if self.factorization.max_iterations == 0 {
            return Err(RecsysError::invalid_config(
                "factorization.max_iterations must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.split.train_fraction) {
            return Err(RecsysError::invalid_config(format!(
                "split.train_fraction ({}) must be within [0, 1]",
                self.split.train_fraction
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(RecsysError::invalid_config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

/// Load .env file if present
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecsysConfig::default();
        assert_eq!(config.collaborative.k_neighbors, 10);
        assert!((config.collaborative.similarity_threshold - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.content.feature_dim, 20);
        assert_eq!(config.content.n_trees, 10);
        assert_eq!(config.factorization.latent_factors, 2);
        assert_eq!(config.factorization.fill_strategy, FillStrategy::Zeros);
        assert_eq!(config.models_dir, PathBuf::from("models"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_neighbors() {
        let mut config = RecsysConfig::default();
        config.collaborative.k_neighbors = 0;

        let result = config.validate();
        assert!(matches!(
            result,
            Err(RecsysError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validation_threshold_out_of_range() {
        let mut config = RecsysConfig::default();
        config.collaborative.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_latent_factors() {
        let mut config = RecsysConfig::default();
        config.factorization.latent_factors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_train_fraction() {
        let mut config = RecsysConfig::default();
        config.split.train_fraction = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = RecsysConfig::default();
        config.log_level = "verbose".to_string();

        match config.validate() {
            Err(RecsysError::InvalidConfiguration(message)) => {
                assert!(message.contains("Invalid log_level"));
            }
            other => panic!("Expected InvalidConfiguration, got {:?}", other),
        }
    }
}
