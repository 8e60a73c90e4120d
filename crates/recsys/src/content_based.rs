//! Content-based filtering
//!
//! Every item is encoded as a fixed-length vector: its genre flags taken
//! as-is followed by its release year min-max scaled over the fitted corpus.
//! A user's profile is the rating-weighted mean of the vectors of the items
//! they rated, and recommendations are the items nearest to that profile in
//! the angular index.
//!
//! The index is persisted separately from the rest of the fitted state. A
//! model restored with [`ContentBasedModel::load_state`] stays unusable
//! (`StaleIndex`) until an index is attached with
//! [`ContentBasedModel::attach_index`].

use crate::config::ContentConfig;
use crate::error::{RecsysError, Result};
use crate::index::AngularIndex;
use crate::persistence::{index_path, read_blob, state_path, write_blob, PersistentModel};
use crate::types::{Item, ItemId, Neighbor, Rating, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Fitted content-based model
#[derive(Debug, Clone)]
pub struct ContentBasedModel {
    config: ContentConfig,
    features: BTreeMap<ItemId, Vec<f32>>,
    /// Min and max release year of the fitted corpus
    year_range: (i32, i32),
    user_ratings: BTreeMap<UserId, Vec<(ItemId, f64)>>,
    index: Option<AngularIndex>,
}

impl ContentBasedModel {
    /// Encode `items`, build the angular index and keep `ratings` for profiles
    ///
    /// # Errors
    /// - `EmptyDataset` when there are no items
    /// - `InvalidConfiguration` when an item's genre flags plus the year
    ///   dimension do not add up to `config.feature_dim`
    pub fn fit(items: &[Item], ratings: &[Rating], config: ContentConfig) -> Result<Self> {
        let start = Instant::now();

        if items.is_empty() {
            return Err(RecsysError::EmptyDataset(
                "content encoder needs at least one item".to_string(),
            ));
        }

        for item in items {
            if item.genres.len() + 1 != config.feature_dim {
                return Err(RecsysError::invalid_config(format!(
                    "item {} encodes to {} dimensions, expected {}",
                    item.item_id,
                    item.genres.len() + 1,
                    config.feature_dim
                )));
            }
        }

        let min_year = items.iter().map(|i| i.release_year).min().unwrap_or(0);
        let max_year = items.iter().map(|i| i.release_year).max().unwrap_or(0);
        let year_range = (min_year, max_year);

        let mut features = BTreeMap::new();
        for item in items {
            if features.contains_key(&item.item_id) {
                tracing::warn!("Duplicate item {} ignored by content encoder", item.item_id);
                continue;
            }
            features.insert(item.item_id, encode_item(item, year_range));
        }

        let mut user_ratings: BTreeMap<UserId, Vec<(ItemId, f64)>> = BTreeMap::new();
        for r in ratings {
            user_ratings
                .entry(r.user_id)
                .or_default()
                .push((r.item_id, r.rating));
        }

        let index = AngularIndex::build(
            config.feature_dim,
            features.iter().map(|(&id, v)| (id, v.clone())).collect(),
            config.n_trees,
            config.seed,
        )?;

        tracing::info!(
            "Fitted content-based model on {} items ({} users with ratings) in {:?}",
            features.len(),
            user_ratings.len(),
            start.elapsed()
        );

        Ok(Self {
            config,
            features,
            year_range,
            user_ratings,
            index: Some(index),
        })
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn year_range(&self) -> (i32, i32) {
        self.year_range
    }

    pub fn num_items(&self) -> usize {
        self.features.len()
    }

    /// Encoded feature vector of `item`
    pub fn feature_vector(&self, item: ItemId) -> Option<&[f32]> {
        self.features.get(&item).map(Vec::as_slice)
    }

    /// Whether an index is attached and `top_n` can be served
    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    pub fn index(&self) -> Result<&AngularIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| RecsysError::stale_index("content-based model has no index attached"))
    }

    /// Rating-weighted mean of the feature vectors of the user's rated items
    ///
    /// # Errors
    /// `EmptyProfile` when the user rated no encoded item or their ratings sum
    /// to zero.
    pub fn profile(&self, user: UserId) -> Result<Vec<f32>> {
        let rated: Vec<(&Vec<f32>, f64)> = self
            .user_ratings
            .get(&user)
            .map(|ratings| {
                ratings
                    .iter()
                    .filter_map(|(item, rating)| self.features.get(item).map(|v| (v, *rating)))
                    .collect()
            })
            .unwrap_or_default();

        let total: f64 = rated.iter().map(|(_, rating)| rating).sum();
        if rated.is_empty() || total <= 0.0 {
            return Err(RecsysError::EmptyProfile(user));
        }

        let mut profile = vec![0.0f32; self.config.feature_dim];
        for (vector, rating) in rated {
            let weight = (rating / total) as f32;
            for (acc, value) in profile.iter_mut().zip(vector.iter()) {
                *acc += weight * value;
            }
        }

        Ok(profile)
    }

    /// The `n` items nearest to the user's profile, ascending by distance.
    ///
    /// Items the user already rated are not excluded.
    pub fn top_n(&self, user: UserId, n: usize) -> Result<Vec<Neighbor>> {
        if n == 0 {
            return Err(RecsysError::invalid_config("n must be greater than 0"));
        }

        let index = self.index()?;
        let profile = self.profile(user)?;
        index.nearest(&profile, n)
    }

    /// Restore the fitted state without its index
    pub fn load_state(dir: &Path) -> Result<Self> {
        Self::from_state(read_blob(&state_path(dir, Self::MODEL_NAME))?)
    }

    /// Read the index file saved next to the state blob under `dir`
    pub fn load_index(&self, dir: &Path) -> Result<AngularIndex> {
        AngularIndex::load(
            &index_path(dir, Self::MODEL_NAME),
            Self::MODEL_NAME,
            self.config.feature_dim,
        )
    }

    /// Attach a previously built index
    ///
    /// # Errors
    /// `StaleIndex` when the index dimension or item set does not match the
    /// encoded items.
    pub fn attach_index(mut self, index: AngularIndex) -> Result<Self> {
        if index.dimension() != self.config.feature_dim {
            return Err(RecsysError::stale_index(format!(
                "index dimension {} does not match feature dimension {}",
                index.dimension(),
                self.config.feature_dim
            )));
        }

        let covers_items = index.len() == self.features.len()
            && index
                .item_ids()
                .iter()
                .all(|id| self.features.contains_key(id));
        if !covers_items {
            return Err(RecsysError::stale_index(
                "index items do not match the encoded items",
            ));
        }

        self.index = Some(index);
        Ok(self)
    }
}

/// Genre flags followed by the release year scaled into `[0, 1]`
fn encode_item(item: &Item, (min_year, max_year): (i32, i32)) -> Vec<f32> {
    let span = (max_year - min_year) as f32;
    let year = if span > 0.0 {
        (item.release_year - min_year) as f32 / span
    } else {
        0.0
    };

    let mut vector = item.genres.clone();
    vector.push(year);
    vector
}

/// Serializable fitted state, the index excluded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentState {
    config: ContentConfig,
    features: BTreeMap<ItemId, Vec<f32>>,
    year_range: (i32, i32),
    user_ratings: BTreeMap<UserId, Vec<(ItemId, f64)>>,
}

impl PersistentModel for ContentBasedModel {
    const MODEL_NAME: &'static str = "content_based";

    type State = ContentState;

    fn to_state(&self) -> Self::State {
        ContentState {
            config: self.config.clone(),
            features: self.features.clone(),
            year_range: self.year_range,
            user_ratings: self.user_ratings.clone(),
        }
    }

    fn from_state(state: Self::State) -> Result<Self> {
        Ok(Self {
            config: state.config,
            features: state.features,
            year_range: state.year_range,
            user_ratings: state.user_ratings,
            index: None,
        })
    }

    /// Save the state blob and the index file
    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let index = self.index()?;
        let path = state_path(dir, Self::MODEL_NAME);

        write_blob(&path, &self.to_state())?;
        index.save(&index_path(dir, Self::MODEL_NAME), Self::MODEL_NAME)?;

        tracing::info!(
            "Saved {} model and index to {}",
            Self::MODEL_NAME,
            dir.display()
        );
        Ok(path)
    }

    /// Restore the state blob and attach the saved index
    fn load(dir: &Path) -> Result<Self> {
        let model = Self::load_state(dir)?;
        let index = model.load_index(dir)?;
        let model = model.attach_index(index)?;

        tracing::info!("Loaded {} model from {}", Self::MODEL_NAME, dir.display());
        Ok(model)
    }

    fn exists(dir: &Path) -> bool {
        state_path(dir, Self::MODEL_NAME).is_file() && index_path(dir, Self::MODEL_NAME).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::angular_distance;
    use tempfile::TempDir;

    fn config() -> ContentConfig {
        ContentConfig {
            feature_dim: 4,
            n_trees: 3,
            seed: 42,
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item {
                item_id: 1,
                title: "A".to_string(),
                release_year: 1990,
                genres: vec![1.0, 0.0, 0.0],
            },
            Item {
                item_id: 2,
                title: "B".to_string(),
                release_year: 2000,
                genres: vec![0.0, 1.0, 0.0],
            },
            Item {
                item_id: 3,
                title: "C".to_string(),
                release_year: 1995,
                genres: vec![0.0, 1.0, 1.0],
            },
        ]
    }

    fn ratings() -> Vec<Rating> {
        vec![Rating::new(7, 1, 4.0, 1), Rating::new(7, 2, 2.0, 2)]
    }

    #[test]
    fn test_release_year_scaled_to_unit_range() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();

        assert_eq!(model.year_range(), (1990, 2000));
        assert_eq!(model.feature_vector(1).unwrap().to_vec(), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(model.feature_vector(2).unwrap().to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(model.feature_vector(3).unwrap().to_vec(), vec![0.0, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_single_year_corpus_scales_to_zero() {
        let mut items = items();
        for item in &mut items {
            item.release_year = 1999;
        }
        let model = ContentBasedModel::fit(&items, &[], config()).unwrap();
        assert_eq!(model.feature_vector(3).unwrap()[3], 0.0);
    }

    #[test]
    fn test_wrong_feature_dimension() {
        let mut config = config();
        config.feature_dim = 20;
        let result = ContentBasedModel::fit(&items(), &ratings(), config);
        assert!(matches!(result, Err(RecsysError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_profile_is_weighted_mean() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        let profile = model.profile(7).unwrap();

        let a = model.feature_vector(1).unwrap();
        let b = model.feature_vector(2).unwrap();
        for d in 0..4 {
            let expected = (4.0 / 6.0) * a[d] + (2.0 / 6.0) * b[d];
            assert!((profile[d] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_top_n_ranked_by_angular_distance() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        let profile = model.profile(7).unwrap();
        let top = model.top_n(7, 3).unwrap();

        assert_eq!(top.len(), 3);
        for hit in &top {
            let expected = angular_distance(&profile, model.feature_vector(hit.item_id).unwrap());
            assert!((hit.distance - expected).abs() < 1e-6);
        }
        for pair in top.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        // profile leans towards A, which the user rated highest
        assert_eq!(top[0].item_id, 1);
    }

    #[test]
    fn test_empty_profile() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        assert!(matches!(model.top_n(99, 3), Err(RecsysError::EmptyProfile(99))));

        // ratings only for items outside the encoded corpus
        let model =
            ContentBasedModel::fit(&items(), &[Rating::new(5, 42, 5.0, 1)], config()).unwrap();
        assert!(matches!(model.profile(5), Err(RecsysError::EmptyProfile(5))));
    }

    #[test]
    fn test_top_n_zero_rejected() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        assert!(matches!(
            model.top_n(7, 0),
            Err(RecsysError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_state_without_index_is_stale() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        let restored = ContentBasedModel::from_state(model.to_state()).unwrap();

        assert!(!restored.is_ready());
        assert!(matches!(restored.top_n(7, 2), Err(RecsysError::StaleIndex(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();

        model.save(temp_dir.path()).unwrap();
        assert!(ContentBasedModel::exists(temp_dir.path()));

        let restored = ContentBasedModel::load(temp_dir.path()).unwrap();
        assert_eq!(model.top_n(7, 3).unwrap(), restored.top_n(7, 3).unwrap());
    }

    #[test]
    fn test_load_without_index_file() {
        let temp_dir = TempDir::new().unwrap();
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        model.save(temp_dir.path()).unwrap();
        std::fs::remove_file(index_path(temp_dir.path(), ContentBasedModel::MODEL_NAME)).unwrap();

        assert!(!ContentBasedModel::exists(temp_dir.path()));
        let state_only = ContentBasedModel::load_state(temp_dir.path()).unwrap();
        assert!(matches!(state_only.top_n(7, 1), Err(RecsysError::StaleIndex(_))));
        assert!(ContentBasedModel::load(temp_dir.path()).is_err());
    }

    #[test]
    fn test_attach_index_rejects_foreign_index() {
        let model = ContentBasedModel::fit(&items(), &ratings(), config()).unwrap();
        let state_only = ContentBasedModel::from_state(model.to_state()).unwrap();

        let foreign = AngularIndex::build(4, vec![(1, vec![1.0, 0.0, 0.0, 0.0])], 1, 0).unwrap();
        assert!(matches!(
            state_only.attach_index(foreign),
            Err(RecsysError::StaleIndex(_))
        ));
    }
}
