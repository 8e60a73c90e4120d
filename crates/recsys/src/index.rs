//! Angular approximate nearest-neighbor index
//!
//! A forest of random-projection trees. Each split node holds a hyperplane
//! through the origin built from two sampled items (the difference of their
//! unit vectors); leaves hold at most `dimension + 2` items. A query walks all
//! trees best-first by hyperplane margin until `search_k` candidates are
//! gathered, then ranks the candidates by exact angular distance
//! `sqrt(2 - 2 * cos)`.
//!
//! The index is read-only after [`AngularIndex::build`] and is persisted to its
//! own file with a header naming the owning model and the vector dimension.

use crate::error::{RecsysError, Result};
use crate::persistence::{read_blob, write_blob};
use crate::types::{ItemId, Neighbor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::Path;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf(Vec<usize>),
    Split {
        normal: Vec<f32>,
        left: usize,
        right: usize,
    },
}

/// Random-projection forest over fixed-length item vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngularIndex {
    dimension: usize,
    leaf_size: usize,
    ids: Vec<ItemId>,
    vectors: Vec<Vec<f32>>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

/// On-disk index layout: header + forest
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    model_name: String,
    dimension: usize,
    index: AngularIndex,
}

impl AngularIndex {
    /// Build a forest of `n_trees` trees over `items`
    ///
    /// # Errors
    /// `InvalidConfiguration` when `dimension` or `n_trees` is zero, a vector
    /// has the wrong length, or an item id appears twice.
    pub fn build(
        dimension: usize,
        items: Vec<(ItemId, Vec<f32>)>,
        n_trees: usize,
        seed: u64,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(RecsysError::invalid_config(
                "index dimension must be greater than 0",
            ));
        }
        if n_trees == 0 {
            return Err(RecsysError::invalid_config(
                "index needs at least one tree",
            ));
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(items.len());
        let mut vectors = Vec::with_capacity(items.len());
        for (id, vector) in items {
            if vector.len() != dimension {
                return Err(RecsysError::invalid_config(format!(
                    "item {} has {} dimensions, index expects {}",
                    id,
                    vector.len(),
                    dimension
                )));
            }
            if !seen.insert(id) {
                return Err(RecsysError::invalid_config(format!(
                    "item {} added to the index twice",
                    id
                )));
            }
            ids.push(id);
            vectors.push(vector);
        }

        let mut index = Self {
            dimension,
            leaf_size: dimension + 2,
            ids,
            vectors,
            nodes: Vec::new(),
            roots: Vec::with_capacity(n_trees),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..n_trees {
            let all: Vec<usize> = (0..index.ids.len()).collect();
            let root = index.build_node(all, &mut rng, 0);
            index.roots.push(root);
        }

        tracing::debug!(
            "Built angular index: {} items, {} trees, {} nodes",
            index.ids.len(),
            n_trees,
            index.nodes.len()
        );

        Ok(index)
    }

    fn build_node(&mut self, members: Vec<usize>, rng: &mut StdRng, depth: usize) -> usize {
        if members.len() <= self.leaf_size || depth >= MAX_DEPTH {
            self.nodes.push(Node::Leaf(members));
            return self.nodes.len() - 1;
        }

        let a = members[rng.gen_range(0..members.len())];
        let mut b = members[rng.gen_range(0..members.len())];
        if a == b {
            b = members[(members.iter().position(|&m| m == a).unwrap_or(0) + 1) % members.len()];
        }

        let unit_a = unit(&self.vectors[a]);
        let unit_b = unit(&self.vectors[b]);
        let normal: Vec<f32> = unit_a.iter().zip(unit_b.iter()).map(|(x, y)| x - y).collect();

        let (mut left, mut right): (Vec<usize>, Vec<usize>) = members
            .iter()
            .partition(|&&m| dot(&normal, &self.vectors[m]) <= 0.0);

        // Degenerate hyperplane: fall back to a random halving
        if left.is_empty() || right.is_empty() {
            let mut shuffled = members;
            shuffled.shuffle(rng);
            let half = shuffled.len() / 2;
            right = shuffled.split_off(half);
            left = shuffled;
        }

        let left_node = self.build_node(left, rng, depth + 1);
        let right_node = self.build_node(right, rng, depth + 1);
        self.nodes.push(Node::Split {
            normal,
            left: left_node,
            right: right_node,
        });
        self.nodes.len() - 1
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.ids
    }

    /// Stored vector for `item`
    pub fn item_vector(&self, item: ItemId) -> Option<&[f32]> {
        self.ids
            .iter()
            .position(|&id| id == item)
            .map(|pos| self.vectors[pos].as_slice())
    }

    /// `n` nearest items to `query`, ascending by angular distance
    ///
    /// Inspects `n * n_trees` candidates, as the usual default for forests of
    /// this kind.
    pub fn nearest(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        self.nearest_with_search_k(query, n, n.saturating_mul(self.roots.len()))
    }

    pub fn nearest_with_search_k(
        &self,
        query: &[f32],
        n: usize,
        search_k: usize,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(RecsysError::invalid_config(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        if n == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let search_k = search_k.max(n);
        let mut heap: BinaryHeap<Frontier> = self
            .roots
            .iter()
            .map(|&node| Frontier {
                priority: f32::INFINITY,
                node,
            })
            .collect();

        let mut seen = vec![false; self.ids.len()];
        let mut candidates = Vec::new();

        while candidates.len() < search_k {
            let Some(Frontier { priority, node }) = heap.pop() else {
                break;
            };
            match &self.nodes[node] {
                Node::Leaf(members) => {
                    for &m in members {
                        if !seen[m] {
                            seen[m] = true;
                            candidates.push(m);
                        }
                    }
                }
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    let margin = dot(normal, query);
                    heap.push(Frontier {
                        priority: priority.min(margin),
                        node: *right,
                    });
                    heap.push(Frontier {
                        priority: priority.min(-margin),
                        node: *left,
                    });
                }
            }
        }

        let mut neighbors: Vec<Neighbor> = candidates
            .into_iter()
            .map(|m| Neighbor {
                item_id: self.ids[m],
                distance: angular_distance(query, &self.vectors[m]),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        neighbors.truncate(n);
        Ok(neighbors)
    }

    /// Write the index with a header identifying `model_name` and dimension
    pub fn save(&self, path: &Path, model_name: &str) -> Result<()> {
        let file = IndexFile {
            model_name: model_name.to_string(),
            dimension: self.dimension,
            index: self.clone(),
        };
        write_blob(path, &file)
    }

    /// Read an index saved for `model_name` with vectors of `dimension`
    ///
    /// # Errors
    /// `StaleIndex` when the file belongs to another model or dimension.
    pub fn load(path: &Path, model_name: &str, dimension: usize) -> Result<Self> {
        let file: IndexFile = read_blob(path)?;

        if file.model_name != model_name {
            return Err(RecsysError::stale_index(format!(
                "index file {} belongs to model '{}', expected '{}'",
                path.display(),
                file.model_name,
                model_name
            )));
        }
        if file.dimension != dimension || file.index.dimension != dimension {
            return Err(RecsysError::stale_index(format!(
                "index file {} has dimension {}, expected {}",
                path.display(),
                file.dimension,
                dimension
            )));
        }

        Ok(file.index)
    }
}

#[derive(Debug, Clone, Copy)]
struct Frontier {
    priority: f32,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn unit(v: &[f32]) -> Vec<f32> {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Cosine similarity, 0 when either vector is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (norm_a * norm_b)
}

/// Euclidean distance between the unit vectors: `sqrt(2 - 2 * cos)`
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    (2.0 - 2.0 * cosine_similarity(a, b)).max(0.0).sqrt()
}
