// Isolation Tree
//
// A randomized binary partition tree stored as an index-addressed arena.
// Anomalies sit in sparse regions and get isolated after fewer random splits,
// so a short root-to-leaf path is the anomaly signal.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Euler–Mascheroni constant used by the harmonic number approximation
const EULER_GAMMA: f64 = 0.5772156649;

/// Redraws allowed when a split value lands exactly on the lower bound
const MAX_SPLIT_REDRAWS: usize = 8;

/// Expected path length of an unsuccessful BST search over `n` items
///
/// c(n) = 2H(n-1) - 2(n-1)/n, with H(k) ≈ ln(k) + γ and c(0) = c(1) = 0
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n_minus_one = (n - 1) as f64;
    2.0 * (n_minus_one.ln() + EULER_GAMMA) - 2.0 * n_minus_one / n as f64
}

/// Depth bound for a tree grown on `subsample_size` samples
pub fn max_depth_for(subsample_size: usize) -> usize {
    (subsample_size.max(2) as f64).log2().ceil() as usize
}

/// Arena node; children are indices into the owning tree's node vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Internal node: `value < threshold` goes left, everything else right
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node with the number of training samples that reached it
    Leaf { size: usize },
}

/// Single Isolation Tree, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over `samples` using the supplied random stream
    pub fn grow<S, R>(samples: &[S], max_depth: usize, rng: &mut R) -> Self
    where
        S: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        let mut tree = Self { nodes: Vec::new() };
        let indices: Vec<usize> = (0..samples.len()).collect();
        tree.grow_node(samples, indices, 0, max_depth, rng);
        tree
    }

    fn grow_node<S, R>(
        &mut self,
        samples: &[S],
        indices: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> usize
    where
        S: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: indices.len(),
        });

        if indices.len() <= 1 || depth >= max_depth {
            return id;
        }

        let candidates = splittable_features(samples, &indices);
        if candidates.is_empty() {
            // Every dimension is constant here
            return id;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = draw_threshold(min, max, rng);

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| samples[i].as_ref()[feature] < threshold);

        let left = self.grow_node(samples, left_indices, depth + 1, max_depth, rng);
        let right = self.grow_node(samples, right_indices, depth + 1, max_depth, rng);

        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Splits traversed to reach the sample's leaf, plus the leaf-size correction
    ///
    /// `sample` must have the arity the tree was grown on.
    pub fn path_length(&self, sample: &[f64]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;

        loop {
            match self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if sample[feature] < threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(size),
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Length of the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];

        while let Some((index, depth)) = stack.pop() {
            match self.nodes[index] {
                Node::Split { left, right, .. } => {
                    stack.push((left, depth + 1));
                    stack.push((right, depth + 1));
                }
                Node::Leaf { .. } => deepest = deepest.max(depth),
            }
        }

        deepest
    }

    /// Structural check for trees reloaded from disk
    ///
    /// Children must point strictly forward inside the arena, which also
    /// rules out cycles.
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(EngineError::CorruptModel("tree has no nodes".to_string()));
        }

        let len = self.nodes.len();
        for (index, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = *node
            {
                if feature >= n_features {
                    return Err(EngineError::CorruptModel(format!(
                        "node {index} splits on feature {feature} of {n_features}"
                    )));
                }
                if !threshold.is_finite() {
                    return Err(EngineError::CorruptModel(format!(
                        "node {index} has a non-finite threshold"
                    )));
                }
                for child in [left, right] {
                    if child <= index || child >= len {
                        return Err(EngineError::CorruptModel(format!(
                            "node {index} points to invalid child {child}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Features with spread among the given samples, with their (min, max)
fn splittable_features<S: AsRef<[f64]>>(samples: &[S], indices: &[usize]) -> Vec<(usize, f64, f64)> {
    let n_features = samples[indices[0]].as_ref().len();

    (0..n_features)
        .filter_map(|feature| {
            let (min, max) = indices.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(min, max), &i| {
                    let value = samples[i].as_ref()[feature];
                    (min.min(value), max.max(value))
                },
            );
            (min < max).then_some((feature, min, max))
        })
        .collect()
}

/// Uniform draw from the open interval (min, max)
///
/// When no representable value lies strictly between the bounds, `max` is
/// used, which still separates the two sides.
///
/// Interpolates between the bounds instead of scaling `max - min`, which
/// overflows to infinity for finite bounds of opposite sign near `f64::MAX`.
fn draw_threshold<R: Rng + ?Sized>(min: f64, max: f64, rng: &mut R) -> f64 {
    for _ in 0..MAX_SPLIT_REDRAWS {
        let u: f64 = rng.gen();
        let value = min * (1.0 - u) + max * u;
        if value > min && value <= max {
            return value;
        }
    }
    max
}
