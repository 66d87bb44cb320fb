// Isolation Forest
//
// Ensemble of Isolation Trees. Each tree gets its own deterministic random
// stream derived from the master seed and the tree index, so the fitted
// forest is identical whether trees are grown sequentially or in parallel.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::tree::{average_path_length, max_depth_for, IsolationTree};

/// Default sub-sampling size (following the original paper)
pub const DEFAULT_SUBSAMPLE_SIZE: usize = 256;

/// Smallest training set a forest can be fitted on
pub const MIN_FIT_SAMPLES: usize = 2;

/// Per-tree subsample size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxSamples {
    /// min(256, training set size)
    #[default]
    Auto,
    /// Fixed count, capped at the training set size
    Fixed(usize),
}

impl MaxSamples {
    pub fn resolve(&self, n_samples: usize) -> usize {
        match *self {
            MaxSamples::Auto => DEFAULT_SUBSAMPLE_SIZE.min(n_samples),
            MaxSamples::Fixed(n) => n.min(n_samples),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MaxSamplesRepr {
    Count(usize),
    Keyword(String),
}

impl Serialize for MaxSamples {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            MaxSamples::Auto => MaxSamplesRepr::Keyword("auto".to_string()),
            MaxSamples::Fixed(n) => MaxSamplesRepr::Count(n),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MaxSamples {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match MaxSamplesRepr::deserialize(deserializer)? {
            MaxSamplesRepr::Count(n) => Ok(MaxSamples::Fixed(n)),
            MaxSamplesRepr::Keyword(k) if k.eq_ignore_ascii_case("auto") => Ok(MaxSamples::Auto),
            MaxSamplesRepr::Keyword(k) => {
                // Environment overrides arrive as strings
                k.parse::<usize>().map(MaxSamples::Fixed).map_err(|_| {
                    serde::de::Error::custom(format!(
                        "max_samples must be \"auto\" or a positive integer, got {k:?}"
                    ))
                })
            }
        }
    }
}

/// Hyper-parameters for fitting a forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees in the ensemble
    pub n_estimators: usize,

    /// Samples drawn (without replacement) per tree
    pub max_samples: MaxSamples,

    /// Assumed fraction of anomalies in the training data
    /// Only used to place the decision threshold
    pub contamination: f64,

    /// Master seed; retraining on identical input reproduces the forest
    pub seed: u64,

    /// Grow trees on the rayon thread pool
    pub parallel: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: MaxSamples::Auto,
            contamination: 0.15,
            seed: 42,
            parallel: true,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EngineError::InvalidParams(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(EngineError::InvalidParams(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if let MaxSamples::Fixed(n) = self.max_samples {
            if n < MIN_FIT_SAMPLES {
                return Err(EngineError::InvalidParams(format!(
                    "max_samples must be at least {MIN_FIT_SAMPLES}, got {n}"
                )));
            }
        }
        Ok(())
    }
}

/// Binary verdict for a scored sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// Serialized as -1
    Anomaly,
    /// Serialized as 1
    Normal,
}

impl Label {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Label::Anomaly)
    }
}

impl From<Label> for i8 {
    fn from(label: Label) -> Self {
        match label {
            Label::Anomaly => -1,
            Label::Normal => 1,
        }
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i8(i8::from(*self))
    }
}

/// Serializable overview of a fitted forest (for status/logging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestSummary {
    pub n_estimators: usize,
    pub subsample_size: usize,
    pub feature_count: usize,
    pub samples_trained: usize,
    pub contamination: f64,
    pub threshold: f64,
    pub seed: u64,
    pub trained_at: DateTime<Utc>,
    pub avg_tree_depth: f64,
}

/// Trained Isolation Forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: ForestParams,
    n_features: usize,
    subsample_size: usize,
    samples_trained: usize,
    /// s(x) at the (1 - contamination) quantile of the training set
    threshold: f64,
    trained_at: DateTime<Utc>,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Fit a forest on `samples`; every sample must share the same arity
    pub fn fit<S>(samples: &[S], params: ForestParams) -> Result<Self>
    where
        S: AsRef<[f64]> + Sync,
    {
        params.validate()?;

        if samples.len() < MIN_FIT_SAMPLES {
            return Err(EngineError::TooFewSamples {
                required: MIN_FIT_SAMPLES,
                actual: samples.len(),
            });
        }

        let n_features = samples[0].as_ref().len();
        if n_features == 0 {
            return Err(EngineError::InvalidParams(
                "training samples have no features".to_string(),
            ));
        }
        check_rows(samples, n_features)?;

        let subsample_size = params.max_samples.resolve(samples.len());
        let max_depth = max_depth_for(subsample_size);

        info!(
            "🌲 Growing {} isolation trees (samples: {}, subsample: {}, max depth: {})",
            params.n_estimators,
            samples.len(),
            subsample_size,
            max_depth
        );

        let seed = params.seed;
        let grow = |index: usize| {
            let mut rng = StdRng::seed_from_u64(tree_seed(seed, index));
            let subsample = draw_subsample(samples, subsample_size, &mut rng);
            let tree = IsolationTree::grow(&subsample, max_depth, &mut rng);
            debug!(tree = index, nodes = tree.node_count(), depth = tree.depth(), "tree grown");
            tree
        };

        let trees: Vec<IsolationTree> = if params.parallel {
            (0..params.n_estimators).into_par_iter().map(grow).collect()
        } else {
            (0..params.n_estimators).map(grow).collect()
        };

        let mut forest = Self {
            params,
            n_features,
            subsample_size,
            samples_trained: samples.len(),
            threshold: 0.0,
            trained_at: Utc::now(),
            trees,
        };

        let mut training_scores: Vec<f64> = samples
            .iter()
            .map(|s| forest.raw_score(s.as_ref()))
            .collect();
        forest.threshold = quantile(&mut training_scores, 1.0 - forest.params.contamination);

        info!(
            "✓ Isolation Forest trained (threshold: {:.4}, contamination: {})",
            forest.threshold, forest.params.contamination
        );

        Ok(forest)
    }

    /// s(x) = 2^(-E[h(x)] / c(subsample_size)), in (0, 1]; near 1 = anomalous
    pub fn anomaly_score(&self, sample: &[f64]) -> Result<f64> {
        self.check_arity(sample)?;
        Ok(self.raw_score(sample))
    }

    /// Decision-function orientation of the raw score: lower = more anomalous
    pub fn score_samples(&self, sample: &[f64]) -> Result<f64> {
        self.anomaly_score(sample).map(|s| -s)
    }

    /// Signed distance to the threshold; zero or negative means anomaly
    pub fn decision_function(&self, sample: &[f64]) -> Result<f64> {
        self.anomaly_score(sample).map(|s| self.threshold - s)
    }

    pub fn predict(&self, sample: &[f64]) -> Result<Label> {
        self.anomaly_score(sample).map(|s| self.label_for(s))
    }

    /// Raw scores s(x) for a batch
    pub fn score_batch<S: AsRef<[f64]>>(&self, samples: &[S]) -> Result<Vec<f64>> {
        samples
            .iter()
            .map(|s| self.anomaly_score(s.as_ref()))
            .collect()
    }

    pub fn predict_batch<S: AsRef<[f64]>>(&self, samples: &[S]) -> Result<Vec<Label>> {
        samples.iter().map(|s| self.predict(s.as_ref())).collect()
    }

    /// Label for an already computed raw score
    pub fn label_for(&self, score: f64) -> Label {
        if score >= self.threshold {
            Label::Anomaly
        } else {
            Label::Normal
        }
    }

    /// Mean path length over all trees
    pub fn mean_path_length(&self, sample: &[f64]) -> Result<f64> {
        self.check_arity(sample)?;
        Ok(self.expected_path_length(sample))
    }

    fn expected_path_length(&self, sample: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>() / self.trees.len() as f64
    }

    fn raw_score(&self, sample: &[f64]) -> f64 {
        let normalizer = average_path_length(self.subsample_size);
        2f64.powf(-self.expected_path_length(sample) / normalizer)
    }

    fn check_arity(&self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.n_features {
            return Err(EngineError::ArityMismatch {
                expected: self.n_features,
                actual: sample.len(),
            });
        }
        Ok(())
    }

    /// Consistency checks for a forest reloaded from disk
    pub(crate) fn validate(&self) -> Result<()> {
        self.params.validate()?;

        if self.trees.is_empty() {
            return Err(EngineError::CorruptModel("forest has no trees".to_string()));
        }
        if self.n_features == 0 {
            return Err(EngineError::CorruptModel("forest has no features".to_string()));
        }
        if self.subsample_size < MIN_FIT_SAMPLES {
            return Err(EngineError::CorruptModel(format!(
                "subsample size {} is below {MIN_FIT_SAMPLES}",
                self.subsample_size
            )));
        }
        if !self.threshold.is_finite() {
            return Err(EngineError::CorruptModel("threshold is not finite".to_string()));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features).map_err(|e| {
                EngineError::CorruptModel(format!("tree {index}: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn summary(&self) -> ForestSummary {
        let total_depth: usize = self.trees.iter().map(|t| t.depth()).sum();
        ForestSummary {
            n_estimators: self.trees.len(),
            subsample_size: self.subsample_size,
            feature_count: self.n_features,
            samples_trained: self.samples_trained,
            contamination: self.params.contamination,
            threshold: self.threshold,
            seed: self.params.seed,
            trained_at: self.trained_at,
            avg_tree_depth: total_depth as f64 / self.trees.len() as f64,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn subsample_size(&self) -> usize {
        self.subsample_size
    }

    pub fn samples_trained(&self) -> usize {
        self.samples_trained
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }
}

/// Independent stream seed for tree `index` (splitmix64 finalizer)
fn tree_seed(seed: u64, index: usize) -> u64 {
    let mut z = seed.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Subsample without replacement, or the whole set when it is small enough
fn draw_subsample<'a, S: AsRef<[f64]>>(
    samples: &'a [S],
    size: usize,
    rng: &mut StdRng,
) -> Vec<&'a [f64]> {
    if size >= samples.len() {
        return samples.iter().map(|s| s.as_ref()).collect();
    }
    rand::seq::index::sample(rng, samples.len(), size)
        .into_iter()
        .map(|i| samples[i].as_ref())
        .collect()
}

fn check_rows<S: AsRef<[f64]>>(samples: &[S], n_features: usize) -> Result<()> {
    for (index, sample) in samples.iter().enumerate() {
        let values = sample.as_ref();
        let problem = if values.len() != n_features {
            Some(EngineError::ArityMismatch {
                expected: n_features,
                actual: values.len(),
            })
        } else {
            values
                .iter()
                .position(|v| !v.is_finite())
                .map(|feature| EngineError::NonFinite {
                    feature,
                    name: "feature",
                })
        };

        if let Some(source) = problem {
            return Err(EngineError::InvalidRow {
                index,
                source: Box::new(source),
            });
        }
    }
    Ok(())
}

/// Linearly interpolated quantile, `q` in [0, 1]
fn quantile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let position = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    values[lower] + (values[upper] - values[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// 200 points uniformly spread in a unit box centred on 0.5
    fn cluster(seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..200)
            .map(|_| (0..4).map(|_| rng.gen_range(0.0..1.0)).collect())
            .collect()
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 50,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_default_params() {
        let params = ForestParams::default();
        assert_eq!(params.n_estimators, 100);
        assert_eq!(params.max_samples, MaxSamples::Auto);
        assert_eq!(params.contamination, 0.15);
        assert_eq!(params.seed, 42);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        let mut params = ForestParams::default();
        params.n_estimators = 0;
        assert!(params.validate().is_err());

        let mut params = ForestParams::default();
        params.contamination = 0.0;
        assert!(params.validate().is_err());
        params.contamination = 0.6;
        assert!(params.validate().is_err());
        params.contamination = f64::NAN;
        assert!(params.validate().is_err());

        let mut params = ForestParams::default();
        params.max_samples = MaxSamples::Fixed(1);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_max_samples_resolution() {
        assert_eq!(MaxSamples::Auto.resolve(10), 10);
        assert_eq!(MaxSamples::Auto.resolve(1000), 256);
        assert_eq!(MaxSamples::Fixed(64).resolve(1000), 64);
        assert_eq!(MaxSamples::Fixed(64).resolve(20), 20);
    }

    #[test]
    fn test_max_samples_serde() {
        let auto: MaxSamples = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto, MaxSamples::Auto);
        let fixed: MaxSamples = serde_json::from_str("128").unwrap();
        assert_eq!(fixed, MaxSamples::Fixed(128));
        let from_env: MaxSamples = serde_json::from_str("\"64\"").unwrap();
        assert_eq!(from_env, MaxSamples::Fixed(64));
        assert!(serde_json::from_str::<MaxSamples>("\"lots\"").is_err());

        assert_eq!(serde_json::to_string(&MaxSamples::Auto).unwrap(), "\"auto\"");
        assert_eq!(serde_json::to_string(&MaxSamples::Fixed(32)).unwrap(), "32");
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let one = vec![vec![1.0, 2.0]];
        assert!(matches!(
            IsolationForest::fit(&one, small_params()),
            Err(EngineError::TooFewSamples { required: 2, actual: 1 })
        ));

        let ragged = vec![vec![1.0, 2.0], vec![1.0], vec![3.0, 4.0]];
        match IsolationForest::fit(&ragged, small_params()) {
            Err(EngineError::InvalidRow { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }

        let nan = vec![vec![1.0, 2.0], vec![f64::NAN, 4.0]];
        assert!(IsolationForest::fit(&nan, small_params()).is_err());
    }

    #[test]
    fn test_forest_shape() {
        let data = cluster(1);
        let forest = IsolationForest::fit(&data, small_params()).unwrap();

        assert_eq!(forest.trees().len(), 50);
        assert_eq!(forest.n_features(), 4);
        assert_eq!(forest.subsample_size(), 200);
        assert_eq!(forest.samples_trained(), 200);
        for tree in forest.trees() {
            assert!(tree.depth() <= max_depth_for(200));
        }
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let data = cluster(2);
        let forest = IsolationForest::fit(&data, small_params()).unwrap();

        for query in data.iter().take(20) {
            let s = forest.anomaly_score(query).unwrap();
            assert!(s > 0.0 && s <= 1.0, "score {s} out of range");
        }
        let far = forest.anomaly_score(&[50.0, -50.0, 50.0, -50.0]).unwrap();
        assert!(far > 0.0 && far <= 1.0);
    }

    #[test]
    fn test_outlier_scores_higher_and_is_labelled() {
        let data = cluster(3);
        let forest = IsolationForest::fit(&data, ForestParams::default()).unwrap();

        let centre = [0.5, 0.5, 0.5, 0.5];
        let outlier = [25.0, -10.0, 40.0, 9.0];

        let s_centre = forest.anomaly_score(&centre).unwrap();
        let s_outlier = forest.anomaly_score(&outlier).unwrap();
        assert!(s_outlier > s_centre);

        assert_eq!(forest.predict(&outlier).unwrap(), Label::Anomaly);
        assert_eq!(forest.predict(&centre).unwrap(), Label::Normal);

        // Decision function agrees with the label
        assert!(forest.decision_function(&outlier).unwrap() <= 0.0);
        assert!(forest.decision_function(&centre).unwrap() > 0.0);

        // score_samples flips polarity
        assert_eq!(forest.score_samples(&outlier).unwrap(), -s_outlier);
    }

    #[test]
    fn test_contamination_sets_training_anomaly_rate() {
        let data = cluster(4);
        let forest = IsolationForest::fit(&data, ForestParams::default()).unwrap();

        let labels = forest.predict_batch(&data).unwrap();
        let flagged = labels.iter().filter(|l| l.is_anomaly()).count();
        let rate = flagged as f64 / data.len() as f64;
        assert!(
            (0.10..=0.25).contains(&rate),
            "expected roughly 15% flagged, got {rate}"
        );
    }

    #[test]
    fn test_deterministic_given_seed() {
        let data = cluster(5);
        let a = IsolationForest::fit(&data, small_params()).unwrap();
        let b = IsolationForest::fit(&data, small_params()).unwrap();

        assert_eq!(a.trees(), b.trees());
        let query = [0.3, 0.9, 0.1, 0.7];
        assert_eq!(
            a.mean_path_length(&query).unwrap(),
            b.mean_path_length(&query).unwrap()
        );
        assert_eq!(a.threshold(), b.threshold());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let data = cluster(6);
        let parallel = IsolationForest::fit(&data, small_params()).unwrap();
        let sequential = IsolationForest::fit(
            &data,
            ForestParams {
                parallel: false,
                ..small_params()
            },
        )
        .unwrap();

        assert_eq!(parallel.trees(), sequential.trees());
        assert_eq!(parallel.threshold(), sequential.threshold());
    }

    #[test]
    fn test_seed_changes_trees() {
        let data = cluster(7);
        let a = IsolationForest::fit(&data, small_params()).unwrap();
        let b = IsolationForest::fit(
            &data,
            ForestParams {
                seed: 7,
                ..small_params()
            },
        )
        .unwrap();
        assert_ne!(a.trees(), b.trees());
    }

    #[test]
    fn test_subsampling_without_replacement() {
        let data = cluster(8);
        let forest = IsolationForest::fit(
            &data,
            ForestParams {
                max_samples: MaxSamples::Fixed(32),
                ..small_params()
            },
        )
        .unwrap();

        assert_eq!(forest.subsample_size(), 32);
        for tree in forest.trees() {
            let leaf_total: usize = tree
                .nodes()
                .iter()
                .map(|n| match n {
                    crate::tree::Node::Leaf { size } => *size,
                    _ => 0,
                })
                .sum();
            assert_eq!(leaf_total, 32);
        }
    }

    #[test]
    fn test_arity_mismatch() {
        let data = cluster(9);
        let forest = IsolationForest::fit(&data, small_params()).unwrap();

        assert!(matches!(
            forest.anomaly_score(&[1.0, 2.0, 3.0]),
            Err(EngineError::ArityMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(forest.predict(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_err());
    }

    #[test]
    fn test_fit_on_extreme_finite_values() {
        let mut data: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![i as f64 * 0.1, 0.0, 1.0, 10.0])
            .collect();
        data.push(vec![-1.5e308, 0.0, 1.0, 10.0]);
        data.push(vec![1.5e308, 0.0, 1.0, 10.0]);

        let forest = IsolationForest::fit(&data, small_params()).unwrap();
        assert!(forest.threshold().is_finite());

        let scores = forest.score_batch(&data).unwrap();
        for score in &scores {
            assert!(score.is_finite() && *score > 0.0 && *score <= 1.0);
        }
        assert!(scores[10] > scores[4]);
        assert!(scores[11] > scores[4]);
    }

    #[test]
    fn test_label_serialization() {
        let json = serde_json::to_string(&vec![Label::Anomaly, Label::Normal]).unwrap();
        assert_eq!(json, "[-1,1]");
    }

    #[test]
    fn test_quantile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantile(&mut values, 0.0), 1.0);
        assert_eq!(quantile(&mut values, 1.0), 5.0);
        assert_eq!(quantile(&mut values, 0.5), 3.0);
        assert!((quantile(&mut values, 0.85) - 4.4).abs() < 1e-12);
    }

    #[test]
    fn test_tree_seeds_are_distinct() {
        let seeds: std::collections::HashSet<u64> = (0..1000).map(|i| tree_seed(42, i)).collect();
        assert_eq!(seeds.len(), 1000);
    }

    #[test]
    fn test_summary() {
        let data = cluster(10);
        let forest = IsolationForest::fit(&data, small_params()).unwrap();
        let summary = forest.summary();

        assert_eq!(summary.n_estimators, 50);
        assert_eq!(summary.feature_count, 4);
        assert_eq!(summary.samples_trained, 200);
        assert_eq!(summary.seed, 42);
        assert!(summary.avg_tree_depth > 0.0);
    }
}
