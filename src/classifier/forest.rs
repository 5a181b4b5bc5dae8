//! Random forest of CART trees (gini impurity, bootstrap samples, random
//! feature subsets per split).

use super::Estimator;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features tried per split; `None` = sqrt(n_features)
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        proba: Vec<f64>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Working state while growing one tree
struct TreeBuilder<'a, 'b> {
    x: ArrayView2<'a, f64>,
    y: &'b [usize],
    n_classes: usize,
    max_depth: usize,
    min_samples_split: usize,
    max_features: usize,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl<'a, 'b> TreeBuilder<'a, 'b> {
    fn class_counts(&self, samples: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += 1.0;
        }
        counts
    }

    fn leaf(&mut self, counts: Vec<f64>) -> usize {
        let total: f64 = counts.iter().sum();
        let proba = if total > 0.0 {
            counts.iter().map(|c| c / total).collect()
        } else {
            vec![1.0 / self.n_classes as f64; self.n_classes]
        };
        self.nodes.push(Node::Leaf { proba });
        self.nodes.len() - 1
    }

    fn grow(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let counts = self.class_counts(&samples);
        let pure = counts.iter().filter(|&&c| c > 0.0).count() <= 1;

        if pure || depth >= self.max_depth || samples.len() < self.min_samples_split {
            return self.leaf(counts);
        }

        let Some(split) = self.best_split(&samples, rng) else {
            return self.leaf(counts);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x[[s, split.feature]] <= split.threshold);

        // Reserve this node's slot before the children are appended
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { proba: Vec::new() });

        let left = self.grow(left, depth + 1, rng);
        let right = self.grow(right, depth + 1, rng);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    /// Lowest weighted gini over a random subset of features. Keeps drawing
    /// past the subset while every feature tried so far was constant.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        let mut best: Option<SplitCandidate> = None;
        for (tried, &feature) in features.iter().enumerate() {
            if tried >= self.max_features && best.is_some() {
                break;
            }
            if let Some(candidate) = self.best_split_on(samples, feature) {
                if best.as_ref().map_or(true, |b| candidate.impurity < b.impurity) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn best_split_on(&self, samples: &[usize], feature: usize) -> Option<SplitCandidate> {
        let mut order: Vec<(f64, usize)> = samples
            .iter()
            .map(|&s| (self.x[[s, feature]], self.y[s]))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = order.len() as f64;
        let mut right = vec![0.0; self.n_classes];
        for &(_, c) in &order {
            right[c] += 1.0;
        }
        let mut left = vec![0.0; self.n_classes];

        let mut best: Option<SplitCandidate> = None;
        for i in 0..order.len() - 1 {
            let (value, class) = order[i];
            left[class] += 1.0;
            right[class] -= 1.0;

            let next = order[i + 1].0;
            if next <= value {
                continue;
            }

            let n_left = (i + 1) as f64;
            let n_right = n - n_left;
            let impurity = (n_left * gini(&left, n_left) + n_right * gini(&right, n_right)) / n;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mut threshold = value + (next - value) / 2.0;
                if threshold >= next {
                    threshold = value;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total) * (c / total)).sum::<f64>()
}

/// Tree-ensemble classifier. Class probabilities are the mean of the leaf
/// distributions reached in every tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            n_classes: 0,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

impl Estimator for RandomForest {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) {
        let _span = tracing::debug_span!("forest_fit", trees = self.params.n_estimators).entered();

        let n_samples = x.nrows();
        let n_features = x.ncols();
        let max_features = self
            .params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features.max(1));

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        self.n_classes = n_classes;
        self.trees = (0..self.params.n_estimators.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> =
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                let mut builder = TreeBuilder {
                    x,
                    y,
                    n_classes,
                    max_depth: self.params.max_depth,
                    min_samples_split: self.params.min_samples_split.max(2),
                    max_features,
                    nodes: Vec::new(),
                };
                builder.grow(bootstrap, 0, &mut rng);
                DecisionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();
    }

    /// Children always follow their parent, so a valid tree has no cycles.
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.n_classes != n_classes {
            return Err(format!("forest has {} classes, expected {}", self.n_classes, n_classes));
        }
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} is empty", t));
            }
            for (idx, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= n_features {
                            return Err(format!("tree {} node {} splits on feature {}", t, idx, feature));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("tree {} node {} has a non-finite threshold", t, idx));
                        }
                        for child in [*left, *right] {
                            if child <= idx || child >= tree.nodes.len() {
                                return Err(format!("tree {} node {} points at node {}", t, idx, child));
                            }
                        }
                    }
                    Node::Leaf { proba } => {
                        if proba.len() != n_classes {
                            return Err(format!(
                                "tree {} leaf {} has {} probabilities",
                                t,
                                idx,
                                proba.len()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut proba = Array1::<f64>::zeros(self.n_classes);
        if self.trees.is_empty() {
            return proba;
        }
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.predict_proba(x)) {
                *acc += p;
            }
        }
        proba / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn clusters() -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..12 {
            let jitter = (i as f64 * 0.7).sin() * 0.2;
            rows.extend_from_slice(&[-2.0 + jitter, 1.0 - jitter]);
            labels.push(0);
            rows.extend_from_slice(&[2.0 - jitter, 1.0 + jitter]);
            labels.push(1);
            rows.extend_from_slice(&[0.0 + jitter, -2.0 + jitter]);
            labels.push(2);
        }
        (Array2::from_shape_vec((36, 2), rows).unwrap(), labels)
    }

    #[test]
    fn test_separates_clusters() {
        let (x, y) = clusters();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 20,
            ..ForestParams::default()
        });
        forest.fit(x.view(), &y, 3);
        assert_eq!(forest.n_trees(), 20);

        let p = forest.predict_proba(array![-2.0, 1.0].view());
        assert!((p.sum() - 1.0).abs() < 1e-9);
        assert!(p[0] > 0.9, "proba {:?}", p);

        let p = forest.predict_proba(array![0.1, -2.1].view());
        assert!(p[2] > 0.9, "proba {:?}", p);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = clusters();
        let params = ForestParams {
            n_estimators: 5,
            ..ForestParams::default()
        };
        let mut a = RandomForest::new(params.clone());
        let mut b = RandomForest::new(params);
        a.fit(x.view(), &y, 3);
        b.fit(x.view(), &y, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_depth_zero_is_prior() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0, 0, 0, 1];
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 1,
            max_depth: 0,
            ..ForestParams::default()
        });
        forest.fit(x.view(), &y, 2);
        let p = forest.predict_proba(array![3.0].view());
        assert!((p.sum() - 1.0).abs() < 1e-9);
        // a single leaf holds the bootstrap class frequencies
        assert_eq!(forest.trees[0].nodes.len(), 1);
    }

    #[test]
    fn test_fit_with_short_lived_labels() {
        let (x, y) = clusters();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        });
        {
            let labels = y.clone();
            forest.fit(x.view(), &labels, 3);
        }
        assert_eq!(forest.n_trees(), 2);
    }

    #[test]
    fn test_validate_rejects_broken_trees() {
        let (x, y) = clusters();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 3,
            ..ForestParams::default()
        });
        forest.fit(x.view(), &y, 3);
        forest.validate(2, 3).unwrap();
        assert!(forest.validate(2, 2).is_err());

        let split = forest.trees[0]
            .nodes
            .iter()
            .position(|n| matches!(n, Node::Split { .. }))
            .unwrap();

        let mut bad_feature = forest.clone();
        if let Node::Split { feature, .. } = &mut bad_feature.trees[0].nodes[split] {
            *feature = 7;
        }
        assert!(bad_feature.validate(2, 3).is_err());

        let mut cycle = forest.clone();
        if let Node::Split { left, .. } = &mut cycle.trees[0].nodes[split] {
            *left = split;
        }
        assert!(cycle.validate(2, 3).is_err());

        assert!(RandomForest::new(ForestParams::default()).validate(2, 0).is_err());
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[4.0, 0.0], 4.0), 0.0);
        assert!((gini(&[2.0, 2.0], 4.0) - 0.5).abs() < 1e-12);
    }
}
