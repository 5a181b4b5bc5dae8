//! Gesture classification: a frozen standardization transform in front of a
//! supervised multi-class estimator.

mod forest;
mod network;
mod persist;
mod scaler;
mod svm;

pub use forest::{ForestParams, RandomForest};
pub use network::{NetworkParams, NeuralNetwork};
pub use scaler::StandardScaler;
pub use svm::{Gamma, KernelSvm, SvmParams};

use crate::features::{FeatureVector, FEATURE_LEN};
use crate::gesture::GestureLabel;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model has not been trained or loaded")]
    Untrained,

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("{samples} samples but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },

    #[error("feature vector has {found} values, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("training label {0} is not a trainable gesture")]
    InvalidLabel(GestureLabel),

    #[error("model unavailable at {}: {source}", path.display())]
    ModelUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a compatible model artifact: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
}

/// Capability shared by the estimator variants.
///
/// Estimators see standardized features and class indices `0..n_classes`.
pub trait Estimator {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize);

    /// Probability per class index; sums to 1 once fitted
    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Check that fitted parameters fit `n_features` inputs and `n_classes`
    /// outputs, so that `predict_proba` cannot index out of bounds.
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String>;
}

/// Estimator selection and hyper-parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierParams {
    RandomForest(ForestParams),
    Svm(SvmParams),
    NeuralNetwork(NetworkParams),
}

impl Default for ClassifierParams {
    fn default() -> Self {
        ClassifierParams::RandomForest(ForestParams::default())
    }
}

impl ClassifierParams {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierParams::RandomForest(_) => "random_forest",
            ClassifierParams::Svm(_) => "svm",
            ClassifierParams::NeuralNetwork(_) => "neural_network",
        }
    }

    /// Unfitted estimator for these parameters
    pub fn build(&self) -> EstimatorModel {
        match self {
            ClassifierParams::RandomForest(p) => EstimatorModel::RandomForest(RandomForest::new(p.clone())),
            ClassifierParams::Svm(p) => EstimatorModel::Svm(KernelSvm::new(p.clone())),
            ClassifierParams::NeuralNetwork(p) => EstimatorModel::NeuralNetwork(NeuralNetwork::new(p.clone())),
        }
    }
}

/// One of the concrete estimators, chosen at construction time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorModel {
    RandomForest(RandomForest),
    Svm(KernelSvm),
    NeuralNetwork(NeuralNetwork),
}

impl EstimatorModel {
    pub fn name(&self) -> &'static str {
        match self {
            EstimatorModel::RandomForest(_) => "random_forest",
            EstimatorModel::Svm(_) => "svm",
            EstimatorModel::NeuralNetwork(_) => "neural_network",
        }
    }

    fn inner(&self) -> &dyn Estimator {
        match self {
            EstimatorModel::RandomForest(m) => m,
            EstimatorModel::Svm(m) => m,
            EstimatorModel::NeuralNetwork(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Estimator {
        match self {
            EstimatorModel::RandomForest(m) => m,
            EstimatorModel::Svm(m) => m,
            EstimatorModel::NeuralNetwork(m) => m,
        }
    }
}

impl Estimator for EstimatorModel {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) {
        self.inner_mut().fit(x, y, n_classes)
    }

    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.inner().predict_proba(x)
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        self.inner().validate(n_features, n_classes)
    }
}

/// Classifier output for one feature vector
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub label: GestureLabel,
    /// Estimated probability of `label`, 0.0 to 1.0
    pub confidence: f32,
}

/// Fitted scaler + estimator. Immutable once built; share it behind an
/// `Arc` for inference.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainedModel {
    scaler: StandardScaler,
    estimator: EstimatorModel,
    /// Gesture for each class index
    classes: Vec<GestureLabel>,
}

fn to_matrix(samples: &[FeatureVector]) -> Array2<f64> {
    let cols = samples.first().map_or(0, FeatureVector::len);
    Array2::from_shape_fn((samples.len(), cols), |(i, j)| samples[i].as_slice()[j] as f64)
}

impl TrainedModel {
    /// Fit the standardization on `samples`, then the estimator on the
    /// standardized samples.
    pub fn train(
        params: &ClassifierParams,
        samples: &[FeatureVector],
        labels: &[GestureLabel],
    ) -> Result<Self, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        if samples.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }
        if let Some(bad) = samples.iter().find(|s| s.len() != FEATURE_LEN) {
            return Err(ClassifierError::DimensionMismatch {
                expected: FEATURE_LEN,
                found: bad.len(),
            });
        }
        if let Some(bad) = labels.iter().find(|l| **l == GestureLabel::Unknown) {
            return Err(ClassifierError::InvalidLabel(*bad));
        }

        let mut classes: Vec<GestureLabel> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.iter().position(|c| c == l).unwrap_or(0))
            .collect();

        tracing::info!(
            "Training {} on {} samples, {} classes",
            params.name(),
            samples.len(),
            classes.len()
        );

        let x = to_matrix(samples);
        let scaler = StandardScaler::fit(x.view());
        let x_scaled = scaler.transform_batch(x.view());

        let mut estimator = params.build();
        estimator.fit(x_scaled.view(), &y, classes.len());

        let model = Self {
            scaler,
            estimator,
            classes,
        };

        let accuracy = model.accuracy(samples, labels)?;
        tracing::info!("Training accuracy: {:.2}%", accuracy * 100.0);

        Ok(model)
    }

    pub fn kind(&self) -> &'static str {
        self.estimator.name()
    }

    pub fn classes(&self) -> &[GestureLabel] {
        &self.classes
    }

    pub fn feature_len(&self) -> usize {
        self.scaler.n_features()
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Arg-max class and its probability. Standardizes with the fitted
    /// transform; nothing is refit.
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        if features.len() != self.feature_len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.feature_len(),
                found: features.len(),
            });
        }

        let x = Array1::from_iter(features.as_slice().iter().map(|&v| v as f64));
        let scaled = self.scaler.transform(x.view());
        let proba = self.estimator.predict_proba(scaled.view());

        // first maximum wins ties
        let (best, p) = proba
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, &p)| {
                if p > bp {
                    (i, p)
                } else {
                    (bi, bp)
                }
            });

        let label = self.classes.get(best).copied().unwrap_or(GestureLabel::Unknown);
        let confidence = if p.is_finite() { p.clamp(0.0, 1.0) as f32 } else { 0.0 };

        Ok(Prediction { label, confidence })
    }

    pub fn predict_batch(&self, samples: &[FeatureVector]) -> Result<Vec<Prediction>, ClassifierError> {
        samples.iter().map(|s| self.predict(s)).collect()
    }

    /// Fraction of `samples` predicted as their label
    pub fn accuracy(&self, samples: &[FeatureVector], labels: &[GestureLabel]) -> Result<f64, ClassifierError> {
        if samples.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }
        if samples.is_empty() {
            return Ok(0.0);
        }
        let predictions = self.predict_batch(samples)?;
        let correct = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| p.label == **l)
            .count();
        Ok(correct as f64 / samples.len() as f64)
    }

    /// Write `<base>.json` (estimator) and `<base>_scaler.json` (scaler)
    pub fn save<P: AsRef<Path>>(&self, base: P) -> Result<(), ClassifierError> {
        persist::save(self, base.as_ref())
    }

    pub fn load<P: AsRef<Path>>(base: P) -> Result<Self, ClassifierError> {
        persist::load(base.as_ref())
    }
}

/// Classifier handle with the train / predict / save / load lifecycle.
/// Predicting or saving before a model exists is an error.
#[derive(Clone, Debug)]
pub struct GestureClassifier {
    params: ClassifierParams,
    model: Option<Arc<TrainedModel>>,
}

impl GestureClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params, model: None }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Train a fresh model, replacing any previous one wholesale
    pub fn train(
        &mut self,
        samples: &[FeatureVector],
        labels: &[GestureLabel],
    ) -> Result<Arc<TrainedModel>, ClassifierError> {
        let model = Arc::new(TrainedModel::train(&self.params, samples, labels)?);
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        self.model()?.predict(features)
    }

    pub fn predict_batch(&self, samples: &[FeatureVector]) -> Result<Vec<Prediction>, ClassifierError> {
        self.model()?.predict_batch(samples)
    }

    /// Shared read-only handle for inference
    pub fn model(&self) -> Result<Arc<TrainedModel>, ClassifierError> {
        self.model.clone().ok_or(ClassifierError::Untrained)
    }

    pub fn save<P: AsRef<Path>>(&self, base: P) -> Result<(), ClassifierError> {
        self.model()?.save(base)
    }

    pub fn load<P: AsRef<Path>>(base: P) -> Result<Self, ClassifierError> {
        let model = TrainedModel::load(base)?;
        let params = match &model.estimator {
            EstimatorModel::RandomForest(m) => ClassifierParams::RandomForest(m.params().clone()),
            EstimatorModel::Svm(m) => ClassifierParams::Svm(m.params().clone()),
            EstimatorModel::NeuralNetwork(m) => ClassifierParams::NeuralNetwork(m.params().clone()),
        };
        Ok(Self {
            params,
            model: Some(Arc::new(model)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three well separated gestures in feature space
    fn samples() -> (Vec<FeatureVector>, Vec<GestureLabel>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            let j = (i as f32 * 0.9).sin() * 0.01;
            x.push(FeatureVector::new(vec![
                0.2 + j, 0.2, 0.18, 5.0, 0.5, 0.8 + j, 40.0, 170.0, 0.4,
            ]));
            y.push(GestureLabel::Palm);
            x.push(FeatureVector::new(vec![
                0.05 + j, 0.06, 0.05, 0.0, 0.5, 0.8 - j, 20.0, 60.0, 0.2,
            ]));
            y.push(GestureLabel::Fist);
            x.push(FeatureVector::new(vec![
                0.01 + j, 0.1, 0.12, 3.0, 0.5 + j, 0.8, 90.0, 150.0, 0.25,
            ]));
            y.push(GestureLabel::Pinch);
        }
        (x, y)
    }

    #[test]
    fn test_predict_before_train_fails() {
        let classifier = GestureClassifier::new(ClassifierParams::default());
        assert!(!classifier.is_trained());
        let err = classifier.predict(&FeatureVector::zeros()).unwrap_err();
        assert!(matches!(err, ClassifierError::Untrained));
        assert!(matches!(
            classifier.save(std::env::temp_dir().join("never")),
            Err(ClassifierError::Untrained)
        ));
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let params = ClassifierParams::default();
        assert!(matches!(
            TrainedModel::train(&params, &[], &[]),
            Err(ClassifierError::EmptyTrainingSet)
        ));
        assert!(matches!(
            TrainedModel::train(&params, &[FeatureVector::zeros()], &[]),
            Err(ClassifierError::LengthMismatch { samples: 1, labels: 0 })
        ));
        assert!(matches!(
            TrainedModel::train(&params, &[FeatureVector::new(vec![1.0; 3])], &[GestureLabel::Palm]),
            Err(ClassifierError::DimensionMismatch { expected: 9, found: 3 })
        ));
        assert!(matches!(
            TrainedModel::train(&params, &[FeatureVector::zeros()], &[GestureLabel::Unknown]),
            Err(ClassifierError::InvalidLabel(GestureLabel::Unknown))
        ));
    }

    #[test]
    fn test_every_variant_fits_training_set() {
        let (x, y) = samples();
        let variants = [
            ClassifierParams::RandomForest(ForestParams {
                n_estimators: 15,
                ..ForestParams::default()
            }),
            ClassifierParams::Svm(SvmParams::default()),
            ClassifierParams::NeuralNetwork(NetworkParams {
                hidden_layers: vec![16],
                max_iter: 200,
                learning_rate: 0.02,
                ..NetworkParams::default()
            }),
        ];

        for params in variants {
            let mut classifier = GestureClassifier::new(params.clone());
            let model = classifier.train(&x, &y).unwrap();
            assert_eq!(model.kind(), params.name());
            model.estimator.validate(FEATURE_LEN, 3).unwrap();
            assert!(model.estimator.validate(FEATURE_LEN + 1, 3).is_err());
            assert!(model.estimator.validate(FEATURE_LEN, 4).is_err());
            assert_eq!(
                model.classes(),
                &[GestureLabel::Palm, GestureLabel::Fist, GestureLabel::Pinch]
            );
            let accuracy = model.accuracy(&x, &y).unwrap();
            assert!(accuracy > 0.95, "{} accuracy {}", params.name(), accuracy);

            let p = classifier.predict(&x[0]).unwrap();
            assert_eq!(p.label, GestureLabel::Palm);
            assert!((0.0..=1.0).contains(&p.confidence));
        }
    }

    #[test]
    fn test_predict_rejects_wrong_length() {
        let (x, y) = samples();
        let model = TrainedModel::train(
            &ClassifierParams::RandomForest(ForestParams {
                n_estimators: 3,
                ..ForestParams::default()
            }),
            &x,
            &y,
        )
        .unwrap();
        assert!(matches!(
            model.predict(&FeatureVector::new(vec![0.0; 4])),
            Err(ClassifierError::DimensionMismatch { expected: 9, found: 4 })
        ));
    }

    #[test]
    fn test_single_gesture_model_is_confident() {
        let (x, _) = samples();
        let palms: Vec<FeatureVector> = x.iter().step_by(3).cloned().collect();
        let labels = vec![GestureLabel::Palm; palms.len()];
        let model = TrainedModel::train(&ClassifierParams::default(), &palms, &labels).unwrap();
        let p = model.predict(&palms[0]).unwrap();
        assert_eq!(p.label, GestureLabel::Palm);
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn test_params_from_json() {
        let params: ClassifierParams =
            serde_json::from_str(r#"{"kind": "svm", "c": 2.0, "gamma": {"value": 0.5}}"#).unwrap();
        match params {
            ClassifierParams::Svm(p) => {
                assert_eq!(p.c, 2.0);
                assert_eq!(p.gamma, Gamma::Value(0.5));
                assert_eq!(p.max_passes, SvmParams::default().max_passes);
            }
            other => panic!("Expected svm, got {:?}", other),
        }
        let default: ClassifierParams = serde_json::from_str(r#"{"kind": "random_forest"}"#).unwrap();
        assert_eq!(default, ClassifierParams::default());
    }
}
