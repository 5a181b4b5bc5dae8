//! On-disk model artifacts.
//!
//! A model is two JSON documents next to each other: `<base>.json` holds the
//! class list and fitted estimator, `<base>_scaler.json` holds the
//! standardization parameters.

use super::{ClassifierError, Estimator, EstimatorModel, StandardScaler, TrainedModel};
use crate::features::FEATURE_LEN;
use crate::gesture::GestureLabel;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const MODEL_FORMAT: &str = "handcue-classifier";
const SCALER_FORMAT: &str = "handcue-scaler";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelFile {
    format: String,
    version: u32,
    feature_len: usize,
    classes: Vec<GestureLabel>,
    estimator: EstimatorModel,
}

#[derive(Serialize, Deserialize)]
struct ScalerFile {
    format: String,
    version: u32,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub fn model_path(base: &Path) -> PathBuf {
    with_suffix(base, ".json")
}

pub fn scaler_path(base: &Path) -> PathBuf {
    with_suffix(base, "_scaler.json")
}

fn unavailable(path: &Path, source: std::io::Error) -> ClassifierError {
    ClassifierError::ModelUnavailable {
        path: path.to_path_buf(),
        source,
    }
}

fn format_error(path: &Path, reason: impl ToString) -> ClassifierError {
    ClassifierError::Format {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ClassifierError> {
    let file = fs::File::create(path).map_err(|e| unavailable(path, e))?;
    serde_json::to_writer(BufWriter::new(file), value).map_err(|e| format_error(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ClassifierError> {
    let text = fs::read_to_string(path).map_err(|e| unavailable(path, e))?;
    serde_json::from_str(&text).map_err(|e| format_error(path, e))
}

pub fn save(model: &TrainedModel, base: &Path) -> Result<(), ClassifierError> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;
    }

    let model_file = model_path(base);
    write_json(
        &model_file,
        &ModelFile {
            format: MODEL_FORMAT.to_string(),
            version: VERSION,
            feature_len: model.feature_len(),
            classes: model.classes.clone(),
            estimator: model.estimator.clone(),
        },
    )?;

    let scaler_file = scaler_path(base);
    write_json(
        &scaler_file,
        &ScalerFile {
            format: SCALER_FORMAT.to_string(),
            version: VERSION,
            mean: model.scaler.mean().to_vec(),
            scale: model.scaler.scale().to_vec(),
        },
    )?;

    tracing::info!(
        "Saved {} model to {} (+ {})",
        model.kind(),
        model_file.display(),
        scaler_file.display()
    );
    Ok(())
}

pub fn load(base: &Path) -> Result<TrainedModel, ClassifierError> {
    let model_file = model_path(base);
    let scaler_file = scaler_path(base);

    let stored: ModelFile = read_json(&model_file)?;
    if stored.format != MODEL_FORMAT || stored.version != VERSION {
        return Err(format_error(
            &model_file,
            format!("unsupported format {} v{}", stored.format, stored.version),
        ));
    }
    if stored.feature_len != FEATURE_LEN {
        return Err(format_error(
            &model_file,
            format!("model takes {} features, expected {}", stored.feature_len, FEATURE_LEN),
        ));
    }
    if stored.classes.is_empty() {
        return Err(format_error(&model_file, "no classes"));
    }
    if stored.classes.contains(&GestureLabel::Unknown) || stored.classes.windows(2).any(|w| w[0] >= w[1]) {
        return Err(format_error(&model_file, "classes must be distinct gestures in id order"));
    }
    stored
        .estimator
        .validate(stored.feature_len, stored.classes.len())
        .map_err(|reason| format_error(&model_file, reason))?;

    let scaler: ScalerFile = read_json(&scaler_file)?;
    if scaler.format != SCALER_FORMAT || scaler.version != VERSION {
        return Err(format_error(
            &scaler_file,
            format!("unsupported format {} v{}", scaler.format, scaler.version),
        ));
    }
    if scaler.mean.len() != stored.feature_len || scaler.scale.len() != stored.feature_len {
        return Err(format_error(
            &scaler_file,
            format!(
                "scaler has {}/{} values, model expects {}",
                scaler.mean.len(),
                scaler.scale.len(),
                stored.feature_len
            ),
        ));
    }
    if scaler.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
        return Err(format_error(&scaler_file, "scale values must be finite and non-zero"));
    }

    tracing::info!(
        "Loaded {} model from {} ({} classes)",
        stored.estimator.name(),
        model_file.display(),
        stored.classes.len()
    );

    Ok(TrainedModel {
        scaler: StandardScaler::from_parts(scaler.mean, scaler.scale),
        estimator: stored.estimator,
        classes: stored.classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierParams, ForestParams, NetworkParams, SvmParams};
    use crate::features::FeatureVector;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("handcue-persist-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn fitted(params: ClassifierParams) -> (TrainedModel, Vec<FeatureVector>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..8 {
            let j = (i as f32 * 1.3).cos() * 0.02;
            x.push(FeatureVector::new(vec![0.2 + j, 0.2, 0.2, 5.0, 0.5, 0.7, 30.0, 170.0, 0.4]));
            y.push(GestureLabel::Palm);
            x.push(FeatureVector::new(vec![0.05, 0.05 + j, 0.05, 0.0, 0.5, 0.7, 15.0, 50.0, 0.2]));
            y.push(GestureLabel::Fist);
        }
        (TrainedModel::train(&params, &x, &y).unwrap(), x)
    }

    #[test]
    fn test_paths() {
        let base = Path::new("models/gesture_model_svm");
        assert_eq!(model_path(base), PathBuf::from("models/gesture_model_svm.json"));
        assert_eq!(scaler_path(base), PathBuf::from("models/gesture_model_svm_scaler.json"));
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let dir = scratch("roundtrip");
        for params in [
            ClassifierParams::RandomForest(ForestParams {
                n_estimators: 5,
                ..ForestParams::default()
            }),
            ClassifierParams::Svm(SvmParams::default()),
            ClassifierParams::NeuralNetwork(NetworkParams {
                hidden_layers: vec![6],
                max_iter: 30,
                ..NetworkParams::default()
            }),
        ] {
            let (model, x) = fitted(params.clone());
            let base = dir.join(format!("gesture_model_{}", params.name()));
            model.save(&base).unwrap();

            let loaded = TrainedModel::load(&base).unwrap();
            assert_eq!(loaded, model);
            for sample in &x {
                assert_eq!(loaded.predict(sample).unwrap(), model.predict(sample).unwrap());
            }
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_files_are_unavailable() {
        let dir = scratch("missing");
        let err = TrainedModel::load(dir.join("nothing")).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelUnavailable { .. }));

        // estimator present, scaler missing
        let (model, _) = fitted(ClassifierParams::RandomForest(ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        }));
        let base = dir.join("partial");
        model.save(&base).unwrap();
        fs::remove_file(scaler_path(&base)).unwrap();
        let err = TrainedModel::load(&base).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelUnavailable { ref path, .. } if *path == scaler_path(&base)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_artifacts_are_rejected() {
        let dir = scratch("corrupt");
        let (model, _) = fitted(ClassifierParams::RandomForest(ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        }));
        let base = dir.join("model");
        model.save(&base).unwrap();

        fs::write(
            scaler_path(&base),
            r#"{"format":"handcue-scaler","version":1,"mean":[0.0],"scale":[1.0]}"#,
        )
        .unwrap();
        assert!(matches!(TrainedModel::load(&base), Err(ClassifierError::Format { .. })));

        fs::write(model_path(&base), "not json").unwrap();
        assert!(matches!(TrainedModel::load(&base), Err(ClassifierError::Format { .. })));
        let _ = fs::remove_dir_all(&dir);
    }

    fn first_split(value: &mut serde_json::Value) -> Option<&mut serde_json::Value> {
        if value.get("node").and_then(|n| n.as_str()) == Some("split") {
            return Some(value);
        }
        match value {
            serde_json::Value::Object(map) => map.values_mut().find_map(first_split),
            serde_json::Value::Array(items) => items.iter_mut().find_map(first_split),
            _ => None,
        }
    }

    #[test]
    fn test_out_of_range_split_feature_is_rejected() {
        let dir = scratch("tampered");
        let (model, _) = fitted(ClassifierParams::RandomForest(ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        }));
        let base = dir.join("model");
        model.save(&base).unwrap();

        let mut doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(model_path(&base)).unwrap()).unwrap();
        let split = first_split(&mut doc).unwrap();
        split["feature"] = serde_json::json!(99);
        fs::write(model_path(&base), doc.to_string()).unwrap();

        let err = TrainedModel::load(&base).unwrap_err();
        assert!(matches!(err, ClassifierError::Format { ref path, .. } if *path == model_path(&base)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_other_feature_length_is_rejected() {
        let dir = scratch("eight");
        let (model, _) = fitted(ClassifierParams::NeuralNetwork(NetworkParams {
            hidden_layers: vec![4],
            max_iter: 5,
            ..NetworkParams::default()
        }));
        let base = dir.join("model");
        model.save(&base).unwrap();

        let mut doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(model_path(&base)).unwrap()).unwrap();
        doc["feature_len"] = serde_json::json!(8);
        fs::write(model_path(&base), doc.to_string()).unwrap();
        fs::write(
            scaler_path(&base),
            serde_json::json!({
                "format": "handcue-scaler",
                "version": 1,
                "mean": vec![0.0; 8],
                "scale": vec![1.0; 8],
            })
            .to_string(),
        )
        .unwrap();

        let err = TrainedModel::load(&base).unwrap_err();
        assert!(matches!(err, ClassifierError::Format { ref path, .. } if *path == model_path(&base)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unordered_classes_are_rejected() {
        let dir = scratch("classes");
        let (model, _) = fitted(ClassifierParams::RandomForest(ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        }));
        let base = dir.join("model");
        model.save(&base).unwrap();

        let mut doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(model_path(&base)).unwrap()).unwrap();
        doc["classes"] = serde_json::json!(["FIST", "PALM"]);
        fs::write(model_path(&base), doc.to_string()).unwrap();

        assert!(matches!(TrainedModel::load(&base), Err(ClassifierError::Format { .. })));
        let _ = fs::remove_dir_all(&dir);
    }
}
