//! Labelled samples on disk.
//!
//! One directory per gesture, named `<id>_<NAME>` (e.g. `0_PALM`), holding
//! numbered `features_<n>.json` / `landmarks_<n>.json` pairs.

use crate::features::{FeatureVector, FEATURE_LEN};
use crate::gesture::GestureLabel;
use crate::landmarks::LandmarkSet;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} has no sample directory")]
    Untrainable(GestureLabel),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn label_dir_name(label: GestureLabel) -> String {
    format!("{}_{}", label.id(), label.as_str())
}

/// Parse `<id>_<NAME>`; the id must agree with the name
fn parse_label_dir(name: &str) -> Option<GestureLabel> {
    let (id, label) = name.split_once('_')?;
    let label = GestureLabel::from_name(label)?;
    (id.parse::<u8>().ok()? == label.id() && label != GestureLabel::Unknown).then_some(label)
}

/// Number in `features_<n>.json`
fn sample_index(name: &str) -> Option<usize> {
    name.strip_prefix("features_")?.strip_suffix(".json")?.parse().ok()
}

/// In-memory training set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub samples: Vec<FeatureVector>,
    pub labels: Vec<GestureLabel>,
    /// Files ignored while loading (unreadable or wrong feature length)
    pub skipped: usize,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, features: FeatureVector, label: GestureLabel) {
        self.samples.push(features);
        self.labels.push(label);
    }

    /// Samples per gesture
    pub fn counts(&self) -> BTreeMap<GestureLabel, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }

    /// Read every gesture directory under `root`.
    ///
    /// Sample files whose feature length does not match the current
    /// extractor are skipped with a warning. A missing root is an empty set.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        let mut dataset = Dataset::default();
        if !root.is_dir() {
            tracing::warn!("No data directory at {}", root.display());
            return Ok(dataset);
        }

        let mut dirs: Vec<(GestureLabel, PathBuf)> = Vec::new();
        for entry in fs::read_dir(root).map_err(io_error(root))? {
            let entry = entry.map_err(io_error(root))?;
            let name = entry.file_name();
            if let Some(label) = name.to_str().and_then(parse_label_dir) {
                if entry.path().is_dir() {
                    dirs.push((label, entry.path()));
                }
            }
        }
        dirs.sort();

        for (label, dir) in dirs {
            let mut files: Vec<(usize, PathBuf)> = Vec::new();
            for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
                let entry = entry.map_err(io_error(&dir))?;
                if let Some(n) = entry.file_name().to_str().and_then(sample_index) {
                    files.push((n, entry.path()));
                }
            }
            files.sort();

            let before = dataset.len();
            for (_, path) in files {
                match read_features(&path) {
                    Some(features) if features.len() == FEATURE_LEN => dataset.push(features, label),
                    Some(features) => {
                        tracing::warn!(
                            "Skipping {}: {} features, expected {}",
                            path.display(),
                            features.len(),
                            FEATURE_LEN
                        );
                        dataset.skipped += 1;
                    }
                    None => dataset.skipped += 1,
                }
            }
            tracing::info!("{}: {} samples", label, dataset.len() - before);
        }

        Ok(dataset)
    }

    /// Stratified split: each gesture contributes `test_fraction` of its
    /// samples (rounded, at least one when it has two or more) to the test set.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> (Dataset, Dataset) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Dataset::default();
        let mut test = Dataset::default();

        let mut by_label: BTreeMap<GestureLabel, Vec<usize>> = BTreeMap::new();
        for (i, label) in self.labels.iter().enumerate() {
            by_label.entry(*label).or_default().push(i);
        }

        for (label, mut indices) in by_label {
            indices.shuffle(&mut rng);
            let n = indices.len();
            let mut n_test = (n as f64 * test_fraction).round() as usize;
            if test_fraction > 0.0 && n >= 2 {
                n_test = n_test.clamp(1, n - 1);
            } else {
                n_test = n_test.min(n.saturating_sub(1));
            }
            for (k, i) in indices.into_iter().enumerate() {
                let target = if k < n_test { &mut test } else { &mut train };
                target.push(self.samples[i].clone(), label);
            }
        }

        (train, test)
    }
}

fn read_features(path: &Path) -> Option<FeatureVector> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("Skipping {}: {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(features) => Some(features),
        Err(err) => {
            tracing::warn!("Skipping {}: {}", path.display(), err);
            None
        }
    }
}

/// Writes numbered samples for one gesture
pub struct SampleWriter {
    dir: PathBuf,
    next: usize,
}

impl SampleWriter {
    /// Continues numbering after any samples already present
    pub fn new<P: AsRef<Path>>(root: P, label: GestureLabel) -> Result<Self, DatasetError> {
        if label == GestureLabel::Unknown {
            return Err(DatasetError::Untrainable(label));
        }
        let dir = root.as_ref().join(label_dir_name(label));
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let mut next = 0;
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let entry = entry.map_err(io_error(&dir))?;
            if let Some(n) = entry.file_name().to_str().and_then(sample_index) {
                next = next.max(n + 1);
            }
        }
        Ok(Self { dir, next })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one features/landmarks pair; returns its number
    pub fn save(&mut self, features: &FeatureVector, landmarks: &LandmarkSet) -> Result<usize, DatasetError> {
        let n = self.next;
        write_json(&self.dir.join(format!("features_{}.json", n)), features)?;
        write_json(&self.dir.join(format!("landmarks_{}.json", n)), landmarks)?;
        self.next += 1;
        Ok(n)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), DatasetError> {
    let text = serde_json::to_string(value).map_err(|source| DatasetError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(io_error(path))
}
