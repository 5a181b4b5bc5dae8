use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Per-feature standardization: zero mean, unit variance.
///
/// Fitted once on training data and frozen; inference only calls
/// [`StandardScaler::transform`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a (samples x features) matrix. Constant features get a scale
    /// of 1.0 so they map to zero instead of dividing by zero.
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let n_features = x.ncols();
        if x.nrows() == 0 {
            return Self {
                mean: vec![0.0; n_features],
                scale: vec![1.0; n_features],
            };
        }

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
        let std = x.std_axis(Axis(0), 0.0);
        let scale = std.mapv(|s| if s < f64::EPSILON { 1.0 } else { s });

        Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        }
    }

    pub fn from_parts(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        Array1::from_iter(
            x.iter()
                .zip(self.mean.iter().zip(&self.scale))
                .map(|(v, (m, s))| (v - m) / s),
        )
    }

    pub fn transform_batch(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        out
    }
}
