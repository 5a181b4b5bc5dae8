//! Small feed-forward network: ReLU hidden layers, softmax output,
//! cross-entropy loss with L2 penalty, Adam on shuffled mini-batches.

use super::Estimator;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub hidden_layers: Vec<usize>,
    /// Maximum epochs
    pub max_iter: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// L2 penalty
    pub alpha: f64,
    /// Minimum loss improvement that resets the patience counter
    pub tol: f64,
    /// Epochs without improvement before stopping
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32],
            max_iter: 1000,
            learning_rate: 1e-3,
            batch_size: 200,
            alpha: 1e-4,
            tol: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Dense {
    /// (inputs x outputs)
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Adam moment estimates for one layer
struct Moments {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl Moments {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            m_w: Array2::zeros(layer.weights.raw_dim()),
            v_w: Array2::zeros(layer.weights.raw_dim()),
            m_b: Array1::zeros(layer.bias.len()),
            v_b: Array1::zeros(layer.bias.len()),
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetwork {
    params: NetworkParams,
    layers: Vec<Dense>,
    /// Epochs run by the last fit
    epochs: usize,
}

impl NeuralNetwork {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            layers: Vec::new(),
            epochs: 0,
        }
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Glorot-uniform initialization
    fn init_layers(&mut self, n_inputs: usize, n_outputs: usize, rng: &mut StdRng) {
        let mut sizes = vec![n_inputs];
        sizes.extend(self.params.hidden_layers.iter().copied().filter(|&s| s > 0));
        sizes.push(n_outputs);

        self.layers = sizes
            .windows(2)
            .map(|w| {
                let (fan_in, fan_out) = (w[0], w[1]);
                let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                Dense {
                    weights: Array2::from_shape_fn((fan_in, fan_out), |_| {
                        rng.gen_range(-bound..bound)
                    }),
                    bias: Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound)),
                }
            })
            .collect();
    }

    /// Activations of every layer, input first, softmax output last
    fn forward(&self, x: Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(x);
        for (l, layer) in self.layers.iter().enumerate() {
            let z = activations[l].dot(&layer.weights) + &layer.bias;
            let a = if l + 1 == self.layers.len() {
                softmax_rows(z)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    /// One Adam step on a mini-batch; returns the batch loss
    fn train_batch(
        &mut self,
        x: Array2<f64>,
        onehot: &Array2<f64>,
        moments: &mut [Moments],
        step: i32,
        n_samples: usize,
    ) -> f64 {
        let batch = x.nrows() as f64;
        let activations = self.forward(x);
        let output = &activations[activations.len() - 1];

        let ce = -(onehot * &output.mapv(|p| p.max(1e-12).ln())).sum() / batch;
        let l2: f64 = self
            .layers
            .iter()
            .map(|layer| layer.weights.iter().map(|w| w * w).sum::<f64>())
            .sum();
        let loss = ce + 0.5 * self.params.alpha * l2 / n_samples as f64;

        let lr = self.params.learning_rate * (1.0 - BETA2.powi(step)).sqrt() / (1.0 - BETA1.powi(step));

        let mut delta = (output - onehot) / batch;
        for l in (0..self.layers.len()).rev() {
            let grad_w = activations[l].t().dot(&delta)
                + &(&self.layers[l].weights * (self.params.alpha / n_samples as f64));
            let grad_b = delta.sum_axis(Axis(0));

            if l > 0 {
                let mask = activations[l].mapv(|a| if a > 0.0 { 1.0 } else { 0.0 });
                delta = delta.dot(&self.layers[l].weights.t()) * &mask;
            }

            let m = &mut moments[l];
            m.m_w = &m.m_w * BETA1 + &grad_w * (1.0 - BETA1);
            m.v_w = &m.v_w * BETA2 + &grad_w.mapv(|g| g * g) * (1.0 - BETA2);
            m.m_b = &m.m_b * BETA1 + &grad_b * (1.0 - BETA1);
            m.v_b = &m.v_b * BETA2 + &grad_b.mapv(|g| g * g) * (1.0 - BETA2);

            let layer = &mut self.layers[l];
            layer.weights -= &(&m.m_w / &m.v_w.mapv(|v| v.sqrt() + ADAM_EPS) * lr);
            layer.bias -= &(&m.m_b / &m.v_b.mapv(|v| v.sqrt() + ADAM_EPS) * lr);
        }

        loss
    }
}

fn softmax_rows(mut z: Array2<f64>) -> Array2<f64> {
    for mut row in z.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    z
}

impl Estimator for NeuralNetwork {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) {
        let _span = tracing::debug_span!("network_fit").entered();

        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        self.init_layers(x.ncols(), n_classes, &mut rng);

        let mut onehot = Array2::<f64>::zeros((n, n_classes));
        for (i, &c) in y.iter().enumerate() {
            onehot[[i, c]] = 1.0;
        }

        let mut moments: Vec<Moments> = self.layers.iter().map(Moments::zeros_like).collect();
        let batch_size = self.params.batch_size.clamp(1, n.max(1));
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut step = 0;

        self.epochs = 0;
        for epoch in 0..self.params.max_iter {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch_size) {
                step += 1;
                let xb = x.select(Axis(0), chunk);
                let yb = onehot.select(Axis(0), chunk);
                let loss = self.train_batch(xb, &yb, &mut moments, step, n);
                epoch_loss += loss * chunk.len() as f64;
            }
            epoch_loss /= n as f64;
            self.epochs = epoch + 1;

            if epoch_loss > best_loss - self.params.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);

            if no_improvement > self.params.n_iter_no_change {
                tracing::debug!("Loss plateaued at epoch {} ({:.5})", epoch + 1, epoch_loss);
                break;
            }
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        let (Some(first), Some(last)) = (self.layers.first(), self.layers.last()) else {
            return Err("network has no layers".to_string());
        };
        if first.weights.nrows() != n_features {
            return Err(format!(
                "network takes {} inputs, expected {}",
                first.weights.nrows(),
                n_features
            ));
        }
        if last.weights.ncols() != n_classes {
            return Err(format!(
                "network has {} outputs, expected {}",
                last.weights.ncols(),
                n_classes
            ));
        }
        for (l, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.weights.ncols() {
                return Err(format!("layer {} bias does not match its weights", l));
            }
        }
        for (l, pair) in self.layers.windows(2).enumerate() {
            if pair[0].weights.ncols() != pair[1].weights.nrows() {
                return Err(format!("layer {} output does not feed layer {}", l, l + 1));
            }
        }
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        if self.layers.is_empty() {
            return Array1::zeros(0);
        }
        let input = x.to_owned().insert_axis(Axis(0));
        let activations = self.forward(input);
        activations[activations.len() - 1].row(0).to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_params() -> NetworkParams {
        NetworkParams {
            hidden_layers: vec![8],
            max_iter: 300,
            learning_rate: 0.05,
            ..NetworkParams::default()
        }
    }

    #[test]
    fn test_separates_blobs() {
        let x = array![
            [-1.0, -1.0],
            [-1.2, -0.8],
            [-0.9, -1.1],
            [1.0, 1.0],
            [1.1, 0.9],
            [0.8, 1.2],
            [1.0, -1.0],
            [1.2, -0.9],
            [0.9, -1.2]
        ];
        let y = [0, 0, 0, 1, 1, 1, 2, 2, 2];
        let mut net = NeuralNetwork::new(small_params());
        net.fit(x.view(), &y, 3);
        assert!(net.epochs() > 0);

        for (row, &label) in x.rows().into_iter().zip(&y) {
            let p = net.predict_proba(row);
            assert!((p.sum() - 1.0).abs() < 1e-9);
            let best = p
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            assert_eq!(best, Some(label), "proba {:?}", p);
        }
    }

    #[test]
    fn test_validate_checks_layer_chain() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.1, 0.9], [0.9, 0.1]];
        let y = [0, 1, 0, 1];
        let mut net = NeuralNetwork::new(NetworkParams {
            max_iter: 5,
            ..small_params()
        });
        assert!(net.validate(2, 2).is_err());
        net.fit(x.view(), &y, 2);
        net.validate(2, 2).unwrap();
        assert!(net.validate(3, 2).is_err());
        assert!(net.validate(2, 3).is_err());

        let mut broken = net.clone();
        broken.layers[1].weights = Array2::zeros((5, 2));
        assert!(broken.validate(2, 2).is_err());
    }

    #[test]
    fn test_softmax_rows() {
        let out = softmax_rows(array![[0.0, 0.0], [1000.0, 0.0]]);
        assert!((out[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((out[[1, 0]] - 1.0).abs() < 1e-12);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.1, 0.9], [0.9, 0.1]];
        let y = [0, 1, 0, 1];
        let params = NetworkParams {
            max_iter: 20,
            ..small_params()
        };
        let mut a = NeuralNetwork::new(params.clone());
        let mut b = NeuralNetwork::new(params);
        a.fit(x.view(), &y, 2);
        b.fit(x.view(), &y, 2);
        assert_eq!(a, b);
    }
}
