//! Multi-layer perceptron: ReLU hidden layers, softmax output, minibatch SGD
//! with momentum and L2 penalty.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, argmax_rows, check_width, softmax_rows};

const MOMENTUM: f64 = 0.9;
/// Early stopping needs at least this many rows to carve out a validation set.
const MIN_ROWS_FOR_VALIDATION: usize = 10;
const MIN_ADAPTIVE_RATE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningRate {
    Constant,
    /// Divide the rate by 5 every time the score stalls.
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MlpParams {
    pub hidden_layer_sizes: Vec<usize>,
    /// L2 penalty.
    pub alpha: f64,
    pub batch_size: usize,
    pub learning_rate: LearningRate,
    pub learning_rate_init: f64,
    pub max_iter: usize,
    pub random_state: u64,
    pub early_stopping: bool,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub tol: f64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![128, 64],
            alpha: 0.005,
            batch_size: 128,
            learning_rate: LearningRate::Adaptive,
            learning_rate_init: 0.005,
            max_iter: 200,
            random_state: 6240,
            early_stopping: true,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            tol: 1e-4,
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Network {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
}

impl Network {
    /// Glorot-uniform initialisation for every layer.
    fn init(sizes: &[usize], rng: &mut StdRng) -> Self {
        let mut weights = Vec::with_capacity(sizes.len() - 1);
        let mut biases = Vec::with_capacity(sizes.len() - 1);
        for pair in sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push(Array2::from_shape_fn((fan_in, fan_out), |_| {
                rng.gen_range(-limit..limit)
            }));
            biases.push(Array1::from_shape_fn(fan_out, |_| rng.gen_range(-limit..limit)));
        }
        Self { weights, biases }
    }

    fn n_layers(&self) -> usize {
        self.weights.len()
    }

    /// Activations of every layer; index 0 is the input, the last one the
    /// class probabilities.
    fn forward(&self, x: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let last = self.n_layers() - 1;
        let mut activations = vec![x.to_owned()];
        for (l, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[l].dot(w) + b;
            let a = if l == last {
                softmax_rows(z)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    fn backward(
        &self,
        activations: &[Array2<f64>],
        targets: &Array2<f64>,
        alpha: f64,
    ) -> (Vec<Array2<f64>>, Vec<Array1<f64>>) {
        let n = targets.nrows() as f64;
        let layers = self.n_layers();
        let mut grad_w = Vec::with_capacity(layers);
        let mut grad_b = Vec::with_capacity(layers);

        let mut delta = (&activations[layers] - targets) / n;
        for l in (0..layers).rev() {
            grad_w.push(activations[l].t().dot(&delta) + &self.weights[l] * (alpha / n));
            grad_b.push(delta.sum_axis(Axis(0)));
            if l > 0 {
                let mut next = delta.dot(&self.weights[l].t());
                next.zip_mut_with(&activations[l], |d, a| {
                    if *a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = next;
            }
        }
        grad_w.reverse();
        grad_b.reverse();
        (grad_w, grad_b)
    }

    fn squared_weights(&self) -> f64 {
        self.weights.iter().map(|w| w.mapv(|v| v * v).sum()).sum()
    }
}

fn one_hot(classes: impl Iterator<Item = usize>, n_classes: usize) -> Array2<f64> {
    let classes: Vec<usize> = classes.collect();
    let mut encoded = Array2::zeros((classes.len(), n_classes));
    for (row, class) in classes.into_iter().enumerate() {
        encoded[[row, class]] = 1.0;
    }
    encoded
}

fn cross_entropy(proba: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    let total: f64 = proba
        .iter()
        .zip(targets)
        .filter(|(_, t)| **t > 0.0)
        .map(|(p, t)| -t * p.max(1e-12).ln())
        .sum();
    total / proba.nrows().max(1) as f64
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpState {
    network: Network,
    n_features: usize,
    epochs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpClassifier {
    params: MlpParams,
    state: Option<MlpState>,
}

impl MlpClassifier {
    pub fn new(params: MlpParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &MlpParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Epochs run by the last fit.
    #[cfg(test)]
    pub fn epochs(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.epochs)
    }
}

impl Classifier for MlpClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        let p = &self.params;
        if p.hidden_layer_sizes.contains(&0) || p.batch_size == 0 || p.learning_rate_init <= 0.0 {
            return Err(ClassifierError::InvalidInput(format!(
                "invalid perceptron configuration {:?}",
                p
            )));
        }

        let mut rng = StdRng::seed_from_u64(p.random_state);
        let mut sizes = vec![x.ncols()];
        sizes.extend(&p.hidden_layer_sizes);
        sizes.push(n_classes);
        let mut network = Network::init(&sizes, &mut rng);
        let layers = network.n_layers();

        let n = x.nrows();
        let early = p.early_stopping && n >= MIN_ROWS_FOR_VALIDATION;
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let n_val = if early {
            ((n as f64 * p.validation_fraction).ceil() as usize).clamp(1, n - 1)
        } else {
            0
        };
        let (val_rows, train_rows) = order.split_at(n_val);
        let mut train_rows = train_rows.to_vec();
        let x_val = x.select(Axis(0), val_rows);
        let y_val: Vec<usize> = val_rows.iter().map(|&i| y[i]).collect();

        let mut vel_w: Vec<Array2<f64>> = network.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        let mut vel_b: Vec<Array1<f64>> = network.biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect();
        let batch = p.batch_size.clamp(1, train_rows.len());

        let mut rate = p.learning_rate_init;
        let mut best = f64::NEG_INFINITY;
        let mut best_network = network.clone();
        let mut stall = 0;
        let mut epochs = 0;

        for epoch in 0..p.max_iter {
            epochs = epoch + 1;
            train_rows.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in train_rows.chunks(batch) {
                let xb = x.select(Axis(0), chunk);
                let yb = one_hot(chunk.iter().map(|&i| y[i]), n_classes);
                let activations = network.forward(xb.view());
                epoch_loss += cross_entropy(&activations[layers], &yb) * chunk.len() as f64;

                let (grad_w, grad_b) = network.backward(&activations, &yb, p.alpha);
                for l in 0..layers {
                    vel_w[l] = &vel_w[l] * MOMENTUM - &grad_w[l] * rate;
                    vel_b[l] = &vel_b[l] * MOMENTUM - &grad_b[l] * rate;
                    network.weights[l] += &vel_w[l];
                    network.biases[l] += &vel_b[l];
                }
            }
            let n_train = train_rows.len() as f64;
            epoch_loss = epoch_loss / n_train + 0.5 * p.alpha * network.squared_weights() / n_train;

            let score = if early {
                let predicted = argmax_rows(&network.forward(x_val.view())[layers]);
                let hits = predicted.iter().zip(&y_val).filter(|(a, b)| a == b).count();
                hits as f64 / y_val.len() as f64
            } else {
                -epoch_loss
            };

            if score > best + p.tol {
                best = score;
                stall = 0;
                if early {
                    best_network = network.clone();
                }
            } else {
                stall += 1;
            }

            if stall > p.n_iter_no_change {
                if p.learning_rate == LearningRate::Adaptive && rate > MIN_ADAPTIVE_RATE {
                    rate /= 5.0;
                    stall = 0;
                    log::debug!("perceptron learning rate lowered to {rate}");
                } else {
                    break;
                }
            }
        }
        log::debug!("perceptron stopped after {epochs} epochs");

        if early {
            network = best_network;
        }
        self.state = Some(MlpState {
            network,
            n_features: x.ncols(),
            epochs,
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("multi-layer perceptron"))?;
        check_width(state.n_features, x)?;
        let mut activations = state.network.forward(x);
        Ok(activations.pop().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_net() -> MlpParams {
        MlpParams {
            hidden_layer_sizes: vec![8],
            batch_size: 4,
            learning_rate_init: 0.05,
            early_stopping: false,
            ..MlpParams::default()
        }
    }

    fn clusters() -> (Array2<f64>, Array1<usize>) {
        (
            array![
                [0.0, 0.1],
                [0.1, 0.0],
                [0.2, 0.1],
                [0.1, 0.2],
                [1.0, 0.9],
                [0.9, 1.0],
                [1.1, 0.8],
                [0.8, 1.1]
            ],
            array![0, 0, 0, 0, 1, 1, 1, 1],
        )
    }

    #[test]
    fn learns_separable_clusters() {
        let (x, y) = clusters();
        let mut mlp = MlpClassifier::new(small_net());
        mlp.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(mlp.predict(x.view()).unwrap(), y);
        let proba = mlp.predict_proba(x.view()).unwrap();
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn seeded_training_is_reproducible() {
        let (x, y) = clusters();
        let mut a = MlpClassifier::new(small_net());
        let mut b = MlpClassifier::new(small_net());
        a.fit(x.view(), y.view(), 2).unwrap();
        b.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(a.epochs(), b.epochs());
        assert_eq!(
            a.predict_proba(x.view()).unwrap(),
            b.predict_proba(x.view()).unwrap()
        );
    }

    #[test]
    fn zero_width_layer_is_rejected() {
        let (x, y) = clusters();
        let mut mlp = MlpClassifier::new(MlpParams {
            hidden_layer_sizes: vec![4, 0],
            ..small_net()
        });
        assert!(matches!(
            mlp.fit(x.view(), y.view(), 2),
            Err(ClassifierError::InvalidInput(_))
        ));
    }
}
