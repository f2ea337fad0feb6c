//! Policy network: observation in, one score per action out.
//!
//! Architecture: `Linear(obs → h) → ReLU → Dropout → Linear(h → h) → ReLU →
//! Dropout → Linear(h → 5)`. Dropout only runs in [`Policy::forward_train`]
//! and Q-learning updates; genome evaluation always uses the deterministic
//! [`Policy::forward`].
//!
//! [`Policy::fit_q_targets`] takes one Adam step on the mean squared error
//! between chosen-action scores and their targets.
//!
//! Parameters are exported under six keys (`fc1.weight`, `fc1.bias`, …,
//! `fc3.bias`) with weights stored `[out][in]`. Export followed by import
//! reproduces the network bit for bit.

use crate::genome::{mutate_slice, WeightArray, WeightMap};
use commons_core::config::WorldConfig;
use commons_core::types::{Action, ACTION_COUNT};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hidden layer width used unless configured otherwise.
pub const DEFAULT_HIDDEN_SIZE: usize = 128;

/// Dropout probability applied after each hidden layer during training.
pub const DROPOUT: f32 = 0.2;

const LAYERS: [&str; 3] = ["fc1", "fc2", "fc3"];

/// Errors from importing a parameter set into a policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("missing parameter {0:?}")]
    MissingKey(String),

    #[error("unexpected parameter {0:?}")]
    UnexpectedKey(String),

    #[error("parameter {key:?} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// Fully connected layer with row-major `[out][in]` weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Linear {
    in_features: usize,
    out_features: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Linear {
    /// Uniform initialisation in `[-1/√fan_in, 1/√fan_in]` for weights and biases.
    fn random<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let mut sample = || rng.random_range(-bound..=bound);
        let weight = (0..in_features * out_features).map(|_| sample()).collect();
        let bias = (0..out_features).map(|_| sample()).collect();
        Self {
            in_features,
            out_features,
            weight,
            bias,
        }
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weight
            .chunks_exact(self.in_features)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect()
    }

    fn zeros_like(&self) -> Self {
        Self {
            in_features: self.in_features,
            out_features: self.out_features,
            weight: vec![0.0; self.weight.len()],
            bias: vec![0.0; self.bias.len()],
        }
    }

    /// Accumulate parameter gradients into `grad` for one input and return
    /// the gradient with respect to that input.
    fn backward(&self, input: &[f32], grad_out: &[f32], grad: &mut Linear) -> Vec<f32> {
        let mut grad_in = vec![0.0; self.in_features];
        for (o, &g) in grad_out.iter().enumerate() {
            if g == 0.0 {
                continue;
            }
            grad.bias[o] += g;
            let row = o * self.in_features;
            let weights = &self.weight[row..row + self.in_features];
            let grads = &mut grad.weight[row..row + self.in_features];
            for ((gw, w), (gi, x)) in grads.iter_mut().zip(weights).zip(grad_in.iter_mut().zip(input)) {
                *gw += g * x;
                *gi += g * w;
            }
        }
        grad_in
    }

    fn export(&self, name: &str, out: &mut WeightMap) {
        let rows = self
            .weight
            .chunks_exact(self.in_features)
            .map(|r| r.to_vec())
            .collect();
        out.insert(format!("{name}.weight"), WeightArray::Matrix(rows));
        out.insert(format!("{name}.bias"), WeightArray::Vector(self.bias.clone()));
    }

    fn import(&mut self, name: &str, weights: &WeightMap) -> Result<(), PolicyError> {
        let weight_key = format!("{name}.weight");
        let bias_key = format!("{name}.bias");

        let expected = vec![self.out_features, self.in_features];
        match weights.get(&weight_key) {
            Some(WeightArray::Matrix(rows))
                if rows.len() == self.out_features
                    && rows.iter().all(|r| r.len() == self.in_features) =>
            {
                for (dst, src) in self.weight.chunks_exact_mut(self.in_features).zip(rows) {
                    dst.copy_from_slice(src);
                }
            }
            Some(other) => {
                return Err(PolicyError::ShapeMismatch {
                    key: weight_key,
                    expected,
                    found: other.shape(),
                })
            }
            None => return Err(PolicyError::MissingKey(weight_key)),
        }

        match weights.get(&bias_key) {
            Some(WeightArray::Vector(b)) if b.len() == self.out_features => {
                self.bias.copy_from_slice(b);
            }
            Some(other) => {
                return Err(PolicyError::ShapeMismatch {
                    key: bias_key,
                    expected: vec![self.out_features],
                    found: other.shape(),
                })
            }
            None => return Err(PolicyError::MissingKey(bias_key)),
        }
        Ok(())
    }
}

/// Feed-forward decision policy shared by every agent it is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

impl Policy {
    /// Randomly initialised policy.
    pub fn random<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        Self {
            fc1: Linear::random(input_size, hidden_size, rng),
            fc2: Linear::random(hidden_size, hidden_size, rng),
            fc3: Linear::random(hidden_size, ACTION_COUNT, rng),
        }
    }

    /// Randomly initialised policy sized for a world's observations.
    pub fn for_world<R: Rng + ?Sized>(config: &WorldConfig, hidden_size: usize, rng: &mut R) -> Self {
        Self::random(config.observation_size(), hidden_size, rng)
    }

    /// Build a policy from a genome, inferring the layer sizes from
    /// `fc1.weight`.
    pub fn from_weights(weights: &WeightMap) -> Result<Self, PolicyError> {
        let key = "fc1.weight";
        let (hidden_size, input_size) = match weights.get(key) {
            Some(WeightArray::Matrix(rows)) if !rows.is_empty() && !rows[0].is_empty() => {
                (rows.len(), rows[0].len())
            }
            Some(other) => {
                return Err(PolicyError::ShapeMismatch {
                    key: key.to_string(),
                    expected: vec![DEFAULT_HIDDEN_SIZE, WorldConfig::default().observation_size()],
                    found: other.shape(),
                })
            }
            None => return Err(PolicyError::MissingKey(key.to_string())),
        };

        let mut policy = Self::zeroed(input_size, hidden_size);
        policy.import_weights(weights)?;
        Ok(policy)
    }

    /// Policy with every parameter zero. Scores all actions equally, so
    /// arg-max picks [`Action::Up`].
    pub fn zeroed(input_size: usize, hidden_size: usize) -> Self {
        let layer = |i: usize, o: usize| Linear {
            in_features: i,
            out_features: o,
            weight: vec![0.0; i * o],
            bias: vec![0.0; o],
        };
        Self {
            fc1: layer(input_size, hidden_size),
            fc2: layer(hidden_size, hidden_size),
            fc3: layer(hidden_size, ACTION_COUNT),
        }
    }

    pub fn input_size(&self) -> usize {
        self.fc1.in_features
    }

    pub fn hidden_size(&self) -> usize {
        self.fc1.out_features
    }

    pub fn parameter_count(&self) -> usize {
        self.layers()
            .iter()
            .map(|l| l.weight.len() + l.bias.len())
            .sum()
    }

    /// Deterministic forward pass (dropout disabled).
    pub fn forward(&self, observation: &[f32]) -> [f32; ACTION_COUNT] {
        debug_assert_eq!(observation.len(), self.input_size());
        let h1 = relu(self.fc1.forward(observation));
        let h2 = relu(self.fc2.forward(&h1));
        to_scores(self.fc3.forward(&h2))
    }

    /// Forward pass with inverted dropout after each hidden layer.
    pub fn forward_train<R: Rng + ?Sized>(&self, observation: &[f32], rng: &mut R) -> [f32; ACTION_COUNT] {
        self.trace(observation, DROPOUT, rng).scores
    }

    /// One optimiser step towards the given Q targets. Returns the mean
    /// squared error of the training pass.
    ///
    /// `optimizer` must have been created for this policy's shape.
    pub fn fit_q_targets<R: Rng + ?Sized>(
        &mut self,
        batch: &[QTarget<'_>],
        optimizer: &mut Adam,
        rng: &mut R,
    ) -> f32 {
        if batch.is_empty() {
            return 0.0;
        }
        let (grad, loss) = self.gradients(batch, DROPOUT, rng);
        optimizer.apply(self, &grad);
        loss
    }

    /// Arg-max action; ties resolve to the lowest index.
    pub fn greedy_action(&self, observation: &[f32]) -> Action {
        let scores = self.forward(observation);
        let mut best = 0;
        for (i, s) in scores.iter().enumerate() {
            if *s > scores[best] {
                best = i;
            }
        }
        Action::from_index(best).unwrap_or(Action::Interact)
    }

    /// ε-greedy action selection. Genome evaluation passes `epsilon = 0.0`.
    pub fn predict_action<R: Rng + ?Sized>(&self, observation: &[f32], epsilon: f64, rng: &mut R) -> Action {
        if epsilon > 0.0 && rng.random::<f64>() < epsilon {
            return Action::random(rng);
        }
        self.greedy_action(observation)
    }

    /// Export every parameter under its structural key.
    pub fn export_weights(&self) -> WeightMap {
        let mut out = WeightMap::new();
        for (name, layer) in LAYERS.iter().zip([&self.fc1, &self.fc2, &self.fc3]) {
            layer.export(name, &mut out);
        }
        out
    }

    /// Overwrite every parameter from a genome of matching structure.
    ///
    /// Nothing is modified unless the whole genome validates.
    pub fn import_weights(&mut self, weights: &WeightMap) -> Result<(), PolicyError> {
        if let Some(extra) = weights.keys().find(|k| !is_known_key(k)) {
            return Err(PolicyError::UnexpectedKey(extra.clone()));
        }

        let mut staged = self.clone();
        staged.fc1.import("fc1", weights)?;
        staged.fc2.import("fc2", weights)?;
        staged.fc3.import("fc3", weights)?;
        *self = staged;
        Ok(())
    }

    /// Gaussian point mutation applied to every parameter scalar.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rate: f64, sigma: f64, rng: &mut R) {
        for layer in [&mut self.fc1, &mut self.fc2, &mut self.fc3] {
            mutate_slice(&mut layer.weight, rate, sigma, rng);
            mutate_slice(&mut layer.bias, rate, sigma, rng);
        }
    }
}

impl Policy {
    fn layers(&self) -> [&Linear; 3] {
        [&self.fc1, &self.fc2, &self.fc3]
    }

    fn layers_mut(&mut self) -> [&mut Linear; 3] {
        [&mut self.fc1, &mut self.fc2, &mut self.fc3]
    }

    fn zeros_like(&self) -> Self {
        Self {
            fc1: self.fc1.zeros_like(),
            fc2: self.fc2.zeros_like(),
            fc3: self.fc3.zeros_like(),
        }
    }

    fn trace<R: Rng + ?Sized>(&self, observation: &[f32], rate: f32, rng: &mut R) -> Trace {
        let a1 = relu(self.fc1.forward(observation));
        let mask1 = dropout_mask(a1.len(), rate, rng);
        let d1: Vec<f32> = a1.iter().zip(&mask1).map(|(a, m)| a * m).collect();
        let a2 = relu(self.fc2.forward(&d1));
        let mask2 = dropout_mask(a2.len(), rate, rng);
        let d2: Vec<f32> = a2.iter().zip(&mask2).map(|(a, m)| a * m).collect();
        let scores = to_scores(self.fc3.forward(&d2));
        Trace {
            a1,
            mask1,
            d1,
            a2,
            mask2,
            d2,
            scores,
        }
    }

    /// Gradient of the batch mean squared error, and the error itself.
    fn gradients<R: Rng + ?Sized>(&self, batch: &[QTarget<'_>], rate: f32, rng: &mut R) -> (Policy, f32) {
        let mut grad = self.zeros_like();
        let n = batch.len() as f32;
        let mut loss = 0.0;

        for sample in batch {
            let trace = self.trace(sample.observation, rate, rng);
            let error = trace.scores[sample.action.index()] - sample.target;
            loss += error * error / n;

            let mut g3 = [0.0; ACTION_COUNT];
            g3[sample.action.index()] = 2.0 * error / n;
            let g_d2 = self.fc3.backward(&trace.d2, &g3, &mut grad.fc3);
            let g2 = relu_backward(&g_d2, &trace.mask2, &trace.a2);
            let g_d1 = self.fc2.backward(&trace.d1, &g2, &mut grad.fc2);
            let g1 = relu_backward(&g_d1, &trace.mask1, &trace.a1);
            self.fc1.backward(sample.observation, &g1, &mut grad.fc1);
        }
        (grad, loss)
    }
}

/// Activations of one training pass, kept for the backward pass.
struct Trace {
    a1: Vec<f32>,
    mask1: Vec<f32>,
    d1: Vec<f32>,
    a2: Vec<f32>,
    mask2: Vec<f32>,
    d2: Vec<f32>,
    scores: [f32; ACTION_COUNT],
}

/// A regression target for one action score.
#[derive(Debug, Clone, Copy)]
pub struct QTarget<'a> {
    pub observation: &'a [f32],
    pub action: Action,
    pub target: f32,
}

/// Adam optimiser state shaped like the policy it updates.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    steps: i32,
    m: Policy,
    v: Policy,
}

impl Adam {
    pub fn new(policy: &Policy, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            steps: 0,
            m: policy.zeros_like(),
            v: policy.zeros_like(),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Updates applied so far.
    pub fn steps(&self) -> u64 {
        self.steps as u64
    }

    fn apply(&mut self, policy: &mut Policy, grad: &Policy) {
        self.steps = self.steps.saturating_add(1);
        let step = AdamStep {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            correction1: 1.0 - self.beta1.powi(self.steps),
            correction2: 1.0 - self.beta2.powi(self.steps),
        };

        let layers = policy.layers_mut().into_iter().zip(grad.layers());
        let moments = self.m.layers_mut().into_iter().zip(self.v.layers_mut());
        for ((param, g), (m, v)) in layers.zip(moments) {
            step.update(&mut param.weight, &g.weight, &mut m.weight, &mut v.weight);
            step.update(&mut param.bias, &g.bias, &mut m.bias, &mut v.bias);
        }
    }
}

struct AdamStep {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    correction1: f32,
    correction2: f32,
}

impl AdamStep {
    fn update(&self, params: &mut [f32], grads: &[f32], m: &mut [f32], v: &mut [f32]) {
        for ((p, g), (m, v)) in params.iter_mut().zip(grads).zip(m.iter_mut().zip(v.iter_mut())) {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / self.correction1;
            let v_hat = *v / self.correction2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

fn is_known_key(key: &str) -> bool {
    LAYERS
        .iter()
        .any(|l| key == format!("{l}.weight") || key == format!("{l}.bias"))
}

fn relu(mut v: Vec<f32>) -> Vec<f32> {
    for x in &mut v {
        *x = x.max(0.0);
    }
    v
}

/// Inverted-dropout mask: each unit is zeroed with probability `rate`,
/// survivors are scaled by `1 / (1 - rate)`.
fn dropout_mask<R: Rng + ?Sized>(len: usize, rate: f32, rng: &mut R) -> Vec<f32> {
    if rate <= 0.0 {
        return vec![1.0; len];
    }
    let keep = 1.0 - rate;
    (0..len)
        .map(|_| if rng.random::<f32>() < rate { 0.0 } else { 1.0 / keep })
        .collect()
}

/// Back through dropout and ReLU: zero where the unit was dropped or inactive.
fn relu_backward(grad: &[f32], mask: &[f32], activation: &[f32]) -> Vec<f32> {
    grad.iter()
        .zip(mask)
        .zip(activation)
        .map(|((g, m), a)| if *a > 0.0 { g * m } else { 0.0 })
        .collect()
}

fn to_scores(v: Vec<f32>) -> [f32; ACTION_COUNT] {
    let mut out = [0.0; ACTION_COUNT];
    for (o, x) in out.iter_mut().zip(v) {
        *o = x;
    }
    out
}
