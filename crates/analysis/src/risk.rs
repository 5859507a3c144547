//! Failure risk estimate for a pull request from its size.
//!
//! A two-feature logistic regression (`lines_added`, `files_changed`) fitted at startup on a
//! small fixed training set. It is a heuristic, not a trained production model.

use serde::{Deserialize, Serialize};

const ITERATIONS: usize = 5_000;
const LEARNING_RATE: f64 = 0.1;
const L2_PENALTY: f64 = 0.01;

/// `([lines_added, files_changed], failed)`
const TRAINING_SET: [([f64; 2], f64); 6] = [
    ([10.0, 2.0], 0.0),
    ([100.0, 5.0], 0.0),
    ([500.0, 20.0], 1.0),
    ([20.0, 3.0], 0.0),
    ([800.0, 25.0], 1.0),
    ([1500.0, 40.0], 1.0),
];

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RiskFeatures {
    #[serde(default)]
    pub lines_added: f64,
    #[serde(default)]
    pub files_changed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RiskPrediction {
    pub risk_score: f64,
}

#[derive(Debug, Clone)]
pub struct RiskModel {
    mean: [f64; 2],
    scale: [f64; 2],
    weights: [f64; 2],
    bias: f64,
}

impl Default for RiskModel {
    fn default() -> Self { Self::train(&TRAINING_SET) }
}

impl RiskModel {
    /// Fit by batch gradient descent on standardized features.
    pub fn train(samples: &[([f64; 2], f64)]) -> Self {
        let n = samples.len().max(1) as f64;
        let mut mean = [0.0; 2];
        let mut scale = [1.0; 2];
        for i in 0..2 {
            mean[i] = samples.iter().map(|(x, _)| x[i]).sum::<f64>() / n;
            let variance = samples.iter().map(|(x, _)| (x[i] - mean[i]).powi(2)).sum::<f64>() / n;
            if variance > 0.0 {
                scale[i] = variance.sqrt();
            }
        }
        let mut model = Self { mean, scale, weights: [0.0; 2], bias: 0.0 };
        for _ in 0..ITERATIONS {
            let mut grad_w = [0.0; 2];
            let mut grad_b = 0.0;
            for (x, y) in samples {
                let z = model.standardize(*x);
                let error = model.probability(z) - y;
                for i in 0..2 {
                    grad_w[i] += error * z[i];
                }
                grad_b += error;
            }
            for i in 0..2 {
                model.weights[i] -=
                    LEARNING_RATE * (grad_w[i] / n + L2_PENALTY * model.weights[i]);
            }
            model.bias -= LEARNING_RATE * grad_b / n;
        }
        model
    }

    fn standardize(&self, x: [f64; 2]) -> [f64; 2] {
        [(x[0] - self.mean[0]) / self.scale[0], (x[1] - self.mean[1]) / self.scale[1]]
    }

    fn probability(&self, z: [f64; 2]) -> f64 {
        let logit = self.bias + self.weights[0] * z[0] + self.weights[1] * z[1];
        1.0 / (1.0 + (-logit).exp())
    }

    /// Probability of failure in `[0, 1]`, rounded to four decimals.
    pub fn predict(&self, features: RiskFeatures) -> RiskPrediction {
        let p = self.probability(self.standardize([features.lines_added, features.files_changed]));
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        RiskPrediction { risk_score: (p * 10_000.0).round() / 10_000.0 }
    }
}
