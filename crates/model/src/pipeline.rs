//! The fitted inference pipeline: a standard scaler followed by a logistic
//! regression, both read from the model artifact. Evaluation only; the
//! coefficients are treated as opaque fitted parameters.

use crate::errors::{ModelError, Result};
use crate::frame::FeatureFrame;
use serde::{Deserialize, Serialize};

/// Per-column standardization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (mean, scale))| {
                // A zero scale would mean a constant training column; pass
                // the centered value through unscaled rather than divide by it.
                if *scale == 0.0 {
                    v - mean
                } else {
                    (v - mean) / scale
                }
            })
            .collect()
    }
}

/// Scaler + logistic regression, plus the decision threshold the class
/// decision is taken at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub scaler: StandardScaler,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub decision_threshold: f64,
}

impl Pipeline {
    /// Check internal consistency against the expected feature count.
    pub fn validate(&self, feature_count: usize) -> Result<()> {
        if self.coefficients.len() != feature_count {
            return Err(ModelError::Artifact(format!(
                "model has {} coefficients, expected {feature_count}",
                self.coefficients.len()
            )));
        }
        if self.scaler.mean.len() != feature_count || self.scaler.scale.len() != feature_count {
            return Err(ModelError::Artifact(format!(
                "scaler has {}/{} parameters, expected {feature_count}",
                self.scaler.mean.len(),
                self.scaler.scale.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(ModelError::Artifact(format!(
                "decision threshold {} outside [0, 1]",
                self.decision_threshold
            )));
        }
        Ok(())
    }

    /// Probability of the positive class for a single observation.
    pub fn predict_proba(&self, frame: &FeatureFrame) -> f64 {
        let scaled = self.scaler.transform(frame.values());
        let z: f64 = self
            .coefficients
            .iter()
            .zip(scaled.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        sigmoid(z)
    }

    /// Boolean class decision, consistent with `predict_proba` by
    /// construction.
    pub fn predict(&self, frame: &FeatureFrame) -> bool {
        self.predict_proba(frame) >= self.decision_threshold
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
