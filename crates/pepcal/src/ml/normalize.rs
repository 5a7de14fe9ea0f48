//! Per-feature scaling of the feature matrix prior to training

use super::matrix::Matrix;
use super::{mean, std};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Zero mean, unit variance
    #[default]
    Standard,
    /// Scaled to [0, 1]
    Unit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Normalizer {
    pub kind: Normalization,
    shift: Vec<f64>,
    scale: Vec<f64>,
}

impl Normalizer {
    pub fn fit(features: &Matrix, kind: Normalization) -> Self {
        let (shift, scale) = (0..features.cols)
            .map(|col| {
                let values = features.col(col).collect::<Vec<_>>();
                let (shift, scale) = match kind {
                    Normalization::Standard => (mean(&values), std(&values)),
                    Normalization::Unit => {
                        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        (min, max - min)
                    }
                };
                // Constant (or empty) columns are centered but not scaled
                match (shift.is_finite(), scale.is_finite() && scale > 0.0) {
                    (true, true) => (shift, scale),
                    (true, false) => (shift, 1.0),
                    _ => (0.0, 1.0),
                }
            })
            .unzip();
        Normalizer { kind, shift, scale }
    }

    pub fn normalize(&self, features: &mut Matrix) {
        for row in 0..features.rows {
            for (x, (shift, scale)) in features
                .row_mut(row)
                .iter_mut()
                .zip(self.shift.iter().zip(&self.scale))
            {
                *x = (*x - shift) / scale;
            }
        }
    }

    /// Express a weight vector trained on normalized features (bias last) in
    /// terms of the raw features
    pub fn raw_weights(&self, weights: &[f64]) -> Vec<f64> {
        let n = self.scale.len();
        let mut raw = weights
            .iter()
            .zip(&self.scale)
            .map(|(w, scale)| w / scale)
            .collect::<Vec<_>>();
        if let Some(bias) = weights.get(n) {
            let offset = raw
                .iter()
                .zip(&self.shift)
                .fold(0.0, |acc, (w, shift)| acc + w * shift);
            raw.push(bias - offset);
        }
        raw
    }
}
