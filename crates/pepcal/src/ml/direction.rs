//! Scoring directions: anything that maps a feature vector to a score

use super::matrix::Matrix;
use super::qvalue;
use crate::Error;
use rayon::prelude::*;
use serde::Serialize;

pub trait Direction: Send + Sync {
    fn score(&self, features: &[f64]) -> f64;

    /// The same ranking as a linear model over `features` features plus a bias
    fn weights(&self, features: usize) -> WeightVector;
}

/// Score every row of `features`
pub fn scores(direction: &dyn Direction, features: &Matrix) -> Vec<f64> {
    (0..features.rows)
        .into_par_iter()
        .map(|row| direction.score(features.row(row)))
        .collect()
}

/// Linear model. When it holds one more weight than there are features, the
/// final weight is the bias term
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeightVector {
    pub weights: Vec<f64>,
}

impl WeightVector {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    /// All-zero model over `features` features plus a bias
    pub fn zeros(features: usize) -> Self {
        Self::new(vec![0.0; features + 1])
    }
}

impl Direction for WeightVector {
    fn score(&self, features: &[f64]) -> f64 {
        let linear = features
            .iter()
            .zip(&self.weights)
            .fold(0.0, |acc, (x, w)| acc + x * w);
        match self.weights.get(features.len()) {
            Some(bias) => linear + bias,
            None => linear,
        }
    }

    fn weights(&self, features: usize) -> WeightVector {
        let mut weights = self.weights.clone();
        weights.resize(features + 1, 0.0);
        WeightVector::new(weights)
    }
}

/// Score by a single feature, optionally negated
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DefaultFeature {
    pub index: usize,
    pub negate: bool,
}

impl DefaultFeature {
    /// Parse `name` or `-name` against the feature names of the run
    pub fn parse(feature: &str, names: &[String]) -> Result<Self, Error> {
        let (negate, name) = match feature.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, feature),
        };
        names
            .iter()
            .position(|n| n == name)
            .map(|index| DefaultFeature { index, negate })
            .ok_or_else(|| Error::Config(format!("unknown default direction feature `{}`", name)))
    }

    /// The feature (and sign) that ranks the most targets at or below `fdr`.
    /// Ties go to the earlier feature, then the positive sign
    pub fn best(features: &Matrix, decoys: &[bool], fdr: f64) -> Option<(Self, usize)> {
        let targets = decoys.iter().filter(|&&d| !d).count();
        let pi0 = qvalue::pi0(targets, decoys.len() - targets);

        (0..features.cols)
            .flat_map(|index| [false, true].map(|negate| DefaultFeature { index, negate }))
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|direction| {
                let q = qvalue::q_values(&scores(&direction, features), decoys, pi0);
                (direction, qvalue::passing(&q, decoys, fdr))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .fold(None, |best: Option<(Self, usize)>, (direction, passing)| match best {
                Some((_, most)) if most >= passing => best,
                _ => Some((direction, passing)),
            })
    }
}

impl Direction for DefaultFeature {
    fn score(&self, features: &[f64]) -> f64 {
        let x = features.get(self.index).copied().unwrap_or_default();
        match self.negate {
            true => -x,
            false => x,
        }
    }

    fn weights(&self, features: usize) -> WeightVector {
        let mut w = WeightVector::zeros(features);
        if let Some(weight) = w.weights.get_mut(self.index) {
            *weight = if self.negate { -1.0 } else { 1.0 };
        }
        w
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn weight_vector_bias() {
        let w = WeightVector::new(vec![1.0, -2.0, 0.5]);
        assert_eq!(w.score(&[3.0, 1.0]), 1.5);
        let w = WeightVector::new(vec![1.0, -2.0]);
        assert_eq!(w.score(&[3.0, 1.0]), 1.0);
        assert_eq!(WeightVector::zeros(2).score(&[3.0, 1.0]), 0.0);
    }

    #[test]
    fn as_weight_vector() {
        let w = WeightVector::new(vec![1.0, -2.0]);
        assert_eq!(w.weights(2).weights, vec![1.0, -2.0, 0.0]);
        let feature = DefaultFeature {
            index: 1,
            negate: true,
        };
        assert_eq!(feature.weights(2).weights, vec![0.0, -1.0, 0.0]);
        assert_eq!(feature.weights(2).score(&[3.0, 4.0]), feature.score(&[3.0, 4.0]));
    }

    #[test]
    fn parse_default_feature() {
        let names = vec!["lnrSp".to_string(), "deltCn".to_string()];
        assert_eq!(
            DefaultFeature::parse("-deltCn", &names).unwrap(),
            DefaultFeature {
                index: 1,
                negate: true
            }
        );
        assert_eq!(DefaultFeature::parse("lnrSp", &names).unwrap().index, 0);
        assert!(DefaultFeature::parse("xcorr", &names).is_err());
    }

    #[test]
    fn best_feature() {
        // Feature 0 is noise, feature 1 separates when negated
        let features = Matrix::new(
            vec![
                0.0, -5.0, //
                1.0, -4.0, //
                0.0, -3.0, //
                1.0, 3.0, //
                0.0, 4.0, //
                1.0, 5.0,
            ],
            6,
            2,
        );
        let decoys = [false, false, false, true, true, true];
        let (best, passing) = DefaultFeature::best(&features, &decoys, 0.01).unwrap();
        assert_eq!(
            best,
            DefaultFeature {
                index: 1,
                negate: true
            }
        );
        assert_eq!(passing, 3);
        assert_eq!(scores(&best, &features)[0], 5.0);
    }
}
