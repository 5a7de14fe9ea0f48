//! Semi-supervised, cross-validated training of a linear discriminant.
//!
//! Examples are split into stratified folds. On every iteration, each fold
//! trains an SVM on the remaining folds (decoys as negatives, targets that
//! currently pass the training FDR as positives) and re-scores its own,
//! held-out examples. The merged out-of-fold scores then define the next
//! iteration's positive set.
//!
//! Käll, 2007 [https://pubmed.ncbi.nlm.nih.gov/17952086/]

use super::direction::{self, Direction, WeightVector};
use super::matrix::Matrix;
use super::norm;
use super::qvalue;
use super::svm::{Svm, SvmParameters, TrainingSet};
use crate::Error;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Candidate positive-class penalties searched when none are configured
const CPOS_GRID: [f64; 3] = [0.1, 1.0, 10.0];
/// Negative-class penalties, as multiples of Cpos
const CNEG_FACTORS: [f64; 3] = [1.0, 3.0, 10.0];

/// Training options as read from a parameter file, all optional
#[derive(Deserialize, Serialize, Default, Clone, Debug)]
pub struct Builder {
    pub train_fdr: Option<f64>,
    pub test_fdr: Option<f64>,
    pub max_iterations: Option<usize>,
    pub folds: Option<usize>,
    pub seed: Option<u64>,
    pub cpos: Option<f64>,
    pub cneg: Option<f64>,
    pub report_each_iteration: Option<bool>,
    /// Search Cpos/Cneg on the first iteration only, then reuse each fold's
    /// selection
    pub quick_validation: Option<bool>,
    /// Keep the trained model even when it ranks worse than the initial
    /// direction
    #[serde(rename = "override")]
    pub override_check: Option<bool>,
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Penalties {
    Fixed { cpos: f64, cneg: f64 },
    GridSearch,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Parameters {
    pub train_fdr: f64,
    pub test_fdr: f64,
    pub max_iterations: usize,
    pub folds: usize,
    pub seed: u64,
    pub penalties: Penalties,
    pub report_each_iteration: bool,
    pub quick_validation: bool,
    #[serde(rename = "override")]
    pub override_check: bool,
    #[serde(skip)]
    pub svm: SvmParameters,
}

fn validate_fdr(name: &str, fdr: f64) -> Result<f64, Error> {
    match fdr > 0.0 && fdr <= 1.0 {
        true => Ok(fdr),
        false => Err(Error::Config(format!(
            "`{}` must be in (0, 1], got {}",
            name, fdr
        ))),
    }
}

fn validate_penalty(name: &str, c: f64) -> Result<f64, Error> {
    match c.is_finite() && c > 0.0 {
        true => Ok(c),
        false => Err(Error::Config(format!(
            "`{}` must be a positive number, got {}",
            name, c
        ))),
    }
}

impl Builder {
    pub fn make_parameters(self) -> Result<Parameters, Error> {
        let train_fdr = validate_fdr("train_fdr", self.train_fdr.unwrap_or(0.01))?;
        let test_fdr = validate_fdr("test_fdr", self.test_fdr.unwrap_or(0.01))?;

        let max_iterations = self.max_iterations.unwrap_or(10);
        if !(1..=1000).contains(&max_iterations) {
            return Err(Error::Config(format!(
                "`max_iterations` must be between 1 and 1000, got {}",
                max_iterations
            )));
        }
        let folds = self.folds.unwrap_or(3);
        if folds < 2 {
            return Err(Error::Config(format!(
                "at least 2 folds are required, got {}",
                folds
            )));
        }

        let penalties = match (self.cpos, self.cneg) {
            (Some(cpos), cneg) => {
                let cpos = validate_penalty("cpos", cpos)?;
                let cneg = validate_penalty("cneg", cneg.unwrap_or(cpos))?;
                Penalties::Fixed { cpos, cneg }
            }
            (None, Some(_)) => {
                log::warn!("`cneg` is set without `cpos`: ignoring it and searching both");
                Penalties::GridSearch
            }
            (None, None) => Penalties::GridSearch,
        };

        Ok(Parameters {
            train_fdr,
            test_fdr,
            max_iterations,
            folds,
            seed: self.seed.unwrap_or(1),
            penalties,
            report_each_iteration: self.report_each_iteration.unwrap_or(false),
            quick_validation: self.quick_validation.unwrap_or(false),
            override_check: self.override_check.unwrap_or(false),
            svm: SvmParameters::default(),
        })
    }
}

/// Warn when either class is too small to reliably fit `features` weights.
/// Returns true if the training set looks large enough
pub fn check_training_size(positives: usize, negatives: usize, features: usize) -> bool {
    let minimum = 5 * features;
    let mut ok = true;
    if positives <= minimum {
        log::warn!(
            "only {} positive training examples for {} features: results may be unstable",
            positives,
            features
        );
        ok = false;
    }
    if negatives <= minimum {
        log::warn!(
            "only {} negative training examples for {} features: results may be unstable",
            negatives,
            features
        );
        ok = false;
    }
    ok
}

/// Stratified assignment of examples to folds: targets and decoys are
/// shuffled separately, then dealt out round-robin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoldPartition {
    pub test: Vec<Vec<usize>>,
    pub train: Vec<Vec<usize>>,
}

impl FoldPartition {
    pub fn new(decoys: &[bool], folds: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut targets, mut negatives): (Vec<usize>, Vec<usize>) =
            (0..decoys.len()).partition(|&ix| !decoys[ix]);
        targets.shuffle(&mut rng);
        negatives.shuffle(&mut rng);

        let mut test = vec![Vec::new(); folds];
        for class in [targets, negatives] {
            for (i, ix) in class.into_iter().enumerate() {
                test[i % folds].push(ix);
            }
        }
        test.iter_mut().for_each(|fold| fold.sort_unstable());

        let train = (0..folds)
            .map(|fold| {
                let mut rows = test
                    .iter()
                    .enumerate()
                    .filter(|&(other, _)| other != fold)
                    .flat_map(|(_, rows)| rows.iter().copied())
                    .collect::<Vec<_>>();
                rows.sort_unstable();
                rows
            })
            .collect();

        FoldPartition { test, train }
    }

    pub fn folds(&self) -> usize {
        self.test.len()
    }
}

/// Model trained for one fold, along with the training set it was fit on
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FoldModel {
    pub weights: WeightVector,
    pub cpos: f64,
    pub cneg: f64,
    pub positives: usize,
    pub negatives: usize,
    /// Test-fold targets passing the test FDR, with q-values computed within
    /// the fold
    pub test_passing: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// Targets passing the test FDR over the merged out-of-fold scores
    pub passing: usize,
    pub folds: Vec<FoldModel>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainedModel {
    /// Final model for each fold, in fold order
    pub folds: Vec<FoldModel>,
    /// Out-of-fold scores for every example
    pub scores: Vec<f64>,
    /// Targets passing the test FDR over `scores`
    pub passing: usize,
    pub history: Vec<IterationReport>,
    /// The trained model ranked fewer targets than the initial direction, so
    /// `scores` and every fold's weights are the initial direction's
    pub fallback: bool,
}

pub struct CrossValidation<'a> {
    parameters: &'a Parameters,
    features: &'a Matrix,
    decoys: &'a [bool],
    pub partition: FoldPartition,
}

// Passing targets among `rows`, with q-values computed over those rows only
fn passing_within(rows: &[usize], scores: &[f64], decoys: &[bool], fdr: f64) -> usize {
    let s = rows.iter().map(|&ix| scores[ix]).collect::<Vec<_>>();
    let d = rows.iter().map(|&ix| decoys[ix]).collect::<Vec<_>>();
    let targets = d.iter().filter(|&&d| !d).count();
    let q = qvalue::q_values(&s, &d, qvalue::pi0(targets, d.len() - targets));
    qvalue::passing(&q, &d, fdr)
}

/// Best candidate: most passing targets, then larger Cpos, then larger Cneg
fn select(candidates: Vec<FoldModel>) -> Option<FoldModel> {
    candidates.into_iter().max_by(|a, b| {
        a.test_passing
            .cmp(&b.test_passing)
            .then(a.cpos.total_cmp(&b.cpos))
            .then(a.cneg.total_cmp(&b.cneg))
    })
}

impl<'a> CrossValidation<'a> {
    pub fn new(
        parameters: &'a Parameters,
        features: &'a Matrix,
        decoys: &'a [bool],
    ) -> Result<Self, Error> {
        if features.rows != decoys.len() {
            return Err(Error::Config(format!(
                "{} feature rows but {} target/decoy labels",
                features.rows,
                decoys.len()
            )));
        }
        let partition = FoldPartition::new(decoys, parameters.folds, parameters.seed);
        Ok(Self {
            parameters,
            features,
            decoys,
            partition,
        })
    }

    fn q_values(&self, scores: &[f64]) -> Vec<f64> {
        let targets = self.decoys.iter().filter(|&&d| !d).count();
        let pi0 = qvalue::pi0(targets, self.decoys.len() - targets);
        qvalue::q_values(scores, self.decoys, pi0)
    }

    fn fit(&self, fold: usize, set: &TrainingSet, cpos: f64, cneg: f64) -> FoldModel {
        let weights = Svm::new(set, cpos, cneg, self.parameters.svm).fit();
        let test = &self.partition.test[fold];
        let mut scores = vec![0.0; self.features.rows];
        for &row in test {
            scores[row] = weights.score(self.features.row(row));
        }
        FoldModel {
            test_passing: passing_within(test, &scores, self.decoys, self.parameters.test_fdr),
            weights,
            cpos,
            cneg,
            positives: set.positives(),
            negatives: set.negatives(),
        }
    }

    /// `selected` overrides the configured penalties with an earlier
    /// iteration's choice for this fold
    fn train_fold(&self, fold: usize, q: &[f64], selected: Option<(f64, f64)>) -> FoldModel {
        let examples = self.partition.train[fold]
            .iter()
            .filter_map(|&row| match self.decoys[row] {
                true => Some((row, false)),
                false if q[row] <= self.parameters.train_fdr => Some((row, true)),
                false => None,
            });
        let set = TrainingSet::new(self.features, examples);

        if let Some((cpos, cneg)) = selected {
            return self.fit(fold, &set, cpos, cneg);
        }
        match self.parameters.penalties {
            Penalties::Fixed { cpos, cneg } => self.fit(fold, &set, cpos, cneg),
            Penalties::GridSearch => {
                let ratio = match (set.positives(), set.negatives()) {
                    (p, n) if p > 0 && n > 0 => p as f64 / n as f64,
                    _ => 1.0,
                };
                let candidates = CPOS_GRID
                    .iter()
                    .flat_map(|&cpos| CNEG_FACTORS.map(|f| (cpos, cpos * f * ratio)))
                    .collect::<Vec<_>>()
                    .into_par_iter()
                    .map(|(cpos, cneg)| self.fit(fold, &set, cpos, cneg))
                    .collect::<Vec<_>>();
                // The grid is never empty
                select(candidates).unwrap_or_else(|| self.fit(fold, &set, 1.0, ratio))
            }
        }
    }

    /// Train from the ranking given by `initial`
    pub fn train(&self, initial: &dyn Direction) -> TrainedModel {
        let parameters = self.parameters;
        let initial_scores = direction::scores(initial, self.features);
        let mut scores = initial_scores.clone();
        let mut q = self.q_values(&scores);
        let initial_passing = qvalue::passing(&q, self.decoys, parameters.test_fdr);
        log::info!(
            "- estimating {} targets at q <= {} in initial direction",
            qvalue::passing(&q, self.decoys, parameters.train_fdr),
            parameters.train_fdr
        );

        let mut folds = Vec::new();
        let mut passing = 0;
        let mut history = Vec::new();
        let mut selected: Option<Vec<(f64, f64)>> = None;
        for iteration in 1..=parameters.max_iterations {
            let reuse = selected.as_deref();
            folds = (0..self.partition.folds())
                .into_par_iter()
                .map(|fold| self.train_fold(fold, &q, reuse.map(|s| s[fold])))
                .collect::<Vec<_>>();
            if parameters.quick_validation && selected.is_none() {
                selected = Some(folds.iter().map(|m| (m.cpos, m.cneg)).collect());
            }

            for (fold, model) in folds.iter().enumerate() {
                log::debug!(
                    "- iteration {}, fold {}: {} positives, {} negatives, cpos {}, cneg {:.4}, {} test targets at q <= {}",
                    iteration,
                    fold,
                    model.positives,
                    model.negatives,
                    model.cpos,
                    model.cneg,
                    model.test_passing,
                    parameters.test_fdr
                );
                log::trace!("- fold {} weights: |w| = {}", fold, norm(&model.weights.weights));
                for &row in &self.partition.test[fold] {
                    scores[row] = model.weights.score(self.features.row(row));
                }
            }

            q = self.q_values(&scores);
            passing = qvalue::passing(&q, self.decoys, parameters.test_fdr);
            log::info!(
                "- iteration {}: {} targets at q <= {}",
                iteration,
                passing,
                parameters.test_fdr
            );
            if parameters.report_each_iteration {
                history.push(IterationReport {
                    iteration,
                    passing,
                    folds: folds.clone(),
                });
            }
        }

        let fallback = !parameters.override_check && passing < initial_passing;
        if fallback {
            log::warn!(
                "trained model finds {} targets at q <= {}, fewer than the initial direction ({}): \
                 falling back to the initial direction",
                passing,
                parameters.test_fdr,
                initial_passing
            );
            let weights = initial.weights(self.features.cols);
            folds
                .iter_mut()
                .for_each(|model| model.weights = weights.clone());
            scores = initial_scores;
            passing = initial_passing;
        }

        TrainedModel {
            folds,
            scores,
            passing,
            history,
            fallback,
        }
    }
}
