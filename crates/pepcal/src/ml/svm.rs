//! Linear L2-loss support vector machine with per-class misclassification
//! costs, trained by the modified finite Newton method:
//!
//! min_w 0.5 * lambda * |w|^2 + 0.5 * sum_i C_i * max(0, 1 - y_i * w.x_i)^2
//!
//! Keerthi & DeCoste, 2005 [https://jmlr.org/papers/v6/keerthi05a.html]

use super::direction::WeightVector;
use super::gauss::Gauss;
use super::matrix::Matrix;
use log::trace;
use rayon::prelude::*;

/// Stop once the objective improves by less than this fraction
const RELATIVE_STOP: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SvmParameters {
    /// L2 regularization strength
    pub lambda: f64,
    /// Tolerance on the margin conditions
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for SvmParameters {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            epsilon: 1e-7,
            max_iterations: 50,
        }
    }
}

/// Rows of a feature matrix with +1 (positive) / -1 (negative) labels
pub struct TrainingSet<'a> {
    features: &'a Matrix,
    rows: Vec<usize>,
    labels: Vec<f64>,
}

impl<'a> TrainingSet<'a> {
    /// `examples` yields (row, is_positive)
    pub fn new<I>(features: &'a Matrix, examples: I) -> Self
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        let (rows, labels) = examples
            .into_iter()
            .map(|(row, positive)| (row, if positive { 1.0 } else { -1.0 }))
            .unzip();
        Self {
            features,
            rows,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y > 0.0).count()
    }

    pub fn negatives(&self) -> usize {
        self.len() - self.positives()
    }

    // Feature `j` of example `i`, with an implicit trailing 1.0 for the bias
    fn x(&self, i: usize, j: usize) -> f64 {
        self.features
            .row(self.rows[i])
            .get(j)
            .copied()
            .unwrap_or(1.0)
    }

    fn outputs(&self, w: &[f64]) -> Vec<f64> {
        (0..self.len())
            .into_par_iter()
            .map(|i| (0..w.len()).fold(0.0, |acc, j| acc + w[j] * self.x(i, j)))
            .collect()
    }
}

pub struct Svm<'a> {
    set: &'a TrainingSet<'a>,
    cpos: f64,
    cneg: f64,
    parameters: SvmParameters,
}

impl<'a> Svm<'a> {
    pub fn new(set: &'a TrainingSet<'a>, cpos: f64, cneg: f64, parameters: SvmParameters) -> Self {
        Self {
            set,
            cpos,
            cneg,
            parameters,
        }
    }

    fn cost(&self, label: f64) -> f64 {
        match label > 0.0 {
            true => self.cpos,
            false => self.cneg,
        }
    }

    fn objective(&self, w: &[f64], o: &[f64]) -> f64 {
        let reg = 0.5 * self.parameters.lambda * w.iter().map(|w| w * w).sum::<f64>();
        let loss = o
            .iter()
            .zip(&self.set.labels)
            .map(|(o, y)| {
                let margin = (1.0 - y * o).max(0.0);
                0.5 * self.cost(*y) * margin * margin
            })
            .sum::<f64>();
        reg + loss
    }

    /// Examples inside the margin
    fn active(&self, o: &[f64]) -> Vec<usize> {
        (0..o.len())
            .filter(|&i| self.set.labels[i] * o[i] < 1.0)
            .collect()
    }

    /// Minimize the regularized squared loss over the active set exactly:
    /// (lambda * I + X'CX) w = X'Cy
    fn newton_step(&self, active: &[usize], dim: usize) -> Option<Vec<f64>> {
        // Fixed-size chunks summed in order, so results do not depend on
        // how work is scheduled
        let partials = active
            .par_chunks(256)
            .map(|chunk| {
                let mut h = vec![0.0; dim * dim];
                let mut b = vec![0.0; dim];
                for &i in chunk {
                    let y = self.set.labels[i];
                    let c = self.cost(y);
                    for j in 0..dim {
                        let xj = self.set.x(i, j);
                        b[j] += c * y * xj;
                        for k in j..dim {
                            h[j * dim + k] += c * xj * self.set.x(i, k);
                        }
                    }
                }
                (h, b)
            })
            .collect::<Vec<_>>();

        let mut h = vec![0.0; dim * dim];
        let mut b = vec![0.0; dim];
        for (h2, b2) in partials {
            h.iter_mut().zip(h2).for_each(|(l, r)| *l += r);
            b.iter_mut().zip(b2).for_each(|(l, r)| *l += r);
        }

        // Only the upper triangle was accumulated
        for j in 0..dim {
            h[j * dim + j] += self.parameters.lambda;
            for k in 0..j {
                h[j * dim + k] = h[k * dim + j];
            }
        }

        Gauss::solve(Matrix::new(h, dim, dim), Matrix::col_vector(b)).map(Matrix::into_vec)
    }

    /// Does `o_bar` satisfy the margin conditions of the current active set?
    fn optimal(&self, active: &[usize], o_bar: &[f64]) -> bool {
        let eps = self.parameters.epsilon;
        let mut is_active = vec![false; o_bar.len()];
        for &i in active {
            is_active[i] = true;
        }
        o_bar
            .iter()
            .zip(&self.set.labels)
            .zip(is_active)
            .all(|((o, y), active)| match active {
                true => y * o <= 1.0 + eps,
                false => y * o >= 1.0 - eps,
            })
    }

    /// Exact line search along w + t * (w_bar - w), t in [0, 1]. The
    /// objective is piecewise quadratic in t, with breakpoints where examples
    /// enter or leave the margin
    fn line_search(&self, w: &[f64], w_bar: &[f64], o: &[f64], o_bar: &[f64]) -> f64 {
        let lambda = self.parameters.lambda;
        let labels = &self.set.labels;

        // Slope of the objective at t = 0 (left) and t = 1 (right), given
        // the active set at t = 0
        let mut left = lambda * w.iter().zip(w_bar).map(|(w, wb)| w * (wb - w)).sum::<f64>();
        let mut right = lambda * w_bar.iter().zip(w).map(|(wb, w)| wb * (wb - w)).sum::<f64>();

        // (breakpoint, example, +1 entering / -1 leaving the margin)
        let mut breakpoints = Vec::new();
        for i in 0..o.len() {
            let y = labels[i];
            let delta = y * (o_bar[i] - o[i]);
            if y * o[i] < 1.0 {
                let d2 = self.cost(y) * (o_bar[i] - o[i]);
                left += (o[i] - y) * d2;
                right += (o_bar[i] - y) * d2;
                if delta > 0.0 {
                    breakpoints.push(((1.0 - y * o[i]) / delta, i, -1.0));
                }
            } else if delta < 0.0 {
                breakpoints.push(((1.0 - y * o[i]) / delta, i, 1.0));
            }
        }
        breakpoints.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (t, i, sign) in breakpoints {
            if left + t * (right - left) >= 0.0 {
                break;
            }
            let y = labels[i];
            let diff = sign * self.cost(y) * (o_bar[i] - o[i]);
            left += diff * (o[i] - y);
            right += diff * (o_bar[i] - y);
        }

        match (right - left).abs() > f64::EPSILON {
            true => (-left / (right - left)).clamp(0.0, 1.0),
            false => 0.0,
        }
    }

    pub fn fit(&self) -> WeightVector {
        let dim = self.set.features.cols + 1;
        let mut w = vec![0.0; dim];
        if self.set.is_empty() {
            return WeightVector::new(w);
        }

        let mut o = vec![0.0; self.set.len()];
        let mut active = self.active(&o);
        let mut objective = self.objective(&w, &o);

        for iteration in 0..self.parameters.max_iterations {
            let w_bar = match self.newton_step(&active, dim) {
                Some(w_bar) => w_bar,
                None => break,
            };
            let o_bar = self.set.outputs(&w_bar);

            if self.optimal(&active, &o_bar) {
                trace!("svm converged after {} iterations", iteration + 1);
                w = w_bar;
                break;
            }

            let t = self.line_search(&w, &w_bar, &o, &o_bar);
            w.iter_mut()
                .zip(&w_bar)
                .for_each(|(w, wb)| *w += t * (wb - *w));
            o.iter_mut()
                .zip(&o_bar)
                .for_each(|(o, ob)| *o += t * (ob - *o));

            active = self.active(&o);
            let next = self.objective(&w, &o);
            trace!(
                "svm iteration {}: step {:.4}, {} active, objective {}",
                iteration + 1,
                t,
                active.len(),
                next
            );
            if (objective - next).abs() <= RELATIVE_STOP * objective.abs() {
                break;
            }
            objective = next;
        }
        WeightVector::new(w)
    }
}
