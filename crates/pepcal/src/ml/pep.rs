//! Posterior error probabilities from the target and decoy score densities.
//! Both densities are estimated with a Gaussian KDE evaluated on an evenly
//! spaced grid; PEP is their pi0-scaled ratio, forced to be non-increasing in
//! score by antitonic regression, and linearly interpolated between grid
//! points.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use super::std;
use rayon::prelude::*;

pub struct Kde<'a> {
    sample: &'a [f64],
    pub bandwidth: f64,
    constant: f64,
}

impl<'a> Kde<'a> {
    /// Silverman's rule of thumb. Degenerate samples (fewer than two points,
    /// or no spread) fall back to a unit bandwidth
    pub fn new(sample: &'a [f64]) -> Self {
        let factor = 4. / 3.;
        let exponent = 1. / 5.;
        let sigma = std(sample);
        let bandwidth = match sigma * (factor / sample.len() as f64).powf(exponent) {
            bw if bw.is_finite() && bw > 0.0 => bw,
            _ => 1.0,
        };
        let constant = (2.0 * std::f64::consts::PI).sqrt() * bandwidth * sample.len() as f64;
        Self {
            sample,
            bandwidth,
            constant,
        }
    }

    fn kernel(&self, x: f64) -> f64 {
        (-0.5 * x.powi(2)).exp()
    }

    pub fn pdf(&self, x: f64) -> f64 {
        if self.sample.is_empty() {
            return 0.0;
        }
        let h = self.bandwidth;
        let sum = self
            .sample
            .iter()
            .fold(0.0, |acc, xi| acc + self.kernel((x - xi) / h));
        sum / self.constant
    }
}

/// Pool adjacent violators: least-squares fit that never increases from one
/// element to the next
pub fn antitonic(values: &mut [f64]) {
    // (mean, weight) of each pooled block
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(values.len());
    for &v in values.iter() {
        blocks.push((v, 1));
        while blocks.len() > 1 {
            let (mean, weight) = blocks[blocks.len() - 1];
            let (prev_mean, prev_weight) = blocks[blocks.len() - 2];
            if prev_mean >= mean {
                break;
            }
            blocks.pop();
            let w = prev_weight + weight;
            let pooled = (prev_mean * prev_weight as f64 + mean * weight as f64) / w as f64;
            if let Some(last) = blocks.last_mut() {
                *last = (pooled, w);
            }
        }
    }

    let mut ix = 0;
    for (mean, weight) in blocks {
        values[ix..ix + weight].iter_mut().for_each(|v| *v = mean);
        ix += weight;
    }
}

pub struct Builder {
    bins: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self { bins: 1000 }
    }
}

impl Builder {
    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(2);
        self
    }

    pub fn build(self, scores: &[f64], decoys: &[bool], pi0: f64) -> Estimator {
        let (d, t): (Vec<f64>, Vec<f64>) = {
            let (d, t): (Vec<_>, Vec<_>) = scores.iter().zip(decoys).partition(|(_, d)| **d);
            (
                d.into_iter().map(|(s, _)| *s).collect(),
                t.into_iter().map(|(s, _)| *s).collect(),
            )
        };

        // Essentially, np.linspace(scores.min(), scores.max(), 1000)
        let mut min_score = f64::MAX;
        let mut max_score = f64::MIN;
        for s in scores.iter().filter(|s| s.is_finite()) {
            min_score = min_score.min(*s);
            max_score = max_score.max(*s);
        }
        if min_score > max_score {
            min_score = 0.0;
            max_score = 0.0;
        }
        let score_step = (max_score - min_score) / (self.bins - 1) as f64;

        let constant = |pep: f64| Estimator {
            bins: vec![pep; self.bins],
            min_score,
            score_step,
        };
        if d.is_empty() {
            return constant(0.0);
        }
        if t.is_empty() {
            return constant(1.0);
        }

        let decoy = Kde::new(&d);
        let target = Kde::new(&t);
        log::trace!(
            "kde bandwidths: target {:.4}, decoy {:.4}",
            target.bandwidth,
            decoy.bandwidth
        );

        let ratios = (0..self.bins)
            .into_par_iter()
            .map(|bin| {
                let score = (bin as f64 * score_step) + min_score;
                pi0 * decoy.pdf(score) / target.pdf(score)
            })
            .collect::<Vec<_>>();

        // Grid points where both densities vanish take their neighbour's value
        let mut prev = 1.0;
        let mut bins = ratios
            .into_iter()
            .map(|ratio| {
                if !ratio.is_nan() {
                    prev = ratio.clamp(0.0, 1.0);
                }
                prev
            })
            .collect::<Vec<_>>();

        antitonic(&mut bins);

        Estimator {
            bins,
            min_score,
            score_step,
        }
    }
}

pub struct Estimator {
    bins: Vec<f64>,
    min_score: f64,
    score_step: f64,
}

impl Estimator {
    /// Calculate the posterior error probability for a given score, under the
    /// pre-fit non-parametric probability model.
    pub fn posterior_error(&self, score: f64) -> f64 {
        if !(self.score_step > 0.0) {
            return self.bins[0];
        }
        let last = self.bins.len() - 1;
        let bin_lo = last.min(((score - self.min_score) / self.score_step).floor() as usize);
        let bin_hi = last.min(bin_lo + 1);

        // PEP of lower & one higher bin
        let lower = self.bins[bin_lo];
        let upper = self.bins[bin_hi];

        // What fraction of the way to the higher bin are we?
        let bin_lo_score = bin_lo as f64 * self.score_step + self.min_score;
        let linear = ((score - bin_lo_score) / self.score_step).clamp(0.0, 1.0);

        (lower + (upper - lower) * linear).clamp(0.0, 1.0)
    }
}
