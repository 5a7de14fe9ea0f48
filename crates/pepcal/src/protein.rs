//! Protein-level FDR estimation from length-stratified target/decoy protein
//! counts
//!
//! Proteins are binned by a digestion-derived length proxy, since long
//! proteins attract more random matches than short ones. Within each bin the
//! number of false target hits is modelled as a hypergeometric variable.
//!
//! Reiter et al., 2009 [https://pubmed.ncbi.nlm.nih.gov/19608599/]

use crate::enzyme::{DigestBuilder, DigestParameters, Digester};
use crate::fasta::Fasta;
use crate::Error;
use fnv::FnvHashSet;
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::hash::BuildHasher;

/// Reported in place of an FDR when no estimate can be made
pub const NO_ESTIMATE: f64 = -1.0;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Binning {
    /// Uniform length-proxy intervals over [min, max]
    EqualWidth,
    /// Equal protein counts, residual proteins go to the last bin
    #[default]
    EqualDepth,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Builder {
    pub digest: Option<DigestBuilder>,
    pub bins: Option<usize>,
    pub binning: Option<Binning>,
    /// Substring identifying decoy accessions in a combined database
    pub decoy_tag: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Parameters {
    pub digest: DigestParameters,
    pub bins: usize,
    pub binning: Binning,
    pub decoy_tag: String,
}

impl Builder {
    pub fn make_parameters(self) -> Result<Parameters, Error> {
        let bins = self.bins.unwrap_or(10);
        if bins == 0 {
            return Err(Error::Config("`bins` must be at least 1".into()));
        }
        let decoy_tag = self.decoy_tag.unwrap_or_else(|| "random".into());
        if decoy_tag.is_empty() {
            return Err(Error::Config("`decoy_tag` must not be empty".into()));
        }
        Ok(Parameters {
            digest: self.digest.unwrap_or_default().make_parameters()?,
            bins,
            binning: self.binning.unwrap_or_default(),
            decoy_tag,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protein {
    pub accession: String,
    pub sequence: String,
}

/// A target protein and the decoy protein it is paired with. Either side is
/// `None` when it is a placeholder padding the smaller database
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProteinPair {
    pub target: Option<Protein>,
    pub decoy: Option<Protein>,
    /// Shared by both sides of the pair
    pub length: usize,
}

pub struct ProteinIndex {
    pub pairs: Vec<ProteinPair>,
    /// Number of target proteins per decoy protein, before padding
    pub ratio: f64,
}

/// The first record wins when an accession repeats
fn by_accession(fasta: Fasta) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (accession, sequence) in fasta.proteins {
        match map.entry(accession) {
            Entry::Vacant(entry) => {
                entry.insert(sequence);
            }
            Entry::Occupied(entry) => {
                warn!(
                    "accession `{}` appears more than once: keeping its first record",
                    entry.key()
                );
            }
        }
    }
    map
}

impl ProteinIndex {
    /// Pair target and decoy proteins in accession order and compute a length
    /// proxy for every pair. Duplicate target sequences get a length of 0
    pub fn new(targets: Fasta, decoys: Fasta, digester: &Digester) -> Result<Self, Error> {
        let targets = by_accession(targets);
        let decoys = by_accession(decoys);
        if targets.is_empty() || decoys.is_empty() {
            return Err(Error::EmptyDatabase {
                targets: targets.len(),
                decoys: decoys.len(),
            });
        }

        let ratio = targets.len() as f64 / decoys.len() as f64;
        let n = targets.len().max(decoys.len());
        if targets.len() != decoys.len() {
            debug!(
                "padding protein database: {} targets, {} decoys",
                targets.len(),
                decoys.len()
            );
        }

        let mut t = targets.into_iter();
        let mut d = decoys.into_iter();
        let mut seen = FnvHashSet::default();
        let pairs = (0..n)
            .map(|_| {
                let target = t.next().map(|(accession, sequence)| Protein {
                    accession,
                    sequence,
                });
                let decoy = d.next().map(|(accession, sequence)| Protein {
                    accession,
                    sequence,
                });
                let duplicate = match &target {
                    Some(p) => !seen.insert(p.sequence.clone()),
                    None => false,
                };
                (target, decoy, duplicate)
            })
            .collect::<Vec<_>>();

        let pairs = pairs
            .into_par_iter()
            .map(|(target, decoy, duplicate)| {
                let length = match (&target, &decoy, duplicate) {
                    (_, _, true) => 0,
                    (Some(p), _, _) | (None, Some(p), _) => digester.length_proxy(&p.sequence),
                    (None, None, _) => 0,
                };
                ProteinPair {
                    target,
                    decoy,
                    length,
                }
            })
            .collect::<Vec<_>>();

        info!(
            "indexed {} protein pairs, target:decoy ratio {:.3}",
            pairs.len(),
            ratio
        );

        Ok(ProteinIndex { pairs, ratio })
    }

    /// Split a combined database on the decoy tag, then build the index
    pub fn from_combined(fasta: Fasta, decoy_tag: &str, digester: &Digester) -> Result<Self, Error> {
        let (targets, decoys) = fasta.split(decoy_tag);
        Self::new(targets, decoys, digester)
    }

    /// Target proteins, excluding placeholders
    pub fn targets(&self) -> usize {
        self.pairs.iter().filter(|p| p.target.is_some()).count()
    }

    /// Decoy proteins, including placeholders
    pub fn padded_decoys(&self) -> usize {
        self.pairs.len()
    }

    /// Stratify protein pairs by length proxy. Bins are recomputed on every
    /// call, and every pair lands in exactly one bin
    pub fn bins(&self, nbins: usize, binning: Binning) -> Vec<LengthBin> {
        let nbins = nbins.max(1);
        let mut order = (0..self.pairs.len()).collect::<Vec<_>>();
        order.sort_by_key(|&ix| (self.pairs[ix].length, ix));

        let mut bins = (0..nbins)
            .map(|_| LengthBin::default())
            .collect::<Vec<LengthBin>>();

        match binning {
            Binning::EqualDepth => {
                let per = order.len() / nbins;
                for (rank, ix) in order.into_iter().enumerate() {
                    let bin = match per {
                        0 => nbins - 1,
                        _ => (rank / per).min(nbins - 1),
                    };
                    bins[bin].pairs.push(ix);
                }
                for bin in bins.iter_mut() {
                    if let (Some(&lo), Some(&hi)) = (bin.pairs.first(), bin.pairs.last()) {
                        bin.lower = self.pairs[lo].length as f64;
                        bin.upper = self.pairs[hi].length as f64;
                    }
                }
            }
            Binning::EqualWidth => {
                let (min, max) = match (order.first(), order.last()) {
                    (Some(&lo), Some(&hi)) => {
                        (self.pairs[lo].length as f64, self.pairs[hi].length as f64)
                    }
                    _ => return bins,
                };
                let width = (max - min) / nbins as f64;
                for (i, bin) in bins.iter_mut().enumerate() {
                    bin.lower = min + i as f64 * width;
                    bin.upper = match i + 1 == nbins {
                        true => max,
                        false => min + (i + 1) as f64 * width,
                    };
                }
                for ix in order {
                    let offset = self.pairs[ix].length as f64 - min;
                    let bin = match width > 0.0 {
                        true => ((offset / width).floor() as usize).min(nbins - 1),
                        false => 0,
                    };
                    bins[bin].pairs.push(ix);
                }
            }
        }
        bins
    }
}

/// A stratum of protein pairs with similar length proxy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LengthBin {
    pub lower: f64,
    pub upper: f64,
    /// Indices into [`ProteinIndex::pairs`], ascending by length proxy
    pub pairs: Vec<usize>,
}

impl LengthBin {
    pub fn targets<'a>(&'a self, index: &'a ProteinIndex) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs.iter().filter_map(move |&ix| {
            index.pairs[ix]
                .target
                .as_ref()
                .map(|p| p.accession.as_str())
        })
    }

    pub fn decoys<'a>(&'a self, index: &'a ProteinIndex) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs.iter().filter_map(move |&ix| {
            index.pairs[ix]
                .decoy
                .as_ref()
                .map(|p| p.accession.as_str())
        })
    }
}

/// ln P(X = x) for a hypergeometric variable: `draws` items taken from a
/// `population` containing `marked` successes
fn ln_hypergeometric(x: u64, population: u64, marked: u64, draws: u64) -> f64 {
    if marked > population || draws > population || x > marked || x > draws {
        return f64::NEG_INFINITY;
    }
    if draws - x > population - marked {
        return f64::NEG_INFINITY;
    }
    ln_binomial(marked, x) + ln_binomial(population - marked, draws - x)
        - ln_binomial(population, draws)
}

/// Expected number of false positives among `tp` target hits in a bin of `n`
/// candidate target proteins, given `fp` (scaled) decoy hits.
///
/// Probabilities are computed and normalized in log space. The result lies in
/// `[0, min(fp, n)]`, and is 0.0 when no count is possible under the model
pub fn hypergeometric_expectation(n: u64, tp: u64, fp: u64) -> f64 {
    let fp = fp.min(n);
    let ln_p = (0..=fp)
        .map(|f| match f <= tp {
            true => ln_hypergeometric(f, n, n - (tp - f).min(n), fp),
            false => f64::NEG_INFINITY,
        })
        .collect::<Vec<_>>();

    let max = ln_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return 0.0;
    }
    let ln_norm = max + ln_p.iter().map(|lp| (lp - max).exp()).sum::<f64>().ln();

    let expected = ln_p
        .iter()
        .enumerate()
        .map(|(f, lp)| f as f64 * (lp - ln_norm).exp())
        .sum::<f64>();

    match expected.is_finite() {
        true => expected.clamp(0.0, fp as f64),
        false => 0.0,
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BinEstimate {
    pub lower: f64,
    pub upper: f64,
    /// Candidate target proteins in the bin
    pub candidates: usize,
    pub true_positives: usize,
    /// Confident decoys in the bin, scaled by the target:decoy ratio
    pub false_positives: u64,
    pub expected_false_positives: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProteinFdrEstimate {
    /// Estimated protein FDR, or [`NO_ESTIMATE`]
    pub fdr: f64,
    pub bins: Vec<BinEstimate>,
}

impl ProteinFdrEstimate {
    pub fn fdr(&self) -> Option<f64> {
        match self.fdr == NO_ESTIMATE {
            true => None,
            false => Some(self.fdr),
        }
    }
}

pub struct ProteinFdr<'a> {
    index: &'a ProteinIndex,
    nbins: usize,
    binning: Binning,
}

impl<'a> ProteinFdr<'a> {
    pub fn new(index: &'a ProteinIndex, nbins: usize, binning: Binning) -> Self {
        Self {
            index,
            nbins,
            binning,
        }
    }

    /// Estimate protein FDR given the names of confidently identified target
    /// and decoy proteins
    pub fn estimate<S: BuildHasher>(
        &self,
        confident_targets: &HashSet<String, S>,
        confident_decoys: &HashSet<String, S>,
    ) -> ProteinFdrEstimate {
        let bins = self
            .index
            .bins(self.nbins, self.binning)
            .into_iter()
            .map(|bin| {
                let candidates = bin.targets(self.index).count();
                let true_positives = bin
                    .targets(self.index)
                    .filter(|acc| confident_targets.contains(*acc))
                    .count();
                let decoys = bin
                    .decoys(self.index)
                    .filter(|acc| confident_decoys.contains(*acc))
                    .count();
                let false_positives = (decoys as f64 * self.index.ratio).round() as u64;
                let expected_false_positives = hypergeometric_expectation(
                    candidates as u64,
                    true_positives as u64,
                    false_positives,
                );
                trace!(
                    "bin [{}, {}]: N={} TP={} FP={} E[FP]={}",
                    bin.lower,
                    bin.upper,
                    candidates,
                    true_positives,
                    false_positives,
                    expected_false_positives
                );
                BinEstimate {
                    lower: bin.lower,
                    upper: bin.upper,
                    candidates,
                    true_positives,
                    false_positives,
                    expected_false_positives,
                }
            })
            .collect::<Vec<_>>();

        let expected = bins
            .iter()
            .filter(|bin| bin.true_positives > 0)
            .map(|bin| bin.expected_false_positives)
            .sum::<f64>();
        let true_positives = bins.iter().map(|bin| bin.true_positives).sum::<usize>();

        let fdr = expected / true_positives as f64;
        let fdr = match fdr.is_finite() && fdr != 0.0 {
            true => fdr,
            false => NO_ESTIMATE,
        };
        ProteinFdrEstimate { fdr, bins }
    }
}
