//! Score calibration: redundancy reduction, target-decoy competition,
//! q-values and posterior error probabilities for a scored set of
//! peptide-spectrum matches
//!
//! Elias & Gygi, https://pubmed.ncbi.nlm.nih.gov/17327847/
//! Käll et al., https://pubmed.ncbi.nlm.nih.gov/18052118/

use crate::ml::{pep, qvalue};
use fnv::FnvHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Psm {
    pub id: String,
    pub decoy: bool,
    /// Neutral spectrum/precursor key shared by competing target and decoy
    pub spectrum: String,
    pub peptide: String,
    pub proteins: Vec<String>,
    pub score: f64,
    pub q_value: f64,
    pub posterior_error: f64,
}

impl Psm {
    pub fn new<S: Into<String>>(
        id: S,
        decoy: bool,
        spectrum: S,
        peptide: S,
        proteins: Vec<String>,
        score: f64,
    ) -> Self {
        Psm {
            id: id.into(),
            decoy,
            spectrum: spectrum.into(),
            peptide: peptide.into(),
            proteins,
            score,
            q_value: 1.0,
            posterior_error: 1.0,
        }
    }
}

/// Ranking used everywhere a single PSM has to be picked: higher score, then
/// decoy, then smaller id. `Less` is better
fn rank(a: &Psm, b: &Psm) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.decoy.cmp(&a.decoy))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Best PSM per peptide, separately for targets and decoys
    PeptideRedundancy,
    /// Best PSM per spectrum, across labels
    TargetDecoyCompetition,
    None,
}

// Keep the best-ranked PSM for each key, returned in rank order
fn best_by_key<K, F>(psms: Vec<Psm>, key: F) -> Vec<Psm>
where
    K: std::hash::Hash + Eq,
    F: Fn(&Psm) -> K,
{
    let mut map: FnvHashMap<K, Psm> = FnvHashMap::default();
    for psm in psms {
        match map.entry(key(&psm)) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                if rank(&psm, entry.get()) == Ordering::Less {
                    entry.insert(psm);
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(psm);
            }
        }
    }
    let mut kept = map.into_values().collect::<Vec<_>>();
    kept.par_sort_by(rank);
    kept
}

/// Retain only the highest scoring PSM per peptide, independently among
/// targets and among decoys
pub fn remove_redundant(psms: Vec<Psm>) -> Vec<Psm> {
    best_by_key(psms, |psm| (psm.decoy, psm.peptide.clone()))
}

/// Retain only the highest scoring PSM per spectrum, regardless of label.
/// A decoy wins a tie against a target
pub fn target_decoy_competition(psms: Vec<Psm>) -> Vec<Psm> {
    best_by_key(psms, |psm| psm.spectrum.clone())
}

pub fn pi0(psms: &[Psm]) -> f64 {
    let decoys = psms.iter().filter(|psm| psm.decoy).count();
    qvalue::pi0(psms.len() - decoys, decoys)
}

fn split(psms: &[Psm]) -> (Vec<f64>, Vec<bool>) {
    psms.iter().map(|psm| (psm.score, psm.decoy)).unzip()
}

/// Assign q-values, returning the number of targets at or below `threshold`
pub fn assign_q_values(psms: &mut [Psm], pi0: f64, threshold: f64) -> usize {
    let (scores, decoys) = split(psms);
    let q = qvalue::q_values(&scores, &decoys, pi0);
    psms.par_iter_mut()
        .zip(q)
        .for_each(|(psm, q)| psm.q_value = q);
    qvalue::passing(
        &psms.iter().map(|psm| psm.q_value).collect::<Vec<_>>(),
        &decoys,
        threshold,
    )
}

pub fn assign_posterior_errors(psms: &mut [Psm], pi0: f64) {
    let (scores, decoys) = split(psms);
    let estimator = pep::Builder::default().build(&scores, &decoys, pi0);
    psms.par_iter_mut()
        .for_each(|psm| psm.posterior_error = estimator.posterior_error(psm.score));
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    pub pi0: f64,
    /// Targets at or below the reporting threshold
    pub passing: usize,
    pub targets: usize,
    pub decoys: usize,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibrator {
    pub mode: Mode,
    pub threshold: f64,
}

impl Calibrator {
    pub fn new(mode: Mode, threshold: f64) -> Self {
        Self { mode, threshold }
    }

    /// Reduce `psms` according to the mode, then annotate every survivor
    /// with a q-value and PEP. Survivors are returned best first
    pub fn calibrate(&self, psms: Vec<Psm>) -> (Vec<Psm>, Calibration) {
        let mut psms = match self.mode {
            Mode::PeptideRedundancy => remove_redundant(psms),
            Mode::TargetDecoyCompetition => target_decoy_competition(psms),
            Mode::None => {
                let mut psms = psms;
                psms.par_sort_by(rank);
                psms
            }
        };

        let decoys = psms.iter().filter(|psm| psm.decoy).count();
        let targets = psms.len() - decoys;
        let pi0 = pi0(&psms);
        // Each surviving decoy stands in for one incorrect target
        let effective = match self.mode {
            Mode::TargetDecoyCompetition => 1.0,
            _ => pi0,
        };

        let passing = assign_q_values(&mut psms, effective, self.threshold);
        assign_posterior_errors(&mut psms, effective);

        log::info!(
            "- {} targets and {} decoys retained, pi0 = {:.4}, {} targets at q <= {}",
            targets,
            decoys,
            pi0,
            passing,
            self.threshold
        );

        (
            psms,
            Calibration {
                pi0,
                passing,
                targets,
                decoys,
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn psm(id: usize, decoy: bool, spectrum: usize, peptide: &str, score: f64) -> Psm {
        Psm::new(
            format!("psm{:03}", id),
            decoy,
            format!("scan{}", spectrum),
            peptide.into(),
            vec![],
            score,
        )
    }

    #[test]
    fn redundancy_is_per_label() {
        let psms = vec![
            psm(0, false, 0, "PEPTIDE", 1.0),
            psm(1, false, 1, "PEPTIDE", 3.0),
            psm(2, true, 2, "PEPTIDE", 2.0),
            psm(3, true, 3, "PEPTIDE", 0.5),
            psm(4, false, 4, "LESLIEK", 0.1),
        ];
        let kept = remove_redundant(psms);
        let ids = kept.iter().map(|psm| psm.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["psm001", "psm002", "psm004"]);
    }

    #[quickcheck]
    fn redundancy_is_idempotent(input: Vec<(u8, bool, i8)>) -> bool {
        let psms = input
            .iter()
            .enumerate()
            .map(|(id, &(peptide, decoy, score))| {
                psm(id, decoy, id, &format!("PEP{}", peptide % 8), score as f64)
            })
            .collect::<Vec<_>>();
        let once = remove_redundant(psms);
        let twice = remove_redundant(once.clone());
        once == twice
    }

    #[quickcheck]
    fn competition_keeps_group_maximum(input: Vec<(u8, bool, i8)>) -> bool {
        let psms = input
            .iter()
            .enumerate()
            .map(|(id, &(spectrum, decoy, score))| {
                psm(id, decoy, (spectrum % 16) as usize, "PEPTIDE", score as f64)
            })
            .collect::<Vec<_>>();
        let kept = target_decoy_competition(psms.clone());

        let mut groups: FnvHashMap<&str, Vec<&Psm>> = FnvHashMap::default();
        for p in &psms {
            groups.entry(p.spectrum.as_str()).or_default().push(p);
        }
        kept.len() == groups.len()
            && kept.iter().all(|survivor| {
                groups[survivor.spectrum.as_str()]
                    .iter()
                    .all(|other| other.score <= survivor.score)
            })
    }

    #[test]
    fn competition_ties_go_to_decoy() {
        let kept = target_decoy_competition(vec![
            psm(0, false, 0, "PEPTIDE", 1.0),
            psm(1, true, 0, "EDITPEP", 1.0),
            psm(2, false, 1, "LESLIEK", 2.0),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "psm002");
        assert!(kept[1].decoy);
    }

    /// 100 targets and 100 decoys: 40 targets, then 60 alternating
    /// decoy/target pairs, then the remaining 40 decoys
    fn interleaved() -> Vec<Psm> {
        let mut psms = Vec::new();
        let mut score = 1000.0;
        let mut push = |decoy: bool| {
            let id = psms.len();
            psms.push(psm(id, decoy, id, &format!("PEP{}", id), score));
            score -= 1.0;
        };
        (0..40).for_each(|_| push(false));
        (0..60).for_each(|_| {
            push(true);
            push(false);
        });
        (0..40).for_each(|_| push(true));
        psms
    }

    #[test]
    fn interleaved_decoys() {
        let (psms, calibration) = Calibrator::new(Mode::None, 0.05).calibrate(interleaved());
        assert_eq!(calibration.pi0, 1.0);
        assert_eq!(calibration.targets, 100);
        assert_eq!(calibration.decoys, 100);
        // q = j / (40 + j) for the j-th interleaved target: 1/41, 2/42 pass
        assert_eq!(calibration.passing, 42);

        assert!(psms.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(psms.windows(2).all(|w| w[0].q_value <= w[1].q_value));
        assert!(psms
            .windows(2)
            .all(|w| w[0].posterior_error <= w[1].posterior_error + 1e-12));
        assert!(psms
            .iter()
            .all(|psm| (0.0..=1.0).contains(&psm.posterior_error)));
    }

    #[test]
    fn calibration_modes() {
        let mut psms = interleaved();
        // A second, weaker target match to each of the first ten spectra
        for i in 0..10 {
            let mut weaker = psms[i].clone();
            weaker.id = format!("dup{:03}", i);
            weaker.score -= 0.5;
            psms.push(weaker);
        }

        let (kept, calibration) =
            Calibrator::new(Mode::TargetDecoyCompetition, 0.05).calibrate(psms.clone());
        assert_eq!(kept.len(), 200);
        assert_eq!(calibration.passing, 42);

        let (kept, calibration) = Calibrator::new(Mode::None, 0.05).calibrate(psms);
        assert_eq!(kept.len(), 210);
        assert_eq!(calibration.targets, 110);
    }

    #[test]
    fn calibration_is_idempotent() {
        let calibrator = Calibrator::new(Mode::PeptideRedundancy, 0.05);
        let (once, a) = calibrator.calibrate(interleaved());
        let (twice, b) = calibrator.calibrate(once.clone());
        assert_eq!(a, b);
        assert_eq!(once, twice);
    }
}
