use super::input::{ProteinDatabase, Settings};
use super::pin::{self, PinFile};
use anyhow::{bail, ensure, Context};
use fnv::FnvHashSet;
use log::info;
use pepcal_core::enzyme::Digester;
use pepcal_core::fdr::{Calibration, Calibrator, Mode, Psm};
use pepcal_core::ml::cross_validation::{self, CrossValidation, IterationReport, TrainedModel};
use pepcal_core::ml::direction::{DefaultFeature, Direction, WeightVector};
use pepcal_core::ml::normalize::Normalizer;
use pepcal_core::protein::{ProteinFdr, ProteinFdrEstimate, ProteinIndex};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub settings: Settings,
    start: Instant,
}

/// Everything reported in `results.json`
#[derive(Serialize)]
pub struct Summary {
    pub settings: Settings,
    pub training: TrainingSummary,
    pub psms: Calibration,
    pub peptides: Option<Calibration>,
    pub protein_fdr: Option<ProteinFdrEstimate>,
}

#[derive(Serialize)]
pub struct TrainingSummary {
    pub initial_direction: String,
    pub passing: usize,
    pub history: Vec<IterationReport>,
    /// Results were scored by the initial direction instead of the trained model
    pub fallback: bool,
}

/// Calibrated results of a run, best first
pub struct Calibrated {
    pub psms: Vec<Psm>,
    pub psm_calibration: Calibration,
    pub peptides: Option<(Vec<Psm>, Calibration)>,
}

impl Runner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            start: Instant::now(),
        }
    }

    pub fn make_path<S: AsRef<str>>(&self, name: S) -> PathBuf {
        self.settings.output_directory.join(name.as_ref())
    }

    fn read_pin(&self) -> anyhow::Result<PinFile> {
        let start = Instant::now();
        let path = &self.settings.pin_path;
        let file =
            std::fs::File::open(path).with_context(|| format!("Failed to open `{}`", path))?;
        let pin = pin::read_pin(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse `{}`", path))?;

        let decoys = pin.rows.iter().filter(|row| row.decoy).count();
        info!(
            "read {} PSMs ({} targets, {} decoys) with {} features in {}ms",
            pin.rows.len(),
            pin.rows.len() - decoys,
            decoys,
            pin.feature_names.len(),
            start.elapsed().as_millis()
        );
        Ok(pin)
    }

    /// Pick the ranking used to seed training: configured weights, then a
    /// configured feature, then the PIN default direction, and finally the
    /// single best feature
    fn initial_direction(
        &self,
        pin: &PinFile,
        features: &pepcal_core::ml::matrix::Matrix,
        decoys: &[bool],
    ) -> anyhow::Result<(Box<dyn Direction>, String)> {
        let n = pin.feature_names.len();
        let weights = |weights: &[f64], source: &str| -> anyhow::Result<Box<dyn Direction>> {
            ensure!(
                weights.len() == n || weights.len() == n + 1,
                "{} has {} weights, expected {} (or {} with a bias)",
                source,
                weights.len(),
                n,
                n + 1
            );
            Ok(Box::new(WeightVector::new(weights.to_vec())))
        };

        if let Some(w) = &self.settings.initial_weights {
            return Ok((weights(w, "`initial_weights`")?, "initial_weights".into()));
        }
        if let Some(name) = &self.settings.default_direction {
            let feature = DefaultFeature::parse(name, &pin.feature_names)?;
            return Ok((Box::new(feature), name.clone()));
        }
        if let Some(w) = &pin.default_direction {
            return Ok((weights(w, "PIN default direction")?, "DefaultDirection".into()));
        }

        match DefaultFeature::best(features, decoys, self.settings.training.train_fdr) {
            Some((feature, passing)) => {
                let name = format!(
                    "{}{}",
                    if feature.negate { "-" } else { "" },
                    pin.feature_names[feature.index]
                );
                info!(
                    "- selected `{}` as initial direction: {} targets at q <= {}",
                    name, passing, self.settings.training.train_fdr
                );
                Ok((Box::new(feature), name))
            }
            None => bail!("no feature available to establish an initial direction"),
        }
    }

    /// Run the PSM-level, then peptide-level calibration over trained scores
    pub fn calibrate(&self, psms: Vec<Psm>) -> Calibrated {
        let calibration = self.settings.calibration;
        let mode = match calibration.tdc {
            true => Mode::TargetDecoyCompetition,
            false => Mode::None,
        };

        info!("calibrating PSMs");
        let (psms, psm_calibration) = Calibrator::new(mode, calibration.test_fdr).calibrate(psms);

        let peptides = match calibration.psm_only {
            true => None,
            false => {
                info!("calibrating peptides");
                Some(
                    Calibrator::new(Mode::PeptideRedundancy, calibration.test_fdr)
                        .calibrate(psms.clone()),
                )
            }
        };

        Calibrated {
            psms,
            psm_calibration,
            peptides,
        }
    }

    fn protein_fdr(&self, confident: &[Psm]) -> anyhow::Result<Option<ProteinFdrEstimate>> {
        let settings = match &self.settings.protein_fdr {
            Some(settings) => settings,
            None => return Ok(None),
        };
        let start = Instant::now();
        let parameters = &settings.parameters;
        let digester = Digester::new(parameters.digest.clone())?;

        let read = |path: &str| {
            pepcal_core::read_fasta(path).with_context(|| format!("Failed to read `{}`", path))
        };
        let index = match &settings.database {
            ProteinDatabase::Combined { fasta } => {
                ProteinIndex::from_combined(read(fasta.as_str())?, &parameters.decoy_tag, &digester)?
            }
            ProteinDatabase::Separate { targets, decoys } => {
                ProteinIndex::new(read(targets.as_str())?, read(decoys.as_str())?, &digester)?
            }
        };

        let threshold = self.settings.calibration.test_fdr;
        let mut targets = FnvHashSet::default();
        let mut decoys = FnvHashSet::default();
        for psm in confident.iter().filter(|psm| psm.q_value <= threshold) {
            let set = match psm.decoy {
                true => &mut decoys,
                false => &mut targets,
            };
            set.extend(psm.proteins.iter().cloned());
        }
        info!(
            "- {} target and {} decoy proteins identified at q <= {}",
            targets.len(),
            decoys.len(),
            threshold
        );

        let estimate =
            ProteinFdr::new(&index, parameters.bins, parameters.binning).estimate(&targets, &decoys);
        match estimate.fdr() {
            Some(fdr) => info!("- estimated protein FDR: {:.6}", fdr),
            None => log::warn!("- protein FDR could not be estimated"),
        }
        info!("- protein FDR: {:8} ms", start.elapsed().as_millis());
        Ok(Some(estimate))
    }

    pub fn run(mut self) -> anyhow::Result<Summary> {
        let pin = self.read_pin()?;
        let decoys = pin.decoys();
        let n_decoys = decoys.iter().filter(|&&d| d).count();
        cross_validation::check_training_size(
            decoys.len() - n_decoys,
            n_decoys,
            pin.feature_names.len(),
        );

        let mut features = pin.features.clone();
        let normalizer = Normalizer::fit(&features, self.settings.normalization);
        normalizer.normalize(&mut features);

        let (initial, initial_name) = self.initial_direction(&pin, &features, &decoys)?;

        let start = Instant::now();
        info!("training on {} examples", features.rows);
        let model = CrossValidation::new(&self.settings.training, &features, &decoys)?
            .train(initial.as_ref());
        info!("- training: {:8} ms", start.elapsed().as_millis());

        let psms = pin
            .rows
            .iter()
            .zip(&model.scores)
            .map(|(row, score)| row.to_psm(*score))
            .collect::<Vec<_>>();
        let calibrated = self.calibrate(psms);

        info!(
            "discovered {} target peptide-spectrum matches at q <= {}",
            calibrated.psm_calibration.passing, self.settings.calibration.test_fdr
        );
        if let Some((_, peptides)) = &calibrated.peptides {
            info!(
                "discovered {} target peptides at q <= {}",
                peptides.passing, self.settings.calibration.test_fdr
            );
        }

        let confident = match &calibrated.peptides {
            Some((peptides, _)) => peptides,
            None => &calibrated.psms,
        };
        let protein_fdr = self.protein_fdr(confident)?;

        log::trace!("writing outputs");
        let path = self.write_psms("results.psms.tsv", &calibrated.psms)?;
        self.settings.output_paths.push(path);
        if let Some((peptides, _)) = &calibrated.peptides {
            let path = self.write_psms("results.peptides.tsv", peptides)?;
            self.settings.output_paths.push(path);
        }
        let path = self.write_weights(&model, &normalizer, &pin.feature_names)?;
        self.settings.output_paths.push(path);

        let path = self.make_path("results.json");
        self.settings.output_paths.push(path.display().to_string());

        let TrainedModel {
            passing,
            history,
            fallback,
            ..
        } = model;
        let summary = Summary {
            settings: self.settings,
            training: TrainingSummary {
                initial_direction: initial_name,
                passing,
                history,
                fallback,
            },
            psms: calibrated.psm_calibration,
            peptides: calibrated.peptides.map(|(_, calibration)| calibration),
            protein_fdr,
        };

        let bytes = serde_json::to_vec_pretty(&summary)?;
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write `{}`", path.display()))?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(summary)
    }
}
