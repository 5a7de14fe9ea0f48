use anyhow::{bail, ensure, Context};
use clap::ArgMatches;
use pepcal_core::ml::cross_validation;
use pepcal_core::ml::normalize::Normalization;
use pepcal_core::protein;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual run settings - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub training: cross_validation::Parameters,
    pub calibration: CalibrationSettings,
    pub protein_fdr: Option<ProteinFdrSettings>,
    pub normalization: Normalization,
    pub default_direction: Option<String>,
    pub initial_weights: Option<Vec<f64>>,
    pub pin_path: String,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
pub struct CalibrationSettings {
    /// Target-decoy competition on PSMs sharing a spectrum
    pub tdc: bool,
    /// Skip peptide-level reporting
    pub psm_only: bool,
    /// Reporting threshold
    pub test_fdr: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProteinDatabase {
    Separate { targets: String, decoys: String },
    Combined { fasta: String },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProteinFdrSettings {
    pub parameters: protein::Parameters,
    pub database: ProteinDatabase,
}

#[derive(Deserialize, Serialize, Default, Clone, Debug)]
pub struct CalibrationOptions {
    pub tdc: Option<bool>,
    pub psm_only: Option<bool>,
    pub test_fdr: Option<f64>,
}

#[derive(Deserialize, Serialize, Default, Clone, Debug)]
pub struct ProteinFdrOptions {
    #[serde(flatten)]
    pub builder: protein::Builder,
    pub target_fasta: Option<String>,
    pub decoy_fasta: Option<String>,
    /// Combined target/decoy database, split by `decoy_tag`
    pub fasta: Option<String>,
}

impl ProteinFdrOptions {
    fn database(&self) -> anyhow::Result<ProteinDatabase> {
        match (&self.fasta, &self.target_fasta, &self.decoy_fasta) {
            (Some(fasta), None, None) => Ok(ProteinDatabase::Combined {
                fasta: fasta.clone(),
            }),
            (None, Some(targets), Some(decoys)) => Ok(ProteinDatabase::Separate {
                targets: targets.clone(),
                decoys: decoys.clone(),
            }),
            (None, None, None) => bail!(
                "`protein_fdr` requires either `fasta`, or both `target_fasta` and `decoy_fasta`"
            ),
            (Some(_), _, _) => {
                bail!("`protein_fdr.fasta` cannot be combined with `target_fasta`/`decoy_fasta`")
            }
            _ => bail!("`protein_fdr` requires both `target_fasta` and `decoy_fasta`"),
        }
    }
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    training: Option<cross_validation::Builder>,
    calibration: Option<CalibrationOptions>,
    protein_fdr: Option<ProteinFdrOptions>,
    normalization: Option<Normalization>,
    /// Feature name to rank by before training, `-name` to negate it
    default_direction: Option<String>,
    initial_weights: Option<Vec<f64>>,
    pin_path: Option<String>,
    output_directory: Option<String>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let mut input = match matches.get_one::<String>("parameters") {
            Some(path) => Input::load(path)
                .with_context(|| format!("Failed to read parameters from `{path}`"))?,
            None => Input::default(),
        };

        // Handle JSON configuration overrides
        if let Some(pin_path) = matches.get_one::<String>("pin_path") {
            log::trace!("overriding `pin_path` parameter.");
            input.pin_path = Some(pin_path.into());
        }
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }

        let training = input.training.get_or_insert_with(Default::default);
        if let Some(seed) = matches.get_one::<u64>("seed") {
            log::trace!("overriding `training.seed` parameter.");
            training.seed = Some(*seed);
        }
        if let Some(cpos) = matches.get_one::<f64>("cpos") {
            log::trace!("overriding `training.cpos` parameter.");
            training.cpos = Some(*cpos);
        }
        if let Some(cneg) = matches.get_one::<f64>("cneg") {
            log::trace!("overriding `training.cneg` parameter.");
            training.cneg = Some(*cneg);
        }
        if matches.get_flag("report-each-iteration") {
            training.report_each_iteration = Some(true);
        }
        if matches.get_flag("quick-validation") {
            training.quick_validation = Some(true);
        }
        if matches.get_flag("override") {
            training.override_check = Some(true);
        }

        let calibration = input.calibration.get_or_insert_with(Default::default);
        if matches.get_flag("tdc") {
            calibration.tdc = Some(true);
        }
        if matches.get_flag("psm-only") {
            calibration.psm_only = Some(true);
        }

        ensure!(
            input.pin_path.is_some(),
            "`pin_path` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        pepcal_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        let training = self.training.unwrap_or_default().make_parameters()?;

        let calibration = self.calibration.unwrap_or_default();
        let calibration = CalibrationSettings {
            tdc: calibration.tdc.unwrap_or(false),
            psm_only: calibration.psm_only.unwrap_or(false),
            test_fdr: calibration.test_fdr.unwrap_or(training.test_fdr),
        };
        ensure!(
            calibration.test_fdr > 0.0 && calibration.test_fdr <= 1.0,
            "`calibration.test_fdr` must be in (0, 1], got {}",
            calibration.test_fdr
        );

        let protein_fdr = match self.protein_fdr {
            Some(options) => {
                ensure!(
                    !calibration.psm_only,
                    "`psm_only` and `protein_fdr` are mutually exclusive: protein FDR is estimated from peptide-level results"
                );
                let database = options.database()?;
                Some(ProteinFdrSettings {
                    parameters: options.builder.make_parameters()?,
                    database,
                })
            }
            None => None,
        };

        if self.default_direction.is_some() && self.initial_weights.is_some() {
            log::warn!("both `default_direction` and `initial_weights` are set: using `initial_weights`");
        }

        let pin_path = match self.pin_path {
            Some(path) => path,
            None => bail!("`pin_path` must be set"),
        };

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            training,
            calibration,
            protein_fdr,
            normalization: self.normalization.unwrap_or_default(),
            default_direction: self.default_direction,
            initial_weights: self.initial_weights,
            pin_path,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input(json: &str) -> Input {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults() {
        let settings = input(r#"{ "pin_path": "x.pin", "output_directory": "." }"#)
            .build()
            .unwrap();
        assert!(!settings.calibration.tdc);
        assert!(!settings.calibration.psm_only);
        assert_eq!(settings.calibration.test_fdr, 0.01);
        assert_eq!(settings.training.folds, 3);
        assert_eq!(settings.normalization, Normalization::Standard);
        assert!(settings.protein_fdr.is_none());
        assert!(!settings.training.override_check);
        assert!(!settings.training.quick_validation);
    }

    #[test]
    fn training_switches() {
        let settings = input(
            r#"{
                "pin_path": "x.pin",
                "output_directory": ".",
                "training": { "override": true, "quick_validation": true }
            }"#,
        )
        .build()
        .unwrap();
        assert!(settings.training.override_check);
        assert!(settings.training.quick_validation);
    }

    #[test]
    fn protein_fdr_sections() {
        let settings = input(
            r#"{
                "pin_path": "x.pin",
                "output_directory": ".",
                "protein_fdr": {
                    "fasta": "db.fasta",
                    "decoy_tag": "rev_",
                    "bins": 5,
                    "binning": "equal_width",
                    "digest": { "missed_cleavages": 1, "mass_table": "average" }
                }
            }"#,
        )
        .build()
        .unwrap();
        let protein = settings.protein_fdr.unwrap();
        assert_eq!(
            protein.database,
            ProteinDatabase::Combined {
                fasta: "db.fasta".into()
            }
        );
        assert_eq!(protein.parameters.bins, 5);
        assert_eq!(protein.parameters.decoy_tag, "rev_");
        assert_eq!(protein.parameters.binning, protein::Binning::EqualWidth);
        assert_eq!(protein.parameters.digest.missed_cleavages, 1);
    }

    #[test]
    fn configuration_errors() {
        let bad = [
            r#"{ "pin_path": "x.pin", "output_directory": ".",
                 "calibration": { "psm_only": true },
                 "protein_fdr": { "fasta": "db.fasta" } }"#,
            r#"{ "pin_path": "x.pin", "output_directory": ".",
                 "protein_fdr": { "target_fasta": "t.fasta" } }"#,
            r#"{ "pin_path": "x.pin", "output_directory": ".",
                 "protein_fdr": { "fasta": "db.fasta", "target_fasta": "t.fasta" } }"#,
            r#"{ "pin_path": "x.pin", "output_directory": ".",
                 "training": { "train_fdr": 2.0 } }"#,
            r#"{ "pin_path": "x.pin", "output_directory": ".",
                 "calibration": { "test_fdr": 0.0 } }"#,
            r#"{ "output_directory": "." }"#,
        ];
        for json in bad {
            assert!(input(json).build().is_err(), "{}", json);
        }
    }
}
