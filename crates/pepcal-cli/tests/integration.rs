use pepcal_cli::input::Input;
use pepcal_cli::runner::Runner;
use pepcal_core::fdr::{Calibrator, Mode};
use pepcal_core::ml::cross_validation::Builder;
use pepcal_core::ml::cross_validation::CrossValidation;
use pepcal_core::ml::direction::DefaultFeature;
use pepcal_core::ml::matrix::Matrix;
use pepcal_core::ml::normalize::{Normalization, Normalizer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::PathBuf;

const ALPHABET: &[u8] = b"ACDEFGHILMNQSTVWY";
const PROTEINS: usize = 40;

fn protein(i: usize) -> String {
    let mut sequence = String::from("M");
    for j in 0..5 + i % 10 {
        for k in 0..6 {
            sequence.push(ALPHABET[(i * 31 + j * 7 + k * 3) % ALPHABET.len()] as char);
        }
        sequence.push('K');
    }
    sequence
}

fn fasta() -> String {
    let mut fasta = String::new();
    for i in 0..PROTEINS {
        let target = protein(i);
        let decoy = target.chars().rev().collect::<String>();
        writeln!(fasta, ">sp|T{} target protein {}\n{}", i, i, target).unwrap();
        writeln!(fasta, ">rev_sp|T{} decoy protein {}\n{}", i, i, decoy).unwrap();
    }
    fasta
}

/// 300 targets (200 of them correct) and 300 decoys. `strong` separates
/// correct targets, `weak` barely does, `noise` never does
fn synthetic() -> (Vec<(String, bool, usize, String, String)>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(17);
    let mut rows = Vec::new();
    let mut features = Vec::new();
    for i in 0..600 {
        let decoy = i % 2 == 1;
        let correct = !decoy && i % 3 != 0;
        let mut strong = rng.gen_range(0.0..2.0);
        let mut weak = rng.gen_range(0.0..2.0);
        let noise: f64 = rng.gen();
        if correct {
            strong += 3.0;
            weak += 0.5;
        }
        features.extend([strong, weak, noise]);
        let protein = match decoy {
            true => format!("rev_sp|T{}", i % PROTEINS),
            false => format!("sp|T{}", i % PROTEINS),
        };
        rows.push((format!("psm{}", i), decoy, i / 2, format!("PEPTIDE{}K", i), protein));
    }
    (rows, features)
}

fn pin() -> String {
    let (rows, features) = synthetic();
    let mut pin = String::from("SpecId\tLabel\tScanNr\tstrong\tweak\tnoise\tPeptide\tProteins\n");
    for (ix, (id, decoy, scan, peptide, protein)) in rows.iter().enumerate() {
        let x = &features[ix * 3..ix * 3 + 3];
        writeln!(
            pin,
            "{}\t{}\t{}\t{}\t{}\t{}\t-.{}.-\t{}",
            id,
            if *decoy { -1 } else { 1 },
            scan,
            x[0],
            x[1],
            x[2],
            peptide,
            protein
        )
        .unwrap();
    }
    pin
}

fn workspace(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pepcal-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn core_pipeline() {
    let (rows, data) = synthetic();
    let decoys = rows.iter().map(|row| row.1).collect::<Vec<_>>();
    let mut features = Matrix::new(data, rows.len(), 3);
    Normalizer::fit(&features, Normalization::Standard).normalize(&mut features);

    let parameters = Builder {
        max_iterations: Some(3),
        ..Default::default()
    }
    .make_parameters()
    .unwrap();
    let initial = DefaultFeature {
        index: 1,
        negate: false,
    };
    let model = CrossValidation::new(&parameters, &features, &decoys)
        .unwrap()
        .train(&initial);
    assert!(model.passing >= 150, "{}", model.passing);

    let psms = rows
        .iter()
        .zip(&model.scores)
        .map(|((id, decoy, scan, peptide, protein), score)| {
            pepcal_core::fdr::Psm::new(
                id.clone(),
                *decoy,
                scan.to_string(),
                peptide.clone(),
                vec![protein.clone()],
                *score,
            )
        })
        .collect::<Vec<_>>();

    let (psms, calibration) = Calibrator::new(Mode::TargetDecoyCompetition, 0.01).calibrate(psms);
    // one PSM per scan survives
    assert_eq!(psms.len(), 300);
    assert_eq!(calibration.targets + calibration.decoys, 300);
    assert!(calibration.passing >= 150, "{}", calibration.passing);
    assert!(psms.windows(2).all(|w| w[0].q_value <= w[1].q_value));
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = workspace("integration");
    let pin_path = dir.join("synthetic.pin");
    let fasta_path = dir.join("db.fasta");
    let output = dir.join("out");
    std::fs::write(&pin_path, pin())?;
    std::fs::write(&fasta_path, fasta())?;

    let input: Input = serde_json::from_value(serde_json::json!({
        "pin_path": pin_path.display().to_string(),
        "output_directory": output.display().to_string(),
        "training": { "max_iterations": 3, "report_each_iteration": true },
        "protein_fdr": {
            "fasta": fasta_path.display().to_string(),
            "decoy_tag": "rev_",
            "bins": 4,
        },
    }))?;

    let summary = Runner::new(input.build()?).run()?;

    assert_eq!(summary.training.initial_direction, "strong");
    assert_eq!(summary.training.history.len(), 3);
    assert!(summary.training.passing >= 150, "{}", summary.training.passing);
    assert_eq!(summary.psms.targets, 300);
    assert!(summary.psms.passing >= 150);

    let peptides = summary.peptides.expect("peptide-level calibration");
    assert!(peptides.passing >= 150);

    let protein_fdr = summary.protein_fdr.expect("protein FDR estimate");
    assert_eq!(protein_fdr.bins.len(), 4);
    assert_eq!(
        protein_fdr.bins.iter().map(|bin| bin.candidates).sum::<usize>(),
        PROTEINS
    );

    assert_eq!(summary.settings.output_paths.len(), 4);
    for path in &summary.settings.output_paths {
        assert!(std::path::Path::new(path).exists(), "{}", path);
    }

    let psms = std::fs::read_to_string(output.join("results.psms.tsv"))?;
    let header = psms.lines().next().unwrap_or_default();
    assert_eq!(
        header,
        "PSMId\tlabel\tscore\tq-value\tposterior_error_prob\tpeptide\tproteinIds"
    );
    assert_eq!(psms.lines().count(), 601);

    let weights = std::fs::read_to_string(output.join("weights.tsv"))?;
    assert_eq!(weights.lines().count(), 1 + 2 * 3);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn psm_only_with_tdc() -> anyhow::Result<()> {
    let dir = workspace("tdc");
    let pin_path = dir.join("synthetic.pin");
    std::fs::write(&pin_path, pin())?;

    let input: Input = serde_json::from_value(serde_json::json!({
        "pin_path": pin_path.display().to_string(),
        "output_directory": dir.join("out").display().to_string(),
        "default_direction": "weak",
        "calibration": { "tdc": true, "psm_only": true },
        "training": { "max_iterations": 2, "cpos": 1.0, "cneg": 1.0 },
    }))?;
    let summary = Runner::new(input.build()?).run()?;

    assert_eq!(summary.training.initial_direction, "weak");
    assert!(summary.peptides.is_none());
    assert!(summary.protein_fdr.is_none());
    assert_eq!(summary.psms.targets + summary.psms.decoys, 300);
    assert_eq!(summary.settings.output_paths.len(), 3);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
