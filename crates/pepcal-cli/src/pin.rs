//! Reader for tab-delimited percolator input (PIN) files:
//!
//! `SpecId  Label  ScanNr  <features...>  Peptide  Proteins...`
//!
//! An optional second row with the id `DefaultDirection` holds initial
//! feature weights.

use anyhow::{bail, ensure, Context};
use pepcal_core::fdr::Psm;
use pepcal_core::ml::matrix::Matrix;
use std::io::Read;

pub struct PinRow {
    pub id: String,
    pub decoy: bool,
    pub scan: String,
    pub peptide: String,
    pub proteins: Vec<String>,
}

impl PinRow {
    pub fn to_psm(&self, score: f64) -> Psm {
        Psm::new(
            self.id.clone(),
            self.decoy,
            self.scan.clone(),
            self.peptide.clone(),
            self.proteins.clone(),
            score,
        )
    }
}

pub struct PinFile {
    pub feature_names: Vec<String>,
    pub default_direction: Option<Vec<f64>>,
    pub rows: Vec<PinRow>,
    pub features: Matrix,
}

impl PinFile {
    pub fn decoys(&self) -> Vec<bool> {
        self.rows.iter().map(|row| row.decoy).collect()
    }
}

/// Strip flanking residues: `K.PEPTIDE.R` -> `PEPTIDE`
fn strip_flanks(peptide: &str) -> &str {
    let bytes = peptide.as_bytes();
    let n = bytes.len();
    if n > 4 && bytes[1] == b'.' && bytes[n - 2] == b'.' {
        &peptide[2..n - 2]
    } else {
        peptide
    }
}

pub fn read_pin<R: Read>(reader: R) -> anyhow::Result<PinFile> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read PIN header")?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .with_context(|| format!("PIN header is missing the `{}` column", name))
    };
    let id_col = column("SpecId").or_else(|_| column("PSMId"))?;
    let label_col = column("Label")?;
    let scan_col = column("ScanNr")?;
    let peptide_col = column("Peptide")?;
    ensure!(
        id_col < label_col && label_col < scan_col && scan_col < peptide_col,
        "PIN columns must be ordered `SpecId Label ScanNr <features...> Peptide Proteins`"
    );
    let proteins_col = peptide_col + 1;

    let feature_cols = scan_col + 1..peptide_col;
    let feature_names = headers
        .iter()
        .skip(feature_cols.start)
        .take(feature_cols.len())
        .map(String::from)
        .collect::<Vec<_>>();
    ensure!(!feature_names.is_empty(), "PIN file has no feature columns");

    let mut default_direction = None;
    let mut rows = Vec::new();
    let mut data = Vec::new();
    for (ix, record) in rdr.records().enumerate() {
        // header is line 1
        let line = ix + 2;
        let record = record.with_context(|| format!("Failed to read PIN line {}", line))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let id = record.get(id_col).unwrap_or_default();
        if id.eq_ignore_ascii_case("DefaultDirection") {
            let weights = feature_cols
                .clone()
                .map(|col| {
                    record
                        .get(col)
                        .unwrap_or_default()
                        .trim()
                        .parse::<f64>()
                        .with_context(|| {
                            format!("Invalid default direction weight on line {}", line)
                        })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            default_direction = Some(weights);
            continue;
        }

        ensure!(
            record.len() >= proteins_col,
            "PIN line {} has {} fields, expected at least {}",
            line,
            record.len(),
            proteins_col
        );

        let decoy = match record.get(label_col).map(str::trim) {
            Some("1") | Some("+1") => false,
            Some("-1") => true,
            Some(label) => bail!("Invalid label `{}` on PIN line {}", label, line),
            None => bail!("Missing label on PIN line {}", line),
        };

        for (col, name) in feature_cols.clone().zip(&feature_names) {
            let value = record.get(col).unwrap_or_default().trim();
            let x = value.parse::<f64>().with_context(|| {
                format!("Invalid value `{}` for feature `{}` on line {}", value, name, line)
            })?;
            ensure!(
                x.is_finite(),
                "Non-finite value for feature `{}` on line {}",
                name,
                line
            );
            data.push(x);
        }

        rows.push(PinRow {
            id: id.into(),
            decoy,
            scan: record.get(scan_col).unwrap_or_default().trim().into(),
            peptide: strip_flanks(record.get(peptide_col).unwrap_or_default().trim()).into(),
            proteins: record
                .iter()
                .skip(proteins_col)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
        });
    }

    ensure!(!rows.is_empty(), "PIN file contains no PSMs");
    let features = Matrix::new(data, rows.len(), feature_names.len());
    Ok(PinFile {
        feature_names,
        default_direction,
        rows,
        features,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const PIN: &str = "SpecId\tLabel\tScanNr\tlnrSp\tdeltCn\tPeptide\tProteins\n\
        DefaultDirection\t-\t-\t0.5\t1.0\n\
        psm1\t1\t10\t-1.2\t0.3\tK.PEPTIDEK.A\tsp|P1\tsp|P2\n\
        psm2\t-1\t10\t-3.5\t0.1\tR.EDITPEPK.-\trandom_sp|P1\n\
        psm3\t1\t11\t0.0\t0.9\tLESLIEK\tsp|P3\n";

    #[test]
    fn read() {
        let pin = read_pin(PIN.as_bytes()).unwrap();
        assert_eq!(pin.feature_names, vec!["lnrSp", "deltCn"]);
        assert_eq!(pin.default_direction, Some(vec![0.5, 1.0]));
        assert_eq!(pin.rows.len(), 3);
        assert_eq!(pin.decoys(), vec![false, true, false]);
        assert_eq!(pin.features.row(1), &[-3.5, 0.1]);

        let psm = pin.rows[0].to_psm(2.0);
        assert_eq!(psm.peptide, "PEPTIDEK");
        assert_eq!(psm.spectrum, "10");
        assert_eq!(psm.proteins, vec!["sp|P1", "sp|P2"]);
        assert_eq!(pin.rows[2].peptide, "LESLIEK");
    }

    #[test]
    fn malformed() {
        let bad_label = "SpecId\tLabel\tScanNr\tf\tPeptide\tProteins\npsm1\t0\t1\t1.0\tPEPK\tP1\n";
        let err = read_pin(bad_label.as_bytes()).err().unwrap();
        assert!(err.to_string().contains("line 2"));

        let bad_value = "SpecId\tLabel\tScanNr\tf\tPeptide\tProteins\npsm1\t1\t1\tabc\tPEPK\tP1\n";
        assert!(read_pin(bad_value.as_bytes()).is_err());

        let no_features = "SpecId\tLabel\tScanNr\tPeptide\tProteins\npsm1\t1\t1\tPEPK\tP1\n";
        assert!(read_pin(no_features.as_bytes()).is_err());

        let empty = "SpecId\tLabel\tScanNr\tf\tPeptide\tProteins\n";
        assert!(read_pin(empty.as_bytes()).is_err());
    }
}
