use serde::{Deserialize, Serialize};

pub const PROTON: f64 = 1.0072764;

pub const H2O_MONOISOTOPIC: f64 = 18.010565;
pub const H2O_AVERAGE: f64 = 18.01528;

/// Residue masses used when screening in-silico peptides
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MassTable {
    #[default]
    Monoisotopic,
    Average,
}

impl MassTable {
    pub fn residue(&self, aa: u8) -> Option<f64> {
        match self {
            MassTable::Monoisotopic => monoisotopic(aa),
            MassTable::Average => average(aa),
        }
    }

    pub fn water(&self) -> f64 {
        match self {
            MassTable::Monoisotopic => H2O_MONOISOTOPIC,
            MassTable::Average => H2O_AVERAGE,
        }
    }

    /// Sum of residue masses, one water and `charge` protons. Returns `None`
    /// if any residue has no mass in this table
    pub fn peptide_mass(&self, sequence: &str, charge: u8) -> Option<f64> {
        let residues = sequence
            .bytes()
            .map(|aa| self.residue(aa))
            .sum::<Option<f64>>()?;
        Some(residues + self.water() + charge as f64 * PROTON)
    }
}

fn monoisotopic(aa: u8) -> Option<f64> {
    let mass = match aa {
        b'A' => 71.0371136,
        b'R' => 156.1011106,
        b'N' => 114.0429272,
        b'D' => 115.0269428,
        b'C' => 103.0091854,
        b'E' => 129.0425928,
        b'Q' => 128.0585772,
        b'G' => 57.0214636,
        b'H' => 137.0589116,
        b'I' => 113.0840636,
        b'L' => 113.0840636,
        b'K' => 128.0949626,
        b'M' => 131.0404854,
        b'F' => 147.0684136,
        b'P' => 97.0527636,
        b'S' => 87.0320282,
        b'T' => 101.0476782,
        b'W' => 186.07931,
        b'Y' => 163.06333,
        b'V' => 99.0684136,
        b'U' => 150.95363,
        b'O' => 237.14773,
        _ => return None,
    };
    Some(mass)
}

fn average(aa: u8) -> Option<f64> {
    let mass = match aa {
        b'G' => 57.05192,
        b'A' => 71.07880,
        b'S' => 87.07820,
        b'P' => 97.11668,
        b'V' => 99.13256,
        b'T' => 101.10508,
        b'C' => 103.13880,
        b'L' | b'I' | b'X' => 113.15944,
        b'N' => 114.10384,
        b'O' => 114.14720,
        b'B' => 114.59622,
        b'D' => 115.08860,
        b'Q' => 128.13072,
        b'K' => 128.17408,
        b'Z' => 128.62310,
        b'E' => 129.11548,
        b'M' => 131.19256,
        b'H' => 137.14108,
        b'F' => 147.17656,
        b'R' => 156.18748,
        b'Y' => 163.17596,
        b'W' => 186.21320,
        _ => return None,
    };
    Some(mass)
}
