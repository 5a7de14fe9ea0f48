//! In-silico digestion of protein sequences, used to derive a length proxy
//! (the number of distinct, mass-filtered peptides a protein can produce)

use crate::mass::MassTable;
use crate::Error;
use fnv::FnvHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ops::Range;

/// Marks the C-terminus of a protein sequence
pub const TERMINATOR: char = '*';

const VALID_AA: &[u8] = b"ACDEFGHIKLMNPQRSTVWYUO";

pub struct Enzyme {
    // Skip cleaving if the site is followed by this residue
    skip_suffix: Option<char>,
    // Regex for matching cleavage sites
    regex: Regex,
    c_terminal: bool,
}

impl Enzyme {
    pub fn new(cleave: &str, skip_suffix: Option<char>, c_terminal: bool) -> Result<Self, Error> {
        if cleave.is_empty() || !cleave.bytes().all(|aa| VALID_AA.contains(&aa)) {
            return Err(Error::Config(format!(
                "enzyme cleavage residues must be amino acids: `{}`",
                cleave
            )));
        }
        if let Some(skip) = skip_suffix {
            if !skip.is_ascii() || !VALID_AA.contains(&(skip as u8)) {
                return Err(Error::Config(format!(
                    "enzyme cleavage restriction must be an amino acid: `{}`",
                    skip
                )));
            }
        }
        let regex = Regex::new(&format!("[{}]", cleave)).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Enzyme {
            skip_suffix,
            regex,
            c_terminal,
        })
    }

    fn cleavage_sites(&self, sequence: &str) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut left = 0;
        for mat in self.regex.find_iter(sequence) {
            let right = match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            };
            if let Some(skip) = self.skip_suffix {
                if right < sequence.len() && sequence[right..].starts_with(skip) {
                    continue;
                }
            }
            ranges.push(left..right);
            left = right;
        }
        ranges.push(left..sequence.len());
        ranges.retain(|range| !range.is_empty());
        ranges
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct DigestBuilder {
    /// How many internal cleavage sites a peptide may span
    pub missed_cleavages: Option<u8>,
    /// Minimum peptide length, inclusive
    pub min_len: Option<usize>,
    /// Maximum peptide length, inclusive
    pub max_len: Option<usize>,
    /// Minimum peptide mass, inclusive
    pub min_mass: Option<f64>,
    /// Maximum peptide mass, inclusive
    pub max_mass: Option<f64>,
    /// Number of protons added to the neutral peptide mass
    pub charge: Option<u8>,
    pub mass_table: Option<MassTable>,
    pub cleave_at: Option<String>,
    pub restrict: Option<char>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DigestParameters {
    pub missed_cleavages: u8,
    pub min_len: usize,
    pub max_len: usize,
    pub min_mass: f64,
    pub max_mass: f64,
    pub charge: u8,
    pub mass_table: MassTable,
    pub cleave_at: String,
    pub restrict: Option<char>,
}

impl DigestBuilder {
    pub fn make_parameters(self) -> Result<DigestParameters, Error> {
        let parameters = DigestParameters {
            missed_cleavages: self.missed_cleavages.unwrap_or(0),
            min_len: self.min_len.unwrap_or(4),
            max_len: self.max_len.unwrap_or(40),
            min_mass: self.min_mass.unwrap_or(400.0),
            max_mass: self.max_mass.unwrap_or(6000.0),
            charge: self.charge.unwrap_or(1),
            mass_table: self.mass_table.unwrap_or_default(),
            cleave_at: self.cleave_at.unwrap_or_else(|| "KR".into()),
            restrict: self.restrict.or(Some('P')),
        };

        if parameters.min_len > parameters.max_len {
            return Err(Error::Config(format!(
                "`min_len` ({}) is greater than `max_len` ({})",
                parameters.min_len, parameters.max_len
            )));
        }
        if !(parameters.min_mass >= 0.0 && parameters.min_mass <= parameters.max_mass) {
            return Err(Error::Config(format!(
                "peptide mass window [{}, {}] is invalid",
                parameters.min_mass, parameters.max_mass
            )));
        }
        Ok(parameters)
    }
}

pub struct Digester {
    pub parameters: DigestParameters,
    enzyme: Enzyme,
}

impl Digester {
    pub fn new(parameters: DigestParameters) -> Result<Self, Error> {
        let enzyme = Enzyme::new(&parameters.cleave_at, parameters.restrict, true)?;
        Ok(Digester { parameters, enzyme })
    }

    /// Every distinct peptide bounded by cleavage sites (or sequence ends)
    /// that passes the length and mass filters, in order of discovery
    pub fn digest(&self, sequence: &str) -> Vec<String> {
        let sequence = terminate(sequence);
        let mut peptides = Vec::new();
        // Same peptide can occur multiple times in a protein
        let mut seen = FnvHashSet::default();

        for segment in sequence.split(TERMINATOR).filter(|s| !s.is_empty()) {
            let sites = self.enzyme.cleavage_sites(segment);
            for cleavage in 1..=(1 + self.parameters.missed_cleavages as usize) {
                for win in sites.windows(cleavage) {
                    let peptide = match segment.get(win[0].start..win[cleavage - 1].end) {
                        Some(peptide) => peptide,
                        None => continue,
                    };
                    if self.accept(peptide) && seen.insert(peptide) {
                        peptides.push(peptide.to_string());
                    }
                }
            }
        }
        peptides
    }

    /// Number of distinct peptides retained by [`Digester::digest`]
    pub fn length_proxy(&self, sequence: &str) -> usize {
        self.digest(sequence).len()
    }

    fn accept(&self, peptide: &str) -> bool {
        let p = &self.parameters;
        if peptide.len() < p.min_len.max(1) || peptide.len() > p.max_len {
            return false;
        }
        match p.mass_table.peptide_mass(peptide, p.charge) {
            Some(mass) => mass >= p.min_mass && mass <= p.max_mass,
            None => false,
        }
    }
}

/// Append the terminator to sequences that lack one
pub fn terminate(sequence: &str) -> Cow<'_, str> {
    match sequence.ends_with(TERMINATOR) {
        true => Cow::Borrowed(sequence),
        false => Cow::Owned(format!("{}{}", sequence, TERMINATOR)),
    }
}
