pub mod enzyme;
pub mod fasta;
pub mod fdr;
pub mod mass;
pub mod ml;
pub mod protein;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Rejected before any computation begins
    Config(String),
    /// Protein-FDR estimation requires both target and decoy proteins
    EmptyDatabase { targets: usize, decoys: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Self::EmptyDatabase { targets, decoys } => write!(
                f,
                "protein database must contain target and decoy proteins ({} targets, {} decoys)",
                targets, decoys
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub fn read_fasta<P: AsRef<std::path::Path>>(path: P) -> Result<fasta::Fasta, Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(fasta::Fasta::parse(&contents))
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
