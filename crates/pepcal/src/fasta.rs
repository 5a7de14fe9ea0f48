use crate::enzyme::TERMINATOR;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fasta {
    /// (accession, sequence) in file order
    pub proteins: Vec<(String, String)>,
}

impl Fasta {
    /// Parse the contents of a FASTA file. The accession is the first
    /// whitespace-delimited token of the header line
    pub fn parse(contents: &str) -> Fasta {
        let mut proteins = Vec::new();
        let mut last_id: Option<&str> = None;
        let mut s = String::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(id) = line.strip_prefix('>') {
                let seq = std::mem::take(&mut s);
                if let Some(acc) = last_id {
                    proteins.push((acc.to_string(), seq));
                }
                last_id = Some(id.split_ascii_whitespace().next().unwrap_or_default());
            } else {
                s.extend(
                    line.chars()
                        .filter(|c| c.is_ascii_alphabetic() || *c == TERMINATOR)
                        .map(|c| c.to_ascii_uppercase()),
                );
            }
        }

        if let Some(acc) = last_id {
            proteins.push((acc.to_string(), s));
        }

        Fasta { proteins }
    }

    /// Split a combined database into (targets, decoys). Any protein whose
    /// accession contains `decoy_tag` is a decoy
    pub fn split(self, decoy_tag: &str) -> (Fasta, Fasta) {
        let (decoys, targets): (Vec<_>, Vec<_>) = self
            .proteins
            .into_iter()
            .partition(|(acc, _)| acc.contains(decoy_tag));
        (Fasta { proteins: targets }, Fasta { proteins: decoys })
    }

    pub fn len(&self) -> usize {
        self.proteins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proteins.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const COMBINED: &str = "
>sp|P1|ONE first protein
MADEEK
LPPGWEK*
>random_sp|P1|ONE
KEWGPPL
KEEDAM

>sp|P2|TWO
mkprk
>random_sp|P2|TWO
KRPKM
";

    #[test]
    fn parse() {
        let fasta = Fasta::parse(COMBINED);
        assert_eq!(fasta.len(), 4);
        assert_eq!(
            fasta.proteins[0],
            ("sp|P1|ONE".to_string(), "MADEEKLPPGWEK*".to_string())
        );
        assert_eq!(fasta.proteins[1].1, "KEWGPPLKEEDAM");
        assert_eq!(fasta.proteins[2].1, "MKPRK");
    }

    #[test]
    fn split_on_decoy_tag() {
        let (targets, decoys) = Fasta::parse(COMBINED).split("random");
        assert_eq!(targets.len(), 2);
        assert_eq!(decoys.len(), 2);
        assert!(decoys.proteins.iter().all(|(acc, _)| acc.starts_with("random")));
        assert_eq!(targets.proteins[1].0, "sp|P2|TWO");
    }

    #[test]
    fn empty() {
        assert!(Fasta::parse("").is_empty());
        assert!(Fasta::parse("\n\n").is_empty());
    }
}
