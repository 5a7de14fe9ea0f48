use crate::runner::Runner;
use anyhow::Context;
use pepcal_core::fdr::Psm;
use pepcal_core::ml::cross_validation::TrainedModel;
use pepcal_core::ml::normalize::Normalizer;
use rayon::prelude::*;

impl Runner {
    pub fn serialize_psm(&self, psm: &Psm) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(psm.id.as_bytes());
        record.push_field(if psm.decoy { "-1" } else { "1" }.as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.score).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.q_value).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.posterior_error).as_bytes());
        record.push_field(psm.peptide.as_bytes());
        for protein in &psm.proteins {
            record.push_field(protein.as_bytes());
        }
        record
    }

    fn write_bytes(&self, name: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        let path = self.make_path(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;
        Ok(path.display().to_string())
    }

    /// Target and decoy results, best first
    pub fn write_psms(&self, name: &str, psms: &[Psm]) -> anyhow::Result<String> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_writer(vec![]);

        let headers = csv::ByteRecord::from(vec![
            "PSMId",
            "label",
            "score",
            "q-value",
            "posterior_error_prob",
            "peptide",
            "proteinIds",
        ]);

        wtr.write_byte_record(&headers)?;
        for record in psms
            .into_par_iter()
            .map(|psm| self.serialize_psm(psm))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        self.write_bytes(name, bytes)
    }

    /// Per-fold weights, both as trained on normalized features and mapped
    /// back onto the raw PIN features
    pub fn write_weights(
        &self,
        model: &TrainedModel,
        normalizer: &Normalizer,
        feature_names: &[String],
    ) -> anyhow::Result<String> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec!["fold", "space"]);
        for name in feature_names {
            headers.push_field(name.as_bytes());
        }
        headers.push_field(b"m0");
        wtr.write_byte_record(&headers)?;

        for (fold, model) in model.folds.iter().enumerate() {
            let raw = normalizer.raw_weights(&model.weights.weights);
            for (space, weights) in [("normalized", &model.weights.weights), ("raw", &raw)] {
                let mut record = csv::ByteRecord::new();
                record.push_field(itoa::Buffer::new().format(fold).as_bytes());
                record.push_field(space.as_bytes());
                for w in weights.iter() {
                    record.push_field(ryu::Buffer::new().format(*w).as_bytes());
                }
                wtr.write_byte_record(&record)?;
            }
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        self.write_bytes("weights.tsv", bytes)
    }
}
