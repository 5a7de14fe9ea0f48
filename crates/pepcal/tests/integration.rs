//! Protein-level FDR from a combined target/decoy database, end to end

use pepcal_core::enzyme::{DigestBuilder, Digester};
use pepcal_core::fasta::Fasta;
use pepcal_core::protein::{self, Binning, ProteinFdr, ProteinIndex, NO_ESTIMATE};
use std::collections::HashSet;

const FASTA: &str = r#"
>sp|Q99536|VAT1_HUMAN Synaptic vesicle membrane protein VAT-1 homolog
MSDEREVAEAATGEDASSPPPKTEAASDPQHPAASEGAAAAAASPPLLRCLVLTGFGGYD
KVKLQSRPAAPPAPGPGQLTLRLRACGLNFADLMARQGLYDRLPPLPVTPGMEGAGVVIA
VGEGVSDRKAGDRVMVLNRSGMWQEEVTVPSVQTFLIPEAMTFEEAAALLVNYITAYMVL
>sp|P02769|ALBU_BOVIN Albumin
MKWVTFISLLLLFSSAYSRGVFRRDTHKSEIAHRFKDLGEEHFKGLVLIAFSQYLQQCPF
DEHVKLVNELTEFAKTCVADESHAGCEKSLHTLFGDELCKVASLRETYGDMADCCEKQEP
>sp|P00761|TRYP_PIG Trypsin
FPTDDDDKIVGGYTCAANSIPYQVSLNSGSHFCGGSLINSQWVVSAAHCYKSRIQVRLGE
HNIDVLEGNEQFINAAKIITHPNFNGNTLDNDIMLIKLSSPATLNSRVATVSLPRSCAAA
>sp|P01012|OVAL_CHICK Ovalbumin
MGSIGAASMEFCFDVFKELKVHHANENIFYCPIAIMSALAMVYLGAKDSTRTQINKVVRF
>sp|DUPLICATE Same sequence as ovalbumin
MGSIGAASMEFCFDVFKELKVHHANENIFYCPIAIMSALAMVYLGAKDSTRTQINKVVRF
>rev_sp|Q99536|VAT1_HUMAN
LVMYATIYNVLLAAAEEFTMAEPILFTQVSPVTVEEQWMGSRNLVMVRDGAKRDSVGEGV
AIVVGAGEMGPTVPLPPLRDYLGQRAMLDAFNLGCARLRLTLQGPGPAPPAAPRSQLKVK
DYGGFGTLVLCRLLPPSAAAAAAGESAAPHQPDSAAETKPPPSSADEGTAAEAVEREDSM
>rev_sp|P02769|ALBU_BOVIN
PEQKECCDAMDGYTERLSAVKCLEDGFLTHLSKECGAHSEDAVCTKAFETLENVLKVHED
FPCQQLYQSFAILVLGKFHEEGLDKFRHAIESKHTDRRFVGRSYASSFLLLLSIFTVWKM
>rev_sp|P00761|TRYP_PIG
AAACSRPLSVTAVRSNLTAPSSLKILMIDNDLTNGNFNPHTIIKAANIFQENGELVDINH
EGLRVQIRSKYCHAASVVWQSNILSGGCFHSGSNLSVQYPISNAACTYGGVIKDDDDTPF
"#;

fn index(bins: usize) -> (ProteinIndex, protein::Parameters) {
    let parameters = protein::Builder {
        bins: Some(bins),
        decoy_tag: Some("rev_".into()),
        digest: Some(DigestBuilder {
            missed_cleavages: Some(1),
            ..Default::default()
        }),
        ..Default::default()
    }
    .make_parameters()
    .unwrap();

    let digester = Digester::new(parameters.digest.clone()).unwrap();
    let index =
        ProteinIndex::from_combined(Fasta::parse(FASTA), &parameters.decoy_tag, &digester).unwrap();
    (index, parameters)
}

#[test]
fn combined_database_is_padded() {
    let (index, _) = index(2);
    assert_eq!(index.targets(), 5);
    assert_eq!(index.padded_decoys(), 5);
    assert!((index.ratio - 5.0 / 3.0).abs() < 1e-12);

    // Exactly one of the two identical sequences keeps its length proxy
    let ovalbumin = index
        .pairs
        .iter()
        .filter(|pair| {
            pair.target
                .as_ref()
                .map(|p| p.sequence.starts_with("MGSIGAASMEF"))
                .unwrap_or(false)
        })
        .map(|pair| pair.length)
        .collect::<Vec<_>>();
    assert_eq!(ovalbumin.len(), 2);
    assert_eq!(ovalbumin.iter().filter(|&&len| len == 0).count(), 1);
    assert!(ovalbumin.iter().any(|&len| len > 0));
}

fn names(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn protein_fdr_estimate() {
    let targets = names(&["sp|Q99536|VAT1_HUMAN", "sp|P02769|ALBU_BOVIN", "sp|P00761|TRYP_PIG"]);
    let decoys = names(&["rev_sp|P02769|ALBU_BOVIN"]);

    for binning in [Binning::EqualDepth, Binning::EqualWidth] {
        let (index, parameters) = index(2);
        let estimate = ProteinFdr::new(&index, parameters.bins, binning).estimate(&targets, &decoys);
        assert_eq!(estimate.bins.len(), 2);
        assert_eq!(
            estimate.bins.iter().map(|bin| bin.candidates).sum::<usize>(),
            5
        );
        assert_eq!(
            estimate.bins.iter().map(|bin| bin.true_positives).sum::<usize>(),
            3
        );
    }

    // A single stratum: N = 5, TP = 3 and one decoy scaled to round(5/3) = 2
    let (index, _) = index(1);
    let fdr = ProteinFdr::new(&index, 1, Binning::EqualDepth);
    let estimate = fdr.estimate(&targets, &decoys);
    assert_eq!(estimate.bins[0].false_positives, 2);
    let value = estimate.fdr().expect("an estimate");
    assert!(value > 0.0 && value <= 2.0 / 3.0, "{}", value);

    // Without any confident decoys there is nothing to estimate
    let estimate = fdr.estimate(&targets, &HashSet::new());
    assert_eq!(estimate.fdr, NO_ESTIMATE);
    assert!(estimate.fdr().is_none());
}
