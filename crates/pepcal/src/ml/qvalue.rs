//! Empirical target-decoy q-values

/// Proportion of incorrect target identifications, estimated from the
/// target:decoy size ratio and bounded to (0, 1]
pub fn pi0(targets: usize, decoys: usize) -> f64 {
    if targets == 0 {
        return 1.0;
    }
    (decoys as f64 / targets as f64).clamp(f64::MIN_POSITIVE, 1.0)
}

/// Assign q-values to a set of scores, returned in input order.
///
/// At each score threshold FDR = pi0 * decoys / targets counted at or above
/// the threshold; tied scores share the FDR of the whole tie group. The
/// q-value is the minimum FDR over all equal-or-worse thresholds, so it never
/// decreases as scores get worse and never exceeds 1.
pub fn q_values(scores: &[f64], decoys: &[bool], pi0: f64) -> Vec<f64> {
    assert_eq!(scores.len(), decoys.len());

    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut fdr = vec![1.0; scores.len()];
    let mut decoy = 0;
    let mut target = 0;
    let mut start = 0;
    while start < order.len() {
        let score = scores[order[start]];
        let mut end = start;
        while end < order.len() && (end == start || scores[order[end]] == score) {
            match decoys[order[end]] {
                true => decoy += 1,
                false => target += 1,
            }
            end += 1;
        }

        let group_fdr = pi0 * decoy as f64 / target as f64;
        for &ix in &order[start..end] {
            fdr[ix] = group_fdr;
        }
        start = end;
    }

    // Reverse, and calculate the cumulative minimum
    // `q = q[::-1].cummin()[::-1] in python`
    let mut q = vec![1.0; scores.len()];
    let mut q_min = 1.0f64;
    for &ix in order.iter().rev() {
        q_min = q_min.min(fdr[ix]);
        q[ix] = q_min;
    }
    q
}

/// Number of targets with q-value <= `threshold`
pub fn passing(q_values: &[f64], decoys: &[bool], threshold: f64) -> usize {
    q_values
        .iter()
        .zip(decoys)
        .filter(|&(q, decoy)| !decoy && *q <= threshold)
        .count()
}
