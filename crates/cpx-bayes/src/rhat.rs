// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Split-chain potential scale reduction of one scalar parameter.
///
/// Each chain is cut into two halves (the middle draw is dropped for odd
/// lengths) and the halves are compared as independent chains. Returns
/// `None` for fewer than four draws per chain or chains of unequal length.
/// Identical constant chains give exactly 1.0; constant chains stuck at
/// different values give infinity.
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let draws = chains.first()?.len();
    if draws < 4 || chains.iter().any(|chain| chain.len() != draws) {
        return None;
    }
    let half = draws / 2;

    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        halves.push(&chain[..half]);
        halves.push(&chain[draws - half..]);
    }

    let m = halves.len() as f64;
    let len = half as f64;
    let half_means: Vec<f64> = halves
        .iter()
        .map(|h| h.iter().sum::<f64>() / len)
        .collect();
    let grand_mean = half_means.iter().sum::<f64>() / m;

    let between = len / (m - 1.0)
        * half_means
            .iter()
            .map(|mu| (mu - grand_mean).powi(2))
            .sum::<f64>();
    let within = halves
        .iter()
        .zip(&half_means)
        .map(|(h, mu)| h.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (len - 1.0))
        .sum::<f64>()
        / m;

    if within <= 0.0 {
        return Some(if between <= 0.0 { 1.0 } else { f64::INFINITY });
    }
    let pooled = (len - 1.0) / len * within + between / len;
    Some((pooled / within).sqrt())
}

#[cfg(test)]
mod tests {
    use super::split_rhat;

    fn wave(len: usize, phase: f64) -> Vec<f64> {
        (0..len).map(|i| (i as f64 * 0.7 + phase).sin()).collect()
    }

    #[test]
    fn well_mixed_chains_are_near_one() {
        let chains = vec![wave(400, 0.0), wave(400, 1.3), wave(400, 2.1), wave(400, 4.0)];
        let rhat = split_rhat(&chains).expect("enough draws");
        assert!((rhat - 1.0).abs() < 0.01, "rhat={rhat}");
    }

    #[test]
    fn separated_chains_flag_non_convergence() {
        let low = wave(200, 0.0);
        let high: Vec<f64> = wave(200, 0.0).iter().map(|x| x + 5.0).collect();
        let rhat = split_rhat(&[low, high]).expect("enough draws");
        assert!(rhat > 1.5, "rhat={rhat}");
    }

    #[test]
    fn drifting_chain_is_caught_by_splitting() {
        let trend: Vec<f64> = (0..200).map(|i| i as f64 / 20.0).collect();
        let rhat = split_rhat(&[trend]).expect("enough draws");
        assert!(rhat > 1.1, "rhat={rhat}");
    }

    #[test]
    fn constant_chains() {
        assert_eq!(split_rhat(&[vec![3.0; 10], vec![3.0; 10]]), Some(1.0));
        assert_eq!(
            split_rhat(&[vec![3.0; 10], vec![4.0; 10]]),
            Some(f64::INFINITY)
        );
    }

    #[test]
    fn short_or_ragged_input_is_undefined() {
        assert_eq!(split_rhat(&[]), None);
        assert_eq!(split_rhat(&[vec![1.0, 2.0, 3.0]]), None);
        assert_eq!(split_rhat(&[vec![1.0; 6], vec![1.0; 8]]), None);
    }
}
