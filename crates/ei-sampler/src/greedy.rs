use crate::sampler::{Sampler, TokenLogit};

/// Greedy sampler: selects the single token with the highest logit.
///
/// Ties go to the lowest token id and NaN logits are never selected, so the
/// choice depends only on the logits.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&self, candidates: &mut Vec<TokenLogit>) {
        let best = candidates
            .iter()
            .filter(|c| !c.logit.is_nan())
            .reduce(|best, c| {
                if c.logit > best.logit || (c.logit == best.logit && c.token_id < best.token_id) {
                    c
                } else {
                    best
                }
            })
            .cloned();

        candidates.clear();
        candidates.extend(best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(logits: &[(u32, f32)]) -> Vec<TokenLogit> {
        logits
            .iter()
            .map(|&(token_id, logit)| TokenLogit { token_id, logit })
            .collect()
    }

    #[test]
    fn test_picks_max() {
        let mut c = candidates(&[(0, -3.0), (1, 4.0), (2, 3.9)]);
        GreedySampler::new().apply(&mut c);
        assert_eq!(c, candidates(&[(1, 4.0)]));
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let mut c = candidates(&[(7, 1.0), (3, 1.0), (5, 0.5)]);
        GreedySampler::new().apply(&mut c);
        assert_eq!(c[0].token_id, 3);
    }

    #[test]
    fn test_nan_ignored() {
        let mut c = candidates(&[(0, f32::NAN), (1, -10.0)]);
        GreedySampler::new().apply(&mut c);
        assert_eq!(c[0].token_id, 1);

        let mut all_nan = candidates(&[(0, f32::NAN)]);
        GreedySampler::new().apply(&mut all_nan);
        assert!(all_nan.is_empty());
    }

    #[test]
    fn test_negative_infinity_still_selectable() {
        let mut c = candidates(&[(4, f32::NEG_INFINITY)]);
        GreedySampler::new().apply(&mut c);
        assert_eq!(c[0].token_id, 4);
    }
}
