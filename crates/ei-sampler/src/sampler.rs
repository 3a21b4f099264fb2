use crate::greedy::GreedySampler;

/// A candidate token and its logit.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

/// A stage that filters, rescales or selects candidate tokens.
pub trait Sampler: Send + Sync {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Modify candidates in-place. A selecting sampler leaves at most one.
    fn apply(&self, candidates: &mut Vec<TokenLogit>);
}

/// Samplers run in order over one logits row.
/// The last sampler in the chain should be a selector.
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    /// Create a new empty sampler chain.
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// The chain used for completions: pick the most likely token.
    pub fn greedy() -> Self {
        Self::new().with(Box::new(GreedySampler::new()))
    }

    /// Add a sampler to the end of the chain. Returns self for builder-style usage.
    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Names of the samplers, in order.
    pub fn names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Select a token from raw logits (token id = index).
    ///
    /// Returns `None` when nothing survives the chain, e.g. for an empty
    /// row or a row of NaNs.
    pub fn sample(&self, logits: &[f32]) -> Option<u32> {
        let mut candidates: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &self.samplers {
            sampler.apply(&mut candidates);
        }

        candidates.first().map(|t| t.token_id)
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drops every candidate below a floor.
    struct Floor(f32);

    impl Sampler for Floor {
        fn name(&self) -> &str {
            "floor"
        }

        fn apply(&self, candidates: &mut Vec<TokenLogit>) {
            candidates.retain(|c| c.logit >= self.0);
        }
    }

    #[test]
    fn test_greedy_chain() {
        let chain = SamplerChain::greedy();
        assert_eq!(chain.names(), vec!["greedy"]);
        assert_eq!(chain.sample(&[0.1, 2.5, -1.0, 2.4]), Some(1));
    }

    #[test]
    fn test_empty_logits() {
        assert_eq!(SamplerChain::greedy().sample(&[]), None);
    }

    #[test]
    fn test_chain_order() {
        let chain = SamplerChain::new()
            .with(Box::new(Floor(5.0)))
            .with(Box::new(GreedySampler::new()));
        assert_eq!(chain.names(), vec!["floor", "greedy"]);
        assert_eq!(chain.sample(&[1.0, 2.0]), None);
        assert_eq!(chain.sample(&[9.0, 6.0, 7.0]), Some(0));
    }

    #[test]
    fn test_repeatable() {
        let chain = SamplerChain::greedy();
        let logits: Vec<f32> = (0..1000).map(|i| ((i * 37) % 101) as f32).collect();
        let first = chain.sample(&logits);
        for _ in 0..10 {
            assert_eq!(chain.sample(&logits), first);
        }
    }
}
