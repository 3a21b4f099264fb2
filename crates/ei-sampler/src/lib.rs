pub mod greedy;
pub mod sampler;

pub use greedy::GreedySampler;
pub use sampler::{Sampler, SamplerChain, TokenLogit};
