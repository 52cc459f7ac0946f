//! Independent random sampling: the baseline and the TPE startup delegate.

use rand::{Rng, RngCore};

use scout_types::{SamplerError, SearchSpace, Trial};

use crate::{Params, Sampler};

#[derive(Debug, Clone, Default)]
pub struct RandomSampler;

impl RandomSampler {
    pub fn new() -> Self {
        Self
    }

    /// Draw every parameter independently from its distribution.
    pub fn draw(space: &SearchSpace, rng: &mut dyn RngCore) -> Params {
        space
            .params
            .iter()
            .map(|def| {
                let u: f64 = rng.gen();
                (def.name.clone(), def.distribution.decode(u))
            })
            .collect()
    }
}

impl Sampler for RandomSampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        _trial_index: u32,
        _history: &[Trial],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        Ok(Some(Self::draw(space, rng)))
    }

    fn name(&self) -> &str {
        "random"
    }
}
