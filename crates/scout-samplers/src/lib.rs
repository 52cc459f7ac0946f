//! # scout-samplers
//!
//! Proposal algorithms. Every sampler implements [`Sampler`]; built-ins are
//! resolved by name through a whitelist so untrusted strings never reach an
//! open-ended lookup — unknown names are a configuration error.

mod cmaes;
mod fixed;
mod grid;
mod nsga2;
mod qmc;
mod random;
mod tpe;

pub use cmaes::CmaEsSampler;
pub use fixed::FixedTrial;
pub use grid::{GridSampler, OnExhaust};
pub use nsga2::Nsga2Sampler;
pub use qmc::{QmcSampler, QmcSequence};
pub use random::RandomSampler;
pub use tpe::TpeSampler;

use rand::RngCore;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use scout_types::{ConfigError, Goal, ParamValue, SamplerError, SearchSpace, Trial};

/// Parameter assignments proposed for one trial.
pub type Params = BTreeMap<String, ParamValue>;

/// A proposal algorithm.
///
/// Samplers are stateful values owned by the runner and called under
/// serialization between dispatch rounds; the RNG handed in is the
/// deterministic per-trial generator, so a proposal depends only on
/// `(state, history, trial_index)`.
pub trait Sampler: Send + std::fmt::Debug {
    /// Propose parameters for `trial_index` given the finished-trial
    /// history snapshot. `Ok(None)` means the sampler has nothing left to
    /// propose and the study should stop dequeuing (grid `on_exhaust:
    /// stop`).
    fn next(
        &mut self,
        space: &SearchSpace,
        trial_index: u32,
        history: &[Trial],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError>;

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}

/// The built-in sampler set. Untrusted names translate only through this
/// enum; anything else is rejected before a study exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    Random,
    Grid,
    Qmc,
    Tpe,
    CmaEs,
    Nsga2,
}

impl std::str::FromStr for SamplerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::Grid),
            "qmc" => Ok(Self::Qmc),
            "tpe" => Ok(Self::Tpe),
            "cmaes" | "cma-es" => Ok(Self::CmaEs),
            "nsga2" | "nsga-ii" => Ok(Self::Nsga2),
            other => Err(ConfigError::UnknownSampler {
                name: other.to_string(),
            }),
        }
    }
}

/// One standard-normal draw via Box–Muller; used by the samplers that
/// perturb points (TPE candidates, CMA-ES).
pub(crate) fn gauss(rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Deserialize an options map, treating `null` as "all defaults".
pub(crate) fn parse_opts<T: DeserializeOwned + Default>(
    opts: &serde_json::Value,
    sampler: &str,
) -> Result<T, ConfigError> {
    if opts.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(opts.clone()).map_err(|e| ConfigError::InvalidOption {
        name: sampler.to_string(),
        message: e.to_string(),
    })
}

/// Resolve a sampler by name and build it from its options.
pub fn build_sampler(
    name: &str,
    opts: &serde_json::Value,
    goal: Goal,
) -> Result<Box<dyn Sampler>, ConfigError> {
    let kind: SamplerKind = name.parse()?;
    Ok(match kind {
        SamplerKind::Random => Box::new(RandomSampler::new()),
        SamplerKind::Grid => Box::new(GridSampler::new(parse_opts(opts, name)?)),
        SamplerKind::Qmc => Box::new(QmcSampler::new(parse_opts(opts, name)?)),
        SamplerKind::Tpe => Box::new(TpeSampler::new(parse_opts(opts, name)?, goal)),
        SamplerKind::CmaEs => Box::new(CmaEsSampler::new(parse_opts(opts, name)?, goal)),
        SamplerKind::Nsga2 => Box::new(Nsga2Sampler::new(parse_opts(opts, name)?, goal)),
    })
}
