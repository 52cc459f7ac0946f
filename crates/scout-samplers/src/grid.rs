//! Exhaustive grid search over the product of per-dimension axes.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use scout_types::{Distribution, ParamValue, SamplerError, SearchSpace, Trial};

use crate::{Params, Sampler};

/// What to do when the trial index runs past the product grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnExhaust {
    /// Start over from the first grid point, logging a warning.
    #[default]
    Wrap,
    /// Stop proposing; the study finishes early.
    Stop,
    /// Fail the trial with a sampler error.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    /// Number of points per continuous dimension.
    pub resolution: usize,
    pub on_exhaust: OnExhaust,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            resolution: 10,
            on_exhaust: OnExhaust::Wrap,
        }
    }
}

#[derive(Debug)]
pub struct GridSampler {
    opts: GridOptions,
    /// Grid cache, invalidated when the space changes.
    cache: Option<(SearchSpace, Vec<Params>)>,
    warned_wrap: bool,
}

impl GridSampler {
    pub fn new(opts: GridOptions) -> Self {
        Self {
            opts,
            cache: None,
            warned_wrap: false,
        }
    }

    fn axis(&self, dist: &Distribution) -> Vec<ParamValue> {
        let steps = self.opts.resolution.max(2);
        match dist {
            Distribution::Uniform { low, high } => (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ParamValue::Float(low + t * (high - low))
                })
                .collect(),
            Distribution::LogUniform { low, high } => {
                let (ll, lh) = (low.ln(), high.ln());
                (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParamValue::Float((ll + t * (lh - ll)).exp())
                    })
                    .collect()
            }
            Distribution::Int { low, high } => {
                let span = (high - low + 1) as usize;
                if span <= steps {
                    (*low..=*high).map(ParamValue::Int).collect()
                } else {
                    // Evenly spaced integers when the range outgrows the
                    // resolution.
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            ParamValue::Int(low + (t * (high - low) as f64).round() as i64)
                        })
                        .collect()
                }
            }
            Distribution::Categorical { choices } => choices
                .iter()
                .map(|c| ParamValue::Json(c.clone()))
                .collect(),
        }
    }

    fn build_grid(&self, space: &SearchSpace) -> Vec<Params> {
        let axes: Vec<(String, Vec<ParamValue>)> = space
            .params
            .iter()
            .map(|def| (def.name.clone(), self.axis(&def.distribution)))
            .collect();

        // Cartesian product.
        let mut result: Vec<Params> = vec![Params::new()];
        for (name, values) in &axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in values {
                    let mut combo = existing.clone();
                    combo.insert(name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

impl Sampler for GridSampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        trial_index: u32,
        _history: &[Trial],
        _rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        let stale = match &self.cache {
            Some((cached_space, _)) => cached_space != space,
            None => true,
        };
        if stale {
            let grid = self.build_grid(space);
            self.cache = Some((space.clone(), grid));
        }
        let grid = &self.cache.as_ref().unwrap().1;
        let size = grid.len();

        let idx = trial_index as usize;
        if idx >= size {
            match self.opts.on_exhaust {
                OnExhaust::Wrap => {
                    if !self.warned_wrap {
                        warn!(size, trial_index, "grid exhausted, wrapping around");
                        self.warned_wrap = true;
                    }
                    return Ok(Some(grid[idx % size].clone()));
                }
                OnExhaust::Stop => return Ok(None),
                OnExhaust::Error => return Err(SamplerError::GridExhausted { size }),
            }
        }
        Ok(Some(grid[idx].clone()))
    }

    fn name(&self) -> &str {
        "grid"
    }
}
