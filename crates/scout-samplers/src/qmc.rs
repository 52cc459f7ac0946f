//! Quasi-Monte-Carlo sequences: Halton and Sobol.
//!
//! Points are generated in `[0,1)^d` and mapped through the search-space
//! decoding; the sequence index is the trial index, so the sequence is
//! deterministic regardless of worker interleaving.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use scout_types::{SamplerError, SearchSpace, Trial};

use crate::{Params, Sampler};

/// First primes, one per Halton dimension.
const PRIMES: [u32; 32] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131,
];

/// Sobol direction-number parameters `(s, a, m)` for dimensions 2..=21
/// (dimension 1 is the van der Corput sequence in base 2). Values from the
/// new Joe–Kuo D(6) table.
const SOBOL_PARAMS: [(u32, u32, &[u32]); 20] = [
    (1, 0, &[1]),
    (2, 1, &[1, 3]),
    (3, 1, &[1, 3, 1]),
    (3, 2, &[1, 1, 1]),
    (4, 1, &[1, 1, 3, 3]),
    (4, 4, &[1, 3, 5, 13]),
    (5, 2, &[1, 1, 5, 5, 17]),
    (5, 4, &[1, 1, 5, 5, 5]),
    (5, 7, &[1, 1, 7, 11, 19]),
    (5, 11, &[1, 1, 5, 1, 1]),
    (5, 13, &[1, 1, 1, 3, 11]),
    (5, 14, &[1, 3, 5, 5, 31]),
    (6, 1, &[1, 3, 3, 9, 7, 49]),
    (6, 13, &[1, 1, 1, 15, 21, 21]),
    (6, 16, &[1, 3, 1, 13, 27, 49]),
    (6, 19, &[1, 1, 1, 15, 7, 5]),
    (6, 22, &[1, 3, 1, 15, 13, 25]),
    (6, 25, &[1, 1, 5, 5, 19, 61]),
    (7, 1, &[1, 3, 7, 11, 23, 15, 103]),
    (7, 4, &[1, 3, 7, 13, 41, 27, 79]),
];

/// Highest Sobol dimensionality backed by the embedded table.
pub const SOBOL_MAX_DIM: usize = SOBOL_PARAMS.len() + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QmcSequence {
    Halton,
    #[default]
    Sobol,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QmcOptions {
    pub sequence: QmcSequence,
    /// Apply a seeded digital shift to decorrelate replicated runs.
    pub scramble: bool,
    pub seed: u64,
}

#[derive(Debug)]
pub struct QmcSampler {
    opts: QmcOptions,
    warned_fallback: bool,
}

impl QmcSampler {
    pub fn new(opts: QmcOptions) -> Self {
        Self {
            opts,
            warned_fallback: false,
        }
    }

    /// Radical inverse of `index` in base `base`.
    fn radical_inverse(mut index: u64, base: u64) -> f64 {
        let mut result = 0.0;
        let mut frac = 1.0 / base as f64;
        while index > 0 {
            result += (index % base) as f64 * frac;
            index /= base;
            frac /= base as f64;
        }
        result
    }

    fn halton_point(&self, index: u64, dims: usize) -> Vec<f64> {
        (0..dims)
            .map(|d| Self::radical_inverse(index + 1, PRIMES[d % PRIMES.len()] as u64))
            .collect()
    }

    /// Direction numbers (scaled by 2^32) for one Sobol dimension.
    fn sobol_directions(dim: usize) -> [u64; 32] {
        let mut v = [0u64; 32];
        if dim == 0 {
            for (k, slot) in v.iter_mut().enumerate() {
                *slot = 1 << (31 - k);
            }
            return v;
        }
        let (s, a, m) = SOBOL_PARAMS[dim - 1];
        let s = s as usize;
        for k in 0..s.min(32) {
            v[k] = (m[k] as u64) << (31 - k);
        }
        for k in s..32 {
            v[k] = v[k - s] ^ (v[k - s] >> s);
            for i in 1..s {
                if (a >> (s - 1 - i)) & 1 == 1 {
                    v[k] ^= v[k - i];
                }
            }
        }
        v
    }

    fn sobol_point(&self, index: u64, dims: usize) -> Vec<f64> {
        // Gray-code construction: XOR the direction numbers selected by the
        // bits of gray(index).
        let gray = index ^ (index >> 1);
        (0..dims)
            .map(|d| {
                let v = Self::sobol_directions(d);
                let mut x: u64 = 0;
                for (k, dir) in v.iter().enumerate() {
                    if (gray >> k) & 1 == 1 {
                        x ^= dir;
                    }
                }
                x as f64 / (1u64 << 32) as f64
            })
            .collect()
    }

    fn digital_shift(&self, point: &mut [f64]) {
        if !self.opts.scramble {
            return;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.opts.seed);
        for x in point.iter_mut() {
            let shift: f64 = rng.gen();
            *x = (*x + shift).fract();
        }
    }
}

impl Sampler for QmcSampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        trial_index: u32,
        _history: &[Trial],
        _rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        let dims = space.len();
        let index = trial_index as u64;

        let mut point = match self.opts.sequence {
            QmcSequence::Halton => self.halton_point(index, dims),
            QmcSequence::Sobol => {
                if dims > SOBOL_MAX_DIM {
                    if !self.warned_fallback {
                        warn!(
                            dims,
                            max = SOBOL_MAX_DIM,
                            "search space exceeds the Sobol direction table, using Halton"
                        );
                        self.warned_fallback = true;
                    }
                    self.halton_point(index, dims)
                } else {
                    self.sobol_point(index + 1, dims)
                }
            }
        };
        self.digital_shift(&mut point);

        let params = space
            .params
            .iter()
            .zip(point)
            .map(|(def, u)| (def.name.clone(), def.distribution.decode(u)))
            .collect();
        Ok(Some(params))
    }

    fn name(&self) -> &str {
        match self.opts.sequence {
            QmcSequence::Halton => "qmc-halton",
            QmcSequence::Sobol => "qmc-sobol",
        }
    }
}
