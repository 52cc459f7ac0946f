//! Search space definitions and the normalized value encoding.
//!
//! Samplers propose in the unit cube `[0,1)^d`; each distribution knows how
//! to translate a raw uniform draw into a concrete parameter value and back.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ConfigError;

/// A concrete parameter value produced by a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl ParamValue {
    /// Numeric view used by samplers that reason on a continuous scale.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(_) => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Describes how a single parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Distribution {
    /// Continuous uniform range `[low, high)` with `low < high`.
    Uniform { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated),
    /// `0 < low < high`.
    LogUniform { low: f64, high: f64 },
    /// Integer range `[low, high]` inclusive.
    Int { low: i64, high: i64 },
    /// Categorical choices, non-empty.
    Categorical { choices: Vec<serde_json::Value> },
}

impl Distribution {
    /// Validate the descriptor; surfaced as a `Config` error before any
    /// study is created.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let fail = |message: String| ConfigError::InvalidSpace {
            name: name.to_string(),
            message,
        };
        match self {
            Self::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(fail(format!("bounds must be finite, got [{low}, {high}]")));
                }
                if low >= high {
                    return Err(fail(format!("requires low < high, got [{low}, {high}]")));
                }
            }
            Self::LogUniform { low, high } => {
                if !(*low > 0.0) {
                    return Err(fail(format!("requires 0 < low, got {low}")));
                }
                if !low.is_finite() || !high.is_finite() || low >= high {
                    return Err(fail(format!("requires 0 < low < high, got [{low}, {high}]")));
                }
            }
            Self::Int { low, high } => {
                if low > high {
                    return Err(fail(format!("requires low <= high, got [{low}, {high}]")));
                }
            }
            Self::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(fail("requires a non-empty choice list".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Translate a raw uniform draw `u` in `[0, 1)` into a concrete value.
    pub fn decode(&self, u: f64) -> ParamValue {
        let u = u.clamp(0.0, 1.0 - f64::EPSILON);
        match self {
            Self::Uniform { low, high } => ParamValue::Float(low + u * (high - low)),
            Self::LogUniform { low, high } => {
                let (ll, lh) = (low.ln(), high.ln());
                ParamValue::Float((ll + u * (lh - ll)).exp())
            }
            Self::Int { low, high } => {
                let span = (high - low + 1) as f64;
                let v = *low + (u * span).floor() as i64;
                ParamValue::Int(v.clamp(*low, *high))
            }
            Self::Categorical { choices } => {
                let idx = ((u * choices.len() as f64).floor() as usize).min(choices.len() - 1);
                ParamValue::Json(choices[idx].clone())
            }
        }
    }

    /// Inverse of [`Distribution::decode`]: map a concrete value back into
    /// `[0, 1)`. Errors on values outside the distribution.
    pub fn encode(&self, name: &str, value: &ParamValue) -> Result<f64, ConfigError> {
        let reject = |message: String| ConfigError::FixedValueRejected {
            name: name.to_string(),
            message,
        };
        match (self, value) {
            (Self::Uniform { low, high }, v) => {
                let v = v.as_f64().ok_or_else(|| reject("expected a number".into()))?;
                if v < *low || v > *high {
                    return Err(reject(format!("{v} outside [{low}, {high}]")));
                }
                Ok(((v - low) / (high - low)).clamp(0.0, 1.0 - f64::EPSILON))
            }
            (Self::LogUniform { low, high }, v) => {
                let v = v.as_f64().ok_or_else(|| reject("expected a number".into()))?;
                if v < *low || v > *high {
                    return Err(reject(format!("{v} outside [{low}, {high}]")));
                }
                let (ll, lh) = (low.ln(), high.ln());
                Ok(((v.ln() - ll) / (lh - ll)).clamp(0.0, 1.0 - f64::EPSILON))
            }
            (Self::Int { low, high }, ParamValue::Int(v)) => {
                if v < low || v > high {
                    return Err(reject(format!("{v} outside [{low}, {high}]")));
                }
                let span = (high - low + 1) as f64;
                Ok(((v - low) as f64 + 0.5) / span)
            }
            (Self::Categorical { choices }, ParamValue::Json(v)) => {
                let idx = choices
                    .iter()
                    .position(|c| c == v)
                    .ok_or_else(|| reject(format!("{v} is not one of the choices")))?;
                Ok((idx as f64 + 0.5) / choices.len() as f64)
            }
            (Self::Categorical { choices }, other) => {
                // Accept bare numbers against numeric choice lists.
                let as_json = match other {
                    ParamValue::Float(v) => serde_json::json!(v),
                    ParamValue::Int(v) => serde_json::json!(v),
                    ParamValue::Json(v) => v.clone(),
                };
                let idx = choices
                    .iter()
                    .position(|c| c == &as_json)
                    .ok_or_else(|| reject(format!("{other} is not one of the choices")))?;
                Ok((idx as f64 + 0.5) / choices.len() as f64)
            }
            (Self::Int { .. }, other) => Err(reject(format!("expected an integer, got {other}"))),
        }
    }

    /// Whether a concrete value lies inside the distribution.
    pub fn contains(&self, value: &ParamValue) -> bool {
        self.encode("", value).is_ok()
    }
}

/// A named parameter dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub distribution: Distribution,
}

/// The full search space: an ordered list of parameter definitions.
///
/// Order is significant: QMC sequences and CMA-ES vectorize parameters by
/// their position here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub params: Vec<ParamDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn add_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            distribution: Distribution::Uniform { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            distribution: Distribution::LogUniform { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            distribution: Distribution::Int { low, high },
        });
        self
    }

    pub fn add_categorical(
        mut self,
        name: impl Into<String>,
        choices: Vec<serde_json::Value>,
    ) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            distribution: Distribution::Categorical { choices },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.distribution)
    }

    /// Validate every dimension; an empty space is rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.params.is_empty() {
            return Err(ConfigError::EmptySpace);
        }
        for def in &self.params {
            def.distribution.validate(&def.name)?;
        }
        Ok(())
    }
}

/// The runner accepts either a fixed space or a space derived from the
/// trial index.
#[derive(Clone)]
pub enum SpaceSource {
    Static(SearchSpace),
    PerTrial(Arc<dyn Fn(u32) -> SearchSpace + Send + Sync>),
}

impl SpaceSource {
    pub fn resolve(&self, trial_index: u32) -> SearchSpace {
        match self {
            Self::Static(space) => space.clone(),
            Self::PerTrial(f) => f(trial_index),
        }
    }
}

impl From<SearchSpace> for SpaceSource {
    fn from(space: SearchSpace) -> Self {
        Self::Static(space)
    }
}

impl std::fmt::Debug for SpaceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(space) => f.debug_tuple("Static").field(space).finish(),
            Self::PerTrial(_) => f.write_str("PerTrial(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_decode_spans_bounds() {
        let d = Distribution::Uniform {
            low: -5.0,
            high: 5.0,
        };
        assert_eq!(d.decode(0.0), ParamValue::Float(-5.0));
        match d.decode(0.5) {
            ParamValue::Float(v) => assert!((v - 0.0).abs() < 1e-9),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn log_uniform_decode_is_geometric() {
        let d = Distribution::LogUniform {
            low: 1e-4,
            high: 1.0,
        };
        match d.decode(0.5) {
            ParamValue::Float(v) => assert!((v - 1e-2).abs() < 1e-9),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn int_decode_covers_inclusive_range() {
        let d = Distribution::Int { low: 1, high: 3 };
        assert_eq!(d.decode(0.0), ParamValue::Int(1));
        assert_eq!(d.decode(0.4), ParamValue::Int(2));
        assert_eq!(d.decode(0.99), ParamValue::Int(3));
    }

    #[test]
    fn encode_decode_round_trips() {
        let cases: Vec<(Distribution, ParamValue)> = vec![
            (
                Distribution::Uniform {
                    low: -2.0,
                    high: 2.0,
                },
                ParamValue::Float(1.25),
            ),
            (
                Distribution::LogUniform {
                    low: 1e-3,
                    high: 1e2,
                },
                ParamValue::Float(0.5),
            ),
            (Distribution::Int { low: -3, high: 7 }, ParamValue::Int(4)),
            (
                Distribution::Categorical {
                    choices: vec![
                        serde_json::json!("adam"),
                        serde_json::json!("sgd"),
                        serde_json::json!("rmsprop"),
                    ],
                },
                ParamValue::Json(serde_json::json!("sgd")),
            ),
        ];
        for (dist, value) in cases {
            let u = dist.encode("p", &value).unwrap();
            let back = dist.decode(u);
            match (&value, &back) {
                (ParamValue::Float(a), ParamValue::Float(b)) => {
                    assert!((a - b).abs() < 1e-9, "{a} != {b}")
                }
                _ => assert_eq!(value, back),
            }
        }
    }

    #[test]
    fn validation_rejects_bad_descriptors() {
        assert!(Distribution::Uniform {
            low: 1.0,
            high: 1.0
        }
        .validate("x")
        .is_err());
        assert!(Distribution::LogUniform {
            low: 0.0,
            high: 1.0
        }
        .validate("x")
        .is_err());
        assert!(Distribution::Categorical { choices: vec![] }
            .validate("x")
            .is_err());
        assert!(Distribution::Int { low: 5, high: 2 }.validate("x").is_err());
    }

    #[test]
    fn out_of_bounds_value_is_rejected() {
        let d = Distribution::Uniform {
            low: -2.0,
            high: 2.0,
        };
        let err = d.encode("x", &ParamValue::Float(3.0)).unwrap_err();
        assert!(err.to_string().contains("outside"));
        assert!(!d.contains(&ParamValue::Float(3.0)));
        assert!(d.contains(&ParamValue::Float(0.0)));
    }

    #[test]
    fn space_builder_chain_and_lookup() {
        let space = SearchSpace::new()
            .add_uniform("x", -5.0, 5.0)
            .add_int("layers", 1, 8)
            .add_categorical("opt", vec![serde_json::json!("adam")]);
        assert_eq!(space.len(), 3);
        assert!(space.validate().is_ok());
        assert!(matches!(
            space.get("layers"),
            Some(Distribution::Int { low: 1, high: 8 })
        ));
    }

    #[test]
    fn per_trial_space_source() {
        let source = SpaceSource::PerTrial(Arc::new(|i| {
            SearchSpace::new().add_uniform("x", 0.0, 1.0 + i as f64)
        }));
        let s0 = source.resolve(0);
        let s3 = source.resolve(3);
        assert_ne!(s0.get("x"), s3.get("x"));
    }
}
