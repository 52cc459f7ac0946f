//! A degenerate sampler returning user-supplied values verbatim, for
//! objective-function testing.

use rand::RngCore;

use scout_types::{ConfigError, SamplerError, SearchSpace, Trial};

use crate::{Params, Sampler};

/// Returns fixed parameter values on every call, after validating them
/// against the search space. Out-of-bounds numbers and non-choice
/// categoricals are rejected at construction.
#[derive(Debug, Clone)]
pub struct FixedTrial {
    params: Params,
}

impl FixedTrial {
    pub fn new(space: &SearchSpace, params: Params) -> Result<Self, ConfigError> {
        for def in &space.params {
            match params.get(&def.name) {
                Some(value) => {
                    // encode performs the bounds / membership check.
                    def.distribution.encode(&def.name, value)?;
                }
                None => {
                    return Err(ConfigError::FixedValueRejected {
                        name: def.name.clone(),
                        message: "no value supplied".to_string(),
                    })
                }
            }
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl Sampler for FixedTrial {
    fn next(
        &mut self,
        _space: &SearchSpace,
        _trial_index: u32,
        _history: &[Trial],
        _rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        Ok(Some(self.params.clone()))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_types::ParamValue;
    use std::collections::BTreeMap;

    #[test]
    fn out_of_bounds_value_is_a_config_error() {
        let space = SearchSpace::new()
            .add_uniform("x", -2.0, 2.0)
            .add_uniform("y", -5.0, 5.0);
        let mut params = BTreeMap::new();
        params.insert("x".to_string(), ParamValue::Float(3.0));
        params.insert("y".to_string(), ParamValue::Float(-1.0));

        let err = FixedTrial::new(&space, params).unwrap_err();
        match err {
            ConfigError::FixedValueRejected { name, .. } => assert_eq!(name, "x"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn valid_values_pass_and_are_returned_verbatim() {
        let space = SearchSpace::new()
            .add_uniform("x", -2.0, 2.0)
            .add_categorical("opt", vec![serde_json::json!("adam"), serde_json::json!("sgd")]);
        let mut params = BTreeMap::new();
        params.insert("x".to_string(), ParamValue::Float(0.5));
        params.insert("opt".to_string(), ParamValue::Json(serde_json::json!("sgd")));

        let mut fixed = FixedTrial::new(&space, params.clone()).unwrap();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let out = fixed.next(&space, 0, &[], &mut rng).unwrap().unwrap();
        assert_eq!(out, params);
    }

    #[test]
    fn missing_and_non_choice_values_rejected() {
        let space = SearchSpace::new().add_categorical("opt", vec![serde_json::json!("adam")]);

        assert!(FixedTrial::new(&space, BTreeMap::new()).is_err());

        let mut params = BTreeMap::new();
        params.insert(
            "opt".to_string(),
            ParamValue::Json(serde_json::json!("lbfgs")),
        );
        assert!(FixedTrial::new(&space, params).is_err());
    }
}
