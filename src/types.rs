use crate::signal::{NoiseError, NoiseResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Time-of-arrival dataset for one pulsar, as handed over by the loader.
///
/// Arrays are parallel: entry `i` of each describes TOA `i`. Times and errors
/// are in seconds.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    name: String,
    toas: Array1<f64>,
    toaerrs: Array1<f64>,
    backends: Vec<String>,
}

impl ObservationSet {
    pub fn new(
        name: impl Into<String>,
        toas: Array1<f64>,
        toaerrs: Array1<f64>,
        backends: Vec<String>,
    ) -> NoiseResult<Self> {
        let n = toas.len();
        if toaerrs.len() != n {
            return Err(NoiseError::ShapeMismatch {
                context: "toa errors".to_string(),
                expected: n,
                found: toaerrs.len(),
            });
        }
        if backends.len() != n {
            return Err(NoiseError::ShapeMismatch {
                context: "backend labels".to_string(),
                expected: n,
                found: backends.len(),
            });
        }
        if let Some(i) = toas.iter().position(|t| !t.is_finite()) {
            return Err(NoiseError::InvalidConfig(format!(
                "toa {i} is not finite ({})",
                toas[i]
            )));
        }
        if let Some(i) = toaerrs.iter().position(|e| !e.is_finite() || *e < 0.0) {
            return Err(NoiseError::InvalidConfig(format!(
                "toa error {i} must be finite and non-negative, got {}",
                toaerrs[i]
            )));
        }
        Ok(Self {
            name: name.into(),
            toas,
            toaerrs,
            backends,
        })
    }

    /// Dataset with a single backend label shared by every TOA.
    pub fn single_backend(
        name: impl Into<String>,
        toas: Array1<f64>,
        toaerrs: Array1<f64>,
        backend: &str,
    ) -> NoiseResult<Self> {
        let backends = vec![backend.to_string(); toas.len()];
        Self::new(name, toas, toaerrs, backends)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.toas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toas.is_empty()
    }

    pub fn toas(&self) -> &Array1<f64> {
        &self.toas
    }

    pub fn toaerrs(&self) -> &Array1<f64> {
        &self.toaerrs
    }

    pub fn backends(&self) -> &[String] {
        &self.backends
    }
}

/// How a model obtains the value of one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSpec {
    /// Read from the [`ParameterSet`] on every evaluation.
    #[default]
    Varying,
    /// Held fixed at construction; never part of a cache key.
    Constant(f64),
}

/// A fully named model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub spec: ParameterSpec,
}

impl Parameter {
    pub fn new(name: impl Into<String>, spec: ParameterSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn is_varying(&self) -> bool {
        matches!(self.spec, ParameterSpec::Varying)
    }

    pub fn value(&self, params: &ParameterSet) -> NoiseResult<f64> {
        match self.spec {
            ParameterSpec::Varying => params.get(&self.name),
            ParameterSpec::Constant(value) => Ok(value),
        }
    }
}

/// Join the non-empty parts of a composite parameter or signal name with `_`.
///
/// `compose_name(&["J1713", "", "ao_327", "efac"])` gives `J1713_ao_327_efac`.
pub fn compose_name(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Current parameter values for one likelihood evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> NoiseResult<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| NoiseError::MissingParameter(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Bit-exact cache key for the current values of `parameters`.
///
/// Constant parameters are skipped; they cannot change between evaluations.
pub(crate) fn cache_key(parameters: &[Parameter], values: &ParameterSet) -> NoiseResult<Vec<u64>> {
    parameters
        .iter()
        .filter(|p| p.is_varying())
        .map(|p| values.get(&p.name).map(f64::to_bits))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn composite_names_skip_empty_parts() {
        assert_eq!(compose_name(&["J0030", "", "", "efac"]), "J0030_efac");
        assert_eq!(
            compose_name(&["J0030", "wn", "guppi", "log10_ecorr"]),
            "J0030_wn_guppi_log10_ecorr"
        );
    }

    #[test]
    fn observation_set_rejects_mismatched_lengths() {
        let err = ObservationSet::new(
            "J0030",
            array![0.0, 1.0],
            array![1e-6],
            vec!["a".into(), "a".into()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NoiseError::ShapeMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn observation_set_rejects_negative_errors() {
        let err =
            ObservationSet::single_backend("J0030", array![0.0, 1.0], array![1e-6, -1e-6], "a")
                .unwrap_err();
        assert!(matches!(err, NoiseError::InvalidConfig(_)));
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let params = ParameterSet::new().with("a", 1.0);
        let err = params.get("b").unwrap_err();
        assert!(matches!(err, NoiseError::MissingParameter(ref n) if n == "b"));
    }

    #[test]
    fn cache_key_ignores_constants() {
        let parameters = vec![
            Parameter::new("x", ParameterSpec::Varying),
            Parameter::new("y", ParameterSpec::Constant(3.0)),
        ];
        let values: ParameterSet = [("x", 1.5)].into_iter().collect();
        let key = cache_key(&parameters, &values).unwrap();
        assert_eq!(key, vec![1.5_f64.to_bits()]);
    }
}
