//! Per-TOA variance functions used by the diagonal white-noise model.

use crate::signal::{NoiseError, NoiseResult, ensure_len};
use crate::types::{Parameter, ParameterSet, ParameterSpec, compose_name};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const EFAC: &str = "efac";
pub const LOG10_T2EQUAD: &str = "log10_t2equad";
pub const LOG10_TNEQUAD: &str = "log10_tnequad";

/// A per-TOA variance as a function of named parameters and the reported
/// TOA errors.
///
/// `variance` receives the parameter values in the order `parameters`
/// declared them and must return one non-negative entry per TOA.
pub trait VarianceFn: fmt::Debug + Send + Sync {
    /// Parameters of this function, named with `prefix` (see [`compose_name`]).
    fn parameters(&self, prefix: &str) -> Vec<Parameter>;

    fn variance(&self, values: &[f64], toaerrs: &Array1<f64>) -> NoiseResult<Array1<f64>>;

    /// Base of the signal id of a white-noise model built on this function.
    fn signal_id(&self) -> &str {
        "white_noise"
    }
}

/// Supported variance conventions.
///
/// Serialized names match the names accepted by
/// [`VarianceModel::from_convention`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "convention")]
pub enum VarianceModel {
    /// `efac² σ²`
    #[serde(rename = "efac")]
    Efac {
        #[serde(default)]
        efac: ParameterSpec,
    },
    /// `efac² (σ² + 10^(2 log10_t2equad))`, the tempo/tempo2/pint convention.
    #[serde(rename = "efac_t2equad", alias = "t2equad", alias = "measurement_noise")]
    EfacT2Equad {
        #[serde(default)]
        efac: ParameterSpec,
        #[serde(default)]
        log10_t2equad: ParameterSpec,
    },
    /// `10^(2 log10_tnequad)`. Not scaled by EFAC and independent of σ.
    #[serde(rename = "tnequad")]
    TnEquad {
        #[serde(default)]
        log10_tnequad: ParameterSpec,
    },
}

impl VarianceModel {
    /// Names accepted by [`VarianceModel::from_convention`].
    pub const CONVENTIONS: [&'static str; 5] =
        ["efac", "efac_t2equad", "t2equad", "measurement_noise", "tnequad"];

    /// Resolve a convention by name with every parameter varying.
    ///
    /// `"equad"` names the removed convention whose meaning was ambiguous
    /// between the two EQUAD definitions and is rejected.
    pub fn from_convention(name: &str) -> NoiseResult<Self> {
        match name {
            "efac" => Ok(Self::Efac {
                efac: ParameterSpec::Varying,
            }),
            "t2equad" | "efac_t2equad" | "measurement_noise" => Ok(Self::EfacT2Equad {
                efac: ParameterSpec::Varying,
                log10_t2equad: ParameterSpec::Varying,
            }),
            "tnequad" => Ok(Self::TnEquad {
                log10_tnequad: ParameterSpec::Varying,
            }),
            "equad" => Err(NoiseError::RemovedConvention {
                convention: name.to_string(),
            }),
            other => Err(NoiseError::UnsupportedConvention(other.to_string())),
        }
    }

    /// Bind this convention to the parameters of one selection group.
    pub fn bind(&self, prefix: &str) -> VarianceFunction {
        VarianceFunction::new(Arc::new(*self), prefix)
    }
}

impl VarianceFn for VarianceModel {
    fn parameters(&self, prefix: &str) -> Vec<Parameter> {
        let named = |base: &str, spec: ParameterSpec| {
            Parameter::new(compose_name(&[prefix, base]), spec)
        };
        match *self {
            Self::Efac { efac } => vec![named(EFAC, efac)],
            Self::EfacT2Equad {
                efac,
                log10_t2equad,
            } => vec![named(EFAC, efac), named(LOG10_T2EQUAD, log10_t2equad)],
            Self::TnEquad { log10_tnequad } => vec![named(LOG10_TNEQUAD, log10_tnequad)],
        }
    }

    fn variance(&self, values: &[f64], toaerrs: &Array1<f64>) -> NoiseResult<Array1<f64>> {
        Ok(match (*self, values) {
            (Self::Efac { .. }, &[efac]) => efac_ndiag(toaerrs, efac),
            (Self::EfacT2Equad { .. }, &[efac, log10_t2equad]) => {
                combined_ndiag(toaerrs, efac, log10_t2equad)
            }
            (Self::TnEquad { .. }, &[log10_tnequad]) => tnequad_ndiag(toaerrs.len(), log10_tnequad),
            _ => {
                return Err(NoiseError::ShapeMismatch {
                    context: format!("{self:?} parameter values"),
                    expected: self.parameters("").len(),
                    found: values.len(),
                });
            }
        })
    }

    fn signal_id(&self) -> &str {
        match self {
            Self::Efac { .. } | Self::EfacT2Equad { .. } => "measurement_noise",
            Self::TnEquad { .. } => "tnequad",
        }
    }
}

/// A [`VarianceFn`] with concrete parameter names.
#[derive(Debug, Clone)]
pub struct VarianceFunction {
    function: Arc<dyn VarianceFn>,
    parameters: Vec<Parameter>,
}

impl VarianceFunction {
    pub fn new(function: Arc<dyn VarianceFn>, prefix: &str) -> Self {
        let parameters = function.parameters(prefix);
        Self {
            function,
            parameters,
        }
    }

    pub fn function(&self) -> &dyn VarianceFn {
        self.function.as_ref()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Variance of every TOA for the current parameters, given the reported
    /// TOA errors.
    pub fn variance(&self, params: &ParameterSet, toaerrs: &Array1<f64>) -> NoiseResult<Array1<f64>> {
        let values = self
            .parameters
            .iter()
            .map(|p| p.value(params))
            .collect::<NoiseResult<Vec<f64>>>()?;
        let variance = self.function.variance(&values, toaerrs)?;
        ensure_len("variance function output", toaerrs.len(), variance.len())?;
        Ok(variance)
    }
}

pub fn efac_ndiag(toaerrs: &Array1<f64>, efac: f64) -> Array1<f64> {
    toaerrs.mapv(|e| efac * efac * (e * e))
}

pub fn combined_ndiag(toaerrs: &Array1<f64>, efac: f64, log10_t2equad: f64) -> Array1<f64> {
    let floor = 10f64.powf(2.0 * log10_t2equad);
    toaerrs.mapv(|e| efac * efac * (e * e + floor))
}

pub fn tnequad_ndiag(nobs: usize, log10_tnequad: f64) -> Array1<f64> {
    Array1::from_elem(nobs, 10f64.powf(2.0 * log10_tnequad))
}
