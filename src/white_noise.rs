//! Diagonal white noise: one variance function per selection group.

use crate::cache::ResultCache;
use crate::operator::NoiseOperator;
use crate::selection::{Masks, Selection, resolve_masks};
use crate::signal::{NoiseResult, Signal};
use crate::types::{ObservationSet, Parameter, ParameterSet, ParameterSpec, cache_key, compose_name};
use crate::variance::{VarianceFn, VarianceFunction, VarianceModel};
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteNoiseConfig {
    /// Optional signal name, inserted into parameter names and the signal id.
    #[serde(default)]
    pub name: String,
    pub variance: VarianceModel,
}

impl WhiteNoiseConfig {
    /// Config for a legacy convention name with every parameter varying.
    pub fn from_convention(convention: &str) -> NoiseResult<Self> {
        Ok(Self {
            name: String::new(),
            variance: VarianceModel::from_convention(convention)?,
        })
    }
}

pub struct WhiteNoise {
    name: String,
    signal_id: String,
    toaerrs: Array1<f64>,
    /// `(mask, variance)` per selection key, in key order.
    groups: Vec<(Array1<bool>, VarianceFunction)>,
    parameters: Vec<Parameter>,
    cache: ResultCache<NoiseOperator>,
}

impl WhiteNoise {
    pub fn new(
        config: &WhiteNoiseConfig,
        observations: &ObservationSet,
        selection: &dyn Selection,
    ) -> NoiseResult<Self> {
        Self::with_variance(Box::new(config.variance), &config.name, observations, selection)
    }

    /// White noise driven by any per-TOA variance function. Each selection
    /// group gets its own copy of the function's parameters, named
    /// `<dataset>_<name>_<group>_<base>`.
    pub fn with_variance(
        variance: Box<dyn VarianceFn>,
        name: &str,
        observations: &ObservationSet,
        selection: &dyn Selection,
    ) -> NoiseResult<Self> {
        let variance: Arc<dyn VarianceFn> = Arc::from(variance);
        let masks: Masks = resolve_masks(selection, observations)?;
        let groups: Vec<(Array1<bool>, VarianceFunction)> = masks
            .into_iter()
            .map(|(key, mask)| {
                let prefix = compose_name(&[observations.name(), name, &key]);
                (mask, VarianceFunction::new(Arc::clone(&variance), &prefix))
            })
            .collect();

        let mut parameters: Vec<Parameter> = Vec::new();
        for (_, function) in &groups {
            for p in function.parameters() {
                if !parameters.iter().any(|q| q.name == p.name) {
                    parameters.push(p.clone());
                }
            }
        }

        let signal_id = compose_name(&[variance.signal_id(), name]);
        let name = compose_name(&[observations.name(), &signal_id]);
        log::debug!(
            "{name}: {} selection groups, {} parameters",
            groups.len(),
            parameters.len()
        );
        Ok(Self {
            name,
            signal_id,
            toaerrs: observations.toaerrs().clone(),
            groups,
            parameters,
            cache: ResultCache::new(),
        })
    }

    /// EFAC, plus a T2EQUAD floor when `log10_t2equad` is given.
    pub fn measurement_noise(
        efac: ParameterSpec,
        log10_t2equad: Option<ParameterSpec>,
        name: &str,
        observations: &ObservationSet,
        selection: &dyn Selection,
    ) -> NoiseResult<Self> {
        let variance = match log10_t2equad {
            Some(log10_t2equad) => VarianceModel::EfacT2Equad {
                efac,
                log10_t2equad,
            },
            None => VarianceModel::Efac { efac },
        };
        let config = WhiteNoiseConfig {
            name: name.to_string(),
            variance,
        };
        Self::new(&config, observations, selection)
    }

    /// Legacy EQUAD-only noise, not scaled by EFAC.
    pub fn tnequad_noise(
        log10_tnequad: ParameterSpec,
        name: &str,
        observations: &ObservationSet,
        selection: &dyn Selection,
    ) -> NoiseResult<Self> {
        let config = WhiteNoiseConfig {
            name: name.to_string(),
            variance: VarianceModel::TnEquad { log10_tnequad },
        };
        Self::new(&config, observations, selection)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Diagonal covariance for the current parameters. TOAs outside every
    /// selection group get zero variance.
    pub fn get_ndiag(&mut self, params: &ParameterSet) -> NoiseResult<Arc<NoiseOperator>> {
        let key = cache_key(&self.parameters, params)?;
        let (groups, toaerrs) = (&self.groups, &self.toaerrs);
        self.cache.get_or_try_insert_with(key, || {
            let mut ndiag = Array1::<f64>::zeros(toaerrs.len());
            for (mask, function) in groups {
                let variance = function.variance(params, toaerrs)?;
                Zip::from(&mut ndiag)
                    .and(mask)
                    .and(&variance)
                    .for_each(|acc, &m, &v| {
                        if m {
                            *acc += v;
                        }
                    });
            }
            Ok(NoiseOperator::Diagonal(ndiag))
        })
    }

    pub fn cache(&self) -> &ResultCache<NoiseOperator> {
        &self.cache
    }
}

impl Signal for WhiteNoise {
    fn name(&self) -> &str {
        &self.name
    }

    fn signal_id(&self) -> &str {
        &self.signal_id
    }

    fn ndiag_params(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.is_varying())
            .map(|p| p.name.clone())
            .collect()
    }
}
