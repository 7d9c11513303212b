//! ECORR: noise fully correlated within an observing epoch and uncorrelated
//! between epochs.
//!
//! Multi-channel TOAs taken within seconds of each other share a jitter
//! component. The resulting covariance is block diagonal with one
//! `ecorr² · 1·1ᵀ` block per epoch, `ecorr = 10^log10_ecorr` for the selection
//! group owning the epoch. The blocks are never assembled densely; the
//! [`EcorrMethod`] picks one of the representations in [`crate::operator`].

use crate::cache::ResultCache;
use crate::linalg::sparse_exact::BlockSparsePattern;
use crate::notify::FallbackNotifier;
#[cfg(feature = "fast-sherman-morrison")]
use crate::operator::FastShermanMorrison;
use crate::operator::{BlockEcorr, EpochBlocks, NoiseOperator, ShermanMorrison, SparseEcorr};
use crate::quantization::{EpochLayout, QuantizationConfig, quantize_selection};
use crate::selection::{Selection, resolve_masks};
use crate::signal::{NoiseError, NoiseResult, Signal};
use crate::types::{ObservationSet, Parameter, ParameterSet, ParameterSpec, cache_key, compose_name};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const LOG10_ECORR: &str = "log10_ecorr";

/// Whether the optimized Sherman-Morrison routine was compiled in.
pub const FAST_SHERMAN_MORRISON_AVAILABLE: bool = cfg!(feature = "fast-sherman-morrison");

/// Representation used for the ECORR covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EcorrMethod {
    /// Sherman-Morrison with precomputed coefficients and rayon-parallel
    /// multi-column solves.
    #[default]
    FastShermanMorrison,
    /// Closed-form rank-one update per epoch.
    ShermanMorrison,
    /// Explicit CSC matrix over a pattern fixed at construction.
    Sparse,
    /// One dense block per epoch, factorized individually.
    Block,
}

impl EcorrMethod {
    pub const ALL: [EcorrMethod; 4] = [
        EcorrMethod::FastShermanMorrison,
        EcorrMethod::ShermanMorrison,
        EcorrMethod::Sparse,
        EcorrMethod::Block,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastShermanMorrison => "fast-sherman-morrison",
            Self::ShermanMorrison => "sherman-morrison",
            Self::Sparse => "sparse",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for EcorrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcorrMethod {
    type Err = NoiseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| NoiseError::UnsupportedMethod(s.to_string()))
    }
}

impl TryFrom<String> for EcorrMethod {
    type Error = NoiseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EcorrMethod> for String {
    fn from(value: EcorrMethod) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcorrConfig {
    /// Optional signal name, inserted into the signal id.
    pub name: String,
    pub log10_ecorr: ParameterSpec,
    pub method: EcorrMethod,
    pub quantization: QuantizationConfig,
}

impl EcorrConfig {
    pub fn with_method(method: EcorrMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }
}

/// Static structure derived once from the dataset.
struct EcorrStructure {
    nobs: usize,
    method: EcorrMethod,
    indices: Arc<Vec<Vec<usize>>>,
    /// Index into `parameters` of the amplitude governing each epoch.
    epoch_param: Vec<usize>,
    parameters: Vec<Parameter>,
    sparse_pattern: Option<Arc<BlockSparsePattern>>,
}

impl EcorrStructure {
    fn jvec(&self, params: &ParameterSet) -> NoiseResult<Array1<f64>> {
        let amplitudes = self
            .parameters
            .iter()
            .map(|p| p.value(params).map(|v| 10f64.powf(2.0 * v)))
            .collect::<NoiseResult<Vec<f64>>>()?;
        Ok(self.epoch_param.iter().map(|&k| amplitudes[k]).collect())
    }

    fn build(&self, params: &ParameterSet) -> NoiseResult<NoiseOperator> {
        let jvec = self.jvec(params)?;
        log::debug!(
            "ecorr: building {} operator over {} epochs",
            self.method,
            self.indices.len()
        );
        Ok(match self.method {
            EcorrMethod::Sparse => {
                let pattern = self.sparse_pattern.as_ref().ok_or_else(|| {
                    NoiseError::InvalidConfig("sparse pattern was not prepared".to_string())
                })?;
                NoiseOperator::Sparse(SparseEcorr::new(
                    Arc::clone(pattern),
                    Arc::clone(&self.indices),
                    &jvec.to_vec(),
                )?)
            }
            EcorrMethod::ShermanMorrison => NoiseOperator::ShermanMorrison(ShermanMorrison::new(
                self.nobs,
                EpochBlocks::new(Arc::clone(&self.indices), jvec)?,
            )),
            EcorrMethod::FastShermanMorrison => {
                let blocks = EpochBlocks::new(Arc::clone(&self.indices), jvec)?;
                #[cfg(feature = "fast-sherman-morrison")]
                {
                    NoiseOperator::FastShermanMorrison(FastShermanMorrison::new(self.nobs, blocks))
                }
                #[cfg(not(feature = "fast-sherman-morrison"))]
                {
                    NoiseOperator::ShermanMorrison(ShermanMorrison::new(self.nobs, blocks))
                }
            }
            EcorrMethod::Block => NoiseOperator::Block(BlockEcorr::from_amplitudes(
                self.nobs,
                Arc::clone(&self.indices),
                &jvec,
            )?),
        })
    }
}

/// ECORR signal attached to one dataset.
pub struct EcorrKernelNoise {
    name: String,
    signal_id: String,
    requested: EcorrMethod,
    layout: EpochLayout,
    structure: EcorrStructure,
    cache: ResultCache<NoiseOperator>,
}

impl EcorrKernelNoise {
    /// Quantize every selection group and prepare the chosen representation.
    ///
    /// Groups may overlap in their masks, but no TOA may end up in epochs of
    /// two groups: every strategy relies on disjoint epoch blocks, so such a
    /// selection fails with [`NoiseError::InvalidConfig`].
    pub fn new(
        config: &EcorrConfig,
        observations: &ObservationSet,
        selection: &dyn Selection,
    ) -> NoiseResult<Self> {
        Self::with_notifier(config, observations, selection, FallbackNotifier::global())
    }

    pub fn with_notifier(
        config: &EcorrConfig,
        observations: &ObservationSet,
        selection: &dyn Selection,
        notifier: Arc<FallbackNotifier>,
    ) -> NoiseResult<Self> {
        Self::with_availability(
            config,
            observations,
            selection,
            &notifier,
            FAST_SHERMAN_MORRISON_AVAILABLE,
        )
    }

    fn with_availability(
        config: &EcorrConfig,
        observations: &ObservationSet,
        selection: &dyn Selection,
        notifier: &FallbackNotifier,
        fast_available: bool,
    ) -> NoiseResult<Self> {
        let method = resolve_method(config.method, fast_available, notifier);
        config.quantization.validate()?;

        let masks = resolve_masks(selection, observations)?;
        let layout = quantize_selection(observations.toas(), &masks, &config.quantization)?;

        let keys: Vec<&String> = masks.keys().collect();
        let parameters: Vec<Parameter> = keys
            .iter()
            .map(|key| {
                Parameter::new(
                    compose_name(&[observations.name(), key.as_str(), LOG10_ECORR]),
                    config.log10_ecorr,
                )
            })
            .collect();
        let epoch_param = layout
            .epochs()
            .iter()
            .map(|epoch| {
                keys.binary_search(&&epoch.key).map_err(|_| {
                    NoiseError::InvalidConfig(format!("epoch owned by unknown key '{}'", epoch.key))
                })
            })
            .collect::<NoiseResult<Vec<usize>>>()?;
        let indices: Arc<Vec<Vec<usize>>> =
            Arc::new(layout.epochs().iter().map(|e| e.indices.clone()).collect());

        let sparse_pattern = match method {
            EcorrMethod::Sparse => Some(Arc::new(BlockSparsePattern::new(
                observations.len(),
                &indices,
            )?)),
            _ => None,
        };

        let signal_id = compose_name(&["ecorr", &config.name, config.method.as_str()]);
        let name = compose_name(&[observations.name(), &signal_id]);
        log::debug!(
            "{name}: {} epochs across {} selection groups ({} method)",
            layout.len(),
            keys.len(),
            method
        );

        Ok(Self {
            name,
            signal_id,
            requested: config.method,
            layout,
            structure: EcorrStructure {
                nobs: observations.len(),
                method,
                indices,
                epoch_param,
                parameters,
                sparse_pattern,
            },
            cache: ResultCache::new(),
        })
    }

    /// Method asked for in the configuration.
    pub fn requested_method(&self) -> EcorrMethod {
        self.requested
    }

    /// Method actually used after any fallback.
    pub fn method(&self) -> EcorrMethod {
        self.structure.method
    }

    pub fn layout(&self) -> &EpochLayout {
        &self.layout
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.structure.parameters
    }

    /// ECORR covariance for the current parameters, shared with the cache.
    pub fn get_ndiag(&mut self, params: &ParameterSet) -> NoiseResult<Arc<NoiseOperator>> {
        let key = cache_key(&self.structure.parameters, params)?;
        let structure = &self.structure;
        self.cache
            .get_or_try_insert_with(key, || structure.build(params))
    }

    pub fn cache(&self) -> &ResultCache<NoiseOperator> {
        &self.cache
    }
}

impl Signal for EcorrKernelNoise {
    fn name(&self) -> &str {
        &self.name
    }

    fn signal_id(&self) -> &str {
        &self.signal_id
    }

    fn ndiag_params(&self) -> Vec<String> {
        self.structure
            .parameters
            .iter()
            .filter(|p| p.is_varying())
            .map(|p| p.name.clone())
            .collect()
    }
}

fn resolve_method(
    requested: EcorrMethod,
    fast_available: bool,
    notifier: &FallbackNotifier,
) -> EcorrMethod {
    if requested == EcorrMethod::FastShermanMorrison && !fast_available {
        notifier.notify_fallback(
            EcorrMethod::FastShermanMorrison.as_str(),
            EcorrMethod::ShermanMorrison.as_str(),
        );
        return EcorrMethod::ShermanMorrison;
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{ByBackend, ExplicitMasks, Masks, NoSelection};
    use ndarray::array;

    fn dataset() -> ObservationSet {
        ObservationSet::new(
            "J1909",
            array![0.0, 0.2, 0.4, 86400.0, 86400.3, 172800.0],
            array![1e-6, 2e-6, 1e-6, 3e-6, 1e-6, 1e-6],
            vec![
                "guppi".into(),
                "guppi".into(),
                "guppi".into(),
                "puppi".into(),
                "puppi".into(),
                "puppi".into(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn method_names_round_trip() {
        for method in EcorrMethod::ALL {
            assert_eq!(method.as_str().parse::<EcorrMethod>().unwrap(), method);
        }
        assert!(matches!(
            "cholesky".parse::<EcorrMethod>(),
            Err(NoiseError::UnsupportedMethod(ref m)) if m == "cholesky"
        ));
    }

    #[test]
    fn parameter_names_follow_dataset_and_key() {
        let model = EcorrKernelNoise::new(
            &EcorrConfig::with_method(EcorrMethod::ShermanMorrison),
            &dataset(),
            &ByBackend,
        )
        .unwrap();
        assert_eq!(
            model.ndiag_params(),
            vec!["J1909_guppi_log10_ecorr", "J1909_puppi_log10_ecorr"]
        );
        assert_eq!(model.signal_id(), "ecorr_sherman-morrison");
        assert_eq!(model.name(), "J1909_ecorr_sherman-morrison");
        assert_eq!(model.signal_type(), "white noise");
    }

    #[test]
    fn named_signal_id_includes_name() {
        let config = EcorrConfig {
            name: "basis".into(),
            ..EcorrConfig::with_method(EcorrMethod::Block)
        };
        let model = EcorrKernelNoise::new(&config, &dataset(), &NoSelection).unwrap();
        assert_eq!(model.signal_id(), "ecorr_basis_block");
        assert_eq!(model.ndiag_params(), vec!["J1909_log10_ecorr"]);
    }

    #[test]
    fn constant_amplitude_is_not_a_cache_parameter() {
        let config = EcorrConfig {
            log10_ecorr: ParameterSpec::Constant(-6.0),
            ..EcorrConfig::with_method(EcorrMethod::ShermanMorrison)
        };
        let mut model = EcorrKernelNoise::new(&config, &dataset(), &ByBackend).unwrap();
        assert!(model.ndiag_params().is_empty());
        let a = model.get_ndiag(&ParameterSet::new()).unwrap();
        let b = model.get_ndiag(&ParameterSet::new().with("x", 1.0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_amplitude_is_reported() {
        let mut model = EcorrKernelNoise::new(
            &EcorrConfig::with_method(EcorrMethod::Sparse),
            &dataset(),
            &ByBackend,
        )
        .unwrap();
        let params = ParameterSet::new().with("J1909_guppi_log10_ecorr", -6.0);
        assert!(matches!(
            model.get_ndiag(&params),
            Err(NoiseError::MissingParameter(ref n)) if n == "J1909_puppi_log10_ecorr"
        ));
    }

    #[test]
    fn fallback_warns_only_when_fast_routine_is_missing() {
        let notifier = FallbackNotifier::new();
        for _ in 0..3 {
            let model = EcorrKernelNoise::with_notifier(
                &EcorrConfig::default(),
                &dataset(),
                &NoSelection,
                Arc::clone(&notifier),
            )
            .unwrap();
            assert_eq!(model.requested_method(), EcorrMethod::FastShermanMorrison);
            if FAST_SHERMAN_MORRISON_AVAILABLE {
                assert_eq!(model.method(), EcorrMethod::FastShermanMorrison);
            } else {
                assert_eq!(model.method(), EcorrMethod::ShermanMorrison);
            }
        }
        assert_eq!(notifier.has_warned(), !FAST_SHERMAN_MORRISON_AVAILABLE);
        let expected = if FAST_SHERMAN_MORRISON_AVAILABLE { 0 } else { 3 };
        assert_eq!(notifier.fallback_count(), expected);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EcorrConfig = serde_json::from_str(r#"{"method": "block"}"#).unwrap();
        assert_eq!(config.method, EcorrMethod::Block);
        assert_eq!(config.log10_ecorr, ParameterSpec::Varying);
        assert_eq!(config.quantization, QuantizationConfig::default());

        let err = serde_json::from_str::<EcorrConfig>(r#"{"method": "unsupported"}"#).unwrap_err();
        assert!(err.to_string().contains("does not support method: unsupported"));
    }

    #[test]
    fn missing_fast_routine_falls_back_and_warns_once() {
        let notifier = FallbackNotifier::new();
        let params = ParameterSet::new().with("J1909_log10_ecorr", -6.0);
        for _ in 0..3 {
            let mut model = EcorrKernelNoise::with_availability(
                &EcorrConfig::default(),
                &dataset(),
                &NoSelection,
                &notifier,
                false,
            )
            .unwrap();
            assert_eq!(model.requested_method(), EcorrMethod::FastShermanMorrison);
            assert_eq!(model.method(), EcorrMethod::ShermanMorrison);
            assert_eq!(model.signal_id(), "ecorr_fast-sherman-morrison");
            let op = model.get_ndiag(&params).unwrap();
            assert_eq!(op.kind(), "sherman-morrison");
        }
        assert!(notifier.has_warned());
        assert_eq!(notifier.fallback_count(), 3);
        assert!(!notifier.notify_fallback("fast-sherman-morrison", "sherman-morrison"));
    }

    #[test]
    fn explicit_methods_never_fall_back() {
        let notifier = FallbackNotifier::new();
        for method in [EcorrMethod::ShermanMorrison, EcorrMethod::Sparse, EcorrMethod::Block] {
            let model = EcorrKernelNoise::with_availability(
                &EcorrConfig::with_method(method),
                &dataset(),
                &NoSelection,
                &notifier,
                false,
            )
            .unwrap();
            assert_eq!(model.method(), method);
        }
        assert!(!notifier.has_warned());
    }

    #[test]
    fn overlapping_groups_sharing_an_epoch_are_rejected() {
        let obs = ObservationSet::single_backend(
            "J1909",
            array![0.0, 0.1, 0.2],
            array![1e-6, 1e-6, 1e-6],
            "guppi",
        )
        .unwrap();
        let mut masks = Masks::new();
        masks.insert("a".into(), array![true, true, false]);
        masks.insert("b".into(), array![false, true, true]);
        let result = EcorrKernelNoise::new(
            &EcorrConfig::with_method(EcorrMethod::ShermanMorrison),
            &obs,
            &ExplicitMasks::new(masks),
        );
        assert!(matches!(result, Err(NoiseError::InvalidConfig(ref m)) if m.contains("toa 1")));
    }

    #[test]
    fn overlapping_masks_without_shared_epochs_are_accepted() {
        let obs = ObservationSet::single_backend(
            "J1909",
            array![0.0, 0.1, 50.0, 50.1],
            array![1e-6, 1e-6, 1e-6, 1e-6],
            "guppi",
        )
        .unwrap();
        let mut masks = Masks::new();
        // TOA 2 is in both masks but only reaches an epoch through "b".
        masks.insert("a".into(), array![true, true, true, false]);
        masks.insert("b".into(), array![false, false, true, true]);
        let model = EcorrKernelNoise::new(
            &EcorrConfig::with_method(EcorrMethod::Block),
            &obs,
            &ExplicitMasks::new(masks),
        )
        .unwrap();
        assert_eq!(model.layout().len(), 2);
    }
}
