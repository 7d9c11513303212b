//! White-noise covariance models for pulsar timing residuals.
//!
//! Two signals are provided: [`WhiteNoise`], a diagonal per-TOA variance
//! driven by EFAC/EQUAD style parameters, and [`EcorrKernelNoise`], noise
//! fully correlated within observing epochs. Both hand out immutable
//! [`NoiseOperator`] snapshots, memoized on the values of their varying
//! parameters.

pub mod cache;
pub mod ecorr;
pub mod linalg;
pub mod notify;
pub mod operator;
pub mod quantization;
pub mod selection;
pub mod signal;
pub mod types;
pub mod variance;
pub mod white_noise;

pub use cache::ResultCache;
pub use ecorr::{EcorrConfig, EcorrKernelNoise, EcorrMethod, FAST_SHERMAN_MORRISON_AVAILABLE};
pub use notify::FallbackNotifier;
pub use operator::NoiseOperator;
pub use quantization::{Epoch, EpochLayout, QuantizationConfig, quantize, quantize_selection};
pub use selection::{ByBackend, ExplicitMasks, Masks, NoSelection, Selection};
pub use signal::{NoiseError, NoiseResult, Signal};
pub use types::{ObservationSet, Parameter, ParameterSet, ParameterSpec, compose_name};
pub use variance::{VarianceFn, VarianceFunction, VarianceModel};
pub use white_noise::{WhiteNoise, WhiteNoiseConfig};
