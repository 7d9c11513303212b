use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Signal type shared by every model in this crate.
pub const WHITE_NOISE: &str = "white noise";

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("EcorrKernelNoise does not support method: {0}")]
    UnsupportedMethod(String),

    #[error(
        "The '{convention}' white-noise convention has been removed. Use \
        WhiteNoise::measurement_noise for the tempo/tempo2/pint definition \
        [efac^2 (toaerr^2 + t2equad^2)] or WhiteNoise::tnequad_noise for the legacy \
        EQUAD-only definition [tnequad^2]."
    )]
    RemovedConvention { convention: String },

    #[error("Unknown white-noise variance convention: {0}")]
    UnsupportedConvention(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch in {context}: expected length {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Parameter '{0}' is required by a noise model but was not supplied")]
    MissingParameter(String),

    #[error("Noise covariance is not positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("Factorization of the noise covariance failed: {0}")]
    Factorization(#[from] FaerLinalgError),
}

pub type NoiseResult<T> = Result<T, NoiseError>;

pub(crate) fn ensure_len(context: &str, expected: usize, found: usize) -> NoiseResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(NoiseError::ShapeMismatch {
            context: context.to_string(),
            expected,
            found,
        })
    }
}

/// Common surface of every noise signal instance attached to a dataset.
pub trait Signal {
    /// Fully qualified instance name, `<dataset>_<signal_id>`.
    fn name(&self) -> &str;

    fn signal_id(&self) -> &str;

    fn signal_type(&self) -> &'static str {
        WHITE_NOISE
    }

    /// Names of the parameters whose values drive this signal's cache.
    fn ndiag_params(&self) -> Vec<String>;
}
