//! Grouping of TOAs into observing epochs.
//!
//! Multi-channel observations produce several TOAs within seconds of each
//! other. Those TOAs share an epoch and receive a fully correlated ECORR
//! contribution. Epochs are formed greedily in time order: a TOA joins the
//! current epoch when it lies less than `dt` after the epoch's *first* TOA.

use crate::selection::Masks;
use crate::signal::{NoiseError, NoiseResult, ensure_len};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EPOCH_DT: f64 = 1.0;
pub const DEFAULT_MIN_GROUP_SIZE: usize = 2;

fn default_dt() -> f64 {
    DEFAULT_EPOCH_DT
}

fn default_min_group_size() -> usize {
    DEFAULT_MIN_GROUP_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Maximum separation (seconds) from an epoch's first TOA.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Epochs with fewer TOAs are discarded.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_EPOCH_DT,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
        }
    }
}

impl QuantizationConfig {
    pub fn validate(&self) -> NoiseResult<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(NoiseError::InvalidConfig(format!(
                "quantization dt must be finite and positive, got {}",
                self.dt
            )));
        }
        if self.min_group_size == 0 {
            return Err(NoiseError::InvalidConfig(
                "quantization min_group_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Group `times` into epochs. Returned index lists are ascending and only
/// epochs with at least `min_group_size` members survive.
pub fn quantize(times: &[f64], config: &QuantizationConfig) -> NoiseResult<Vec<Vec<usize>>> {
    config.validate()?;
    if times.is_empty() {
        return Ok(Vec::new());
    }

    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let mut buckets: Vec<Vec<usize>> = vec![vec![order[0]]];
    let mut bucket_ref = times[order[0]];
    for &i in &order[1..] {
        if times[i] - bucket_ref < config.dt {
            if let Some(bucket) = buckets.last_mut() {
                bucket.push(i);
            }
        } else {
            bucket_ref = times[i];
            buckets.push(vec![i]);
        }
    }

    Ok(buckets
        .into_iter()
        .filter(|b| b.len() >= config.min_group_size)
        .map(|mut b| {
            b.sort_unstable();
            b
        })
        .collect())
}

/// One correlated epoch: global TOA indices plus the selection key whose
/// amplitude parameter governs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epoch {
    pub key: String,
    pub indices: Vec<usize>,
}

impl Epoch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// All epochs of a dataset, concatenated across selection groups in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochLayout {
    nobs: usize,
    epochs: Vec<Epoch>,
}

impl EpochLayout {
    /// Validate and wrap a precomputed epoch list.
    ///
    /// Indices must be in range and strictly increasing within an epoch, and
    /// no TOA may belong to two epochs.
    pub fn new(nobs: usize, epochs: Vec<Epoch>) -> NoiseResult<Self> {
        let mut owner = vec![false; nobs];
        for (e, epoch) in epochs.iter().enumerate() {
            if epoch.indices.windows(2).any(|w| w[0] >= w[1]) {
                return Err(NoiseError::InvalidConfig(format!(
                    "epoch {e} indices are not strictly increasing"
                )));
            }
            for &i in &epoch.indices {
                if i >= nobs {
                    return Err(NoiseError::ShapeMismatch {
                        context: format!("epoch {e} index"),
                        expected: nobs,
                        found: i + 1,
                    });
                }
                if owner[i] {
                    return Err(NoiseError::InvalidConfig(format!(
                        "toa {i} belongs to more than one epoch"
                    )));
                }
                owner[i] = true;
            }
        }
        Ok(Self { nobs, epochs })
    }

    pub fn nobs(&self) -> usize {
        self.nobs
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Number of TOAs in each epoch.
    pub fn weights(&self) -> Array1<f64> {
        self.epochs.iter().map(|e| e.len() as f64).collect()
    }

    /// `nobs x nepochs` quantization matrix, `U[i, e] = 1` when TOA `i` is in
    /// epoch `e`. Meant for diagnostics and small problems.
    pub fn quantization_matrix(&self) -> Array2<f64> {
        let mut u = Array2::<f64>::zeros((self.nobs, self.epochs.len()));
        for (e, epoch) in self.epochs.iter().enumerate() {
            for &i in &epoch.indices {
                u[[i, e]] = 1.0;
            }
        }
        u
    }

    /// Epoch membership per TOA, `None` outside every epoch.
    pub fn epoch_of(&self) -> Vec<Option<usize>> {
        let mut out = vec![None; self.nobs];
        for (e, epoch) in self.epochs.iter().enumerate() {
            for &i in &epoch.indices {
                out[i] = Some(e);
            }
        }
        out
    }
}

/// Quantize each selection group independently and concatenate the results.
///
/// Keys are visited in sorted order, which `Masks` guarantees.
pub fn quantize_selection(
    times: &Array1<f64>,
    masks: &Masks,
    config: &QuantizationConfig,
) -> NoiseResult<EpochLayout> {
    config.validate()?;
    let nobs = times.len();
    let mut epochs = Vec::new();
    for (key, mask) in masks {
        ensure_len(&format!("selection mask '{key}'"), nobs, mask.len())?;
        let members: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        let local_times: Vec<f64> = members.iter().map(|&i| times[i]).collect();
        for group in quantize(&local_times, config)? {
            epochs.push(Epoch {
                key: key.clone(),
                indices: group.into_iter().map(|local| members[local]).collect(),
            });
        }
    }
    EpochLayout::new(nobs, epochs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn groups_by_distance_from_first_toa() {
        // 0.0, 0.6 and 0.9 are within 1s of 0.0; 1.2 is not, even though it
        // is within 1s of 0.9.
        let times = [0.0, 0.6, 0.9, 1.2, 1.5, 50.0];
        let groups = quantize(&times, &QuantizationConfig::default()).unwrap();
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn unsorted_input_yields_sorted_indices() {
        let times = [10.0, 0.2, 10.5, 0.0];
        let groups = quantize(&times, &QuantizationConfig::default()).unwrap();
        assert_eq!(groups, vec![vec![1, 3], vec![0, 2]]);
    }

    #[test]
    fn min_group_size_drops_small_epochs() {
        let times = [0.0, 0.1, 0.2, 5.0, 5.1, 9.0];
        let config = QuantizationConfig {
            min_group_size: 3,
            ..QuantizationConfig::default()
        };
        assert_eq!(quantize(&times, &config).unwrap(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn rejects_bad_config() {
        let config = QuantizationConfig {
            dt: 0.0,
            ..QuantizationConfig::default()
        };
        assert!(matches!(
            quantize(&[0.0], &config),
            Err(NoiseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn selection_epochs_keep_provenance_and_global_indices() {
        let times = array![0.0, 0.1, 0.2, 0.3, 30.0, 30.1];
        let mut masks = Masks::new();
        masks.insert("a".into(), array![true, false, true, false, true, true]);
        masks.insert("b".into(), array![false, true, false, true, false, false]);
        let layout = quantize_selection(&times, &masks, &QuantizationConfig::default()).unwrap();
        let got: Vec<(&str, &[usize])> = layout
            .epochs()
            .iter()
            .map(|e| (e.key.as_str(), e.indices.as_slice()))
            .collect();
        assert_eq!(
            got,
            vec![("a", &[0, 2][..]), ("a", &[4, 5][..]), ("b", &[1, 3][..])]
        );
        assert_eq!(layout.weights(), array![2.0, 2.0, 2.0]);
        let u = layout.quantization_matrix();
        assert_eq!(u.dim(), (6, 3));
        assert_eq!(u.sum(), 6.0);
        assert_eq!(u[[3, 2]], 1.0);
    }

    #[test]
    fn layout_rejects_overlapping_epochs() {
        let epochs = vec![
            Epoch {
                key: "a".into(),
                indices: vec![0, 1],
            },
            Epoch {
                key: "b".into(),
                indices: vec![1, 2],
            },
        ];
        assert!(EpochLayout::new(3, epochs).is_err());
    }

    #[test]
    fn layout_rejects_out_of_range_indices() {
        let epochs = vec![Epoch {
            key: String::new(),
            indices: vec![0, 7],
        }];
        assert!(matches!(
            EpochLayout::new(3, epochs),
            Err(NoiseError::ShapeMismatch { .. })
        ));
    }
}
