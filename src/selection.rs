use crate::signal::{NoiseResult, ensure_len};
use crate::types::ObservationSet;
use ndarray::Array1;
use std::collections::BTreeMap;

/// Group key -> membership mask over the observations of one dataset.
pub type Masks = BTreeMap<String, Array1<bool>>;

/// Partitions a dataset into named groups (backends, receivers, time spans).
///
/// Groups may overlap or leave observations uncovered; models do not enforce
/// a partition.
pub trait Selection {
    fn masks(&self, observations: &ObservationSet) -> NoiseResult<Masks>;
}

/// One group with the empty key covering every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSelection;

impl Selection for NoSelection {
    fn masks(&self, observations: &ObservationSet) -> NoiseResult<Masks> {
        let mut masks = Masks::new();
        masks.insert(String::new(), Array1::from_elem(observations.len(), true));
        Ok(masks)
    }
}

/// One group per distinct backend label.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByBackend;

impl Selection for ByBackend {
    fn masks(&self, observations: &ObservationSet) -> NoiseResult<Masks> {
        let mut masks = Masks::new();
        for (i, backend) in observations.backends().iter().enumerate() {
            masks
                .entry(backend.clone())
                .or_insert_with(|| Array1::from_elem(observations.len(), false))[i] = true;
        }
        Ok(masks)
    }
}

/// Masks computed elsewhere, e.g. by a selection DSL.
#[derive(Debug, Clone, Default)]
pub struct ExplicitMasks {
    masks: Masks,
}

impl ExplicitMasks {
    pub fn new(masks: Masks) -> Self {
        Self { masks }
    }
}

impl Selection for ExplicitMasks {
    fn masks(&self, observations: &ObservationSet) -> NoiseResult<Masks> {
        for (key, mask) in &self.masks {
            ensure_len(&format!("selection mask '{key}'"), observations.len(), mask.len())?;
        }
        Ok(self.masks.clone())
    }
}

/// Run a selection and check every mask against the observation count.
pub(crate) fn resolve_masks(
    selection: &dyn Selection,
    observations: &ObservationSet,
) -> NoiseResult<Masks> {
    let masks = selection.masks(observations)?;
    for (key, mask) in &masks {
        ensure_len(&format!("selection mask '{key}'"), observations.len(), mask.len())?;
    }
    Ok(masks)
}
