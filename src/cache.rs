use std::sync::Arc;

/// Single-entry memo of the last value a model produced.
///
/// The key is the bit pattern of the model's varying parameter values, so any
/// change (including `-0.0` vs `0.0`) is a miss. Only the most recent entry is
/// kept; likelihood samplers rarely revisit an earlier point exactly.
#[derive(Debug)]
pub struct ResultCache<T> {
    entry: Option<(Vec<u64>, Arc<T>)>,
    hits: u64,
    misses: u64,
}

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self {
            entry: None,
            hits: 0,
            misses: 0,
        }
    }
}

impl<T> ResultCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_insert_with<E, F>(&mut self, key: Vec<u64>, compute: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some((cached_key, value)) = &self.entry
            && *cached_key == key
        {
            self.hits += 1;
            return Ok(Arc::clone(value));
        }
        self.misses += 1;
        let value = Arc::new(compute()?);
        self.entry = Some((key, Arc::clone(&value)));
        Ok(value)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_key_returns_same_allocation() {
        let mut cache = ResultCache::<Vec<f64>>::new();
        let first = cache
            .get_or_try_insert_with::<(), _>(vec![1], || Ok(vec![1.0]))
            .unwrap();
        let second = cache
            .get_or_try_insert_with::<(), _>(vec![1], || panic!("must not recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn changed_key_recomputes() {
        let mut cache = ResultCache::<f64>::new();
        let a = cache
            .get_or_try_insert_with::<(), _>(vec![1], || Ok(1.0))
            .unwrap();
        let b = cache
            .get_or_try_insert_with::<(), _>(vec![2], || Ok(2.0))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 2.0);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn failed_compute_leaves_previous_entry() {
        let mut cache = ResultCache::<f64>::new();
        cache
            .get_or_try_insert_with::<&str, _>(vec![1], || Ok(1.0))
            .unwrap();
        assert!(
            cache
                .get_or_try_insert_with(vec![2], || Err("boom"))
                .is_err()
        );
        let again = cache
            .get_or_try_insert_with::<&str, _>(vec![1], || Err("unused"))
            .unwrap();
        assert_eq!(*again, 1.0);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let mut cache = ResultCache::<f64>::new();
        cache
            .get_or_try_insert_with::<(), _>(vec![1], || Ok(1.0))
            .unwrap();
        cache.invalidate();
        let v = cache
            .get_or_try_insert_with::<(), _>(vec![1], || Ok(3.0))
            .unwrap();
        assert_eq!(*v, 3.0);
    }
}
