#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

/// Compensated `Σ ln(values)`; used for log-determinants over many TOAs.
pub(crate) fn sum_ln<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut acc = KahanSum::default();
    for v in values {
        acc.add(v.ln());
    }
    acc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kahan_recovers_small_terms_next_to_large_ones() {
        let mut acc = KahanSum::default();
        acc.add(1.0e16);
        for _ in 0..10 {
            acc.add(1.0);
        }
        acc.add(-1.0e16);
        assert_eq!(acc.sum(), 10.0);
    }

    #[test]
    fn sum_ln_matches_log_of_product() {
        let got = sum_ln([2.0, 4.0, 0.5]);
        assert!((got - 4.0_f64.ln()).abs() < 1e-14);
    }
}
