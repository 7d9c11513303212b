use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Records whether the "optimized routine unavailable" warning was issued.
///
/// Models hold an `Arc` to one of these; the process-wide instance from
/// [`FallbackNotifier::global`] is the default. Tests inject a fresh one.
#[derive(Debug, Default)]
pub struct FallbackNotifier {
    warned: AtomicBool,
    fallbacks: AtomicUsize,
}

impl FallbackNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<FallbackNotifier>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(FallbackNotifier::new))
    }

    /// Note one fallback and warn only the first time. Returns `true` when
    /// this call emitted the warning.
    pub fn notify_fallback(&self, requested: &str, substitute: &str) -> bool {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if self
            .warned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::warn!(
                "Optimized '{requested}' routine not compiled in (enable the \
                `fast-sherman-morrison` feature). Falling back to '{substitute}'."
            );
            true
        } else {
            false
        }
    }

    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Acquire)
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }
}
