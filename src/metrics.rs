use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Admission counters for one bucket
#[derive(Debug, Default)]
pub struct AdmissionCounters {
    allowed: AtomicU64,
    rejected: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub allowed: u64,
    pub rejected: u64,
    /// Calls answered by local counters because the shared store failed
    pub fallbacks: u64,
}

impl AdmissionStats {
    pub fn merge(mut self, other: &AdmissionStats) -> Self {
        self.allowed += other.allowed;
        self.rejected += other.rejected;
        self.fallbacks += other.fallbacks;
        self
    }
}

impl AdmissionCounters {
    pub fn record(&self, allowed: bool) {
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdmissionStats {
        AdmissionStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_decisions() {
        let counters = AdmissionCounters::default();
        counters.record(true);
        counters.record(true);
        counters.record(false);
        counters.record_fallback();

        assert_eq!(
            counters.snapshot(),
            AdmissionStats {
                allowed: 2,
                rejected: 1,
                fallbacks: 1
            }
        );
    }
}
