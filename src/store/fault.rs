/// Fault injection for the in-memory backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultProfile {
    /// The first N commits report a conflict regardless of version.
    pub forced_conflicts: u32,
    /// Fraction of commits that report a spurious conflict.
    pub conflict_rate: f64,
    /// Fraction of account commits that fail with a backend outage.
    pub commit_failure_rate: f64,
    /// Fraction of aggregate writes that fail.
    pub aggregate_failure_rate: f64,
}

impl FaultProfile {
    pub fn disabled() -> Self {
        Self {
            forced_conflicts: 0,
            conflict_rate: 0.0,
            commit_failure_rate: 0.0,
            aggregate_failure_rate: 0.0,
        }
    }

    /// Every account commit fails. Loads and inserts still work.
    pub fn account_outage() -> Self {
        Self { commit_failure_rate: 1.0, ..Self::disabled() }
    }

    pub fn aggregate_outage() -> Self {
        Self { aggregate_failure_rate: 1.0, ..Self::disabled() }
    }
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Deterministic coin flip keyed by a sequence number.
pub fn should_fault(seed: u64, rate: f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let v = (mixed % 10_000) as f64 / 10_000.0;
    v < rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bounds() {
        assert!((0..1000).all(|s| !should_fault(s, 0.0)));
        assert!((0..1000).all(|s| should_fault(s, 1.0)));
    }

    #[test]
    fn test_rate_is_roughly_honoured() {
        let hits = (0..10_000u64).filter(|s| should_fault(*s, 0.25)).count();
        assert!(hits > 1_500 && hits < 3_500, "hits = {}", hits);
    }
}
