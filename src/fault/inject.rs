/// Failure rates for simulated collaborator calls, 0.0 to 1.0.
#[derive(Debug, Clone, Default)]
pub struct FaultProfile {
    pub delete_rate: f64,
    pub alert_rate: f64,
    pub log_rate: f64,
    pub soft_rate: f64,
    pub hard_rate: f64,
    /// Alert calls sleep this long before answering.
    pub alert_stall_ms: u64,
}

impl FaultProfile {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn failing_delete() -> Self {
        Self { delete_rate: 1.0, ..Self::default() }
    }

    pub fn failing_hard() -> Self {
        Self { hard_rate: 1.0, ..Self::default() }
    }
}

pub fn should_fault(seed: u64, rate: f64) -> bool {
    let v = (seed % 10_000) as f64 / 10_000.0;
    v < rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_bounds() {
        for seed in [0, 1, 9_999, 123_456] {
            assert!(should_fault(seed, 1.0));
            assert!(!should_fault(seed, 0.0));
        }
    }
}
