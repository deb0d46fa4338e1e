use std::sync::Arc;

use shared::domain::DeviceStatus;

/// Decides whether an authoritative read shows the command's intended effect.
/// Implementations must be pure.
pub trait ConvergenceEvaluator: Send + Sync {
    fn matches(&self, observed: &DeviceStatus, expected_locked: bool) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LockStateEvaluator;

impl ConvergenceEvaluator for LockStateEvaluator {
    fn matches(&self, observed: &DeviceStatus, expected_locked: bool) -> bool {
        observed.locked == expected_locked
    }
}

/// Additionally requires the device to report itself online.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireOnline<E>(pub E);

impl<E: ConvergenceEvaluator> ConvergenceEvaluator for RequireOnline<E> {
    fn matches(&self, observed: &DeviceStatus, expected_locked: bool) -> bool {
        observed.online && self.0.matches(observed, expected_locked)
    }
}

pub fn evaluator_for(require_online: bool) -> Arc<dyn ConvergenceEvaluator> {
    if require_online {
        Arc::new(RequireOnline(LockStateEvaluator))
    } else {
        Arc::new(LockStateEvaluator)
    }
}

#[cfg(test)]
#[path = "tests/convergence_tests.rs"]
mod tests;
