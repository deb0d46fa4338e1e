use std::sync::Arc;

use shared::domain::{ControllerPhase, DeviceId, DeviceStatus};
use tracing::{info, warn};

use crate::{convergence::ConvergenceEvaluator, DeviceStatusClient};

#[derive(Debug, Clone, PartialEq)]
pub enum FinalVerdict {
    Matched(DeviceStatus),
    Mismatched { observed: DeviceStatus },
    Unreachable { reason: String },
}

impl FinalVerdict {
    pub fn phase(&self) -> ControllerPhase {
        match self {
            Self::Matched(_) => ControllerPhase::ConfirmedLate,
            Self::Mismatched { .. } => ControllerPhase::Unconfirmed,
            Self::Unreachable { .. } => ControllerPhase::Failed,
        }
    }
}

/// One last authoritative read after the poller gave up. Never loops.
#[derive(Clone)]
pub struct FallbackReconciler {
    status_client: Arc<dyn DeviceStatusClient>,
    evaluator: Arc<dyn ConvergenceEvaluator>,
}

impl FallbackReconciler {
    pub fn new(
        status_client: Arc<dyn DeviceStatusClient>,
        evaluator: Arc<dyn ConvergenceEvaluator>,
    ) -> Self {
        Self {
            status_client,
            evaluator,
        }
    }

    pub async fn reconcile(&self, device_id: &DeviceId, expected_locked: bool) -> FinalVerdict {
        match self.status_client.get_status(device_id).await {
            Ok(status) if self.evaluator.matches(&status, expected_locked) => {
                info!(device_id = %device_id, "actuation: fallback read matched");
                FinalVerdict::Matched(status)
            }
            Ok(status) => {
                warn!(
                    device_id = %device_id,
                    observed_locked = status.locked,
                    online = status.online,
                    expected_locked,
                    "actuation: fallback read disagrees with requested state"
                );
                FinalVerdict::Mismatched { observed: status }
            }
            Err(error) => {
                warn!(device_id = %device_id, error = %error, "actuation: fallback read failed");
                FinalVerdict::Unreachable {
                    reason: error.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
