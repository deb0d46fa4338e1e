use super::*;
use crate::test_support::{offline_status, status};

#[test]
fn lock_state_evaluator_compares_locked_flag_only() {
    let evaluator = LockStateEvaluator;
    assert!(evaluator.matches(&status(true), true));
    assert!(evaluator.matches(&status(false), false));
    assert!(!evaluator.matches(&status(true), false));
    assert!(evaluator.matches(&offline_status(true), true));
}

#[test]
fn require_online_rejects_offline_reads_even_when_state_matches() {
    let evaluator = RequireOnline(LockStateEvaluator);
    assert!(evaluator.matches(&status(true), true));
    assert!(!evaluator.matches(&offline_status(true), true));
    assert!(!evaluator.matches(&status(false), true));
}

#[test]
fn evaluator_for_follows_setting() {
    assert!(evaluator_for(false).matches(&offline_status(false), false));
    assert!(!evaluator_for(true).matches(&offline_status(false), false));
}
