use std::sync::Arc;

use super::*;
use crate::{
    convergence::LockStateEvaluator,
    test_support::{read, transport_error, ManualClock, ScriptedStatusClient},
};

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

fn poller(statuses: &Arc<ScriptedStatusClient>, clock: &Arc<ManualClock>) -> BackoffPoller {
    BackoffPoller::new(statuses.clone(), Arc::new(LockStateEvaluator), clock.clone())
}

#[test]
fn default_schedule_escalates_linearly() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.schedule(), secs(&[5, 10, 15, 20]));
    assert_eq!(policy.worst_case_wait(), Duration::from_secs(55));
    assert_eq!(policy.wait_after(5), None);
    assert_eq!(policy.wait_after(0), None);

    let schedule = policy.schedule();
    assert!(schedule.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn single_attempt_policy_has_no_inter_attempt_waits() {
    let policy = BackoffPolicy {
        max_attempts: 1,
        initial_wait: Duration::from_secs(2),
        increment: Duration::from_secs(3),
    };
    assert!(policy.schedule().is_empty());
    assert_eq!(policy.worst_case_wait(), Duration::from_secs(2));
}

#[test]
fn oversized_increment_saturates_instead_of_overflowing() {
    let policy = BackoffPolicy {
        max_attempts: 4,
        initial_wait: Duration::ZERO,
        increment: Duration::from_secs(i64::MAX as u64),
    };
    assert_eq!(policy.wait_after(1), Some(Duration::from_secs(i64::MAX as u64)));
    assert_eq!(policy.wait_after(3), Some(Duration::MAX));
    assert_eq!(policy.worst_case_wait(), Duration::MAX);
}

#[tokio::test]
async fn converged_first_read_exits_after_initial_wait() {
    let statuses = Arc::new(ScriptedStatusClient::new([read(true)]));
    let clock = Arc::new(ManualClock::new());

    let outcome = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            true,
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("not cancelled");

    match outcome {
        ConfirmationOutcome::Confirmed { status, attempts } => {
            assert!(status.locked);
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].attempt_index, 1);
            assert_eq!(attempts[0].scheduled_delay, Duration::from_secs(5));
            assert_eq!(attempts[0].observed_locked, Some(true));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(statuses.calls(), 1);
    assert_eq!(clock.waits(), secs(&[5]));
}

#[tokio::test]
async fn convergence_on_third_attempt_stops_polling() {
    let statuses = Arc::new(
        ScriptedStatusClient::new([read(true), read(true), read(false)]).then_always(read(true)),
    );
    let clock = Arc::new(ManualClock::new());

    let outcome = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            false,
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("not cancelled");

    assert!(matches!(outcome, ConfirmationOutcome::Confirmed { .. }));
    assert_eq!(outcome.attempts().len(), 3);
    assert_eq!(statuses.calls(), 3);
    assert_eq!(clock.waits(), secs(&[5, 5, 10]));
}

#[tokio::test]
async fn stale_reads_exhaust_budget_without_trailing_wait() {
    let statuses = Arc::new(ScriptedStatusClient::repeating(read(true)));
    let clock = Arc::new(ManualClock::new());

    let outcome = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            false,
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("not cancelled");

    let attempts = match outcome {
        ConfirmationOutcome::Unconfirmed { attempts } => attempts,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(attempts.len(), 5);
    assert_eq!(statuses.calls(), 5);
    assert_eq!(clock.waits(), secs(&[5, 5, 10, 15, 20]));
    assert_eq!(clock.elapsed(), Duration::from_secs(55));
    let delays: Vec<Duration> = attempts.iter().map(|a| a.scheduled_delay).collect();
    assert_eq!(delays, secs(&[5, 5, 10, 15, 20]));
}

#[tokio::test]
async fn transport_failures_count_as_attempts_but_not_as_negatives() {
    let statuses = Arc::new(ScriptedStatusClient::new([
        transport_error(),
        transport_error(),
        transport_error(),
        transport_error(),
        read(false),
    ]));
    let clock = Arc::new(ManualClock::new());

    let outcome = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            false,
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("not cancelled");

    let attempts = match outcome {
        ConfirmationOutcome::Confirmed { attempts, .. } => attempts,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(attempts.len(), 5);
    assert!(attempts[..4].iter().all(|a| a.observed_locked.is_none()));
    assert_eq!(attempts[4].observed_locked, Some(false));
    assert_eq!(statuses.calls(), 5);
}

#[tokio::test]
async fn all_transport_failures_look_like_an_unconfirmed_run() {
    let statuses = Arc::new(ScriptedStatusClient::repeating(transport_error()));
    let clock = Arc::new(ManualClock::new());

    let outcome = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            true,
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("not cancelled");

    assert!(matches!(outcome, ConfirmationOutcome::Unconfirmed { .. }));
    assert_eq!(outcome.into_attempts().len(), 5);
}

#[tokio::test]
async fn cancelled_token_stops_before_any_read() {
    let statuses = Arc::new(ScriptedStatusClient::repeating(read(true)));
    let clock = Arc::new(ManualClock::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = poller(&statuses, &clock)
        .confirm(
            &DeviceId::new("front-door"),
            true,
            &BackoffPolicy::default(),
            &cancel,
        )
        .await;

    assert_eq!(result, Err(PollCancelled));
    assert_eq!(statuses.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_disposes_pending_wait() {
    let statuses = Arc::new(ScriptedStatusClient::repeating(read(true)));
    let poller = BackoffPoller::new(
        statuses.clone(),
        Arc::new(LockStateEvaluator),
        Arc::new(crate::clock::TokioClock),
    );
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            poller
                .confirm(
                    &DeviceId::new("front-door"),
                    false,
                    &BackoffPolicy::default(),
                    &cancel,
                )
                .await
        })
    };

    // Past the initial wait and first read, inside the 5s backoff.
    tokio::time::sleep(Duration::from_secs(7)).await;
    cancel.cancel();

    assert_eq!(task.await.expect("join"), Err(PollCancelled));
    assert_eq!(statuses.calls(), 1);
}
