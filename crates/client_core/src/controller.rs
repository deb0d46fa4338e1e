//! Command dispatch and confirmation flow for a single binary actuator.
//!
//! `dispatch` acquires the per-device guard, sends the command exactly once,
//! publishes the optimistic value and then hands the rest of the flow to a
//! spawned task: backoff polling, an optional fallback read, the canonical
//! write on confirmation, and a single terminal notification. The guard is
//! released and the overlay cleared on every terminal path.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{lock_label, ActuatorAction, Command, CommandId, ControllerPhase, DeviceId},
    protocol::CommandAck,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    clock::{Clock, TokioClock},
    convergence::{ConvergenceEvaluator, LockStateEvaluator},
    guard::{CommandGuard, GuardPermit},
    notifier::{CommandNotifier, CommandOutcome, NotificationSurface, ResultNotifier, TracingSurface},
    overlay::OptimisticOverlay,
    poller::{BackoffPoller, BackoffPolicy, ConfirmationAttempt, ConfirmationOutcome},
    reconcile::{FallbackReconciler, FinalVerdict},
    registry::{DeviceRegistry, DeviceView},
    ActuationError, DeviceCommandClient, DeviceStatusClient,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Stop UI-facing effects only: the overlay is cleared and no notification is
    /// emitted, but polling runs to completion and confirmations are recorded.
    DetachUi,
    /// Cancel pending waits and the in-flight status read as well.
    AbortPolling,
}

impl FromStr for CancelMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detach_ui" | "detach" => Ok(Self::DetachUi),
            "abort_polling" | "abort" => Ok(Self::AbortPolling),
            other => Err(anyhow::anyhow!("unknown cancel mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandReport {
    pub command: Command,
    pub flow_id: Option<String>,
    pub phase: ControllerPhase,
    pub outcome: CommandOutcome,
    pub detail: String,
    pub attempts: Vec<ConfirmationAttempt>,
    /// Every phase the command passed through, starting at `Idle`.
    pub phases: Vec<ControllerPhase>,
    pub verdict: Option<FinalVerdict>,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    PhaseChanged {
        device_id: DeviceId,
        command_id: CommandId,
        phase: ControllerPhase,
    },
    OptimisticChanged {
        device_id: DeviceId,
        locked: Option<bool>,
    },
    Finished(Box<CommandReport>),
}

pub struct ControllerDependencies {
    pub command_client: Arc<dyn DeviceCommandClient>,
    pub status_client: Arc<dyn DeviceStatusClient>,
    pub clock: Arc<dyn Clock>,
    pub evaluator: Arc<dyn ConvergenceEvaluator>,
    pub surface: Arc<dyn NotificationSurface>,
}

impl ControllerDependencies {
    pub fn new(
        command_client: Arc<dyn DeviceCommandClient>,
        status_client: Arc<dyn DeviceStatusClient>,
    ) -> Self {
        Self {
            command_client,
            status_client,
            clock: Arc::new(TokioClock),
            evaluator: Arc::new(LockStateEvaluator),
            surface: Arc::new(TracingSurface),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConvergenceEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_surface(mut self, surface: Arc<dyn NotificationSurface>) -> Self {
        self.surface = surface;
        self
    }
}

pub struct ActuationController {
    command_client: Arc<dyn DeviceCommandClient>,
    clock: Arc<dyn Clock>,
    poller: BackoffPoller,
    reconciler: FallbackReconciler,
    notifier: ResultNotifier,
    guard: CommandGuard,
    overlay: OptimisticOverlay,
    registry: DeviceRegistry,
    policy: BackoffPolicy,
    phases: Mutex<HashMap<DeviceId, ControllerPhase>>,
    events: broadcast::Sender<ControllerEvent>,
}

/// Phases visited by one command, mirrored into the controller's phase table.
struct PhaseTrail {
    device_id: DeviceId,
    command_id: CommandId,
    phases: Vec<ControllerPhase>,
}

struct ConfirmationFlow {
    command: Command,
    flow_id: String,
    trail: PhaseTrail,
    permit: GuardPermit,
    notifier: CommandNotifier,
    cancel: CancellationToken,
    ui_detached: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

struct Settled {
    phase: ControllerPhase,
    outcome: CommandOutcome,
    detail: String,
    attempts: Vec<ConfirmationAttempt>,
    verdict: Option<FinalVerdict>,
    cancelled: bool,
}

impl ActuationController {
    pub fn new(
        dependencies: ControllerDependencies,
        registry: DeviceRegistry,
        policy: BackoffPolicy,
    ) -> Arc<Self> {
        let ControllerDependencies {
            command_client,
            status_client,
            clock,
            evaluator,
            surface,
        } = dependencies;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            command_client,
            poller: BackoffPoller::new(status_client.clone(), evaluator.clone(), clock.clone()),
            reconciler: FallbackReconciler::new(status_client, evaluator),
            clock,
            notifier: ResultNotifier::new(surface),
            guard: CommandGuard::new(),
            overlay: OptimisticOverlay::new(),
            registry,
            policy,
            phases: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn overlay(&self) -> &OptimisticOverlay {
        &self.overlay
    }

    pub fn guard(&self) -> &CommandGuard {
        &self.guard
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Current phase for the device's latest command, `Idle` if it never had one.
    pub fn phase(&self, device_id: &DeviceId) -> ControllerPhase {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .copied()
            .unwrap_or(ControllerPhase::Idle)
    }

    pub fn view(&self, device_id: &DeviceId) -> Option<DeviceView> {
        let device = self.registry.get(device_id)?;
        Some(DeviceView::project(&device, self.overlay.get(device_id)))
    }

    /// Sends `action` to the device and starts confirmation in the background.
    ///
    /// Fails without side effects when the device is unknown or already has a
    /// command in flight. A rejected or unreachable dispatch is terminal: the
    /// phase becomes `Failed`, one failure notification is emitted and the
    /// overlay is never touched.
    pub async fn dispatch(
        self: &Arc<Self>,
        device_id: DeviceId,
        action: ActuatorAction,
        actor: impl Into<String>,
    ) -> Result<CommandHandle, ActuationError> {
        if !self.registry.contains(&device_id) {
            return Err(ActuationError::UnknownDevice(device_id));
        }
        let Some(permit) = self.guard.try_acquire(&device_id) else {
            warn!(device_id = %device_id, %action, "actuation: command already in flight; rejecting");
            return Err(ActuationError::Busy(device_id));
        };

        let command = Command::issue(device_id.clone(), action, actor, self.clock.now());
        let notifier = self.notifier.for_command(command.command_id);
        let mut trail = PhaseTrail {
            device_id: device_id.clone(),
            command_id: command.command_id,
            phases: vec![ControllerPhase::Idle],
        };
        self.enter_phase(&mut trail, ControllerPhase::Dispatching);
        let in_flight = DispatchInFlight {
            controller: self.as_ref(),
            device_id: device_id.clone(),
            command_id: command.command_id,
            armed: true,
        };
        info!(
            device_id = %device_id,
            command_id = %command.command_id,
            %action,
            actor = %command.actor,
            "actuation: dispatching command"
        );

        let acknowledgment = self.command_client.issue_command(&command).await;
        in_flight.disarm();
        let flow_id = match acknowledgment {
            Ok(CommandAck::Accepted { flow_id }) => flow_id,
            Ok(CommandAck::Rejected { reason }) => {
                warn!(device_id = %device_id, command_id = %command.command_id, %reason, "actuation: command rejected");
                let detail = format!(
                    "{} rejected for {}: {reason}",
                    capitalize(action.as_str()),
                    device_id
                );
                self.fail_dispatch(command, trail, permit, &notifier, detail);
                return Err(ActuationError::Rejected {
                    device_id,
                    action,
                    reason,
                });
            }
            Err(source) => {
                warn!(device_id = %device_id, command_id = %command.command_id, error = %source, "actuation: command service unreachable");
                let detail = format!(
                    "Could not reach the device service to {action} {device_id}. Check your connection and retry."
                );
                self.fail_dispatch(command, trail, permit, &notifier, detail);
                return Err(ActuationError::Unreachable { device_id, source });
            }
        };

        let expected_locked = action.expected_locked();
        self.overlay
            .set(&device_id, command.command_id, expected_locked);
        self.publish(ControllerEvent::OptimisticChanged {
            device_id: device_id.clone(),
            locked: Some(expected_locked),
        });
        self.enter_phase(&mut trail, ControllerPhase::AwaitingConfirmation);
        info!(
            device_id = %device_id,
            command_id = %command.command_id,
            %flow_id,
            "actuation: command accepted; awaiting confirmation"
        );

        let cancel = CancellationToken::new();
        let ui_detached = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let canceller = CommandCanceller {
            device_id,
            command_id: command.command_id,
            token: cancel.clone(),
            ui_detached: ui_detached.clone(),
            finished: finished.clone(),
            overlay: self.overlay.clone(),
            events: self.events.clone(),
        };
        let flow = ConfirmationFlow {
            command: command.clone(),
            flow_id: flow_id.clone(),
            trail,
            permit,
            notifier,
            cancel,
            ui_detached,
            finished,
        };
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run_confirmation(flow).await });

        Ok(CommandHandle {
            command,
            flow_id,
            canceller,
            task,
        })
    }

    /// Dispatches and waits for the terminal report.
    pub async fn execute(
        self: &Arc<Self>,
        device_id: DeviceId,
        action: ActuatorAction,
        actor: impl Into<String>,
    ) -> Result<CommandReport, ActuationError> {
        self.dispatch(device_id, action, actor).await?.wait().await
    }

    async fn run_confirmation(self: Arc<Self>, flow: ConfirmationFlow) -> CommandReport {
        let ConfirmationFlow {
            command,
            flow_id,
            mut trail,
            permit,
            notifier,
            cancel,
            ui_detached,
            finished,
        } = flow;
        let device_id = &command.device_id;
        let expected_locked = command.action.expected_locked();

        let polled = self
            .poller
            .confirm(device_id, expected_locked, &self.policy, &cancel)
            .await;

        let settled = match polled {
            Ok(ConfirmationOutcome::Confirmed { status, attempts }) => {
                self.registry
                    .record_confirmation(device_id, &status, self.clock.now());
                Settled {
                    phase: ControllerPhase::Confirmed,
                    outcome: CommandOutcome::Success,
                    detail: format!(
                        "{device_id} {} (confirmed on attempt {}).",
                        command.action.past_tense(),
                        attempts.len()
                    ),
                    attempts,
                    verdict: None,
                    cancelled: false,
                }
            }
            Ok(ConfirmationOutcome::Unconfirmed { attempts }) => {
                let verdict = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    verdict = self.reconciler.reconcile(device_id, expected_locked) => Some(verdict),
                };
                match verdict {
                    Some(verdict) => {
                        if let FinalVerdict::Matched(status) = &verdict {
                            self.registry
                                .record_confirmation(device_id, status, self.clock.now());
                        }
                        let (outcome, detail) = verdict_detail(&command, &verdict);
                        Settled {
                            phase: verdict.phase(),
                            outcome,
                            detail,
                            attempts,
                            verdict: Some(verdict),
                            cancelled: false,
                        }
                    }
                    None => cancelled_settlement(&command, attempts),
                }
            }
            Err(_) => cancelled_settlement(&command, Vec::new()),
        };

        if self
            .overlay
            .clear_for(device_id, command.command_id)
            .is_some()
        {
            self.publish(ControllerEvent::OptimisticChanged {
                device_id: device_id.clone(),
                locked: None,
            });
        }
        finished.store(true, Ordering::Release);
        self.enter_phase(&mut trail, settled.phase);
        permit.release();

        if settled.cancelled || ui_detached.load(Ordering::Acquire) {
            info!(
                device_id = %device_id,
                command_id = %command.command_id,
                phase = %settled.phase,
                "actuation: caller detached; terminal notification suppressed"
            );
            notifier.suppress();
        } else {
            notifier.emit(settled.outcome, settled.detail.clone());
        }

        info!(
            device_id = %device_id,
            command_id = %command.command_id,
            phase = %settled.phase,
            attempts = settled.attempts.len(),
            "actuation: command settled"
        );

        let report = CommandReport {
            command,
            flow_id: Some(flow_id),
            phase: settled.phase,
            outcome: settled.outcome,
            detail: settled.detail,
            attempts: settled.attempts,
            phases: trail.phases,
            verdict: settled.verdict,
            cancelled: settled.cancelled,
        };
        self.publish(ControllerEvent::Finished(Box::new(report.clone())));
        report
    }

    fn fail_dispatch(
        &self,
        command: Command,
        mut trail: PhaseTrail,
        permit: GuardPermit,
        notifier: &CommandNotifier,
        detail: String,
    ) {
        self.enter_phase(&mut trail, ControllerPhase::Failed);
        permit.release();
        notifier.emit(CommandOutcome::Failure, detail.clone());
        self.publish(ControllerEvent::Finished(Box::new(CommandReport {
            command,
            flow_id: None,
            phase: ControllerPhase::Failed,
            outcome: CommandOutcome::Failure,
            detail,
            attempts: Vec::new(),
            phases: trail.phases,
            verdict: None,
            cancelled: false,
        })));
    }

    fn enter_phase(&self, trail: &mut PhaseTrail, phase: ControllerPhase) {
        trail.phases.push(phase);
        self.record_phase(&trail.device_id, trail.command_id, phase);
    }

    fn record_phase(&self, device_id: &DeviceId, command_id: CommandId, phase: ControllerPhase) {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.clone(), phase);
        self.publish(ControllerEvent::PhaseChanged {
            device_id: device_id.clone(),
            command_id,
            phase,
        });
    }

    fn publish(&self, event: ControllerEvent) {
        // Nobody listening is normal for headless callers.
        let _ = self.events.send(event);
    }
}

/// Settles the device as `Failed` when `dispatch` is dropped while the command
/// request is still outstanding. Declared after the guard permit so the phase is
/// recorded before the permit releases the device.
struct DispatchInFlight<'a> {
    controller: &'a ActuationController,
    device_id: DeviceId,
    command_id: CommandId,
    armed: bool,
}

impl DispatchInFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DispatchInFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            device_id = %self.device_id,
            command_id = %self.command_id,
            "actuation: dispatch abandoned before acknowledgment"
        );
        self.controller
            .record_phase(&self.device_id, self.command_id, ControllerPhase::Failed);
    }
}

fn verdict_detail(command: &Command, verdict: &FinalVerdict) -> (CommandOutcome, String) {
    let device_id = &command.device_id;
    match verdict {
        FinalVerdict::Matched(_) => (
            CommandOutcome::Success,
            format!(
                "{device_id} {}. Confirmation arrived after the polling window.",
                command.action.past_tense()
            ),
        ),
        FinalVerdict::Mismatched { observed } => {
            let offline = if observed.online { "" } else { " and is offline" };
            (
                CommandOutcome::Partial,
                format!(
                    "{} was accepted for {device_id}, but it still reports {}{offline}. Check the device connection and retry.",
                    capitalize(command.action.as_str()),
                    lock_label(observed.locked)
                ),
            )
        }
        FinalVerdict::Unreachable { .. } => (
            CommandOutcome::Failure,
            format!("Confirmation for {device_id} timed out. Refresh the device status manually."),
        ),
    }
}

fn cancelled_settlement(command: &Command, attempts: Vec<ConfirmationAttempt>) -> Settled {
    Settled {
        phase: ControllerPhase::Failed,
        outcome: CommandOutcome::Failure,
        detail: format!(
            "{} for {} was cancelled before confirmation.",
            capitalize(command.action.as_str()),
            command.device_id
        ),
        attempts,
        verdict: None,
        cancelled: true,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Cancels one command on behalf of a caller whose lifetime ended.
#[derive(Clone)]
pub struct CommandCanceller {
    device_id: DeviceId,
    command_id: CommandId,
    token: CancellationToken,
    ui_detached: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    overlay: OptimisticOverlay,
    events: broadcast::Sender<ControllerEvent>,
}

impl CommandCanceller {
    pub fn cancel(&self, mode: CancelMode) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        self.ui_detached.store(true, Ordering::Release);
        if self
            .overlay
            .clear_for(&self.device_id, self.command_id)
            .is_some()
        {
            let _ = self.events.send(ControllerEvent::OptimisticChanged {
                device_id: self.device_id.clone(),
                locked: None,
            });
        }
        if mode == CancelMode::AbortPolling {
            self.token.cancel();
        }
        info!(device_id = %self.device_id, ?mode, "actuation: command cancelled by caller");
    }

    pub fn is_detached(&self) -> bool {
        self.ui_detached.load(Ordering::Acquire)
    }
}

pub struct CommandHandle {
    command: Command,
    flow_id: String,
    canceller: CommandCanceller,
    task: JoinHandle<CommandReport>,
}

impl CommandHandle {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn canceller(&self) -> CommandCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self, mode: CancelMode) {
        self.canceller.cancel(mode);
    }

    pub async fn wait(self) -> Result<CommandReport, ActuationError> {
        Ok(self.task.await?)
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
