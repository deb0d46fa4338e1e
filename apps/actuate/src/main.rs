use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    convergence::evaluator_for,
    notifier::BroadcastSurface,
    ActuationController, ActuationError, CommandOutcome, CommandReport, ControllerDependencies,
    ControllerEvent, DeviceRegistry, DeviceStatusClient, HttpDeviceApi,
};
use shared::{
    domain::{lock_label, ActuatorAction, Device, DeviceId},
    protocol::{NotificationKind, UiNotification},
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "actuate", about = "Lock or unlock a device and wait for physical confirmation")]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides `api_base_url` from the settings file.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long, default_value = "cli")]
    actor: String,
    device: String,
    #[arg(value_enum)]
    action: ActionArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    Lock,
    Unlock,
}

impl From<ActionArg> for ActuatorAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Lock => ActuatorAction::Lock,
            ActionArg::Unlock => ActuatorAction::Unlock,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config)?;
    if let Some(url) = args.api_url {
        settings.api_base_url = url;
    }
    settings.validate()?;

    let api = Arc::new(HttpDeviceApi::new(&settings.api_base_url)?);
    let device_id = DeviceId::new(args.device);
    let initial = api
        .get_status(&device_id)
        .await
        .with_context(|| format!("failed to read initial status of {device_id}"))?;
    info!(
        device_id = %device_id,
        locked = initial.locked,
        online = initial.online,
        "actuate: device registered"
    );
    let registry = DeviceRegistry::with_devices([Device::new(
        device_id.clone(),
        initial.locked,
        initial.online,
    )]);

    let surface = Arc::new(BroadcastSurface::new(16));
    let mut notifications = surface.subscribe();
    let controller = ActuationController::new(
        ControllerDependencies::new(api.clone(), api)
            .with_evaluator(evaluator_for(settings.require_online))
            .with_surface(surface),
        registry,
        settings.policy(),
    );

    let printer = tokio::spawn(print_events(BroadcastStream::new(
        controller.subscribe_events(),
    )));

    let action = ActuatorAction::from(args.action);
    let outcome = match controller.dispatch(device_id, action, args.actor).await {
        Ok(handle) => {
            let canceller = handle.canceller();
            let wait = handle.wait();
            tokio::pin!(wait);
            let report = tokio::select! {
                report = &mut wait => report?,
                _ = tokio::signal::ctrl_c() => {
                    warn!(mode = ?settings.cancel_mode, "actuate: interrupted; cancelling command");
                    canceller.cancel(settings.cancel_mode);
                    wait.await?
                }
            };
            print_summary(&report);
            Some(report.outcome)
        }
        Err(error @ (ActuationError::Rejected { .. } | ActuationError::Unreachable { .. })) => {
            warn!(%error, "actuate: dispatch failed");
            Some(CommandOutcome::Failure)
        }
        Err(error) => return Err(error.into()),
    };

    let _ = printer.await;
    while let Ok(notification) = notifications.try_recv() {
        println!("{}", render_notification(&notification));
    }

    Ok(match outcome {
        Some(CommandOutcome::Success) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn print_events(mut events: BroadcastStream<ControllerEvent>) {
    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            continue;
        };
        let finished = matches!(event, ControllerEvent::Finished(_));
        if let Some(line) = describe_event(&event) {
            println!("{line}");
        }
        if finished {
            break;
        }
    }
}

fn describe_event(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::PhaseChanged {
            device_id, phase, ..
        } => Some(format!("{device_id}: {phase}")),
        ControllerEvent::OptimisticChanged {
            device_id,
            locked: Some(locked),
        } => Some(format!("{device_id}: showing {} (pending)", lock_label(*locked))),
        ControllerEvent::OptimisticChanged { locked: None, .. } => None,
        ControllerEvent::Finished(_) => None,
    }
}

fn print_summary(report: &CommandReport) {
    println!(
        "{}: {} after {} status read(s){}",
        report.command.device_id,
        report.phase,
        report.attempts.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

fn render_notification(notification: &UiNotification) -> String {
    let tag = match notification.kind {
        NotificationKind::Success => "ok",
        NotificationKind::Error => "error",
    };
    format!("[{tag}] {}", notification.text)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
