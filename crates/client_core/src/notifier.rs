//! Terminal result publication. Each command gets its own [`CommandNotifier`],
//! which forwards at most one message to the UI surface.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::CommandId,
    protocol::{NotificationKind, UiNotification},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Partial,
    Failure,
}

impl CommandOutcome {
    pub fn kind(self) -> NotificationKind {
        match self {
            Self::Success => NotificationKind::Success,
            Self::Partial | Self::Failure => NotificationKind::Error,
        }
    }
}

/// One-way sink for user-facing messages.
pub trait NotificationSurface: Send + Sync {
    fn publish(&self, notification: UiNotification);
}

/// Writes notifications to the log. Used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSurface;

impl NotificationSurface for TracingSurface {
    fn publish(&self, notification: UiNotification) {
        match notification.kind {
            NotificationKind::Success => info!(text = %notification.text, "notify: success"),
            NotificationKind::Error => warn!(text = %notification.text, "notify: error"),
        }
    }
}

/// Fans notifications out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSurface {
    tx: broadcast::Sender<UiNotification>,
}

impl BroadcastSurface {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiNotification> {
        self.tx.subscribe()
    }
}

impl NotificationSurface for BroadcastSurface {
    fn publish(&self, notification: UiNotification) {
        // No subscribers is fine: the message is fire-and-forget.
        let _ = self.tx.send(notification);
    }
}

#[derive(Clone)]
pub struct ResultNotifier {
    surface: Arc<dyn NotificationSurface>,
}

impl ResultNotifier {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        Self { surface }
    }

    pub fn for_command(&self, command_id: CommandId) -> CommandNotifier {
        CommandNotifier {
            surface: self.surface.clone(),
            command_id,
            emitted: AtomicBool::new(false),
        }
    }
}

pub struct CommandNotifier {
    surface: Arc<dyn NotificationSurface>,
    command_id: CommandId,
    emitted: AtomicBool,
}

impl CommandNotifier {
    /// Publishes the terminal message. Returns `false` without publishing if this
    /// command already emitted one.
    pub fn emit(&self, outcome: CommandOutcome, detail: impl Into<String>) -> bool {
        if self.emitted.swap(true, Ordering::AcqRel) {
            debug!(command_id = %self.command_id, "notify: duplicate terminal emission dropped");
            return false;
        }
        self.surface.publish(UiNotification {
            kind: outcome.kind(),
            text: detail.into(),
        });
        true
    }

    /// Consumes the emission slot without publishing, for commands whose UI went away.
    pub fn suppress(&self) {
        self.emitted.store(true, Ordering::Release);
    }

    pub fn has_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "tests/notifier_tests.rs"]
mod tests;
