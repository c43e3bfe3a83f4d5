//! User-facing status message channel.
//!
//! Hardware faults in this subsystem are recovered where they are detected
//! and surfaced as human-readable messages rather than propagated errors.
//! [`Messenger`] is the clonable handle components use to publish those
//! messages; consumers (a UI message display, the scan sequencer's log)
//! subscribe through the underlying [`Alert`]. Every message is mirrored
//! into `tracing` so headless runs still get a full record.

use crate::alert::Alert;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A status message destined for the user-facing message display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMessage {
    /// Routine progress information.
    Update(String),
    /// A recoverable anomaly worth flagging (e.g. a protocol error code).
    Warning(String),
    /// A failed operation. The operation has already been safely aborted.
    Error(String),
}

impl UserMessage {
    /// The message text without its severity.
    pub fn text(&self) -> &str {
        match self {
            UserMessage::Update(text) | UserMessage::Warning(text) | UserMessage::Error(text) => {
                text
            }
        }
    }
}

/// Clonable publisher handle for status messages.
#[derive(Debug, Clone, Default)]
pub struct Messenger {
    alert: Arc<Alert<UserMessage>>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all subsequent messages.
    pub fn subscribe(&self) -> broadcast::Receiver<UserMessage> {
        self.alert.subscribe()
    }

    pub fn update(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{text}");
        self.alert.emit(UserMessage::Update(text));
    }

    pub fn warning(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!("{text}");
        self.alert.emit(UserMessage::Warning(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::error!("{text}");
        self.alert.emit(UserMessage::Error(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_subscriber_list() {
        let messenger = Messenger::new();
        let mut rx = messenger.subscribe();
        let clone = messenger.clone();
        clone.error("stage fault");
        assert_eq!(
            rx.recv().await.unwrap(),
            UserMessage::Error("stage fault".into())
        );
    }

    #[test]
    fn text_strips_severity() {
        assert_eq!(UserMessage::Warning("hot".into()).text(), "hot");
    }

    #[tracing_test::traced_test]
    #[test]
    fn messages_mirror_into_tracing() {
        let messenger = Messenger::new();
        messenger.update("stage settled");
        messenger.warning("slow convergence");
        assert!(logs_contain("stage settled"));
        assert!(logs_contain("slow convergence"));
    }
}
