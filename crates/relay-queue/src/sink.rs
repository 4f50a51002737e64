use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::types::{Attachment, TurnSink};

/// One event a [`ChannelTurnSink`] forwards to its receiver.
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Chunks(Vec<String>),
    Edit(String),
    Typing,
    Attachments(Vec<String>),
}

/// In-memory `TurnSink` used by tests (and anything embedding this crate
/// directly rather than through a real chat transport): forwards every call
/// onto an `mpsc` channel instead of a network call. Never supports
/// edit-in-place, so the Queue Manager always falls back to a fresh send.
pub struct ChannelTurnSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelTurnSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TurnSink for ChannelTurnSink {
    async fn send_chunks(&self, chunks: &[String]) {
        let _ = self.tx.send(SinkMessage::Chunks(chunks.to_vec()));
    }

    async fn try_edit_first(&self, text: &str) -> bool {
        let _ = self.tx.send(SinkMessage::Edit(text.to_string()));
        false
    }

    async fn send_typing(&self) {
        let _ = self.tx.send(SinkMessage::Typing);
    }

    async fn send_attachments(&self, attachments: &[Attachment]) {
        let names = attachments.iter().map(|a| a.filename.clone()).collect();
        let _ = self.tx.send(SinkMessage::Attachments(names));
    }
}

/// Thin stdout `TurnSink` for manual/CLI operation of the orchestrator.
pub struct ConsoleTurnSink;

#[async_trait]
impl TurnSink for ConsoleTurnSink {
    async fn send_chunks(&self, chunks: &[String]) {
        for chunk in chunks {
            println!("{chunk}");
        }
    }

    async fn try_edit_first(&self, _text: &str) -> bool {
        false
    }

    async fn send_typing(&self) {
        info!("…");
    }

    async fn send_attachments(&self, attachments: &[Attachment]) {
        for a in attachments {
            println!("[attachment: {}]", a.filename);
        }
    }
}
