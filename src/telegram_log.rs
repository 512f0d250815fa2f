//! A `tracing` layer that forwards log records to Telegram chats through a
//! [`Dispatcher`].
//!
//! The layer only formats and queues records; [`forward_records`] drains the
//! queue on the async runtime and sends each record as one message.

use std::fmt::Write as _;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::dispatcher::{Dispatcher, MAX_MESSAGE_CHARS};
use crate::transport::Transport;
use crate::utils::truncate_chars;

/// Records emitted by this crate are never forwarded, so a failing delivery
/// cannot trigger further deliveries.
const OWN_TARGET: &str = "tgsend";

pub struct TelegramLayer {
    level: Level,
    sender: mpsc::UnboundedSender<String>,
}

impl TelegramLayer {
    /// Layer for records at `level` or more severe, plus the queue they land in.
    pub fn new(level: Level) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { level, sender }, receiver)
    }
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.level || metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let text = format!(
            "{} {}: {}{}",
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        );
        // A closed queue means the forwarder is gone.
        let _ = self.sender.send(truncate_chars(&text, MAX_MESSAGE_CHARS));
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: String,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Send queued records until every sender is dropped. Returns how many
/// records went out; per-chat results are in the dispatcher's outcome log.
pub async fn forward_records<T: Transport>(
    dispatcher: Dispatcher<T>,
    mut records: mpsc::UnboundedReceiver<String>,
) -> usize {
    let mut forwarded = 0;
    while let Some(text) = records.recv().await {
        if dispatcher.send_message(&text).await.is_ok() {
            forwarded += 1;
        }
    }
    forwarded
}
