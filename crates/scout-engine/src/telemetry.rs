//! Event sinks: fire-and-forget observers of the study lifecycle.

use crossbeam_channel::Sender;
use tracing::info;

use scout_types::{EventSink, StudyEvent};

/// Forwards events over a crossbeam channel, e.g. to a dashboard bridge.
/// Sends never block and a closed receiver is ignored.
pub struct ChannelSink {
    tx: Sender<StudyEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<StudyEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &StudyEvent) {
        let _ = self.tx.try_send(event.clone());
    }
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &StudyEvent) {
        info!(study_id = %event.study_id, kind = ?event.kind, "study event");
    }
}
