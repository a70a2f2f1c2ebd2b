// ABOUTME: Per-subscription relay combining canonicalisation and text assembly
// ABOUTME: Every transport feeds raw frames through one EventRelay instance

use crate::accumulator::{MessageAccumulator, MessageSnapshot};
use crate::events::CanonicalEvent;
use crate::parse::{parse_frame_with_hint, parse_lines};
use serde_json::Value;

/// A canonical event plus the assembled message it contributed to
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEvent {
    pub event: CanonicalEvent,
    pub assembled: Option<MessageSnapshot>,
}

#[derive(Debug, Default)]
pub struct EventRelay {
    accumulator: MessageAccumulator,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, frame: &Value) -> Option<RelayEvent> {
        self.ingest_with_hint(frame, None)
    }

    pub fn ingest_with_hint(&mut self, frame: &Value, event_name: Option<&str>) -> Option<RelayEvent> {
        let event = parse_frame_with_hint(frame, event_name)?;
        Some(self.deliver(event))
    }

    /// Ingest a newline-delimited JSON text frame
    pub fn ingest_text(&mut self, text: &str) -> Vec<RelayEvent> {
        parse_lines(text)
            .into_iter()
            .map(|event| self.deliver(event))
            .collect()
    }

    fn deliver(&mut self, event: CanonicalEvent) -> RelayEvent {
        let assembled = self.accumulator.apply(&event);
        RelayEvent { event, assembled }
    }

    pub fn accumulator(&self) -> &MessageAccumulator {
        &self.accumulator
    }
}
