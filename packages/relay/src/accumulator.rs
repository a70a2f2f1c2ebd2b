// ABOUTME: Assembles streamed text and reasoning parts into per-message snapshots
// ABOUTME: Appends deltas, adopts longer cumulative values and never shrinks observed text

use crate::events::{CanonicalEvent, PartUpdate};
use serde::Serialize;
use std::collections::HashMap;

/// Assembled view of one assistant message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageSnapshot {
    pub message_id: String,
    pub text: String,
    pub reasoning: String,
}

#[derive(Debug, Default)]
pub struct MessageAccumulator {
    messages: HashMap<String, MessageSnapshot>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event in, returning the updated snapshot when text changed
    pub fn apply(&mut self, event: &CanonicalEvent) -> Option<MessageSnapshot> {
        match event {
            CanonicalEvent::MessagePartUpdated(update) => self.apply_part(update),
            _ => None,
        }
    }

    fn apply_part(&mut self, update: &PartUpdate) -> Option<MessageSnapshot> {
        let part = &update.part;
        if !part.is_text() && !part.is_reasoning() {
            return None;
        }
        let message_id = part.message_id.as_deref().or(part.id.as_deref())?;

        let snapshot = self
            .messages
            .entry(message_id.to_string())
            .or_insert_with(|| MessageSnapshot {
                message_id: message_id.to_string(),
                ..Default::default()
            });

        let target = if part.is_text() {
            &mut snapshot.text
        } else {
            &mut snapshot.reasoning
        };

        let changed = match (&update.delta, &part.text) {
            (Some(delta), _) if !delta.is_empty() => {
                target.push_str(delta);
                true
            }
            (_, Some(full)) if full.len() >= target.len() && full.as_str() != target.as_str() => {
                *target = full.clone();
                true
            }
            _ => false,
        };

        changed.then(|| snapshot.clone())
    }

    pub fn get(&self, message_id: &str) -> Option<&MessageSnapshot> {
        self.messages.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
