// ABOUTME: Canonicalisation of raw transport frames into CanonicalEvent values
// ABOUTME: Unwraps nested envelopes and drops anything without a known string type

use crate::events::{CanonicalEvent, ExternalUrl};
use serde_json::{Map, Value};
use tracing::debug;

/// Peel `{event: {...}}` and `{type: "event", properties: {...}}` envelopes
fn unwrap_envelopes(frame: &Value) -> &Value {
    let mut current = frame;
    loop {
        if let Some(inner) = current.get("event").filter(|v| v.is_object()) {
            current = inner;
            continue;
        }

        let is_envelope = current.get("type").and_then(Value::as_str) == Some("event");
        if is_envelope {
            if let Some(inner) = current.get("properties").filter(|v| v.is_object()) {
                current = inner;
                continue;
            }
        }

        return current;
    }
}

fn external_url_hint(frame: &Value) -> Option<&str> {
    frame
        .get("externalUrl")
        .or_else(|| frame.get("external_url"))
        .and_then(Value::as_str)
}

/// Payload of a frame: its `properties` object, or the frame minus `type`
fn payload_of(frame: &Map<String, Value>) -> Value {
    match frame.get("properties") {
        Some(properties @ Value::Object(_)) => properties.clone(),
        _ => {
            let mut rest = frame.clone();
            rest.remove("type");
            Value::Object(rest)
        }
    }
}

/// Turn one raw frame into at most one canonical event
///
/// Frames without a string `type` after unwrapping, with an unknown type, or
/// with a payload that does not decode are dropped.
pub fn parse_frame(frame: &Value) -> Option<CanonicalEvent> {
    parse_frame_with_hint(frame, None)
}

/// Like [`parse_frame`], using `fallback_type` when the frame carries none
///
/// Event-stream transports pass the preceding `event:` field name here.
pub fn parse_frame_with_hint(frame: &Value, fallback_type: Option<&str>) -> Option<CanonicalEvent> {
    let frame = unwrap_envelopes(frame);
    let object = frame.as_object()?;

    let kind = match object.get("type").and_then(Value::as_str) {
        Some(kind) => kind,
        None => {
            if let Some(url) = external_url_hint(frame) {
                return Some(CanonicalEvent::ExternalUrl(ExternalUrl {
                    url: url.to_string(),
                }));
            }
            match fallback_type.filter(|t| !t.is_empty() && *t != "message") {
                Some(kind) => kind,
                None => {
                    debug!("Dropping frame without a type");
                    return None;
                }
            }
        }
    };

    match CanonicalEvent::from_parts(kind, payload_of(object)) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            debug!(kind = %kind, "Dropping frame of unknown type");
            None
        }
        Err(e) => {
            debug!(kind = %kind, "Dropping undecodable frame: {}", e);
            None
        }
    }
}

/// Parse newline-delimited JSON text, skipping blank and malformed lines
pub fn parse_lines(text: &str) -> Vec<CanonicalEvent> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value) => parse_frame(&value),
            Err(e) => {
                debug!("Skipping non-JSON line: {}", e);
                None
            }
        })
        .collect()
}
