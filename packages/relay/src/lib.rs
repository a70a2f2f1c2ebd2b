// ABOUTME: Event relay for Drover agent sessions
// ABOUTME: Canonical events, pull and push transports, text assembly and cost estimation

pub mod accumulator;
pub mod config;
pub mod cost;
pub mod error;
pub mod events;
pub mod parse;
pub mod relay;
pub mod socket;
pub mod sse;

pub use accumulator::{MessageAccumulator, MessageSnapshot};
pub use config::RelayConfig;
pub use cost::{CostAggregator, CostBreakdown, ModelPrice, ToolCallRecord, UsageInput};
pub use error::{RelayError, Result};
pub use events::{CanonicalEvent, ErrorPayload, Part, PartUpdate, TokenUsage};
pub use parse::{parse_frame, parse_frame_with_hint, parse_lines};
pub use relay::{EventRelay, RelayEvent};
pub use socket::{
    CloseDecision, ConnectionMachine, ConnectionState, ConnectionStatus, ReconnectPolicy,
    SocketControl, SocketSubscription,
};
pub use sse::{PullStream, SseDecoder, SseMessage};
