//! Events delivered to the consuming application.
//!
//! Per monitored call the order is: one `callStarted`, any number of
//! `audioChunk`, one `callEnded` (always last). `scamAlert` is independent
//! of sessions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CallEvent {
    /// Monitoring began for an unknown caller.
    #[serde(rename_all = "camelCase")]
    CallStarted { caller_number: String },

    /// Periodic, non-final audio segment (header + PCM).
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        caller_number: String,
        data: Vec<u8>,
    },

    /// Session closed. Carries the residual audio segment if any bytes remained.
    #[serde(rename_all = "camelCase")]
    CallEnded {
        caller_number: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
    },

    /// A scam was detected or a known scam number was blocked.
    #[serde(rename_all = "camelCase")]
    ScamAlert {
        caller_number: String,
        reason: String,
    },
}

impl CallEvent {
    pub fn caller_number(&self) -> &str {
        match self {
            CallEvent::CallStarted { caller_number }
            | CallEvent::AudioChunk { caller_number, .. }
            | CallEvent::CallEnded { caller_number, .. }
            | CallEvent::ScamAlert { caller_number, .. } => caller_number,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::CallStarted { .. } => "callStarted",
            CallEvent::AudioChunk { .. } => "audioChunk",
            CallEvent::CallEnded { .. } => "callEnded",
            CallEvent::ScamAlert { .. } => "scamAlert",
        }
    }

    /// Audio bytes carried by this event, if any.
    pub fn audio(&self) -> Option<&[u8]> {
        match self {
            CallEvent::AudioChunk { data, .. } => Some(data),
            CallEvent::CallEnded { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
