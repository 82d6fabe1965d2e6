//! JSON message protocol between the consuming application and callshield.
//!
//! Commands arrive one JSON object per line, tagged by `method`. Each
//! command gets exactly one response line, tagged by `type`. Call events
//! ([`crate::events::CallEvent`]) share the same output stream.

use crate::gate::{CallDirection, CallResponse, Verdict};
use crate::session::call_state::CallState;
use serde::{Deserialize, Serialize};

/// Inbound commands and platform notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Command {
    /// Replace the scam cache (bulk sync).
    UpdateScamCache { numbers: Vec<String> },
    /// Add one number to the scam cache.
    AddScamNumber { number: String },
    /// Number of cached scam digests.
    GetCachedCount,
    /// A scam was confirmed for `number`; alert and cache it.
    ScamDetected {
        #[serde(default)]
        number: String,
        #[serde(default)]
        reason: String,
    },
    /// Platform incoming-call notification; answered with a verdict.
    IncomingCall {
        direction: CallDirection,
        #[serde(default)]
        number: String,
        /// Whether the platform waits on this verdict; assumed when absent.
        #[serde(rename = "requiresFinalResponse", default = "default_true")]
        requires_final_response: bool,
    },
    /// Platform call-state transition.
    CallState { state: CallState },
}

fn default_true() -> bool {
    true
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// One reply per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Command succeeded
    Ok,
    Count { count: usize },
    /// Screening decision for an `incomingCall`
    Verdict {
        verdict: Verdict,
        allow: bool,
        reject: bool,
    },
    /// Error occurred
    Error { message: String },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

impl From<CallResponse> for Response {
    fn from(response: CallResponse) -> Self {
        Response::Verdict {
            verdict: response.verdict,
            allow: response.allow,
            reject: response.reject,
        }
    }
}
