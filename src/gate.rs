//! Admission decision for incoming calls.
//!
//! Checks run in a fixed order and the first match wins:
//! outbound calls are allowed, saved contacts are allowed, cached scam
//! numbers are blocked, everything else is allowed and monitored. Contact
//! trust is checked before the cache, so a saved contact is never blocked.

use crate::cache::ScamNumberCache;
use crate::contacts::ContactResolver;
use crate::defaults;
use crate::events::CallEvent;
use crate::sink::EventSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Incoming call notification from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub direction: CallDirection,
    /// Raw handle as received; may be empty when the caller is hidden.
    pub number: String,
    /// The platform expects a final screening response for this call.
    pub requires_final_response: bool,
}

impl IncomingCall {
    pub fn inbound(number: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Inbound,
            number: number.into(),
            requires_final_response: true,
        }
    }

    pub fn outbound(number: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Outbound,
            number: number.into(),
            requires_final_response: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Allow,
    Block,
    AllowAndMonitor,
}

/// Screening response flags handed back to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub verdict: Verdict,
    /// Let the call through.
    pub allow: bool,
    /// Reject the call (caller hears a busy/declined signal).
    pub reject: bool,
    /// Ring silently.
    pub silence: bool,
}

impl From<Verdict> for CallResponse {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow | Verdict::AllowAndMonitor => Self {
                verdict,
                allow: true,
                reject: false,
                silence: false,
            },
            Verdict::Block => Self {
                verdict,
                allow: false,
                reject: true,
                silence: false,
            },
        }
    }
}

pub struct CallAdmissionGate {
    cache: Arc<ScamNumberCache>,
    contacts: Arc<dyn ContactResolver>,
    sink: Arc<dyn EventSink>,
}

impl CallAdmissionGate {
    pub fn new(
        cache: Arc<ScamNumberCache>,
        contacts: Arc<dyn ContactResolver>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cache,
            contacts,
            sink,
        }
    }

    /// Classify a call. No side effects.
    pub fn evaluate(&self, call: &IncomingCall) -> Verdict {
        if call.direction != CallDirection::Inbound {
            return Verdict::Allow;
        }
        if self.contacts.is_saved_contact(&call.number) {
            return Verdict::Allow;
        }
        if self.cache.contains(&call.number) {
            return Verdict::Block;
        }
        Verdict::AllowAndMonitor
    }

    /// Classify a call and emit the `auto-blocked` alert for a Block.
    ///
    /// Monitoring is left to the caller, so no audio I/O happens before
    /// the verdict is known.
    pub fn admit(&self, call: &IncomingCall) -> Verdict {
        let verdict = self.evaluate(call);
        info!(
            number = %call.number,
            ?verdict,
            final_response = call.requires_final_response,
            "call screened"
        );

        if verdict == Verdict::Block {
            let alert = CallEvent::ScamAlert {
                caller_number: call.number.clone(),
                reason: defaults::AUTO_BLOCK_REASON.to_string(),
            };
            if let Err(e) = self.sink.emit(alert) {
                warn!(number = %call.number, error = %e, "failed to deliver block alert");
            }
        }
        verdict
    }
}
