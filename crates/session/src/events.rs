//! Platform call events and session events

use serde::{Deserialize, Serialize};

use voice_call_core::{ConnectionState, Transcript};

use crate::call::CallState;

/// Call lifecycle event delivered by the calling platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallEvent {
    Connect {
        call_id: String,
        offer_sdp: String,
        caller_number: String,
        caller_name: String,
    },
    Terminate {
        call_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    /// Anything else the platform sends; ignored
    Other { call_id: String, kind: String },
}

impl CallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            Self::Connect { call_id, .. }
            | Self::Terminate { call_id, .. }
            | Self::Other { call_id, .. } => call_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Terminate { .. } => "terminate",
            Self::Other { kind, .. } => kind,
        }
    }
}

/// Events published by one call session
#[derive(Debug, Clone)]
pub enum CallSessionEvent {
    StateChanged { old: CallState, new: CallState },
    /// Outbound audio switched from silence to the clip
    MediaEnabled,
    TransportStateChanged(ConnectionState),
    Transcript(Transcript),
    Ended { state: CallState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_and_kind() {
        let event = CallEvent::Other {
            call_id: "c1".into(),
            kind: "ringing".into(),
        };
        assert_eq!(event.call_id(), "c1");
        assert_eq!(event.kind(), "ringing");

        let event = CallEvent::Terminate {
            call_id: "c2".into(),
            status: Some("completed".into()),
            duration_secs: Some(12),
        };
        assert_eq!(event.kind(), "terminate");
    }
}
