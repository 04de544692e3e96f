//! WhatsApp Business webhook payloads
//!
//! Only the `calls` field is consumed. Everything else in the envelope is
//! accepted and ignored.

use serde::Deserialize;

use voice_call_session::CallEvent;

/// `object` value of business-account webhooks
pub const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

const CALLS_FIELD: &str = "calls";
const UNKNOWN_CALLER: &str = "Unknown";

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: CallsValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallsValue {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub calls: Vec<CallEntry>,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallEntry {
    pub id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub session: Option<CallSdp>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    /// Seconds; sent as a number or a numeric string
    #[serde(default)]
    pub duration: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CallSdp {
    #[serde(default)]
    pub sdp: String,
}

impl CallsValue {
    fn caller_name(&self) -> String {
        self.contacts
            .first()
            .and_then(|c| c.profile.as_ref())
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
    }
}

impl WebhookPayload {
    pub fn is_business_account(&self) -> bool {
        self.object == BUSINESS_ACCOUNT_OBJECT
    }
}

/// Extract call events in delivery order
pub fn parse_call_events(payload: &WebhookPayload) -> Vec<CallEvent> {
    payload
        .entry
        .iter()
        .flat_map(|entry| entry.changes.iter())
        .filter(|change| change.field == CALLS_FIELD)
        .flat_map(|change| {
            let value = &change.value;
            value.calls.iter().map(move |call| to_call_event(value, call))
        })
        .collect()
}

fn to_call_event(value: &CallsValue, call: &CallEntry) -> CallEvent {
    match call.event.as_str() {
        "connect" => CallEvent::Connect {
            call_id: call.id.clone(),
            offer_sdp: call
                .session
                .as_ref()
                .map(|s| s.sdp.clone())
                .unwrap_or_default(),
            caller_number: call.from.clone().unwrap_or_default(),
            caller_name: value.caller_name(),
        },
        "terminate" => CallEvent::Terminate {
            call_id: call.id.clone(),
            status: call.status.as_ref().map(value_to_string),
            duration_secs: call.duration.as_ref().and_then(value_to_secs),
        },
        other => CallEvent::Other {
            call_id: call.id.clone(),
            kind: other.to_string(),
        },
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_secs(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Query of the subscription handshake
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerifyQuery {
    /// Challenge to echo back, if the handshake is valid for `expected_token`
    pub fn verify(&self, expected_token: &str) -> Option<&str> {
        if expected_token.is_empty() {
            return None;
        }
        let token_ok = self.verify_token.as_deref() == Some(expected_token);
        let mode_ok = self.mode.as_deref() == Some("subscribe");
        if token_ok && mode_ok {
            Some(self.challenge.as_deref().unwrap_or(""))
        } else {
            None
        }
    }
}
