use crate::error::ErrorKind;
use crate::events::{EventKind, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// The attribution backend, specified at the boundary only. Production
/// embeddings supply an HTTP implementation; tests supply scripted ones.
/// Every method is a blocking network round-trip and is only ever called
/// from the delivery worker or the deeplink resolver thread, never from a
/// tracking call.
pub trait Backend: Send + Sync {
    fn submit(&self, request: &TrackRequest) -> Result<SubmitOutcome, TransportError>;

    /// Classify this installation as affiliate-attributed or not.
    fn resolve_install(&self, probe: &InstallProbe) -> Result<InstallAttribution, TransportError>;

    /// Look up the campaign deeplink for an affiliate install, if any.
    fn lookup_deeplink(&self, probe: &InstallProbe) -> Result<Option<String>, TransportError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackRequest {
    pub api_key: String,
    pub device_identifier: String,
    pub event_id: String,
    pub event_kind: EventKind,
    pub event_name: String,
    pub payload: Value,
    pub created_at: String,
    pub test_mode: bool,
    pub signature: String,
}

impl TrackRequest {
    pub fn build(
        api_key: &str,
        api_secret: &str,
        device_identifier: &str,
        record: &EventRecord,
        test_mode: bool,
    ) -> Self {
        let signature = sign_request(api_secret, device_identifier, record);
        Self {
            api_key: api_key.to_string(),
            device_identifier: device_identifier.to_string(),
            event_id: record.id.clone(),
            event_kind: record.kind,
            event_name: record.name.clone(),
            payload: record.payload.clone(),
            created_at: record.created_at.clone(),
            test_mode,
            signature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallProbe {
    pub api_key: String,
    pub device_identifier: String,
    pub signature: String,
}

impl InstallProbe {
    pub fn build(api_key: &str, api_secret: &str, device_identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(api_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(device_identifier.as_bytes());
        Self {
            api_key: api_key.to_string(),
            device_identifier: device_identifier.to_string(),
            signature: hex_digest(hasher),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend durably accepted the event. In test mode this also
    /// confirms verification of the event name.
    Accepted,
    Rejected(RejectReason),
}

/// Server-side rejections that will not succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidApiKey,
    InvalidApiSecret,
    NoSuchCustomEvent,
    EventNotVerified,
}

impl RejectReason {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            RejectReason::InvalidApiKey => ErrorKind::InvalidApiKey,
            RejectReason::InvalidApiSecret => ErrorKind::InvalidApiSecret,
            RejectReason::NoSuchCustomEvent => ErrorKind::NoSuchCustomEvent,
            RejectReason::EventNotVerified => ErrorKind::EventNotVerified,
        }
    }
}

/// Connectivity loss, timeout, or a 5xx from the backend. Always retried,
/// never surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport failure: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallAttribution {
    Affiliate,
    NonAffiliate,
}

impl InstallAttribution {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallAttribution::Affiliate => "affiliate",
            InstallAttribution::NonAffiliate => "non_affiliate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "affiliate" => Some(InstallAttribution::Affiliate),
            "non_affiliate" => Some(InstallAttribution::NonAffiliate),
            _ => None,
        }
    }
}

/// Hex SHA-256 over the secret and the canonical request fields. The
/// secret itself never travels in clear.
fn sign_request(api_secret: &str, device_identifier: &str, record: &EventRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(device_identifier.as_bytes());
    hasher.update(b"\n");
    hasher.update(record.id.as_bytes());
    hasher.update(b"\n");
    hasher.update(record.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(record.payload.to_string().as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
