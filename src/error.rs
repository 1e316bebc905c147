use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced to the embedding application, either synchronously
/// from a `track_*` call (precondition failures) or asynchronously via the
/// observer (permanent delivery failures). Transient transport problems are
/// never represented here; they stay inside the delivery worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A network or backend failure that cost an event its place in the
    /// queue (capacity eviction after prolonged outage).
    NetworkOperationFailed,
    /// Event tracking is disabled because this installation did not come
    /// through a tracked campaign.
    NoAffiliateInstall,
    /// No app credentials (API key and secret) were configured.
    MissingAppCredentials,
    InvalidApiKey,
    InvalidApiSecret,
    /// The platform advertising identifier is unavailable.
    MissingAdvertisingIdentifier,
    /// One or more mandatory parameters are missing or malformed.
    MissingParameter,
    InvalidCustomEventName,
    InvalidCustomEventUserInfo,
    /// The custom event has not been defined in the advertiser console.
    NoSuchCustomEvent,
    /// The event exists but has not been verified via a test-mode probe.
    EventNotVerified,
}

impl ErrorKind {
    /// Precondition errors are reported synchronously from the `track_*`
    /// call that produced them and never enter the queue.
    pub fn is_precondition(self) -> bool {
        matches!(
            self,
            ErrorKind::MissingAppCredentials
                | ErrorKind::MissingAdvertisingIdentifier
                | ErrorKind::MissingParameter
                | ErrorKind::InvalidCustomEventName
                | ErrorKind::InvalidCustomEventUserInfo
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkOperationFailed => "network_operation_failed",
            ErrorKind::NoAffiliateInstall => "no_affiliate_install",
            ErrorKind::MissingAppCredentials => "missing_app_credentials",
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::InvalidApiSecret => "invalid_api_secret",
            ErrorKind::MissingAdvertisingIdentifier => "missing_advertising_identifier",
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::InvalidCustomEventName => "invalid_custom_event_name",
            ErrorKind::InvalidCustomEventUserInfo => "invalid_custom_event_user_info",
            ErrorKind::NoSuchCustomEvent => "no_such_custom_event",
            ErrorKind::EventNotVerified => "event_not_verified",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TrackingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for TrackingError {}
