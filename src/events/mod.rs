pub mod schema;
pub mod store;

use crate::error::{ErrorKind, TrackingError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const REGISTRATION_EVENT_NAME: &str = "user_registration";
pub const PURCHASE_EVENT_NAME: &str = "in_app_purchase";

const MAX_CUSTOM_EVENT_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registration,
    Purchase,
    Custom,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Registration => "registration",
            EventKind::Purchase => "purchase",
            EventKind::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "registration" => Some(EventKind::Registration),
            "purchase" => Some(EventKind::Purchase),
            "custom" => Some(EventKind::Custom),
            _ => None,
        }
    }
}

/// A validated tracking event, immutable once constructed. Only the
/// delivery bookkeeping (`attempts`, `last_error`) changes after enqueue,
/// and that happens through the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub kind: EventKind,
    pub name: String,
    pub payload: Value,
    pub created_at: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// An `EventRecord` as read back from the queue, carrying the
/// store-assigned sequence number that defines FIFO order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    pub seq: i64,
    pub record: EventRecord,
}

/// The resolved form of a platform purchase product, for callers that hold
/// a store-provided product object rather than its individual fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseProduct {
    pub identifier: String,
    pub price: f64,
    pub currency_code: String,
}

impl EventRecord {
    fn new(kind: EventKind, name: String, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name,
            payload,
            created_at: Utc::now().to_rfc3339(),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn registration(user_id: &str, user_name: &str) -> Result<Self, TrackingError> {
        if user_id.trim().is_empty() {
            return Err(TrackingError::new(
                ErrorKind::MissingParameter,
                "registration requires a non-empty user id",
            ));
        }
        Ok(Self::new(
            EventKind::Registration,
            REGISTRATION_EVENT_NAME.to_string(),
            json!({"user_id": user_id, "user_name": user_name}),
        ))
    }

    pub fn purchase(
        product_identifier: &str,
        price: f64,
        currency_code: &str,
    ) -> Result<Self, TrackingError> {
        if product_identifier.trim().is_empty() {
            return Err(TrackingError::new(
                ErrorKind::MissingParameter,
                "purchase requires a non-empty product identifier",
            ));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(TrackingError::new(
                ErrorKind::MissingParameter,
                format!("purchase price must be non-negative, got {price}"),
            ));
        }
        if !is_currency_code(currency_code) {
            return Err(TrackingError::new(
                ErrorKind::MissingParameter,
                format!("currency code must be a 3-letter ISO 4217 code, got '{currency_code}'"),
            ));
        }
        Ok(Self::new(
            EventKind::Purchase,
            PURCHASE_EVENT_NAME.to_string(),
            json!({
                "product_identifier": product_identifier,
                "price": price,
                "currency_code": currency_code.to_ascii_uppercase(),
            }),
        ))
    }

    pub fn custom(event_name: &str, user_info: Option<Value>) -> Result<Self, TrackingError> {
        if !is_valid_custom_event_name(event_name) {
            return Err(TrackingError::new(
                ErrorKind::InvalidCustomEventName,
                format!(
                    "custom event name '{event_name}' must be 1-{MAX_CUSTOM_EVENT_NAME_LEN} chars of [a-z0-9_.-]"
                ),
            ));
        }
        let payload = match user_info {
            None => Value::Object(Map::new()),
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => {
                return Err(TrackingError::new(
                    ErrorKind::InvalidCustomEventUserInfo,
                    format!("custom event user info must be a JSON object, got {other}"),
                ));
            }
        };
        Ok(Self::new(
            EventKind::Custom,
            event_name.to_string(),
            payload,
        ))
    }
}

fn is_currency_code(raw: &str) -> bool {
    raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_valid_custom_event_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_CUSTOM_EVENT_NAME_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}
