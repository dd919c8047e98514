//! JSON schemas exchanged with REST clients and notification callbacks.
//!
//! Notification batches are grouped by [`NotificationCategory`]; a batch only
//! serializes categories that carry at least one event, in the fixed order
//! `registrations`, `reg-updates`, `de-registrations`, `async-responses`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::OperationId;
use crate::types::{EndpointName, OperationResult};

/// Body of a `202 Accepted` reply to a read, write or subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncResponseIdBody {
    #[serde(rename = "async-response-id")]
    pub async_response_id: OperationId,
}

impl From<OperationId> for AsyncResponseIdBody {
    fn from(id: OperationId) -> Self {
        Self {
            async_response_id: id,
        }
    }
}

/// Resolved result of one operation, as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncResponse {
    pub id: OperationId,
    pub status: u16,
    /// Unix milliseconds at which the result was recorded.
    pub timestamp: u64,
    #[serde(default, with = "base64_payload", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl AsyncResponse {
    #[must_use]
    pub fn new(id: OperationId, result: OperationResult, timestamp: u64) -> Self {
        Self {
            id,
            status: result.status,
            timestamp,
            payload: result.payload,
        }
    }
}

/// Endpoint lifecycle event (`registrations`, `reg-updates`, `de-registrations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub name: EndpointName,
}

/// Closed set of notification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationCategory {
    #[serde(rename = "registrations")]
    Registrations,
    #[serde(rename = "reg-updates")]
    RegUpdates,
    #[serde(rename = "de-registrations")]
    Deregistrations,
    #[serde(rename = "async-responses")]
    AsyncResponses,
}

impl NotificationCategory {
    /// All categories in serialization order.
    pub const ALL: [Self; 4] = [
        Self::Registrations,
        Self::RegUpdates,
        Self::Deregistrations,
        Self::AsyncResponses,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registrations => "registrations",
            Self::RegUpdates => "reg-updates",
            Self::Deregistrations => "de-registrations",
            Self::AsyncResponses => "async-responses",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event routed through the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Registration(RegistrationEvent),
    RegUpdate(RegistrationEvent),
    Deregistration(RegistrationEvent),
    AsyncResponse(AsyncResponse),
}

impl NotificationEvent {
    #[must_use]
    pub const fn category(&self) -> NotificationCategory {
        match self {
            Self::Registration(_) => NotificationCategory::Registrations,
            Self::RegUpdate(_) => NotificationCategory::RegUpdates,
            Self::Deregistration(_) => NotificationCategory::Deregistrations,
            Self::AsyncResponse(_) => NotificationCategory::AsyncResponses,
        }
    }
}

/// Events grouped by category: the body of `GET /notification/pull` and of
/// every callback `PUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registrations: Vec<RegistrationEvent>,
    #[serde(rename = "reg-updates", default, skip_serializing_if = "Vec::is_empty")]
    pub reg_updates: Vec<RegistrationEvent>,
    #[serde(
        rename = "de-registrations",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub deregistrations: Vec<RegistrationEvent>,
    #[serde(
        rename = "async-responses",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub async_responses: Vec<AsyncResponse>,
}

impl NotificationBatch {
    /// Appends an event to its category, preserving arrival order within it.
    pub fn push(&mut self, event: NotificationEvent) {
        match event {
            NotificationEvent::Registration(e) => self.registrations.push(e),
            NotificationEvent::RegUpdate(e) => self.reg_updates.push(e),
            NotificationEvent::Deregistration(e) => self.deregistrations.push(e),
            NotificationEvent::AsyncResponse(e) => self.async_responses.push(e),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of events across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
            + self.reg_updates.len()
            + self.deregistrations.len()
            + self.async_responses.len()
    }

    /// Number of events in one category.
    #[must_use]
    pub fn count(&self, category: NotificationCategory) -> usize {
        match category {
            NotificationCategory::Registrations => self.registrations.len(),
            NotificationCategory::RegUpdates => self.reg_updates.len(),
            NotificationCategory::Deregistrations => self.deregistrations.len(),
            NotificationCategory::AsyncResponses => self.async_responses.len(),
        }
    }
}

impl FromIterator<NotificationEvent> for NotificationBatch {
    fn from_iter<T: IntoIterator<Item = NotificationEvent>>(iter: T) -> Self {
        let mut batch = Self::default();
        for event in iter {
            batch.push(event);
        }
        batch
    }
}

/// Body of `PUT /notification/callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRegistration {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Serde adapter rendering raw payload bytes as standard base64.
mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
