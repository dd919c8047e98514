use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of a registered remote device.
///
/// Opaque to this crate; whether a name refers to a known endpoint is decided
/// by an [`EndpointRegistry`](crate::traits::EndpointRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointName(String);

impl EndpointName {
    /// Wraps a device name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Address of a value on an endpoint: an ordered list of path segments,
/// normally `object/instance/resource`.
///
/// Equality is exact over all segments, so `3303/0/5700` and `3303/0/5701`
/// are unrelated keys. Whether a path is addressable on a device is decided by
/// the transport, not here; parsing only rejects empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

/// Errors from parsing a [`ResourcePath`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourcePathError {
    #[error("resource path is empty")]
    Empty,
    #[error("resource path {0:?} contains an empty segment")]
    EmptySegment(String),
}

impl ResourcePath {
    /// Builds a path from already-split segments.
    ///
    /// # Errors
    ///
    /// Returns `ResourcePathError` if there are no segments or one is empty.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ResourcePathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(ResourcePathError::Empty);
        }
        if segments.iter().any(String::is_empty) {
            return Err(ResourcePathError::EmptySegment(segments.join("/")));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Numeric form of the path, if every segment is a `u16`.
    ///
    /// Device object models address values by 16-bit ids; transports use this
    /// to check addressability.
    #[must_use]
    pub fn numeric_ids(&self) -> Option<Vec<u16>> {
        self.segments
            .iter()
            .map(|segment| {
                if segment.bytes().all(|b| b.is_ascii_digit()) {
                    segment.parse().ok()
                } else {
                    None
                }
            })
            .collect()
    }
}

impl FromStr for ResourcePath {
    type Err = ResourcePathError;

    /// Parses `"3303/0/5700"`; a single leading or trailing `/` is tolerated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(ResourcePathError::Empty);
        }
        Self::from_segments(trimmed.split('/'))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// What a tracked async operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// One-shot read of a resource value.
    Read,
    /// One-shot write to a resource.
    Write,
    /// One notification cycle of a subscription.
    Notify,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Notify => "notify",
        }
    }
}

/// Lifecycle of an async operation: `Pending -> Resolved -> Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Dispatched to the transport, no result yet.
    Pending,
    /// Result recorded, waiting for pull or push delivery.
    Resolved,
    /// Result handed to a consumer.
    Delivered,
}

/// Device-side outcome of an operation, set once by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// HTTP-style status code reported for the device operation.
    pub status: u16,
    /// Raw device payload (possibly empty).
    pub payload: Vec<u8>,
}

impl OperationResult {
    pub fn new(status: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    /// A payload-less result with the given status.
    #[must_use]
    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            payload: Vec::new(),
        }
    }
}

/// Lifecycle of a subscription:
/// `Active -> Cancelling -> Cancelled` (the key is free again once cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelling,
    Cancelled,
}
