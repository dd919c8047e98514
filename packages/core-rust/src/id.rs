//! Async-response identifiers.
//!
//! Every dispatched read/write and every subscription is tagged with an
//! [`OperationId`]: a process-wide sequence number paired with a random nonce.
//!
//! # Wire format
//!
//! Identifiers serialize to `"<sequence>#<nonce>"`, where the nonce renders as
//! five lowercase hex groups (`8-4-4-4-4`), e.g. `"17#1f0c9a2e-77d1-4b2a-9c03-5e4f"`.
//! The nonce is a `UUIDv4` truncated to its first 12 bytes; the version and
//! variant bits live in that prefix, so the truncated value is still a valid v4.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Number of nonce bytes carried on the wire.
const NONCE_WIRE_BYTES: usize = 12;

/// Hex digit count of each nonce group on the wire.
const NONCE_GROUPS: [usize; 5] = [8, 4, 4, 4, 4];

/// Identifier of one async operation or subscription.
///
/// Immutable once issued. Ordering is by sequence first, then nonce, which
/// matches issue order within a single process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId {
    sequence: u64,
    nonce: Uuid,
}

impl OperationId {
    /// Builds an identifier from its parts. Nonce bytes past the wire prefix
    /// are cleared so that the value survives a display/parse cycle.
    #[must_use]
    pub fn new(sequence: u64, nonce: Uuid) -> Self {
        let mut bytes = *nonce.as_bytes();
        bytes[NONCE_WIRE_BYTES..].fill(0);
        Self {
            sequence,
            nonce: Uuid::from_bytes(bytes),
        }
    }

    /// Process-local sequence component.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Random nonce component.
    #[must_use]
    pub const fn nonce(&self) -> Uuid {
        self.nonce
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#", self.sequence)?;
        for (index, byte) in self.nonce.as_bytes()[..NONCE_WIRE_BYTES].iter().enumerate() {
            if matches!(index, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors from parsing the wire form of an [`OperationId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationIdError {
    #[error("operation id is missing the '#' separator")]
    MissingSeparator,
    #[error("invalid sequence component: {0:?}")]
    InvalidSequence(String),
    #[error("invalid nonce component: {0:?}")]
    InvalidNonce(String),
}

impl FromStr for OperationId {
    type Err = OperationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sequence, nonce) = s
            .split_once('#')
            .ok_or(OperationIdError::MissingSeparator)?;

        if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OperationIdError::InvalidSequence(sequence.to_string()));
        }
        let sequence = sequence
            .parse::<u64>()
            .map_err(|_| OperationIdError::InvalidSequence(sequence.to_string()))?;

        let bytes = parse_nonce(nonce)
            .ok_or_else(|| OperationIdError::InvalidNonce(nonce.to_string()))?;

        Ok(Self::new(sequence, Uuid::from_bytes(bytes)))
    }
}

fn parse_nonce(nonce: &str) -> Option<[u8; 16]> {
    let groups: Vec<&str> = nonce.split('-').collect();
    if groups.len() != NONCE_GROUPS.len()
        || groups
            .iter()
            .zip(NONCE_GROUPS)
            .any(|(group, len)| group.len() != len)
    {
        return None;
    }

    let hex: String = groups.concat();
    if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }

    let mut bytes = [0u8; 16];
    for (slot, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *slot = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(bytes)
}

impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Issues [`OperationId`]s.
///
/// Safe under any number of concurrent callers: the sequence is a single
/// atomic counter, so no two callers observe the same value. The counter
/// restarts with the process; the nonce keeps ids distinct across restarts.
#[derive(Debug)]
pub struct OperationIdGenerator {
    next_sequence: AtomicU64,
}

impl OperationIdGenerator {
    /// Creates a generator whose first id has sequence 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first id has the given sequence.
    #[must_use]
    pub fn starting_at(sequence: u64) -> Self {
        Self {
            next_sequence: AtomicU64::new(sequence),
        }
    }

    /// Issues the next identifier.
    pub fn next(&self) -> OperationId {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        OperationId::new(sequence, Uuid::new_v4())
    }
}

impl Default for OperationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
