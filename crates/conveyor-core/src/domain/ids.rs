//! Strongly-typed identifiers.
//!
//! Executions get a ULID: time-sortable, generatable on any node without
//! coordination, and the same 128-bit size as a UUID. A phantom marker type
//! keeps different ID families from being mixed up at compile time while
//! sharing one implementation.
//!
//! Flows are identified by a caller-chosen name, so [`FlowId`] is a plain
//! string newtype rather than a generated ID.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Marker trait for ID families. Provides the prefix used in `Display`
/// (log/error output); the wire format is the bare ULID string.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed ID. `T` is phantom: zero bytes at runtime, but
/// `Id<Execution>` and any other family are distinct types.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// The all-zero ULID. Only ever seen on hand-built or corrupted
    /// envelopes; rejected by envelope validation.
    pub fn is_nil(&self) -> bool {
        self.ulid.is_nil()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// Accepts the bare ULID (wire format) or the prefixed `Display` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(s).map(Self::from_ulid)
    }
}

/// Marker type for executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Execution {}

impl IdMarker for Execution {
    fn prefix() -> &'static str {
        "exec-"
    }
}

/// Identifier of an Execution (one run of a workflow).
pub type ExecutionId = Id<Execution>;

/// Name of a registered workflow definition. Caller-chosen, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
