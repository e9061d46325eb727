//! Domain types for the authentication core.
//!
//! Newtype wrappers for the identifiers that cross the transport boundary, so
//! a session id can never be confused with a user id when it is serialized
//! into the cookie-backed credential store and back.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a persisted Session row.
///
/// This is the only value the transport-level credential store is allowed to
/// carry; it must round-trip exactly one session id per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(i32);

impl SessionId {
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SessionId> for i32 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl From<i32> for SessionId {
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.0)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i32::deserialize(deserializer)?;
        Ok(Self::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_conversions() {
        let id = SessionId::new(7);
        assert_eq!(id.value(), 7);
        assert_eq!(id.to_string(), "7");
        assert_eq!(i32::from(id), 7);
        assert_eq!(SessionId::from(7), id);
    }

    #[test]
    fn session_id_round_trips_through_json() {
        let id = SessionId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
