use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A UUID-backed identifier scoped to a particular entity type.
///
/// Mirrors the shape of a simple newtype-over-counter id, except the backing
/// value is a v4 UUID rather than a process-local counter, since these ids
/// are persisted and must stay unique across a fleet of nodes.
pub struct Id<T> {
    value: Uuid,
    kind: PhantomData<T>,
}

impl<T> Id<T> {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self {
            value: Uuid::new_v4(),
            kind: PhantomData,
        }
    }

    /// Wraps an existing UUID as this id type.
    pub fn from_uuid(value: Uuid) -> Self {
        Self {
            value,
            kind: PhantomData,
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.value
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self::from_uuid(Uuid::deserialize(deserializer)?))
    }
}

/// A room's externally shareable identifier: 6 lowercase alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    const ALPHABET: &'static [u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    const LEN: usize = 6;

    /// Generates a new random room id candidate. Callers are responsible for
    /// retrying on collision (see `AuthorityStore::create_room`).
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let value: String = (0..Self::LEN)
            .map(|_| Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())] as char)
            .collect();

        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates and wraps a room id as received from a URL path.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == Self::LEN && raw.bytes().all(|b| Self::ALPHABET.contains(&b)) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct ParticipantMarker;
pub struct RoundMarker;
pub struct VoteMarker;
pub struct SessionMarker;
pub struct JobMarker;
pub struct UserMarker;

pub type ParticipantId = Id<ParticipantMarker>;
pub type RoundId = Id<RoundMarker>;
pub type VoteId = Id<VoteMarker>;
pub type SessionId = Id<SessionMarker>;
pub type JobId = Id<JobMarker>;
pub type UserId = Id<UserMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_generate_is_well_formed() {
        let id = RoomId::generate();
        assert_eq!(id.as_str().len(), 6);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn room_id_parse_rejects_bad_input() {
        assert!(RoomId::parse("abc12").is_none());
        assert!(RoomId::parse("ABC123").is_none());
        assert!(RoomId::parse("abc-12").is_none());
        assert!(RoomId::parse("abc123").is_some());
    }

    #[test]
    fn ids_of_different_markers_round_trip_through_strings() {
        let id: RoundId = Id::new();
        let s = id.to_string();
        let parsed: RoundId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
