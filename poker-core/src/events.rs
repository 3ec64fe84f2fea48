use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoomId};

/// A vote as it appears in a `round.revealed.v1` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedVote {
    pub participant_id: ParticipantId,
    pub card_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealStatsPayload {
    pub avg: Option<Decimal>,
    pub median: Option<String>,
    pub consensus: bool,
}

/// Events published to a room's EventBus topic, fanned out to every locally
/// attached connection on every subscribed node. Each variant corresponds to
/// one outbound wire type from spec §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    #[serde(rename = "room.participant_joined.v1")]
    ParticipantJoined {
        room_id: RoomId,
        participant_id: ParticipantId,
        display_name: String,
    },
    #[serde(rename = "room.participant_left.v1")]
    ParticipantLeft {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    #[serde(rename = "round.started.v1")]
    RoundStarted {
        room_id: RoomId,
        round_number: u32,
        story_title: Option<String>,
        started_at: DateTime<Utc>,
    },
    #[serde(rename = "vote.recorded.v1")]
    VoteRecorded {
        room_id: RoomId,
        participant_id: ParticipantId,
        voted_at: DateTime<Utc>,
    },
    #[serde(rename = "round.revealed.v1")]
    RoundRevealed {
        room_id: RoomId,
        votes: Vec<RevealedVote>,
        stats: RevealStatsPayload,
        revealed_at: DateTime<Utc>,
    },
    #[serde(rename = "round.reset.v1")]
    RoundReset { room_id: RoomId, round_number: u32 },
}

impl RoomEvent {
    pub fn room_id(&self) -> &RoomId {
        match self {
            RoomEvent::ParticipantJoined { room_id, .. }
            | RoomEvent::ParticipantLeft { room_id, .. }
            | RoomEvent::RoundStarted { room_id, .. }
            | RoomEvent::VoteRecorded { room_id, .. }
            | RoomEvent::RoundRevealed { room_id, .. }
            | RoomEvent::RoundReset { room_id, .. } => room_id,
        }
    }

    /// The dotted wire type this event serializes as in its outbound frame.
    pub fn wire_type(&self) -> &'static str {
        match self {
            RoomEvent::ParticipantJoined { .. } => "room.participant_joined.v1",
            RoomEvent::ParticipantLeft { .. } => "room.participant_left.v1",
            RoomEvent::RoundStarted { .. } => "round.started.v1",
            RoomEvent::VoteRecorded { .. } => "vote.recorded.v1",
            RoomEvent::RoundRevealed { .. } => "round.revealed.v1",
            RoomEvent::RoundReset { .. } => "round.reset.v1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = RoomEvent::VoteRecorded {
            room_id: RoomId::generate(),
            participant_id: ParticipantId::new(),
            voted_at: Utc::now(),
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: RoomEvent = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.wire_type(), "vote.recorded.v1");
    }
}
