use log::warn;
use parking_lot::Mutex;
use poker_core::{
    compute_stats, ensure_is_host, ensure_may_vote, ensure_revealable, recompute_session_stats,
    room_topic, validate_card_value, BusError, CastCard, ParticipantId, ParticipantIdentity,
    ParticipantRole, ParticipantSummary, Room as RoomData, RoomConfig, RoomEvent, RoomId, RoundId,
    SessionHistory, SessionId, SessionSummaryStats, VotingError,
};
use thiserror::Error;

use crate::db::{DatabaseError, NewParticipant};
use crate::PokerContext;

use super::{RoomConnection, RoomConnectionId};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),
    #[error("room {0} has been deleted")]
    RoomDeleted(RoomId),
    #[error(transparent)]
    Voting(#[from] VotingError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// An in-memory, single-writer actor bound to one room on one node. Owns the
/// locally attached connections and a short-lived cache of the active
/// round's identifier; authoritative data always lives in the
/// [crate::db::AuthorityStore].
pub struct Room {
    id: RoomId,
    context: PokerContext,
    cache: Mutex<RoomCache>,
    connections: Mutex<Vec<RoomConnection>>,
}

struct RoomCache {
    config: RoomConfig,
    active_round_id: Option<RoundId>,
}

impl Room {
    pub fn new(context: &PokerContext, data: RoomData, active_round_id: Option<RoundId>) -> Self {
        Self {
            id: data.id,
            context: context.clone(),
            cache: Mutex::new(RoomCache {
                config: data.config,
                active_round_id,
            }),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn config(&self) -> RoomConfig {
        self.cache.lock().config.clone()
    }

    pub fn active_round_id(&self) -> Option<RoundId> {
        self.cache.lock().active_round_id
    }

    fn set_active_round(&self, round_id: Option<RoundId>) {
        self.cache.lock().active_round_id = round_id;
    }

    /// Publishes an event to this room's EventBus topic. The hub's own
    /// subscription loop (spawned by [crate::PokerContext] on first attach)
    /// is what actually fans it out to locally attached connections,
    /// including the connection that triggered it.
    async fn publish(&self, event: &RoomEvent) -> Result<(), RoomError> {
        let payload = serde_json::to_vec(event).expect("room event always serializes");
        self.context.bus.publish(&room_topic(&self.id), payload).await?;
        Ok(())
    }

    /// Fans a bus-delivered event out to every locally attached connection.
    /// A connection whose outbound queue is full is a slow consumer; it is
    /// skipped here and left for the gateway's own write loop to close.
    pub fn relay_locally(&self, event: &RoomEvent) {
        let connections = self.connections.lock();
        for connection in connections.iter() {
            if !connection.try_send(event.clone()) {
                warn!(
                    "connection {:?} in room {} is a slow consumer, dropping event",
                    connection.id, self.id
                );
            }
        }
    }

    pub fn attach(&self, connection: RoomConnection) {
        self.connections.lock().push(connection);
    }

    pub fn detach(&self, connection_id: RoomConnectionId) -> Option<ParticipantId> {
        let mut connections = self.connections.lock();
        let idx = connections.iter().position(|c| c.id == connection_id)?;
        let connection = connections.remove(idx);
        Some(connection.participant_id)
    }

    pub fn local_connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub async fn join(
        &self,
        identity: ParticipantIdentity,
        display_name: String,
        role: ParticipantRole,
    ) -> Result<poker_core::Participant, RoomError> {
        let participant = self
            .context
            .store
            .find_or_create_participant(NewParticipant {
                room_id: self.id.clone(),
                identity,
                display_name: participant_display_name(&display_name),
                role,
            })
            .await?;

        self.context.store.touch_room_activity(&self.id).await?;

        self.publish(&RoomEvent::ParticipantJoined {
            room_id: self.id.clone(),
            participant_id: participant.id,
            display_name: participant.display_name.clone(),
        })
        .await?;

        Ok(participant)
    }

    pub async fn leave(&self, participant_id: ParticipantId) -> Result<(), RoomError> {
        self.context.store.mark_participant_disconnected(participant_id).await?;

        self.publish(&RoomEvent::ParticipantLeft {
            room_id: self.id.clone(),
            participant_id,
        })
        .await
    }

    pub async fn start_round(
        &self,
        role: ParticipantRole,
        story_title: Option<String>,
    ) -> Result<RoundId, RoomError> {
        ensure_is_host(role)?;

        let round = self
            .context
            .store
            .allocate_next_round(&self.id, story_title.clone())
            .await?;

        self.set_active_round(Some(round.id));

        self.publish(&RoomEvent::RoundStarted {
            room_id: self.id.clone(),
            round_number: round.round_number,
            story_title,
            started_at: round.started_at,
        })
        .await?;

        Ok(round.id)
    }

    pub async fn cast_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        role: ParticipantRole,
        card_value: String,
    ) -> Result<(), RoomError> {
        ensure_may_vote(role)?;
        validate_card_value(&self.config().deck, &card_value)?;

        let round = self.context.store.round_by_id(round_id).await?;
        ensure_revealable(&round)?;

        let vote = self
            .context
            .store
            .cast_or_update_vote(round_id, participant_id, card_value)
            .await?;

        self.publish(&RoomEvent::VoteRecorded {
            room_id: self.id.clone(),
            participant_id,
            voted_at: vote.voted_at,
        })
        .await
    }

    pub async fn reveal_round(&self, round_id: RoundId, role: ParticipantRole) -> Result<(), RoomError> {
        ensure_is_host(role)?;

        let round = self.context.store.round_by_id(round_id).await?;
        ensure_revealable(&round)?;

        let votes = self.context.store.votes_for_round(round_id).await?;
        let cards: Vec<CastCard> = votes.iter().map(CastCard::from).collect();
        let stats = compute_stats(&cards);

        let revealed = self
            .context
            .store
            .reveal_round(round_id, stats.average, stats.median.clone(), stats.consensus_reached)
            .await?;

        self.update_session_history().await?;

        self.publish(&RoomEvent::RoundRevealed {
            room_id: self.id.clone(),
            votes: votes
                .iter()
                .map(|v| poker_core::RevealedVote {
                    participant_id: v.participant_id,
                    card_value: v.card_value.clone(),
                })
                .collect(),
            stats: poker_core::RevealStatsPayload {
                avg: stats.average,
                median: stats.median,
                consensus: stats.consensus_reached,
            },
            revealed_at: revealed.revealed_at.expect("just revealed"),
        })
        .await
    }

    pub async fn reset_round(&self, round_id: RoundId, role: ParticipantRole) -> Result<(), RoomError> {
        ensure_is_host(role)?;

        let round = self.context.store.reset_round(round_id).await?;

        self.publish(&RoomEvent::RoundReset {
            room_id: self.id.clone(),
            round_number: round.round_number,
        })
        .await
    }

    /// Recomputes the room's single running session from every revealed
    /// round so far. There is no explicit session-end trigger: a long-lived
    /// room accumulates into one session indefinitely (see spec open
    /// question on session boundaries).
    async fn update_session_history(&self) -> Result<(), RoomError> {
        let revealed_rounds = self.context.store.revealed_rounds_for_room(&self.id).await?;

        if revealed_rounds.is_empty() {
            return Ok(());
        }

        let mut facts = Vec::with_capacity(revealed_rounds.len());
        let mut vote_counts: std::collections::HashMap<ParticipantId, (String, u32)> =
            std::collections::HashMap::new();

        for round in &revealed_rounds {
            let votes = self.context.store.votes_for_round(round.id).await?;

            for vote in &votes {
                let participant = self.context.store.participant_by_id(vote.participant_id).await?;
                let entry = vote_counts
                    .entry(vote.participant_id)
                    .or_insert((participant.display_name, 0));
                entry.1 += 1;
            }

            facts.push(poker_core::RevealedRoundFacts {
                consensus_reached: round.consensus_reached.unwrap_or(false),
                votes: votes.iter().map(CastCard::from).collect(),
                started_at: round.started_at,
                revealed_at: round.revealed_at.unwrap_or(round.started_at),
            });
        }

        let (total_rounds, total_votes, consensus_rate, rounds_with_consensus, avg_time) =
            recompute_session_stats(&facts);

        let participants = vote_counts
            .into_iter()
            .map(|(participant_id, (display_name, vote_count))| ParticipantSummary {
                participant_id,
                display_name,
                vote_count,
            })
            .collect();

        let existing = self.context.store.session_history_for_room(&self.id).await?;

        let session = SessionHistory {
            id: existing.as_ref().map(|s| s.id).unwrap_or_else(SessionId::new),
            room_id: self.id.clone(),
            started_at: existing
                .as_ref()
                .map(|s| s.started_at)
                .unwrap_or(revealed_rounds[0].started_at),
            ended_at: None,
            total_rounds,
            total_stories: total_rounds,
            participants,
            summary_stats: SessionSummaryStats {
                total_votes,
                consensus_rate,
                average_estimation_time_seconds: avg_time,
                rounds_with_consensus,
            },
        };

        self.context.store.upsert_session_history(session).await?;

        Ok(())
    }
}

fn participant_display_name(display_name: &str) -> String {
    if display_name.trim().is_empty() {
        "Anonymous".to_string()
    } else {
        display_name.chars().take(100).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_display_name_falls_back_to_anonymous() {
        assert_eq!(participant_display_name(""), "Anonymous");
        assert_eq!(participant_display_name("  "), "Anonymous");
        assert_eq!(participant_display_name("Alice"), "Alice");
    }
}
