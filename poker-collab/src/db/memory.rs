use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use poker_core::{
    ExportJob, ExportJobStatus, JobId, Participant, ParticipantId, Room, RoomId, Round, RoundId,
    SessionHistory, SessionId, Vote, VoteId,
};

use super::{
    AuthorityStore, DatabaseError, ExportJobOutcome, NewExportJob, NewParticipant, NewRoom, Result,
    UpdatedRoomConfig,
};

const ROOM_ID_RETRIES: usize = 5;

/// An in-memory [AuthorityStore] for tests and local development without a
/// database. Holds the same entities as the relational schema in maps keyed
/// by id, guarded individually rather than transactionally — fine for tests,
/// which don't exercise cross-entity contention.
#[derive(Default)]
pub struct InMemoryAuthorityStore {
    rooms: DashMap<RoomId, Room>,
    participants: DashMap<ParticipantId, Participant>,
    rounds: DashMap<RoundId, Round>,
    votes: Mutex<HashMap<VoteId, Vote>>,
    sessions: DashMap<SessionId, SessionHistory>,
    export_jobs: DashMap<JobId, ExportJob>,
}

impl InMemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorityStore for InMemoryAuthorityStore {
    async fn create_room(&self, new_room: NewRoom) -> Result<Room> {
        for _ in 0..ROOM_ID_RETRIES {
            let candidate = RoomId::generate();

            if self.rooms.contains_key(&candidate) {
                continue;
            }

            let now = Utc::now();
            let room = Room {
                id: candidate.clone(),
                title: new_room.title,
                privacy: new_room.privacy,
                owner_user_id: new_room.owner_user_id,
                org_id: new_room.org_id,
                config: new_room.config,
                created_at: now,
                last_active_at: now,
                soft_deleted_at: None,
            };

            self.rooms.insert(candidate, room.clone());
            return Ok(room);
        }

        Err(DatabaseError::IdentifierExhausted)
    }

    async fn room_by_id(&self, room_id: &RoomId) -> Result<Room> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.clone())
            .ok_or(DatabaseError::NotFound { resource: "room", identifier: "id" })
    }

    async fn update_room_config(&self, update: UpdatedRoomConfig) -> Result<Room> {
        let mut entry = self
            .rooms
            .get_mut(&update.room_id)
            .ok_or(DatabaseError::NotFound { resource: "room", identifier: "id" })?;

        entry.config = update.config;
        Ok(entry.clone())
    }

    async fn touch_room_activity(&self, room_id: &RoomId) -> Result<()> {
        let mut entry = self
            .rooms
            .get_mut(room_id)
            .ok_or(DatabaseError::NotFound { resource: "room", identifier: "id" })?;

        entry.last_active_at = Utc::now();
        Ok(())
    }

    async fn find_or_create_participant(&self, new: NewParticipant) -> Result<Participant> {
        if let Some(existing) = self
            .participants
            .iter()
            .find(|p| p.room_id == new.room_id && p.identity == new.identity)
        {
            return Ok(existing.clone());
        }

        let participant = Participant {
            id: ParticipantId::new(),
            room_id: new.room_id,
            identity: new.identity,
            display_name: new.display_name,
            role: new.role,
            connected_at: Utc::now(),
            disconnected_at: None,
        };

        self.participants.insert(participant.id, participant.clone());
        Ok(participant)
    }

    async fn participant_by_id(&self, participant_id: ParticipantId) -> Result<Participant> {
        self.participants
            .get(&participant_id)
            .map(|entry| entry.clone())
            .ok_or(DatabaseError::NotFound { resource: "participant", identifier: "id" })
    }

    async fn mark_participant_disconnected(&self, participant_id: ParticipantId) -> Result<()> {
        let mut entry = self
            .participants
            .get_mut(&participant_id)
            .ok_or(DatabaseError::NotFound { resource: "participant", identifier: "id" })?;

        entry.disconnected_at = Some(Utc::now());
        Ok(())
    }

    async fn active_round_for_room(&self, room_id: &RoomId) -> Result<Option<Round>> {
        let active = self
            .rounds
            .iter()
            .filter(|r| &r.room_id == room_id && !r.is_revealed())
            .max_by_key(|r| r.round_number)
            .map(|entry| entry.clone());

        Ok(active)
    }

    async fn round_by_id(&self, round_id: RoundId) -> Result<Round> {
        self.rounds
            .get(&round_id)
            .map(|entry| entry.clone())
            .ok_or(DatabaseError::NotFound { resource: "round", identifier: "id" })
    }

    async fn allocate_next_round(&self, room_id: &RoomId, story_title: Option<String>) -> Result<Round> {
        let next_number = self
            .rounds
            .iter()
            .filter(|r| &r.room_id == room_id)
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0)
            + 1;

        let round = Round {
            id: RoundId::new(),
            room_id: room_id.clone(),
            round_number: next_number,
            story_title,
            started_at: Utc::now(),
            revealed_at: None,
            average: None,
            median: None,
            consensus_reached: None,
        };

        self.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    async fn reveal_round(
        &self,
        round_id: RoundId,
        average: Option<rust_decimal::Decimal>,
        median: Option<String>,
        consensus_reached: bool,
    ) -> Result<Round> {
        let mut entry = self
            .rounds
            .get_mut(&round_id)
            .ok_or(DatabaseError::NotFound { resource: "round", identifier: "id" })?;

        if entry.is_revealed() {
            return Err(DatabaseError::InvalidTransition("round is already revealed"));
        }

        entry.revealed_at = Some(Utc::now());
        entry.average = average;
        entry.median = median;
        entry.consensus_reached = Some(consensus_reached);
        Ok(entry.clone())
    }

    async fn reset_round(&self, round_id: RoundId) -> Result<Round> {
        self.votes.lock().retain(|_, v| v.round_id != round_id);

        let mut entry = self
            .rounds
            .get_mut(&round_id)
            .ok_or(DatabaseError::NotFound { resource: "round", identifier: "id" })?;

        entry.revealed_at = None;
        entry.average = None;
        entry.median = None;
        entry.consensus_reached = None;
        Ok(entry.clone())
    }

    async fn revealed_rounds_for_room(&self, room_id: &RoomId) -> Result<Vec<Round>> {
        let mut rounds: Vec<Round> = self
            .rounds
            .iter()
            .filter(|r| &r.room_id == room_id && r.is_revealed())
            .map(|entry| entry.clone())
            .collect();

        rounds.sort_by_key(|r| r.round_number);
        Ok(rounds)
    }

    async fn cast_or_update_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_value: String,
    ) -> Result<Vote> {
        let mut votes = self.votes.lock();

        if let Some(existing) = votes
            .values_mut()
            .find(|v| v.round_id == round_id && v.participant_id == participant_id)
        {
            existing.card_value = card_value;
            existing.voted_at = Utc::now();
            return Ok(existing.clone());
        }

        let vote = Vote {
            id: VoteId::new(),
            round_id,
            participant_id,
            card_value,
            voted_at: Utc::now(),
        };

        votes.insert(vote.id, vote.clone());
        Ok(vote)
    }

    async fn votes_for_round(&self, round_id: RoundId) -> Result<Vec<Vote>> {
        Ok(self
            .votes
            .lock()
            .values()
            .filter(|v| v.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn upsert_session_history(&self, session: SessionHistory) -> Result<SessionHistory> {
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session_history_for_room(&self, room_id: &RoomId) -> Result<Option<SessionHistory>> {
        Ok(self
            .sessions
            .iter()
            .find(|s| &s.room_id == room_id)
            .map(|entry| entry.clone()))
    }

    async fn session_history_by_id(&self, session_id: SessionId) -> Result<SessionHistory> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.clone())
            .ok_or(DatabaseError::NotFound { resource: "session_history", identifier: "id" })
    }

    async fn create_export_job(&self, new_job: NewExportJob) -> Result<ExportJob> {
        let job = ExportJob {
            id: JobId::new(),
            user_id: new_job.user_id,
            session_id: new_job.session_id,
            format: new_job.format,
            status: ExportJobStatus::Pending,
            download_url: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            expires_at: None,
        };

        self.export_jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn export_job_by_id(&self, job_id: JobId) -> Result<ExportJob> {
        self.export_jobs
            .get(&job_id)
            .map(|entry| entry.clone())
            .ok_or(DatabaseError::NotFound { resource: "export_job", identifier: "id" })
    }

    async fn set_export_job_status(
        &self,
        job_id: JobId,
        status: ExportJobStatus,
        outcome: Option<ExportJobOutcome>,
    ) -> Result<ExportJob> {
        let mut entry = self
            .export_jobs
            .get_mut(&job_id)
            .ok_or(DatabaseError::NotFound { resource: "export_job", identifier: "id" })?;

        if !entry.status.may_advance_to(status) {
            return Err(DatabaseError::InvalidTransition(
                "export job status can only move forward",
            ));
        }

        entry.status = status;

        match outcome {
            Some(ExportJobOutcome::Completed { download_url, expires_at }) => {
                entry.download_url = Some(download_url);
                entry.expires_at = Some(expires_at);
                entry.completed_at = Some(Utc::now());
            }
            Some(ExportJobOutcome::Failed { error_message }) => {
                entry.error_message = Some(error_message);
                entry.failed_at = Some(Utc::now());
            }
            None => {}
        }

        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use poker_core::{ParticipantIdentity, ParticipantRole, RoomConfig, RoomPrivacy};

    use super::*;

    #[tokio::test]
    async fn create_room_allocates_a_well_formed_id() {
        let store = InMemoryAuthorityStore::new();
        let room = store
            .create_room(NewRoom {
                title: "Sprint planning".to_string(),
                privacy: RoomPrivacy::Public,
                owner_user_id: None,
                org_id: None,
                config: RoomConfig::default(),
            })
            .await
            .unwrap();

        assert_eq!(room.id.as_str().len(), 6);
        assert!(store.room_by_id(&room.id).await.is_ok());
    }

    #[tokio::test]
    async fn allocate_next_round_increments_round_number() {
        let store = InMemoryAuthorityStore::new();
        let room = store
            .create_room(NewRoom {
                title: "Sprint planning".to_string(),
                privacy: RoomPrivacy::Public,
                owner_user_id: None,
                org_id: None,
                config: RoomConfig::default(),
            })
            .await
            .unwrap();

        let first = store.allocate_next_round(&room.id, None).await.unwrap();
        let second = store.allocate_next_round(&room.id, None).await.unwrap();

        assert_eq!(first.round_number, 1);
        assert_eq!(second.round_number, 2);
    }

    #[tokio::test]
    async fn revealing_twice_is_rejected() {
        let store = InMemoryAuthorityStore::new();
        let room = store
            .create_room(NewRoom {
                title: "Sprint planning".to_string(),
                privacy: RoomPrivacy::Public,
                owner_user_id: None,
                org_id: None,
                config: RoomConfig::default(),
            })
            .await
            .unwrap();

        let round = store.allocate_next_round(&room.id, None).await.unwrap();
        store.reveal_round(round.id, None, None, false).await.unwrap();

        let result = store.reveal_round(round.id, None, None, false).await;
        assert!(matches!(result, Err(DatabaseError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn reset_round_clears_votes() {
        let store = InMemoryAuthorityStore::new();
        let room = store
            .create_room(NewRoom {
                title: "Sprint planning".to_string(),
                privacy: RoomPrivacy::Public,
                owner_user_id: None,
                org_id: None,
                config: RoomConfig::default(),
            })
            .await
            .unwrap();

        let round = store.allocate_next_round(&room.id, None).await.unwrap();
        let participant = store
            .find_or_create_participant(NewParticipant {
                room_id: room.id.clone(),
                identity: ParticipantIdentity::Anonymous("guest".to_string()),
                display_name: "Alice".to_string(),
                role: ParticipantRole::Host,
            })
            .await
            .unwrap();

        store
            .cast_or_update_vote(round.id, participant.id, "5".to_string())
            .await
            .unwrap();
        assert_eq!(store.votes_for_round(round.id).await.unwrap().len(), 1);

        store.reveal_round(round.id, None, None, false).await.unwrap();
        store.reset_round(round.id).await.unwrap();

        assert!(store.votes_for_round(round.id).await.unwrap().is_empty());
        assert!(!store.round_by_id(round.id).await.unwrap().is_revealed());
    }
}
