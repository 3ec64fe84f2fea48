mod memory;
mod pg;

pub use memory::*;
pub use pg::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poker_core::{
    ExportFormat, ExportJob, ExportJobStatus, JobId, ParticipantId, ParticipantIdentity,
    ParticipantRole, Room, RoomConfig, RoomId, Round, RoundId, SessionHistory, SessionId, UserId,
    Vote,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists.
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    /// A resource doesn't exist.
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    /// A unique identifier (room id, round number, ...) could not be
    /// allocated after repeated collisions.
    #[error("could not allocate a unique identifier after retrying")]
    IdentifierExhausted,
    /// The requested state transition violates an invariant (e.g. revealing
    /// an already-revealed round).
    #[error("{0}")]
    InvalidTransition(&'static str),
}

/// Helper trait to reduce repository boilerplate, mirroring the teacher's
/// `IntoDatabaseError`/`DatabaseResult` pair.
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

impl IntoDatabaseError for sqlx::Error {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            sqlx::Error::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => e.any(),
        }
    }
}

#[derive(Debug)]
pub struct NewRoom {
    pub title: String,
    pub privacy: poker_core::RoomPrivacy,
    pub owner_user_id: Option<UserId>,
    pub org_id: Option<String>,
    pub config: RoomConfig,
}

#[derive(Debug)]
pub struct UpdatedRoomConfig {
    pub room_id: RoomId,
    pub config: RoomConfig,
}

#[derive(Debug)]
pub struct NewParticipant {
    pub room_id: RoomId,
    pub identity: ParticipantIdentity,
    pub display_name: String,
    pub role: ParticipantRole,
}

#[derive(Debug)]
pub struct NewExportJob {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub format: ExportFormat,
}

#[derive(Debug)]
pub enum ExportJobOutcome {
    Completed {
        download_url: String,
        expires_at: DateTime<Utc>,
    },
    Failed {
        error_message: String,
    },
}

/// Transactional, serializable persistence for every entity in the domain
/// model: rooms, participants, rounds, votes, session history, export jobs.
/// Source of truth; mutated only through the domain services.
#[async_trait]
pub trait AuthorityStore: Send + Sync + 'static {
    async fn create_room(&self, new_room: NewRoom) -> Result<Room>;
    async fn room_by_id(&self, room_id: &RoomId) -> Result<Room>;
    async fn update_room_config(&self, update: UpdatedRoomConfig) -> Result<Room>;
    async fn touch_room_activity(&self, room_id: &RoomId) -> Result<()>;

    async fn find_or_create_participant(&self, new: NewParticipant) -> Result<poker_core::Participant>;
    async fn participant_by_id(&self, participant_id: ParticipantId) -> Result<poker_core::Participant>;
    async fn mark_participant_disconnected(&self, participant_id: ParticipantId) -> Result<()>;

    async fn active_round_for_room(&self, room_id: &RoomId) -> Result<Option<Round>>;
    async fn round_by_id(&self, round_id: RoundId) -> Result<Round>;
    async fn allocate_next_round(&self, room_id: &RoomId, story_title: Option<String>) -> Result<Round>;
    async fn reveal_round(
        &self,
        round_id: RoundId,
        average: Option<rust_decimal::Decimal>,
        median: Option<String>,
        consensus_reached: bool,
    ) -> Result<Round>;
    async fn reset_round(&self, round_id: RoundId) -> Result<Round>;
    async fn revealed_rounds_for_room(&self, room_id: &RoomId) -> Result<Vec<Round>>;

    async fn cast_or_update_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_value: String,
    ) -> Result<Vote>;
    async fn votes_for_round(&self, round_id: RoundId) -> Result<Vec<Vote>>;

    async fn upsert_session_history(&self, session: SessionHistory) -> Result<SessionHistory>;
    async fn session_history_for_room(&self, room_id: &RoomId) -> Result<Option<SessionHistory>>;
    async fn session_history_by_id(&self, session_id: SessionId) -> Result<SessionHistory>;

    async fn create_export_job(&self, new_job: NewExportJob) -> Result<ExportJob>;
    async fn export_job_by_id(&self, job_id: JobId) -> Result<ExportJob>;
    async fn set_export_job_status(
        &self,
        job_id: JobId,
        status: ExportJobStatus,
        outcome: Option<ExportJobOutcome>,
    ) -> Result<ExportJob>;
}
