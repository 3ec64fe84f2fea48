use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use async_trait::async_trait;
use poker_core::{
    ExportFormat, ExportJob, ExportJobStatus, Id, JobId, Participant, ParticipantId,
    ParticipantIdentity, ParticipantRole, Room, RoomConfig, RoomId, RoomPrivacy, Round, RoundId,
    SessionHistory, Vote,
};

use super::{
    AuthorityStore, DatabaseError, ExportJobOutcome, IntoDatabaseError, NewExportJob, NewParticipant,
    NewRoom, Result, UpdatedRoomConfig,
};

/// How many times `create_room` retries on a room id collision before giving up.
const ROOM_ID_RETRIES: usize = 5;

/// How many times `allocate_next_round` retries on a (roomId, roundNumber)
/// collision before giving up.
const ROUND_NUMBER_RETRIES: usize = 5;

/// A postgres-backed [AuthorityStore].
///
/// Uses sqlx's runtime-checked query API (`query`/`query_as`) rather than the
/// `query!`/`query_as!` macros, since those require a live database or a
/// checked-in offline cache at build time.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct RoomRow {
    id: String,
    title: String,
    privacy: String,
    owner_user_id: Option<uuid::Uuid>,
    org_id: Option<String>,
    config: Json<RoomConfig>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    soft_deleted_at: Option<DateTime<Utc>>,
}

fn privacy_to_str(privacy: RoomPrivacy) -> &'static str {
    match privacy {
        RoomPrivacy::Public => "public",
        RoomPrivacy::InviteOnly => "invite-only",
        RoomPrivacy::OrgRestricted => "org-restricted",
    }
}

fn privacy_from_str(raw: &str) -> RoomPrivacy {
    match raw {
        "invite-only" => RoomPrivacy::InviteOnly,
        "org-restricted" => RoomPrivacy::OrgRestricted,
        _ => RoomPrivacy::Public,
    }
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: RoomId::parse(&row.id).expect("room id stored in db is always well-formed"),
            title: row.title,
            privacy: privacy_from_str(&row.privacy),
            owner_user_id: row.owner_user_id.map(Id::from_uuid),
            org_id: row.org_id,
            config: row.config.0,
            created_at: row.created_at,
            last_active_at: row.last_active_at,
            soft_deleted_at: row.soft_deleted_at,
        }
    }
}

fn role_to_str(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Host => "host",
        ParticipantRole::Voter => "voter",
        ParticipantRole::Observer => "observer",
    }
}

fn role_from_str(raw: &str) -> ParticipantRole {
    match raw {
        "host" => ParticipantRole::Host,
        "observer" => ParticipantRole::Observer,
        _ => ParticipantRole::Voter,
    }
}

#[derive(FromRow)]
struct ParticipantRow {
    id: uuid::Uuid,
    room_id: String,
    identity: Json<ParticipantIdentity>,
    display_name: String,
    role: String,
    connected_at: DateTime<Utc>,
    disconnected_at: Option<DateTime<Utc>>,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            id: Id::from_uuid(row.id),
            room_id: RoomId::parse(&row.room_id).expect("room id stored in db is always well-formed"),
            identity: row.identity.0,
            display_name: row.display_name,
            role: role_from_str(&row.role),
            connected_at: row.connected_at,
            disconnected_at: row.disconnected_at,
        }
    }
}

#[derive(FromRow)]
struct RoundRow {
    id: uuid::Uuid,
    room_id: String,
    round_number: i32,
    story_title: Option<String>,
    started_at: DateTime<Utc>,
    revealed_at: Option<DateTime<Utc>>,
    average: Option<Decimal>,
    median: Option<String>,
    consensus_reached: Option<bool>,
}

impl From<RoundRow> for Round {
    fn from(row: RoundRow) -> Self {
        Round {
            id: Id::from_uuid(row.id),
            room_id: RoomId::parse(&row.room_id).expect("room id stored in db is always well-formed"),
            round_number: row.round_number as u32,
            story_title: row.story_title,
            started_at: row.started_at,
            revealed_at: row.revealed_at,
            average: row.average,
            median: row.median,
            consensus_reached: row.consensus_reached,
        }
    }
}

#[derive(FromRow)]
struct VoteRow {
    id: uuid::Uuid,
    round_id: uuid::Uuid,
    participant_id: uuid::Uuid,
    card_value: String,
    voted_at: DateTime<Utc>,
}

impl From<VoteRow> for Vote {
    fn from(row: VoteRow) -> Self {
        Vote {
            id: Id::from_uuid(row.id),
            round_id: Id::from_uuid(row.round_id),
            participant_id: Id::from_uuid(row.participant_id),
            card_value: row.card_value,
            voted_at: row.voted_at,
        }
    }
}

#[derive(FromRow)]
struct SessionHistoryRow {
    id: uuid::Uuid,
    room_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    total_rounds: i32,
    total_stories: i32,
    participants: Json<Vec<poker_core::ParticipantSummary>>,
    summary_stats: Json<poker_core::SessionSummaryStats>,
}

impl From<SessionHistoryRow> for SessionHistory {
    fn from(row: SessionHistoryRow) -> Self {
        SessionHistory {
            id: Id::from_uuid(row.id),
            room_id: RoomId::parse(&row.room_id).expect("room id stored in db is always well-formed"),
            started_at: row.started_at,
            ended_at: row.ended_at,
            total_rounds: row.total_rounds as u32,
            total_stories: row.total_stories as u32,
            participants: row.participants.0,
            summary_stats: row.summary_stats.0,
        }
    }
}

fn format_to_str(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => "csv",
        ExportFormat::Pdf => "pdf",
    }
}

fn format_from_str(raw: &str) -> ExportFormat {
    match raw {
        "pdf" => ExportFormat::Pdf,
        _ => ExportFormat::Csv,
    }
}

fn status_to_str(status: ExportJobStatus) -> &'static str {
    match status {
        ExportJobStatus::Pending => "pending",
        ExportJobStatus::Processing => "processing",
        ExportJobStatus::Completed => "completed",
        ExportJobStatus::Failed => "failed",
    }
}

fn status_from_str(raw: &str) -> ExportJobStatus {
    match raw {
        "processing" => ExportJobStatus::Processing,
        "completed" => ExportJobStatus::Completed,
        "failed" => ExportJobStatus::Failed,
        _ => ExportJobStatus::Pending,
    }
}

#[derive(FromRow)]
struct ExportJobRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    session_id: uuid::Uuid,
    format: String,
    status: String,
    download_url: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<ExportJobRow> for ExportJob {
    fn from(row: ExportJobRow) -> Self {
        ExportJob {
            id: Id::from_uuid(row.id),
            user_id: Id::from_uuid(row.user_id),
            session_id: Id::from_uuid(row.session_id),
            format: format_from_str(&row.format),
            status: status_from_str(&row.status),
            download_url: row.download_url,
            error_message: row.error_message,
            created_at: row.created_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl AuthorityStore for PgStore {
    async fn create_room(&self, new_room: NewRoom) -> Result<Room> {
        let config = Json(new_room.config);

        for _ in 0..ROOM_ID_RETRIES {
            let candidate = RoomId::generate();

            let result = sqlx::query_as::<_, RoomRow>(
                "INSERT INTO rooms (id, title, privacy, owner_user_id, org_id, config)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING *",
            )
            .bind(candidate.as_str())
            .bind(&new_room.title)
            .bind(privacy_to_str(new_room.privacy))
            .bind(new_room.owner_user_id.map(|id| id.as_uuid()))
            .bind(&new_room.org_id)
            .bind(&config)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => return Ok(row.into()),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => continue,
                Err(e) => return Err(e.any()),
            }
        }

        Err(DatabaseError::IdentifierExhausted)
    }

    async fn room_by_id(&self, room_id: &RoomId) -> Result<Room> {
        sqlx::query_as::<_, RoomRow>("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("room", "id"))
    }

    async fn update_room_config(&self, update: UpdatedRoomConfig) -> Result<Room> {
        sqlx::query_as::<_, RoomRow>(
            "UPDATE rooms SET config = $1 WHERE id = $2 RETURNING *",
        )
        .bind(Json(update.config))
        .bind(update.room_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("room", "id"))
    }

    async fn touch_room_activity(&self, room_id: &RoomId) -> Result<()> {
        sqlx::query("UPDATE rooms SET last_active_at = now() WHERE id = $1")
            .bind(room_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn find_or_create_participant(&self, new: NewParticipant) -> Result<Participant> {
        let identity = Json(new.identity);

        sqlx::query_as::<_, ParticipantRow>(
            "INSERT INTO participants (id, room_id, identity, display_name, role)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(new.room_id.as_str())
        .bind(&identity)
        .bind(&new.display_name)
        .bind(role_to_str(new.role))
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn participant_by_id(&self, participant_id: ParticipantId) -> Result<Participant> {
        sqlx::query_as::<_, ParticipantRow>("SELECT * FROM participants WHERE id = $1")
            .bind(participant_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("participant", "id"))
    }

    async fn mark_participant_disconnected(&self, participant_id: ParticipantId) -> Result<()> {
        sqlx::query("UPDATE participants SET disconnected_at = now() WHERE id = $1")
            .bind(participant_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn active_round_for_room(&self, room_id: &RoomId) -> Result<Option<Round>> {
        sqlx::query_as::<_, RoundRow>(
            "SELECT * FROM rounds WHERE room_id = $1 AND revealed_at IS NULL
             ORDER BY round_number DESC LIMIT 1",
        )
        .bind(room_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map(|opt| opt.map(Into::into))
        .map_err(|e| e.any())
    }

    async fn round_by_id(&self, round_id: RoundId) -> Result<Round> {
        sqlx::query_as::<_, RoundRow>("SELECT * FROM rounds WHERE id = $1")
            .bind(round_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("round", "id"))
    }

    async fn allocate_next_round(&self, room_id: &RoomId, story_title: Option<String>) -> Result<Round> {
        for _ in 0..ROUND_NUMBER_RETRIES {
            let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

            // Locks the room row for the transaction's duration so two
            // concurrent `start_round` calls for the same room serialize
            // on the next round number instead of racing to insert it.
            sqlx::query("SELECT id FROM rooms WHERE id = $1 FOR UPDATE")
                .bind(room_id.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| e.not_found_or("room", "id"))?;

            let next_number: i32 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(round_number), 0) + 1 FROM rounds WHERE room_id = $1",
            )
            .bind(room_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.any())?;

            let result = sqlx::query_as::<_, RoundRow>(
                "INSERT INTO rounds (id, room_id, round_number, story_title)
                 VALUES ($1, $2, $3, $4)
                 RETURNING *",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(room_id.as_str())
            .bind(next_number)
            .bind(&story_title)
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok(row) => {
                    tx.commit().await.map_err(|e| e.any())?;
                    return Ok(row.into());
                }
                // The room lock above should already prevent this, but the
                // (roomId, roundNumber) unique constraint is the real
                // source of truth; retry on contention same as create_room.
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => continue,
                Err(e) => return Err(e.any()),
            }
        }

        Err(DatabaseError::IdentifierExhausted)
    }

    async fn reveal_round(
        &self,
        round_id: RoundId,
        average: Option<Decimal>,
        median: Option<String>,
        consensus_reached: bool,
    ) -> Result<Round> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        // Locks the round row so a concurrent reveal blocks here rather than
        // both passing the is_revealed check and racing the UPDATE below.
        let round: Round = sqlx::query_as::<_, RoundRow>("SELECT * FROM rounds WHERE id = $1 FOR UPDATE")
            .bind(round_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .ok_or(DatabaseError::NotFound { resource: "round", identifier: "id" })?
            .into();

        if round.is_revealed() {
            return Err(DatabaseError::InvalidTransition("round is already revealed"));
        }

        let revealed = sqlx::query_as::<_, RoundRow>(
            "UPDATE rounds SET revealed_at = now(), average = $1, median = $2, consensus_reached = $3
             WHERE id = $4 AND revealed_at IS NULL
             RETURNING *",
        )
        .bind(average)
        .bind(&median)
        .bind(consensus_reached)
        .bind(round_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| e.any())?
        .ok_or(DatabaseError::InvalidTransition("round is already revealed"))?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(revealed.into())
    }

    async fn reset_round(&self, round_id: RoundId) -> Result<Round> {
        sqlx::query("DELETE FROM votes WHERE round_id = $1")
            .bind(round_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        sqlx::query_as::<_, RoundRow>(
            "UPDATE rounds SET revealed_at = NULL, average = NULL, median = NULL, consensus_reached = NULL
             WHERE id = $1
             RETURNING *",
        )
        .bind(round_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("round", "id"))
    }

    async fn revealed_rounds_for_room(&self, room_id: &RoomId) -> Result<Vec<Round>> {
        sqlx::query_as::<_, RoundRow>(
            "SELECT * FROM rounds WHERE room_id = $1 AND revealed_at IS NOT NULL ORDER BY round_number",
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Into::into).collect())
        .map_err(|e| e.any())
    }

    async fn cast_or_update_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_value: String,
    ) -> Result<Vote> {
        sqlx::query_as::<_, VoteRow>(
            "INSERT INTO votes (id, round_id, participant_id, card_value)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (round_id, participant_id)
             DO UPDATE SET card_value = excluded.card_value, voted_at = now()
             RETURNING *",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(round_id.as_uuid())
        .bind(participant_id.as_uuid())
        .bind(&card_value)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn votes_for_round(&self, round_id: RoundId) -> Result<Vec<Vote>> {
        sqlx::query_as::<_, VoteRow>("SELECT * FROM votes WHERE round_id = $1")
            .bind(round_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(|e| e.any())
    }

    async fn upsert_session_history(&self, session: SessionHistory) -> Result<SessionHistory> {
        sqlx::query_as::<_, SessionHistoryRow>(
            "INSERT INTO session_history
                (id, room_id, started_at, ended_at, total_rounds, total_stories, participants, summary_stats)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (room_id) DO UPDATE SET
                ended_at = excluded.ended_at,
                total_rounds = excluded.total_rounds,
                total_stories = excluded.total_stories,
                participants = excluded.participants,
                summary_stats = excluded.summary_stats
             RETURNING *",
        )
        .bind(session.id.as_uuid())
        .bind(session.room_id.as_str())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.total_rounds as i32)
        .bind(session.total_stories as i32)
        .bind(Json(session.participants))
        .bind(Json(session.summary_stats))
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn session_history_for_room(&self, room_id: &RoomId) -> Result<Option<SessionHistory>> {
        sqlx::query_as::<_, SessionHistoryRow>("SELECT * FROM session_history WHERE room_id = $1")
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map(|opt| opt.map(Into::into))
            .map_err(|e| e.any())
    }

    async fn session_history_by_id(&self, session_id: poker_core::SessionId) -> Result<SessionHistory> {
        sqlx::query_as::<_, SessionHistoryRow>("SELECT * FROM session_history WHERE id = $1")
            .bind(session_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("session_history", "id"))
    }

    async fn create_export_job(&self, new_job: NewExportJob) -> Result<ExportJob> {
        sqlx::query_as::<_, ExportJobRow>(
            "INSERT INTO export_jobs (id, user_id, session_id, format)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(new_job.user_id.as_uuid())
        .bind(new_job.session_id.as_uuid())
        .bind(format_to_str(new_job.format))
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn export_job_by_id(&self, job_id: JobId) -> Result<ExportJob> {
        sqlx::query_as::<_, ExportJobRow>("SELECT * FROM export_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("export_job", "id"))
    }

    async fn set_export_job_status(
        &self,
        job_id: JobId,
        status: ExportJobStatus,
        outcome: Option<ExportJobOutcome>,
    ) -> Result<ExportJob> {
        let job = self.export_job_by_id(job_id).await?;

        if !job.status.may_advance_to(status) {
            return Err(DatabaseError::InvalidTransition(
                "export job status can only move forward",
            ));
        }

        match outcome {
            Some(ExportJobOutcome::Completed { download_url, expires_at }) => {
                sqlx::query_as::<_, ExportJobRow>(
                    "UPDATE export_jobs SET status = $1, download_url = $2, expires_at = $3, completed_at = now()
                     WHERE id = $4
                     RETURNING *",
                )
                .bind(status_to_str(status))
                .bind(download_url)
                .bind(expires_at)
                .bind(job_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map(Into::into)
                .map_err(|e| e.any())
            }
            Some(ExportJobOutcome::Failed { error_message }) => {
                sqlx::query_as::<_, ExportJobRow>(
                    "UPDATE export_jobs SET status = $1, error_message = $2, failed_at = now()
                     WHERE id = $3
                     RETURNING *",
                )
                .bind(status_to_str(status))
                .bind(error_message)
                .bind(job_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map(Into::into)
                .map_err(|e| e.any())
            }
            None => sqlx::query_as::<_, ExportJobRow>(
                "UPDATE export_jobs SET status = $1 WHERE id = $2 RETURNING *",
            )
            .bind(status_to_str(status))
            .bind(job_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.any()),
        }
    }
}
