use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::deck::DeckType;
use crate::ids::{JobId, ParticipantId, RoomId, RoundId, SessionId, UserId, VoteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomPrivacy {
    Public,
    InviteOnly,
    OrgRestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevealBehavior {
    Manual,
    Automatic,
    OnTimer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub deck: DeckType,
    pub timer_enabled: bool,
    pub timer_seconds: Option<u32>,
    pub reveal_behavior: RevealBehavior,
    pub allow_observers: bool,
    pub allow_anonymous: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            deck: DeckType::Fibonacci,
            timer_enabled: false,
            timer_seconds: None,
            reveal_behavior: RevealBehavior::Manual,
            allow_observers: true,
            allow_anonymous: true,
        }
    }
}

/// A Planning Poker room: a container for a sequence of estimation rounds and
/// a live set of participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub privacy: RoomPrivacy,
    pub owner_user_id: Option<UserId>,
    pub org_id: Option<String>,
    pub config: RoomConfig,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_deleted(&self) -> bool {
        self.soft_deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantRole {
    Host,
    Voter,
    Observer,
}

impl ParticipantRole {
    /// Returns true if this role is allowed to cast votes.
    pub fn may_vote(&self) -> bool {
        matches!(self, ParticipantRole::Host | ParticipantRole::Voter)
    }

    /// Returns true if this role may perform host-only operations
    /// (`round.start`, `round.reveal`, `round.reset`, `room.config.update`).
    pub fn is_host(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }
}

/// An identity present in a room, either a logged-in user or an anonymous guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantIdentity {
    User(UserId),
    Anonymous(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub identity: ParticipantIdentity,
    pub display_name: String,
    pub role: ParticipantRole,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// A single story/one-shot estimation: every participant casts one card, the
/// host reveals, statistics are computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub room_id: RoomId,
    pub round_number: u32,
    pub story_title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub average: Option<Decimal>,
    pub median: Option<String>,
    pub consensus_reached: Option<bool>,
}

impl Round {
    pub fn is_revealed(&self) -> bool {
        self.revealed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub round_id: RoundId,
    pub participant_id: ParticipantId,
    pub card_value: String,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub vote_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryStats {
    pub total_votes: u32,
    pub consensus_rate: f64,
    pub average_estimation_time_seconds: f64,
    pub rounds_with_consensus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub id: SessionId,
    pub room_id: RoomId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_rounds: u32,
    pub total_stories: u32,
    pub participants: Vec<ParticipantSummary>,
    pub summary_stats: SessionSummaryStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Csv,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportJobStatus {
    /// Returns true if `self -> next` is a legal forward transition.
    pub fn may_advance_to(&self, next: ExportJobStatus) -> bool {
        use ExportJobStatus::*;

        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: JobId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub format: ExportFormat,
    pub status: ExportJobStatus,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_job_status_only_advances_forward() {
        use ExportJobStatus::*;

        assert!(Pending.may_advance_to(Processing));
        assert!(Processing.may_advance_to(Completed));
        assert!(Processing.may_advance_to(Failed));
        assert!(!Pending.may_advance_to(Completed));
        assert!(!Completed.may_advance_to(Processing));
        assert!(!Failed.may_advance_to(Processing));
    }

    #[test]
    fn participant_role_permissions() {
        assert!(ParticipantRole::Host.is_host());
        assert!(ParticipantRole::Host.may_vote());
        assert!(ParticipantRole::Voter.may_vote());
        assert!(!ParticipantRole::Voter.is_host());
        assert!(!ParticipantRole::Observer.may_vote());
    }
}
