use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use poker_collab::db::DatabaseError;
use poker_collab::RoomError;
use poker_core::VotingError;
use serde::Serialize;
use thiserror::Error;

/// Numeric wire codes from spec §7.
pub mod code {
    pub const BAD_REQUEST: u32 = 4000;
    pub const UNAUTHENTICATED: u32 = 4001;
    pub const FORBIDDEN: u32 = 4003;
    pub const NOT_FOUND: u32 = 4004;
    /// Not part of the wire taxonomy's numeric table in spec §6.1, but named
    /// explicitly by §5's domain-operation-timeout behavior.
    pub const TIMEOUT: u32 = 4008;
    pub const CONFLICT: u32 = 4009;
    pub const RATE_LIMITED: u32 = 4029;
    pub const INTERNAL: u32 = 5000;
}

/// Websocket close codes for the gateway's own boundary events (§4.5, §5).
/// Outside the IANA-registered range, as the private-use range permits.
pub mod close_code {
    pub const JOIN_TIMEOUT: u16 = 4400;
    pub const HEARTBEAT_TIMEOUT: u16 = 4401;
    pub const SLOW_CONSUMER: u16 = 4402;
    pub const UNAUTHENTICATED: u16 = 4403;
}

/// Maps a domain-level [RoomError] to the wire error taxonomy (§7): a
/// numeric code and its textual symbol, suitable for an `error.v1` frame.
pub fn room_error_to_wire(error: &RoomError) -> (u32, &'static str) {
    match error {
        RoomError::RoomNotFound(_) => (code::NOT_FOUND, "NOT_FOUND"),
        RoomError::RoomDeleted(_) => (code::NOT_FOUND, "NOT_FOUND"),
        RoomError::Voting(voting_error) => voting_error_to_wire(voting_error),
        RoomError::Database(db_error) => database_error_to_wire(db_error),
        RoomError::Bus(_) => (code::INTERNAL, "INTERNAL"),
    }
}

pub fn voting_error_to_wire(error: &VotingError) -> (u32, &'static str) {
    match error {
        VotingError::RoundNotActive => (code::CONFLICT, "CONFLICT"),
        VotingError::AlreadyRevealed => (code::CONFLICT, "CONFLICT"),
        VotingError::CardNotInDeck => (code::BAD_REQUEST, "BAD_REQUEST"),
        VotingError::CardValueTooLong => (code::BAD_REQUEST, "BAD_REQUEST"),
        VotingError::RoleForbidden => (code::FORBIDDEN, "FORBIDDEN"),
    }
}

pub fn database_error_to_wire(error: &DatabaseError) -> (u32, &'static str) {
    match error {
        DatabaseError::NotFound { .. } => (code::NOT_FOUND, "NOT_FOUND"),
        DatabaseError::Conflict { .. } => (code::CONFLICT, "CONFLICT"),
        DatabaseError::InvalidTransition(_) => (code::CONFLICT, "CONFLICT"),
        DatabaseError::IdentifierExhausted => (code::INTERNAL, "INTERNAL"),
        DatabaseError::Internal(_) => (code::INTERNAL, "INTERNAL"),
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// REST-facing error type, analogous to `room_error_to_wire` but producing
/// an HTTP response rather than an `error.v1` frame.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("{resource}:{identifier} not found")]
    NotFound { resource: &'static str, identifier: &'static str },
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Bus(#[from] poker_core::BusError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Database(DatabaseError::Conflict { .. }) => StatusCode::CONFLICT,
            ServerError::Database(DatabaseError::InvalidTransition(_)) => StatusCode::CONFLICT,
            ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, axum::Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_forbidden_maps_to_forbidden() {
        let (c, symbol) = voting_error_to_wire(&VotingError::RoleForbidden);
        assert_eq!(c, code::FORBIDDEN);
        assert_eq!(symbol, "FORBIDDEN");
    }

    #[test]
    fn already_revealed_maps_to_conflict() {
        let (c, symbol) = voting_error_to_wire(&VotingError::AlreadyRevealed);
        assert_eq!(c, code::CONFLICT);
        assert_eq!(symbol, "CONFLICT");
    }
}
