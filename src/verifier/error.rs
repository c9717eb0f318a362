use http::StatusCode;
use uuid::Uuid;

use crate::core::token::TokenError;

use super::session::{SessionError, Status};

/// Errors returned by the [Verifier](super::Verifier) operations.
///
/// Every variant maps to the HTTP status it should be surfaced with, see
/// [VerifierError::status_code].
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// No session exists for this id.
    #[error("presentation request {0} not found")]
    NotFound(Uuid),

    /// The `state` presented in a callback does not match the session.
    #[error("state does not match presentation request {0}")]
    InvalidState(Uuid),

    /// The callback carried no token.
    #[error("callback is missing a vp_token")]
    MissingToken,

    /// The callback's token could not be decoded.
    #[error("malformed vp_token: {0}")]
    MalformedToken(#[from] TokenError),

    /// The request is not acceptable as submitted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A callback arrived for a session that is already terminal.
    #[error("presentation request {id} is already {status}")]
    DuplicateCallback { id: Uuid, status: Status },

    /// The provider failed or timed out.
    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(SessionError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VerifierError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerifierError::NotFound(_) => StatusCode::NOT_FOUND,
            VerifierError::InvalidState(_)
            | VerifierError::MissingToken
            | VerifierError::MalformedToken(_)
            | VerifierError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            VerifierError::DuplicateCallback { .. } => StatusCode::CONFLICT,
            VerifierError::Upstream(_) => StatusCode::BAD_GATEWAY,
            VerifierError::Store(_) | VerifierError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SessionError> for VerifierError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotFound(id) => VerifierError::NotFound(id),
            SessionError::AlreadyTerminal { id, status } => {
                VerifierError::DuplicateCallback { id, status }
            }
            e => VerifierError::Store(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_errors_map_to_protocol_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(
            VerifierError::from(SessionError::NotFound(id)),
            VerifierError::NotFound(i) if i == id
        ));
        assert_eq!(
            VerifierError::from(SessionError::AlreadyExists(id)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VerifierError::from(SessionError::AlreadyTerminal {
                id,
                status: Status::Completed
            })
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn client_errors_are_bad_requests() {
        assert_eq!(
            VerifierError::InvalidState(Uuid::new_v4()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VerifierError::MalformedToken(TokenError::SegmentCount(2)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VerifierError::Upstream("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
