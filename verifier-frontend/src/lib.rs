//! OID4VP verifier data structures that are needed on the frontend, without all of the other
//! dependencies that can cause compilation issues with web targets.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Status of a presentation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The request has been issued, waiting on the wallet to respond.
    Pending,
    /// The wallet responded with a presentation that could be read.
    Completed,
    /// The response could not be accepted (missing or malformed token).
    Failed,
    /// The wallet or the provider reported an error.
    Error,
}

impl Status {
    /// Whether the session can no longer change status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Body of a request to create a new presentation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub purpose: String,
    pub requested_credential_types: Vec<String>,
}

/// Response to a [CreateRequest].
///
/// The frontend renders `authorization_url` (usually as a QR code) and polls the status
/// resource with `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub request_id: String,
    pub authorization_url: String,
    pub state: String,
    pub nonce: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Acknowledgment returned to whoever delivered the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    /// `true` when the session is completed.
    pub ok: bool,
    pub status: Status,
}

impl CallbackAck {
    pub fn new(status: Status) -> Self {
        Self {
            ok: status == Status::Completed,
            status,
        }
    }
}

/// Current view of a presentation session, as returned by the status resource.
///
/// Note: `holder` and `claims` are read from the presented token without verifying its
/// signature. They are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub request_id: String,
    pub status: Status,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub has_vp_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Json>,
}
