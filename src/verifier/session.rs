use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::{credential::CredentialRef, token::UnverifiedClaims};

pub use oid4vp_verifier_frontend::{SessionView, Status};

/// A single presentation request and its outcome.
///
/// `id`, `state` and `nonce` are fixed at creation. Everything else is written by
/// [Session::transition] (or [Session::overwrite]) exactly once the wallet has answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub state: String,
    pub nonce: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub purpose: String,
    pub requested_credential_types: Vec<String>,
    /// Set when the request was brokered by a provider.
    pub provider_session_id: Option<String>,
    pub holder: Option<String>,
    pub raw_token: Option<String>,
    pub claims: Option<UnverifiedClaims>,
    pub credentials: Vec<CredentialRef>,
    pub error: Option<String>,
    /// The last callback body that was accepted for this session.
    pub raw_callback: Option<Json>,
}

/// A move out of [Status::Pending].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The wallet presented a token that could be read.
    Complete {
        raw_token: Option<String>,
        claims: Option<UnverifiedClaims>,
        credentials: Vec<CredentialRef>,
        holder: Option<String>,
    },
    /// The response could not be accepted.
    Fail {
        reason: String,
        raw_token: Option<String>,
    },
    /// The wallet or the provider reported an error.
    Error { reason: String },
}

impl Transition {
    pub fn target(&self) -> Status {
        match self {
            Transition::Complete { .. } => Status::Completed,
            Transition::Fail { .. } => Status::Failed,
            Transition::Error { .. } => Status::Error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session {0} already exists")]
    AlreadyExists(Uuid),

    #[error("session {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: Status },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl Session {
    pub fn new(
        id: Uuid,
        state: String,
        nonce: String,
        purpose: String,
        requested_credential_types: Vec<String>,
    ) -> Self {
        Self {
            id,
            state,
            nonce,
            status: Status::Pending,
            created_at: Utc::now(),
            completed_at: None,
            purpose,
            requested_credential_types,
            provider_session_id: None,
            holder: None,
            raw_token: None,
            claims: None,
            credentials: vec![],
            error: None,
            raw_callback: None,
        }
    }

    /// Move the session out of [Status::Pending].
    ///
    /// Fails with [SessionError::AlreadyTerminal] if the session has already been completed,
    /// failed or errored.
    pub fn transition(&mut self, transition: Transition) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        self.completed_at = Some(Utc::now());
        self.record(transition);
        Ok(())
    }

    /// Replace the outcome of a session, whatever its status.
    ///
    /// `completed_at` keeps the time of the first terminal transition.
    pub fn overwrite(&mut self, transition: Transition) {
        self.completed_at.get_or_insert_with(Utc::now);
        self.record(transition);
    }

    fn record(&mut self, transition: Transition) {
        self.status = transition.target();
        match transition {
            Transition::Complete {
                raw_token,
                claims,
                credentials,
                holder,
            } => {
                self.raw_token = raw_token;
                self.claims = claims;
                self.credentials = credentials;
                self.holder = holder;
                self.error = None;
            }
            Transition::Fail { reason, raw_token } => {
                self.raw_token = raw_token;
                self.claims = None;
                self.credentials = vec![];
                self.holder = None;
                self.error = Some(reason);
            }
            Transition::Error { reason } => {
                self.claims = None;
                self.credentials = vec![];
                self.holder = None;
                self.error = Some(reason);
            }
        }
    }

    /// The view of this session returned to the application frontend.
    pub fn view(&self) -> SessionView {
        SessionView {
            request_id: self.id.to_string(),
            status: self.status,
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            completed_at: self
                .completed_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            holder: self.holder.clone(),
            error: self.error.clone(),
            has_vp_token: self.raw_token.is_some(),
            claims: self.claims.as_ref().map(|claims| {
                json!({
                    "header": claims.header,
                    "payload": claims.payload,
                })
            }),
        }
    }
}

/// A read-modify-write step applied by [SessionStore::update_session].
///
/// Returning an error discards every change the mutator made.
pub type Mutator = Box<dyn FnOnce(&mut Session) -> Result<(), SessionError> + Send>;

/// Storage interface for session information.
///
/// Implementations must apply [SessionStore::update_session] atomically with respect to every
/// other call for the same session id. Calls for different ids should not contend.
#[async_trait]
pub trait SessionStore: Debug {
    /// Store a new presentation session.
    async fn initiate(&self, session: Session) -> Result<(), SessionError>;

    /// Get a session from the store.
    async fn get_session(&self, id: Uuid) -> Result<Session, SessionError>;

    /// Apply `mutator` to a session and persist the result if it succeeds.
    ///
    /// ## Returns
    /// The session as stored after the update.
    async fn update_session(&self, id: Uuid, mutator: Mutator) -> Result<Session, SessionError>;

    /// Remove a session from the store.
    ///
    /// Not called by the verifier itself: this is the hook for expiring sessions.
    async fn remove_session(&self, id: Uuid) -> Result<(), SessionError>;
}

/// A local in-memory store.
///
/// Sessions live as long as the process. This store will not work for a distributed
/// deployment; implement [SessionStore] over shared storage for that.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl MemoryStore {
    async fn entry(&self, id: Uuid) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.store
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Evict every session created more than `ttl` ago.
    ///
    /// Sessions that are being read or updated are skipped and will be considered on the next
    /// call.
    ///
    /// ## Returns
    /// The number of evicted sessions.
    pub async fn purge_expired(&self, ttl: TimeDelta) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, session| {
            // Any other handle was taken by `entry` for an operation that has yet to finish.
            if Arc::strong_count(session) > 1 {
                return true;
            }
            match session.try_lock() {
                Ok(session) => session.created_at > cutoff,
                Err(_) => true,
            }
        });
        before - store.len()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn initiate(&self, session: Session) -> Result<(), SessionError> {
        let mut store = self.store.write().await;
        if store.contains_key(&session.id) {
            return Err(SessionError::AlreadyExists(session.id));
        }
        store.insert(session.id, Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, SessionError> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    async fn update_session(&self, id: Uuid, mutator: Mutator) -> Result<Session, SessionError> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        let mut updated = session.clone();
        mutator(&mut updated)?;
        *session = updated;

        Ok(session.clone())
    }

    async fn remove_session(&self, id: Uuid) -> Result<(), SessionError> {
        if self.store.write().await.remove(&id).is_some() {
            return Ok(());
        }
        Err(SessionError::NotFound(id))
    }
}
