use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use oid4vp_verifier_frontend::{CallbackAck, CreateRequest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::{BaseUrl, Config, DuplicateCallbackPolicy, RequestMode, DEFAULT_PROVIDER_TIMEOUT},
    core::{correlation, credential, token},
};

use error::VerifierError;
use provider::Provider;
use request_builder::{PresentationRequest, RequestBuilder};
use response::CallbackPayload;
use session::{MemoryStore, Session, SessionError, SessionStore, SessionView, Status, Transition};

pub mod error;
pub mod provider;
pub mod request_builder;
pub mod response;
pub mod session;

/// An OpenID4VP verifier, also known as the client.
///
/// The verifier issues presentation requests, correlates the wallet's callback with the request
/// it answers, and records the outcome. Tokens are decoded but never cryptographically verified.
#[derive(Debug, Clone)]
pub struct Verifier {
    client_id: String,
    callback_base: BaseUrl,
    request_mode: RequestMode,
    provider: Option<Arc<dyn Provider + Send + Sync>>,
    provider_timeout: Duration,
    duplicate_callback_policy: DuplicateCallbackPolicy,
    session_store: Arc<dyn SessionStore + Send + Sync>,
}

impl Verifier {
    /// Build a new verifier.
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    /// Begin building a new presentation request.
    pub fn build_presentation_request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self)
    }

    /// Create a presentation request from a frontend request body.
    pub async fn create(
        &self,
        request: CreateRequest,
    ) -> Result<PresentationRequest, VerifierError> {
        request
            .requested_credential_types
            .into_iter()
            .fold(
                self.build_presentation_request().with_purpose(request.purpose),
                |builder, credential_type| builder.with_requested_credential_type(credential_type),
            )
            .build()
            .await
    }

    /// Record the wallet's answer to a presentation request.
    ///
    /// This should be triggered by a request from the wallet (or the provider) to
    /// `<callback_base>/<id>`.
    ///
    /// A callback whose `state` does not match the session is rejected with
    /// [VerifierError::InvalidState] and leaves the session untouched. Otherwise the session moves
    /// to a terminal status exactly once:
    /// - an `error` reported by the wallet moves it to [Status::Error];
    /// - a missing or malformed token moves it to [Status::Failed], and the matching error is
    ///   returned;
    /// - a readable token moves it to [Status::Completed].
    ///
    /// Callbacks for a session that is already terminal are handled according to the
    /// [DuplicateCallbackPolicy].
    pub async fn handle_callback(
        &self,
        id: Uuid,
        payload: CallbackPayload,
    ) -> Result<CallbackAck, VerifierError> {
        let session = self.session_store.get_session(id).await?;

        let state_matches = payload
            .state
            .as_deref()
            .is_some_and(|presented| correlation::validate(&session.state, presented));
        if !state_matches {
            warn!("rejecting callback for {id}: state does not match");
            return Err(VerifierError::InvalidState(id));
        }

        let (transition, rejection) = callback_transition(&payload);
        let target = transition.target();
        let raw_callback = payload.raw;

        let mutator: session::Mutator = match self.duplicate_callback_policy {
            DuplicateCallbackPolicy::Overwrite => Box::new(move |s: &mut Session| {
                s.overwrite(transition);
                s.raw_callback = Some(raw_callback);
                Ok(())
            }),
            DuplicateCallbackPolicy::Ignore | DuplicateCallbackPolicy::Reject => {
                Box::new(move |s: &mut Session| {
                    s.transition(transition)?;
                    s.raw_callback = Some(raw_callback);
                    Ok(())
                })
            }
        };

        match self.session_store.update_session(id, mutator).await {
            Ok(session) => {
                info!("presentation request {id} is now {}", session.status);
                match rejection {
                    Some(rejection) => Err(rejection),
                    None => Ok(CallbackAck::new(session.status)),
                }
            }
            Err(SessionError::AlreadyTerminal { status, .. }) => {
                match self.duplicate_callback_policy {
                    DuplicateCallbackPolicy::Reject => {
                        warn!(
                            "rejecting duplicate callback for {id} ({status}, received {target})"
                        );
                        Err(VerifierError::DuplicateCallback { id, status })
                    }
                    _ => {
                        info!("ignoring duplicate callback for {id} ({status}, received {target})");
                        Ok(CallbackAck::new(status))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retrieve the current status of a presentation request.
    ///
    /// This should be triggered by a request from the application frontend. When the request was
    /// brokered by a provider and is still pending, the provider is asked for its status first; a
    /// provider that fails or does not answer in time moves the session to [Status::Error].
    pub async fn status(&self, id: Uuid) -> Result<SessionView, VerifierError> {
        let session = self.session_store.get_session(id).await?;

        let Some(provider_session_id) = session
            .provider_session_id
            .as_deref()
            .filter(|_| session.status == Status::Pending)
        else {
            return Ok(session.view());
        };

        let provider = self.provider()?;
        let transition = match self
            .bounded(provider.get_verification_status(provider_session_id))
            .await
        {
            Ok(status) => status.into_transition(),
            Err(reason) => {
                warn!("provider status check failed for {id}: {reason}");
                Some(Transition::Error { reason })
            }
        };

        let Some(transition) = transition else {
            return Ok(session.view());
        };

        match self
            .session_store
            .update_session(id, Box::new(move |s: &mut Session| s.transition(transition)))
            .await
        {
            Ok(session) => {
                info!("presentation request {id} is now {} (provider)", session.status);
                Ok(session.view())
            }
            // A callback settled the session while the provider was being polled.
            Err(SessionError::AlreadyTerminal { .. }) => {
                Ok(self.session_store.get_session(id).await?.view())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The full session record, including the raw token and callback body.
    pub async fn session(&self, id: Uuid) -> Result<Session, VerifierError> {
        Ok(self.session_store.get_session(id).await?)
    }

    fn provider(&self) -> Result<&Arc<dyn Provider + Send + Sync>, VerifierError> {
        self.provider
            .as_ref()
            .ok_or_else(|| VerifierError::Internal(anyhow!("no provider is configured")))
    }

    /// Run a provider call under the configured timeout.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T, String> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(t)) => Ok(t),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "provider did not respond within {}s",
                self.provider_timeout.as_secs()
            )),
        }
    }
}

/// The transition a callback calls for, and the error to report to its sender if the callback
/// is being rejected.
fn callback_transition(payload: &CallbackPayload) -> (Transition, Option<VerifierError>) {
    if let Some(reason) = payload.error_reason() {
        return (Transition::Error { reason }, None);
    }

    let Some(raw_token) = payload.token.clone() else {
        let rejection = VerifierError::MissingToken;
        return (
            Transition::Fail {
                reason: rejection.to_string(),
                raw_token: None,
            },
            Some(rejection),
        );
    };

    match token::decode(&raw_token) {
        Ok(claims) => {
            let extraction = credential::extract(&claims.payload);
            (
                Transition::Complete {
                    raw_token: Some(raw_token),
                    claims: Some(claims),
                    credentials: extraction.credentials,
                    holder: extraction.holder,
                },
                None,
            )
        }
        Err(e) => {
            let rejection = VerifierError::MalformedToken(e);
            (
                Transition::Fail {
                    reason: rejection.to_string(),
                    raw_token: Some(raw_token),
                },
                Some(rejection),
            )
        }
    }
}

/// Builder struct for [Verifier].
#[derive(Debug, Clone, Default)]
pub struct VerifierBuilder {
    client_id: Option<String>,
    callback_base: Option<BaseUrl>,
    request_mode: RequestMode,
    provider: Option<Arc<dyn Provider + Send + Sync>>,
    provider_timeout: Option<Duration>,
    duplicate_callback_policy: DuplicateCallbackPolicy,
    session_store: Option<Arc<dyn SessionStore + Send + Sync>>,
}

impl VerifierBuilder {
    /// Build the verifier.
    pub fn build(self) -> Result<Verifier> {
        let Self {
            client_id,
            callback_base,
            request_mode,
            provider,
            provider_timeout,
            duplicate_callback_policy,
            session_store,
        } = self;

        let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
            bail!("client id is required, see `with_client_id`")
        };

        let Some(callback_base) = callback_base else {
            bail!("callback base url is required, see `with_callback_base`")
        };

        if request_mode == RequestMode::Provider && provider.is_none() {
            bail!("provider request mode requires a provider, see `with_provider`")
        }

        Ok(Verifier {
            client_id,
            callback_base,
            request_mode,
            provider,
            provider_timeout: provider_timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT),
            duplicate_callback_policy,
            session_store: session_store.unwrap_or_else(|| Arc::new(MemoryStore::default())),
        })
    }

    /// Take every setting from a [Config]. The provider and the session store still have to be
    /// set separately.
    pub fn from_config(self, config: Config) -> Self {
        let provider_timeout = config.provider_timeout();
        Self {
            client_id: Some(config.client_id),
            callback_base: Some(config.callback_base),
            request_mode: config.request_mode,
            provider_timeout: Some(provider_timeout),
            duplicate_callback_policy: config.duplicate_callback_policy,
            ..self
        }
    }

    /// Set the identifier the [Verifier] presents to the wallet.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the base [Url](url::Url) of the callback endpoint. The wallet will submit its
    /// response to `<callback_base>/<id>`.
    pub fn with_callback_base(mut self, callback_base: BaseUrl) -> Self {
        self.callback_base = Some(callback_base);
        self
    }

    pub fn with_request_mode(mut self, request_mode: RequestMode) -> Self {
        self.request_mode = request_mode;
        self
    }

    /// Set the [Provider] that brokers requests in [RequestMode::Provider].
    pub fn with_provider(mut self, provider: Arc<dyn Provider + Send + Sync>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn with_duplicate_callback_policy(mut self, policy: DuplicateCallbackPolicy) -> Self {
        self.duplicate_callback_policy = policy;
        self
    }

    /// Set the [SessionStore] that the [Verifier] will use to maintain session state across
    /// transactions. Defaults to a [MemoryStore].
    pub fn with_session_store(
        mut self,
        session_store: Arc<dyn SessionStore + Send + Sync>,
    ) -> Self {
        self.session_store = Some(session_store);
        self
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::core::token::encode_unsigned;

    fn payload(body: serde_json::Value) -> CallbackPayload {
        CallbackPayload::from_json(&serde_json::to_vec(&body).unwrap()).unwrap()
    }

    #[test]
    fn builder_requires_client_id_and_callback_base() {
        assert!(Verifier::builder().build().is_err());
        assert!(Verifier::builder()
            .with_client_id("verifier")
            .build()
            .is_err());
        assert!(Verifier::builder()
            .with_client_id("verifier")
            .with_callback_base("https://verifier.example.com/cb".parse().unwrap())
            .build()
            .is_ok());
    }

    #[test]
    fn provider_mode_requires_provider() {
        let err = Verifier::builder()
            .with_client_id("verifier")
            .with_callback_base("https://verifier.example.com/cb".parse().unwrap())
            .with_request_mode(RequestMode::Provider)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("with_provider"), "{err}");
    }

    #[test]
    fn wallet_error_wins_over_token() {
        let (transition, rejection) = callback_transition(&payload(json!({
            "state": "s",
            "vp_token": "a.b.c",
            "error": "access_denied"
        })));
        assert_eq!(transition.target(), Status::Error);
        assert!(rejection.is_none());
    }

    #[test]
    fn missing_and_malformed_tokens_fail() {
        let (transition, rejection) = callback_transition(&payload(json!({"state": "s"})));
        assert_eq!(transition.target(), Status::Failed);
        assert!(matches!(rejection, Some(VerifierError::MissingToken)));

        let (transition, rejection) =
            callback_transition(&payload(json!({"state": "s", "token": "only.two"})));
        let Transition::Fail { reason, raw_token } = transition else {
            panic!("expected a failure");
        };
        assert!(reason.contains("3 dot-separated segments"), "{reason}");
        assert_eq!(raw_token.as_deref(), Some("only.two"));
        assert!(matches!(rejection, Some(VerifierError::MalformedToken(_))));
    }

    #[test]
    fn readable_token_completes() {
        let token = encode_unsigned(
            &json!({"alg": "ES256"}),
            &json!({"iss": "did:example:123", "vp": {"verifiableCredential": ["opaque"]}}),
        );
        let (transition, rejection) =
            callback_transition(&payload(json!({"state": "s", "token": token})));
        assert!(rejection.is_none());
        let Transition::Complete {
            holder,
            credentials,
            ..
        } = transition
        else {
            panic!("expected a completion");
        };
        assert_eq!(holder.as_deref(), Some("did:example:123"));
        assert_eq!(credentials.len(), 1);
    }
}
