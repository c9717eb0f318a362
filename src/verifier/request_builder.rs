use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use oid4vp_verifier_frontend::CreateResponse;

use crate::{
    config::RequestMode,
    core::{
        authorization_request::AuthorizationRequest,
        correlation::{self, Correlation},
    },
    utils::NonEmptyVec,
};

use super::{
    error::VerifierError,
    provider::PresentationTemplate,
    session::{Session, SessionError, Transition},
    Verifier,
};

/// A presentation request that has been stored and can be handed to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationRequest {
    /// Used by the application frontend to poll for the status of this request.
    pub id: Uuid,
    /// Drives the user to their wallet application.
    pub authorization_url: Url,
    pub state: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

impl From<PresentationRequest> for CreateResponse {
    fn from(request: PresentationRequest) -> Self {
        CreateResponse {
            request_id: request.id.to_string(),
            authorization_url: request.authorization_url.into(),
            state: request.state,
            nonce: request.nonce,
            created_at: request
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone)]
#[must_use]
pub struct RequestBuilder<'a> {
    purpose: String,
    requested_credential_types: Option<NonEmptyVec<String>>,
    verifier: &'a Verifier,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(verifier: &'a Verifier) -> Self {
        Self {
            purpose: String::new(),
            requested_credential_types: None,
            verifier,
        }
    }

    /// Set the purpose shown to the user.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Set the credential types the wallet is asked to present.
    pub fn with_requested_credential_types(mut self, types: NonEmptyVec<String>) -> Self {
        self.requested_credential_types = Some(types);
        self
    }

    /// Add a single credential type to the request.
    pub fn with_requested_credential_type(mut self, credential_type: impl Into<String>) -> Self {
        let credential_type = credential_type.into();
        self.requested_credential_types = Some(match self.requested_credential_types {
            Some(types) => types.push(credential_type),
            None => NonEmptyVec::new(credential_type),
        });
        self
    }

    /// Build the request and store a pending session for it.
    ///
    /// When the verifier is configured with [RequestMode::Provider], the provider is asked to
    /// create the request. If it fails the session is still stored, with the `error` status,
    /// and [VerifierError::Upstream] is returned.
    pub async fn build(self) -> Result<PresentationRequest, VerifierError> {
        let Some(requested_credential_types) = self.requested_credential_types else {
            return Err(VerifierError::InvalidRequest(
                "at least one requested credential type is required".into(),
            ));
        };
        if requested_credential_types.iter().any(|t| t.trim().is_empty()) {
            return Err(VerifierError::InvalidRequest(
                "requested credential types cannot be blank".into(),
            ));
        }

        let verifier = self.verifier;
        let id = Uuid::new_v4();
        let Correlation { state, nonce } = correlation::issue();
        let redirect_uri = verifier.callback_base.with_segment(&id.to_string())?;

        let session = Session::new(
            id,
            state.clone(),
            nonce.clone(),
            self.purpose,
            requested_credential_types.into_inner(),
        );
        let created_at = session.created_at;
        let template = PresentationTemplate {
            purpose: session.purpose.clone(),
            requested_credential_types: session.requested_credential_types.clone(),
        };

        let authorization_url = match &verifier.request_mode {
            RequestMode::Direct {
                authorization_endpoint,
            } => {
                let url = AuthorizationRequest::direct_post(
                    verifier.client_id.as_str(),
                    redirect_uri,
                    state.as_str(),
                    nonce.as_str(),
                    &template.requested_credential_types,
                )?
                .to_url(authorization_endpoint.clone())?;

                verifier.session_store.initiate(session).await?;
                url
            }
            RequestMode::Provider => {
                verifier.session_store.initiate(session).await?;
                verifier
                    .create_with_provider(id, &template, &redirect_uri, &state)
                    .await?
            }
        };

        info!("created presentation request {id} ({})", verifier.request_mode);

        Ok(PresentationRequest {
            id,
            authorization_url,
            state,
            nonce,
            created_at,
        })
    }
}

impl Verifier {
    async fn create_with_provider(
        &self,
        id: Uuid,
        template: &PresentationTemplate,
        redirect_uri: &Url,
        state: &str,
    ) -> Result<Url, VerifierError> {
        let provider = self.provider()?;

        let created = match self
            .bounded(provider.create_verification_request(template, redirect_uri, state))
            .await
        {
            Ok(created) => created,
            Err(reason) => {
                warn!("provider could not create presentation request {id}: {reason}");
                let transition = Transition::Error {
                    reason: reason.clone(),
                };
                match self
                    .session_store
                    .update_session(id, Box::new(move |s: &mut Session| s.transition(transition)))
                    .await
                {
                    // A callback already settled the session.
                    Ok(_) | Err(SessionError::AlreadyTerminal { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                return Err(VerifierError::Upstream(reason));
            }
        };

        let provider_session_id = created.provider_session_id;
        self.session_store
            .update_session(
                id,
                Box::new(move |s: &mut Session| {
                    s.provider_session_id = Some(provider_session_id);
                    Ok(())
                }),
            )
            .await?;

        Ok(created.authorization_url)
    }
}
