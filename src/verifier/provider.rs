//! Third-party verification services that broker presentation requests with wallets.
//!
//! Responses from a provider are untrusted. The verifier bounds every call with a timeout and
//! maps failures to the `error` status.
use std::fmt::Debug;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::BaseUrl,
    core::{
        credential::{self, CredentialRef},
        util::{base_request, AsyncHttpClient, ReqwestClient},
    },
};

use super::session::Transition;

const VERIFICATION_REQUESTS: &str = "verification-requests";

/// What the verifier asks a provider to request from the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationTemplate {
    pub purpose: String,
    pub requested_credential_types: Vec<String>,
}

/// A request created by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub authorization_url: Url,
    #[serde(alias = "session_id", alias = "id")]
    pub provider_session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    #[serde(alias = "request_created", alias = "request_retrieved")]
    Pending,
    #[serde(alias = "presentation_verified")]
    Completed,
    Failed,
    Error,
}

/// Out-of-band status of a request, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub status: ProviderState,
    /// Presented credentials, as compact tokens.
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProviderStatus {
    /// The transition this status calls for, or `None` while the provider is still waiting.
    pub fn into_transition(self) -> Option<Transition> {
        match self.status {
            ProviderState::Pending => None,
            ProviderState::Completed => {
                let credentials: Vec<CredentialRef> = self
                    .credentials
                    .iter()
                    .map(|raw| CredentialRef::from_token(raw.as_str()))
                    .collect();
                let claims = credentials.iter().find_map(|c| match c {
                    CredentialRef::Decoded { claims, .. } => Some(claims.clone()),
                    _ => None,
                });
                let holder = claims
                    .as_ref()
                    .and_then(|claims| credential::holder(&claims.payload));
                Some(Transition::Complete {
                    raw_token: self.credentials.into_iter().next(),
                    claims,
                    credentials,
                    holder,
                })
            }
            ProviderState::Failed => Some(Transition::Fail {
                reason: self
                    .error
                    .unwrap_or_else(|| "provider reported a failed presentation".into()),
                raw_token: None,
            }),
            ProviderState::Error => Some(Transition::Error {
                reason: self
                    .error
                    .unwrap_or_else(|| "provider reported an error".into()),
            }),
        }
    }
}

#[async_trait]
pub trait Provider: Debug {
    /// Create a presentation request with the provider.
    async fn create_verification_request(
        &self,
        template: &PresentationTemplate,
        redirect_uri: &Url,
        state: &str,
    ) -> Result<ProviderRequest>;

    /// Ask the provider how a request it created is progressing.
    async fn get_verification_status(&self, provider_session_id: &str) -> Result<ProviderStatus>;
}

#[derive(Debug, Serialize)]
struct CreateVerificationRequest<'a> {
    definition: &'a PresentationTemplate,
    redirect_uri: &'a Url,
    state: &'a str,
}

/// A [Provider] reached over a JSON REST API:
///
/// - `POST <base>/verification-requests` creates a request;
/// - `GET <base>/verification-requests/<id>` reports its status.
#[derive(Debug, Clone)]
pub struct HttpProvider<C = ReqwestClient> {
    base: BaseUrl,
    bearer_token: Option<String>,
    http_client: C,
}

impl<C> HttpProvider<C> {
    pub fn new(base: BaseUrl, http_client: C) -> Self {
        Self {
            base,
            bearer_token: None,
            http_client,
        }
    }

    /// Authenticate every call with the given bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn request(&self) -> http::request::Builder {
        let builder = base_request();
        match &self.bearer_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }
}

impl<C: AsyncHttpClient + Send + Sync> HttpProvider<C> {
    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<T> {
        let uri = request.uri().clone();
        let response = self
            .http_client
            .execute(request)
            .await
            .context(format!("provider request to {uri} failed"))?;

        let status = response.status();
        let Ok(body) = String::from_utf8(response.into_body()) else {
            bail!("failed to parse provider response as UTF-8 (status: {status})")
        };

        if !status.is_success() {
            bail!("provider request was unsuccessful (status: {status}): {body}")
        }

        serde_json::from_str(&body).context("unable to parse provider response")
    }
}

#[async_trait]
impl<C: AsyncHttpClient + Debug + Send + Sync> Provider for HttpProvider<C> {
    async fn create_verification_request(
        &self,
        template: &PresentationTemplate,
        redirect_uri: &Url,
        state: &str,
    ) -> Result<ProviderRequest> {
        let body = serde_json::to_vec(&CreateVerificationRequest {
            definition: template,
            redirect_uri,
            state,
        })?;

        let request = self
            .request()
            .method("POST")
            .uri(self.base.with_segment(VERIFICATION_REQUESTS)?.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .context("failed to build provider request")?;

        self.execute(request).await
    }

    async fn get_verification_status(&self, provider_session_id: &str) -> Result<ProviderStatus> {
        let mut uri = self.base.with_segment(VERIFICATION_REQUESTS)?;
        {
            let Ok(mut path) = uri.path_segments_mut() else {
                bail!("invalid base URL for the provider")
            };
            path.push(provider_session_id);
        }

        let request = self
            .request()
            .method("GET")
            .uri(uri.as_str())
            .body(vec![])
            .context("failed to build provider status request")?;

        self.execute(request).await
    }
}
