use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

pub const RESPONSE_TYPE_VP_TOKEN: &str = "vp_token";
pub const RESPONSE_MODE_DIRECT_POST: &str = "direct_post";
pub const SCOPE_OPENID: &str = "openid";
/// Credential format requested in the DCQL query.
pub const FORMAT_JWT_VC_JSON: &str = "jwt_vc_json";

/// An OpenID4VP Authorization Request passed by value in the query string, with the response
/// delivered by `direct_post` to `redirect_uri`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub response_type: String,
    pub response_mode: String,
    pub redirect_uri: Url,
    pub scope: String,
    pub state: String,
    pub nonce: String,
    /// JSON encoded DCQL query.
    pub dcql_query: String,
}

impl AuthorizationRequest {
    /// Build a `vp_token` request for the given credential types.
    pub fn direct_post(
        client_id: impl Into<String>,
        redirect_uri: Url,
        state: impl Into<String>,
        nonce: impl Into<String>,
        requested_credential_types: &[String],
    ) -> Result<Self> {
        Ok(Self {
            client_id: client_id.into(),
            response_type: RESPONSE_TYPE_VP_TOKEN.to_owned(),
            response_mode: RESPONSE_MODE_DIRECT_POST.to_owned(),
            redirect_uri,
            scope: SCOPE_OPENID.to_owned(),
            state: state.into(),
            nonce: nonce.into(),
            dcql_query: serde_json::to_string(&dcql_query(requested_credential_types))
                .context("unable to encode dcql_query")?,
        })
    }

    /// Encode as [Url], using the `authorization_endpoint` as a base.
    /// ```
    /// # use oid4vp_verifier::core::authorization_request::AuthorizationRequest;
    /// let authorization_endpoint = "openid4vp://authorize".parse().unwrap();
    /// let request = AuthorizationRequest::direct_post(
    ///     "verifier",
    ///     "https://verifier.example.com/cb/1".parse().unwrap(),
    ///     "s",
    ///     "n",
    ///     &["VerifiableId".to_string()],
    /// )
    /// .unwrap();
    ///
    /// let url = request.to_url(authorization_endpoint).unwrap();
    ///
    /// assert!(url
    ///     .as_str()
    ///     .starts_with("openid4vp://authorize?client_id=verifier&response_type=vp_token"));
    /// assert!(url.as_str().contains("response_mode=direct_post"));
    /// ```
    pub fn to_url(self, mut authorization_endpoint: Url) -> Result<Url> {
        let query = serde_urlencoded::to_string(self)?;
        authorization_endpoint.set_query(Some(&query));
        Ok(authorization_endpoint)
    }

    /// Parse from the query of a [Url].
    pub fn from_url(url: &Url) -> Result<Self> {
        serde_urlencoded::from_str(url.query().unwrap_or_default())
            .context("unable to parse authorization request from url query")
    }
}

/// One credential query per requested type, all in the `jwt_vc_json` format.
fn dcql_query(requested_credential_types: &[String]) -> serde_json::Value {
    let credentials: Vec<_> = requested_credential_types
        .iter()
        .enumerate()
        .map(|(i, credential_type)| {
            json!({
                "id": format!("credential_{i}"),
                "format": FORMAT_JWT_VC_JSON,
                "meta": {
                    "type_values": [["VerifiableCredential", credential_type]]
                }
            })
        })
        .collect();

    json!({ "credentials": credentials })
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value as Json};

    use super::*;

    #[test]
    fn url_round_trip() {
        let redirect_uri: Url = "https://verifier.example.com/presentation/callback/abc"
            .parse()
            .unwrap();
        let request = AuthorizationRequest::direct_post(
            "did:web:verifier.example.com",
            redirect_uri.clone(),
            "state-value",
            "nonce-value",
            &["VerifiableId".to_string(), "Diploma".to_string()],
        )
        .unwrap();

        let url = request
            .clone()
            .to_url("https://wallet.example.com/authorize".parse().unwrap())
            .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".into(), "state-value".into())));
        assert!(pairs.contains(&("nonce".into(), "nonce-value".into())));
        assert!(pairs.contains(&("redirect_uri".into(), redirect_uri.to_string())));

        let parsed = AuthorizationRequest::from_url(&url).unwrap();
        assert_eq!(parsed, request);

        let dcql: Json = serde_json::from_str(&parsed.dcql_query).unwrap();
        assert_eq!(
            dcql["credentials"][1],
            json!({
                "id": "credential_1",
                "format": "jwt_vc_json",
                "meta": { "type_values": [["VerifiableCredential", "Diploma"]] }
            })
        );
    }
}
