use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::token::{self, UnverifiedClaims};

/// Claim holding the presentation in a JWT VP payload.
const VP: &str = "vp";
const VERIFIABLE_CREDENTIAL: &str = "verifiableCredential";

/// A credential found inside a presentation.
///
/// Embedded credentials are decoded on a best-effort basis: a string that cannot be decoded does
/// not fail the extraction, it is kept as [CredentialRef::Opaque] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRef {
    /// A compact token credential that could be decoded (signature not verified).
    Decoded {
        raw: String,
        claims: UnverifiedClaims,
    },
    /// A JSON object credential, as found in the presentation.
    Embedded { credential: Map<String, Json> },
    /// A string credential that could not be decoded.
    Opaque { raw: String },
}

impl CredentialRef {
    /// Best-effort decoding of an embedded credential string.
    pub fn from_token(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match token::decode(&raw) {
            Ok(claims) => Self::Decoded { raw, claims },
            Err(e) => {
                debug!("keeping embedded credential as opaque: {e}");
                Self::Opaque { raw }
            }
        }
    }

    /// The decoded payload, if any.
    pub fn payload(&self) -> Option<&Map<String, Json>> {
        match self {
            Self::Decoded { claims, .. } => Some(&claims.payload),
            Self::Embedded { credential } => Some(credential),
            Self::Opaque { .. } => None,
        }
    }
}

/// Result of [extract].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub credentials: Vec<CredentialRef>,
    pub holder: Option<String>,
}

/// Recover the embedded credentials and the holder identifier from a presentation payload.
pub fn extract(payload: &Map<String, Json>) -> Extraction {
    let container = match payload.get(VP) {
        Some(Json::Object(vp)) => vp.get(VERIFIABLE_CREDENTIAL),
        Some(_) => None,
        None => payload.get(VERIFIABLE_CREDENTIAL),
    };

    let credentials = match container {
        Some(Json::Array(items)) => items.iter().filter_map(credential_ref).collect(),
        Some(item) => credential_ref(item).into_iter().collect(),
        None => vec![],
    };

    Extraction {
        credentials,
        holder: holder(payload),
    }
}

fn credential_ref(item: &Json) -> Option<CredentialRef> {
    match item {
        Json::String(raw) => Some(CredentialRef::from_token(raw.as_str())),
        Json::Object(credential) => Some(CredentialRef::Embedded {
            credential: credential.clone(),
        }),
        other => {
            debug!("skipping embedded credential that is neither a string nor an object: {other}");
            None
        }
    }
}

/// Resolve the holder: `iss`, then `sub`, then `cnf.kid`.
pub fn holder(payload: &Map<String, Json>) -> Option<String> {
    let non_empty = |value: Option<&Json>| {
        value
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    non_empty(payload.get("iss"))
        .or_else(|| non_empty(payload.get("sub")))
        .or_else(|| non_empty(payload.get("cnf").and_then(|cnf| cnf.get("kid"))))
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::core::token::encode_unsigned;

    fn object(value: Json) -> Map<String, Json> {
        match value {
            Json::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn holder_precedence() {
        let all = object(json!({
            "iss": "did:example:issuer",
            "sub": "did:example:subject",
            "cnf": { "kid": "did:example:key#0" }
        }));
        assert_eq!(holder(&all).as_deref(), Some("did:example:issuer"));

        let no_iss = object(json!({
            "sub": "did:example:subject",
            "cnf": { "kid": "did:example:key#0" }
        }));
        assert_eq!(holder(&no_iss).as_deref(), Some("did:example:subject"));

        let only_cnf = object(json!({ "cnf": { "kid": "did:example:key#0" } }));
        assert_eq!(holder(&only_cnf).as_deref(), Some("did:example:key#0"));

        assert_eq!(holder(&object(json!({ "aud": "x" }))), None);
    }

    #[test]
    fn empty_or_non_string_claims_are_skipped() {
        let payload = object(json!({ "iss": "", "sub": 42, "cnf": { "kid": "k" } }));
        assert_eq!(holder(&payload).as_deref(), Some("k"));
    }

    #[test]
    fn extracts_jwt_vp_credentials() {
        let credential = encode_unsigned(
            &json!({ "alg": "ES256" }),
            &json!({ "iss": "did:example:university", "vc": { "type": ["VerifiableId"] } }),
        );
        let payload = object(json!({
            "iss": "did:example:holder",
            "vp": {
                "verifiableCredential": [
                    credential,
                    "not-a-token",
                    { "type": ["VerifiableCredential"] },
                    17
                ]
            }
        }));

        let extraction = extract(&payload);

        assert_eq!(extraction.holder.as_deref(), Some("did:example:holder"));
        assert_eq!(extraction.credentials.len(), 3);
        assert!(matches!(
            &extraction.credentials[0],
            CredentialRef::Decoded { raw, .. } if raw == &credential
        ));
        assert_eq!(
            extraction.credentials[0]
                .payload()
                .and_then(|p| p.get("iss")),
            Some(&json!("did:example:university"))
        );
        assert_eq!(
            extraction.credentials[1],
            CredentialRef::Opaque {
                raw: "not-a-token".into()
            }
        );
        assert!(matches!(
            extraction.credentials[2],
            CredentialRef::Embedded { .. }
        ));
    }

    #[test]
    fn top_level_single_credential() {
        let payload = object(json!({
            "sub": "did:example:holder",
            "verifiableCredential": "opaque"
        }));

        let extraction = extract(&payload);

        assert_eq!(
            extraction.credentials,
            vec![CredentialRef::Opaque {
                raw: "opaque".into()
            }]
        );
        assert_eq!(extraction.holder.as_deref(), Some("did:example:holder"));
    }

    #[test]
    fn no_container() {
        let extraction = extract(&object(json!({ "vp": "unexpected" })));
        assert!(extraction.credentials.is_empty());
        assert_eq!(extraction.holder, None);
    }
}
