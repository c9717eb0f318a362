use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value as Json};

const TOKEN: &str = "token";
const VP_TOKEN: &str = "vp_token";
const STATE: &str = "state";
const ERROR: &str = "error";
const ERROR_DESCRIPTION: &str = "error_description";

/// A wallet (or provider) callback, as delivered to the callback endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackPayload {
    /// The presented token. Either `token` or `vp_token` in the body.
    pub token: Option<String>,
    pub state: Option<String>,
    /// Negative outcome reported by the wallet or provider.
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// The body as received, kept on the session for debugging.
    pub raw: Json,
}

impl CallbackPayload {
    /// Parse a body according to its content type. Anything that is not form encoded is
    /// parsed as JSON.
    pub fn from_body(content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let is_form = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"));
        if is_form {
            Self::from_x_www_form_urlencoded(body)
        } else {
            Self::from_json(body)
        }
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        match serde_json::from_slice(body).context("invalid JSON in callback")? {
            Json::Object(map) => Ok(Self::from_map(map)),
            _ => bail!("callback body must be a JSON object"),
        }
    }

    pub fn from_x_www_form_urlencoded(body: &[u8]) -> Result<Self> {
        let fields: BTreeMap<String, String> =
            serde_urlencoded::from_bytes(body).context("invalid form encoded callback")?;
        let map = fields
            .into_iter()
            .map(|(k, v)| {
                // Structured vp_token values are JSON encoded inside the form field.
                let value = if k == VP_TOKEN && (v.starts_with('{') || v.starts_with('[')) {
                    serde_json::from_str(&v).unwrap_or(Json::String(v))
                } else {
                    Json::String(v)
                };
                (k, value)
            })
            .collect();
        Ok(Self::from_map(map))
    }

    fn from_map(map: Map<String, Json>) -> Self {
        let string = |key: &str| {
            map.get(key)
                .and_then(Json::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        let token = map
            .get(TOKEN)
            .or_else(|| map.get(VP_TOKEN))
            .and_then(first_token);

        let state = string(STATE);
        let error = string(ERROR);
        let error_description = string(ERROR_DESCRIPTION);

        Self {
            token,
            state,
            error,
            error_description,
            raw: Json::Object(map),
        }
    }

    /// The error reported by the callback, with its description if any.
    pub fn error_reason(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        Some(match &self.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error.to_owned(),
        })
    }
}

/// A `vp_token` is a string, or a list or object of presentations (keyed by query id).
/// The first string presentation found is used.
fn first_token(value: &Json) -> Option<String> {
    match value {
        Json::String(s) if !s.is_empty() => Some(s.clone()),
        Json::Array(items) => items.iter().find_map(first_token),
        Json::Object(map) => map.values().find_map(first_token),
        _ => None,
    }
}
