//! Compact token decoding, without signature verification.
//!
//! Everything returned from this module is **unverified**: the signature segment is never
//! checked, so the header and payload are advisory data only and must not be used to make
//! security decisions.
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Header and payload of a compact token, read without verifying its signature.
///
/// There is deliberately no conversion from this type into anything that could be mistaken for
/// verified claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiedClaims {
    pub header: Map<String, Json>,
    pub payload: Map<String, Json>,
    /// The raw, undecoded signature segment.
    #[serde(skip)]
    signature: String,
}

impl UnverifiedClaims {
    /// Get a payload claim by name.
    pub fn claim(&self, name: &str) -> Option<&Json> {
        self.payload.get(name)
    }

    /// The `alg` header parameter, if present.
    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Json::as_str)
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Which segment of the token failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Header,
    Payload,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Header => "header",
            Segment::Payload => "payload",
        }
        .fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("{segment} is not valid base64url: {source}")]
    Base64 {
        segment: Segment,
        #[source]
        source: base64::DecodeError,
    },

    #[error("{segment} is not valid JSON: {source}")]
    Json {
        segment: Segment,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is not a JSON object")]
    NotAnObject(Segment),
}

/// Decode a compact (`header.payload.signature`) token into its header and payload.
///
/// No signature check is performed.
pub fn decode(token: &str) -> Result<UnverifiedClaims, TokenError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(TokenError::SegmentCount(segments.len()));
    };

    Ok(UnverifiedClaims {
        header: decode_segment(header, Segment::Header)?,
        payload: decode_segment(payload, Segment::Payload)?,
        signature: signature.to_string(),
    })
}

fn decode_segment(segment: &str, which: Segment) -> Result<Map<String, Json>, TokenError> {
    let bytes = decode_base64url(segment).map_err(|source| TokenError::Base64 {
        segment: which,
        source,
    })?;

    match serde_json::from_slice(&bytes) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(_) => Err(TokenError::NotAnObject(which)),
        Err(source) => Err(TokenError::Json {
            segment: which,
            source,
        }),
    }
}

/// Decode base64url with or without padding.
///
/// The url-safe alphabet is mapped onto the standard one and the input re-padded to a multiple
/// of four, so that standard base64 input is accepted as well.
pub fn decode_base64url(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let mut normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();

    let padding = (4 - normalized.len() % 4) % 4;
    normalized.extend(std::iter::repeat('=').take(padding));

    BASE64_STANDARD.decode(normalized)
}

#[cfg(test)]
pub(crate) fn encode_unsigned(header: &Json, payload: &Json) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
    let payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
