use std::{fmt, str::FromStr, time::Duration};

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default bound on every call to a [Provider](crate::verifier::provider::Provider).
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

/// Default authorization endpoint used for direct requests: the wallet invocation scheme.
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "openid4vp://authorize";

/// Verifier configuration, as it would be read from a file or the environment.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Identifier the verifier presents to the wallet.
    pub client_id: String,
    /// Base of the callback endpoint; the request id is appended as a path segment.
    pub callback_base: BaseUrl,
    #[serde(default)]
    pub request_mode: RequestMode,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default)]
    pub duplicate_callback_policy: DuplicateCallbackPolicy,
}

impl Config {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT.as_secs()
}

/// How the authorization URL handed to the wallet is produced.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RequestMode {
    /// The verifier builds the OpenID4VP request itself, against the wallet's authorization
    /// endpoint.
    Direct { authorization_endpoint: Url },
    /// A [Provider](crate::verifier::provider::Provider) brokers the request and returns the
    /// authorization URL.
    Provider,
}

impl Default for RequestMode {
    fn default() -> Self {
        RequestMode::Direct {
            authorization_endpoint: Url::parse(DEFAULT_AUTHORIZATION_ENDPOINT)
                .expect("constant is a valid url"),
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMode::Direct { .. } => "direct",
            RequestMode::Provider => "provider",
        }
        .fmt(f)
    }
}

/// What to do with a callback for a session that already reached a terminal status.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateCallbackPolicy {
    /// Leave the session untouched, log, and acknowledge with the current status.
    #[default]
    Ignore,
    /// Leave the session untouched and report the duplicate as an error.
    Reject,
    /// Replace the recorded outcome with the one from the new callback.
    Overwrite,
}

impl FromStr for DuplicateCallbackPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "reject" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            other => bail!("unknown duplicate callback policy '{other}'"),
        }
    }
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Serialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct BaseUrl(Url);

impl BaseUrl {
    /// Append a single path segment.
    pub fn with_segment(&self, segment: &str) -> Result<Url, Error> {
        let mut url = self.0.clone();
        {
            let Ok(mut path) = url.path_segments_mut() else {
                bail!("'{}' cannot be used as a base url", self.0)
            };
            path.pop_if_empty().push(segment);
        }
        Ok(url)
    }
}

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        // Make URL a base.
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}

impl FromStr for BaseUrl {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl From<BaseUrl> for String {
    fn from(value: BaseUrl) -> Self {
        value.0.into()
    }
}
