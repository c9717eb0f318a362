use oid4vp_verifier::{config::Config, verifier::Verifier};

/// Static description of this service, reported at `/`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub callback_base: String,
    pub request_mode: String,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub verifier: Verifier,
    pub service: ServiceInfo,
}

impl AppState {
    pub fn new(verifier: Verifier, config: &Config) -> Self {
        Self {
            verifier,
            service: ServiceInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                callback_base: config.callback_base.as_str().to_owned(),
                request_mode: config.request_mode.to_string(),
            },
        }
    }
}
