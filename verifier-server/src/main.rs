use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::TimeDelta;
use clap::{Parser, ValueEnum};
use oid4vp_verifier::{
    config::{BaseUrl, Config, DuplicateCallbackPolicy, RequestMode},
    core::util::ReqwestClient,
    verifier::{provider::HttpProvider, session::MemoryStore, Verifier},
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

mod server;

use server::{create_router, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Direct,
    Provider,
}

#[derive(Parser, Debug)]
#[command(name = "oid4vp-verifier-server")]
#[command(about = "OID4VP verifier issuing presentation requests and tracking their outcome")]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Public URL the wallet can reach this server at.
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,

    /// Identifier presented to the wallet. Defaults to the public URL.
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// Base of the callback endpoint. Defaults to `<public-url>/presentation/callback`.
    #[arg(long, env = "CALLBACK_BASE")]
    callback_base: Option<String>,

    #[arg(long, value_enum, default_value = "direct", env = "REQUEST_MODE")]
    request_mode: Mode,

    /// Wallet authorization endpoint for direct requests.
    #[arg(long, default_value = "openid4vp://authorize", env = "AUTHORIZATION_ENDPOINT")]
    authorization_endpoint: Url,

    /// Base URL of the provider API, required in provider mode.
    #[arg(long, env = "PROVIDER_URL")]
    provider_url: Option<String>,

    #[arg(long, env = "PROVIDER_TOKEN")]
    provider_token: Option<String>,

    #[arg(long, default_value = "20", env = "PROVIDER_TIMEOUT_SECS")]
    provider_timeout_secs: u64,

    /// ignore, reject or overwrite
    #[arg(long, default_value = "ignore", env = "DUPLICATE_CALLBACK_POLICY")]
    duplicate_callback_policy: DuplicateCallbackPolicy,

    /// Evict sessions older than this many seconds. Sessions are kept for the lifetime of the
    /// process when unset.
    #[arg(long, env = "SESSION_TTL_SECS")]
    session_ttl_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    let public_url = cli
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", cli.host, cli.port));
    let callback_base: BaseUrl = match &cli.callback_base {
        Some(callback_base) => callback_base.parse(),
        None => format!(
            "{}/presentation/callback",
            public_url.trim_end_matches('/')
        )
        .parse(),
    }
    .context("invalid callback base url")?;

    let config = Config {
        client_id: cli.client_id.clone().unwrap_or_else(|| public_url.clone()),
        callback_base,
        request_mode: match cli.request_mode {
            Mode::Direct => RequestMode::Direct {
                authorization_endpoint: cli.authorization_endpoint.clone(),
            },
            Mode::Provider => RequestMode::Provider,
        },
        provider_timeout_secs: cli.provider_timeout_secs,
        duplicate_callback_policy: cli.duplicate_callback_policy,
    };

    let session_store = Arc::new(MemoryStore::default());
    let mut builder = Verifier::builder()
        .from_config(config.clone())
        .with_session_store(session_store.clone());

    if config.request_mode == RequestMode::Provider {
        let Some(provider_url) = &cli.provider_url else {
            bail!("--provider-url is required in provider mode")
        };
        let base: BaseUrl = provider_url.parse().context("invalid provider url")?;
        let mut provider = HttpProvider::new(base, ReqwestClient::new(config.provider_timeout())?);
        if let Some(token) = &cli.provider_token {
            provider = provider.with_bearer_token(token);
        }
        builder = builder.with_provider(Arc::new(provider));
    }

    let verifier = builder.build()?;

    if let Some(ttl) = cli.session_ttl_secs {
        spawn_sweeper(session_store, ttl)?;
    }

    let state = AppState::new(verifier, &config);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "verifier listening on {addr} ({} mode, callbacks at {})",
        config.request_mode,
        config.callback_base.as_str()
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Setup tracing subscriber for logging
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level))
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower_http=info".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();

    Ok(())
}

/// Periodically evict sessions created more than `ttl_secs` ago.
fn spawn_sweeper(store: Arc<MemoryStore>, ttl_secs: u64) -> Result<()> {
    let Some(ttl) = i64::try_from(ttl_secs).ok().and_then(TimeDelta::try_seconds) else {
        bail!("session ttl is too large")
    };
    let period = Duration::from_secs(ttl_secs.clamp(1, 60));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = store.purge_expired(ttl).await;
            if evicted > 0 {
                debug!("evicted {evicted} expired sessions");
            }
        }
    });

    Ok(())
}
