mod handlers;
#[cfg(test)]
mod testing;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{HeaderName, Method, Request, StatusCode, header},
};
use ci_insight_analysis::{OpenAiAnalyzer, risk::RiskModel};
use ci_insight_core::config::{Config, GitHubConfig};
use ci_insight_db::{AnalysisStore, MemoryStore, SqliteStore};
use ci_insight_github::{
    GitHub,
    credentials::{AppCredentials, CredentialResolver, StaticCredentials, Token},
};
use ci_insight_pipeline::PipelineContext;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    cors::{self, CorsLayer},
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tower_sessions::{
    Expiry, MemoryStore as MemorySessionStore, SessionManagerLayer, SessionStore, cookie::SameSite,
};
use tower_sessions_sqlx_store::SqliteStore as SqliteSessionStore;
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::build_router;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    pipeline: Arc<PipelineContext>,
    risk: Arc<RiskModel>,
}

impl FromRef<AppState> for GitHubConfig {
    fn from_ref(state: &AppState) -> Self { state.config.github.clone() }
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = Arc::new(Config::load().expect("Failed to load config"));
    if config.github.webhook_secret().is_none() {
        if config.server.dev_mode {
            tracing::warn!("No webhook secret configured, deliveries will not be verified");
        } else {
            tracing::warn!("No webhook secret configured, deliveries will be rejected");
        }
    }

    match &config.db {
        Some(db_config) => {
            let store = SqliteStore::new(db_config).await.expect("Failed to open database");
            let session_store = SqliteSessionStore::new(store.pool.clone());
            session_store.migrate().await.expect("Failed to migrate session store");
            let state = build_state(config.clone(), Arc::new(store.clone()))
                .expect("Failed to create application state");
            serve(state, session_store).await;
            store.close().await;
        }
        None => {
            let state = build_state(config.clone(), Arc::new(MemoryStore::default()))
                .expect("Failed to create application state");
            serve(state, MemorySessionStore::default()).await;
        }
    }
    tracing::info!("Shut down gracefully");
}

fn build_state(config: Arc<Config>, store: Arc<dyn AnalysisStore>) -> Result<AppState> {
    let github = GitHub::new(&config.github, &config.http)?;
    let analyzer = OpenAiAnalyzer::new(&config.openai, &config.http)?;
    let pipeline = PipelineContext {
        github: Arc::new(github),
        credentials: credential_resolver(&config.github)?,
        analyzer: Arc::new(analyzer),
        store,
    };
    Ok(AppState { config, pipeline: Arc::new(pipeline), risk: Arc::new(RiskModel::default()) })
}

fn credential_resolver(config: &GitHubConfig) -> Result<Arc<dyn CredentialResolver>> {
    if let Some(app_config) = &config.app {
        tracing::info!("Using installation tokens for GitHub App {}", app_config.id);
        let credentials = AppCredentials::new(app_config, &config.api_url)
            .context("Failed to create GitHub App credentials")?;
        return Ok(Arc::new(credentials));
    }
    match &config.token {
        Some(token) => {
            tracing::info!("Using the configured GitHub token for all repositories");
            Ok(Arc::new(StaticCredentials::new(Some(Token::new(token.clone())))))
        }
        None => {
            tracing::warn!("No GitHub App or token configured, workflow runs will be rejected");
            Ok(Arc::new(StaticCredentials::default()))
        }
    }
}

async fn serve(state: AppState, session_store: impl SessionStore + Clone) {
    let port = state.config.server.port;
    let router = app(state, session_store).into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Web server: Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.expect("bind error");
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")
    {
        tracing::error!("{e:?}");
    }
    tracing::info!("Web server stopped");
}

fn app(state: AppState, session_store: impl SessionStore + Clone) -> Router {
    let sensitive_headers: Arc<[_]> = vec![
        header::AUTHORIZATION,
        header::COOKIE,
        header::SET_COOKIE,
        HeaderName::from_static("x-hub-signature-256"),
    ]
    .into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .sensitive_response_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(RequestSpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(CorsLayer::new().allow_methods([Method::GET]).allow_origin(cors::Any))
        .layer(
            SessionManagerLayer::new(session_store)
                .with_secure(false)
                .with_same_site(SameSite::Lax)
                .with_expiry(Expiry::OnInactivity(time::Duration::days(30))),
        )
        .compression();
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            result = signal::ctrl_c() => result.expect("Failed to listen for Ctrl-C"),
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl-C");
    }
}

#[derive(Debug, Clone)]
pub struct RequestSpan {
    level: Level,
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let forwarded_ip = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        let ip = forwarded_ip
            .or_else(|| {
                request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(a)| a.ip())
            })
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]");
        let delivery = request
            .headers()
            .get("X-GitHub-Delivery")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    user_agent = %user_agent,
                    delivery = %delivery,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
