use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::handlers;
use crate::llm::GeminiClient;

pub struct AppState {
    pub config: Config,
    /// `None` without `GOOGLE_API_KEY`.
    pub llm: Option<GeminiClient>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let llm = match &config.api_key {
            Some(key) => Some(GeminiClient::new(
                key.clone(),
                config.gemini_base_url.clone(),
                config.llm_timeout,
            )?),
            None => None,
        };
        Ok(Self { config, llm })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/seal", post(handlers::seal))
        .route("/api/order-invoice", post(handlers::order_invoice))
        .route("/api/masters", get(handlers::list_masters))
        .route("/api/masters/upload", post(handlers::upload_master))
        .with_state(state)
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bento_sheet_api=info,tower_http=info".into()),
        )
        .init();
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind_address().parse()?;
    if config.api_key.is_none() {
        warn!(
            "GOOGLE_API_KEY is not set; seal generation is disabled \
             and orders use the table reader only"
        );
    }
    info!(assets = %config.assets_dir.display(), "using assets directory");

    let state = Arc::new(AppState::new(config)?);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
