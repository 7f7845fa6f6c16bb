mod applications;
mod browser;
mod config;
mod errors;
mod knowledge;
mod llm_client;
mod models;
mod navigator;
mod orchestrator;
mod pending;
mod recorder;
mod resolver;
mod routes;
mod state;
mod submitter;

#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::applications::RunRegistry;
use crate::browser::webdriver::WebDriverFactory;
use crate::config::Config;
use crate::knowledge::KnowledgeBase;
use crate::llm_client::LlmClient;
use crate::navigator::snapshots::SnapshotStore;
use crate::navigator::{ApplicationNavigator, NavigatorConfig};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::pending::PendingConfig;
use crate::recorder::ResultRecorder;
use crate::resolver::oracle::LlmOracle;
use crate::resolver::AnswerResolver;
use crate::routes::build_router;
use crate::state::AppState;
use crate::submitter::{ApplicationSubmitter, SubmitterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting autoapply v{}", env!("CARGO_PKG_VERSION"));

    // Candidate documents are read once and shared read-only by every session
    let knowledge = KnowledgeBase::load(
        &config.profile_path,
        config.cv_path.as_deref(),
        config.cover_letter_path.as_deref(),
    )?;

    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let browsers = Arc::new(WebDriverFactory::new(
        config.webdriver_url.clone(),
        config.browser_headless,
    ));
    info!("Browser sessions via WebDriver at {}", config.webdriver_url);

    let snapshots = SnapshotStore::new(config.snapshots_dir());
    let navigator = ApplicationNavigator::new(
        browsers.clone(),
        snapshots.clone(),
        NavigatorConfig::default(),
    );
    let resolver = AnswerResolver::new(
        Arc::new(knowledge),
        Arc::new(LlmOracle::new(llm)),
        config.search_top_k,
    );
    let submitter = ApplicationSubmitter::new(
        browsers,
        snapshots,
        SubmitterConfig {
            navigation_timeout: config.navigation_timeout,
            settle: NavigatorConfig::default().settle,
        },
    );
    let orchestrator = Orchestrator::new(
        Arc::new(navigator),
        resolver,
        submitter,
        ResultRecorder::new(config.results_dir()),
        OrchestratorConfig {
            navigation_timeout: config.navigation_timeout,
            sessions_dir: config.sessions_dir(),
            pending: PendingConfig {
                root: config.pending_dir(),
                poll_interval: config.answer_poll_interval,
                timeout: config.answer_timeout,
            },
        },
    );
    info!("Artifacts under {}", config.data_dir.display());

    // Build app state
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        registry: RunRegistry::new(config.run_retention),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
