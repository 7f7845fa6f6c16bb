use std::sync::Arc;

use crate::applications::RunRegistry;
use crate::orchestrator::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Sessions started through the API; each runs as its own task.
    pub registry: RunRegistry,
}
