use std::sync::Arc;

use crate::configuration;
use crate::state;
use anyhow::Result;
use mcp_chat::providers::OpenAiCompatibleFactory;
use mcp_chat::session::Orchestrator;
use mcp_chat::tools::McpToolResolver;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub async fn run() -> Result<()> {
    let settings = configuration::Settings::new()?;
    let _guard = crate::logging::setup_logging(Some("mcp-chatd"), &settings.logging)?;

    let catalog = settings.model_catalog()?;
    info!(
        models = %catalog.ids().collect::<Vec<_>>().join(", "),
        "loaded model catalog"
    );

    let orchestrator = Orchestrator::new(
        catalog,
        Arc::new(OpenAiCompatibleFactory::new(settings.provider_endpoints()?)),
        Arc::new(McpToolResolver::new()),
    )
    .with_config(settings.orchestrator_config());

    let app_state = state::AppState::new(orchestrator, settings.max_duration());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let app = crate::routes::configure(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
