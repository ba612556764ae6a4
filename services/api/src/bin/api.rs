//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, EmptyKnowledgeBase, OpenAiChatAdapter, OpenAiEvaluatorAdapter,
        OpenAiPatientAdapter, PineconeKnowledgeBase,
    },
    config::Config,
    error::ApiError,
    web::{build_router, run_expiry_sweep, state::AppState, ApiDoc},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::{extract::DefaultBodyLimit, Router};
use ecos_core::ports::KnowledgeBaseService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let knowledge_base: Arc<dyn KnowledgeBaseService> =
        match (&config.pinecone_index_host, &config.pinecone_api_key) {
            (Some(host), Some(key)) => {
                info!("Retrieval enabled against {}", host);
                Arc::new(PineconeKnowledgeBase::new(
                    openai_client.clone(),
                    config.embedding_model.clone(),
                    host.clone(),
                    key.clone(),
                ))
            }
            _ => {
                warn!("PINECONE_INDEX_HOST or PINECONE_API_KEY missing; chat runs without retrieval.");
                Arc::new(EmptyKnowledgeBase)
            }
        };

    let qa_adapter = Arc::new(OpenAiChatAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));
    let patient_adapter = Arc::new(OpenAiPatientAdapter::new(
        openai_client.clone(),
        config.patient_model.clone(),
    ));
    let evaluator_adapter = Arc::new(OpenAiEvaluatorAdapter::new(
        openai_client,
        config.evaluation_model.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        knowledge_base,
        qa_adapter,
        patient_adapter,
        evaluator_adapter,
    });

    // --- 5. Start the Expiry Sweep ---
    let shutdown = CancellationToken::new();
    let sweep = tokio::spawn(run_expiry_sweep(
        app_state.clone(),
        Duration::from_secs(config.ecos_sweep_interval_secs.max(1)),
        shutdown.clone(),
    ));

    // --- 6. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static("x-user-email"),
        ]);

    let app = Router::new()
        .merge(build_router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweep.await {
        warn!("Expiry sweep ended abnormally: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}

/// Resolves on Ctrl+C and tells background tasks to stop.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        // Keep serving; the process can still be stopped from outside.
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested.");
    shutdown.cancel();
}
