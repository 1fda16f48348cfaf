use axum::{extract::State, response::Json, routing::{get, post}, Router};
use common::{config::ServiceConfig, HealthResponse, ServiceResult};
use models::{ClassifyRequest, Classification};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

mod llm_client;
use llm_client::LlmClient;

#[derive(Clone)]
struct AppState {
    llm_client: LlmClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = ServiceConfig::from_env("classifier-service", 8002);

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let state = AppState {
        llm_client: LlmClient::new(config.openai_api_key.clone()),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/classify", post(classify))
        .with_state(Arc::new(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Classifier service listening on port {}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[instrument]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("classifier-service"))
}

#[instrument(skip(state, request), fields(subject = %request.subject))]
async fn classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> ServiceResult<Json<Classification>> {
    let classification = state.llm_client.classify(&request).await;
    info!(topic = %classification.topic, "classified email");
    Ok(Json(classification))
}
