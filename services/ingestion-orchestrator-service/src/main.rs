//! Ingestion Orchestrator Service (§4.G)
//!
//! Owns the provider webhooks, the OAuth authorization-code dance, and the
//! background state machine (`RECEIVED → ... → PERSISTED`) that turns a
//! provider notification into a stored `Email` via the credential store (D)
//! and the classifier (F). No database connection of its own — everything
//! it needs is reached through those two sibling services.

mod clients;
mod error;
mod notifier;
mod registry;
mod sweeper;
mod webhooks;
mod worker;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use axum::Json;
use common::{config::ServiceConfig, HealthResponse};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

use clients::{ClassifierClient, CredentialClient};
use notifier::Notifier;
use webhooks::WebhookState;
use worker::CoreContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = ServiceConfig::from_env("ingestion-orchestrator-service", 8003);

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let registry = registry::build_registry(&config)?;

    let ctx = Arc::new(CoreContext::new(
        CredentialClient::new(config.service_url("credential-store")),
        ClassifierClient::new(config.service_url("classifier")),
        registry,
        Notifier::new(config.admin_alert_emails.clone()),
        config.max_retries,
    ));

    let webhook_state = Arc::new(WebhookState {
        ctx: ctx.clone(),
        microsoft_client_state: config.microsoft_client_state.clone(),
        google_pubsub_ack_token: config.google_pubsub_ack_token.clone(),
    });

    tokio::spawn(sweeper::run(ctx.clone()));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/webhook/google/mail", post(webhooks::google_mail))
        .route("/webhook/microsoft/mail", post(webhooks::microsoft_mail))
        .route("/webhook/microsoft/contacts", post(webhooks::microsoft_contacts))
        .route("/webhook/microsoft/subscription", post(webhooks::microsoft_subscription))
        .route("/oauth/:provider/authorize", get(webhooks::oauth_authorize))
        .route("/oauth/:provider/exchange", post(webhooks::oauth_exchange))
        .with_state(webhook_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Ingestion orchestrator service listening on port {}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[instrument]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("ingestion-orchestrator-service"))
}
