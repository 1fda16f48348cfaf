use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use common::{config::ServiceConfig, HealthResponse, ServiceError, ServiceResult};
use models::{
    Category, CreateSocialApiRequest, DecryptedRefreshToken, Email, Filter, IngestEmailRequest,
    IngestEmailResponse, ProviderSubscription, RefreshedAccessToken, Rule, RuleDecision, Sender,
    SocialApi,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};
use uuid::Uuid;
use vault::SecretVault;

mod database;
use database::Database;

const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Clone)]
struct AppState {
    db: Database,
    vault: Arc<SecretVault>,
}

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    user_id: Uuid,
    sender_id: Uuid,
    block: bool,
    category_id: Option<Uuid>,
    priority_override: Option<models::Priority>,
}

#[derive(Debug, Deserialize)]
struct RuleLookupRequest {
    user_id: Uuid,
    sender_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct GetOrCreateSenderRequest {
    email: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GetOrCreateCategoryRequest {
    user_id: Uuid,
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTokensRequest {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct CreateFilterRequest {
    user_id: Uuid,
    category_id: Uuid,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpsertGoogleSubscriptionRequest {
    social_api_id: Uuid,
    history_id: String,
}

#[derive(Debug, Deserialize)]
struct UpsertMicrosoftSubscriptionRequest {
    subscription_id: String,
    user_id: Uuid,
    email: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = ServiceConfig::from_env("credential-store-service", 8001);

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let database_url = config
        .database_url
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

    let db = Database::new(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize database: {}", e))?;
    db.migrate()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    // Only this service holds the vault handle (§4.D).
    let vault = SecretVault::from_env(&[REFRESH_TOKEN_KEY])
        .map_err(|e| anyhow::anyhow!("Failed to initialize secret vault: {}", e))?;

    let state = AppState {
        db,
        vault: Arc::new(vault),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/social-apis", post(create_social_api))
        .route("/api/v1/social-apis/:id", get(get_social_api))
        .route("/api/v1/social-apis/:id/refresh-token", get(decrypt_refresh_token))
        .route("/api/v1/social-apis/:id/tokens", post(update_tokens))
        .route("/api/v1/social-apis/:id/deactivate", post(deactivate_social_api))
        .route("/api/v1/social-apis/by-email/:email", get(get_social_api_by_email))
        .route("/api/v1/social-apis/active", get(list_active_social_apis))
        .route("/api/v1/senders", post(get_or_create_sender))
        .route("/api/v1/categories", post(get_or_create_category))
        .route("/api/v1/categories/:user_id", get(list_categories))
        .route("/api/v1/rules", post(create_rule))
        .route("/api/v1/rules/lookup", post(lookup_rule_decision))
        .route("/api/v1/filters", post(create_filter))
        .route("/api/v1/filters/:user_id", get(list_filters))
        .route("/api/v1/emails/ingest", post(ingest_email))
        .route(
            "/api/v1/emails/by-provider-id/:provider_id",
            get(find_email_by_provider_id).delete(delete_email),
        )
        .route(
            "/api/v1/subscriptions/google",
            post(upsert_google_subscription).get(list_google_subscriptions),
        )
        .route(
            "/api/v1/subscriptions/microsoft",
            post(upsert_microsoft_subscription).get(list_microsoft_subscriptions),
        )
        .route(
            "/api/v1/subscriptions/microsoft/:subscription_id",
            get(get_microsoft_subscription).delete(delete_microsoft_subscription),
        )
        .route(
            "/api/v1/subscriptions/microsoft/:subscription_id/reauthorization-pending",
            post(mark_microsoft_reauthorization_pending),
        )
        .route(
            "/api/v1/subscriptions/microsoft/:subscription_id/expiry",
            post(update_microsoft_subscription_expiry),
        )
        .with_state(Arc::new(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Credential store service listening on port {}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[instrument]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("credential-store-service"))
}

#[instrument(skip(state, request))]
async fn create_social_api(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSocialApiRequest>,
) -> ServiceResult<Json<SocialApi>> {
    let encrypted = state
        .vault
        .encrypt(REFRESH_TOKEN_KEY, &request.refresh_token)
        .map_err(|e| ServiceError::Decrypt(e.to_string()))?;

    let social_api = state
        .db
        .create_social_api(
            request.user_id,
            &request.email,
            request.provider,
            &request.access_token,
            &encrypted,
            request.user_description.as_deref(),
        )
        .await?;

    Ok(Json(social_api))
}

#[instrument(skip(state))]
async fn get_social_api(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ServiceResult<Json<SocialApi>> {
    Ok(Json(state.db.get_social_api(id).await?))
}

#[instrument(skip(state))]
async fn get_social_api_by_email(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> ServiceResult<Json<Option<SocialApi>>> {
    Ok(Json(state.db.get_social_api_by_email(&email).await?))
}

#[instrument(skip(state))]
async fn list_active_social_apis(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<Vec<SocialApi>>> {
    Ok(Json(state.db.list_active_social_apis().await?))
}

#[instrument(skip(state))]
async fn decrypt_refresh_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ServiceResult<Json<DecryptedRefreshToken>> {
    let social_api = state.db.get_social_api(id).await?;
    let refresh_token = state
        .vault
        .decrypt(REFRESH_TOKEN_KEY, &social_api.refresh_token)
        .map_err(|e| ServiceError::Decrypt(e.to_string()))?;
    Ok(Json(DecryptedRefreshToken { refresh_token }))
}

#[instrument(skip(state, request))]
async fn update_tokens(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTokensRequest>,
) -> ServiceResult<Json<RefreshedAccessToken>> {
    let encrypted = state
        .vault
        .encrypt(REFRESH_TOKEN_KEY, &request.refresh_token)
        .map_err(|e| ServiceError::Decrypt(e.to_string()))?;
    state
        .db
        .update_tokens(id, &request.access_token, &encrypted)
        .await?;
    Ok(Json(RefreshedAccessToken {
        access_token: request.access_token,
    }))
}

#[instrument(skip(state))]
async fn deactivate_social_api(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ServiceResult<Json<()>> {
    state.db.deactivate_social_api(id).await?;
    Ok(Json(()))
}

#[instrument(skip(state, request))]
async fn get_or_create_sender(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetOrCreateSenderRequest>,
) -> ServiceResult<Json<Sender>> {
    Ok(Json(
        state
            .db
            .get_or_create_sender(&request.email, &request.name)
            .await?,
    ))
}

#[instrument(skip(state, request))]
async fn get_or_create_category(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetOrCreateCategoryRequest>,
) -> ServiceResult<Json<Category>> {
    Ok(Json(
        state
            .db
            .get_or_create_category(request.user_id, &request.name, &request.description)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn list_categories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> ServiceResult<Json<Vec<Category>>> {
    Ok(Json(state.db.list_categories_for_user(user_id).await?))
}

#[instrument(skip(state, request))]
async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRuleRequest>,
) -> ServiceResult<Json<Rule>> {
    Ok(Json(
        state
            .db
            .create_rule(
                request.user_id,
                request.sender_id,
                request.block,
                request.category_id,
                request.priority_override,
            )
            .await?,
    ))
}

/// Evaluates the Rule Engine (§4.E) against the stored rules for a
/// sender: a block rule short-circuits, otherwise the first rule with a
/// non-null category wins.
#[instrument(skip(state, request))]
async fn lookup_rule_decision(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RuleLookupRequest>,
) -> ServiceResult<Json<RuleDecision>> {
    let rules = state
        .db
        .get_rules_for_sender(request.user_id, request.sender_id)
        .await?;

    if rules.iter().any(|r| r.block) {
        return Ok(Json(RuleDecision {
            block: true,
            forced_category_id: None,
            forced_priority: None,
        }));
    }

    let mut forced_category_id = None;
    let mut forced_priority = None;
    for rule in &rules {
        if forced_category_id.is_none() {
            forced_category_id = rule.category_id;
        }
        if forced_priority.is_none() {
            forced_priority = rule.priority_override;
        }
    }

    Ok(Json(RuleDecision {
        block: false,
        forced_category_id,
        forced_priority,
    }))
}

#[instrument(skip(state, request))]
async fn create_filter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateFilterRequest>,
) -> ServiceResult<Json<Filter>> {
    Ok(Json(
        state
            .db
            .create_filter(request.user_id, request.category_id, &request.name)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn list_filters(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> ServiceResult<Json<Vec<Filter>>> {
    Ok(Json(state.db.list_filters_for_user(user_id).await?))
}

#[instrument(skip(state, request))]
async fn ingest_email(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestEmailRequest>,
) -> ServiceResult<Json<IngestEmailResponse>> {
    let sender = state
        .db
        .get_or_create_sender(&request.sender_email, &request.sender_name)
        .await?;

    let (email, already_existed) = state
        .db
        .ingest_email(
            request.social_api_id,
            &request.provider_id,
            request.provider,
            &request.subject,
            &request.content,
            &request.short_summary,
            request.priority,
            sender.id,
            request.category_id,
            request.user_id,
            request.date,
            request.has_attachments,
            &request.web_link,
            &request.suggested_answer,
            &request.relevance,
            &request.bullet_points,
            &request.keypoints,
        )
        .await?;

    Ok(Json(IngestEmailResponse {
        email,
        already_existed,
    }))
}

#[instrument(skip(state))]
async fn find_email_by_provider_id(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> ServiceResult<Json<Option<Email>>> {
    Ok(Json(state.db.find_email_by_provider_id(&provider_id).await?))
}

#[instrument(skip(state))]
async fn delete_email(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> ServiceResult<Json<()>> {
    state.db.delete_email_by_provider_id(&provider_id).await?;
    Ok(Json(()))
}

#[instrument(skip(state, request))]
async fn upsert_google_subscription(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpsertGoogleSubscriptionRequest>,
) -> ServiceResult<Json<ProviderSubscription>> {
    Ok(Json(
        state
            .db
            .upsert_google_subscription(request.social_api_id, &request.history_id)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn list_google_subscriptions(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<Vec<ProviderSubscription>>> {
    Ok(Json(state.db.list_google_subscriptions().await?))
}

#[instrument(skip(state, request))]
async fn upsert_microsoft_subscription(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpsertMicrosoftSubscriptionRequest>,
) -> ServiceResult<Json<ProviderSubscription>> {
    Ok(Json(
        state
            .db
            .upsert_microsoft_subscription(
                &request.subscription_id,
                request.user_id,
                &request.email,
                request.expires_at,
            )
            .await?,
    ))
}

#[instrument(skip(state))]
async fn list_microsoft_subscriptions(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<Vec<ProviderSubscription>>> {
    Ok(Json(state.db.list_microsoft_subscriptions().await?))
}

#[instrument(skip(state))]
async fn get_microsoft_subscription(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> ServiceResult<Json<Option<ProviderSubscription>>> {
    Ok(Json(
        state.db.get_microsoft_subscription(&subscription_id).await?,
    ))
}

#[instrument(skip(state))]
async fn delete_microsoft_subscription(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> ServiceResult<Json<()>> {
    state
        .db
        .delete_microsoft_subscription(&subscription_id)
        .await?;
    Ok(Json(()))
}

#[instrument(skip(state))]
async fn mark_microsoft_reauthorization_pending(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> ServiceResult<Json<()>> {
    state
        .db
        .mark_microsoft_reauthorization_pending(&subscription_id)
        .await?;
    Ok(Json(()))
}

#[instrument(skip(state, request))]
async fn update_microsoft_subscription_expiry(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
    Json(request): Json<UpdateMicrosoftExpiryRequest>,
) -> ServiceResult<Json<()>> {
    state
        .db
        .update_microsoft_subscription_expiry(&subscription_id, request.expires_at)
        .await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct UpdateMicrosoftExpiryRequest {
    expires_at: chrono::DateTime<chrono::Utc>,
}
