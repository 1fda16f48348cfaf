//! Provider webhook endpoints (§6). Both skeletons share the same
//! invariant: the HTTP response to the provider is always a 2xx once the
//! delivery has been parsed and routed (§7 "Propagation policy"), and the
//! actual ingestion work happens on the background worker so the response
//! is never held up by it.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use models::ProviderKind;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::worker::{dispatch, process_deletion, CoreContext};

#[derive(Debug, Deserialize)]
pub struct ValidationQuery {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GooglePubSubPush {
    message: GooglePubSubMessage,
    subscription: String,
}

#[derive(Debug, Deserialize)]
struct GooglePubSubMessage {
    data: String,
    #[serde(rename = "messageId")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct GooglePubSubData {
    #[serde(rename = "emailAddress")]
    email_address: String,
    #[serde(rename = "historyId")]
    history_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MicrosoftNotificationEnvelope {
    value: Vec<MicrosoftNotification>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftNotification {
    #[serde(rename = "clientState")]
    client_state: Option<String>,
    #[serde(rename = "changeType")]
    change_type: Option<String>,
    #[serde(rename = "subscriptionId")]
    subscription_id: Option<String>,
    #[serde(rename = "resourceData")]
    resource_data: Option<MicrosoftResourceData>,
    #[serde(rename = "lifecycleEvent")]
    lifecycle_event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftResourceData {
    id: String,
}

pub struct WebhookState {
    pub ctx: Arc<CoreContext>,
    pub microsoft_client_state: Option<String>,
    pub google_pubsub_ack_token: Option<String>,
}

/// `POST /webhook/google/mail` — Pub/Sub push format (§6). The decoded
/// `data` names the affected mailbox; the watermark it carries isn't used
/// directly (the sweeper owns watermark advancement) — this handler's job
/// is purely to acknowledge and wake the sweep for that account sooner by
/// triggering an immediate history diff.
pub async fn google_mail(
    State(state): State<Arc<WebhookState>>,
    Json(push): Json<GooglePubSubPush>,
) -> Response {
    let decoded = match STANDARD.decode(&push.message.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("google pubsub payload is not valid base64: {e}");
            return StatusCode::OK.into_response();
        }
    };
    match serde_json::from_slice::<GooglePubSubData>(&decoded) {
        Ok(data) => {
            info!(email = %data.email_address, history_id = %data.history_id, "google push notification received");
            trigger_history_diff(&state, &data).await;
        }
        Err(e) => warn!("google pubsub payload did not match expected shape: {e}"),
    }

    acknowledge_pubsub(&state, &push.subscription, &push.message.message_id).await;

    // §4.B: ack to Pub/Sub happens after handoff, independent of
    // downstream success; the HTTP response to Pub/Sub itself is likewise
    // unconditional 2xx once parsed.
    StatusCode::OK.into_response()
}

async fn trigger_history_diff(state: &WebhookState, data: &GooglePubSubData) {
    let Ok(Some(social_api)) = state.ctx.credential.get_social_api_by_email(&data.email_address).await else {
        return;
    };
    let Some(client) = state.ctx.registry.get(&ProviderKind::Google) else {
        return;
    };
    let Ok(changes) = client
        .list_changes_since(&social_api.access_token, &data.history_id.to_string())
        .await
    else {
        return;
    };
    for message_id in changes.message_ids {
        dispatch(state.ctx.clone(), ProviderKind::Google, social_api.id, message_id);
    }
}

async fn acknowledge_pubsub(state: &WebhookState, subscription: &str, message_id: &str) {
    let Some(token) = state.google_pubsub_ack_token.as_deref() else {
        warn!(subscription, message_id, "no pubsub ack token configured, skipping ack call");
        return;
    };
    let url = format!("https://pubsub.googleapis.com/v1/{subscription}:acknowledge");
    let body = serde_json::json!({ "ackIds": [message_id] });
    let client = reqwest::Client::new();
    if let Err(e) = client.post(&url).bearer_auth(token).json(&body).send().await {
        warn!(subscription, message_id, "pubsub acknowledge failed: {e}");
    }
}

/// `POST /webhook/microsoft/mail`. Handles the `validationToken` handshake,
/// the `clientState` gate, deletions (inline), and creations (dispatched).
pub async fn microsoft_mail(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<ValidationQuery>,
    body: axum::body::Bytes,
) -> Response {
    if let Some(token) = query.validation_token {
        return ([("content-type", "text/plain")], token).into_response();
    }

    let envelope: MicrosoftNotificationEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("microsoft mail notification body did not parse: {e}");
            return StatusCode::OK.into_response();
        }
    };

    for notification in envelope.value {
        if !client_state_matches(&state, notification.client_state.as_deref()) {
            warn!("microsoft clientState mismatch, dropping notification silently");
            continue;
        }

        let Some(resource) = notification.resource_data else {
            continue;
        };

        if notification.change_type.as_deref() == Some("deleted") {
            process_deletion(&state.ctx, &resource.id).await;
            continue;
        }

        // Resolve the owning social api from the subscription id, since
        // the notification itself doesn't carry the user/email.
        let Some(subscription_id) = notification.subscription_id else {
            continue;
        };
        let Ok(Some(subscription)) = state.ctx.credential.get_microsoft_subscription(&subscription_id).await else {
            warn!(subscription_id, "no known subscription for incoming notification, dropping");
            continue;
        };
        let models::ProviderSubscription::Microsoft { email, .. } = subscription else {
            continue;
        };
        let Ok(Some(social_api)) = state.ctx.credential.get_social_api_by_email(&email).await else {
            continue;
        };

        dispatch(state.ctx.clone(), ProviderKind::Microsoft, social_api.id, resource.id);
    }

    StatusCode::OK.into_response()
}

/// `POST /webhook/microsoft/contacts` — same envelope shape as mail but
/// contacts sync is a Non-goal; acknowledge and drop.
pub async fn microsoft_contacts(
    State(_state): State<Arc<WebhookState>>,
    Query(query): Query<ValidationQuery>,
) -> Response {
    if let Some(token) = query.validation_token {
        return ([("content-type", "text/plain")], token).into_response();
    }
    StatusCode::OK.into_response()
}

/// `POST /webhook/microsoft/subscription` — lifecycle events
/// (`reauthorizationRequired`/`subscriptionRemoved`/`missed`), handled
/// inline rather than dispatched to the worker (§4.G "run the
/// renewal/reauthorize logic inline").
pub async fn microsoft_subscription(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<ValidationQuery>,
    body: axum::body::Bytes,
) -> Response {
    if let Some(token) = query.validation_token {
        return ([("content-type", "text/plain")], token).into_response();
    }

    let envelope: MicrosoftNotificationEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("microsoft subscription notification body did not parse: {e}");
            return StatusCode::OK.into_response();
        }
    };

    for notification in envelope.value {
        if !client_state_matches(&state, notification.client_state.as_deref()) {
            warn!("microsoft clientState mismatch on lifecycle event, dropping silently");
            continue;
        }
        let Some(subscription_id) = notification.subscription_id else {
            continue;
        };

        match notification.lifecycle_event.as_deref() {
            Some("reauthorizationRequired") => {
                if let Err(e) = state
                    .ctx
                    .credential
                    .mark_microsoft_reauthorization_pending(&subscription_id)
                    .await
                {
                    warn!(subscription_id, "failed to mark reauthorization pending: {e}");
                }
            }
            Some("subscriptionRemoved") => {
                if let Err(e) = state.ctx.credential.delete_microsoft_subscription(&subscription_id).await {
                    warn!(subscription_id, "failed to remove subscription record: {e}");
                }
                info!(subscription_id, "subscription removed by provider, re-subscription required on next link check");
            }
            Some("missed") => {
                info!(subscription_id, "missed notifications reported, full inbox poll required");
                // A full catch-up poll would enumerate the mailbox directly
                // through the provider client; left for the sweeper's next
                // tick rather than duplicating that fetch logic here.
            }
            other => warn!(subscription_id, lifecycle_event = ?other, "unrecognized lifecycle event"),
        }
    }

    StatusCode::OK.into_response()
}

fn client_state_matches(state: &WebhookState, received: Option<&str>) -> bool {
    client_state_matches_raw(state.microsoft_client_state.as_deref(), received)
}

fn client_state_matches_raw(expected: Option<&str>, received: Option<&str>) -> bool {
    match (expected, received) {
        (Some(expected), Some(received)) => expected == received,
        (None, _) => true,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub state: String,
}

/// `GET /oauth/:provider/authorize` — builds the provider's authorization
/// URL (§6). The PKCE verifier this returns alongside the URL must be held
/// by the caller (e.g. a short-lived signed cookie) and supplied back to
/// the exchange endpoint.
pub async fn oauth_authorize(
    State(state): State<Arc<WebhookState>>,
    axum::extract::Path(provider): axum::extract::Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(kind) = parse_provider(&provider) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(client) = state.ctx.registry.get(&kind) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    match client.authorization_url(&query.state) {
        Ok((url, verifier)) => Json(serde_json::json!({
            "authorization_url": url,
            "pkce_verifier": verifier,
        }))
        .into_response(),
        Err(e) => {
            warn!("failed to build authorization url: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub code: String,
    #[serde(rename = "typeApi")]
    pub type_api: String,
    pub pkce_verifier: Option<String>,
    pub user_id: Uuid,
    pub user_description: Option<String>,
}

/// `POST /oauth/:provider/exchange` — exchanges an authorization code for
/// tokens and creates the `SocialApi` record (§6 "Code exchange
/// endpoints").
pub async fn oauth_exchange(
    State(state): State<Arc<WebhookState>>,
    Json(request): Json<ExchangeRequest>,
) -> Response {
    let Some(kind) = parse_provider(&request.type_api) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(client) = state.ctx.registry.get(&kind) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let tokens = match client
        .exchange_authorization_code(&request.code, request.pkce_verifier.as_deref())
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("authorization code exchange failed: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if state
        .ctx
        .credential
        .get_social_api_by_email(&tokens.email)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        return StatusCode::CONFLICT.into_response();
    }

    let create_request = models::CreateSocialApiRequest {
        user_id: request.user_id,
        email: tokens.email,
        provider: kind,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        user_description: request.user_description,
    };

    match state.ctx.credential.http_create_social_api(&create_request).await {
        Ok(social_api) => Json(social_api).into_response(),
        Err(e) => {
            warn!("failed to persist newly linked account: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn parse_provider(raw: &str) -> Option<ProviderKind> {
    match raw.to_lowercase().as_str() {
        "google" => Some(ProviderKind::Google),
        "microsoft" => Some(ProviderKind::Microsoft),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_state_mismatch_is_rejected() {
        assert!(!client_state_matches_raw(Some("expected-secret"), Some("wrong-secret")));
        assert!(client_state_matches_raw(Some("expected-secret"), Some("expected-secret")));
    }

    #[test]
    fn missing_configured_client_state_accepts_anything() {
        assert!(client_state_matches_raw(None, Some("anything")));
        assert!(client_state_matches_raw(None, None));
    }

    #[test]
    fn missing_received_client_state_is_rejected_when_one_is_configured() {
        assert!(!client_state_matches_raw(Some("expected-secret"), None));
    }

    #[test]
    fn parse_provider_is_case_insensitive() {
        assert_eq!(parse_provider("Google"), Some(ProviderKind::Google));
        assert_eq!(parse_provider("MICROSOFT"), Some(ProviderKind::Microsoft));
        assert_eq!(parse_provider("yahoo"), None);
    }
}
