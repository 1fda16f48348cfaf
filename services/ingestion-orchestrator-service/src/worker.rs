//! Background ingestion worker (§4.G): the state machine
//! `RECEIVED → VALIDATED → DEDUPLICATED → FETCHED → RULED → CLASSIFIED →
//! PERSISTED → ACKED`, gated by a bounded semaphore the same way the mail
//! token manager in the pack bounds concurrent refresh operations.

use std::sync::Arc;
use std::time::Duration;

use models::{ClassifyRequest, IngestEmailRequest, Priority, ProviderKind};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::{ClassifierClient, CredentialClient};
use crate::error::IngestError;
use crate::notifier::Notifier;
use crate::registry::ProviderRegistry;

const DEFAULT_WORKER_PERMITS: usize = 10;

/// Explicit `CoreContext` (Design Notes §9): everything a delivery needs to
/// run the state machine, injected at construction rather than reached for
/// through ambient globals.
pub struct CoreContext {
    pub credential: CredentialClient,
    pub classifier: ClassifierClient,
    pub registry: ProviderRegistry,
    pub notifier: Notifier,
    pub max_retries: u32,
    semaphore: Semaphore,
}

impl CoreContext {
    pub fn new(
        credential: CredentialClient,
        classifier: ClassifierClient,
        registry: ProviderRegistry,
        notifier: Notifier,
        max_retries: u32,
    ) -> Self {
        Self {
            credential,
            classifier,
            registry,
            notifier,
            max_retries,
            semaphore: Semaphore::new(DEFAULT_WORKER_PERMITS),
        }
    }
}

/// Spawns the remainder of the state machine on the bounded pool and
/// returns immediately — webhook handlers await this, not the ingestion
/// itself, so the HTTP ack to the provider is never held up by it (§4.G).
pub fn dispatch(ctx: Arc<CoreContext>, provider: ProviderKind, social_api_id: Uuid, provider_message_id: String) {
    tokio::spawn(async move {
        let _permit = match ctx.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        run_with_retries(&ctx, provider, social_api_id, &provider_message_id).await;
    });
}

async fn run_with_retries(ctx: &CoreContext, provider: ProviderKind, social_api_id: Uuid, provider_message_id: &str) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match process_delivery(ctx, provider, social_api_id, provider_message_id).await {
            Ok(()) => {
                info!(provider_id = provider_message_id, attempt, "ingestion succeeded");
                return;
            }
            Err(e) if e.is_benign() => {
                info!(provider_id = provider_message_id, "{e} (no-op)");
                return;
            }
            Err(e) if e.retryable() && attempt < ctx.max_retries => {
                warn!(provider_id = provider_message_id, attempt, "retrying after: {e}");
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                continue;
            }
            Err(e) => {
                error!(provider_id = provider_message_id, attempt, "escalating after: {e}");
                ctx.notifier
                    .send_admin_alert(
                        &format!("Ingestion failed for message {provider_message_id}"),
                        &format!(
                            "<p>Provider: {provider}</p><p>Message: {provider_message_id}</p><p>Error: {e}</p>"
                        ),
                    )
                    .await;
                return;
            }
        }
    }
}

/// Runs RECEIVED → ... → PERSISTED for one delivery, fresh state each call
/// (the retry loop above re-invokes this rather than resuming mid-way).
async fn process_delivery(
    ctx: &CoreContext,
    provider: ProviderKind,
    social_api_id: Uuid,
    provider_message_id: &str,
) -> Result<(), IngestError> {
    // VALIDATED: caller already checked clientState/validation-token; here
    // we validate the social api is still active.
    let social_api = ctx.credential.get_social_api(social_api_id).await?;
    if !social_api.active {
        return Err(IngestError::MissingSocialApi(social_api_id));
    }

    // DEDUPLICATED
    if ctx
        .credential
        .find_email_by_provider_id(provider_message_id)
        .await?
        .is_some()
    {
        return Err(IngestError::DuplicateMessage);
    }

    let client = ctx
        .registry
        .get(&provider)
        .ok_or_else(|| IngestError::ProviderTransient(format!("no client registered for {provider}")))?;

    // Refresh the access token before use; a validity probe first avoids an
    // unnecessary refresh call on the common path.
    let refresh_token = ctx.credential.decrypt_refresh_token(social_api_id).await?;
    let refreshed = client
        .refresh(&social_api.access_token, &refresh_token)
        .await
        .map_err(IngestError::from)?;
    if refreshed.access_token != social_api.access_token {
        ctx.credential
            .update_tokens(social_api_id, &refreshed.access_token, &refresh_token)
            .await?;
    }

    // FETCHED
    let message = client
        .fetch_message(&refreshed.access_token, provider_message_id)
        .await
        .map_err(IngestError::from)?;

    if message.body_text.trim().is_empty() {
        info!(provider_id = provider_message_id, "empty body after normalization, skipping");
        return Ok(());
    }

    let sender = ctx
        .credential
        .get_or_create_sender(&message.from_email, &message.from_name)
        .await?;

    // RULED
    let decision = ctx
        .credential
        .lookup_rule_decision(social_api.user_id, sender.id)
        .await?;
    if decision.block {
        info!(provider_id = provider_message_id, sender = %message.from_email, "blocked by rule");
        return Ok(());
    }

    let categories = ctx.credential.list_categories(social_api.user_id).await?;
    let candidate_categories: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();

    // CLASSIFIED
    let classify_request = ClassifyRequest {
        subject: message.subject.clone(),
        body_text: message.body_text.clone(),
        candidate_categories,
        user_description: social_api.user_description.clone(),
        language: "en".to_string(),
        is_reply: message.is_reply,
    };
    let classification = ctx.classifier.classify(&classify_request).await?;

    let category = resolve_category(decision.forced_category_id, &classification.topic, &categories)
        .ok_or_else(|| IngestError::ProviderTransient("user has no default category".to_string()))?;

    let priority = resolve_priority(decision.forced_priority, &classification.importance_distribution);

    // PERSISTED
    let ingest_request = IngestEmailRequest {
        social_api_id,
        provider_id: provider_message_id.to_string(),
        provider,
        subject: message.subject,
        content: message.body_text,
        short_summary: classification.short_summary,
        priority,
        sender_email: message.from_email,
        sender_name: message.from_name,
        category_id: category.id,
        user_id: social_api.user_id,
        date: message.sent_at,
        has_attachments: message.has_attachments,
        web_link: message.web_link,
        suggested_answer: classification.suggested_answer,
        relevance: classification.relevance,
        bullet_points: classification.bullet_summary,
        keypoints: classification.keypoints,
    };
    let response = ctx.credential.ingest_email(&ingest_request).await?;

    if response.already_existed {
        return Err(IngestError::DuplicateMessage);
    }

    // ACKED happens at the HTTP layer; this function returning Ok(()) is
    // the signal the webhook handler already relied on to respond 2xx.
    Ok(())
}

/// Resolves the category to persist, per §4.E rule #2 (a forced category
/// from the Rule Engine wins) falling back to the classifier's topic and
/// finally the user's `"default"` category (§4.F: topic not in
/// `candidate_categories` becomes `"default"`, so this lookup always has
/// something to find once a default category exists). The Rule Engine
/// only hands back a `category_id` — it's resolved against the same
/// `categories` list already fetched for the classifier's candidate set,
/// rather than credential-store-service re-querying categories itself.
fn resolve_category(
    forced_category_id: Option<Uuid>,
    classified_topic: &str,
    categories: &[models::Category],
) -> Option<models::Category> {
    forced_category_id
        .and_then(|id| categories.iter().find(|c| c.id == id).cloned())
        .or_else(|| categories.iter().find(|c| c.name == classified_topic).cloned())
        .or_else(|| categories.iter().find(|c| c.name == models::Category::DEFAULT_NAME).cloned())
}

/// A rule's `priority_override` wins over the classifier's projection
/// (§4.E / §4.F interaction is not spelled out explicitly in the spec, but
/// the Rule Engine's category override implies the same precedence for
/// priority overrides).
fn resolve_priority(forced: Option<Priority>, distribution: &models::ImportanceDistribution) -> Priority {
    forced.unwrap_or_else(|| models::project_priority(distribution))
}

/// Handles a provider-reported deletion (Microsoft `changeType=deleted`):
/// idempotent by construction since the store's delete is itself a no-op
/// when the row is already gone.
pub async fn process_deletion(ctx: &CoreContext, provider_message_id: &str) {
    if let Err(e) = ctx.credential.delete_email_by_provider_id(provider_message_id).await {
        warn!(provider_id = provider_message_id, "deletion failed: {e}");
    }
}

/// Backfills the N most recent messages for a newly-linked account,
/// fanning out onto the same bounded pool as regular webhook dispatch
/// (§4.G "bounded worker pool... processes newly-linked accounts' backlog").
pub async fn backfill(
    ctx: Arc<CoreContext>,
    provider: ProviderKind,
    social_api_id: Uuid,
    provider_message_ids: Vec<String>,
) {
    for provider_message_id in provider_message_ids {
        dispatch(ctx.clone(), provider, social_api_id, provider_message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> models::Category {
        models::Category {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn forced_category_wins_over_classified_topic() {
        let forced = category("vip");
        let classified = category("billing");
        let categories = vec![classified.clone(), forced.clone()];
        let resolved = resolve_category(Some(forced.id), "billing", &categories);
        assert_eq!(resolved.unwrap().id, forced.id);
    }

    #[test]
    fn classified_topic_wins_over_default_when_no_rule_forces_one() {
        let billing = category("billing");
        let default = category(models::Category::DEFAULT_NAME);
        let categories = vec![default, billing.clone()];
        let resolved = resolve_category(None, "billing", &categories);
        assert_eq!(resolved.unwrap().id, billing.id);
    }

    #[test]
    fn falls_back_to_default_when_topic_unresolvable() {
        let default = category(models::Category::DEFAULT_NAME);
        let categories = vec![default.clone()];
        let resolved = resolve_category(None, "default", &categories);
        assert_eq!(resolved.unwrap().id, default.id);
    }

    #[test]
    fn missing_default_category_resolves_to_none() {
        let categories = vec![category("billing")];
        let resolved = resolve_category(None, "nonexistent", &categories);
        assert!(resolved.is_none());
    }

    #[test]
    fn forced_priority_overrides_projection() {
        let mut distribution = models::ImportanceDistribution::new();
        distribution.insert(models::URGENT_WORK_INFORMATION.to_string(), 90);
        let resolved = resolve_priority(Some(Priority::Useless), &distribution);
        assert_eq!(resolved, Priority::Useless);
    }

    #[test]
    fn no_forced_priority_falls_back_to_projection() {
        let mut distribution = models::ImportanceDistribution::new();
        distribution.insert(models::URGENT_WORK_INFORMATION.to_string(), 90);
        let resolved = resolve_priority(None, &distribution);
        assert_eq!(resolved, Priority::Important);
    }
}
