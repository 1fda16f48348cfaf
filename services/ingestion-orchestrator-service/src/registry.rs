//! Builds the provider registry (Design Notes §9): a `HashMap<ProviderKind,
//! Arc<dyn ProviderClient>>` the orchestrator dispatches through instead of
//! branching on provider type at every call site.

use std::collections::HashMap;
use std::sync::Arc;

use common::config::ServiceConfig;
use models::ProviderKind;
use provider_clients::{google::GoogleClient, microsoft::MicrosoftClient, ProviderClient};

pub type ProviderRegistry = HashMap<ProviderKind, Arc<dyn ProviderClient>>;

pub fn build_registry(config: &ServiceConfig) -> anyhow::Result<ProviderRegistry> {
    let mut registry: ProviderRegistry = HashMap::new();

    if let (Some(client_id), Some(client_secret), Some(pubsub_topic)) = (
        config.google_client_id.as_deref(),
        config.google_client_secret.as_deref(),
        config.google_pubsub_topic.as_deref(),
    ) {
        let redirect_uri = format!("{}/oauth/google/callback", config.redirect_base_url);
        let client = GoogleClient::new(client_id, client_secret, &redirect_uri, pubsub_topic)?;
        registry.insert(ProviderKind::Google, Arc::new(client));
    } else {
        tracing::warn!("Google OAuth credentials not configured, Google ingestion disabled");
    }

    if let (Some(client_id), Some(client_secret), Some(tenant_id), Some(client_state)) = (
        config.microsoft_client_id.as_deref(),
        config.microsoft_client_secret.as_deref(),
        config.microsoft_tenant_id.as_deref(),
        config.microsoft_client_state.as_deref(),
    ) {
        let redirect_uri = format!("{}/oauth/microsoft/callback", config.redirect_base_url);
        let notification_url = format!("{}/webhook/microsoft/mail", config.redirect_base_url);
        let lifecycle_notification_url =
            format!("{}/webhook/microsoft/subscription", config.redirect_base_url);
        let client = MicrosoftClient::new(
            client_id,
            client_secret,
            &redirect_uri,
            tenant_id,
            client_state,
            &notification_url,
            &lifecycle_notification_url,
        )?;
        registry.insert(ProviderKind::Microsoft, Arc::new(client));
    } else {
        tracing::warn!("Microsoft OAuth credentials not configured, Microsoft ingestion disabled");
    }

    Ok(registry)
}
