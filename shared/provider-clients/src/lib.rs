//! Provider Clients (§4.B/C): a uniform capability surface the ingestion
//! orchestrator drives without knowing whether it's talking to Google or
//! Microsoft, plus the two concrete implementations.

pub mod body;
pub mod google;
pub mod microsoft;
pub mod oauth;

use async_trait::async_trait;
use models::{ChangeSet, ExchangedTokens, CanonicalMessage, RefreshedAccessToken, SubscriptionHandle};

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("provider http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned an unexpected payload: {0}")]
    MalformedResponse(String),

    #[error("refresh token rejected by provider (invalid_grant)")]
    InvalidGrant,

    #[error("provider request failed transiently: {0}")]
    Transient(String),

    #[error("operation not supported by this provider")]
    Unsupported,

    #[error("oauth error: {0}")]
    OAuth(String),
}

/// The capability surface the orchestrator's provider registry drives
/// (`HashMap<ProviderKind, Arc<dyn ProviderClient>>`). Methods a given
/// provider doesn't support return `ProviderError::Unsupported` by
/// default rather than requiring every implementor to hand-roll a stub.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Builds the authorization-code request URL and, for providers using
    /// PKCE, the verifier the caller must hold onto until the callback.
    fn authorization_url(&self, state: &str) -> Result<(String, Option<String>), ProviderError>;

    async fn exchange_authorization_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ExchangedTokens, ProviderError>;

    /// Cheap-probe-first refresh (§2 Supplemented features): checks whether
    /// `current_access_token` is still valid before spending a refresh
    /// call. Returns `ProviderError::InvalidGrant` when the refresh token
    /// itself has been revoked, which the orchestrator treats as
    /// reauthorization-required rather than retryable.
    async fn refresh(
        &self,
        current_access_token: &str,
        refresh_token: &str,
    ) -> Result<RefreshedAccessToken, ProviderError>;

    async fn fetch_message(
        &self,
        access_token: &str,
        provider_message_id: &str,
    ) -> Result<CanonicalMessage, ProviderError>;

    /// Google only: diffs a Gmail mailbox against a `historyId` watermark.
    async fn list_changes_since(
        &self,
        _access_token: &str,
        _watermark: &str,
    ) -> Result<ChangeSet, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Establishes a push subscription (Gmail `watch`, Graph
    /// `subscriptions`).
    async fn subscribe(
        &self,
        _access_token: &str,
        _resource: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn unsubscribe(
        &self,
        _access_token: &str,
        _external_id: &str,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Microsoft only: extends a subscription's `expirationDateTime`.
    async fn renew(
        &self,
        _access_token: &str,
        _external_id: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Microsoft only: re-establishes a subscription after a
    /// `reauthorizationRequired` lifecycle event.
    async fn reauthorize(
        &self,
        _access_token: &str,
        _external_id: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        Err(ProviderError::Unsupported)
    }
}
