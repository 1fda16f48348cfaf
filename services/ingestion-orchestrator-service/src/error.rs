//! Pipeline-internal error taxonomy (§7). Distinct from `common::ServiceError`:
//! these never become an HTTP response — the webhook handlers always ACK the
//! provider once a delivery is parsed and routed — they drive the worker's
//! retry/escalate decision instead.

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("provider rejected the authorization code: {0}")]
    AuthExchange(String),

    #[error("refresh token invalid or revoked")]
    TokenRefresh,

    #[error("ciphertext corruption or wrong key: {0}")]
    Decrypt(String),

    #[error("webhook signature or clientState mismatch")]
    WebhookValidation,

    #[error("message already ingested")]
    DuplicateMessage,

    #[error("transient provider failure: {0}")]
    ProviderTransient(String),

    #[error("classifier response failed schema validation: {0}")]
    ClassifierMalformed(String),

    #[error("unique-constraint race on persistence")]
    PersistConflict,

    #[error("subscription renewal failed: {0}")]
    SubscriptionExpired(String),

    #[error("social api {0} not found or inactive")]
    MissingSocialApi(uuid::Uuid),
}

impl IngestError {
    /// Whether the worker should retry this delivery with fresh state, per
    /// the retry table in §4.G / §7.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            IngestError::ProviderTransient(_) | IngestError::ClassifierMalformed(_)
        )
    }

    /// `DuplicateMessage` and `PersistConflict` are not failures at all —
    /// the worker ACKs and exits without escalating.
    pub fn is_benign(&self) -> bool {
        matches!(self, IngestError::DuplicateMessage | IngestError::PersistConflict)
    }
}

impl From<provider_clients::ProviderError> for IngestError {
    fn from(e: provider_clients::ProviderError) -> Self {
        match e {
            provider_clients::ProviderError::InvalidGrant => IngestError::TokenRefresh,
            provider_clients::ProviderError::Transient(msg) => IngestError::ProviderTransient(msg),
            provider_clients::ProviderError::Http(e) => IngestError::ProviderTransient(e.to_string()),
            provider_clients::ProviderError::MalformedResponse(msg) => IngestError::ProviderTransient(msg),
            provider_clients::ProviderError::Unsupported => {
                IngestError::ProviderTransient("operation unsupported by provider".to_string())
            }
            provider_clients::ProviderError::OAuth(msg) => IngestError::AuthExchange(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_transient_and_classifier_malformed_are_retryable() {
        assert!(IngestError::ProviderTransient("x".into()).retryable());
        assert!(IngestError::ClassifierMalformed("x".into()).retryable());
    }

    #[test]
    fn decrypt_and_missing_social_api_are_not_retryable() {
        assert!(!IngestError::Decrypt("x".into()).retryable());
        assert!(!IngestError::MissingSocialApi(uuid::Uuid::nil()).retryable());
    }

    #[test]
    fn duplicate_and_conflict_are_benign() {
        assert!(IngestError::DuplicateMessage.is_benign());
        assert!(IngestError::PersistConflict.is_benign());
        assert!(!IngestError::TokenRefresh.is_benign());
    }
}
