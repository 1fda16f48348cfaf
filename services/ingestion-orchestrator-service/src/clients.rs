//! Thin typed wrappers over `common::HttpClient` for the two sibling
//! services the orchestrator drives: the credential store (D) and the
//! classifier (F). Kept here rather than inlined in the worker so the
//! state machine in `worker.rs` reads as a sequence of named steps.

use chrono::{DateTime, Utc};
use common::http_client::HttpClient;
use models::{
    Category, ClassifyRequest, Classification, CreateSocialApiRequest, DecryptedRefreshToken,
    Email, IngestEmailRequest, IngestEmailResponse, ProviderSubscription, RefreshedAccessToken,
    RuleDecision, Sender, SocialApi,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;

#[derive(Clone)]
pub struct CredentialClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct UpdateTokensRequest<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct RuleLookupRequest {
    user_id: Uuid,
    sender_id: Uuid,
}

#[derive(Serialize)]
struct GetOrCreateSenderRequest<'a> {
    email: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct UpsertGoogleSubscriptionRequest<'a> {
    social_api_id: Uuid,
    history_id: &'a str,
}

#[derive(Serialize)]
struct UpsertMicrosoftSubscriptionRequest<'a> {
    subscription_id: &'a str,
    user_id: Uuid,
    email: &'a str,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct UpdateMicrosoftExpiryRequest {
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Empty {}

impl CredentialClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn http_create_social_api(
        &self,
        request: &CreateSocialApiRequest,
    ) -> Result<SocialApi, IngestError> {
        self.http
            .post(&format!("{}/api/v1/social-apis", self.base_url), request)
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn get_social_api(&self, id: Uuid) -> Result<SocialApi, IngestError> {
        self.http
            .get(&format!("{}/api/v1/social-apis/{id}", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn get_social_api_by_email(&self, email: &str) -> Result<Option<SocialApi>, IngestError> {
        self.http
            .get(&format!("{}/api/v1/social-apis/by-email/{email}", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn list_active_social_apis(&self) -> Result<Vec<SocialApi>, IngestError> {
        self.http
            .get(&format!("{}/api/v1/social-apis/active", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn decrypt_refresh_token(&self, social_api_id: Uuid) -> Result<String, IngestError> {
        let decrypted: DecryptedRefreshToken = self
            .http
            .get(&format!(
                "{}/api/v1/social-apis/{social_api_id}/refresh-token",
                self.base_url
            ))
            .await
            .map_err(|e| IngestError::Decrypt(e.to_string()))?;
        Ok(decrypted.refresh_token)
    }

    pub async fn update_tokens(
        &self,
        social_api_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<RefreshedAccessToken, IngestError> {
        self.http
            .post(
                &format!("{}/api/v1/social-apis/{social_api_id}/tokens", self.base_url),
                &UpdateTokensRequest {
                    access_token,
                    refresh_token,
                },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn deactivate_social_api(&self, social_api_id: Uuid) -> Result<(), IngestError> {
        let _: Empty = self
            .http
            .post(
                &format!("{}/api/v1/social-apis/{social_api_id}/deactivate", self.base_url),
                &serde_json::json!({}),
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))?;
        Ok(())
    }

    pub async fn get_or_create_sender(&self, email: &str, name: &str) -> Result<Sender, IngestError> {
        self.http
            .post(
                &format!("{}/api/v1/senders", self.base_url),
                &GetOrCreateSenderRequest { email, name },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>, IngestError> {
        self.http
            .get(&format!("{}/api/v1/categories/{user_id}", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn lookup_rule_decision(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
    ) -> Result<RuleDecision, IngestError> {
        self.http
            .post(
                &format!("{}/api/v1/rules/lookup", self.base_url),
                &RuleLookupRequest { user_id, sender_id },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn ingest_email(
        &self,
        request: &IngestEmailRequest,
    ) -> Result<IngestEmailResponse, IngestError> {
        self.http
            .post(&format!("{}/api/v1/emails/ingest", self.base_url), request)
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn find_email_by_provider_id(&self, provider_id: &str) -> Result<Option<Email>, IngestError> {
        self.http
            .get(&format!(
                "{}/api/v1/emails/by-provider-id/{provider_id}",
                self.base_url
            ))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn delete_email_by_provider_id(&self, provider_id: &str) -> Result<(), IngestError> {
        self.http
            .delete(&format!(
                "{}/api/v1/emails/by-provider-id/{provider_id}",
                self.base_url
            ))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn list_google_subscriptions(&self) -> Result<Vec<ProviderSubscription>, IngestError> {
        self.http
            .get(&format!("{}/api/v1/subscriptions/google", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn upsert_google_subscription(
        &self,
        social_api_id: Uuid,
        history_id: &str,
    ) -> Result<ProviderSubscription, IngestError> {
        self.http
            .post(
                &format!("{}/api/v1/subscriptions/google", self.base_url),
                &UpsertGoogleSubscriptionRequest {
                    social_api_id,
                    history_id,
                },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn list_microsoft_subscriptions(&self) -> Result<Vec<ProviderSubscription>, IngestError> {
        self.http
            .get(&format!("{}/api/v1/subscriptions/microsoft", self.base_url))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn get_microsoft_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, IngestError> {
        self.http
            .get(&format!(
                "{}/api/v1/subscriptions/microsoft/{subscription_id}",
                self.base_url
            ))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn upsert_microsoft_subscription(
        &self,
        subscription_id: &str,
        user_id: Uuid,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ProviderSubscription, IngestError> {
        self.http
            .post(
                &format!("{}/api/v1/subscriptions/microsoft", self.base_url),
                &UpsertMicrosoftSubscriptionRequest {
                    subscription_id,
                    user_id,
                    email,
                    expires_at,
                },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }

    pub async fn update_microsoft_subscription_expiry(
        &self,
        subscription_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let _: Empty = self
            .http
            .post(
                &format!(
                    "{}/api/v1/subscriptions/microsoft/{subscription_id}/expiry",
                    self.base_url
                ),
                &UpdateMicrosoftExpiryRequest { expires_at },
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_microsoft_reauthorization_pending(
        &self,
        subscription_id: &str,
    ) -> Result<(), IngestError> {
        let _: Empty = self
            .http
            .post(
                &format!(
                    "{}/api/v1/subscriptions/microsoft/{subscription_id}/reauthorization-pending",
                    self.base_url
                ),
                &serde_json::json!({}),
            )
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_microsoft_subscription(&self, subscription_id: &str) -> Result<(), IngestError> {
        self.http
            .delete(&format!(
                "{}/api/v1/subscriptions/microsoft/{subscription_id}",
                self.base_url
            ))
            .await
            .map_err(|e| IngestError::ProviderTransient(e.to_string()))
    }
}

#[derive(Clone)]
pub struct ClassifierClient {
    http: HttpClient,
    base_url: String,
}

impl ClassifierClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, IngestError> {
        self.http
            .post(&format!("{}/api/v1/classify", self.base_url), request)
            .await
            .map_err(|e| IngestError::ClassifierMalformed(e.to_string()))
    }
}
