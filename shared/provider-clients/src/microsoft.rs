//! Microsoft provider client: Graph OAuth2, message fetch, and change
//! subscription lifecycle (subscribe/renew/reauthorize), grounded on the
//! original system's `email_providers/microsoft_api.py`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use models::{ExchangedTokens, CanonicalMessage, RefreshedAccessToken, SubscriptionHandle};
use serde::Deserialize;

use crate::body::normalize_body;
use crate::oauth::{OAuthEndpoints, OAuthHelper};
use crate::{ProviderClient, ProviderError};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const SUBSCRIPTION_LIFETIME_MINUTES: i64 = 4230; // Graph's mail-resource max.

const SCOPES: &[&str] = &[
    "https://graph.microsoft.com/Mail.Read",
    "https://graph.microsoft.com/User.Read",
    "offline_access",
];

pub struct MicrosoftClient {
    http: reqwest::Client,
    oauth: OAuthHelper,
    client_state: String,
    notification_url: String,
    lifecycle_notification_url: String,
}

impl MicrosoftClient {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        tenant_id: &str,
        client_state: &str,
        notification_url: &str,
        lifecycle_notification_url: &str,
    ) -> Result<Self, ProviderError> {
        let oauth = OAuthHelper::new(
            client_id,
            client_secret,
            redirect_uri,
            OAuthEndpoints {
                auth_url: format!(
                    "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/authorize"
                ),
                token_url: format!(
                    "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"
                ),
            },
        )?;
        Ok(Self {
            http: reqwest::Client::new(),
            oauth,
            client_state: client_state.to_string(),
            notification_url: notification_url.to_string(),
            lifecycle_notification_url: lifecycle_notification_url.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    body: Option<GraphBody>,
    #[serde(rename = "sentDateTime")]
    sent_date_time: Option<DateTime<Utc>>,
    #[serde(rename = "hasAttachments")]
    has_attachments: Option<bool>,
    #[serde(rename = "webLink")]
    web_link: Option<String>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    #[serde(rename = "expirationDateTime")]
    expiration_date_time: DateTime<Utc>,
}

#[async_trait]
impl ProviderClient for MicrosoftClient {
    fn authorization_url(&self, state: &str) -> Result<(String, Option<String>), ProviderError> {
        let (url, verifier) = self.oauth.authorization_url(state, SCOPES);
        Ok((url, Some(verifier)))
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ExchangedTokens, ProviderError> {
        let verifier = pkce_verifier.ok_or_else(|| {
            ProviderError::OAuth("microsoft exchange requires a pkce verifier".to_string())
        })?;
        let tokens = self.oauth.exchange_code(code, verifier).await?;
        let email = self.fetch_user_email(&tokens.access_token).await?;
        Ok(ExchangedTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.unwrap_or_default(),
            email,
        })
    }

    async fn refresh(
        &self,
        current_access_token: &str,
        refresh_token: &str,
    ) -> Result<RefreshedAccessToken, ProviderError> {
        if self.probe(current_access_token).await {
            return Ok(RefreshedAccessToken {
                access_token: current_access_token.to_string(),
            });
        }
        let tokens = self.oauth.refresh(refresh_token).await?;
        Ok(RefreshedAccessToken {
            access_token: tokens.access_token,
        })
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        provider_message_id: &str,
    ) -> Result<CanonicalMessage, ProviderError> {
        let url = format!("{GRAPH_API_BASE}/me/messages/{provider_message_id}");
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "graph messages.get returned {}",
                response.status()
            )));
        }
        let parsed: GraphMessage = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let (from_name, from_email) = parsed
            .from
            .map(|f| {
                (
                    f.email_address.name.unwrap_or_default(),
                    f.email_address.address.unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let is_html = parsed
            .body
            .as_ref()
            .and_then(|b| b.content_type.as_deref())
            .map(|t| t.eq_ignore_ascii_case("html"))
            .unwrap_or(false);
        let raw_body = parsed.body.map(|b| b.content.unwrap_or_default()).unwrap_or_default();
        let body_text = normalize_body(&raw_body, is_html);
        let subject = parsed.subject.unwrap_or_default();
        let is_reply = subject.trim_start().to_lowercase().starts_with("re:");

        Ok(CanonicalMessage {
            subject,
            from_name,
            from_email,
            body_text,
            sent_at: parsed.sent_date_time.unwrap_or_else(Utc::now),
            has_attachments: parsed.has_attachments.unwrap_or(false),
            web_link: parsed.web_link.unwrap_or_default(),
            is_reply,
        })
    }

    async fn subscribe(
        &self,
        access_token: &str,
        resource: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        let expiration = Utc::now() + Duration::minutes(SUBSCRIPTION_LIFETIME_MINUTES);
        let body = serde_json::json!({
            "changeType": "created,deleted",
            "notificationUrl": self.notification_url,
            "lifecycleNotificationUrl": self.lifecycle_notification_url,
            "resource": resource,
            "expirationDateTime": expiration.to_rfc3339(),
            "clientState": self.client_state,
        });
        let response = self
            .http
            .post(format!("{GRAPH_API_BASE}/subscriptions"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "graph subscriptions.create returned {}",
                response.status()
            )));
        }
        let parsed: SubscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        Ok(SubscriptionHandle {
            external_id: parsed.id,
            expires_at: Some(parsed.expiration_date_time),
        })
    }

    async fn unsubscribe(&self, access_token: &str, external_id: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(format!("{GRAPH_API_BASE}/subscriptions/{external_id}"))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(ProviderError::Transient(format!(
                "graph subscriptions.delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn renew(
        &self,
        access_token: &str,
        external_id: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        let expiration = Utc::now() + Duration::minutes(SUBSCRIPTION_LIFETIME_MINUTES);
        let body = serde_json::json!({ "expirationDateTime": expiration.to_rfc3339() });
        let response = self
            .http
            .patch(format!("{GRAPH_API_BASE}/subscriptions/{external_id}"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "graph subscriptions.patch returned {}",
                response.status()
            )));
        }
        let parsed: SubscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        Ok(SubscriptionHandle {
            external_id: parsed.id,
            expires_at: Some(parsed.expiration_date_time),
        })
    }

    async fn reauthorize(
        &self,
        access_token: &str,
        external_id: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        // Graph treats reauthorization as the same PATCH as a renewal; the
        // distinction is which lifecycle event triggered the call.
        self.renew(access_token, external_id).await
    }
}

impl MicrosoftClient {
    async fn probe(&self, access_token: &str) -> bool {
        let url = format!("{GRAPH_API_BASE}/me");
        matches!(
            self.http.get(&url).bearer_auth(access_token).send().await,
            Ok(r) if r.status().is_success()
        )
    }

    async fn fetch_user_email(&self, access_token: &str) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct Me {
            mail: Option<String>,
            #[serde(rename = "userPrincipalName")]
            user_principal_name: Option<String>,
        }
        let url = format!("{GRAPH_API_BASE}/me");
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        let me: Me = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        me.mail
            .or(me.user_principal_name)
            .ok_or_else(|| ProviderError::MalformedResponse("graph /me had no mail address".into()))
    }
}
