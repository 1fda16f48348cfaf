//! Google provider client: Gmail OAuth2, message fetch, and `historyId`
//! diffing. Grounded on the public Gmail API surface the pack's standalone
//! Gmail client exercises (MIME-part traversal, base64url body decoding).

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use models::{ChangeSet, ExchangedTokens, CanonicalMessage, RefreshedAccessToken, SubscriptionHandle};
use serde::Deserialize;

use crate::body::normalize_body;
use crate::oauth::{OAuthEndpoints, OAuthHelper};
use crate::{ProviderClient, ProviderError};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/userinfo.email",
];

pub struct GoogleClient {
    http: reqwest::Client,
    oauth: OAuthHelper,
    pubsub_topic: String,
}

impl GoogleClient {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        pubsub_topic: &str,
    ) -> Result<Self, ProviderError> {
        let oauth = OAuthHelper::new(
            client_id,
            client_secret,
            redirect_uri,
            OAuthEndpoints {
                auth_url: GOOGLE_AUTH_URL.to_string(),
                token_url: GOOGLE_TOKEN_URL.to_string(),
            },
        )?;
        Ok(Self {
            http: reqwest::Client::new(),
            oauth,
            pubsub_topic: pubsub_topic.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    payload: MessagePart,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    id: String,
}

#[derive(Debug, Deserialize, Clone)]
struct MessagePart {
    headers: Option<Vec<Header>>,
    body: Option<PartBody>,
    parts: Option<Vec<MessagePart>>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize, Clone)]
struct PartBody {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryListResponse {
    history: Option<Vec<HistoryRecord>>,
    #[serde(rename = "historyId")]
    history_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    #[serde(rename = "messagesAdded")]
    messages_added: Option<Vec<MessageAdded>>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: MessageIdOnly,
}

#[derive(Debug, Deserialize)]
struct MessageIdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WatchResponse {
    #[serde(rename = "historyId")]
    history_id: String,
    expiration: Option<String>,
}

fn find_body(part: &MessagePart) -> (String, bool) {
    let mime = part.mime_type.as_deref().unwrap_or("");
    if mime == "text/plain" {
        if let Some(text) = decode_part(part) {
            return (text, false);
        }
    }
    if mime == "text/html" {
        if let Some(html) = decode_part(part) {
            return (html, true);
        }
    }
    for child in part.parts.iter().flatten() {
        let (text, is_html) = find_body(child);
        if !text.is_empty() {
            return (text, is_html);
        }
    }
    (String::new(), false)
}

fn decode_part(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_ref()?;
    let decoded = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(decoded).ok()
}

fn header<'a>(headers: &'a [Header], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or("")
}

fn parse_from(raw: &str) -> (String, String) {
    // "Jane Doe <jane@example.com>" or bare "jane@example.com"
    if let Some(start) = raw.find('<') {
        if let Some(end) = raw.find('>') {
            let name = raw[..start].trim().trim_matches('"').to_string();
            let email = raw[start + 1..end].trim().to_string();
            return (name, email);
        }
    }
    (String::new(), raw.trim().to_string())
}

#[async_trait]
impl ProviderClient for GoogleClient {
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
            ProviderError::OAuth("google exchange requires a pkce verifier".to_string())
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
        let url = format!("{GMAIL_API_BASE}/users/me/messages/{provider_message_id}?format=full");
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "gmail messages.get returned {}",
                response.status()
            )));
        }
        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let headers = parsed.payload.headers.clone().unwrap_or_default();
        let (from_name, from_email) = parse_from(header(&headers, "From"));
        let (raw_body, is_html) = find_body(&parsed.payload);
        let body_text = normalize_body(&raw_body, is_html);

        let sent_at = parsed
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| DateTime::from_timestamp_millis(ms))
            .unwrap_or_else(Utc::now);

        let has_attachments = has_attachment_part(&parsed.payload);
        let subject = header(&headers, "Subject").to_string();
        let is_reply = subject.trim_start().to_lowercase().starts_with("re:");

        Ok(CanonicalMessage {
            subject,
            from_name,
            from_email,
            body_text,
            sent_at,
            has_attachments,
            web_link: format!("https://mail.google.com/mail/u/0/#all/{}", parsed.id),
            is_reply,
        })
    }

    async fn list_changes_since(
        &self,
        access_token: &str,
        watermark: &str,
    ) -> Result<ChangeSet, ProviderError> {
        let url = format!(
            "{GMAIL_API_BASE}/users/me/history?startHistoryId={watermark}&historyTypes=messageAdded"
        );
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "gmail history.list returned {}",
                response.status()
            )));
        }
        let parsed: HistoryListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let message_ids: Vec<String> = parsed
            .history
            .unwrap_or_default()
            .into_iter()
            .flat_map(|h| h.messages_added.unwrap_or_default())
            .map(|m| m.message.id)
            .collect();

        let new_watermark = parsed.history_id.unwrap_or_else(|| watermark.to_string());

        Ok(ChangeSet {
            message_ids,
            new_watermark,
        })
    }

    async fn subscribe(
        &self,
        access_token: &str,
        _resource: &str,
    ) -> Result<SubscriptionHandle, ProviderError> {
        let url = format!("{GMAIL_API_BASE}/users/me/watch");
        let body = serde_json::json!({
            "topicName": self.pubsub_topic,
            "labelIds": ["INBOX"],
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "gmail watch returned {}",
                response.status()
            )));
        }
        let parsed: WatchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let expires_at = parsed
            .expiration
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        Ok(SubscriptionHandle {
            external_id: parsed.history_id,
            expires_at,
        })
    }

    async fn unsubscribe(&self, access_token: &str, _external_id: &str) -> Result<(), ProviderError> {
        let url = format!("{GMAIL_API_BASE}/users/me/stop");
        let response = self.http.post(&url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "gmail stop returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl GoogleClient {
    async fn probe(&self, access_token: &str) -> bool {
        let url = format!("{GMAIL_API_BASE}/users/me/profile");
        matches!(
            self.http.get(&url).bearer_auth(access_token).send().await,
            Ok(r) if r.status().is_success()
        )
    }

    async fn fetch_user_email(&self, access_token: &str) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct Profile {
            #[serde(rename = "emailAddress")]
            email_address: String,
        }
        let url = format!("{GMAIL_API_BASE}/users/me/profile");
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        let profile: Profile = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        Ok(profile.email_address)
    }
}

fn has_attachment_part(part: &MessagePart) -> bool {
    let mime = part.mime_type.as_deref().unwrap_or("");
    if mime.starts_with("application/") || mime.starts_with("image/") {
        return true;
    }
    part.parts.iter().flatten().any(has_attachment_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_from_header() {
        let (name, email) = parse_from("Jane Doe <jane@example.com>");
        assert_eq!(name, "Jane Doe");
        assert_eq!(email, "jane@example.com");
    }

    #[test]
    fn parses_bare_from_header() {
        let (name, email) = parse_from("jane@example.com");
        assert_eq!(name, "");
        assert_eq!(email, "jane@example.com");
    }
}
