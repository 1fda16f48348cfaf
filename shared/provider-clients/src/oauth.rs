//! Authorization-code + PKCE scaffolding shared by the Google and
//! Microsoft clients, built on the `oauth2` crate the same way the
//! original dashboard's Microsoft login flow was.

use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};

use crate::ProviderError;

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

#[derive(Debug, Clone)]
pub struct ExchangedOAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct OAuthHelper {
    client: BasicClient,
}

impl OAuthHelper {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        endpoints: OAuthEndpoints,
    ) -> Result<Self, ProviderError> {
        let auth_url =
            AuthUrl::new(endpoints.auth_url).map_err(|e| ProviderError::OAuth(e.to_string()))?;
        let token_url =
            TokenUrl::new(endpoints.token_url).map_err(|e| ProviderError::OAuth(e.to_string()))?;

        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.to_string())),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(
            RedirectUrl::new(redirect_uri.to_string())
                .map_err(|e| ProviderError::OAuth(e.to_string()))?,
        );

        Ok(Self { client })
    }

    /// Returns `(authorization_url, pkce_verifier)`. The verifier must be
    /// held by the caller (e.g. in a short-lived signed cookie) and fed
    /// back into `exchange_code`.
    pub fn authorization_url(&self, state: &str, scopes: &[&str]) -> (String, String) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self
            .client
            .authorize_url(|| oauth2::CsrfToken::new(state.to_string()));
        for scope in scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }
        let (auth_url, _csrf) = request.set_pkce_challenge(pkce_challenge).url();

        (auth_url.to_string(), pkce_verifier.secret().clone())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<ExchangedOAuthTokens, ProviderError> {
        let result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| ProviderError::OAuth(e.to_string()))?;

        Ok(ExchangedOAuthTokens {
            access_token: result.access_token().secret().clone(),
            refresh_token: result.refresh_token().map(|t| t.secret().clone()),
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<ExchangedOAuthTokens, ProviderError> {
        let result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("invalid_grant") {
                    ProviderError::InvalidGrant
                } else {
                    ProviderError::OAuth(msg)
                }
            })?;

        Ok(ExchangedOAuthTokens {
            access_token: result.access_token().secret().clone(),
            refresh_token: result.refresh_token().map(|t| t.secret().clone()),
        })
    }
}
