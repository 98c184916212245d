//! Token exchanges against the vehicle provider's token endpoint.
//!
//! Two grants are supported: `authorization_code` (interactive sign-in) and
//! `refresh_token`. Both are one-shot calls with no automatic retry; the
//! caller decides whether a failure is re-driven by the user.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

/// Tokens obtained from the provider, with expiry already made absolute.
///
/// `obtained_at` is the timestamp taken when the token response was handled;
/// `expires_at = obtained_at + expires_in`. Anchoring to response time (not
/// time of later use) keeps the expiry correct under processing latency, and
/// the same anchor is reused for row timestamps written in the same flow.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub obtained_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Non-success HTTP status from the token endpoint. The raw response
    /// body is carried for server-side diagnostics only.
    #[error("Token endpoint returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse token response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A code-grant response must carry the long-lived refresh credential.
    #[error("No refresh token in response")]
    MissingRefreshToken,
}

#[async_trait]
pub trait CredentialExchanger: Send + Sync {
    /// Trade an authorization code for a token bundle.
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, ExchangeError>;

    /// Trade a refresh token for a fresh token bundle.
    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenBundle, ExchangeError>;
}

/// Token response from the provider's token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Exchanger performing real HTTP calls with the configured credentials.
pub struct HttpExchanger {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl HttpExchanger {
    pub fn new(http_client: reqwest::Client, provider: &ProviderConfig) -> Self {
        Self {
            http_client,
            token_url: provider.token_url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
            redirect_uri: provider.redirect_uri.clone(),
        }
    }

    async fn post_grant(
        &self,
        request_body: serde_json::Value,
    ) -> Result<(TokenResponse, i64), ExchangeError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Anchor expiry to the moment the response is in hand.
        let obtained_at = chrono::Utc::now().timestamp();

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token request rejected");
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        Ok((token_response, obtained_at))
    }
}

#[async_trait]
impl CredentialExchanger for HttpExchanger {
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, ExchangeError> {
        debug!("Exchanging authorization code for tokens");

        let request_body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
            "redirect_uri": self.redirect_uri,
        });

        let (token_response, obtained_at) = self.post_grant(request_body).await?;
        let refresh_token = token_response
            .refresh_token
            .ok_or(ExchangeError::MissingRefreshToken)?;

        debug!("Code exchange successful");
        Ok(TokenBundle {
            access_token: token_response.access_token,
            refresh_token,
            expires_at: obtained_at + token_response.expires_in,
            obtained_at,
        })
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenBundle, ExchangeError> {
        debug!("Refreshing provider access token");

        let request_body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "refresh_token": refresh_token,
        });

        let (token_response, obtained_at) = self.post_grant(request_body).await?;

        // Use the rotated refresh token if provided, otherwise the provider
        // kept the presented one alive.
        let new_refresh = token_response
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string());

        debug!("Token refresh successful");
        Ok(TokenBundle {
            access_token: token_response.access_token,
            refresh_token: new_refresh,
            expires_at: obtained_at + token_response.expires_in,
            obtained_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_exchanger(server: &MockServer) -> HttpExchanger {
        let provider = ProviderConfig {
            client_id: "cid".into(),
            client_secret: "csec".into(),
            token_url: format!("{}/oauth2/v3/token", server.uri()),
            redirect_uri: "https://app.example.com/redirect".into(),
            ..ProviderConfig::default()
        };
        HttpExchanger::new(reqwest::Client::new(), &provider)
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v3/token"))
            .and(body_partial_json(serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": "cid",
                "client_secret": "csec",
                "code": "auth-code",
                "redirect_uri": "https://app.example.com/redirect",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = chrono::Utc::now().timestamp();
        let bundle = test_exchanger(&server)
            .exchange_code("auth-code")
            .await
            .unwrap();

        assert_eq!(bundle.access_token, "at");
        assert_eq!(bundle.refresh_token, "rt");
        assert!(bundle.obtained_at >= before);
        assert_eq!(bundle.expires_at, bundle.obtained_at + 3600);
    }

    #[tokio::test]
    async fn test_exchange_code_error_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = test_exchanger(&server)
            .exchange_code("bad-code")
            .await
            .unwrap_err();

        match err {
            ExchangeError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_requires_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let err = test_exchanger(&server)
            .exchange_code("code")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_exchange_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": "old-rt",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-at",
                "refresh_token": "new-rt",
                "expires_in": 7200,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let bundle = test_exchanger(&server)
            .exchange_refresh("old-rt")
            .await
            .unwrap();
        assert_eq!(bundle.refresh_token, "new-rt");
        assert_eq!(bundle.expires_at, bundle.obtained_at + 7200);
    }

    #[tokio::test]
    async fn test_exchange_refresh_keeps_old_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-at",
                "expires_in": 7200,
            })))
            .mount(&server)
            .await;

        let bundle = test_exchanger(&server)
            .exchange_refresh("old-rt")
            .await
            .unwrap();
        assert_eq!(bundle.refresh_token, "old-rt");
    }

    #[tokio::test]
    async fn test_exchange_refresh_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream broke"))
            .mount(&server)
            .await;

        let err = test_exchanger(&server)
            .exchange_refresh("rt")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_malformed_token_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = test_exchanger(&server)
            .exchange_code("code")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Parse(_)));
    }
}
