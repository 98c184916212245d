//! Access-token to external identity resolution via the provider profile endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::ProviderConfig;

/// Profile fields the linking flow needs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Profile {
    /// Display name, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Profile endpoint returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Profile request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse profile response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Map an access token to the stable external identity behind it.
    async fn resolve(&self, access_token: &str) -> Result<Profile, ResolveError>;
}

/// Profile responses arrive wrapped: `{"response": {"email": ..., ...}}`.
#[derive(Deserialize)]
struct ProfileEnvelope {
    response: Profile,
}

pub struct HttpResolver {
    http_client: reqwest::Client,
    profile_url: String,
}

impl HttpResolver {
    pub fn new(http_client: reqwest::Client, provider: &ProviderConfig) -> Self {
        Self {
            http_client,
            profile_url: provider.profile_url.clone(),
        }
    }
}

#[async_trait]
impl IdentityResolver for HttpResolver {
    async fn resolve(&self, access_token: &str) -> Result<Profile, ResolveError> {
        let response = self
            .http_client
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Profile lookup rejected");
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ProfileEnvelope = serde_json::from_str(&body)?;
        Ok(envelope.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_resolver(server: &MockServer) -> HttpResolver {
        let provider = ProviderConfig {
            profile_url: format!("{}/api/1/users/me", server.uri()),
            ..ProviderConfig::default()
        };
        HttpResolver::new(reqwest::Client::new(), &provider)
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/users/me"))
            .and(header("Authorization", "Bearer at-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {
                    "email": "Owner@Example.com",
                    "full_name": "Sam Owner",
                    "vault_uuid": "ignored",
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let profile = test_resolver(&server).resolve("at-123").await.unwrap();
        assert_eq!(profile.email, "Owner@Example.com");
        assert_eq!(profile.display_name(), "Sam Owner");
    }

    #[tokio::test]
    async fn test_resolve_missing_name_falls_back_to_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": { "email": "owner@example.com" }
            })))
            .mount(&server)
            .await;

        let profile = test_resolver(&server).resolve("at").await.unwrap();
        assert_eq!(profile.display_name(), "owner@example.com");
    }

    #[tokio::test]
    async fn test_resolve_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
            .mount(&server)
            .await;

        let err = test_resolver(&server).resolve("stale").await.unwrap_err();
        assert!(matches!(err, ResolveError::Status { status: 401, .. }));
    }
}
