//! The account-linking flow orchestrator.
//!
//! Ties the nonce store, credential exchanger, identity resolver, account
//! store, and session issuer together across the three entry points:
//! initiate, callback, and refresh. Collaborators are injected behind
//! narrow traits so every branch of the state machine can be exercised
//! with test doubles.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::accounts::AccountStore;
use crate::config::Config;
use crate::error::AppError;
use crate::oauth::exchange::{CredentialExchanger, ExchangeError};
use crate::oauth::profile::IdentityResolver;
use crate::oauth::state::NonceStore;
use crate::session::SessionIssuer;

/// Scopes requested from the vehicle provider.
const OAUTH_SCOPES: &str = "openid email offline_access vehicle_read";

/// Stored credentials expiring further than this into the future are not
/// refreshed; the provider token endpoint is left alone.
const REFRESH_SKIP_WINDOW_SECS: i64 = 300;

// User-facing redirect messages. Short and non-technical; diagnostic
// detail stays in the logs.
const MSG_GENERIC: &str = "Authentication failed. Please try again.";
const MSG_MISSING_PARAMS: &str = "Missing required parameters";
const MSG_INVALID_STATE: &str = "Invalid state parameter";
const MSG_EXCHANGE_FAILED: &str = "Failed to authenticate with the vehicle provider";

/// Query parameters the provider sends to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Terminal failure of the interactive callback path.
///
/// Every variant maps to exactly one user-facing redirect message in
/// [`CallbackError::user_message`]; nothing else ever reaches the user.
#[derive(Debug)]
enum CallbackError {
    ProviderDenied,
    MissingParams,
    InvalidState,
    ExchangeFailed,
    Internal,
}

impl CallbackError {
    fn user_message(&self) -> &'static str {
        match self {
            Self::ProviderDenied | Self::Internal => MSG_GENERIC,
            Self::MissingParams => MSG_MISSING_PARAMS,
            Self::InvalidState => MSG_INVALID_STATE,
            Self::ExchangeFailed => MSG_EXCHANGE_FAILED,
        }
    }
}

/// Result of the refresh entry point.
#[derive(Debug, PartialEq)]
pub enum RefreshOutcome {
    /// Stored expiry is comfortably in the future; no provider call made.
    StillValid,
    /// New credentials obtained and persisted.
    Refreshed { expires_at: i64 },
}

/// Orchestrator for the three linking entry points.
pub struct LinkService {
    nonces: Arc<dyn NonceStore>,
    exchanger: Arc<dyn CredentialExchanger>,
    resolver: Arc<dyn IdentityResolver>,
    accounts: Arc<dyn AccountStore>,
    sessions: SessionIssuer,
    auth_url: String,
    client_id: String,
    redirect_uri: String,
    success_url: String,
    error_url: String,
}

impl LinkService {
    pub fn new(
        config: &Config,
        nonces: Arc<dyn NonceStore>,
        exchanger: Arc<dyn CredentialExchanger>,
        resolver: Arc<dyn IdentityResolver>,
        accounts: Arc<dyn AccountStore>,
        sessions: SessionIssuer,
    ) -> Self {
        Self {
            nonces,
            exchanger,
            resolver,
            accounts,
            sessions,
            auth_url: config.provider.auth_url.clone(),
            client_id: config.provider.client_id.clone(),
            redirect_uri: config.provider.redirect_uri.clone(),
            success_url: config.frontend.success_url.clone(),
            error_url: config.frontend.error_url.clone(),
        }
    }

    // =========================================================================
    // Initiate
    // =========================================================================

    /// Start the linking flow: issue a state nonce and build the provider
    /// authorization URL to redirect the user to.
    ///
    /// The nonce write is the only side effect. If the state store is
    /// unreachable the flow aborts to the error landing page; it never
    /// proceeds without CSRF protection.
    pub fn begin(&self) -> String {
        let state = match self.nonces.issue() {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to issue state nonce");
                return self.error_redirect(MSG_GENERIC);
            }
        };

        info!("Started account linking flow");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(&state),
        )
    }

    // =========================================================================
    // Callback
    // =========================================================================

    /// Complete the flow after the provider redirects back.
    ///
    /// Returns the URL to redirect the user to: the success landing page
    /// with the session token, or the error landing page with a short
    /// message. All failures terminate here; none propagate to the caller.
    pub async fn complete(&self, params: &CallbackParams) -> String {
        match self.run_callback(params).await {
            Ok(token) => format!(
                "{}?token={}",
                self.success_url,
                urlencoding::encode(&token)
            ),
            Err(err) => self.error_redirect(err.user_message()),
        }
    }

    async fn run_callback(&self, params: &CallbackParams) -> Result<String, CallbackError> {
        // Provider-reported denial: terminal, and the nonce stays untouched.
        if let Some(provider_error) = &params.error {
            warn!(error = %provider_error, "Provider returned an OAuth error");
            return Err(CallbackError::ProviderDenied);
        }

        let (code, state) = match (&params.code, &params.state) {
            (Some(code), Some(state)) => (code, state),
            _ => return Err(CallbackError::MissingParams),
        };

        // Atomic check-and-delete: a replayed or raced nonce fails here.
        match self.nonces.consume(state) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Callback presented an unknown or already-used state nonce");
                return Err(CallbackError::InvalidState);
            }
            Err(e) => {
                error!(error = %e, "State store unavailable during callback");
                return Err(CallbackError::Internal);
            }
        }

        let bundle = match self.exchanger.exchange_code(code).await {
            Ok(bundle) => bundle,
            Err(ExchangeError::Status { status, body }) => {
                error!(status, body = %body, "Code exchange rejected by provider");
                return Err(CallbackError::ExchangeFailed);
            }
            Err(e) => {
                error!(error = %e, "Code exchange failed");
                return Err(CallbackError::ExchangeFailed);
            }
        };

        let profile = match self.resolver.resolve(&bundle.access_token).await {
            Ok(profile) => profile,
            Err(e) => {
                error!(error = %e, "Profile resolution failed");
                return Err(CallbackError::Internal);
            }
        };

        // Case-insensitive identity: the lowercased email is the account key.
        let identity = profile.email.to_lowercase();

        let existed = self
            .accounts
            .exists(&identity)
            .map_err(|e| {
                error!(error = %e, "Account existence check failed");
                CallbackError::Internal
            })?;

        // One timestamp anchors the token expiry and the row timestamps.
        self.accounts
            .upsert(&identity, &profile, &bundle, bundle.obtained_at)
            .map_err(|e| {
                error!(error = %e, "Account upsert failed");
                CallbackError::Internal
            })?;

        let token = self
            .sessions
            .issue(&identity, &profile.email, bundle.obtained_at)
            .map_err(|e| {
                error!(error = %e, "Session issuance failed");
                CallbackError::Internal
            })?;

        info!(new_account = !existed, "Account linking completed");
        Ok(token)
    }

    fn error_redirect(&self, message: &str) -> String {
        format!("{}?error={}", self.error_url, urlencoding::encode(message))
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Re-validate an existing session and refresh the stored provider
    /// credentials if they are close to expiry.
    pub async fn refresh(&self, auth_header: Option<&str>) -> Result<RefreshOutcome, AppError> {
        let token = bearer_token(auth_header).ok_or(AppError::Unauthorized)?;

        // Verification failures are deliberately indistinguishable from a
        // missing credential in the response body.
        let claims = self.sessions.verify(token).map_err(|e| {
            warn!(error = %e, "Session verification failed");
            AppError::AuthenticationFailed
        })?;

        let creds = self
            .accounts
            .credentials(&claims.sub)
            .map_err(|e| {
                error!(error = %e, "Credential lookup failed");
                AppError::Internal(e.to_string())
            })?
            .ok_or(AppError::NotFound)?;

        let now = chrono::Utc::now().timestamp();
        if creds.expires_at > now + REFRESH_SKIP_WINDOW_SECS {
            return Ok(RefreshOutcome::StillValid);
        }

        let bundle = match self.exchanger.exchange_refresh(&creds.refresh_token).await {
            Ok(bundle) => bundle,
            Err(ExchangeError::Status { status, body }) => {
                error!(status, body = %body, "Token refresh rejected by provider");
                return Err(AppError::RefreshFailed);
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                return Err(AppError::RefreshFailed);
            }
        };

        self.accounts
            .update_credentials(
                &claims.sub,
                &bundle.refresh_token,
                bundle.expires_at,
                bundle.obtained_at,
            )
            .map_err(|e| {
                error!(error = %e, "Failed to persist refreshed credentials");
                AppError::Internal(e.to_string())
            })?;

        info!(account = %claims.sub, expires_at = bundle.expires_at, "Provider token refreshed");
        Ok(RefreshOutcome::Refreshed {
            expires_at: bundle.expires_at,
        })
    }
}

/// Extract the token from a `Bearer <token>` header value.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
