//! OAuth 2.0 authorization-code flow plumbing for the vehicle provider.
//!
//! - [`state`] - CSRF state nonces, issued on initiate and consumed once on callback
//! - [`exchange`] - code-grant and refresh-grant calls against the provider token endpoint
//! - [`profile`] - access-token to external identity resolution via the profile endpoint
//!
//! Each piece sits behind a narrow trait so the flow orchestrator can be
//! exercised with test doubles.

pub mod exchange;
pub mod profile;
pub mod state;

pub use exchange::{CredentialExchanger, ExchangeError, HttpExchanger, TokenBundle};
pub use profile::{HttpResolver, IdentityResolver, Profile, ResolveError};
pub use state::{NonceError, NonceStore, SqliteNonceStore};
