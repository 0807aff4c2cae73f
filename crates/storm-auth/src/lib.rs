//! storm-auth — the control plane's auth surface.
//!
//! Two concerns live here:
//! - [`AuthBroker`]: a thin client toward the external auth service. It
//!   obtains a service credential via the OAuth2 client-credentials flow,
//!   brokers per-player match tokens, and never decodes what it forwards.
//! - [`token`]: HMAC-SHA256 operator API tokens minted by the
//!   `issue-api-token` utility and verified by the admin API layer.

pub mod broker;
pub mod token;

pub use broker::{AuthBroker, MatchToken, MatchTokenRequest, MatchTokenResult};
pub use token::{ApiTokenClaims, TokenError};
