//! Token-based access control for the HTTP surface.
//!
//! Users exchange a name and secret for a signed token, then present it on
//! every request. Each user's scope is a list of patterns matched against the
//! request's `"<METHOD> <path>"`.

pub mod config;
pub mod jwt;
pub mod middleware;

pub use config::{AuthConfig, JwtAlgorithm, TokenMethod, UserConfig};
pub use jwt::{AuthError, JwtAuthenticator, TokenResponse};
pub use middleware::require_token;
