//! JWT security configuration.

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::Algorithm;

/// HMAC algorithms accepted for issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JwtAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
}

impl JwtAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }
}

impl From<JwtAlgorithm> for Algorithm {
    fn from(algorithm: JwtAlgorithm) -> Self {
        match algorithm {
            JwtAlgorithm::Hs256 => Self::HS256,
            JwtAlgorithm::Hs384 => Self::HS384,
            JwtAlgorithm::Hs512 => Self::HS512,
        }
    }
}

impl fmt::Display for JwtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwtAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::Hs256),
            "HS384" => Ok(Self::Hs384),
            "HS512" => Ok(Self::Hs512),
            _ => Err(format!("unsupported JWT algorithm: {s}")),
        }
    }
}

/// Where clients are told to present the token.
///
/// Only the `Authorization` header is read back; `Body` is accepted in
/// configuration and reported to clients but tokens are still taken from the
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenMethod {
    #[default]
    Header,
    Body,
}

impl TokenMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

impl FromStr for TokenMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("header") {
            Ok(Self::Header)
        } else if s.eq_ignore_ascii_case("body") {
            Ok(Self::Body)
        } else {
            Err(format!("unsupported token method: {s}"))
        }
    }
}

/// One configured API user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserConfig {
    pub name: String,
    pub secret: String,
    /// Regular expressions matched against `"<METHOD> <path>"`.
    pub scope: Vec<String>,
}

/// Token issuing and validation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub algorithm: JwtAlgorithm,
    /// Token lifetime in seconds, counted from `iat`.
    pub expiration_time: u64,
    pub method: TokenMethod,
    pub decode_key: String,
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::Hs256,
            expiration_time: 3600,
            method: TokenMethod::Header,
            decode_key: String::new(),
            users: Vec::new(),
        }
    }
}
