use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenKind {
    #[serde(rename = "access_token")]
    Access,
    #[serde(rename = "refresh_token")]
    Refresh,
}

/// JWT payload. Access and refresh tokens share the shape and differ only in
/// `token_type` and lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,     // user ID
    pub email: String,
    pub level: String,
    pub token_type: TokenKind,
    pub iss: String,   // issuer
    pub iat: i64,      // issued at (unix timestamp)
    pub nbf: i64,      // not before
    pub exp: i64,      // expires at
}
