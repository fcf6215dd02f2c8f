use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::claims::{Claims, TokenKind},
    config::JwtConfig,
};

const ALGORITHM: Algorithm = Algorithm::HS512;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to issue token: {0}")]
    Issuance(String),
    /// Bad signature, malformed token and expiry all collapse into this.
    #[error("invalid or expired token")]
    Invalid,
}

/// Access + refresh token pair handed to a client after login.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies HS512 JWTs. Built once at startup and shared behind an `Arc`.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    has_secret: bool,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            issuer: cfg.issuer.clone(),
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
            has_secret: !cfg.secret.is_empty(),
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    fn sign_with_kind(
        &self,
        user_id: Uuid,
        email: &str,
        level: &str,
        kind: TokenKind,
    ) -> Result<String, TokenError> {
        if !self.has_secret {
            return Err(TokenError::Issuance("signing secret is not configured".into()));
        }

        let now = OffsetDateTime::now_utc();
        let exp = time::Duration::try_from(self.ttl(kind))
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| TokenError::Issuance("token lifetime out of range".into()))?;

        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            level: level.to_owned(),
            token_type: kind,
            iss: self.issuer.clone(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Issuance(e.to_string()))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue_access(&self, user_id: Uuid, email: &str, level: &str) -> Result<String, TokenError> {
        self.sign_with_kind(user_id, email, level, TokenKind::Access)
    }

    pub fn issue_refresh(&self, user_id: Uuid, email: &str, level: &str) -> Result<String, TokenError> {
        self.sign_with_kind(user_id, email, level, TokenKind::Refresh)
    }

    pub fn issue_pair(&self, user_id: Uuid, email: &str, level: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id, email, level)?,
            refresh_token: self.issue_refresh(user_id, email, level)?,
        })
    }

    /// Accepts a token only while `nbf <= now < exp`.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            TokenError::Invalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if now < data.claims.nbf || now >= data.claims.exp {
            debug!(user_id = %data.claims.sub, "jwt outside validity window");
            return Err(TokenError::Invalid);
        }

        debug!(user_id = %data.claims.sub, kind = ?data.claims.token_type, "jwt verified");
        Ok(data.claims)
    }
}

/// Parses a TTL such as `15m`, `1h30m`, `250ms` or `7d`.
///
/// A trailing `d` counts whole 24h days; everything else uses the
/// `ns`/`us`/`ms`/`s`/`m`/`h` unit sequence. Returns `None` for anything
/// unparseable.
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if let Some(days) = s.strip_suffix('d').and_then(parse_decimal) {
        return Duration::try_from_secs_f64(days * 86_400.0).ok();
    }
    parse_unit_sequence(s)
}

fn parse_unit_sequence(s: &str) -> Option<Duration> {
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let is_numeric = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = s;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let num_end = rest.find(|c: char| !is_numeric(c)).unwrap_or(rest.len());
        let value = parse_decimal(&rest[..num_end])?;
        rest = &rest[num_end..];

        let unit_end = rest.find(is_numeric).unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            _ => return None,
        };
        nanos += value * unit_nanos;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(nanos / 1e9).ok()
}

fn parse_decimal(s: &str) -> Option<f64> {
    let digits = s.chars().filter(char::is_ascii_digit).count();
    let dots = s.chars().filter(|c| *c == '.').count();
    if digits == 0 || dots > 1 || digits + dots != s.chars().count() {
        return None;
    }
    s.parse().ok()
}
