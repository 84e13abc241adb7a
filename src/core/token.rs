//! Signed access/refresh token lifecycle.
//!
//! Access and refresh tokens are HS256 JWTs signed with distinct secrets and
//! independent expiries. The service injects `iss`, `iat` and `exp` on top of
//! whatever claims the caller supplies (reserved claim names are overwritten)
//! and discriminates expired from otherwise-invalid tokens on verification so
//! callers can decide whether a refresh flow is worth attempting.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::Serialize;
use serde_json::Value;

use crate::{config::models::TokenConfig, error::GatewayError};

/// Claims payload: free-form JSON object members.
pub type ClaimSet = serde_json::Map<String, Value>;

/// Wire shape for issued token pairs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: u64,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

/// Issues and verifies gateway tokens.
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
}

impl TokenService {
    /// Build the service from validated configuration.
    ///
    /// Missing or identical secrets and unparseable expiries are
    /// configuration errors: they abort startup rather than surfacing on a
    /// request path.
    pub fn new(config: &TokenConfig) -> Result<Self, GatewayError> {
        if config.access_secret.trim().is_empty() {
            return Err(GatewayError::ConfigError(
                "access token secret is not set".to_string(),
            ));
        }
        if config.refresh_secret.trim().is_empty() {
            return Err(GatewayError::ConfigError(
                "refresh token secret is not set".to_string(),
            ));
        }
        if config.access_secret == config.refresh_secret {
            return Err(GatewayError::ConfigError(
                "access and refresh token secrets must differ".to_string(),
            ));
        }

        let access_ttl = parse_expiry("tokens.access_expiry", &config.access_expiry)?;
        let refresh_ttl = parse_expiry("tokens.refresh_expiry", &config.refresh_expiry)?;

        Ok(Self {
            access: SigningKeys {
                encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
                ttl_secs: access_ttl,
            },
            refresh: SigningKeys {
                encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
                ttl_secs: refresh_ttl,
            },
            issuer: config.issuer.clone(),
        })
    }

    /// Sign a short-lived access token over the supplied claims.
    pub fn generate_access_token(&self, claims: &ClaimSet) -> Result<String, GatewayError> {
        let expires_at = Utc::now().timestamp() + self.access.ttl_secs as i64;
        self.sign(claims, expires_at, &self.access.encoding)
    }

    /// Sign a long-lived refresh token over the supplied claims.
    pub fn generate_refresh_token(&self, claims: &ClaimSet) -> Result<String, GatewayError> {
        let expires_at = Utc::now().timestamp() + self.refresh.ttl_secs as i64;
        self.sign(claims, expires_at, &self.refresh.encoding)
    }

    /// Issue an access/refresh pair over the same claims.
    pub fn generate_token_pair(&self, claims: &ClaimSet) -> Result<TokenPair, GatewayError> {
        Ok(TokenPair {
            access_token: self.generate_access_token(claims)?,
            refresh_token: self.generate_refresh_token(claims)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access.ttl_secs,
        })
    }

    /// Verify an access token's signature, expiry and issuer.
    pub fn verify_access_token(&self, token: &str) -> Result<ClaimSet, GatewayError> {
        self.verify(token, &self.access.decoding)
    }

    /// Verify a refresh token's signature, expiry and issuer.
    pub fn verify_refresh_token(&self, token: &str) -> Result<ClaimSet, GatewayError> {
        self.verify(token, &self.refresh.decoding)
    }

    /// Decode a token's claims without any signature or expiry verification.
    /// Inspection only; never an authentication decision.
    pub fn decode_token(&self, token: &str) -> Result<ClaimSet, GatewayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<ClaimSet>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|err| GatewayError::TokenInvalid(err.to_string()))
    }

    /// Whether the token's `exp` claim is in the past. Undecodable tokens and
    /// tokens without a numeric `exp` report as expired.
    pub fn is_token_expired(&self, token: &str) -> bool {
        match self.decode_token(token) {
            Ok(claims) => match claims.get("exp").and_then(Value::as_i64) {
                Some(exp) => exp <= Utc::now().timestamp(),
                None => true,
            },
            Err(_) => true,
        }
    }

    /// Pull the token out of an `Authorization` header value.
    ///
    /// Accepts exactly `Bearer <token>`: case-sensitive scheme, a single
    /// space, and a non-empty token with no further whitespace.
    pub fn extract_token_from_header(header: &str) -> Option<&str> {
        let token = header.strip_prefix("Bearer ")?;
        if token.is_empty() || token.contains(char::is_whitespace) {
            return None;
        }
        Some(token)
    }

    fn sign(
        &self,
        claims: &ClaimSet,
        expires_at: i64,
        key: &EncodingKey,
    ) -> Result<String, GatewayError> {
        let mut payload = claims.clone();
        payload.insert("iss".to_string(), Value::from(self.issuer.clone()));
        payload.insert("iat".to_string(), Value::from(Utc::now().timestamp()));
        payload.insert("exp".to_string(), Value::from(expires_at));

        encode(&Header::default(), &payload, key)
            .map_err(|err| GatewayError::TokenInvalid(err.to_string()))
    }

    fn verify(&self, token: &str, key: &DecodingKey) -> Result<ClaimSet, GatewayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = 0;

        decode::<ClaimSet>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
                _ => GatewayError::TokenInvalid(err.to_string()),
            })
    }
}

fn parse_expiry(field: &str, value: &str) -> Result<u64, GatewayError> {
    humantime::parse_duration(value)
        .map(|d| d.as_secs())
        .map_err(|err| GatewayError::ConfigError(format!("{field} ('{value}'): {err}")))
}
