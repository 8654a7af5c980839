use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use stockroom_core::TenantId;

use crate::{PrincipalId, Role};

/// JWT claims model (transport-agnostic).
///
/// The minimal set of claims expected once a token has been decoded and its
/// signature verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Tenant context for the token.
    pub tenant_id: TenantId,

    /// RBAC roles granted within the tenant context.
    pub roles: Vec<Role>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token rejected: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Validates the *claims* only; signature verification happens in
/// [`JwtValidator`] implementations.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Verifies a bearer token and yields its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<JwtClaims, TokenValidationError>;
}

/// Registered claim names on the wire: `sub`, `tenant_id`, `roles`, `iat`,
/// `exp` (unix seconds).
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: Uuid,
    tenant_id: Uuid,
    #[serde(default)]
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

/// HMAC-SHA256 token validator.
///
/// Decodes and verifies the signature with a shared secret, then runs the
/// deterministic [`validate_claims`] time-window checks.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time-window checks are done by validate_claims for uniform errors.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<WireClaims>(token, &self.key, &self.validation)
            .map_err(|err| TokenValidationError::Malformed(err.to_string()))?;

        let wire = data.claims;
        let issued_at = DateTime::from_timestamp(wire.iat, 0)
            .ok_or_else(|| TokenValidationError::Malformed("iat out of range".into()))?;
        let expires_at = DateTime::from_timestamp(wire.exp, 0)
            .ok_or_else(|| TokenValidationError::Malformed("exp out of range".into()))?;

        let claims = JwtClaims {
            sub: PrincipalId::from_uuid(wire.sub),
            tenant_id: TenantId::from_uuid(wire.tenant_id),
            roles: wire.roles.into_iter().map(Role::new).collect(),
            issued_at,
            expires_at,
        };

        validate_claims(&claims, Utc::now())?;

        Ok(claims)
    }
}
