//! # Identity Pool
//!
//! Maps callers onto one of two role classes. A verified token yields the
//! authenticated role; no token yields the unauthenticated (guest) role when
//! the pool allows it. A token that fails verification is never downgraded
//! to a guest identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::pool::UserPool;

/// Coarse authorization class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleClass {
    Authenticated,
    Unauthenticated,
}

impl fmt::Display for RoleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleClass::Authenticated => write!(f, "authenticated"),
            RoleClass::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// A resolved caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Token subject, or a guest identity id
    pub subject: String,
    pub role_class: RoleClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role_class: RoleClass::Authenticated,
            email: None,
        }
    }

    pub fn guest() -> Self {
        Self {
            subject: format!("guest:{}", Uuid::new_v4()),
            role_class: RoleClass::Unauthenticated,
            email: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.role_class == RoleClass::Authenticated
    }
}

/// Verifies caller tokens
pub trait IdentityProvider: Send + Sync {
    fn verify_token(&self, token: &str) -> AuthResult<Identity>;
}

impl IdentityProvider for UserPool {
    fn verify_token(&self, token: &str) -> AuthResult<Identity> {
        let claims = self.validate_token(token)?;
        Ok(Identity {
            subject: claims.sub,
            role_class: RoleClass::Authenticated,
            email: Some(claims.email),
        })
    }
}

/// Identity pool federating a token provider with guest access
pub struct IdentityPool {
    name: String,
    allow_unauthenticated: bool,
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityPool {
    pub fn new(
        name: impl Into<String>,
        allow_unauthenticated: bool,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            allow_unauthenticated,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve an optional bearer token to an identity
    pub fn resolve(&self, token: Option<&str>) -> AuthResult<Identity> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => self.provider.verify_token(strip_bearer(token)),
            None if self.allow_unauthenticated => Ok(Identity::guest()),
            None => Err(AuthError::AuthenticationRequired),
        }
    }
}

impl IdentityProvider for IdentityPool {
    fn verify_token(&self, token: &str) -> AuthResult<Identity> {
        self.resolve(Some(token))
    }
}

fn strip_bearer(token: &str) -> &str {
    token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
}
