//! # User Pool Accounts
//!
//! User model and repository backing the user pool.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{code_matches, hash_code, hash_password, verify_password, PasswordPolicy};
use super::errors::{AuthError, AuthResult};

/// A pending one-time code (hash only; the raw code goes to the user)
#[derive(Debug, Clone)]
pub struct PendingCode {
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingCode {
    pub fn new(code: &str, ttl: Duration) -> Self {
        Self {
            code_hash: hash_code(code),
            expires_at: Utc::now() + ttl,
        }
    }

    /// Whether `code` matches and has not expired
    pub fn accepts(&self, code: &str) -> bool {
        Utc::now() < self.expires_at && code_matches(code, &self.code_hash)
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier (token subject)
    pub id: Uuid,

    /// Email address; required and mutable
    pub email: String,

    /// Whether the email has been confirmed with a code
    pub email_verified: bool,

    /// Argon2id password hash (never plaintext)
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    #[serde(skip)]
    pub verification: Option<PendingCode>,

    #[serde(skip)]
    pub recovery: Option<PendingCode>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new, unconfirmed user
    pub fn new(email: String, password: &str, policy: &PasswordPolicy) -> AuthResult<Self> {
        policy.validate(password)?;
        let password_hash = hash_password(password)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            email,
            email_verified: false,
            password_hash,
            verification: None,
            recovery: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Verify a password against this user's stored hash
    pub fn verify_password(&self, password: &str) -> AuthResult<bool> {
        verify_password(password, &self.password_hash)
    }

    /// Replace the password
    pub fn update_password(&mut self, new_password: &str, policy: &PasswordPolicy) -> AuthResult<()> {
        policy.validate(new_password)?;
        self.password_hash = hash_password(new_password)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Consume a verification code, marking the email verified
    pub fn confirm_email(&mut self, code: &str) -> AuthResult<()> {
        match &self.verification {
            Some(pending) if pending.accepts(code) => {
                self.verification = None;
                self.email_verified = true;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(AuthError::InvalidCode),
        }
    }

    /// Change the email; the new address must be confirmed again
    pub fn change_email(&mut self, email: String) {
        self.email = email;
        self.email_verified = false;
        self.updated_at = Utc::now();
    }
}

/// Sign-up request
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
}

/// Sign-in request
#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// User repository trait
///
/// Abstracts storage operations for users.
pub trait UserRepository: Send + Sync {
    /// Find a user by their ID
    fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;

    /// Find a user by their email
    fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// Create a new user
    fn create(&self, user: &User) -> AuthResult<()>;

    /// Update an existing user
    fn update(&self, user: &User) -> AuthResult<()>;
}

/// In-memory user repository
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: std::sync::RwLock<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::StorageError("Lock poisoned".to_string())
}

impl UserRepository for InMemoryUserRepository {
    fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn create(&self, user: &User) -> AuthResult<()> {
        let mut users = self.users.write().map_err(poisoned)?;

        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(AuthError::EmailAlreadyExists);
        }

        users.push(user.clone());
        Ok(())
    }

    fn update(&self, user: &User) -> AuthResult<()> {
        let mut users = self.users.write().map_err(poisoned)?;

        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(AuthError::StorageError("User not found".to_string())),
        }
    }
}
