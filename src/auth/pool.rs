//! # User Pool
//!
//! Self sign-up with email confirmation, password sign-in, and account
//! recovery by email. Issues the bearer tokens the identity pool accepts.

use std::sync::Arc;

use chrono::Duration;
use regex::Regex;
use uuid::Uuid;

use super::crypto::{generate_code, PasswordPolicy};
use super::delivery::{CodeDelivery, CodeMessage};
use super::errors::{AuthError, AuthResult};
use super::jwt::{JwtClaims, JwtConfig, JwtManager, TokenResponse};
use super::user::{PendingCode, SignInRequest, SignUpRequest, User, UserRepository};
use crate::observability::Logger;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// User pool configuration
#[derive(Debug, Clone)]
pub struct UserPoolConfig {
    /// Pool name; used as the token issuer
    pub pool_name: String,

    /// Client name; used as the token audience
    pub client_name: String,

    pub password_policy: PasswordPolicy,

    /// Signing secret and token lifetime
    pub jwt_secret: String,
    pub token_ttl: Duration,

    /// Lifetime of verification and recovery codes
    pub code_ttl: Duration,
}

impl Default for UserPoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "tripstack-userpool".to_string(),
            client_name: "tripstack-client".to_string(),
            password_policy: PasswordPolicy::default(),
            jwt_secret: "CHANGE_THIS_SECRET_IN_PRODUCTION".to_string(),
            token_ttl: Duration::minutes(15),
            code_ttl: Duration::hours(24),
        }
    }
}

/// The user pool
pub struct UserPool {
    config: UserPoolConfig,
    users: Arc<dyn UserRepository>,
    delivery: Arc<dyn CodeDelivery>,
    jwt: JwtManager,
    email_pattern: Regex,
}

impl UserPool {
    pub fn new(
        config: UserPoolConfig,
        users: Arc<dyn UserRepository>,
        delivery: Arc<dyn CodeDelivery>,
    ) -> AuthResult<Self> {
        let jwt = JwtManager::new(JwtConfig {
            secret: config.jwt_secret.clone(),
            token_ttl: config.token_ttl,
            issuer: config.pool_name.clone(),
            audience: config.client_name.clone(),
        });
        let email_pattern = Regex::new(EMAIL_PATTERN)
            .map_err(|e| AuthError::StorageError(format!("email pattern: {}", e)))?;

        Ok(Self {
            config,
            users,
            delivery,
            jwt,
            email_pattern,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.pool_name
    }

    pub fn client_name(&self) -> &str {
        &self.config.client_name
    }

    /// Register a new user and send an email verification code
    pub fn sign_up(&self, request: SignUpRequest) -> AuthResult<Uuid> {
        let email = request.email.trim().to_string();
        if !self.email_pattern.is_match(&email) {
            return Err(AuthError::InvalidEmail);
        }

        if self.users.find_by_email(&email)?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let mut user = User::new(email, &request.password, &self.config.password_policy)?;
        let code = generate_code();
        user.verification = Some(PendingCode::new(&code, self.config.code_ttl));
        self.users.create(&user)?;

        self.delivery.deliver(CodeMessage::Verification {
            email: user.email.clone(),
            code,
        })?;

        let user_id = user.id.to_string();
        Logger::info("USER_SIGNED_UP", &[("pool", self.name()), ("user_id", &user_id)]);

        Ok(user.id)
    }

    /// Issue a fresh verification code for an unconfirmed user
    pub fn resend_confirmation_code(&self, email: &str) -> AuthResult<()> {
        let mut user = self
            .users
            .find_by_email(email)?
            .ok_or(AuthError::InvalidCredentials)?;
        if user.email_verified {
            return Ok(());
        }

        let code = generate_code();
        user.verification = Some(PendingCode::new(&code, self.config.code_ttl));
        self.users.update(&user)?;

        self.delivery.deliver(CodeMessage::Verification {
            email: user.email.clone(),
            code,
        })
    }

    /// Confirm an email address with the delivered code
    pub fn confirm_sign_up(&self, email: &str, code: &str) -> AuthResult<()> {
        let mut user = self
            .users
            .find_by_email(email)?
            .ok_or(AuthError::InvalidCode)?;

        user.confirm_email(code)?;
        self.users.update(&user)
    }

    /// Sign in with email and password
    pub fn sign_in(&self, request: SignInRequest) -> AuthResult<TokenResponse> {
        let user = self
            .users
            .find_by_email(request.email.trim())?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.verify_password(&request.password)? {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let token = self.jwt.issue(&user)?;
        Ok(TokenResponse::new(token, self.jwt.expiration()))
    }

    /// Start account recovery. Unknown addresses succeed silently.
    pub fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let Some(mut user) = self.users.find_by_email(email.trim())? else {
            return Ok(());
        };

        let code = generate_code();
        user.recovery = Some(PendingCode::new(&code, self.config.code_ttl));
        self.users.update(&user)?;

        self.delivery.deliver(CodeMessage::PasswordReset {
            email: user.email.clone(),
            code,
        })
    }

    /// Finish account recovery with the delivered code
    pub fn confirm_forgot_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let mut user = self
            .users
            .find_by_email(email.trim())?
            .ok_or(AuthError::InvalidCode)?;

        match &user.recovery {
            Some(pending) if pending.accepts(code) => {}
            _ => return Err(AuthError::InvalidCode),
        }

        user.update_password(new_password, &self.config.password_policy)?;
        user.recovery = None;
        self.users.update(&user)
    }

    /// Validate a token issued by this pool
    pub fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        self.jwt.validate(token)
    }
}
