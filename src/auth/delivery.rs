//! # Code Delivery
//!
//! Out-of-band delivery of verification and recovery codes.

use std::sync::RwLock;

use crate::auth::errors::{AuthError, AuthResult};
use crate::observability::Logger;

/// A code message addressed to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeMessage {
    /// Sign-up email verification
    Verification { email: String, code: String },

    /// Account recovery
    PasswordReset { email: String, code: String },
}

impl CodeMessage {
    pub fn email(&self) -> &str {
        match self {
            CodeMessage::Verification { email, .. } | CodeMessage::PasswordReset { email, .. } => {
                email
            }
        }
    }

    pub fn code(&self) -> &str {
        match self {
            CodeMessage::Verification { code, .. } | CodeMessage::PasswordReset { code, .. } => {
                code
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CodeMessage::Verification { .. } => "verification",
            CodeMessage::PasswordReset { .. } => "password_reset",
        }
    }
}

/// Delivery channel for codes
pub trait CodeDelivery: Send + Sync {
    fn deliver(&self, message: CodeMessage) -> AuthResult<()>;
}

/// Keeps delivered messages in memory
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: RwLock<Vec<CodeMessage>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code sent to `email`
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent.read().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|m| m.email() == email)
                .map(|m| m.code().to_string())
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl CodeDelivery for RecordingDelivery {
    fn deliver(&self, message: CodeMessage) -> AuthResult<()> {
        self.sent
            .write()
            .map_err(|_| AuthError::DeliveryFailed("Lock poisoned".to_string()))?
            .push(message);
        Ok(())
    }
}

/// Writes codes to the structured log; for local runs only
#[derive(Debug, Default)]
pub struct LogDelivery;

impl CodeDelivery for LogDelivery {
    fn deliver(&self, message: CodeMessage) -> AuthResult<()> {
        Logger::info(
            "AUTH_CODE_ISSUED",
            &[
                ("code", message.code()),
                ("email", message.email()),
                ("kind", message.kind()),
            ],
        );
        Ok(())
    }
}
