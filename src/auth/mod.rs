//! # Identity Module
//!
//! User pool (sign-up, confirmation, sign-in, recovery), bearer tokens, and
//! the identity pool that hands out the authenticated and unauthenticated
//! role classes.

pub mod crypto;
pub mod delivery;
pub mod errors;
pub mod identity;
pub mod jwt;
pub mod pool;
pub mod user;

pub use crypto::PasswordPolicy;
pub use delivery::{CodeDelivery, CodeMessage, LogDelivery, RecordingDelivery};
pub use errors::{AuthError, AuthResult};
pub use identity::{Identity, IdentityPool, IdentityProvider, RoleClass};
pub use jwt::{JwtClaims, JwtConfig, JwtManager, TokenResponse};
pub use pool::{UserPool, UserPoolConfig};
pub use user::{InMemoryUserRepository, SignInRequest, SignUpRequest, User, UserRepository};
