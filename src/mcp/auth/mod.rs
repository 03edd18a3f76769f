//! Authentication strategies for SSH connections.
//!
//! This module provides a trait-based authentication system that follows
//! the Strategy pattern, allowing new authentication methods to be added
//! without modifying existing code (Open-Closed Principle).
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key authentication; key material goes through
//!   the ordered [`KeyParsers`] registry first

mod key;
pub(crate) mod parsers;
mod password;
mod traits;

pub use key::KeyAuth;
pub use parsers::{KeyFileParser, KeyParser, KeyParsers, OpenSshParser, PemParser};
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use crate::mcp::error::ManagerError;
use crate::mcp::transport::Credential;

/// Build the strategy for `credential`, parsing key material with `parsers`.
pub fn strategy_for(
    credential: &Credential,
    parsers: &KeyParsers,
) -> Result<Box<dyn AuthStrategy>, ManagerError> {
    match credential {
        Credential::Password(password) => Ok(Box::new(PasswordAuth::new(password.clone()))),
        Credential::PrivateKey(material) => Ok(Box::new(KeyAuth::new(parsers.parse(material)?))),
    }
}
