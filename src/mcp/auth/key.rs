//! Private key SSH authentication.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::mcp::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Public key authentication with an already parsed private key.
///
/// Parsing happens up front (see [`super::KeyParsers`]) so a malformed key is
/// reported before any network I/O.
pub struct KeyAuth {
    key: Arc<keys::PrivateKey>,
}

impl KeyAuth {
    pub fn new(key: keys::PrivateKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(self.key.clone(), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| format!("Key authentication failed: {}", e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::auth::parsers::tests::TEST_ED25519_KEY;

    #[test]
    fn test_key_auth_name() {
        let key = keys::decode_secret_key(TEST_ED25519_KEY, None).unwrap();
        assert_eq!(KeyAuth::new(key).name(), "key");
    }
}
