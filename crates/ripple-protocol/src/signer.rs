//! HMAC signing of subscription identifier names.
//!
//! Stream subscriptions carry `{"name": ..., "integrity": ...}`
//! identifiers where `integrity` is the base64 HMAC-SHA512 of the name
//! under a server-held key. Verifying the pair proves the server
//! itself minted the name, so clients cannot subscribe to streams they
//! were never offered.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use thiserror::Error;
use tracing::warn;

type HmacSha512 = Hmac<Sha512>;

/// Size of generated signing keys in bytes.
const HASH_KEY_SIZE: usize = 32;

/// Environment variable holding the base64-encoded signing key.
pub const HASH_KEY_VAR: &str = "RIPPLE_CABLE_HASH_KEY";

/// Errors from signing configuration and verification.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("couldn't parse identifier for signed name: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("couldn't base64-decode name integrity hash: {0}")]
    Integrity(#[from] base64::DecodeError),

    #[error("signed stream name {0} failed integrity check")]
    Verification(String),

    #[error("couldn't base64-decode {HASH_KEY_VAR}: {0}")]
    Key(base64::DecodeError),
}

/// Configuration for [`Signer`].
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub hash_key: Vec<u8>,
}

impl SignerConfig {
    /// Load the signing key from the environment, generating (and
    /// logging) a random one when the variable is unset. Generated keys
    /// are not persisted; restart invalidates previously signed names.
    pub fn from_env() -> Result<Self, SignerError> {
        match std::env::var(HASH_KEY_VAR) {
            Ok(value) if !value.is_empty() => Ok(Self {
                hash_key: BASE64.decode(value).map_err(SignerError::Key)?,
            }),
            _ => {
                let mut hash_key = vec![0u8; HASH_KEY_SIZE];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut hash_key);
                warn!(
                    "{HASH_KEY_VAR} is unset; record this generated key for reuse: {}",
                    BASE64.encode(&hash_key)
                );
                Ok(Self { hash_key })
            }
        }
    }
}

/// The fields of a signed identifier.
#[derive(Deserialize)]
struct SignedName {
    #[serde(default)]
    name: String,
    #[serde(default)]
    integrity: String,
}

/// Creates and verifies subscription identifier names with an HMAC.
#[derive(Clone)]
pub struct Signer {
    config: SignerConfig,
}

impl Signer {
    /// Create a signer over the configured key.
    #[must_use]
    pub fn new(config: SignerConfig) -> Self {
        Self { config }
    }

    fn mac(&self) -> HmacSha512 {
        HmacSha512::new_from_slice(&self.config.hash_key).expect("HMAC accepts keys of any size")
    }

    /// The base64 HMAC of the name, for embedding in identifiers.
    #[must_use]
    pub fn sign(&self, name: &str) -> String {
        let mut mac = self.mac();
        mac.update(name.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Parse the identifier's `name` and `integrity` fields and verify
    /// that the integrity hash matches the name. Comparison is
    /// constant-time.
    pub fn check(&self, identifier: &str) -> Result<(), SignerError> {
        let parsed: SignedName = serde_json::from_str(identifier)?;
        let hash = BASE64.decode(&parsed.integrity)?;

        let mut mac = self.mac();
        mac.update(parsed.name.as_bytes());
        mac.verify_slice(&hash)
            .map_err(|_| SignerError::Verification(parsed.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> Signer {
        Signer::new(SignerConfig {
            hash_key: b"0123456789abcdef0123456789abcdef".to_vec(),
        })
    }

    fn identifier_for(name: &str, integrity: &str) -> String {
        serde_json::json!({ "name": name, "integrity": integrity }).to_string()
    }

    #[test]
    fn signed_names_verify() {
        let signer = test_signer();
        let signature = signer.sign("chat_room:7");
        let identifier = identifier_for("chat_room:7", &signature);
        signer.check(&identifier).unwrap();
    }

    #[test]
    fn any_bit_flip_fails_verification() {
        let signer = test_signer();
        let signature = signer.sign("chat_room:7");
        let mut raw = BASE64.decode(&signature).unwrap();
        for byte in 0..raw.len() {
            raw[byte] ^= 0x01;
            let tampered = identifier_for("chat_room:7", &BASE64.encode(&raw));
            assert!(matches!(
                signer.check(&tampered),
                Err(SignerError::Verification(_))
            ));
            raw[byte] ^= 0x01;
        }
    }

    #[test]
    fn wrong_name_fails_verification() {
        let signer = test_signer();
        let signature = signer.sign("chat_room:7");
        let identifier = identifier_for("chat_room:8", &signature);
        assert!(signer.check(&identifier).is_err());
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        let signer = test_signer();
        assert!(matches!(
            signer.check("not json"),
            Err(SignerError::Parse(_))
        ));
        assert!(matches!(
            signer.check(&identifier_for("x", "$$$not-base64$$$")),
            Err(SignerError::Integrity(_))
        ));
        // Missing fields verify against the empty name only if signed.
        assert!(signer.check("{}").is_err());
    }

    #[test]
    fn keys_differ_by_signer() {
        let other = Signer::new(SignerConfig {
            hash_key: b"ffffffffffffffffffffffffffffffff".to_vec(),
        });
        let identifier = identifier_for("chat_room:7", &test_signer().sign("chat_room:7"));
        assert!(other.check(&identifier).is_err());
    }
}
