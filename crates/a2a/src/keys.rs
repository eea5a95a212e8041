//! Token signing and verification keys.
//!
//! One signing key mints outbound tokens; a ring of trusted verification
//! keys, indexed by `kid`, validates inbound ones. Key material is
//! immutable after load; rotation is a single-writer replace on the ring.

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use parking_lot::RwLock;
use thiserror::Error;

/// Key loading failures. Fatal at startup.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("invalid key material for '{kid}': {detail}")]
    InvalidMaterial { kid: String, detail: String },
}

/// The key this agent signs with.
pub struct SigningKey {
    pub kid: String,
    pub alg: Algorithm,
    pub(crate) encoding: EncodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// HMAC-SHA256 shared secret.
    pub fn hs256(kid: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            kid: kid.into(),
            alg: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
        }
    }

    /// Ed25519 private key in PEM (PKCS#8).
    pub fn eddsa_pem(kid: impl Into<String>, pem: &[u8]) -> Result<Self, KeyError> {
        let kid = kid.into();
        let encoding = EncodingKey::from_ed_pem(pem).map_err(|e| KeyError::InvalidMaterial {
            kid: kid.clone(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            kid,
            alg: Algorithm::EdDSA,
            encoding,
        })
    }

    /// RSA private key in PEM, signing RS256.
    pub fn rs256_pem(kid: impl Into<String>, pem: &[u8]) -> Result<Self, KeyError> {
        let kid = kid.into();
        let encoding = EncodingKey::from_rsa_pem(pem).map_err(|e| KeyError::InvalidMaterial {
            kid: kid.clone(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            kid,
            alg: Algorithm::RS256,
            encoding,
        })
    }
}

#[derive(Clone)]
struct TrustedEntry {
    alg: Algorithm,
    key: DecodingKey,
}

/// Trusted verification keys by `kid`.
#[derive(Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<String, TrustedEntry>>,
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kids: Vec<String> = self.keys.read().keys().cloned().collect();
        f.debug_struct("KeyRing").field("kids", &kids).finish()
    }
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an HMAC-SHA256 secret under `kid`.
    pub fn trust_hs256(&self, kid: impl Into<String>, secret: &[u8]) {
        self.keys.write().insert(
            kid.into(),
            TrustedEntry {
                alg: Algorithm::HS256,
                key: DecodingKey::from_secret(secret),
            },
        );
    }

    /// Trust an Ed25519 public key in PEM under `kid`.
    pub fn trust_eddsa_pem(&self, kid: impl Into<String>, pem: &[u8]) -> Result<(), KeyError> {
        let kid = kid.into();
        let key = DecodingKey::from_ed_pem(pem).map_err(|e| KeyError::InvalidMaterial {
            kid: kid.clone(),
            detail: e.to_string(),
        })?;
        self.keys.write().insert(
            kid,
            TrustedEntry {
                alg: Algorithm::EdDSA,
                key,
            },
        );
        Ok(())
    }

    /// Trust an RSA public key in PEM under `kid`, verifying RS256.
    pub fn trust_rs256_pem(&self, kid: impl Into<String>, pem: &[u8]) -> Result<(), KeyError> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| KeyError::InvalidMaterial {
            kid: kid.clone(),
            detail: e.to_string(),
        })?;
        self.keys.write().insert(
            kid,
            TrustedEntry {
                alg: Algorithm::RS256,
                key,
            },
        );
        Ok(())
    }

    /// Drop a key, e.g. after rotation.
    pub fn revoke(&self, kid: &str) {
        self.keys.write().remove(kid);
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.read().contains_key(kid)
    }

    pub(crate) fn get(&self, kid: &str) -> Option<(Algorithm, DecodingKey)> {
        self.keys
            .read()
            .get(kid)
            .map(|entry| (entry.alg, entry.key.clone()))
    }
}
