//! Command signature verification.
//!
//! Trusted keys are loaded at startup and identified by `kid`. Three
//! algorithms are accepted: Ed25519, RSA-SHA256 (PKCS#1 v1.5) and
//! HMAC-SHA256 shared secrets. Signatures travel base64-encoded.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::hmac;
use ring::signature::{UnparsedPublicKey, ED25519, RSA_PKCS1_2048_8192_SHA256};
use thiserror::Error;

/// Verification failures. Load failures are fatal at startup; verify
/// failures reject the command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no trusted key with kid '{0}'")]
    KeyNotFound(String),
    #[error("signature is not valid base64")]
    BadEncoding,
    #[error("signature verification failed")]
    Invalid,
}

/// Key material per accepted algorithm.
#[derive(Clone)]
pub enum TrustedKey {
    /// Raw 32-byte Ed25519 public key.
    Ed25519(Vec<u8>),
    /// DER-encoded RSA public key (RSAPublicKey structure).
    RsaSha256(Vec<u8>),
    /// Shared secret for HMAC-SHA256.
    Hs256(Vec<u8>),
}

impl std::fmt::Debug for TrustedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material.
        match self {
            Self::Ed25519(_) => write!(f, "TrustedKey::Ed25519"),
            Self::RsaSha256(_) => write!(f, "TrustedKey::RsaSha256"),
            Self::Hs256(_) => write!(f, "TrustedKey::Hs256"),
        }
    }
}

/// The trusted key set commands verify against.
#[derive(Debug, Default, Clone)]
pub struct TrustedKeyStore {
    keys: HashMap<String, TrustedKey>,
}

impl TrustedKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, kid: impl Into<String>, key: TrustedKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    pub fn insert(&mut self, kid: impl Into<String>, key: TrustedKey) {
        self.keys.insert(kid.into(), key);
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Verify `signature_b64` over `message` with the key named `kid`.
    pub fn verify(
        &self,
        kid: &str,
        message: &[u8],
        signature_b64: &str,
    ) -> Result<(), SignatureError> {
        let key = self
            .keys
            .get(kid)
            .ok_or_else(|| SignatureError::KeyNotFound(kid.to_string()))?;
        let signature = BASE64
            .decode(signature_b64)
            .map_err(|_| SignatureError::BadEncoding)?;

        match key {
            TrustedKey::Ed25519(public) => UnparsedPublicKey::new(&ED25519, public)
                .verify(message, &signature)
                .map_err(|_| SignatureError::Invalid),
            TrustedKey::RsaSha256(public) => {
                UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, public)
                    .verify(message, &signature)
                    .map_err(|_| SignatureError::Invalid)
            }
            TrustedKey::Hs256(secret) => {
                let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
                hmac::verify(&key, message, &signature).map_err(|_| SignatureError::Invalid)
            }
        }
    }
}

/// HMAC-SHA256 signer counterpart, used by issuers and tests.
pub fn sign_hs256(secret: &[u8], message: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    BASE64.encode(hmac::sign(&key, message).as_ref())
}

/// Ed25519 signer counterpart over a PKCS#8 v2 keypair document.
pub fn sign_ed25519(pkcs8: &[u8], message: &[u8]) -> Result<String, SignatureError> {
    let pair = ring::signature::Ed25519KeyPair::from_pkcs8(pkcs8)
        .map_err(|_| SignatureError::Invalid)?;
    Ok(BASE64.encode(pair.sign(message).as_ref()))
}

/// Generate an Ed25519 keypair, returning `(pkcs8_document, public_key)`.
pub fn generate_ed25519() -> Result<(Vec<u8>, Vec<u8>), SignatureError> {
    use ring::signature::KeyPair;
    let rng = ring::rand::SystemRandom::new();
    let document = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| SignatureError::Invalid)?;
    let pair = ring::signature::Ed25519KeyPair::from_pkcs8(document.as_ref())
        .map_err(|_| SignatureError::Invalid)?;
    Ok((document.as_ref().to_vec(), pair.public_key().as_ref().to_vec()))
}
