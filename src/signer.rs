//! Signing abstraction
//!
//! A [`Signer`] holds key material for one identity. It authorizes calls for
//! submission and signs claim digests. Every signature it produces is tagged
//! with its [`SignatureScheme`] so a verifier can dispatch to the right
//! algorithm.

use crate::{Error, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;

/// Signature schemes the ledger accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    /// Schnorr over Ristretto25519
    Sr25519,

    /// Ed25519
    Ed25519,

    /// Recoverable secp256k1 ECDSA
    Ecdsa,
}

impl SignatureScheme {
    /// Width of a signature in this scheme (bytes)
    pub const fn signature_len(self) -> usize {
        match self {
            SignatureScheme::Sr25519 | SignatureScheme::Ed25519 => 64,
            SignatureScheme::Ecdsa => 65,
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureScheme::Sr25519 => write!(f, "Sr25519"),
            SignatureScheme::Ed25519 => write!(f, "Ed25519"),
            SignatureScheme::Ecdsa => write!(f, "Ecdsa"),
        }
    }
}

/// Scheme-tagged signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Scheme that produced the signature
    pub scheme: SignatureScheme,

    /// Raw signature bytes, exactly `scheme.signature_len()` long
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Tag raw signature bytes with their scheme, checking the width
    pub fn new(scheme: SignatureScheme, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != scheme.signature_len() {
            return Err(Error::Signing(format!(
                "{} signature must be {} bytes, got {}",
                scheme,
                scheme.signature_len(),
                bytes.len()
            )));
        }
        Ok(Self { scheme, bytes })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }
}

/// Key-holding identity
pub trait Signer: Send + Sync {
    /// Scheme of the underlying key
    fn scheme(&self) -> SignatureScheme;

    /// Public key bytes identifying this signer on the ledger
    fn public_key(&self) -> Vec<u8>;

    /// Sign arbitrary bytes
    fn sign(&self, message: &[u8]) -> Result<Signature>;
}

/// In-memory Ed25519 signer for development and testing
#[derive(Clone)]
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from a signing key
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Create a signer from raw secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(bytes))
    }

    /// Verifying (public) key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ed25519
    }

    fn public_key(&self) -> Vec<u8> {
        self.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        use ed25519_dalek::Signer as _;
        let signature = self.signing_key.sign(message);
        Signature::new(SignatureScheme::Ed25519, signature.to_bytes().to_vec())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.verifying_key().to_bytes()))
            .finish_non_exhaustive()
    }
}
