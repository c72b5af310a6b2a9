//! Ed25519 service keypair for signature values.
//!
//! The signature service holds one keypair and signs the canonical signing
//! digest of every issued signature with it. Verification recomputes the
//! digest and checks the Ed25519 signature against the service's verifying
//! key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// The service-held Ed25519 keypair.
pub struct SigningKeypair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct a keypair from stored secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// Short identifier for logs: hex of the first 8 public-key bytes.
    pub fn key_id_hex(&self) -> String {
        hex::encode(&self.public_key_bytes()[..8])
    }

    /// Sign a digest; returns the 64-byte signature hex-encoded.
    pub fn sign_digest(&self, digest: &[u8]) -> String {
        let signature = self.signing_key.sign(digest);
        hex::encode(signature.to_bytes())
    }

    /// Verify a hex-encoded signature over `digest`.
    ///
    /// Returns `false` for malformed hex, wrong-length signatures, and
    /// genuine verification failures alike — a signature value that cannot
    /// be checked is not a valid signature.
    pub fn verify_digest(&self, digest: &[u8], signature_hex: &str) -> bool {
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        self.verifying_key.verify(digest, &signature).is_ok()
    }
}
