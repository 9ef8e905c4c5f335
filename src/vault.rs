//! Credential vault for exchange API keys at rest.
//!
//! Credentials are sealed with AES-256-GCM under a process-wide key and
//! stored as `hex(nonce):hex(ciphertext):hex(tag)`. Tokens are
//! self-describing: everything needed to open one is in the token itself,
//! so no per-credential state is kept anywhere else.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Encryption key must be exactly {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Malformed credential token: {0}")]
    MalformedToken(String),

    #[error("Decryption failed (wrong key or corrupted token)")]
    DecryptionFailed,

    #[error("Decrypted credential is not valid UTF-8")]
    InvalidUtf8,
}

/// Reversible encryption of per-user exchange credentials.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKeyLength(key.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a byte string into a self-describing token.
    ///
    /// A fresh random nonce is drawn per call, so sealing the same
    /// plaintext twice yields different tokens.
    pub fn seal(&self, plaintext: &[u8]) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Aead::encrypt cannot fail for AES-GCM with in-memory buffers.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory data");

        // The aead crate appends the tag to the ciphertext; the token
        // format keeps them as separate fields.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(ciphertext),
            hex::encode(tag)
        )
    }

    /// Decrypt a token produced by [`seal`](Self::seal).
    pub fn open(&self, token: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 3 {
            return Err(VaultError::MalformedToken(format!(
                "expected 3 colon-separated fields, got {}",
                parts.len()
            )));
        }

        let nonce_bytes = hex::decode(parts[0])
            .map_err(|e| VaultError::MalformedToken(format!("nonce: {}", e)))?;
        let ciphertext = hex::decode(parts[1])
            .map_err(|e| VaultError::MalformedToken(format!("ciphertext: {}", e)))?;
        let tag = hex::decode(parts[2])
            .map_err(|e| VaultError::MalformedToken(format!("tag: {}", e)))?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(VaultError::MalformedToken(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(VaultError::MalformedToken(format!(
                "tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| VaultError::DecryptionFailed)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Seal a UTF-8 credential string.
    pub fn seal_str(&self, plaintext: &str) -> String {
        self.seal(plaintext.as_bytes())
    }

    /// Open a token into a UTF-8 credential string.
    ///
    /// The result is wrapped in `Zeroizing` so the plaintext is wiped
    /// from memory when dropped.
    pub fn open_str(&self, token: &str) -> Result<Zeroizing<String>, VaultError> {
        let bytes = self.open(token)?;
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::InvalidUtf8)
    }
}
