use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use overseer_core::{Error, Result};
use rand::RngCore;

const NONCE_LEN: usize = 12;

/// AES-256-GCM wrapper for credential values at rest. Sealed form is
/// `nonce || ciphertext` with a fresh random nonce per value.
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    /// Build from a base64-encoded 32-byte master key, or generate a
    /// process-local random key when none is configured.
    pub fn from_master_key(encoded: Option<&str>) -> Result<Self> {
        let key_bytes: [u8; 32] = match encoded {
            Some(encoded) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| Error::Credential(format!("invalid master key: {}", e)))?;
                decoded
                    .try_into()
                    .map_err(|_| Error::Credential("master key must be 32 bytes".to_string()))?
            }
            None => {
                let mut key = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            }
        };

        let inner = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| Error::Credential(format!("failed to build cipher: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn seal(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .inner
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Credential("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<String> {
        if sealed.len() <= NONCE_LEN {
            return Err(Error::Credential("sealed value too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .inner
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Credential("decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Credential("decrypted value is not UTF-8".to_string()))
    }
}
