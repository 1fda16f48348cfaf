//! Secret Vault: authenticated encryption for provider refresh tokens and
//! any other per-user secret the credential store persists.
//!
//! Keys are loaded once at startup from the environment, never from disk or
//! a key-management service — this process is deliberately simple and
//! matches the scope of the component it backs (§4.A). A missing key is
//! fatal at startup, not at first use.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    #[error("unknown encryption key: {0}")]
    UnknownKey(String),

    #[error("ciphertext decode failed: {0}")]
    Malformed(String),

    #[error("decryption failed: authentication tag mismatch or wrong key")]
    DecryptFailure,
}

/// A named AES-256-GCM cipher. Each purpose (e.g. `refresh_token`) gets its
/// own key so that rotating one secret category doesn't require
/// re-encrypting everything else.
#[derive(Clone)]
pub struct SecretVault {
    ciphers: HashMap<String, Aes256Gcm>,
}

impl SecretVault {
    /// Reads one base64-encoded 32-byte key per name from
    /// `VAULT_KEY_<NAME>` (name upper-cased). Returns an error — which
    /// callers should treat as startup-fatal — if any key is absent,
    /// malformed, or not exactly 32 bytes.
    pub fn from_env(key_names: &[&str]) -> Result<Self> {
        let mut ciphers = HashMap::with_capacity(key_names.len());
        for name in key_names {
            let env_var = format!("VAULT_KEY_{}", name.to_uppercase());
            let encoded = std::env::var(&env_var)
                .with_context(|| format!("missing required vault key env var {env_var}"))?;
            let raw = STANDARD
                .decode(encoded.trim())
                .with_context(|| format!("{env_var} is not valid base64"))?;
            if raw.len() != 32 {
                anyhow::bail!("{env_var} must decode to exactly 32 bytes, got {}", raw.len());
            }
            let key = Key::<Aes256Gcm>::from_slice(&raw);
            ciphers.insert((*name).to_string(), Aes256Gcm::new(key));
        }
        Ok(Self { ciphers })
    }

    /// Encrypts `plaintext` under the named key. Ciphertext is
    /// self-describing: `base64(nonce(12B) || AES-256-GCM(ciphertext||tag))`.
    pub fn encrypt(&self, key_name: &str, plaintext: &str) -> Result<String, VaultError> {
        let cipher = self
            .ciphers
            .get(key_name)
            .ok_or_else(|| VaultError::UnknownKey(key_name.to_string()))?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::DecryptFailure)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypts ciphertext produced by `encrypt` under the same key name.
    /// Never panics: malformed input or a tag mismatch both return
    /// `VaultError`, letting callers map it onto `ServiceError::Decrypt`.
    pub fn decrypt(&self, key_name: &str, ciphertext_b64: &str) -> Result<String, VaultError> {
        let cipher = self
            .ciphers
            .get(key_name)
            .ok_or_else(|| VaultError::UnknownKey(key_name.to_string()))?;

        let raw = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(VaultError::Malformed("ciphertext shorter than nonce".into()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptFailure)?;

        String::from_utf8(plaintext).map_err(|e| VaultError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_with_key(name: &str) -> SecretVault {
        let key = STANDARD.encode([7u8; 32]);
        std::env::set_var(format!("VAULT_KEY_{}", name.to_uppercase()), key);
        SecretVault::from_env(&[name]).unwrap()
    }

    #[test]
    fn roundtrip() {
        let vault = vault_with_key("roundtrip_token");
        let enc = vault.encrypt("roundtrip_token", "super-secret-refresh-token").unwrap();
        let dec = vault.decrypt("roundtrip_token", &enc).unwrap();
        assert_eq!(dec, "super-secret-refresh-token");
    }

    #[test]
    fn same_plaintext_different_ciphertext() {
        let vault = vault_with_key("nonce_token");
        let a = vault.encrypt("nonce_token", "same").unwrap();
        let b = vault.encrypt("nonce_token", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let vault = vault_with_key("tamper_token");
        let enc = vault.encrypt("tamper_token", "secret").unwrap();
        let mut raw = STANDARD.decode(&enc).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = STANDARD.encode(raw);
        let result = vault.decrypt("tamper_token", &tampered);
        assert!(matches!(result, Err(VaultError::DecryptFailure)));
    }

    #[test]
    fn unknown_key_name_is_rejected() {
        let vault = vault_with_key("known_token");
        let result = vault.encrypt("unknown_token", "x");
        assert!(matches!(result, Err(VaultError::UnknownKey(_))));
    }

    #[test]
    fn malformed_base64_does_not_panic() {
        let vault = vault_with_key("malformed_token");
        let result = vault.decrypt("malformed_token", "not valid base64 !!!");
        assert!(matches!(result, Err(VaultError::Malformed(_))));
    }

    #[test]
    fn from_env_fails_on_missing_key() {
        std::env::remove_var("VAULT_KEY_DEFINITELY_MISSING");
        let result = SecretVault::from_env(&["definitely_missing"]);
        assert!(result.is_err());
    }
}
