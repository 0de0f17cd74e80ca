use crate::error::{CodeboxError, Result};
use arc_swap::ArcSwapOption;
use argon2::{Algorithm, Argon2, Params, Version};
use std::path::Path;
use std::sync::Arc;

const HASH_PASSES: u32 = 1;
const HASH_MEMORY_KIB: u32 = 4096;
const HASH_LANES: u32 = 1;
const HASH_LEN: usize = 32;
const MIN_SALT_LEN: usize = 8;

/// Stored `(hash, salt)` pair from the key file. Loaded once.
#[derive(Debug, Clone)]
pub struct CredentialMaterial {
    hash_hex: String,
    salt: String,
}

impl CredentialMaterial {
    pub fn new(hash_hex: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            hash_hex: hash_hex.into().trim().to_ascii_lowercase(),
            salt: salt.into(),
        }
    }

    /// Parse a key file of the form `<hex hash>\n<salt>`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CodeboxError::CredentialError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| CodeboxError::CredentialError {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, &'static str> {
        let mut lines = content.lines();
        let hash = lines.next().map(str::trim).unwrap_or_default();
        let salt = lines.next().map(|s| s.trim_end_matches('\r')).unwrap_or_default();
        if lines.any(|l| !l.trim().is_empty()) {
            return Err("expected exactly two lines: hash and salt");
        }
        if hash.len() != HASH_LEN * 2 || hex::decode(hash).is_err() {
            return Err("hash must be 64 hex characters");
        }
        if salt.len() < MIN_SALT_LEN {
            return Err("salt must be at least 8 bytes");
        }
        Ok(Self::new(hash, salt))
    }

    pub fn hash_hex(&self) -> &str {
        &self.hash_hex
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }
}

/// Argon2id digest of `key` under `salt`, hex encoded.
pub fn hash_key(key: &str, salt: &str) -> Result<String> {
    let params = Params::new(HASH_MEMORY_KIB, HASH_PASSES, HASH_LANES, Some(HASH_LEN))
        .map_err(|e| anyhow::anyhow!("argon2 params: {}", e))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; HASH_LEN];
    argon
        .hash_password_into(key.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {}", e))?;
    Ok(hex::encode(out))
}

/// Verifies presented keys, remembering the last one that passed.
#[derive(Default)]
pub struct KeyStore {
    last_good: ArcSwapOption<String>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast path: the last verified key. Slow path: a full Argon2id hash.
    pub fn check_key(&self, presented: &str, material: &CredentialMaterial) -> bool {
        if let Some(cached) = self.last_good.load().as_deref() {
            if cached.as_str() == presented {
                return true;
            }
        }

        match hash_key(presented, material.salt()) {
            Ok(hash) if hash == material.hash_hex() => {
                self.last_good.store(Some(Arc::new(presented.to_string())));
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::error!(error = %e, "Key hashing failed");
                false
            }
        }
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.last_good
            .load()
            .as_deref()
            .map(|cached| cached.as_str() == key)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "0123456789abcdef";

    fn material(key: &str) -> CredentialMaterial {
        CredentialMaterial::new(hash_key(key, SALT).unwrap(), SALT)
    }

    #[test]
    fn test_correct_key_slow_then_fast_path() {
        let material = material("s3cret-key");
        let store = KeyStore::new();

        assert!(!store.is_cached("s3cret-key"));
        assert!(store.check_key("s3cret-key", &material));
        assert!(store.is_cached("s3cret-key"));
        assert!(store.check_key("s3cret-key", &material));
    }

    #[test]
    fn test_single_character_mutations_fail() {
        let key = "s3cret-key";
        let material = material(key);
        let store = KeyStore::new();
        assert!(store.check_key(key, &material));

        for i in 0..key.len() {
            let mut bytes = key.as_bytes().to_vec();
            bytes[i] ^= 0x01;
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(!store.check_key(&mutated, &material), "accepted {}", mutated);
        }
        assert!(!store.check_key("", &material));
    }

    #[test]
    fn test_failed_check_keeps_cached_key() {
        let material = material("good");
        let store = KeyStore::new();
        assert!(store.check_key("good", &material));
        assert!(!store.check_key("bad", &material));
        assert!(store.is_cached("good"));
    }

    #[test]
    fn test_parse_key_file() {
        let hash = hash_key("k", SALT).unwrap();
        let parsed = CredentialMaterial::parse(&format!("{}\n{}", hash, SALT)).unwrap();
        assert_eq!(parsed.hash_hex(), hash);
        assert_eq!(parsed.salt(), SALT);

        assert!(CredentialMaterial::parse(&format!("{}\n{}\n", hash, SALT)).is_ok());
        assert!(CredentialMaterial::parse(&hash).is_err());
        assert!(CredentialMaterial::parse(&format!("{}\nshort", hash)).is_err());
        assert!(CredentialMaterial::parse(&format!("nothex\n{}", SALT)).is_err());
    }
}
