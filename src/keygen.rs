use crate::control::auth::hash_key;
use crate::error::{CodeboxError, Result};
use rand::RngCore;
use std::path::Path;

const KEY_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

/// A master key and the material stored for it.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub key: String,
    pub salt: String,
    pub hash: String,
    /// True when the key was generated here and must be shown to the operator.
    pub key_is_new: bool,
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn generate(key: Option<String>, salt: Option<String>) -> Result<GeneratedKey> {
    let salt = salt
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| random_hex(SALT_BYTES));
    if salt.len() < 8 || salt.contains('\n') {
        return Err(CodeboxError::ConfigError {
            reason: "salt must be a single line of at least 8 bytes".to_string(),
        });
    }

    let provided = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
    let key_is_new = provided.is_none();
    let key = provided.unwrap_or_else(|| random_hex(KEY_BYTES));
    let hash = hash_key(&key, &salt)?;

    Ok(GeneratedKey {
        key,
        salt,
        hash,
        key_is_new,
    })
}

/// Write `<hash>\n<salt>`, the format read by `CredentialMaterial::from_file`.
pub fn write_key_file(path: &Path, generated: &GeneratedKey) -> Result<()> {
    std::fs::write(path, format!("{}\n{}", generated.hash, generated.salt)).map_err(|e| {
        CodeboxError::CredentialError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}
