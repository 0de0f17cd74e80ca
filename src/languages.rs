use crate::error::{CodeboxError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// How one language is run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageEntry {
    /// Entry script name, without the `.sh` suffix.
    pub entry: String,
    /// Extension of the staged source file.
    pub ext: String,
    /// Sandbox image reference.
    pub image: String,
}

/// Immutable id → entry lookup, shared by every request.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    entries: HashMap<String, Arc<LanguageEntry>>,
}

impl LanguageTable {
    /// Load a TOML map of `"<id>" = { entry, ext, image }` tables.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CodeboxError::LanguageMapError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| CodeboxError::LanguageMapError {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let raw: HashMap<String, LanguageEntry> =
            toml::from_str(content).map_err(|e| e.to_string())?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (id, entry) in raw {
            validate(&id, &entry)?;
            entries.insert(id.trim().to_string(), Arc::new(entry));
        }
        if entries.is_empty() {
            return Err("no languages defined".to_string());
        }
        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<Arc<LanguageEntry>> {
        self.entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in display order: numeric ids first, ascending, then the rest.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LanguageEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

impl FromIterator<(String, LanguageEntry)> for LanguageTable {
    fn from_iter<I: IntoIterator<Item = (String, LanguageEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }
}

/// Entry and extension end up in host paths and mount specs.
fn validate(id: &str, entry: &LanguageEntry) -> std::result::Result<(), String> {
    if id.trim().is_empty() {
        return Err("empty language id".to_string());
    }
    for (field, value) in [("entry", &entry.entry), ("ext", &entry.ext), ("image", &entry.image)] {
        if value.is_empty() {
            return Err(format!("language {}: empty {}", id, field));
        }
    }
    for (field, value) in [("entry", &entry.entry), ("ext", &entry.ext)] {
        let plain = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !plain || value.contains("..") {
            return Err(format!("language {}: {} must be a plain file name", id, field));
        }
    }
    Ok(())
}
