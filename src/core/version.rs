//! Store-version naming.
//!
//! Every materialized version of a store is addressed by a resource name of
//! the form `<store>_v<n>`. The same convention names the per-version push
//! topics on the write side, so the parser here is used by both the admin
//! consumer (kill-push operations name their target by topic) and the read
//! path (requests name a versioned resource).

use crate::core::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};

/// Separator between the store name and the version number.
const VERSION_SEPARATOR: &str = "_v";

/// A parsed `<store>_v<n>` resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreVersion {
    /// Store name. May itself contain underscores.
    pub store: String,
    /// Version number.
    pub version: u32,
}

impl StoreVersion {
    pub fn new(store: impl Into<String>, version: u32) -> Self {
        Self {
            store: store.into(),
            version,
        }
    }

    /// Parse a `<store>_v<n>` resource name.
    ///
    /// The version suffix is the last `_v<digits>` occurrence, so store
    /// names containing `_v` in the middle still parse correctly.
    pub fn parse(name: &str) -> StrataResult<Self> {
        let idx = name
            .rfind(VERSION_SEPARATOR)
            .ok_or_else(|| StrataError::InvalidStoreVersion { name: name.into() })?;
        let (store, suffix) = name.split_at(idx);
        let version = suffix[VERSION_SEPARATOR.len()..]
            .parse::<u32>()
            .map_err(|_| StrataError::InvalidStoreVersion { name: name.into() })?;
        if store.is_empty() {
            return Err(StrataError::InvalidStoreVersion { name: name.into() });
        }
        Ok(Self {
            store: store.to_string(),
            version,
        })
    }

    /// The `<store>_v<n>` resource name.
    pub fn resource_name(&self) -> String {
        format!("{}{}{}", self.store, VERSION_SEPARATOR, self.version)
    }
}

impl std::fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.store, VERSION_SEPARATOR, self.version)
    }
}

/// Extract the store name from a `<store>_v<n>` resource or topic name.
pub fn store_from_resource_name(name: &str) -> StrataResult<String> {
    StoreVersion::parse(name).map(|v| v.store)
}
