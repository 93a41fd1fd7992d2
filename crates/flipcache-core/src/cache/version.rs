use std::fmt;

use serde::{Deserialize, Serialize};

/// Version-qualified cache store name, rendered as `<prefix>-v<version>`.
///
/// Bumping the version on deploy is the only way previously cached assets
/// get invalidated: activation deletes every store with a different name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion {
    pub prefix: String,
    pub version: u32,
}

impl CacheVersion {
    pub fn new(prefix: impl Into<String>, version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    pub fn name(&self) -> String {
        format!("{}-v{}", self.prefix, self.version)
    }

    /// Parse a store name back into a version, if it follows the convention.
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, version) = name.rsplit_once("-v")?;
        if prefix.is_empty() {
            return None;
        }
        let version = version.parse().ok()?;
        Some(Self::new(prefix, version))
    }

    /// Whether `name` is this version's store.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.name()
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.prefix, self.version)
    }
}
