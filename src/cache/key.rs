//! Cache key generation.

use crate::validate::ArgumentRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub hash: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hash: hash.into(),
        }
    }

    /// Key as written to the store: `"{namespace}:{hash}"`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.namespace, self.hash)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.hash)
    }
}

/// Derives keys for one namespace.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    namespace: String,
}

impl CacheKeyGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn generate(&self, record: &ArgumentRecord) -> CacheKey {
        self.generate_from_canonical(&record.canonical_json())
    }

    /// SHA-256 over the namespace, a NUL separator and the canonical
    /// argument text, hex encoded.
    pub fn generate_from_canonical(&self, canonical: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(self.namespace.clone(), hash)
    }
}
