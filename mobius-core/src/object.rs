//! Core object model for the function pool
//!
//! Logic artifacts are content-addressed by the digest of their
//! docstring-free canonical rendering. Variants layer a language-specific
//! docstring and naming on top of one Logic artifact.

use crate::error::{PoolError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 256-bit content hash, always displayed as 64 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the SHA-256 digest of data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hash, accepting only exactly 64 lowercase hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::parse_field("hash", hex_str)
    }

    /// Parse a hash, naming `field` in the validation error
    pub fn parse_field(field: &str, hex_str: &str) -> Result<Self> {
        if !is_hash_shaped(hex_str) {
            return Err(PoolError::invalid(
                field,
                format!("expected 64 lowercase hex characters, got {:?}", hex_str),
            ));
        }
        let bytes = hex::decode(hex_str).map_err(|e| PoolError::invalid(field, e.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// True when `s` is exactly 64 lowercase hex characters
pub fn is_hash_shaped(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl std::str::FromStr for ContentHash {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Authoring metadata attached to a Logic artifact (never hashed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Creation time, RFC 3339 UTC
    pub created: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Metadata {
    /// Metadata stamped with the current time
    pub fn now(author: impl Into<String>, email: Option<String>) -> Self {
        Self {
            created: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            author: author.into(),
            email,
        }
    }
}

/// Immutable logic artifact keyed by `hash`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logic {
    pub hash: ContentHash,
    /// Canonical rendering including the docstring (display only)
    pub code_with_doc: String,
    /// Canonical rendering without the docstring (hashed)
    pub code_without_doc: String,
    pub metadata: Metadata,
}

impl Logic {
    /// Build a Logic artifact, deriving its hash from `code_without_doc`
    pub fn new(code_with_doc: String, code_without_doc: String, metadata: Metadata) -> Self {
        Self {
            hash: ContentHash::from_data(code_without_doc.as_bytes()),
            code_with_doc,
            code_without_doc,
            metadata,
        }
    }

    /// True when the stored hash matches the docstring-free code
    pub fn is_consistent(&self) -> bool {
        ContentHash::from_data(self.code_without_doc.as_bytes()) == self.hash
    }
}

/// Language-specific overlay on one Logic artifact
///
/// Fields are declared in alphabetical order so the serialized form used for
/// hashing is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Dependency hash -> local alias used in this language's source
    pub alias_mapping: BTreeMap<ContentHash, String>,
    /// Disambiguates several variants within one language
    pub comment: String,
    pub docstring: String,
    /// Canonical designator -> original identifier
    pub name_mapping: BTreeMap<String, String>,
}

impl Variant {
    /// Digest of `(docstring, name_mapping, alias_mapping, comment)`
    pub fn hash(&self) -> Result<ContentHash> {
        let canonical =
            serde_json::to_vec(self).map_err(|e| PoolError::Serialization(e.to_string()))?;
        Ok(ContentHash::from_data(&canonical))
    }
}

/// Validate a language code (3 to 256 characters)
pub fn validate_language(lang: &str) -> Result<()> {
    let len = lang.chars().count();
    if !(3..=256).contains(&len) {
        return Err(PoolError::invalid(
            "language",
            format!("code must be 3-256 characters, got {} ({:?})", len, lang),
        ));
    }
    Ok(())
}
