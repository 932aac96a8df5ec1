//! Schema-versioned object store
//!
//! Records live in an ordered key-value store under tuple-encoded keys:
//!
//! - `("code", <hash>)` holds a Logic record
//! - `("mapping", <hash>, <language>, <variant_hash>)` holds a Variant record
//!
//! Hashes appear in keys as their 64-character hex form, so every variant of
//! a function, and every variant of a function in one language, is a
//! contiguous key range.

use crate::error::{PoolError, Result};
use crate::kv::KvStore;
use crate::object::{validate_language, ContentHash, Logic, Metadata, Variant};
use crate::tuple::{self, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LOGIC_TAG: &str = "code";
const VARIANT_TAG: &str = "mapping";

/// Storage schema versions this build can read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// JSON records under tuple-encoded keys
    V1,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V1;

    pub fn number(self) -> u32 {
        match self {
            SchemaVersion::V1 => 1,
        }
    }

    pub fn from_number(n: u32) -> Result<Self> {
        match n {
            1 => Ok(SchemaVersion::V1),
            other => Err(PoolError::Schema(format!(
                "unsupported schema version {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LogicRecord {
    schema_version: u32,
    hash: ContentHash,
    canonical_code_with_doc: String,
    canonical_code_without_doc: String,
    metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VariantRecord {
    schema_version: u32,
    hash: ContentHash,
    language: String,
    variant_hash: ContentHash,
    docstring: String,
    name_mapping: BTreeMap<String, String>,
    alias_mapping: BTreeMap<ContentHash, String>,
    comment: String,
}

impl VariantRecord {
    fn into_variant(self) -> Variant {
        Variant {
            alias_mapping: self.alias_mapping,
            comment: self.comment,
            docstring: self.docstring,
            name_mapping: self.name_mapping,
        }
    }
}

/// Only the version field, read before choosing a decoder
#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

/// Key of the Logic record for `hash`
pub fn logic_key(hash: &ContentHash) -> Vec<u8> {
    tuple::encode(&[Value::from(LOGIC_TAG), Value::from(hash.to_hex())])
}

/// Key of one Variant record
pub fn variant_key(hash: &ContentHash, lang: &str, variant: &ContentHash) -> Vec<u8> {
    tuple::encode(&[
        Value::from(VARIANT_TAG),
        Value::from(hash.to_hex()),
        Value::from(lang),
        Value::from(variant.to_hex()),
    ])
}

/// Key prefix of every variant of `hash`, optionally narrowed to one language
pub fn variant_prefix(hash: &ContentHash, lang: Option<&str>) -> Vec<u8> {
    let mut parts = vec![Value::from(VARIANT_TAG), Value::from(hash.to_hex())];
    if let Some(lang) = lang {
        parts.push(Value::from(lang));
    }
    tuple::encode(&parts)
}

/// Language and variant hash encoded in a variant key
fn parse_variant_key(key: &[u8]) -> Result<(String, ContentHash)> {
    let values = tuple::decode(key)?;
    match values.as_slice() {
        [Value::Str(tag), Value::Str(_), Value::Str(lang), Value::Str(vh)] if tag == VARIANT_TAG => {
            Ok((lang.clone(), ContentHash::from_hex(vh)?))
        }
        _ => Err(PoolError::Schema(format!(
            "malformed variant key {}",
            hex::encode(key)
        ))),
    }
}

/// Function hash encoded in a logic key
fn parse_logic_key(key: &[u8]) -> Result<ContentHash> {
    let values = tuple::decode(key)?;
    match values.as_slice() {
        [Value::Str(tag), Value::Str(h)] if tag == LOGIC_TAG => ContentHash::from_hex(h),
        _ => Err(PoolError::Schema(format!(
            "malformed logic key {}",
            hex::encode(key)
        ))),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PoolError::Serialization(e.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| PoolError::Schema(format!("corrupt {} record: {}", what, e)))
}

/// Logic and Variant persistence over a [`KvStore`]
pub struct ObjectStore<K: KvStore> {
    kv: K,
}

impl<K: KvStore> ObjectStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Schema version of the Logic record for `hash`, `None` when absent
    pub fn detect_schema(&self, hash: &ContentHash) -> Result<Option<SchemaVersion>> {
        let Some(bytes) = self.kv.get(&logic_key(hash))? else {
            tracing::debug!("No logic record for {}", hash);
            return Ok(None);
        };
        let probe: VersionProbe = from_json(&bytes, "logic")?;
        SchemaVersion::from_number(probe.schema_version).map(Some)
    }

    pub fn has_logic(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self.detect_schema(hash)?.is_some())
    }

    /// Store a Logic artifact; returns `false` when it was already present
    pub fn store_logic(&self, logic: &Logic) -> Result<bool> {
        if !logic.is_consistent() {
            return Err(PoolError::invalid(
                "hash",
                format!("{} is not the digest of the canonical code", logic.hash),
            ));
        }

        if self.has_logic(&logic.hash)? {
            let existing = self.load_logic(&logic.hash)?;
            if existing.code_without_doc != logic.code_without_doc {
                return Err(PoolError::Schema(format!(
                    "stored logic {} differs from its canonical code",
                    logic.hash
                )));
            }
            tracing::debug!("Logic {} already stored", logic.hash);
            return Ok(false);
        }

        let record = LogicRecord {
            schema_version: SchemaVersion::CURRENT.number(),
            hash: logic.hash,
            canonical_code_with_doc: logic.code_with_doc.clone(),
            canonical_code_without_doc: logic.code_without_doc.clone(),
            metadata: logic.metadata.clone(),
        };
        self.kv.put(&logic_key(&logic.hash), &to_json(&record)?)?;
        tracing::info!("Stored logic {}", logic.hash);
        Ok(true)
    }

    /// Load a Logic artifact, dispatching on its schema version
    pub fn load_logic(&self, hash: &ContentHash) -> Result<Logic> {
        let version = self
            .detect_schema(hash)?
            .ok_or_else(|| PoolError::NotFound(format!("function {}", hash)))?;
        let bytes = self
            .kv
            .get(&logic_key(hash))?
            .ok_or_else(|| PoolError::NotFound(format!("function {}", hash)))?;

        match version {
            SchemaVersion::V1 => {
                let record: LogicRecord = from_json(&bytes, "logic")?;
                if record.hash != *hash {
                    return Err(PoolError::Schema(format!(
                        "record under {} claims hash {}",
                        hash, record.hash
                    )));
                }
                Ok(Logic {
                    hash: record.hash,
                    code_with_doc: record.canonical_code_with_doc,
                    code_without_doc: record.canonical_code_without_doc,
                    metadata: record.metadata,
                })
            }
        }
    }

    /// Store a variant of an existing function; idempotent on identical content
    pub fn store_variant(
        &self,
        hash: &ContentHash,
        lang: &str,
        variant: &Variant,
    ) -> Result<ContentHash> {
        validate_language(lang)?;
        if !self.has_logic(hash)? {
            return Err(PoolError::NotFound(format!("function {}", hash)));
        }

        let variant_hash = variant.hash()?;
        let key = variant_key(hash, lang, &variant_hash);
        if self.kv.get(&key)?.is_some() {
            tracing::debug!("Variant {} of {} ({}) already stored", variant_hash, hash, lang);
            return Ok(variant_hash);
        }

        let record = VariantRecord {
            schema_version: SchemaVersion::CURRENT.number(),
            hash: *hash,
            language: lang.to_string(),
            variant_hash,
            docstring: variant.docstring.clone(),
            name_mapping: variant.name_mapping.clone(),
            alias_mapping: variant.alias_mapping.clone(),
            comment: variant.comment.clone(),
        };
        self.kv.put(&key, &to_json(&record)?)?;
        tracing::info!("Stored variant {} of {} ({})", variant_hash, hash, lang);
        Ok(variant_hash)
    }

    /// Load one variant; without `variant_hash` the first in key order is used
    pub fn load_variant(
        &self,
        hash: &ContentHash,
        lang: &str,
        variant_hash: Option<&ContentHash>,
    ) -> Result<Variant> {
        validate_language(lang)?;
        let bytes = match variant_hash {
            Some(vh) => self.kv.get(&variant_key(hash, lang, vh))?,
            None => self
                .kv
                .scan_prefix(&variant_prefix(hash, Some(lang)))?
                .into_iter()
                .next()
                .map(|(_, v)| v),
        };
        let bytes = bytes.ok_or_else(|| match variant_hash {
            Some(vh) => PoolError::NotFound(format!("variant {} of {} in {}", vh, hash, lang)),
            None => PoolError::NotFound(format!("language {} for function {}", lang, hash)),
        })?;
        Ok(self.decode_variant(&bytes)?.into_variant())
    }

    fn decode_variant(&self, bytes: &[u8]) -> Result<VariantRecord> {
        let probe: VersionProbe = from_json(bytes, "variant")?;
        match SchemaVersion::from_number(probe.schema_version)? {
            SchemaVersion::V1 => from_json(bytes, "variant"),
        }
    }

    /// Languages with at least one variant of `hash`, in key order
    pub fn list_languages(&self, hash: &ContentHash) -> Result<Vec<String>> {
        let mut languages: Vec<String> = Vec::new();
        for (key, _) in self.kv.scan_prefix(&variant_prefix(hash, None))? {
            let (lang, _) = parse_variant_key(&key)?;
            if languages.last() != Some(&lang) {
                languages.push(lang);
            }
        }
        Ok(languages)
    }

    /// `(variant_hash, comment)` for each variant of `hash` in `lang`
    pub fn list_variants(&self, hash: &ContentHash, lang: &str) -> Result<Vec<(ContentHash, String)>> {
        validate_language(lang)?;
        self.kv
            .scan_prefix(&variant_prefix(hash, Some(lang)))?
            .into_iter()
            .map(|(key, value)| {
                let (_, variant_hash) = parse_variant_key(&key)?;
                let record = self.decode_variant(&value)?;
                Ok((variant_hash, record.comment))
            })
            .collect()
    }

    /// Every variant of `hash` as `(language, variant_hash, variant)`
    pub fn variants(&self, hash: &ContentHash) -> Result<Vec<(String, ContentHash, Variant)>> {
        self.kv
            .scan_prefix(&variant_prefix(hash, None))?
            .into_iter()
            .map(|(key, value)| {
                let (lang, variant_hash) = parse_variant_key(&key)?;
                Ok((lang, variant_hash, self.decode_variant(&value)?.into_variant()))
            })
            .collect()
    }

    /// Recompute the digests of a stored function and its variants
    ///
    /// A function needs at least one variant, and every variant record must
    /// agree with the key it is stored under. Returns the number of variants
    /// checked.
    pub fn verify(&self, hash: &ContentHash) -> Result<usize> {
        let logic = self.load_logic(hash)?;
        if !logic.is_consistent() {
            return Err(PoolError::Schema(format!(
                "logic {} does not match its canonical code",
                hash
            )));
        }

        let entries = self.kv.scan_prefix(&variant_prefix(hash, None))?;
        if entries.is_empty() {
            return Err(PoolError::Schema(format!(
                "function {} has no language variant",
                hash
            )));
        }
        for (key, value) in &entries {
            let (lang, variant_hash) = parse_variant_key(key)?;
            let record = self.decode_variant(value)?;
            if record.hash != *hash
                || record.language != lang
                || record.variant_hash != variant_hash
            {
                return Err(PoolError::Schema(format!(
                    "variant record under ({}, {}, {}) claims ({}, {}, {})",
                    hash, lang, variant_hash, record.hash, record.language, record.variant_hash
                )));
            }
            let actual = record.into_variant().hash()?;
            if actual != variant_hash {
                return Err(PoolError::Schema(format!(
                    "variant {} of {} ({}) hashes to {}",
                    variant_hash, hash, lang, actual
                )));
            }
        }
        tracing::debug!("Verified {} with {} variants", hash, entries.len());
        Ok(entries.len())
    }

    /// Hash of every stored function, in key order
    pub fn list_hashes(&self) -> Result<Vec<ContentHash>> {
        let prefix = tuple::encode(&[Value::from(LOGIC_TAG)]);
        self.kv
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| parse_logic_key(&key))
            .collect()
    }

    /// Copy the raw Logic and Variant records of `hash` into `dest`
    ///
    /// Returns the number of records copied.
    pub fn copy_function<D: KvStore + ?Sized>(&self, hash: &ContentHash, dest: &D) -> Result<usize> {
        let key = logic_key(hash);
        let logic = self
            .kv
            .get(&key)?
            .ok_or_else(|| PoolError::NotFound(format!("function {}", hash)))?;
        dest.put(&key, &logic)?;

        let mut copied = 1;
        for (key, value) in self.kv.scan_prefix(&variant_prefix(hash, None))? {
            dest.put(&key, &value)?;
            copied += 1;
        }
        Ok(copied)
    }
}
