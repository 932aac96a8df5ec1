//! Pool handle
//!
//! `Pool` ties one object store to its configuration, canonicalizer and
//! remote transport. Every operation takes the handle explicitly, so any
//! number of pools can be open in one process. Hashes arrive as text and
//! are validated before anything is looked up.

use crate::ast::Module;
use crate::canonical::{Canonical, Canonicalizer};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::frontend::{Frontend, PythonFrontend};
use crate::kv::{KvStore, SqliteKv};
use crate::object::{validate_language, ContentHash, Logic, Metadata, Variant};
use crate::remote::{classify_remote, RemoteKind, RemoteSync};
use crate::resolve::{self, BundleManifest, Resolver};
use crate::storage::{ObjectStore, SchemaVersion};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Hash and variant hash produced by [`Pool::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub hash: ContentHash,
    pub variant_hash: ContentHash,
    /// `false` when the logic was already in the pool
    pub new_logic: bool,
}

/// Outcome of [`Pool::verify_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub total: usize,
    pub valid: usize,
    /// Functions that failed verification, with the reason
    pub invalid: Vec<(ContentHash, String)>,
    /// Languages seen across the valid functions
    pub languages: BTreeSet<String>,
    /// `(function, dependency)` pairs whose dependency is not stored
    pub missing_dependencies: Vec<(ContentHash, ContentHash)>,
}

impl VerifyReport {
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty() && self.missing_dependencies.is_empty()
    }
}

pub struct Pool<K: KvStore = SqliteKv> {
    config: PoolConfig,
    store: ObjectStore<K>,
    canonicalizer: Canonicalizer,
    remote: RemoteSync,
}

impl Pool<SqliteKv> {
    /// Open the SQLite pool described by `config` with the Python front end
    pub fn open(config: PoolConfig) -> Result<Self> {
        Self::open_with_frontend(config, Arc::new(PythonFrontend))
    }

    pub fn open_with_frontend(config: PoolConfig, frontend: Arc<dyn Frontend>) -> Result<Self> {
        let kv = SqliteKv::open(&config.database_path())?;
        tracing::info!("Opened pool at {:?}", config.root);
        Ok(Self::with_store(config, kv, frontend))
    }
}

impl<K: KvStore> Pool<K> {
    /// Pool over an already opened engine
    pub fn with_store(config: PoolConfig, kv: K, frontend: Arc<dyn Frontend>) -> Self {
        let canonical_config = config.canonical_config(frontend.as_ref());
        let remote = RemoteSync::from_config(&config);
        Self {
            canonicalizer: Canonicalizer::new(canonical_config, frontend),
            store: ObjectStore::new(kv),
            remote,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore<K> {
        &self.store
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn canonicalize(&self, unit: &Module) -> Result<Canonical> {
        self.canonicalizer.canonicalize(unit)
    }

    /// Canonicalize `unit` and store its logic plus a `lang` variant
    pub fn add(&self, unit: &Module, lang: &str, comment: &str) -> Result<Added> {
        validate_language(lang)?;
        let canonical = self.canonicalize(unit)?;
        for dep in &canonical.dependencies {
            if !self.store.has_logic(dep)? {
                return Err(PoolError::NotFound(format!("dependency {}", dep)));
            }
        }

        let logic = Logic::new(
            canonical.code_with_doc.clone(),
            canonical.code_without_doc.clone(),
            self.metadata(),
        );
        let new_logic = self.store.store_logic(&logic)?;
        let variant_hash = self
            .store
            .store_variant(&canonical.hash, lang, &canonical.variant(comment))?;
        Ok(Added {
            hash: canonical.hash,
            variant_hash,
            new_logic,
        })
    }

    /// Store logic whose hash the caller already computed
    pub fn store_logic(
        &self,
        hash: &str,
        code_with_doc: &str,
        code_without_doc: &str,
        metadata: Metadata,
    ) -> Result<bool> {
        let hash = ContentHash::parse_field("hash", hash)?;
        let logic = Logic::new(
            code_with_doc.to_string(),
            code_without_doc.to_string(),
            metadata,
        );
        if logic.hash != hash {
            return Err(PoolError::invalid(
                "hash",
                format!("{} does not match the canonical code ({})", hash, logic.hash),
            ));
        }
        self.store.store_logic(&logic)
    }

    pub fn store_variant(
        &self,
        hash: &str,
        lang: &str,
        docstring: &str,
        name_mapping: BTreeMap<String, String>,
        alias_mapping: BTreeMap<ContentHash, String>,
        comment: &str,
    ) -> Result<ContentHash> {
        let hash = ContentHash::parse_field("hash", hash)?;
        let variant = Variant {
            alias_mapping,
            comment: comment.to_string(),
            docstring: docstring.to_string(),
            name_mapping,
        };
        self.store.store_variant(&hash, lang, &variant)
    }

    pub fn load_logic(&self, hash: &str) -> Result<Logic> {
        self.store.load_logic(&ContentHash::parse_field("hash", hash)?)
    }

    pub fn load_variant(&self, hash: &str, lang: &str, variant_hash: Option<&str>) -> Result<Variant> {
        let hash = ContentHash::parse_field("hash", hash)?;
        let variant_hash = variant_hash
            .map(|vh| ContentHash::parse_field("variant_hash", vh))
            .transpose()?;
        self.store.load_variant(&hash, lang, variant_hash.as_ref())
    }

    pub fn list_languages(&self, hash: &str) -> Result<Vec<String>> {
        self.store
            .list_languages(&ContentHash::parse_field("hash", hash)?)
    }

    pub fn list_variants(&self, hash: &str, lang: &str) -> Result<Vec<(ContentHash, String)>> {
        validate_language(lang)?;
        self.store
            .list_variants(&ContentHash::parse_field("hash", hash)?, lang)
    }

    pub fn detect_schema(&self, hash: &str) -> Result<Option<SchemaVersion>> {
        self.store
            .detect_schema(&ContentHash::parse_field("hash", hash)?)
    }

    pub fn verify(&self, hash: &str) -> Result<usize> {
        self.store.verify(&ContentHash::parse_field("hash", hash)?)
    }

    /// Verify every stored function and look for dependencies that do not resolve
    pub fn verify_all(&self) -> Result<VerifyReport> {
        let resolver = Resolver::new(&self.store, &self.config.pool_module)?;
        let mut report = VerifyReport::default();

        for hash in self.store.list_hashes()? {
            report.total += 1;
            if let Err(e) = self.store.verify(&hash) {
                tracing::warn!("Function {} is invalid: {}", hash, e);
                report.invalid.push((hash, e.to_string()));
                continue;
            }
            report.valid += 1;
            report.languages.extend(self.store.list_languages(&hash)?);
            for dep in resolver.dependencies(&hash)? {
                if matches!(self.store.has_logic(&dep), Ok(false)) {
                    tracing::warn!("Function {} depends on missing {}", hash, dep);
                    report.missing_dependencies.push((hash, dep));
                }
            }
        }

        tracing::info!(
            "Verified {} functions: {} valid, {} invalid, {} missing dependencies",
            report.total,
            report.valid,
            report.invalid_count(),
            report.missing_dependencies.len()
        );
        Ok(report)
    }

    /// Every function `hash` needs, dependencies first and `hash` last
    pub fn resolve_dependencies(&self, hash: &str) -> Result<Vec<ContentHash>> {
        let hash = ContentHash::parse_field("hash", hash)?;
        Resolver::new(&self.store, &self.config.pool_module)?.resolve(&hash)
    }

    pub fn bundle(&self, hashes: &[&str], dir: &Path) -> Result<BundleManifest> {
        let roots = hashes
            .iter()
            .map(|h| ContentHash::parse_field("hash", h))
            .collect::<Result<Vec<_>>>()?;
        resolve::bundle(&self.store, &self.config.pool_module, &roots, dir)
    }

    /// Point the `from` dependency of `what` at `to`; returns the new hash
    pub fn refactor(&self, what: &str, from: &str, to: &str) -> Result<ContentHash> {
        let what = ContentHash::parse_field("what", what)?;
        let from = ContentHash::parse_field("from", from)?;
        let to = ContentHash::parse_field("to", to)?;
        resolve::refactor(&self.store, &self.config.pool_module, &what, &from, &to)
    }

    pub fn classify_remote(&self, locator: &str) -> RemoteKind {
        classify_remote(locator)
    }

    pub fn sync_remote(&self, locator: &str, local: &Path) -> Result<bool> {
        self.remote.sync(locator, local)
    }

    /// Mirror directory for a named git remote
    pub fn remote_cache_path(&self, name: &str) -> std::path::PathBuf {
        self.remote.git_cache_path(name)
    }

    fn metadata(&self) -> Metadata {
        Metadata::now(
            self.config.author.name.clone(),
            self.config.author.email.clone(),
        )
    }
}
