//! Dependency resolution, bundling and reference rewriting
//!
//! Dependencies are read back out of canonical code: every
//! `from <pool> import object_<hash>` line is one edge.

use crate::canonical::{object_name, parse_object_name};
use crate::config::{staging_path, write_atomic};
use crate::error::{PoolError, Result};
use crate::kv::{KvStore, SqliteKv};
use crate::object::{ContentHash, Logic, Metadata};
use crate::storage::{ObjectStore, SchemaVersion};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// File name of the bundled database
pub const BUNDLE_DATABASE: &str = "pool.db";

/// File name of the bundle load order
pub const BUNDLE_MANIFEST: &str = "manifest.json";

/// Written next to a bundle's database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub schema_version: u32,
    pub created: String,
    /// Hashes requested by the caller
    pub roots: Vec<ContentHash>,
    /// Every bundled function, dependencies first
    pub order: Vec<ContentHash>,
}

/// Extracts dependency edges from canonical code
#[derive(Debug, Clone)]
pub struct DependencyScanner {
    import_line: Regex,
    object: Regex,
}

impl DependencyScanner {
    pub fn new(pool_module: &str) -> Result<Self> {
        let import_line = Regex::new(&format!(
            r"(?m)^from\s+{}\s+import\s+(.+)$",
            regex::escape(pool_module)
        ))
        .map_err(|e| PoolError::invalid("pool_module", e.to_string()))?;
        let object = Regex::new(r"\bobject_[0-9a-f]{64}\b")
            .map_err(|e| PoolError::invalid("pool_module", e.to_string()))?;
        Ok(Self {
            import_line,
            object,
        })
    }

    /// Direct dependencies referenced by `code`
    pub fn scan(&self, code: &str) -> BTreeSet<ContentHash> {
        self.import_line
            .captures_iter(code)
            .filter_map(|caps| caps.get(1))
            .flat_map(|names| self.object.find_iter(names.as_str()))
            .filter_map(|m| parse_object_name(m.as_str()))
            .collect()
    }
}

/// Walks the dependency graph held in an object store
pub struct Resolver<'a, K: KvStore> {
    store: &'a ObjectStore<K>,
    scanner: DependencyScanner,
}

#[derive(Default)]
struct Walk {
    done: HashSet<ContentHash>,
    active: Vec<ContentHash>,
    order: Vec<ContentHash>,
}

impl<'a, K: KvStore> Resolver<'a, K> {
    pub fn new(store: &'a ObjectStore<K>, pool_module: &str) -> Result<Self> {
        Ok(Self {
            store,
            scanner: DependencyScanner::new(pool_module)?,
        })
    }

    /// Direct dependencies of a stored function
    pub fn dependencies(&self, hash: &ContentHash) -> Result<BTreeSet<ContentHash>> {
        let logic = self.store.load_logic(hash)?;
        Ok(self.scanner.scan(&logic.code_without_doc))
    }

    /// Transitive closure of `root`, dependencies first and `root` last
    pub fn resolve(&self, root: &ContentHash) -> Result<Vec<ContentHash>> {
        self.resolve_all(std::slice::from_ref(root))
    }

    /// Shared closure of several roots, each function listed once
    pub fn resolve_all(&self, roots: &[ContentHash]) -> Result<Vec<ContentHash>> {
        let mut walk = Walk::default();
        for root in roots {
            self.visit(*root, &mut walk)?;
        }
        tracing::debug!(
            "Resolved {} roots into {} functions",
            roots.len(),
            walk.order.len()
        );
        Ok(walk.order)
    }

    fn visit(&self, hash: ContentHash, walk: &mut Walk) -> Result<()> {
        if walk.done.contains(&hash) {
            return Ok(());
        }
        if let Some(start) = walk.active.iter().position(|h| *h == hash) {
            let mut path = walk.active[start..].to_vec();
            path.push(hash);
            return Err(PoolError::Cycle(path));
        }

        let dependencies = self.dependencies(&hash)?;
        walk.active.push(hash);
        for dep in dependencies {
            self.visit(dep, walk)?;
        }
        walk.active.pop();

        walk.done.insert(hash);
        walk.order.push(hash);
        Ok(())
    }
}

/// Copy the closure of `roots` into `<dir>/pool.db` and write `<dir>/manifest.json`
///
/// The database is built in a staging file and renamed over any earlier
/// bundle, so it holds exactly the functions listed in the manifest.
pub fn bundle<K: KvStore>(
    store: &ObjectStore<K>,
    pool_module: &str,
    roots: &[ContentHash],
    dir: &Path,
) -> Result<BundleManifest> {
    let order = Resolver::new(store, pool_module)?.resolve_all(roots)?;

    std::fs::create_dir_all(dir)?;
    let target = dir.join(BUNDLE_DATABASE);
    let staging = staging_path(&target);
    remove_database(&staging)?;

    let records = match write_bundle_database(store, &order, &staging) {
        Ok(records) => records,
        Err(e) => {
            let _ = remove_database(&staging);
            return Err(e);
        }
    };
    remove_database_journals(&target)?;
    std::fs::rename(&staging, &target)?;

    let manifest = BundleManifest {
        schema_version: SchemaVersion::CURRENT.number(),
        created: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        roots: roots.to_vec(),
        order,
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| PoolError::Serialization(e.to_string()))?;
    write_atomic(&dir.join(BUNDLE_MANIFEST), &json)?;

    tracing::info!(
        "Bundled {} functions ({} records) into {:?}",
        manifest.order.len(),
        records,
        dir
    );
    Ok(manifest)
}

fn write_bundle_database<K: KvStore>(
    store: &ObjectStore<K>,
    order: &[ContentHash],
    path: &Path,
) -> Result<usize> {
    let dest = SqliteKv::open(path)?;
    let mut records = 0;
    for hash in order {
        records += store.copy_function(hash, &dest)?;
    }
    dest.flush()?;
    drop(dest);
    remove_database_journals(path)?;
    Ok(records)
}

/// Remove a SQLite database file together with its journals
fn remove_database(path: &Path) -> Result<()> {
    remove_if_present(path)?;
    remove_database_journals(path)
}

fn remove_database_journals(path: &Path) -> Result<()> {
    for suffix in ["-wal", "-shm"] {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        remove_if_present(&PathBuf::from(name))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read a bundle's manifest
pub fn read_manifest(dir: &Path) -> Result<BundleManifest> {
    let data = std::fs::read(dir.join(BUNDLE_MANIFEST))?;
    serde_json::from_slice(&data)
        .map_err(|e| PoolError::Schema(format!("corrupt bundle manifest: {}", e)))
}

/// Replace the `from` dependency of `what` with `to`, storing the result as new logic
///
/// Every variant of `what` is copied to the new hash with its alias mapping
/// re-keyed. `what` itself is left untouched.
pub fn refactor<K: KvStore>(
    store: &ObjectStore<K>,
    pool_module: &str,
    what: &ContentHash,
    from: &ContentHash,
    to: &ContentHash,
) -> Result<ContentHash> {
    let resolver = Resolver::new(store, pool_module)?;
    if !store.has_logic(to)? {
        return Err(PoolError::NotFound(format!("function {}", to)));
    }
    if !resolver.dependencies(what)?.contains(from) {
        return Err(PoolError::invalid(
            "from",
            format!("{} does not depend on {}", what, from),
        ));
    }

    let original = store.load_logic(what)?;
    let (old_name, new_name) = (object_name(from), object_name(to));
    let rewrite = |code: &str| sort_import_lines(&code.replace(&old_name, &new_name));

    let logic = Logic::new(
        rewrite(&original.code_with_doc),
        rewrite(&original.code_without_doc),
        Metadata::now(
            original.metadata.author.clone(),
            original.metadata.email.clone(),
        ),
    );
    store.store_logic(&logic)?;

    let mut copied = 0;
    for (lang, _, mut variant) in store.variants(what)? {
        if let Some(alias) = variant.alias_mapping.remove(from) {
            variant.alias_mapping.insert(*to, alias);
        }
        store.store_variant(&logic.hash, &lang, &variant)?;
        copied += 1;
    }

    tracing::info!(
        "Refactored {} ({} -> {}) into {} with {} variants",
        what,
        from,
        to,
        logic.hash,
        copied
    );
    Ok(logic.hash)
}

/// Sort and deduplicate the leading import lines of canonical code
fn sort_import_lines(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let split = lines
        .iter()
        .position(|l| !(l.starts_with("import ") || l.starts_with("from ")))
        .unwrap_or(lines.len());
    let (imports, rest) = lines.split_at(split);
    let imports: BTreeSet<&str> = imports.iter().copied().collect();
    imports
        .into_iter()
        .chain(rest.iter().copied())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::object::Variant;

    const POOL: &str = "mobius.pool";

    /// Store a function whose canonical code imports `deps`
    fn put(store: &ObjectStore<MemoryKv>, tag: &str, deps: &[ContentHash]) -> ContentHash {
        let mut lines: Vec<String> = deps
            .iter()
            .map(|d| format!("from {} import {}", POOL, object_name(d)))
            .collect();
        lines.sort();
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("def _mobius_v_0():\n    return {:?}", tag));
        let code = lines.join("\n");
        let logic = Logic::new(code.clone(), code, Metadata::now("tester", None));
        store.store_logic(&logic).unwrap();
        logic.hash
    }

    #[test]
    fn test_scan_dependencies() {
        let a = ContentHash::from_data(b"a");
        let b = ContentHash::from_data(b"b");
        let code = format!(
            "from mobius.pool import object_{}\nfrom mobius.pool import object_{}\nimport os\n\ndef f():\n    return object_{}._mobius_v_0()",
            a, b, a
        );
        let deps = DependencyScanner::new(POOL).unwrap().scan(&code);
        assert_eq!(deps, BTreeSet::from([a, b]));

        let other = format!("from other.pool import object_{}", a);
        assert!(DependencyScanner::new(POOL).unwrap().scan(&other).is_empty());
    }

    #[test]
    fn test_diamond_resolution() {
        let store = ObjectStore::new(MemoryKv::new());
        let d = put(&store, "d", &[]);
        let b = put(&store, "b", &[d]);
        let c = put(&store, "c", &[d]);
        let a = put(&store, "a", &[b, c]);

        let order = Resolver::new(&store, POOL).unwrap().resolve(&a).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.iter().filter(|h| **h == d).count(), 1);
        let pos = |h: &ContentHash| order.iter().position(|x| x == h).unwrap();
        assert!(pos(&d) < pos(&b));
        assert!(pos(&d) < pos(&c));
        assert_eq!(*order.last().unwrap(), a);
    }

    #[test]
    fn test_leaf_resolves_to_itself() {
        let store = ObjectStore::new(MemoryKv::new());
        let leaf = put(&store, "leaf", &[]);
        let order = Resolver::new(&store, POOL).unwrap().resolve(&leaf).unwrap();
        assert_eq!(order, vec![leaf]);
    }

    #[test]
    fn test_missing_dependency_is_not_found() {
        let store = ObjectStore::new(MemoryKv::new());
        let ghost = ContentHash::from_data(b"ghost");
        let a = put(&store, "a", &[ghost]);
        let err = Resolver::new(&store, POOL).unwrap().resolve(&a).unwrap_err();
        assert!(matches!(err, PoolError::NotFound(ref m) if m.contains(&ghost.to_hex())));
    }

    #[test]
    fn test_cycle_is_rejected() {
        // Cycles cannot arise from content addressing, so forge the records.
        let store = ObjectStore::new(MemoryKv::new());
        let x = ContentHash::from_data(b"x");
        let y = ContentHash::from_data(b"y");
        let record = |me: &ContentHash, dep: &ContentHash| {
            serde_json::json!({
                "schema_version": 1,
                "hash": me.to_hex(),
                "canonical_code_with_doc": "",
                "canonical_code_without_doc": format!("from {} import {}\n\ndef f(): pass", POOL, object_name(dep)),
                "metadata": { "created": "2026-01-01T00:00:00Z", "author": "t" },
            })
            .to_string()
        };
        store
            .kv()
            .put(&crate::storage::logic_key(&x), record(&x, &y).as_bytes())
            .unwrap();
        store
            .kv()
            .put(&crate::storage::logic_key(&y), record(&y, &x).as_bytes())
            .unwrap();

        let err = Resolver::new(&store, POOL).unwrap().resolve(&x).unwrap_err();
        match err {
            PoolError::Cycle(path) => assert_eq!(path, vec![x, y, x]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_import_lines() {
        let code = "from p import b\nfrom p import a\nfrom p import a\n\ndef f():\n    pass";
        assert_eq!(
            sort_import_lines(code),
            "from p import a\nfrom p import b\n\ndef f():\n    pass"
        );
        assert_eq!(sort_import_lines("def f():\n    pass"), "def f():\n    pass");
    }

    #[test]
    fn test_rebundle_replaces_previous_contents() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(MemoryKv::new());
        let a = put(&store, "a", &[]);
        let b = put(&store, "b", &[]);
        let dir = temp.path().join("bundle");

        let first = bundle(&store, POOL, &[a], &dir).unwrap();
        assert_eq!(first.order, vec![a]);

        let second = bundle(&store, POOL, &[b], &dir).unwrap();
        assert_eq!(second.order, vec![b]);
        assert_eq!(read_manifest(&dir).unwrap(), second);

        let bundled = ObjectStore::new(SqliteKv::open(&dir.join(BUNDLE_DATABASE)).unwrap());
        assert!(bundled.has_logic(&b).unwrap());
        assert!(!bundled.has_logic(&a).unwrap());
        assert_eq!(bundled.kv().scan_prefix(b"").unwrap().len(), 1);
        assert!(!staging_path(&dir.join(BUNDLE_DATABASE)).exists());
    }

    #[test]
    fn test_failed_bundle_keeps_previous_database() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(MemoryKv::new());
        let a = put(&store, "a", &[]);
        let dir = temp.path().join("bundle");
        bundle(&store, POOL, &[a], &dir).unwrap();

        let ghost = ContentHash::from_data(b"ghost");
        assert!(matches!(
            bundle(&store, POOL, &[ghost], &dir),
            Err(PoolError::NotFound(_))
        ));
        let bundled = ObjectStore::new(SqliteKv::open(&dir.join(BUNDLE_DATABASE)).unwrap());
        assert!(bundled.has_logic(&a).unwrap());
        assert_eq!(read_manifest(&dir).unwrap().order, vec![a]);
    }

    #[test]
    fn test_refactor_rewrites_reference_and_variants() {
        let store = ObjectStore::new(MemoryKv::new());
        let old = put(&store, "old", &[]);
        let new = put(&store, "new", &[]);
        let what = put(&store, "what", &[old]);

        let mut variant = Variant {
            docstring: "Uses a helper".into(),
            ..Default::default()
        };
        variant.alias_mapping.insert(old, "helper".into());
        store.store_variant(&what, "eng", &variant).unwrap();

        let result = refactor(&store, POOL, &what, &old, &new).unwrap();
        assert_ne!(result, what);
        assert_eq!(result, put(&store, "what", &[new]));

        let resolver = Resolver::new(&store, POOL).unwrap();
        assert_eq!(resolver.dependencies(&result).unwrap(), BTreeSet::from([new]));
        assert_eq!(resolver.dependencies(&what).unwrap(), BTreeSet::from([old]));

        let copied = store.load_variant(&result, "eng", None).unwrap();
        assert_eq!(copied.alias_mapping.get(&new).map(String::as_str), Some("helper"));
        assert!(!copied.alias_mapping.contains_key(&old));
    }

    #[test]
    fn test_refactor_requires_dependency() {
        let store = ObjectStore::new(MemoryKv::new());
        let a = put(&store, "a", &[]);
        let b = put(&store, "b", &[]);
        let c = put(&store, "c", &[]);
        assert!(matches!(
            refactor(&store, POOL, &a, &b, &c),
            Err(PoolError::Validation { .. })
        ));
        let missing = ContentHash::from_data(b"missing");
        assert!(matches!(
            refactor(&store, POOL, &a, &b, &missing),
            Err(PoolError::NotFound(_))
        ));
    }
}
