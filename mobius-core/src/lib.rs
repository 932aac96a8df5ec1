//! Mobius Core Library
//!
//! Content-addressed function pool:
//! - Canonicalization of one function unit into a hash-stable form
//! - Merkle encoding of arbitrary tagged trees into quads
//! - Order-preserving tuple codec for storage keys
//! - Schema-versioned object store over ordered key-value engines
//! - Dependency resolution, bundling and reference refactoring
//! - Remote mirroring over git, file and HTTP(S)

pub mod ast;
pub mod canonical;
pub mod config;
pub mod error;
pub mod frontend;
pub mod kv;
pub mod merkle;
pub mod object;
pub mod pool;
pub mod remote;
pub mod resolve;
pub mod storage;
pub mod tuple;

pub use ast::{Expr, FunctionDef, Module, Stmt, StmtKind};
pub use canonical::{object_name, Canonical, CanonicalConfig, Canonicalizer};
pub use config::{Author, PoolConfig};
pub use error::{PoolError, Result};
pub use frontend::{Frontend, PythonFrontend};
pub use kv::{KvStore, MemoryKv, SledKv, SqliteKv};
pub use merkle::{Node, Quad};
pub use object::{ContentHash, Logic, Metadata, Variant};
pub use pool::{Added, Pool, VerifyReport};
pub use remote::{classify_remote, GitUrl, RemoteKind, RemoteSync};
pub use resolve::{BundleManifest, DependencyScanner, Resolver};
pub use storage::{ObjectStore, SchemaVersion};
pub use tuple::{TupleError, Value};
