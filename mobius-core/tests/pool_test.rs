//! Pool integration tests

use mobius_core::ast::{Alias, BinOperator};
use mobius_core::resolve::read_manifest;
use mobius_core::{
    ContentHash, Expr, FunctionDef, MemoryKv, Module, Pool, PoolConfig, PoolError, PythonFrontend,
    SqliteKv, Stmt,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn memory_pool() -> Pool<MemoryKv> {
    Pool::with_store(PoolConfig::default(), MemoryKv::new(), Arc::new(PythonFrontend))
}

fn sum_unit(name: &str, a: &str, b: &str, doc: Option<&str>) -> Module {
    let mut body = Vec::new();
    if let Some(doc) = doc {
        body.push(Stmt::expr(Expr::str(doc)));
    }
    body.push(Stmt::ret(Expr::binop(
        Expr::name(a),
        BinOperator::Add,
        Expr::name(b),
    )));
    Module::new(vec![Stmt::function(FunctionDef::new(name, &[a, b], body))])
}

/// `name(x)` calling every dependency on `x` and summing the results
fn caller_unit(name: &str, deps: &[(&ContentHash, &str)]) -> Module {
    let mut body = vec![Stmt::import_from(
        "mobius.pool",
        deps.iter()
            .map(|(h, alias)| Alias::with_as(&format!("object_{}", h), alias))
            .collect(),
    )];
    let mut total = Expr::name("x");
    for (_, alias) in deps {
        total = Expr::binop(
            total,
            BinOperator::Add,
            Expr::call(Expr::name(alias), vec![Expr::name("x")]),
        );
    }
    body.push(Stmt::function(FunctionDef::new(
        name,
        &["x"],
        vec![Stmt::ret(total)],
    )));
    Module::new(body)
}

fn leaf_unit(name: &str, k: i64) -> Module {
    Module::new(vec![Stmt::function(FunctionDef::new(
        name,
        &["x"],
        vec![Stmt::ret(Expr::binop(
            Expr::name("x"),
            BinOperator::Mult,
            Expr::int(k),
        ))],
    ))])
}

#[test]
fn test_same_logic_in_two_languages() {
    let pool = memory_pool();
    let eng = pool
        .add(&sum_unit("add", "a", "b", Some("Add two numbers.")), "eng", "")
        .unwrap();
    let spa = pool
        .add(&sum_unit("suma", "x", "y", Some("Suma dos números.")), "spa", "")
        .unwrap();

    assert_eq!(eng.hash, spa.hash);
    assert!(eng.new_logic);
    assert!(!spa.new_logic);

    let hex = eng.hash.to_hex();
    assert_eq!(pool.list_languages(&hex).unwrap(), vec!["eng", "spa"]);

    let spanish = pool.load_variant(&hex, "spa", None).unwrap();
    assert_eq!(spanish.docstring, "Suma dos números.");
    assert_eq!(spanish.name_mapping["_mobius_v_0"], "suma");
    assert_eq!(spanish.name_mapping["_mobius_v_1"], "x");
    assert_eq!(spanish.name_mapping["_mobius_v_2"], "y");

    let logic = pool.load_logic(&hex).unwrap();
    assert_eq!(
        logic.code_without_doc,
        "def _mobius_v_0(_mobius_v_1, _mobius_v_2):\n    return _mobius_v_1 + _mobius_v_2"
    );
}

#[test]
fn test_docstring_invariance() {
    let pool = memory_pool();
    let plain = pool.canonicalize(&sum_unit("add", "a", "b", None)).unwrap();
    let documented = pool
        .canonicalize(&sum_unit("add", "a", "b", Some("Adds.\n\n    More detail.")))
        .unwrap();
    assert_eq!(plain.hash, documented.hash);
    assert_eq!(plain.code_without_doc, documented.code_without_doc);
    assert_ne!(plain.code_with_doc, documented.code_with_doc);
    assert_eq!(documented.docstring, "Adds.\n\nMore detail.");
}

#[test]
fn test_identifier_invariance_with_locals() {
    let unit = |f: &str, a: &str, b: &str, t: &str| {
        Module::new(vec![Stmt::function(FunctionDef::new(
            f,
            &[a, b],
            vec![
                Stmt::assign(
                    Expr::name(t),
                    Expr::binop(Expr::name(a), BinOperator::Mult, Expr::name(b)),
                ),
                Stmt::ret(Expr::binop(
                    Expr::call(Expr::name("abs"), vec![Expr::name(t)]),
                    BinOperator::Add,
                    Expr::name(a),
                )),
            ],
        ))])
    };

    let pool = memory_pool();
    let first = pool.canonicalize(&unit("area", "a", "b", "t")).unwrap();
    let second = pool.canonicalize(&unit("superficie", "x", "y", "z")).unwrap();
    assert_eq!(first.hash, second.hash);
    assert!(first.code_without_doc.contains("abs("));
    assert_eq!(first.name_mapping["_mobius_v_3"], "t");
    assert_eq!(second.name_mapping["_mobius_v_3"], "z");
}

#[test]
fn test_storage_idempotence() {
    let pool = memory_pool();
    let unit = sum_unit("add", "a", "b", Some("Add."));
    let first = pool.add(&unit, "eng", "").unwrap();
    let records = pool.store().kv().len();

    let second = pool.add(&unit, "eng", "").unwrap();
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.variant_hash, second.variant_hash);
    assert_eq!(pool.store().kv().len(), records);

    let hex = first.hash.to_hex();
    assert_eq!(pool.list_variants(&hex, "eng").unwrap().len(), 1);

    // A different comment is a distinct variant in the same language.
    pool.add(&unit, "eng", "formal").unwrap();
    let variants = pool.list_variants(&hex, "eng").unwrap();
    assert_eq!(variants.len(), 2);
    assert!(variants.iter().any(|(_, comment)| comment == "formal"));
}

#[test]
fn test_diamond_resolution() {
    let pool = memory_pool();
    let d = pool.add(&leaf_unit("double", 2), "eng", "").unwrap().hash;
    let b = pool
        .add(&caller_unit("left", &[(&d, "double")]), "eng", "")
        .unwrap()
        .hash;
    let c = pool
        .add(&caller_unit("right", &[(&d, "twice")]), "eng", "")
        .unwrap()
        .hash;
    // Both callers carry the same logic under different aliases.
    assert_eq!(b, c);

    let tripled = pool.add(&leaf_unit("triple", 3), "eng", "").unwrap().hash;
    let c = pool
        .add(
            &caller_unit("right", &[(&d, "double"), (&tripled, "triple")]),
            "eng",
            "",
        )
        .unwrap()
        .hash;
    let a = pool
        .add(&caller_unit("top", &[(&b, "left"), (&c, "right")]), "eng", "")
        .unwrap()
        .hash;

    let order = pool.resolve_dependencies(&a.to_hex()).unwrap();
    let at = |h: &ContentHash| order.iter().position(|x| x == h).unwrap();
    assert_eq!(order.iter().filter(|h| **h == d).count(), 1);
    assert!(at(&d) < at(&b));
    assert!(at(&d) < at(&c));
    assert!(at(&tripled) < at(&c));
    assert_eq!(order.last(), Some(&a));
    assert_eq!(order.len(), 5);
}

#[test]
fn test_bundle_roundtrip() {
    let temp = TempDir::new().unwrap();
    let pool = memory_pool();
    let d = pool.add(&leaf_unit("double", 2), "eng", "").unwrap().hash;
    pool.add(&leaf_unit("doble", 2), "spa", "").unwrap();
    let top = pool
        .add(&caller_unit("top", &[(&d, "double")]), "eng", "")
        .unwrap()
        .hash;
    let unrelated = pool.add(&leaf_unit("triple", 3), "eng", "").unwrap().hash;

    let dir = temp.path().join("bundle");
    let root = top.to_hex();
    let manifest = pool.bundle(&[root.as_str()], &dir).unwrap();
    assert_eq!(manifest.order, vec![d, top]);
    assert_eq!(manifest.roots, vec![top]);
    assert_eq!(read_manifest(&dir).unwrap(), manifest);

    let bundled = Pool::with_store(
        PoolConfig::with_root(&dir),
        SqliteKv::open(&dir.join("pool.db")).unwrap(),
        Arc::new(PythonFrontend),
    );
    assert_eq!(bundled.list_languages(&d.to_hex()).unwrap(), vec!["eng", "spa"]);
    assert_eq!(
        bundled.resolve_dependencies(&top.to_hex()).unwrap(),
        vec![d, top]
    );
    assert!(matches!(
        bundled.load_logic(&unrelated.to_hex()),
        Err(PoolError::NotFound(_))
    ));
    assert_eq!(bundled.verify(&d.to_hex()).unwrap(), 2);
}

#[test]
fn test_refactor_through_pool() {
    let pool = memory_pool();
    let double = pool.add(&leaf_unit("double", 2), "eng", "").unwrap().hash;
    let triple = pool.add(&leaf_unit("triple", 3), "eng", "").unwrap().hash;
    let caller = pool
        .add(&caller_unit("scale", &[(&double, "double")]), "eng", "")
        .unwrap()
        .hash;

    let refactored = pool
        .refactor(&caller.to_hex(), &double.to_hex(), &triple.to_hex())
        .unwrap();
    assert_ne!(refactored, caller);
    assert_eq!(
        pool.resolve_dependencies(&refactored.to_hex()).unwrap(),
        vec![triple, refactored]
    );

    let variant = pool.load_variant(&refactored.to_hex(), "eng", None).unwrap();
    assert_eq!(
        variant.alias_mapping,
        BTreeMap::from([(triple, "double".to_string())])
    );
    // The original is untouched.
    assert_eq!(
        pool.resolve_dependencies(&caller.to_hex()).unwrap(),
        vec![double, caller]
    );

    assert!(matches!(
        pool.refactor(&caller.to_hex(), &triple.to_hex(), &double.to_hex()),
        Err(PoolError::Validation { .. })
    ));
    assert!(matches!(
        pool.refactor(&caller.to_hex(), &double.to_hex(), "xyz"),
        Err(PoolError::Validation { .. })
    ));
}

#[test]
fn test_persistent_pool() {
    let temp = TempDir::new().unwrap();
    let config = PoolConfig::with_root(temp.path());
    config.save(temp.path()).unwrap();

    let hash = {
        let pool = Pool::open(PoolConfig::load(temp.path()).unwrap()).unwrap();
        pool.add(&sum_unit("add", "a", "b", None), "eng", "")
            .unwrap()
            .hash
    };

    let pool = Pool::open(PoolConfig::load(temp.path()).unwrap()).unwrap();
    let logic = pool.load_logic(&hash.to_hex()).unwrap();
    assert_eq!(logic.hash, hash);
    assert_eq!(logic.metadata.author, "anonymous");
}
