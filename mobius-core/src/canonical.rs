//! Canonicalization of function units
//!
//! A unit is a module holding import statements and exactly one function
//! definition. Canonicalization produces a rendering that does not depend on
//! identifier names, import aliases, import order, docstrings or source
//! positions, and hashes it.

use crate::ast::{walk_expr, Alias, Expr, FunctionDef, Module, Stmt, StmtKind, VisitMut};
use crate::error::{PoolError, Result};
use crate::frontend::Frontend;
use crate::object::{is_hash_shaped, ContentHash, Variant};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Designator prefix used unless configured otherwise
pub const DEFAULT_DESIGNATOR_PREFIX: &str = "_mobius_v_";

/// Module name under which pool functions are imported
pub const DEFAULT_POOL_MODULE: &str = "mobius.pool";

/// Name under which a dependency is imported in canonical code
pub fn object_name(hash: &ContentHash) -> String {
    format!("object_{}", hash.to_hex())
}

/// Parse an `object_<hash>` import name
pub fn parse_object_name(name: &str) -> Option<ContentHash> {
    let hex = name.strip_prefix("object_")?;
    if is_hash_shaped(hex) {
        ContentHash::from_hex(hex).ok()
    } else {
        None
    }
}

/// Canonicalizer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalConfig {
    pub designator_prefix: String,
    pub pool_module: String,
    /// Names never renamed, supplied by the front end
    pub builtins: BTreeSet<String>,
}

impl CanonicalConfig {
    /// Defaults for a front end
    pub fn for_frontend(frontend: &dyn Frontend) -> Self {
        Self {
            designator_prefix: DEFAULT_DESIGNATOR_PREFIX.to_string(),
            pool_module: DEFAULT_POOL_MODULE.to_string(),
            builtins: frontend.builtins(),
        }
    }

    /// The `n`th canonical designator
    pub fn designator(&self, n: usize) -> String {
        format!("{}{}", self.designator_prefix, n)
    }
}

/// Result of canonicalizing one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub hash: ContentHash,
    pub code_with_doc: String,
    pub code_without_doc: String,
    pub docstring: String,
    /// Designator -> original identifier
    pub name_mapping: BTreeMap<String, String>,
    /// Dependency hash -> local alias
    pub alias_mapping: BTreeMap<ContentHash, String>,
    /// Every pool function this unit imports
    pub dependencies: BTreeSet<ContentHash>,
}

impl Canonical {
    /// Variant overlay carrying this unit's naming and docstring
    pub fn variant(&self, comment: impl Into<String>) -> Variant {
        Variant {
            alias_mapping: self.alias_mapping.clone(),
            comment: comment.into(),
            docstring: self.docstring.clone(),
            name_mapping: self.name_mapping.clone(),
        }
    }
}

pub struct Canonicalizer {
    config: CanonicalConfig,
    frontend: Arc<dyn Frontend>,
}

impl Canonicalizer {
    pub fn new(config: CanonicalConfig, frontend: Arc<dyn Frontend>) -> Self {
        Self { config, frontend }
    }

    pub fn config(&self) -> &CanonicalConfig {
        &self.config
    }

    pub fn frontend(&self) -> &dyn Frontend {
        self.frontend.as_ref()
    }

    /// Canonicalize a unit
    pub fn canonicalize(&self, unit: &Module) -> Result<Canonical> {
        let mut unit = unit.clone();
        unit.strip_positions();

        let (imports, function) = split_unit(unit)?;
        let PoolImports {
            mut imports,
            alias_mapping,
            alias_targets,
            dependencies,
        } = self.rewrite_pool_imports(imports)?;
        self.sort_imports(&mut imports);

        let (docstring, function_without_doc) = split_docstring(&function);
        let aliases: BTreeSet<String> = alias_targets.keys().cloned().collect();
        let (forward, name_mapping) = self.name_mapping(&function, &imports, &aliases);

        let call_target = self.config.designator(0);

        let render = |def: FunctionDef| {
            let mut stmt = Stmt::function(def);
            let mut rewriter = Rewriter {
                forward: &forward,
                aliases: &alias_targets,
                call_target: &call_target,
            };
            rewriter.visit_stmt(&mut stmt);
            let mut body = imports.clone();
            body.push(stmt);
            self.frontend.render(&Module::new(body))
        };
        let code_with_doc = render(function);
        let code_without_doc = render(function_without_doc);
        let hash = ContentHash::from_data(code_without_doc.as_bytes());

        tracing::debug!(
            "Canonicalized {} ({} names, {} dependencies)",
            hash,
            name_mapping.len(),
            dependencies.len()
        );

        Ok(Canonical {
            hash,
            code_with_doc,
            code_without_doc,
            docstring,
            name_mapping,
            alias_mapping,
            dependencies,
        })
    }

    /// Rewrite `from <pool> import object_<h> as alias` into `from <pool> import object_<h>`
    fn rewrite_pool_imports(&self, imports: Vec<Stmt>) -> Result<PoolImports> {
        let mut out = Vec::with_capacity(imports.len());
        let mut aliases = BTreeMap::new();
        let mut alias_targets = HashMap::new();
        let mut dependencies = BTreeSet::new();

        for stmt in imports {
            let names = match &stmt.kind {
                StmtKind::ImportFrom {
                    module: Some(module),
                    names,
                    level: 0,
                } if *module == self.config.pool_module => Some(names.clone()),
                _ => None,
            };
            let Some(names) = names else {
                out.push(stmt);
                continue;
            };

            for alias in names {
                let hash = parse_object_name(&alias.name).ok_or_else(|| {
                    PoolError::invalid(
                        "import",
                        format!(
                            "{} imports {:?}, expected object_<hash>",
                            self.config.pool_module, alias.name
                        ),
                    )
                })?;
                if let Some(asname) = &alias.asname {
                    // the variant records the first alias of each dependency
                    aliases.entry(hash).or_insert_with(|| asname.clone());
                    alias_targets.insert(asname.clone(), object_name(&hash));
                }
                dependencies.insert(hash);
                out.push(Stmt::import_from(
                    &self.config.pool_module,
                    vec![Alias::new(&object_name(&hash))],
                ));
            }
        }
        Ok(PoolImports {
            imports: out,
            alias_mapping: aliases,
            alias_targets,
            dependencies,
        })
    }

    /// Order imports by rendered text and drop exact duplicates
    fn sort_imports(&self, imports: &mut Vec<Stmt>) {
        let mut keyed: Vec<(String, Stmt)> = imports
            .drain(..)
            .map(|stmt| {
                let key = self.frontend.render(&Module::new(vec![stmt.clone()]));
                (key, stmt)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        imports.extend(keyed.into_iter().map(|(_, stmt)| stmt));
    }

    /// Forward (original -> designator) and reverse (designator -> original) maps
    fn name_mapping(
        &self,
        function: &FunctionDef,
        imports: &[Stmt],
        aliases: &BTreeSet<String>,
    ) -> (HashMap<String, String>, BTreeMap<String, String>) {
        let imported: BTreeSet<String> = imports
            .iter()
            .flat_map(|stmt| match &stmt.kind {
                StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => names.as_slice(),
                _ => &[][..],
            })
            .map(|a| a.bound_name().to_string())
            .collect();

        let mut collector = NameCollector::default();
        let mut scratch = Stmt::function(function.clone());
        collector.visit_stmt(&mut scratch);

        let free: BTreeSet<String> = collector
            .names
            .into_iter()
            .filter(|n| {
                n != &function.name
                    && !imported.contains(n)
                    && !self.config.builtins.contains(n)
                    && !aliases.contains(n)
            })
            .collect();

        let mut forward = HashMap::new();
        let mut reverse = BTreeMap::new();
        for (i, name) in std::iter::once(&function.name).chain(free.iter()).enumerate() {
            let designator = self.config.designator(i);
            forward.insert(name.clone(), designator.clone());
            reverse.insert(designator, name.clone());
        }
        (forward, reverse)
    }
}

/// Imports after pool references are put in canonical form
struct PoolImports {
    imports: Vec<Stmt>,
    /// Dependency hash -> first local alias
    alias_mapping: BTreeMap<ContentHash, String>,
    /// Every local alias -> `object_<hash>`
    alias_targets: HashMap<String, String>,
    dependencies: BTreeSet<ContentHash>,
}

/// Separate imports from the single function definition
fn split_unit(unit: Module) -> Result<(Vec<Stmt>, FunctionDef)> {
    let mut imports = Vec::new();
    let mut function = None;

    for stmt in unit.body {
        if stmt.is_import() {
            imports.push(stmt);
            continue;
        }
        match stmt.kind {
            StmtKind::FunctionDef(def) => {
                if function.is_some() {
                    return Err(PoolError::invalid(
                        "unit",
                        "only one function definition is allowed",
                    ));
                }
                function = Some(def);
            }
            other => {
                return Err(PoolError::invalid(
                    "unit",
                    format!(
                        "only imports and one function definition are allowed at top level, found {}",
                        stmt_label(&other)
                    ),
                ));
            }
        }
    }

    let function =
        function.ok_or_else(|| PoolError::invalid("unit", "no function definition found"))?;
    Ok((imports, function))
}

fn stmt_label(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::FunctionDef(_) => "function definition",
        StmtKind::Return(_) => "return",
        StmtKind::Assign { .. } => "assignment",
        StmtKind::AugAssign { .. } => "augmented assignment",
        StmtKind::Expr(_) => "expression",
        StmtKind::If { .. } => "if statement",
        StmtKind::For { .. } => "for loop",
        StmtKind::While { .. } => "while loop",
        StmtKind::Raise(_) => "raise",
        StmtKind::Pass => "pass",
        StmtKind::Break => "break",
        StmtKind::Continue => "continue",
        StmtKind::Import(_) | StmtKind::ImportFrom { .. } => "import",
    }
}

/// Split off the leading docstring, returning it cleaned and a copy without it
fn split_docstring(function: &FunctionDef) -> (String, FunctionDef) {
    let mut without = function.clone();
    match function.docstring() {
        Some(doc) => {
            without.body.remove(0);
            (clean_docstring(doc), without)
        }
        None => (String::new(), without),
    }
}

/// Strip the common indentation and surrounding blank lines of a docstring
pub fn clean_docstring(doc: &str) -> String {
    let lines: Vec<&str> = doc.lines().collect();
    let Some((first, rest)) = lines.split_first() else {
        return String::new();
    };

    let margin = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<&str> = vec![first.trim_start()];
    // blank lines may be shorter than the margin
    cleaned.extend(rest.iter().map(|l| l.get(margin..).unwrap_or_else(|| l.trim_start())));

    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    let start = cleaned
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(cleaned.len());
    cleaned[start..].join("\n")
}

/// Collects every identifier bound or referenced in a function
#[derive(Default)]
struct NameCollector {
    names: BTreeSet<String>,
}

impl VisitMut for NameCollector {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::Name(id) = expr {
            self.names.insert(id.clone());
        }
        walk_expr(self, expr);
    }

    fn visit_binding(&mut self, name: &mut String) {
        self.names.insert(name.clone());
    }
}

/// Applies alias call rewriting and designator renaming
struct Rewriter<'a> {
    forward: &'a HashMap<String, String>,
    /// alias -> `object_<hash>`
    aliases: &'a HashMap<String, String>,
    call_target: &'a str,
}

impl VisitMut for Rewriter<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::Name(id) = expr {
            if let Some(object) = self.aliases.get(id.as_str()) {
                *expr = Expr::attr(Expr::Name(object.clone()), self.call_target);
                return;
            }
            if let Some(designator) = self.forward.get(id.as_str()) {
                *id = designator.clone();
            }
            return;
        }
        walk_expr(self, expr);
    }

    fn visit_binding(&mut self, name: &mut String) {
        if let Some(designator) = self.forward.get(name.as_str()) {
            *name = designator.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOperator, Constant, Param};
    use crate::frontend::PythonFrontend;

    fn canonicalizer() -> Canonicalizer {
        let frontend: Arc<dyn Frontend> = Arc::new(PythonFrontend);
        Canonicalizer::new(CanonicalConfig::for_frontend(frontend.as_ref()), frontend)
    }

    fn binary(name: &str, a: &str, b: &str, doc: Option<&str>) -> Module {
        let mut body = Vec::new();
        if let Some(doc) = doc {
            body.push(Stmt::expr(Expr::str(doc)));
        }
        body.push(Stmt::ret(Expr::binop(Expr::name(a), BinOperator::Add, Expr::name(b))));
        Module::new(vec![Stmt::function(FunctionDef::new(name, &[a, b], body))])
    }

    #[test]
    fn test_canonical_rendering() {
        let c = canonicalizer()
            .canonicalize(&binary("add", "a", "b", Some("Add two numbers")))
            .unwrap();
        assert_eq!(
            c.code_without_doc,
            "def _mobius_v_0(_mobius_v_1, _mobius_v_2):\n    return _mobius_v_1 + _mobius_v_2"
        );
        assert_eq!(
            c.code_with_doc,
            "def _mobius_v_0(_mobius_v_1, _mobius_v_2):\n    \"\"\"Add two numbers\"\"\"\n    return _mobius_v_1 + _mobius_v_2"
        );
        assert_eq!(c.docstring, "Add two numbers");
        assert_eq!(c.hash, ContentHash::from_data(c.code_without_doc.as_bytes()));
        assert_eq!(c.name_mapping["_mobius_v_0"], "add");
        assert_eq!(c.name_mapping["_mobius_v_1"], "a");
        assert_eq!(c.name_mapping["_mobius_v_2"], "b");
    }

    #[test]
    fn test_renaming_and_docstrings_do_not_change_hash() {
        let canon = canonicalizer();
        let add = canon
            .canonicalize(&binary("add", "a", "b", Some("Add two numbers")))
            .unwrap();
        let suma = canon
            .canonicalize(&binary("suma", "x", "y", Some("Suma dos números")))
            .unwrap();
        let bare = canon.canonicalize(&binary("plus", "p", "q", None)).unwrap();
        assert_eq!(add.hash, suma.hash);
        assert_eq!(add.hash, bare.hash);
        assert_eq!(suma.name_mapping["_mobius_v_1"], "x");
    }

    #[test]
    fn test_designators_follow_sorted_original_names() {
        // Parameters in reverse alphabetical order still number alphabetically
        let c = canonicalizer()
            .canonicalize(&binary("f", "zeta", "alpha", None))
            .unwrap();
        assert_eq!(c.name_mapping["_mobius_v_1"], "alpha");
        assert_eq!(c.name_mapping["_mobius_v_2"], "zeta");
        assert_eq!(
            c.code_without_doc,
            "def _mobius_v_0(_mobius_v_2, _mobius_v_1):\n    return _mobius_v_2 + _mobius_v_1"
        );
    }

    #[test]
    fn test_builtins_and_imports_keep_their_names() {
        let body = vec![Stmt::ret(Expr::call(
            Expr::name("len"),
            vec![Expr::call(
                Expr::attr(Expr::name("math"), "floor"),
                vec![Expr::name("items")],
            )],
        ))];
        let unit = Module::new(vec![
            Stmt::import(vec![Alias::new("math")]),
            Stmt::function(FunctionDef::new("count", &["items"], body)),
        ]);
        let c = canonicalizer().canonicalize(&unit).unwrap();
        assert_eq!(
            c.code_without_doc,
            "import math\n\ndef _mobius_v_0(_mobius_v_1):\n    return len(math.floor(_mobius_v_1))"
        );
        assert_eq!(c.name_mapping.len(), 2);
    }

    #[test]
    fn test_pool_imports_and_alias_calls() {
        let dep = ContentHash::from_data(b"dependency");
        let body = vec![Stmt::ret(Expr::call(Expr::name("helper"), vec![Expr::name("v")]))];
        let unit = Module::new(vec![
            Stmt::import_from(
                DEFAULT_POOL_MODULE,
                vec![Alias::with_as(&object_name(&dep), "helper")],
            ),
            Stmt::function(FunctionDef::new("wrap", &["v"], body)),
        ]);
        let c = canonicalizer().canonicalize(&unit).unwrap();
        assert_eq!(
            c.code_without_doc,
            format!(
                "from mobius.pool import object_{h}\n\ndef _mobius_v_0(_mobius_v_1):\n    return object_{h}._mobius_v_0(_mobius_v_1)",
                h = dep.to_hex()
            )
        );
        assert_eq!(c.alias_mapping[&dep], "helper");
        assert!(c.dependencies.contains(&dep));
        assert!(!c.name_mapping.values().any(|n| n == "helper"));
    }

    #[test]
    fn test_alias_name_does_not_change_hash() {
        let dep = ContentHash::from_data(b"dependency");
        let unit = |alias: &str| {
            let body = vec![Stmt::ret(Expr::call(Expr::name(alias), vec![]))];
            Module::new(vec![
                Stmt::import_from(
                    DEFAULT_POOL_MODULE,
                    vec![Alias::with_as(&object_name(&dep), alias)],
                ),
                Stmt::function(FunctionDef::new("f", &[], body)),
            ])
        };
        let canon = canonicalizer();
        let a = canon.canonicalize(&unit("kawa")).unwrap();
        let b = canon.canonicalize(&unit("cafe")).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(b.alias_mapping[&dep], "cafe");
    }

    #[test]
    fn test_every_alias_of_a_dependency_is_rewritten() {
        let dep = ContentHash::from_data(b"dependency");
        let unit = |first: &str, second: &str| {
            let body = vec![Stmt::ret(Expr::binop(
                Expr::call(Expr::name(first), vec![Expr::name("v")]),
                BinOperator::Add,
                Expr::call(Expr::name(second), vec![Expr::name("v")]),
            ))];
            Module::new(vec![
                Stmt::import_from(
                    DEFAULT_POOL_MODULE,
                    vec![
                        Alias::with_as(&object_name(&dep), first),
                        Alias::with_as(&object_name(&dep), second),
                    ],
                ),
                Stmt::function(FunctionDef::new("twice", &["v"], body)),
            ])
        };
        let canon = canonicalizer();
        let two = canon.canonicalize(&unit("helper", "aide")).unwrap();
        assert_eq!(
            two.code_without_doc,
            format!(
                "from mobius.pool import object_{h}\n\ndef _mobius_v_0(_mobius_v_1):\n    return object_{h}._mobius_v_0(_mobius_v_1) + object_{h}._mobius_v_0(_mobius_v_1)",
                h = dep.to_hex()
            )
        );
        assert_eq!(two.name_mapping.len(), 2);
        assert_eq!(two.alias_mapping[&dep], "helper");

        let one = canon.canonicalize(&unit("helper", "helper")).unwrap();
        assert_eq!(one.hash, two.hash);
    }

    #[test]
    fn test_bare_hash_import_is_rejected() {
        let dep = ContentHash::from_data(b"dependency");
        let unit = Module::new(vec![
            Stmt::import_from(DEFAULT_POOL_MODULE, vec![Alias::new(&dep.to_hex())]),
            Stmt::function(FunctionDef::new("f", &[], vec![Stmt::new(StmtKind::Pass)])),
        ]);
        assert!(matches!(
            canonicalizer().canonicalize(&unit),
            Err(PoolError::Validation { ref field, .. }) if field == "import"
        ));
        assert_eq!(parse_object_name(&dep.to_hex()), None);
        assert_eq!(parse_object_name(&object_name(&dep)), Some(dep));
    }

    #[test]
    fn test_import_order_does_not_change_hash() {
        let f = || Stmt::function(FunctionDef::new("f", &[], vec![Stmt::new(StmtKind::Pass)]));
        let canon = canonicalizer();
        let a = canon
            .canonicalize(&Module::new(vec![
                Stmt::import(vec![Alias::new("os")]),
                Stmt::import(vec![Alias::new("math")]),
                f(),
            ]))
            .unwrap();
        let b = canon
            .canonicalize(&Module::new(vec![
                Stmt::import(vec![Alias::new("math")]),
                f(),
                Stmt::import(vec![Alias::new("os")]),
            ]))
            .unwrap();
        assert_eq!(a.code_without_doc, b.code_without_doc);
        assert!(a.code_without_doc.starts_with("import math\nimport os\n\ndef"));
    }

    #[test]
    fn test_rejects_bad_units() {
        let canon = canonicalizer();
        let f = || Stmt::function(FunctionDef::new("f", &[], vec![Stmt::new(StmtKind::Pass)]));

        let two = Module::new(vec![f(), f()]);
        assert!(matches!(canon.canonicalize(&two), Err(PoolError::Validation { .. })));

        let none = Module::new(vec![Stmt::import(vec![Alias::new("os")])]);
        assert!(matches!(canon.canonicalize(&none), Err(PoolError::Validation { .. })));

        let stray = Module::new(vec![Stmt::assign(Expr::name("x"), Expr::int(1)), f()]);
        assert!(matches!(canon.canonicalize(&stray), Err(PoolError::Validation { .. })));

        let bad_import = Module::new(vec![
            Stmt::import_from(DEFAULT_POOL_MODULE, vec![Alias::new("not_a_hash")]),
            f(),
        ]);
        assert!(matches!(
            canon.canonicalize(&bad_import),
            Err(PoolError::Validation { ref field, .. }) if field == "import"
        ));
    }

    #[test]
    fn test_default_values_and_lambdas_are_renamed() {
        let mut def = FunctionDef::new(
            "apply",
            &[],
            vec![Stmt::ret(Expr::call(
                Expr::Lambda {
                    params: vec![Param::new("item")],
                    body: Box::new(Expr::binop(
                        Expr::name("item"),
                        BinOperator::Mult,
                        Expr::name("scale"),
                    )),
                },
                vec![Expr::Constant(Constant::Int(2))],
            ))],
        );
        def.params.push(Param {
            name: "scale".into(),
            default: Some(Expr::int(3)),
        });
        let c = canonicalizer()
            .canonicalize(&Module::new(vec![Stmt::function(def)]))
            .unwrap();
        assert_eq!(
            c.code_without_doc,
            "def _mobius_v_0(_mobius_v_2=3):\n    return (lambda _mobius_v_1: _mobius_v_1 * _mobius_v_2)(2)"
        );
    }

    #[test]
    fn test_clean_docstring() {
        assert_eq!(clean_docstring("  Summary.\n\n    Details here.\n      More.\n    "), "Summary.\n\nDetails here.\n  More.");
        assert_eq!(clean_docstring(""), "");
        assert_eq!(clean_docstring("\n   Body\n"), "Body");
    }
}
