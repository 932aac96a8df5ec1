//! Closed syntax tree for function units
//!
//! Front ends parse source into this tree; the canonicalizer rewrites it
//! through [`VisitMut`] and renders it back through a [`crate::frontend::Frontend`].
//! Every walk is an exhaustive match, so adding a node kind forces every
//! rewrite pass to handle it.

use crate::merkle::{Field, Item, Node, Scalar};

/// Source position of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

/// A parsed source unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    Return(Option<Expr>),
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOperator, value: Expr },
    Expr(Expr),
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    For { target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    Raise(Option<Expr>),
    Pass,
    Break,
    Continue,
    Import(Vec<Alias>),
    ImportFrom { module: Option<String>, names: Vec<Alias>, level: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Imported name, optionally renamed with `as`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// Name bound in the importing scope
    pub fn bound_name(&self) -> &str {
        let full = self.asname.as_deref().unwrap_or(&self.name);
        // `import a.b` binds `a`
        if self.asname.is_none() {
            full.split('.').next().unwrap_or(full)
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// `None` for `**kwargs` expansion
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Constant(Constant),
    Attribute { value: Box<Expr>, attr: String },
    Call { func: Box<Expr>, args: Vec<Expr>, keywords: Vec<Keyword> },
    BinOp { left: Box<Expr>, op: BinOperator, right: Box<Expr> },
    UnaryOp { op: UnaryOperator, operand: Box<Expr> },
    BoolOp { op: BoolOperator, values: Vec<Expr> },
    Compare { left: Box<Expr>, ops: Vec<CmpOperator>, comparators: Vec<Expr> },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
    Lambda { params: Vec<Param>, body: Box<Expr> },
    Await(Box<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    /// `None` keys are `**mapping` unpacking
    Dict { keys: Vec<Option<Expr>>, values: Vec<Expr> },
    Subscript { value: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOperator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Invert,
    UAdd,
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl BinOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOperator::Add => "+",
            BinOperator::Sub => "-",
            BinOperator::Mult => "*",
            BinOperator::MatMult => "@",
            BinOperator::Div => "/",
            BinOperator::FloorDiv => "//",
            BinOperator::Mod => "%",
            BinOperator::Pow => "**",
            BinOperator::LShift => "<<",
            BinOperator::RShift => ">>",
            BinOperator::BitOr => "|",
            BinOperator::BitXor => "^",
            BinOperator::BitAnd => "&",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinOperator::Add => "Add",
            BinOperator::Sub => "Sub",
            BinOperator::Mult => "Mult",
            BinOperator::MatMult => "MatMult",
            BinOperator::Div => "Div",
            BinOperator::FloorDiv => "FloorDiv",
            BinOperator::Mod => "Mod",
            BinOperator::Pow => "Pow",
            BinOperator::LShift => "LShift",
            BinOperator::RShift => "RShift",
            BinOperator::BitOr => "BitOr",
            BinOperator::BitXor => "BitXor",
            BinOperator::BitAnd => "BitAnd",
        }
    }
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Not => "not ",
            UnaryOperator::Invert => "~",
            UnaryOperator::UAdd => "+",
            UnaryOperator::USub => "-",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOperator::Not => "Not",
            UnaryOperator::Invert => "Invert",
            UnaryOperator::UAdd => "UAdd",
            UnaryOperator::USub => "USub",
        }
    }
}

impl BoolOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BoolOperator::And => "and",
            BoolOperator::Or => "or",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoolOperator::And => "And",
            BoolOperator::Or => "Or",
        }
    }
}

impl CmpOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOperator::Eq => "==",
            CmpOperator::NotEq => "!=",
            CmpOperator::Lt => "<",
            CmpOperator::LtE => "<=",
            CmpOperator::Gt => ">",
            CmpOperator::GtE => ">=",
            CmpOperator::Is => "is",
            CmpOperator::IsNot => "is not",
            CmpOperator::In => "in",
            CmpOperator::NotIn => "not in",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CmpOperator::Eq => "Eq",
            CmpOperator::NotEq => "NotEq",
            CmpOperator::Lt => "Lt",
            CmpOperator::LtE => "LtE",
            CmpOperator::Gt => "Gt",
            CmpOperator::GtE => "GtE",
            CmpOperator::Is => "Is",
            CmpOperator::IsNot => "IsNot",
            CmpOperator::In => "In",
            CmpOperator::NotIn => "NotIn",
        }
    }
}

// Builders used by front ends and tests.

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, pos: None }
    }

    pub fn at(kind: StmtKind, line: u32, col: u32) -> Self {
        Self {
            kind,
            pos: Some(Pos { line, col }),
        }
    }

    pub fn function(def: FunctionDef) -> Self {
        Self::new(StmtKind::FunctionDef(def))
    }

    pub fn ret(value: Expr) -> Self {
        Self::new(StmtKind::Return(Some(value)))
    }

    pub fn expr(value: Expr) -> Self {
        Self::new(StmtKind::Expr(value))
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            targets: vec![target],
            value,
        })
    }

    pub fn import(names: Vec<Alias>) -> Self {
        Self::new(StmtKind::Import(names))
    }

    pub fn import_from(module: &str, names: Vec<Alias>) -> Self {
        Self::new(StmtKind::ImportFrom {
            module: Some(module.to_string()),
            names,
            level: 0,
        })
    }

    /// True for `import` and `from ... import` statements
    pub fn is_import(&self) -> bool {
        matches!(self.kind, StmtKind::Import(_) | StmtKind::ImportFrom { .. })
    }

    /// The string literal if this statement is a bare string expression
    pub fn as_docstring(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Expr(Expr::Constant(Constant::Str(s))) => Some(s),
            _ => None,
        }
    }
}

impl FunctionDef {
    pub fn new(name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| Param::new(p)).collect(),
            body,
            is_async: false,
        }
    }

    /// Leading docstring, if the first statement is a bare string
    pub fn docstring(&self) -> Option<&str> {
        self.body.first().and_then(Stmt::as_docstring)
    }
}

impl Param {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
        }
    }
}

impl Alias {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            asname: None,
        }
    }

    pub fn with_as(name: &str, asname: &str) -> Self {
        Self {
            name: name.to_string(),
            asname: Some(asname.to_string()),
        }
    }
}

impl Expr {
    pub fn name(id: &str) -> Self {
        Expr::Name(id.to_string())
    }

    pub fn str(s: &str) -> Self {
        Expr::Constant(Constant::Str(s.to_string()))
    }

    pub fn int(i: i64) -> Self {
        Expr::Constant(Constant::Int(i))
    }

    pub fn binop(left: Expr, op: BinOperator, right: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
        }
    }

    pub fn attr(value: Expr, attr: &str) -> Self {
        Expr::Attribute {
            value: Box::new(value),
            attr: attr.to_string(),
        }
    }
}

/// Mutable traversal over a syntax tree
///
/// Override a hook and call the matching `walk_*` function to keep
/// descending. `visit_binding` sees names introduced by definitions
/// (function names and parameters); `Expr::Name` occurrences go through
/// `visit_expr`.
pub trait VisitMut {
    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        walk_expr(self, expr);
    }

    fn visit_binding(&mut self, _name: &mut String) {}
}

pub fn walk_module<V: VisitMut + ?Sized>(v: &mut V, module: &mut Module) {
    walk_body(v, &mut module.body);
}

fn walk_body<V: VisitMut + ?Sized>(v: &mut V, body: &mut [Stmt]) {
    for stmt in body {
        v.visit_stmt(stmt);
    }
}

fn walk_params<V: VisitMut + ?Sized>(v: &mut V, params: &mut [Param]) {
    for param in params {
        v.visit_binding(&mut param.name);
        if let Some(default) = &mut param.default {
            v.visit_expr(default);
        }
    }
}

pub fn walk_stmt<V: VisitMut + ?Sized>(v: &mut V, stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::FunctionDef(def) => {
            v.visit_binding(&mut def.name);
            walk_params(v, &mut def.params);
            walk_body(v, &mut def.body);
        }
        StmtKind::Return(value) | StmtKind::Raise(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                v.visit_expr(target);
            }
            v.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::Expr(value) => v.visit_expr(value),
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            v.visit_expr(test);
            walk_body(v, body);
            walk_body(v, orelse);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            walk_body(v, body);
            walk_body(v, orelse);
        }
        StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Import(_)
        | StmtKind::ImportFrom { .. } => {}
    }
}

pub fn walk_expr<V: VisitMut + ?Sized>(v: &mut V, expr: &mut Expr) {
    match expr {
        Expr::Name(_) | Expr::Constant(_) => {}
        Expr::Attribute { value, .. } => v.visit_expr(value),
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            v.visit_expr(func);
            for arg in args {
                v.visit_expr(arg);
            }
            for kw in keywords {
                v.visit_expr(&mut kw.value);
            }
        }
        Expr::BinOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::UnaryOp { operand, .. } => v.visit_expr(operand),
        Expr::BoolOp { values, .. } => {
            for value in values {
                v.visit_expr(value);
            }
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            v.visit_expr(left);
            for c in comparators {
                v.visit_expr(c);
            }
        }
        Expr::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        Expr::Lambda { params, body } => {
            walk_params(v, params);
            v.visit_expr(body);
        }
        Expr::Await(value) => v.visit_expr(value),
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        Expr::Dict { keys, values } => {
            for key in keys.iter_mut().flatten() {
                v.visit_expr(key);
            }
            for value in values {
                v.visit_expr(value);
            }
        }
        Expr::Subscript { value, index } => {
            v.visit_expr(value);
            v.visit_expr(index);
        }
    }
}

struct PositionStripper;

impl VisitMut for PositionStripper {
    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        stmt.pos = None;
        walk_stmt(self, stmt);
    }
}

impl Module {
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }

    /// Clear every statement position, recursively
    pub fn strip_positions(&mut self) {
        walk_module(&mut PositionStripper, self);
    }

    /// Export as a Merkle tree for ASTON encoding
    pub fn to_node(&self) -> Node {
        Node::new("Module").with("body", stmts_field(&self.body))
    }
}

fn stmts_field(body: &[Stmt]) -> Field {
    Field::nodes(body.iter().map(stmt_node))
}

fn exprs_field(items: &[Expr]) -> Field {
    Field::nodes(items.iter().map(expr_node))
}

fn opt_expr_field(value: &Option<Expr>) -> Field {
    match value {
        Some(e) => Field::child(expr_node(e)),
        None => Field::Null,
    }
}

fn params_field(params: &[Param]) -> Field {
    Field::nodes(params.iter().map(|p| {
        Node::new("arg")
            .with("arg", Field::str(&p.name))
            .with("default", opt_expr_field(&p.default))
    }))
}

fn aliases_field(names: &[Alias]) -> Field {
    Field::nodes(names.iter().map(|a| {
        Node::new("alias").with("name", Field::str(&a.name)).with(
            "asname",
            a.asname.as_ref().map(Field::str).unwrap_or(Field::Null),
        )
    }))
}

fn stmt_node(stmt: &Stmt) -> Node {
    let node = match &stmt.kind {
        StmtKind::FunctionDef(def) => Node::new(if def.is_async {
            "AsyncFunctionDef"
        } else {
            "FunctionDef"
        })
        .with("name", Field::str(&def.name))
        .with("args", params_field(&def.params))
        .with("body", stmts_field(&def.body)),
        StmtKind::Return(value) => Node::new("Return").with("value", opt_expr_field(value)),
        StmtKind::Raise(value) => Node::new("Raise").with("exc", opt_expr_field(value)),
        StmtKind::Assign { targets, value } => Node::new("Assign")
            .with("targets", exprs_field(targets))
            .with("value", Field::child(expr_node(value))),
        StmtKind::AugAssign { target, op, value } => Node::new("AugAssign")
            .with("target", Field::child(expr_node(target)))
            .with("op", Field::str(op.name()))
            .with("value", Field::child(expr_node(value))),
        StmtKind::Expr(value) => Node::new("Expr").with("value", Field::child(expr_node(value))),
        StmtKind::If { test, body, orelse } => Node::new("If")
            .with("test", Field::child(expr_node(test)))
            .with("body", stmts_field(body))
            .with("orelse", stmts_field(orelse)),
        StmtKind::While { test, body, orelse } => Node::new("While")
            .with("test", Field::child(expr_node(test)))
            .with("body", stmts_field(body))
            .with("orelse", stmts_field(orelse)),
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => Node::new("For")
            .with("target", Field::child(expr_node(target)))
            .with("iter", Field::child(expr_node(iter)))
            .with("body", stmts_field(body))
            .with("orelse", stmts_field(orelse)),
        StmtKind::Pass => Node::new("Pass"),
        StmtKind::Break => Node::new("Break"),
        StmtKind::Continue => Node::new("Continue"),
        StmtKind::Import(names) => Node::new("Import").with("names", aliases_field(names)),
        StmtKind::ImportFrom {
            module,
            names,
            level,
        } => Node::new("ImportFrom")
            .with(
                "module",
                module.as_ref().map(Field::str).unwrap_or(Field::Null),
            )
            .with("names", aliases_field(names))
            .with("level", Field::int(i64::from(*level))),
    };

    let (line, col) = match stmt.pos {
        Some(p) => (Field::int(i64::from(p.line)), Field::int(i64::from(p.col))),
        None => (Field::Null, Field::Null),
    };
    node.with("lineno", line).with("col_offset", col)
}

fn expr_node(expr: &Expr) -> Node {
    match expr {
        Expr::Name(id) => Node::new("Name").with("id", Field::str(id)),
        Expr::Constant(c) => {
            let value = match c {
                Constant::None => Field::Null,
                Constant::Bool(b) => Field::bool(*b),
                Constant::Int(i) => Field::int(*i),
                Constant::Float(f) => Field::Scalar(Scalar::Float(*f)),
                Constant::Str(s) => Field::str(s),
            };
            Node::new("Constant").with("value", value)
        }
        Expr::Attribute { value, attr } => Node::new("Attribute")
            .with("value", Field::child(expr_node(value)))
            .with("attr", Field::str(attr)),
        Expr::Call {
            func,
            args,
            keywords,
        } => Node::new("Call")
            .with("func", Field::child(expr_node(func)))
            .with("args", exprs_field(args))
            .with(
                "keywords",
                Field::nodes(keywords.iter().map(|kw| {
                    Node::new("keyword")
                        .with("arg", kw.arg.as_ref().map(Field::str).unwrap_or(Field::Null))
                        .with("value", Field::child(expr_node(&kw.value)))
                })),
            ),
        Expr::BinOp { left, op, right } => Node::new("BinOp")
            .with("left", Field::child(expr_node(left)))
            .with("op", Field::str(op.name()))
            .with("right", Field::child(expr_node(right))),
        Expr::UnaryOp { op, operand } => Node::new("UnaryOp")
            .with("op", Field::str(op.name()))
            .with("operand", Field::child(expr_node(operand))),
        Expr::BoolOp { op, values } => Node::new("BoolOp")
            .with("op", Field::str(op.name()))
            .with("values", exprs_field(values)),
        Expr::Compare {
            left,
            ops,
            comparators,
        } => Node::new("Compare")
            .with("left", Field::child(expr_node(left)))
            .with(
                "ops",
                Field::Seq(
                    ops.iter()
                        .map(|op| Item::Scalar(Scalar::Str(op.name().to_string())))
                        .collect(),
                ),
            )
            .with("comparators", exprs_field(comparators)),
        Expr::IfExp { test, body, orelse } => Node::new("IfExp")
            .with("test", Field::child(expr_node(test)))
            .with("body", Field::child(expr_node(body)))
            .with("orelse", Field::child(expr_node(orelse))),
        Expr::Lambda { params, body } => Node::new("Lambda")
            .with("args", params_field(params))
            .with("body", Field::child(expr_node(body))),
        Expr::Await(value) => Node::new("Await").with("value", Field::child(expr_node(value))),
        Expr::List(items) => Node::new("List").with("elts", exprs_field(items)),
        Expr::Tuple(items) => Node::new("Tuple").with("elts", exprs_field(items)),
        Expr::Dict { keys, values } => Node::new("Dict")
            .with(
                "keys",
                Field::Seq(
                    keys.iter()
                        .map(|k| match k {
                            Some(k) => Item::Node(expr_node(k)),
                            None => Item::Null,
                        })
                        .collect(),
                ),
            )
            .with("values", exprs_field(values)),
        Expr::Subscript { value, index } => Node::new("Subscript")
            .with("value", Field::child(expr_node(value)))
            .with("slice", Field::child(expr_node(index))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle;

    fn add_module(line: u32) -> Module {
        let body = vec![Stmt::at(
            StmtKind::Return(Some(Expr::binop(
                Expr::name("a"),
                BinOperator::Add,
                Expr::name("b"),
            ))),
            line + 1,
            4,
        )];
        let mut def = FunctionDef::new("add", &["a", "b"], body);
        def.is_async = false;
        Module::new(vec![Stmt::at(StmtKind::FunctionDef(def), line, 0)])
    }

    struct Renamer;

    impl VisitMut for Renamer {
        fn visit_expr(&mut self, expr: &mut Expr) {
            if let Expr::Name(id) = expr {
                id.push('_');
            }
            walk_expr(self, expr);
        }

        fn visit_binding(&mut self, name: &mut String) {
            name.push('_');
        }
    }

    #[test]
    fn test_visitor_reaches_bindings_and_names() {
        let mut module = add_module(1);
        walk_module(&mut Renamer, &mut module);
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected function");
        };
        assert_eq!(def.name, "add_");
        assert_eq!(def.params[1].name, "b_");
        assert_eq!(
            def.body[0].kind,
            StmtKind::Return(Some(Expr::binop(
                Expr::name("a_"),
                BinOperator::Add,
                Expr::name("b_")
            )))
        );
    }

    #[test]
    fn test_strip_positions_makes_node_position_independent() {
        let mut a = add_module(1);
        let mut b = add_module(10);
        assert_ne!(a.to_node().hash().unwrap(), b.to_node().hash().unwrap());
        a.strip_positions();
        b.strip_positions();
        assert_eq!(a, b);
        assert_eq!(a.to_node().hash().unwrap(), b.to_node().hash().unwrap());
    }

    #[test]
    fn test_node_export_roundtrips_through_quads() {
        let module = add_module(3);
        let node = module.to_node();
        let (hash, quads) = merkle::encode(&node).unwrap();
        assert_eq!(merkle::decode_root(&quads, hash).unwrap(), node);
    }

    #[test]
    fn test_alias_bound_name() {
        assert_eq!(Alias::new("os.path").bound_name(), "os");
        assert_eq!(Alias::with_as("os.path", "p").bound_name(), "p");
    }

    #[test]
    fn test_docstring_detection() {
        let def = FunctionDef::new(
            "f",
            &[],
            vec![Stmt::expr(Expr::str("Doc")), Stmt::new(StmtKind::Pass)],
        );
        assert_eq!(def.docstring(), Some("Doc"));
        let def = FunctionDef::new("f", &[], vec![Stmt::new(StmtKind::Pass)]);
        assert_eq!(def.docstring(), None);
    }
}
