//! Front-end adapters
//!
//! A front end turns a syntax tree back into source text and supplies the
//! set of built-in names the canonicalizer must never rename. Parsing source
//! into [`Module`] happens outside this crate.

use crate::ast::{
    Alias, BinOperator, BoolOperator, Constant, Expr, Keyword, Module, Param, Stmt, StmtKind,
    UnaryOperator,
};
use std::collections::BTreeSet;

/// Source-language adapter used by the canonicalizer
pub trait Frontend: Send + Sync {
    /// Short language identifier
    fn name(&self) -> &str;

    /// Render a module to source text
    fn render(&self, module: &Module) -> String;

    /// Names that are never renamed during canonicalization
    fn builtins(&self) -> BTreeSet<String>;
}

/// Built-in names of the Python front end
pub const PYTHON_BUILTINS: &[&str] = &[
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError", "BufferError",
    "BytesWarning", "ChildProcessError", "ConnectionAbortedError", "ConnectionError",
    "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning", "EOFError",
    "Ellipsis", "EncodingWarning", "EnvironmentError", "Exception", "ExceptionGroup",
    "False", "FileExistsError", "FileNotFoundError", "FloatingPointError", "FutureWarning",
    "GeneratorExit", "IOError", "ImportError", "ImportWarning", "IndentationError",
    "IndexError", "InterruptedError", "IsADirectoryError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "ModuleNotFoundError", "NameError", "None",
    "NotADirectoryError", "NotImplemented", "NotImplementedError", "OSError",
    "OverflowError", "PendingDeprecationWarning", "PermissionError", "ProcessLookupError",
    "RecursionError", "ReferenceError", "ResourceWarning", "RuntimeError", "RuntimeWarning",
    "StopAsyncIteration", "StopIteration", "SyntaxError", "SyntaxWarning", "SystemError",
    "SystemExit", "TabError", "TimeoutError", "True", "TypeError", "UnboundLocalError",
    "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError",
    "UnicodeWarning", "UserWarning", "ValueError", "Warning", "ZeroDivisionError",
    "__build_class__", "__debug__", "__doc__", "__import__", "__loader__", "__name__",
    "__package__", "__spec__", "abs", "aiter", "all", "anext", "any", "ascii", "bin",
    "bool", "breakpoint", "bytearray", "bytes", "callable", "chr", "classmethod", "compile",
    "complex", "copyright", "credits", "delattr", "dict", "dir", "divmod", "enumerate",
    "eval", "exec", "exit", "filter", "float", "format", "frozenset", "getattr", "globals",
    "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass",
    "iter", "len", "license", "list", "locals", "map", "max", "memoryview", "min", "next",
    "object", "oct", "open", "ord", "pow", "print", "property", "quit", "range", "repr",
    "reversed", "round", "set", "setattr", "slice", "sorted", "staticmethod", "str", "sum",
    "super", "tuple", "type", "vars", "zip",
];

/// Renders Python source the way `ast.unparse` lays it out
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonFrontend;

impl Frontend for PythonFrontend {
    fn name(&self) -> &str {
        "python"
    }

    fn render(&self, module: &Module) -> String {
        let mut w = Writer::default();
        w.body(&module.body);
        w.out
    }

    fn builtins(&self) -> BTreeSet<String> {
        PYTHON_BUILTINS.iter().map(|s| s.to_string()).collect()
    }
}

// Operator precedence, lowest binds loosest.
const TUPLE: u8 = 2;
const YIELD: u8 = 3;
const TEST: u8 = 4;
const OR: u8 = 5;
const AND: u8 = 6;
const NOT: u8 = 7;
const CMP: u8 = 8;
const BOR: u8 = 9;
const BXOR: u8 = 10;
const BAND: u8 = 11;
const SHIFT: u8 = 12;
const ARITH: u8 = 13;
const TERM: u8 = 14;
const FACTOR: u8 = 15;
const POWER: u8 = 16;
const AWAIT: u8 = 17;
const ATOM: u8 = 18;

fn binop_precedence(op: BinOperator) -> u8 {
    match op {
        BinOperator::Add | BinOperator::Sub => ARITH,
        BinOperator::Mult
        | BinOperator::MatMult
        | BinOperator::Div
        | BinOperator::FloorDiv
        | BinOperator::Mod => TERM,
        BinOperator::Pow => POWER,
        BinOperator::LShift | BinOperator::RShift => SHIFT,
        BinOperator::BitOr => BOR,
        BinOperator::BitXor => BXOR,
        BinOperator::BitAnd => BAND,
    }
}

#[derive(Default)]
struct Writer {
    out: String,
    indent: usize,
}

impl Writer {
    fn maybe_newline(&mut self) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
    }

    fn fill(&mut self, text: &str) {
        self.maybe_newline();
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
    }

    fn block(&mut self, body: &[Stmt]) {
        self.out.push(':');
        self.indent += 1;
        self.body(body);
        self.indent -= 1;
    }

    fn body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.maybe_newline();
                let keyword = if def.is_async { "async def" } else { "def" };
                self.fill(&format!("{} {}({})", keyword, def.name, params(&def.params)));
                self.out.push(':');
                self.indent += 1;
                match def.docstring() {
                    Some(doc) => {
                        self.fill(&docstring_literal(doc));
                        self.body(&def.body[1..]);
                    }
                    None => self.body(&def.body),
                }
                self.indent -= 1;
            }
            StmtKind::Return(None) => self.fill("return"),
            StmtKind::Return(Some(value)) => self.fill(&format!("return {}", expr(value, TEST))),
            StmtKind::Raise(None) => self.fill("raise"),
            StmtKind::Raise(Some(exc)) => self.fill(&format!("raise {}", expr(exc, TEST))),
            StmtKind::Assign { targets, value } => {
                let mut line = String::new();
                for target in targets {
                    line.push_str(&expr(target, TUPLE));
                    line.push_str(" = ");
                }
                line.push_str(&expr(value, TEST));
                self.fill(&line);
            }
            StmtKind::AugAssign { target, op, value } => self.fill(&format!(
                "{} {}= {}",
                expr(target, TEST),
                op.symbol(),
                expr(value, TEST)
            )),
            StmtKind::Expr(value) => self.fill(&expr(value, YIELD)),
            StmtKind::If { test, body, orelse } => {
                self.fill(&format!("if {}", expr(test, TEST)));
                self.block(body);
                let mut orelse = orelse;
                // collapse `else: if` into `elif`
                while let [Stmt {
                    kind:
                        StmtKind::If {
                            test,
                            body,
                            orelse: next,
                        },
                    ..
                }] = orelse.as_slice()
                {
                    self.fill(&format!("elif {}", expr(test, TEST)));
                    self.block(body);
                    orelse = next;
                }
                self.else_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.fill(&format!(
                    "for {} in {}",
                    expr(target, TUPLE),
                    expr(iter, TEST)
                ));
                self.block(body);
                self.else_block(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.fill(&format!("while {}", expr(test, TEST)));
                self.block(body);
                self.else_block(orelse);
            }
            StmtKind::Pass => self.fill("pass"),
            StmtKind::Break => self.fill("break"),
            StmtKind::Continue => self.fill("continue"),
            StmtKind::Import(names) => self.fill(&format!("import {}", aliases(names))),
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => self.fill(&format!(
                "from {}{} import {}",
                ".".repeat(*level as usize),
                module.as_deref().unwrap_or(""),
                aliases(names)
            )),
        }
    }

    fn else_block(&mut self, orelse: &[Stmt]) {
        if !orelse.is_empty() {
            self.fill("else");
            self.block(orelse);
        }
    }
}

/// Render a single statement at top level
pub fn render_stmt(stmt: &Stmt) -> String {
    let mut w = Writer::default();
    w.stmt(stmt);
    w.out
}

fn aliases(names: &[Alias]) -> String {
    names
        .iter()
        .map(|a| match &a.asname {
            Some(asname) => format!("{} as {}", a.name, asname),
            None => a.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!("{}={}", p.name, expr(default, TEST)),
            None => p.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn join(items: &[Expr], prec: u8) -> String {
    items
        .iter()
        .map(|e| expr(e, prec))
        .collect::<Vec<_>>()
        .join(", ")
}

fn keyword(kw: &Keyword) -> String {
    match &kw.arg {
        Some(arg) => format!("{}={}", arg, expr(&kw.value, TEST)),
        None => format!("**{}", expr(&kw.value, BOR)),
    }
}

fn wrap(text: String, own: u8, required: u8) -> String {
    if required > own {
        format!("({})", text)
    } else {
        text
    }
}

/// Render an expression in a context requiring at least `prec`
fn expr(e: &Expr, prec: u8) -> String {
    match e {
        Expr::Name(id) => id.clone(),
        Expr::Constant(c) => constant(c),
        Expr::Attribute { value, attr } => {
            let base = expr(value, ATOM);
            // `1.real` would lex as a float
            if matches!(**value, Expr::Constant(Constant::Int(_))) {
                format!("{} .{}", base, attr)
            } else {
                format!("{}.{}", base, attr)
            }
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            let mut parts: Vec<String> = args.iter().map(|a| expr(a, TEST)).collect();
            parts.extend(keywords.iter().map(keyword));
            format!("{}({})", expr(func, ATOM), parts.join(", "))
        }
        Expr::BinOp { left, op, right } => {
            let own = binop_precedence(*op);
            let (lp, rp) = if *op == BinOperator::Pow {
                (own + 1, own)
            } else {
                (own, own + 1)
            };
            wrap(
                format!("{} {} {}", expr(left, lp), op.symbol(), expr(right, rp)),
                own,
                prec,
            )
        }
        Expr::UnaryOp { op, operand } => {
            let own = if *op == UnaryOperator::Not { NOT } else { FACTOR };
            wrap(format!("{}{}", op.symbol(), expr(operand, own)), own, prec)
        }
        Expr::BoolOp { op, values } => {
            let own = if *op == BoolOperator::And { AND } else { OR };
            let sep = format!(" {} ", op.symbol());
            let text = values
                .iter()
                .map(|v| expr(v, own + 1))
                .collect::<Vec<_>>()
                .join(sep.as_str());
            wrap(text, own, prec)
        }
        Expr::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut text = expr(left, CMP + 1);
            for (op, c) in ops.iter().zip(comparators) {
                text.push_str(&format!(" {} {}", op.symbol(), expr(c, CMP + 1)));
            }
            wrap(text, CMP, prec)
        }
        Expr::IfExp { test, body, orelse } => wrap(
            format!(
                "{} if {} else {}",
                expr(body, TEST + 1),
                expr(test, TEST + 1),
                expr(orelse, TEST)
            ),
            TEST,
            prec,
        ),
        Expr::Lambda { params: ps, body } => {
            let head = if ps.is_empty() {
                "lambda".to_string()
            } else {
                format!("lambda {}", params(ps))
            };
            wrap(format!("{}: {}", head, expr(body, TEST)), TEST, prec)
        }
        Expr::Await(value) => wrap(format!("await {}", expr(value, ATOM)), AWAIT, prec),
        Expr::List(items) => format!("[{}]", join(items, TEST)),
        Expr::Tuple(items) => {
            let inner = match items.as_slice() {
                [single] => format!("{},", expr(single, TEST)),
                _ => join(items, TEST),
            };
            if items.is_empty() || prec > TUPLE {
                format!("({})", inner)
            } else {
                inner
            }
        }
        Expr::Dict { keys, values } => {
            let entries = keys
                .iter()
                .zip(values)
                .map(|(k, v)| match k {
                    Some(k) => format!("{}: {}", expr(k, TEST), expr(v, TEST)),
                    None => format!("**{}", expr(v, BOR)),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", entries)
        }
        Expr::Subscript { value, index } => {
            let slice = match &**index {
                Expr::Tuple(items) if !items.is_empty() => expr(index, TUPLE),
                _ => expr(index, TEST),
            };
            format!("{}[{}]", expr(value, ATOM), slice)
        }
    }
}

fn constant(c: &Constant) -> String {
    match c {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => float_repr(*f),
        Constant::Str(s) => string_repr(s),
    }
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "(1e309-1e309)".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "1e309" } else { "-1e309" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // Python writes exponents with a sign and at least two digits
        let sci = format!("{:e}", f);
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => sci,
        };
    }
    format!("{:?}", f)
}

fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn docstring_literal(doc: &str) -> String {
    let mut body = doc.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    if body.ends_with('"') {
        body.pop();
        body.push_str("\\\"");
    }
    format!("\"\"\"{}\"\"\"", body)
}
