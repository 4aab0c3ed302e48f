//! Intermediate representation produced by the compiler and run by the runtime.
//!
//! A compiled template is a flat list of [`Node`]s. Every tag is preceded by a
//! [`Node::Marker`] carrying its source offset so runtime failures can be
//! mapped back to a line and column.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::filters::Filter;

/// A statement of a compiled template.
#[derive(Debug, Clone)]
pub enum Node {
    /// Literal text appended to the output.
    Text(String),
    /// Records the source offset of the tag that follows.
    Marker(usize),
    /// Evaluate an expression and append its string form.
    Output(Expr),
    /// A group of nodes emitted by a single tag.
    Fragment(Vec<Node>),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Vec<Node>,
    },
    /// Assign a variable; exported variables are also returned to the caller.
    Set {
        name: String,
        value: Expr,
        export: bool,
    },
    /// Render `body`, then render `file` with the result bound to `content`.
    Layout {
        file: Expr,
        data: Option<Expr>,
        body: Vec<Node>,
    },
}

/// An expression evaluated against the template context.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Free identifier resolved against locals, then the data context.
    Var(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Filter(FilterCall),
    /// Load and render another template, yielding its content.
    Include {
        file: Box<Expr>,
        data: Option<Box<Expr>>,
    },
    /// Render nodes into a string.
    Capture(Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Nullish,
}

/// A filter resolved at compile time and applied to `input` at runtime.
#[derive(Clone)]
pub struct FilterCall {
    pub name: String,
    pub filter: Arc<dyn Filter>,
    pub input: Box<Expr>,
    pub args: Vec<Expr>,
    pub is_async: bool,
}

impl fmt::Debug for FilterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCall")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("args", &self.args)
            .field("is_async", &self.is_async)
            .finish()
    }
}

impl Node {
    /// Whether running this node may suspend (includes, async filters).
    pub fn is_async(&self) -> bool {
        match self {
            Node::Text(_) | Node::Marker(_) => false,
            Node::Output(expr) => expr.is_async(),
            Node::Fragment(nodes) => nodes.iter().any(Node::is_async),
            Node::If {
                branches,
                otherwise,
            } => {
                branches.iter().any(|(test, body)| test.is_async() || body.iter().any(Node::is_async))
                    || otherwise.iter().any(Node::is_async)
            }
            Node::For {
                iterable,
                body,
                ..
            } => iterable.is_async() || body.iter().any(Node::is_async),
            Node::Set {
                value,
                ..
            } => value.is_async(),
            Node::Layout {
                ..
            } => true,
        }
    }
}

impl Expr {
    pub fn is_async(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Var(_) => false,
            Expr::Member {
                object,
                ..
            } => object.is_async(),
            Expr::Index {
                object,
                index,
                ..
            } => object.is_async() || index.is_async(),
            Expr::Array(items) => items.iter().any(Expr::is_async),
            Expr::Object(entries) => entries.iter().any(|(_, value)| value.is_async()),
            Expr::Unary {
                operand,
                ..
            } => operand.is_async(),
            Expr::Binary {
                left,
                right,
                ..
            } => left.is_async() || right.is_async(),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => test.is_async() || consequent.is_async() || alternate.is_async(),
            Expr::Filter(call) => {
                call.is_async || call.input.is_async() || call.args.iter().any(Expr::is_async)
            }
            Expr::Include {
                ..
            } => true,
            Expr::Capture(nodes) => nodes.iter().any(Node::is_async),
        }
    }
}
