//! Syntax tree for the Game Lab subset of JavaScript

use std::fmt;

use crate::model::features::LineRange;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: LineRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    /// Identifier or destructuring pattern
    pub target: Expr,
    pub init: Option<Expr>,
    pub span: LineRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default:`
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Var(Vec<Declarator>),
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `for (x in obj)` and `for (x of list)`
    ForEach {
        left: Box<Stmt>,
        right: Expr,
        body: Box<Stmt>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Try {
        block: Vec<Stmt>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: LineRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Ident(String),
    Number(f64),
    Str(String),
    Template(String),
    Regex(String),
    Bool(bool),
    Null,
    This,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function {
        name: Option<String>,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Unary {
        op: &'static str,
        arg: Box<Expr>,
    },
    Update {
        op: &'static str,
        prefix: bool,
        arg: Box<Expr>,
    },
    /// Arithmetic, comparison and logical operators
    Binary {
        op: &'static str,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: &'static str,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Sequence(Vec<Expr>),
    Spread(Box<Expr>),
}

impl Expr {
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Name of a called function when the callee is a bare identifier
    pub fn callee_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Call { callee, .. } => callee.as_ident(),
            _ => None,
        }
    }

    /// `(object, property)` for `object.property` with an identifier object
    pub fn as_member_of_ident(&self) -> Option<(&str, &str)> {
        match &self.kind {
            ExprKind::Member { object, property } => Some((object.as_ident()?, property)),
            _ => None,
        }
    }

    /// Directly nested expressions; function bodies are not entered
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Array(items) | ExprKind::Sequence(items) => items.iter().collect(),
            ExprKind::Object(props) => props.iter().map(|(_, e)| e).collect(),
            ExprKind::Unary { arg, .. } | ExprKind::Update { arg, .. } | ExprKind::Spread(arg) => {
                vec![arg.as_ref()]
            }
            ExprKind::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::Assign { target, value, .. } => vec![target.as_ref(), value.as_ref()],
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => vec![test.as_ref(), consequent.as_ref(), alternate.as_ref()],
            ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                std::iter::once(callee.as_ref()).chain(args).collect()
            }
            ExprKind::Member { object, .. } => vec![object.as_ref()],
            ExprKind::Index { object, index } => vec![object.as_ref(), index.as_ref()],
            ExprKind::Ident(_)
            | ExprKind::Number(_)
            | ExprKind::Str(_)
            | ExprKind::Template(_)
            | ExprKind::Regex(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::This
            | ExprKind::Function { .. } => Vec::new(),
        }
    }

    /// Pre-order visit of this expression and everything nested in it
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn any(&self, mut predicate: impl FnMut(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| found = found || predicate(e));
        found
    }
}

/// Compact source-like rendering used for recorded constructor arguments
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Ident(name) => f.write_str(name),
            ExprKind::Number(n) => write!(f, "{n}"),
            ExprKind::Str(s) => f.write_str(s),
            ExprKind::Template(body) => write!(f, "`{body}`"),
            ExprKind::Regex(body) => f.write_str(body),
            ExprKind::Bool(b) => write!(f, "{b}"),
            ExprKind::Null => f.write_str("null"),
            ExprKind::This => f.write_str("this"),
            ExprKind::Unary { op, arg } => write!(f, "{op}{arg}"),
            ExprKind::Update { op, prefix: true, arg } => write!(f, "{op}{arg}"),
            ExprKind::Update { op, arg, .. } => write!(f, "{arg}{op}"),
            ExprKind::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            ExprKind::Member { object, property } => write!(f, "{object}.{property}"),
            ExprKind::Index { object, index } => write!(f, "{object}[{index}]"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            _ => f.write_str("…"),
        }
    }
}
