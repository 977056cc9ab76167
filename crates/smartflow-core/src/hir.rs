//! Syntax model the resolver walks
//!
//! Expressions carry interned identities (`ExprId`) so dataflow variables and
//! per-node flows can be keyed by expression. The model is deliberately small:
//! only the constructs that influence dataflow appear, everything else is a
//! plain expression statement from the analyzer's point of view.

use crate::types::Ty;
use smallvec::SmallVec;

/// Identity of a declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Identity of an expression, unique within one build of the syntax tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    LocalVal,
    LocalVar,
    ValueParameter,
    /// An implicit or explicit receiver.
    This,
    /// A member of a class, read through some receiver.
    Member { is_val: bool, is_final: bool },
    Function,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Declared type; for functions, the return type.
    pub ty: Ty,
}

/// The symbol arena. Ids are stable for the lifetime of the arena.
#[derive(Debug, Default)]
pub struct Symbols {
    items: Vec<Symbol>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, kind: SymbolKind, ty: Ty) -> SymbolId {
        let id = SymbolId(self.items.len() as u32);
        self.items.push(Symbol {
            name: name.to_string(),
            kind,
            ty,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.items[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    Identity,
    /// `!==`
    NotIdentity,
}

impl EqualityOp {
    /// Whether the operator asserts equality rather than inequality.
    pub fn is_eq(self) -> bool {
        matches!(self, EqualityOp::Eq | EqualityOp::Identity)
    }

    pub fn is_identity(self) -> bool {
        matches!(self, EqualityOp::Identity | EqualityOp::NotIdentity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    /// A qualified access: a symbol read through an optional explicit
    /// receiver chain. `this` is an access to a `This` symbol.
    Access {
        symbol: SymbolId,
        receiver: Option<Box<Expr>>,
    },
    /// `x is T` / `x !is T`
    TypeTest {
        operand: Box<Expr>,
        ty: Ty,
        negated: bool,
    },
    /// `x as T` / `x as? T`
    Cast {
        operand: Box<Expr>,
        ty: Ty,
        safe: bool,
    },
    Equality {
        op: EqualityOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    BooleanOp {
        op: BooleanOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `!x`
    Not { operand: Box<Expr> },
    /// `x!!`
    CheckedNotNull { operand: Box<Expr> },
    /// `receiver?.call`
    SafeCall {
        receiver: Box<Expr>,
        call: Box<Expr>,
    },
    Call {
        function: SymbolId,
        receiver: Option<Box<Expr>>,
        args: Vec<Argument>,
    },
    When {
        branches: Vec<WhenBranch>,
        else_body: Option<Vec<Stmt>>,
    },
}

#[derive(Debug, Clone)]
pub enum Argument {
    Expr(Expr),
    Lambda(AnonymousFunction),
}

#[derive(Debug, Clone)]
pub struct WhenBranch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct AnonymousFunction {
    pub id: ExprId,
    pub parameter: Option<SymbolId>,
    pub receiver: Option<SymbolId>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `val x = init` / `var x = init`; the symbol kind tells which.
    Declaration {
        symbol: SymbolId,
        initializer: Option<Expr>,
    },
    Assignment {
        symbol: SymbolId,
        value: Expr,
    },
    Expr(Expr),
    Return { value: Option<Expr> },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        condition: Expr,
    },
}

/// A function or property body handed to the analyzer.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: SmallVec<[SymbolId; 4]>,
    pub receiver: Option<SymbolId>,
    pub return_type: Ty,
    pub body: Vec<Stmt>,
}

impl Expr {
    /// The declared (static) type of the expression, before any refinement.
    pub fn static_type(&self, symbols: &Symbols) -> Ty {
        match &self.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Null => Ty::null(),
                Literal::Bool(_) => Ty::boolean(),
                Literal::Int(_) => Ty::class("Int"),
                Literal::Str(_) => Ty::class("String"),
            },
            ExprKind::Access { symbol, .. } => symbols.get(*symbol).ty.clone(),
            ExprKind::TypeTest { .. }
            | ExprKind::Equality { .. }
            | ExprKind::BooleanOp { .. }
            | ExprKind::Not { .. } => Ty::boolean(),
            ExprKind::Cast { ty, safe, .. } => {
                if *safe {
                    Ty::nullable(ty.clone())
                } else {
                    ty.clone()
                }
            }
            ExprKind::CheckedNotNull { operand } => operand.static_type(symbols).not_nullable(),
            ExprKind::SafeCall { call, .. } => Ty::nullable(call.static_type(symbols)),
            ExprKind::Call { function, .. } => symbols.get(*function).ty.clone(),
            ExprKind::When { .. } => Ty::Any,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }

    pub fn as_null_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(Literal::Null))
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        match self.kind {
            ExprKind::Literal(Literal::Bool(b)) => Some(b),
            _ => None,
        }
    }
}

/// Builds expressions with fresh identities over a symbol arena.
#[derive(Debug, Default)]
pub struct HirBuilder {
    pub symbols: Symbols,
    next_expr: u32,
}

impl HirBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self) -> ExprId {
        let id = ExprId(self.next_expr);
        self.next_expr += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.fresh(),
            kind,
        }
    }

    pub fn declare(&mut self, name: &str, kind: SymbolKind, ty: Ty) -> SymbolId {
        self.symbols.declare(name, kind, ty)
    }

    pub fn null(&mut self) -> Expr {
        self.expr(ExprKind::Literal(Literal::Null))
    }

    pub fn bool(&mut self, value: bool) -> Expr {
        self.expr(ExprKind::Literal(Literal::Bool(value)))
    }

    pub fn int(&mut self, value: i64) -> Expr {
        self.expr(ExprKind::Literal(Literal::Int(value)))
    }

    pub fn str(&mut self, value: &str) -> Expr {
        self.expr(ExprKind::Literal(Literal::Str(value.to_string())))
    }

    pub fn access(&mut self, symbol: SymbolId) -> Expr {
        self.expr(ExprKind::Access {
            symbol,
            receiver: None,
        })
    }

    pub fn member_access(&mut self, receiver: Expr, symbol: SymbolId) -> Expr {
        self.expr(ExprKind::Access {
            symbol,
            receiver: Some(Box::new(receiver)),
        })
    }

    pub fn is_type(&mut self, operand: Expr, ty: Ty) -> Expr {
        self.expr(ExprKind::TypeTest {
            operand: Box::new(operand),
            ty,
            negated: false,
        })
    }

    pub fn not_is_type(&mut self, operand: Expr, ty: Ty) -> Expr {
        self.expr(ExprKind::TypeTest {
            operand: Box::new(operand),
            ty,
            negated: true,
        })
    }

    pub fn cast(&mut self, operand: Expr, ty: Ty) -> Expr {
        self.expr(ExprKind::Cast {
            operand: Box::new(operand),
            ty,
            safe: false,
        })
    }

    pub fn safe_cast(&mut self, operand: Expr, ty: Ty) -> Expr {
        self.expr(ExprKind::Cast {
            operand: Box::new(operand),
            ty,
            safe: true,
        })
    }

    pub fn equality(&mut self, op: EqualityOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Equality {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn and(&mut self, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::BooleanOp {
            op: BooleanOp::And,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn or(&mut self, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::BooleanOp {
            op: BooleanOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn not(&mut self, operand: Expr) -> Expr {
        self.expr(ExprKind::Not {
            operand: Box::new(operand),
        })
    }

    pub fn checked_not_null(&mut self, operand: Expr) -> Expr {
        self.expr(ExprKind::CheckedNotNull {
            operand: Box::new(operand),
        })
    }

    pub fn safe_call(&mut self, receiver: Expr, call: Expr) -> Expr {
        self.expr(ExprKind::SafeCall {
            receiver: Box::new(receiver),
            call: Box::new(call),
        })
    }

    pub fn call(&mut self, function: SymbolId, args: Vec<Argument>) -> Expr {
        self.expr(ExprKind::Call {
            function,
            receiver: None,
            args,
        })
    }

    pub fn call_on(&mut self, receiver: Expr, function: SymbolId, args: Vec<Argument>) -> Expr {
        self.expr(ExprKind::Call {
            function,
            receiver: Some(Box::new(receiver)),
            args,
        })
    }

    pub fn when(&mut self, branches: Vec<WhenBranch>, else_body: Option<Vec<Stmt>>) -> Expr {
        self.expr(ExprKind::When { branches, else_body })
    }

    /// `if (cond) { then }` as a single-branch `when` without an else.
    pub fn if_stmt(&mut self, condition: Expr, then_body: Vec<Stmt>) -> Stmt {
        let when = self.when(
            vec![WhenBranch {
                condition,
                body: then_body,
            }],
            None,
        );
        Stmt::Expr(when)
    }

    /// `if (cond) { then } else { other }`.
    pub fn if_else_stmt(&mut self, condition: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
        let when = self.when(
            vec![WhenBranch {
                condition,
                body: then_body,
            }],
            Some(else_body),
        );
        Stmt::Expr(when)
    }

    pub fn lambda(&mut self, parameter: Option<SymbolId>, body: Vec<Stmt>) -> AnonymousFunction {
        AnonymousFunction {
            id: self.fresh(),
            parameter,
            receiver: None,
            body,
        }
    }

    pub fn lambda_with_receiver(&mut self, receiver: SymbolId, body: Vec<Stmt>) -> AnonymousFunction {
        AnonymousFunction {
            id: self.fresh(),
            parameter: None,
            receiver: Some(receiver),
            body,
        }
    }
}
