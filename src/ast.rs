//! Concrete parse tree produced by `parser.rs`.
//!
//! The AST is untyped: `types.rs` concepts appear here only as written by
//! the programmer (a `Specifier`/`Qualifier` token sequence), not as
//! resolved types. Resolution happens in `frontend/`.

use crate::diagnostics::SourcePos;
use crate::types::{Qualifier, Specifier};

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub decls: Vec<ExternalDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalDecl {
    Kernel(KernelDecl),
    Function(FunctionDecl),
    /// A top-level `const`/`static` variable declaration shared by all
    /// kernels in the translation unit.
    Global(VarDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub direction: ParamDirection,
    pub qualifier: Qualifier,
    pub specifier: Specifier,
    pub name: String,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// `vec4`/`color` for a render kernel, `void` for a reduce kernel.
    pub return_specifier: Specifier,
    pub body: Block,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_specifier: Specifier,
    pub body: Block,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub qualifier: Qualifier,
    pub specifier: Specifier,
    pub name: String,
    pub init: Option<Expr>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl(VarDecl),
    Expr(Expr),
    Return(Option<Expr>, SourcePos),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
    },
    Block(Block),
    Break(SourcePos),
    Continue(SourcePos),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64, SourcePos),
    FloatLit(f64, SourcePos),
    BoolLit(bool, SourcePos),
    Ident(String, SourcePos),
    Call {
        callee: String,
        args: Vec<Expr>,
        pos: SourcePos,
    },
    VectorCtor {
        specifier: Specifier,
        args: Vec<Expr>,
        pos: SourcePos,
    },
    Swizzle {
        base: Box<Expr>,
        components: Vec<SwizzleComponent>,
        pos: SourcePos,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        pos: SourcePos,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: SourcePos,
    },
    Assign {
        op: AssignOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: SourcePos,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        pos: SourcePos,
    },
    /// A bare built-in reference (`sample`, `samplerTransform`,
    /// `samplerExtent`) is parsed as an ordinary `Call`; this variant exists
    /// only for the parenthesised cast syntax `(float) x`.
    Cast {
        specifier: Specifier,
        operand: Box<Expr>,
        pos: SourcePos,
    },
}

impl Expr {
    pub fn pos(&self) -> SourcePos {
        match self {
            Expr::IntLit(_, p)
            | Expr::FloatLit(_, p)
            | Expr::BoolLit(_, p)
            | Expr::Ident(_, p)
            | Expr::Call { pos: p, .. }
            | Expr::VectorCtor { pos: p, .. }
            | Expr::Swizzle { pos: p, .. }
            | Expr::Unary { pos: p, .. }
            | Expr::Binary { pos: p, .. }
            | Expr::Assign { pos: p, .. }
            | Expr::Ternary { pos: p, .. }
            | Expr::Cast { pos: p, .. } => *p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleComponent {
    X,
    Y,
    Z,
    W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}
