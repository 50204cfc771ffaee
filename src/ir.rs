//! Typed intermediate representation produced by `frontend/`.
//!
//! This is a typed expression tree rather than a flat SSA form: every node
//! carries its resolved [`Type`], casts and overloads are already resolved,
//! and built-in calls are tagged with a [`Callee`] the specialiser later
//! rewrites or the codegen backend lowers directly. Cranelift only enters
//! the picture in `codegen.rs`, which walks this tree.

use crate::ast::{BinOp, SwizzleComponent, UnOp};
use crate::proto::{Direction, KernelTarget};
use crate::types::{CastKind, Type};

/// Built-in math intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Mod,
    Min,
    Max,
    Clamp,
    Mix,
    Step,
    Smoothstep,
    Length,
    Distance,
    Dot,
    Cross,
    Normalize,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Intrinsic> {
        use Intrinsic::*;
        Some(match name {
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "atan2" => Atan2,
            "exp" => Exp,
            "log" => Log,
            "sqrt" => Sqrt,
            "abs" => Abs,
            "floor" => Floor,
            "ceil" => Ceil,
            "mod" => Mod,
            "min" => Min,
            "max" => Max,
            "clamp" => Clamp,
            "mix" => Mix,
            "step" => Step,
            "smoothstep" => Smoothstep,
            "length" => Length,
            "distance" => Distance,
            "dot" => Dot,
            "cross" => Cross,
            "normalize" => Normalize,
            _ => return None,
        })
    }

    /// The canonical mangled extern name the front-end declares and the
    /// specialiser's lazy resolver later supplies: scalar intrinsics link
    /// straight to the host libm symbol.
    pub fn mangled_name(self) -> &'static str {
        use Intrinsic::*;
        match self {
            Sin => "sin_f",
            Cos => "cos_f",
            Tan => "tan_f",
            Asin => "asin_f",
            Acos => "acos_f",
            Atan => "atan_f",
            Atan2 => "atan_ff",
            Exp => "exp_f",
            Log => "log_f",
            Sqrt => "sqrt_f",
            Abs => "abs_f",
            Floor => "floor_f",
            Ceil => "ceil_f",
            Mod => "mod_ff",
            Min => "min_ff",
            Max => "max_ff",
            Clamp => "clamp_fff",
            Mix => "mix_fff",
            Step => "step_ff",
            Smoothstep => "smoothstep_fff",
            Length => "length_f",
            Distance => "distance_ff",
            Dot => "dot_ff",
            Cross => "cross_ff",
            Normalize => "normalize_f",
        }
    }
}

/// What an IR `Call` node resolves against. `Sample`/`SamplerTransform`/
/// `SamplerExtent` are unresolved externs at front-end time and the
/// specialiser's whole job is to give them bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// A call to another function defined in the same translation unit.
    User(String),
    /// `sample(sampler, coord) -> vec4`.
    Sample,
    /// `samplerTransform(sampler, coord) -> vec2`.
    SamplerTransform,
    /// `samplerExtent(sampler) -> vec4` (x0, y0, x1, y1).
    SamplerExtent,
    /// `samplerCoord(sampler) -> vec2`: the coordinate the enclosing kernel
    /// is being evaluated at, reinterpreted in `sampler`'s own space. In the
    /// absence of an explicit transform call this is the identity pass of
    /// the ambient destination coordinate (worked examples use it
    /// interchangeably with `destCoord` — see DESIGN.md).
    SamplerCoord,
    /// `destCoord() -> vec2`: the coordinate `sample_root` was invoked at.
    DestCoord,
    Intrinsic(Intrinsic),
    /// A `sample()` call resolved by the specialiser to a specific bound
    /// texture sampler, identified by its index in the owning
    /// [`crate::specialise::SpecializedGraph`]'s texture table. Never
    /// produced by the front end.
    TextureSample(u32),
}

#[derive(Debug, Clone)]
pub struct TypedExpr {
    pub ty: Type,
    pub kind: ExprKind,
}

impl TypedExpr {
    pub fn new(ty: Type, kind: ExprKind) -> TypedExpr {
        TypedExpr { ty, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    ConstFloat(f64),
    ConstInt(i64),
    ConstBool(bool),
    /// Reference to a local variable or parameter by slot index into the
    /// owning `Function::locals`/`Function::params`.
    Local(u32),
    Param(u32),
    /// Reference to a translation-unit-level `const`/`static` global.
    Global(String),
    VectorCtor(Vec<TypedExpr>),
    Swizzle {
        base: Box<TypedExpr>,
        components: Vec<SwizzleComponent>,
    },
    Unary {
        op: UnOp,
        operand: Box<TypedExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Cast {
        kind: CastKind,
        operand: Box<TypedExpr>,
    },
    Call {
        callee: Callee,
        args: Vec<TypedExpr>,
    },
    Ternary {
        cond: Box<TypedExpr>,
        then_expr: Box<TypedExpr>,
        else_expr: Box<TypedExpr>,
    },
    /// Assignment used in expression position (e.g. `a = b = c;`); also the
    /// node `Stmt::Expr` wraps for a plain assignment statement. Evaluates
    /// to the assigned value.
    Assign {
        target: Box<LValue>,
        value: Box<TypedExpr>,
    },
}

#[derive(Debug, Clone)]
pub enum LValue {
    Local(u32),
    Param(u32),
    Swizzle {
        base: Box<LValue>,
        components: Vec<SwizzleComponent>,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        slot: u32,
        init: Option<TypedExpr>,
    },
    Expr(TypedExpr),
    Return(Option<TypedExpr>),
    If {
        cond: TypedExpr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        cond: TypedExpr,
        body: Vec<Stmt>,
    },
    Loop {
        init: Option<Box<Stmt>>,
        cond: Option<TypedExpr>,
        step: Option<TypedExpr>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    /// A bare `{ ... }` nested block used as a single statement.
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub struct LocalSlot {
    pub ty: Type,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<crate::proto::FunctionParameter>,
    pub return_type: Type,
    pub kernel_target: Option<KernelTarget>,
    pub external_linkage: bool,
    /// Locals beyond parameters, indexed by the slot ids used in
    /// `ExprKind::Local`/`LValue::Local`.
    pub locals: Vec<LocalSlot>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn param_direction(&self, index: u32) -> Direction {
        self.params[index as usize].direction
    }
}

/// A translation-unit-level `const`/`static` declaration, shared by every
/// kernel in the module.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub ty: Type,
    pub init: Option<TypedExpr>,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: Vec<GlobalDef>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn find(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn find_global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }
}
