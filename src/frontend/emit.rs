//! Per-expression/statement lowering.
//!
//! Each emitter is pure over `(context, expression) -> typed IR value`: it
//! either returns a [`crate::ir::TypedExpr`] carrying both an IR node and
//! its logical type, or logs a diagnostic and returns `None`. Errors never
//! panic or abort the whole compile — the caller in `mod.rs` recovers at the
//! next external declaration.

use std::collections::HashMap;

use crate::ast;
use crate::diagnostics::{Diagnostic, DiagnosticLog, ErrorKind, SourcePos};
use crate::frontend::casts::coerce;
use crate::frontend::overload::{self, ResolveError};
use crate::ir::{Callee, ExprKind, Function, GlobalDef, LValue, LocalSlot, Stmt, TypedExpr};
use crate::proto::{Direction, FunctionParameter, FunctionPrototype};
use crate::symtab::{Symbol, SymbolTable};
use crate::types::{implicit_cast, CastKind, Qualifier, Specifier, Type};

pub struct ProgramContext {
    pub protos: HashMap<String, Vec<FunctionPrototype>>,
    pub globals: HashMap<String, Type>,
}

pub struct FunctionLowerer<'a> {
    ctx: &'a ProgramContext,
    symtab: SymbolTable,
    locals: Vec<LocalSlot>,
    param_types: Vec<Type>,
    loop_depth: u32,
    ok: bool,
}

impl<'a> FunctionLowerer<'a> {
    pub fn new(ctx: &'a ProgramContext) -> FunctionLowerer<'a> {
        FunctionLowerer {
            ctx,
            symtab: SymbolTable::new(),
            locals: Vec::new(),
            param_types: Vec::new(),
            loop_depth: 0,
            ok: true,
        }
    }

    fn fail(&mut self) {
        self.ok = false;
    }

    fn new_local(&mut self, name: &str, ty: Type) -> u32 {
        let slot = self.locals.len() as u32;
        self.locals.push(LocalSlot {
            ty,
            name: name.to_string(),
        });
        slot
    }

    /// Lower a translation-unit-level global initialiser. Globals have no
    /// parameters/locals of their own.
    pub fn lower_global_init(
        mut self,
        expr: &ast::Expr,
        ty: Type,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let lowered = self.lower_expr(expr, log)?;
        self.coerce_or_err(lowered, ty, pos, log)
    }

    /// Lower one `kernel`/`function` body. Returns `None` if any error was
    /// logged while lowering this declaration — callers must not add a
    /// partially-lowered function to the module.
    pub fn lower_function(
        mut self,
        name: String,
        params: &[ast::Param],
        return_specifier: Specifier,
        body: &ast::Block,
        kernel_target: Option<crate::proto::KernelTarget>,
        external_linkage: bool,
        log: &mut DiagnosticLog,
    ) -> Option<Function> {
        let mut ir_params = Vec::with_capacity(params.len());
        for (i, p) in params.iter().enumerate() {
            let ty = Type::new(p.qualifier, p.specifier);
            if !self.symtab.declare(
                &p.name,
                Symbol {
                    ty,
                    slot: i as u32,
                    is_param: true,
                },
            ) {
                log.push(Diagnostic::error(
                    ErrorKind::Declaration,
                    p.pos,
                    format!("duplicate parameter name '{}'", p.name),
                ));
                self.fail();
            }
            self.param_types.push(ty);
            ir_params.push(FunctionParameter {
                name: p.name.clone(),
                ty,
                direction: Direction::from(p.direction),
            });
        }

        let lowered_body = self.lower_block(body, log);

        if !self.ok {
            return None;
        }

        Some(Function {
            name,
            params: ir_params,
            return_type: Type::plain(return_specifier),
            kernel_target,
            external_linkage,
            locals: self.locals,
            body: lowered_body,
        })
    }

    fn lower_block(&mut self, block: &ast::Block, log: &mut DiagnosticLog) -> Vec<Stmt> {
        self.symtab.push_scope();
        let mut out = Vec::with_capacity(block.stmts.len());
        for s in &block.stmts {
            if let Some(lowered) = self.lower_stmt(s, log) {
                out.push(lowered);
            }
        }
        self.symtab.pop_scope();
        out
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt, log: &mut DiagnosticLog) -> Option<Stmt> {
        match stmt {
            ast::Stmt::VarDecl(decl) => {
                let ty = Type::new(decl.qualifier, decl.specifier);
                let init = match &decl.init {
                    Some(e) => {
                        let lowered = self.lower_expr(e, log)?;
                        let coerced = self.coerce_or_err(lowered, ty, decl.pos, log)?;
                        Some(coerced)
                    }
                    None => None,
                };
                let slot = self.new_local(&decl.name, ty);
                if !self.symtab.declare(
                    &decl.name,
                    Symbol {
                        ty,
                        slot,
                        is_param: false,
                    },
                ) {
                    log.push(Diagnostic::error(
                        ErrorKind::Declaration,
                        decl.pos,
                        format!("redeclaration of '{}'", decl.name),
                    ));
                    self.fail();
                    return None;
                }
                Some(Stmt::Let { slot, init })
            }
            ast::Stmt::Expr(e) => self.lower_expr(e, log).map(Stmt::Expr),
            ast::Stmt::Return(value, pos) => {
                let value = match value {
                    Some(e) => Some(self.lower_expr(e, log)?),
                    None => None,
                };
                let _ = pos;
                Some(Stmt::Return(value))
            }
            ast::Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_bool_expr(cond, log)?;
                let then_branch = self.lower_block(then_branch, log);
                let else_branch = match else_branch {
                    Some(b) => self.lower_block(b, log),
                    None => Vec::new(),
                };
                Some(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            ast::Stmt::While { cond, body } => {
                let cond = self.lower_bool_expr(cond, log)?;
                self.loop_depth += 1;
                let body = self.lower_block(body, log);
                self.loop_depth -= 1;
                Some(Stmt::While { cond, body })
            }
            ast::Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.symtab.push_scope();
                let init = match init {
                    Some(s) => self.lower_stmt(s, log).map(Box::new),
                    None => None,
                };
                let cond = match cond {
                    Some(c) => Some(self.lower_bool_expr(c, log)?),
                    None => None,
                };
                let step = match step {
                    Some(e) => Some(self.lower_expr(e, log)?),
                    None => None,
                };
                self.loop_depth += 1;
                let body = self.lower_block(body, log);
                self.loop_depth -= 1;
                self.symtab.pop_scope();
                Some(Stmt::Loop {
                    init,
                    cond,
                    step,
                    body,
                })
            }
            ast::Stmt::Block(b) => Some(Stmt::Block(self.lower_block(b, log))),
            ast::Stmt::Break(pos) => {
                if self.loop_depth == 0 {
                    log.push(Diagnostic::error(
                        ErrorKind::ControlFlow,
                        *pos,
                        "'break' outside of a loop",
                    ));
                    self.fail();
                    return None;
                }
                Some(Stmt::Break)
            }
            ast::Stmt::Continue(pos) => {
                if self.loop_depth == 0 {
                    log.push(Diagnostic::error(
                        ErrorKind::ControlFlow,
                        *pos,
                        "'continue' outside of a loop",
                    ));
                    self.fail();
                    return None;
                }
                Some(Stmt::Continue)
            }
        }
    }

    fn coerce_or_err(
        &mut self,
        expr: TypedExpr,
        target: Type,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        match coerce(expr.clone(), target) {
            Some(e) => Some(e),
            None => {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!("cannot convert '{}' to '{}'", expr.ty, target),
                ));
                self.fail();
                None
            }
        }
    }

    fn lower_bool_expr(&mut self, e: &ast::Expr, log: &mut DiagnosticLog) -> Option<TypedExpr> {
        let lowered = self.lower_expr(e, log)?;
        self.coerce_or_err(lowered, Type::plain(Specifier::Bool), e.pos(), log)
    }

    fn lower_expr(&mut self, expr: &ast::Expr, log: &mut DiagnosticLog) -> Option<TypedExpr> {
        match expr {
            ast::Expr::IntLit(v, _) => Some(TypedExpr::new(
                Type::plain(Specifier::Int),
                ExprKind::ConstInt(*v),
            )),
            ast::Expr::FloatLit(v, _) => Some(TypedExpr::new(
                Type::plain(Specifier::Float),
                ExprKind::ConstFloat(*v),
            )),
            ast::Expr::BoolLit(v, _) => Some(TypedExpr::new(
                Type::plain(Specifier::Bool),
                ExprKind::ConstBool(*v),
            )),
            ast::Expr::Ident(name, pos) => self.lower_ident(name, *pos, log),
            ast::Expr::Call { callee, args, pos } => self.lower_call(callee, args, *pos, log),
            ast::Expr::VectorCtor {
                specifier,
                args,
                pos,
            } => self.lower_vector_ctor(*specifier, args, *pos, log),
            ast::Expr::Swizzle {
                base,
                components,
                pos,
            } => self.lower_swizzle(base, components, *pos, log),
            ast::Expr::Unary { op, operand, pos } => self.lower_unary(*op, operand, *pos, log),
            ast::Expr::Binary { op, lhs, rhs, pos } => self.lower_binary(*op, lhs, rhs, *pos, log),
            ast::Expr::Assign { op, lhs, rhs, pos } => self.lower_assign(*op, lhs, rhs, *pos, log),
            ast::Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                pos,
            } => self.lower_ternary(cond, then_expr, else_expr, *pos, log),
            ast::Expr::Cast {
                specifier,
                operand,
                pos,
            } => self.lower_cast(*specifier, operand, *pos, log),
        }
    }

    fn lower_ident(
        &mut self,
        name: &str,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        if let Some(sym) = self.symtab.lookup(name) {
            let kind = if sym.is_param {
                ExprKind::Param(sym.slot)
            } else {
                ExprKind::Local(sym.slot)
            };
            return Some(TypedExpr::new(sym.ty, kind));
        }
        if let Some(ty) = self.ctx.globals.get(name) {
            return Some(TypedExpr::new(*ty, ExprKind::Global(name.to_string())));
        }
        log.push(Diagnostic::error(
            ErrorKind::Declaration,
            pos,
            format!("undefined symbol '{name}'"),
        ));
        self.fail();
        None
    }

    fn lower_args(&mut self, args: &[ast::Expr], log: &mut DiagnosticLog) -> Option<Vec<TypedExpr>> {
        let mut out = Vec::with_capacity(args.len());
        let mut ok = true;
        for a in args {
            match self.lower_expr(a, log) {
                Some(e) => out.push(e),
                None => ok = false,
            }
        }
        ok.then_some(out)
    }

    fn lower_call(
        &mut self,
        callee: &str,
        args: &[ast::Expr],
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let args = self.lower_args(args, log)?;
        let arg_types: Vec<Type> = args.iter().map(|a| a.ty).collect();

        let mut candidates = overload::builtin_candidates(callee);
        if let Some(protos) = self.ctx.protos.get(callee) {
            candidates.extend(protos.iter().map(overload::Candidate::from_user));
        }

        if candidates.is_empty() {
            log.push(Diagnostic::error(
                ErrorKind::Declaration,
                pos,
                format!("call to undefined function '{callee}'"),
            ));
            self.fail();
            return None;
        }

        let candidate = match overload::resolve(&candidates, &arg_types) {
            Ok(c) => c,
            Err(ResolveError::NoMatch) => {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!("no overload of '{callee}' matches the given argument types"),
                ));
                self.fail();
                return None;
            }
            Err(ResolveError::Ambiguous) => {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!("call to '{callee}' is ambiguous"),
                ));
                self.fail();
                return None;
            }
        };

        for (dir, arg) in candidate.directions.iter().zip(args.iter()) {
            if dir.requires_lvalue() && !is_lvalue_expr(arg) {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!("argument to 'out'/'inout' parameter of '{callee}' must be an l-value"),
                ));
                self.fail();
                return None;
            }
        }

        let mut coerced_args = Vec::with_capacity(args.len());
        for (arg, param_ty) in args.into_iter().zip(candidate.params.iter()) {
            match coerce(arg, *param_ty) {
                Some(c) => coerced_args.push(c),
                None => {
                    log.push(Diagnostic::internal(
                        "overload resolution accepted an argument with no valid cast",
                    ));
                    self.fail();
                    return None;
                }
            }
        }

        Some(TypedExpr::new(
            candidate.return_ty,
            ExprKind::Call {
                callee: candidate.callee.clone(),
                args: coerced_args,
            },
        ))
    }

    fn lower_vector_ctor(
        &mut self,
        specifier: Specifier,
        args: &[ast::Expr],
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let args = self.lower_args(args, log)?;
        let want = specifier.arity();
        let total_lanes: usize = args.iter().map(|a| a.ty.arity()).sum();
        if total_lanes != want {
            log.push(Diagnostic::error(
                ErrorKind::Type,
                pos,
                format!(
                    "'{}' constructor expects {want} components, found {total_lanes}",
                    specifier.name()
                ),
            ));
            self.fail();
            return None;
        }
        let mut coerced = Vec::with_capacity(args.len());
        for a in args {
            let target = if a.ty.arity() == 1 {
                Type::plain(Specifier::Float)
            } else {
                a.ty
            };
            match coerce(a, target) {
                Some(c) => coerced.push(c),
                None => {
                    log.push(Diagnostic::error(
                        ErrorKind::Type,
                        pos,
                        "vector constructor argument must be numeric",
                    ));
                    self.fail();
                    return None;
                }
            }
        }
        Some(TypedExpr::new(
            Type::plain(specifier),
            ExprKind::VectorCtor(coerced),
        ))
    }

    fn lower_swizzle(
        &mut self,
        base: &ast::Expr,
        components: &[ast::SwizzleComponent],
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let base = self.lower_expr(base, log)?;
        let arity = base.ty.arity();
        for c in components {
            if component_index(*c) >= arity {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!(
                        "swizzle component out of range for a {}-component value",
                        arity
                    ),
                ));
                self.fail();
                return None;
            }
        }
        let result_specifier = match components.len() {
            1 => base.ty.element(),
            n => Specifier::vector_of_arity(n).unwrap_or(Specifier::Vec4),
        };
        Some(TypedExpr::new(
            Type::plain(result_specifier),
            ExprKind::Swizzle {
                base: Box::new(base),
                components: components.to_vec(),
            },
        ))
    }

    fn lower_unary(
        &mut self,
        op: ast::UnOp,
        operand: &ast::Expr,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let lowered = self.lower_expr(operand, log)?;
        match op {
            ast::UnOp::Neg => {
                if !(lowered.ty.specifier.is_scalar() || lowered.ty.specifier.is_vector()) {
                    log.push(Diagnostic::error(
                        ErrorKind::Type,
                        pos,
                        "unary '-' requires a numeric operand",
                    ));
                    self.fail();
                    return None;
                }
                let ty = lowered.ty;
                Some(TypedExpr::new(
                    ty,
                    ExprKind::Unary {
                        op,
                        operand: Box::new(lowered),
                    },
                ))
            }
            ast::UnOp::Not => {
                let coerced = self.coerce_or_err(lowered, Type::plain(Specifier::Bool), pos, log)?;
                Some(TypedExpr::new(
                    Type::plain(Specifier::Bool),
                    ExprKind::Unary {
                        op,
                        operand: Box::new(coerced),
                    },
                ))
            }
            ast::UnOp::PreInc | ast::UnOp::PreDec | ast::UnOp::PostInc | ast::UnOp::PostDec => {
                if !is_lvalue_expr(operand) {
                    log.push(Diagnostic::error(
                        ErrorKind::Type,
                        pos,
                        "increment/decrement requires an l-value",
                    ));
                    self.fail();
                    return None;
                }
                let ty = lowered.ty;
                Some(TypedExpr::new(
                    ty,
                    ExprKind::Unary {
                        op,
                        operand: Box::new(lowered),
                    },
                ))
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: ast::BinOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let l = self.lower_expr(lhs, log)?;
        let r = self.lower_expr(rhs, log)?;

        use ast::BinOp::*;
        match op {
            And | Or => {
                let l = self.coerce_or_err(l, Type::plain(Specifier::Bool), pos, log)?;
                let r = self.coerce_or_err(r, Type::plain(Specifier::Bool), pos, log)?;
                return Some(TypedExpr::new(
                    Type::plain(Specifier::Bool),
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                ));
            }
            Eq | Ne | Lt | Le | Gt | Ge => {
                let (l, r, _common) = self.unify_numeric(l, r, pos, log)?;
                return Some(TypedExpr::new(
                    Type::plain(Specifier::Bool),
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                ));
            }
            Add | Sub | Mul | Div | Mod => {
                let (l, r, common) = self.unify_numeric(l, r, pos, log)?;
                return Some(TypedExpr::new(
                    common,
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                ));
            }
        }
    }

    /// Unify two numeric operand types per widening rules, allowing scalar-
    /// vector splat on either side, and report a type error if they cannot
    /// be reconciled.
    fn unify_numeric(
        &mut self,
        l: TypedExpr,
        r: TypedExpr,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<(TypedExpr, TypedExpr, Type)> {
        let common_specifier = if l.ty.specifier.is_vector() {
            l.ty.specifier
        } else if r.ty.specifier.is_vector() {
            r.ty.specifier
        } else if l.ty.specifier == Specifier::Float || r.ty.specifier == Specifier::Float {
            Specifier::Float
        } else if l.ty.specifier == Specifier::Int || r.ty.specifier == Specifier::Int {
            Specifier::Int
        } else {
            Specifier::Bool
        };
        let common = Type::plain(common_specifier);
        let l2 = coerce(l.clone(), common);
        let r2 = coerce(r.clone(), common);
        match (l2, r2) {
            (Some(l2), Some(r2)) => Some((l2, r2, common)),
            _ => {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    pos,
                    format!("incompatible operand types '{}' and '{}'", l.ty, r.ty),
                ));
                self.fail();
                None
            }
        }
    }

    fn lower_assign(
        &mut self,
        op: ast::AssignOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let target = self.lower_lvalue(lhs, log)?;
        let lhs_ty = self.lvalue_type(&target);
        let rhs_val = self.lower_expr(rhs, log)?;

        // Compound assignment x OP= y lowers as x = (T)(x OP y).
        let value = if op == ast::AssignOp::Assign {
            self.coerce_or_err(rhs_val, lhs_ty, pos, log)?
        } else {
            let bin_op = match op {
                ast::AssignOp::AddAssign => ast::BinOp::Add,
                ast::AssignOp::SubAssign => ast::BinOp::Sub,
                ast::AssignOp::MulAssign => ast::BinOp::Mul,
                ast::AssignOp::DivAssign => ast::BinOp::Div,
                ast::AssignOp::Assign => unreachable!(),
            };
            let lhs_val = self.lower_expr(lhs, log)?;
            let (l, r, common) = self.unify_numeric(lhs_val, rhs_val, pos, log)?;
            let combined = TypedExpr::new(
                common,
                ExprKind::Binary {
                    op: bin_op,
                    lhs: Box::new(l),
                    rhs: Box::new(r),
                },
            );
            self.coerce_or_err(combined, lhs_ty, pos, log)?
        };

        Some(TypedExpr::new(
            lhs_ty,
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
        ))
    }

    fn lower_lvalue(&mut self, expr: &ast::Expr, log: &mut DiagnosticLog) -> Option<LValue> {
        match expr {
            ast::Expr::Ident(name, pos) => {
                if let Some(sym) = self.symtab.lookup(name) {
                    Some(if sym.is_param {
                        LValue::Param(sym.slot)
                    } else {
                        LValue::Local(sym.slot)
                    })
                } else {
                    log.push(Diagnostic::error(
                        ErrorKind::Declaration,
                        *pos,
                        format!("undefined symbol '{name}'"),
                    ));
                    self.fail();
                    None
                }
            }
            ast::Expr::Swizzle {
                base,
                components,
                pos,
            } => {
                let base_lv = self.lower_lvalue(base, log)?;
                let base_ty = self.lvalue_type(&base_lv);
                for c in components {
                    if component_index(*c) >= base_ty.arity() {
                        log.push(Diagnostic::error(
                            ErrorKind::Type,
                            *pos,
                            "swizzle component out of range in assignment target",
                        ));
                        self.fail();
                        return None;
                    }
                }
                Some(LValue::Swizzle {
                    base: Box::new(base_lv),
                    components: components.clone(),
                })
            }
            other => {
                log.push(Diagnostic::error(
                    ErrorKind::Type,
                    other.pos(),
                    "expression is not assignable",
                ));
                self.fail();
                None
            }
        }
    }

    fn lvalue_type(&self, lv: &LValue) -> Type {
        match lv {
            LValue::Local(slot) => self.locals[*slot as usize].ty,
            LValue::Param(slot) => self
                .param_types
                .get(*slot as usize)
                .copied()
                .unwrap_or(Type::plain(Specifier::Void)),
            LValue::Swizzle { base, components } => {
                let base_ty = self.lvalue_type(base);
                match components.len() {
                    1 => base_ty.element(),
                    n => Type::plain(Specifier::vector_of_arity(n).unwrap_or(Specifier::Vec4)),
                }
            }
        }
    }

    /// Explicit `(T) expr` cast. Unlike implicit coercion this also allows
    /// float->int truncation and vector->vector lane-count changes are still
    /// rejected — the kernel language only ever narrows scalars explicitly.
    fn lower_cast(
        &mut self,
        specifier: Specifier,
        operand: &ast::Expr,
        pos: SourcePos,
        log: &mut DiagnosticLog,
    ) -> Option<TypedExpr> {
        let lowered = self.lower_expr(operand, log)?;
        let target = Type::plain(specifier);

        if let Some(kind) = implicit_cast(lowered.ty, target) {
            return Some(match kind {
                CastKind::Identity | CastKind::ConstDrop => TypedExpr::new(target, lowered.kind),
                other => TypedExpr::new(
                    target,
                    ExprKind::Cast {
                        kind: other,
                        operand: Box::new(lowered),
                    },
                ),
            });
        }

        // Explicit narrowing scalar<->scalar is allowed even though no
        // implicit cast exists for it.
        if lowered.ty.specifier.is_scalar() && specifier.is_scalar() {
            let kind = match (lowered.ty.specifier, specifier) {
                (Specifier::Float, Specifier::Int) => CastKind::FloatToInt,
                (Specifier::Float, Specifier::Bool) => CastKind::FloatToBool,
                (Specifier::Int, Specifier::Bool) => CastKind::IntToBool,
                _ => CastKind::Identity,
            };
            return Some(TypedExpr::new(
                target,
                ExprKind::Cast {
                    kind,
                    operand: Box::new(lowered),
                },
            ));
        }

        log.push(Diagnostic::error(
            ErrorKind::Type,
            pos,
            format!("cannot cast '{}' to '{}'", lowered.ty, target),
        ));
        self.fail();
        None
    }
}

fn component_index(c: ast::SwizzleComponent) -> usize {
    match c {
        ast::SwizzleComponent::X => 0,
        ast::SwizzleComponent::Y => 1,
        ast::SwizzleComponent::Z => 2,
        ast::SwizzleComponent::W => 3,
    }
}

fn is_lvalue_expr(e: &ast::Expr) -> bool {
    match e {
        ast::Expr::Ident(..) => true,
        ast::Expr::Swizzle { base, .. } => is_lvalue_expr(base),
        _ => false,
    }
}
