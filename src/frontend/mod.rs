//! Front-end orchestration.
//!
//! `lower_translation_unit` runs the two-pass front end described: a
//! declaration pass that registers every prototype (and global) so forward
//! references resolve regardless of declaration order, followed by per-
//! function lowering that recovers at declaration granularity — one bad
//! `kernel`/`function` never poisons the rest of the translation unit.

pub mod casts;
pub mod emit;
pub mod overload;

use std::collections::HashMap;

use crate::ast::{self, ExternalDecl};
use crate::diagnostics::{Diagnostic, DiagnosticLog, ErrorKind, SourcePos};
use crate::ir::{Function, GlobalDef, Module, Stmt};
use crate::proto::{Direction, FunctionParameter, FunctionPrototype, KernelTarget};
use crate::types::{Specifier, Type};

use emit::{FunctionLowerer, ProgramContext};

/// Lower a parsed translation unit into an IR [`Module`]. Returns `None`
/// only when not a single declaration survived (an empty/fully-broken
/// source); a partial module with some functions is still returned so the
/// caller can list whichever kernels compiled.
pub fn lower_translation_unit(tu: &ast::TranslationUnit, log: &mut DiagnosticLog) -> Module {
    let mut protos: HashMap<String, Vec<FunctionPrototype>> = HashMap::new();
    let mut globals: HashMap<String, Type> = HashMap::new();
    let mut global_order: Vec<(String, ast::VarDecl)> = Vec::new();

    // Pass 1: register every prototype and global up front.
    for decl in &tu.decls {
        match decl {
            ExternalDecl::Kernel(k) => register_prototype(
                &mut protos,
                prototype_of_kernel(k),
                k.pos,
                log,
            ),
            ExternalDecl::Function(f) => register_prototype(
                &mut protos,
                prototype_of_function(f),
                f.pos,
                log,
            ),
            ExternalDecl::Global(g) => {
                let ty = Type::new(g.qualifier, g.specifier);
                globals.insert(g.name.clone(), ty);
                global_order.push((g.name.clone(), g.clone()));
            }
        }
    }

    let ctx = ProgramContext { protos, globals };
    let mut module = Module::default();

    for (name, decl) in &global_order {
        let ty = Type::new(decl.qualifier, decl.specifier);
        let init = match &decl.init {
            Some(e) => FunctionLowerer::new(&ctx).lower_global_init(e, ty, decl.pos, log),
            None => None,
        };
        module.globals.push(GlobalDef {
            name: name.clone(),
            ty,
            init,
        });
    }

    for decl in &tu.decls {
        match decl {
            ExternalDecl::Kernel(k) => {
                if let Some(kind) = KernelTarget::from_return_specifier(k.return_specifier) {
                    if let Some(func) = lower_one(
                        &ctx,
                        &k.name,
                        &k.params,
                        k.return_specifier,
                        &k.body,
                        Some(kind),
                        true,
                        k.pos,
                        log,
                    ) {
                        module.functions.push(func);
                    }
                } else {
                    log.push(Diagnostic::error(
                        ErrorKind::Declaration,
                        k.pos,
                        format!(
                            "kernel '{}' must return vec4 (render) or void (reduce), found '{}'",
                            k.name,
                            k.return_specifier.name()
                        ),
                    ));
                }
            }
            ExternalDecl::Function(f) => {
                if let Some(func) = lower_one(
                    &ctx,
                    &f.name,
                    &f.params,
                    f.return_specifier,
                    &f.body,
                    None,
                    false,
                    f.pos,
                    log,
                ) {
                    module.functions.push(func);
                }
            }
            ExternalDecl::Global(_) => {}
        }
    }

    module
}

#[allow(clippy::too_many_arguments)]
fn lower_one(
    ctx: &ProgramContext,
    name: &str,
    params: &[ast::Param],
    return_specifier: Specifier,
    body: &ast::Block,
    kernel_target: Option<KernelTarget>,
    external_linkage: bool,
    pos: SourcePos,
    log: &mut DiagnosticLog,
) -> Option<Function> {
    let lowerer = FunctionLowerer::new(ctx);
    let func = lowerer.lower_function(
        name.to_string(),
        params,
        return_specifier,
        body,
        kernel_target,
        external_linkage,
        log,
    )?;

    check_falls_off_end(&func, pos, log);
    check_out_params_assigned(&func, pos, log);

    Some(func)
}

fn register_prototype(
    protos: &mut HashMap<String, Vec<FunctionPrototype>>,
    proto: FunctionPrototype,
    pos: SourcePos,
    log: &mut DiagnosticLog,
) {
    let overloads = protos.entry(proto.name.clone()).or_default();
    if let Some(existing) = overloads.iter().find(|p| p.conflicts_with(&proto)) {
        log.push(Diagnostic::error(
            ErrorKind::Declaration,
            pos,
            format!("conflicting declarations of '{}'", existing.name),
        ));
        return;
    }
    // Overloads with distinct arity/specifiers coexist: every declaration
    // that survives the conflict check is kept, so the call-site resolver
    // sees the full candidate set.
    overloads.push(proto);
}

fn prototype_of_kernel(k: &ast::KernelDecl) -> FunctionPrototype {
    FunctionPrototype {
        name: k.name.clone(),
        params: params_of(&k.params),
        return_specifier: k.return_specifier,
        kernel_target: KernelTarget::from_return_specifier(k.return_specifier),
        external_linkage: true,
    }
}

fn prototype_of_function(f: &ast::FunctionDecl) -> FunctionPrototype {
    FunctionPrototype {
        name: f.name.clone(),
        params: params_of(&f.params),
        return_specifier: f.return_specifier,
        kernel_target: None,
        external_linkage: false,
    }
}

fn params_of(params: &[ast::Param]) -> Vec<FunctionParameter> {
    params
        .iter()
        .map(|p| FunctionParameter {
            name: p.name.clone(),
            ty: Type::new(p.qualifier, p.specifier),
            direction: Direction::from(p.direction),
        })
        .collect()
}

/// error kind 4: "non-void function falls off the end".
fn check_falls_off_end(func: &Function, pos: SourcePos, log: &mut DiagnosticLog) {
    if func.return_type.specifier == Specifier::Void {
        return;
    }
    if !always_returns(&func.body) {
        log.push(Diagnostic::error(
            ErrorKind::ControlFlow,
            pos,
            format!("function '{}' may fall off the end without returning", func.name),
        ));
    }
}

fn always_returns(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| stmt_always_returns(s))
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return(_) => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            !else_branch.is_empty() && always_returns(then_branch) && always_returns(else_branch)
        }
        Stmt::Block(stmts) => always_returns(stmts),
        // `while`/`for` may execute zero times, so they never guarantee a
        // return regardless of their body.
        _ => false,
    }
}

/// error kind 4, "relaxed to warning": an `out`/`inout` parameter not
/// assigned anywhere in the body. This is a syntactic "assigned somewhere"
/// check, not a per-path dataflow analysis.
fn check_out_params_assigned(func: &Function, pos: SourcePos, log: &mut DiagnosticLog) {
    for (i, p) in func.params.iter().enumerate() {
        if !p.direction.requires_lvalue() {
            continue;
        }
        if !assigns_param(&func.body, i as u32) {
            log.push(Diagnostic::warning(
                ErrorKind::ControlFlow,
                pos,
                format!(
                    "'{}' parameter '{}' of '{}' is never assigned",
                    if p.direction == Direction::Out { "out" } else { "inout" },
                    p.name,
                    func.name
                ),
            ));
        }
    }
}

fn assigns_param(stmts: &[Stmt], slot: u32) -> bool {
    stmts.iter().any(|s| stmt_assigns_param(s, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn compile(src: &str) -> (Module, DiagnosticLog) {
        let mut log = DiagnosticLog::default();
        let tu = parser::parse(src, &mut log);
        let module = lower_translation_unit(&tu, &mut log);
        (module, log)
    }

    /// S5: "Undefined symbol recovery".
    #[test]
    fn undefined_symbol_recovery_keeps_sibling_kernels() {
        let src = r#"
            kernel vec4 first() { return vec4(1.0, 0.0, 0.0, 1.0); }
            kernel vec4 second() { return vec4(undefined_name, 0.0, 0.0, 1.0); }
            kernel vec4 third() { return vec4(0.0, 0.0, 1.0, 1.0); }
        "#;
        let (module, log) = compile(src);
        assert_eq!(log.errors().count(), 1, "{:?}", log.diagnostics);
        let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[test]
    fn kernel_with_non_vec4_non_void_return_is_a_declaration_error() {
        let src = "kernel float bad() { return 1.0; }";
        let (_module, log) = compile(src);
        assert!(log.has_errors());
    }

    #[test]
    fn forward_reference_to_a_later_function_resolves() {
        let src = r#"
            kernel vec4 uses_helper() { return helper(); }
            function vec4 helper() { return vec4(0.0, 0.0, 0.0, 0.0); }
        "#;
        let (_module, log) = compile(src);
        assert!(!log.has_errors(), "{:?}", log.diagnostics);
    }

    #[test]
    fn falling_off_the_end_of_non_void_function_is_an_error() {
        let src = "function float f(bool c) { if (c) { return 1.0; } }";
        let (_module, log) = compile(src);
        assert!(log.has_errors());
    }

    #[test]
    fn reduce_kernel_target_is_void_and_accepted() {
        let src = "kernel void reduce_it() { }";
        let (module, log) = compile(src);
        assert!(!log.has_errors(), "{:?}", log.diagnostics);
        assert_eq!(module.functions[0].kernel_target, Some(KernelTarget::Reduce));
    }
}

fn stmt_assigns_param(stmt: &Stmt, slot: u32) -> bool {
    use crate::ir::{ExprKind, LValue};
    fn lvalue_targets(lv: &LValue, slot: u32) -> bool {
        match lv {
            LValue::Param(s) => *s == slot,
            LValue::Local(_) => false,
            LValue::Swizzle { base, .. } => lvalue_targets(base, slot),
        }
    }
    fn expr_assigns(e: &crate::ir::TypedExpr, slot: u32) -> bool {
        match &e.kind {
            ExprKind::Assign { target, value } => {
                lvalue_targets(target, slot) || expr_assigns(value, slot)
            }
            ExprKind::Binary { lhs, rhs, .. } => expr_assigns(lhs, slot) || expr_assigns(rhs, slot),
            ExprKind::Unary { operand, .. } => expr_assigns(operand, slot),
            ExprKind::Cast { operand, .. } => expr_assigns(operand, slot),
            ExprKind::Swizzle { base, .. } => expr_assigns(base, slot),
            ExprKind::VectorCtor(args) => args.iter().any(|a| expr_assigns(a, slot)),
            ExprKind::Call { args, .. } => args.iter().any(|a| expr_assigns(a, slot)),
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => expr_assigns(cond, slot) || expr_assigns(then_expr, slot) || expr_assigns(else_expr, slot),
            _ => false,
        }
    }
    match stmt {
        Stmt::Let { init: Some(e), .. } => expr_assigns(e, slot),
        Stmt::Expr(e) => expr_assigns(e, slot),
        Stmt::Return(Some(e)) => expr_assigns(e, slot),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => expr_assigns(cond, slot) || assigns_param(then_branch, slot) || assigns_param(else_branch, slot),
        Stmt::While { cond, body } => expr_assigns(cond, slot) || assigns_param(body, slot),
        Stmt::Loop {
            init,
            cond,
            step,
            body,
        } => {
            init.as_ref().is_some_and(|s| stmt_assigns_param(s, slot))
                || cond.as_ref().is_some_and(|c| expr_assigns(c, slot))
                || step.as_ref().is_some_and(|s| expr_assigns(s, slot))
                || assigns_param(body, slot)
        }
        Stmt::Block(stmts) => assigns_param(stmts, slot),
        _ => false,
    }
}


