//! Graph specialiser.
//!
//! Turns a bound, valid sampler subgraph into a flat set of native-ready IR
//! functions: clone the reachable kernel bodies, resolve every
//! `sample`/`samplerTransform`/`samplerExtent`/`samplerCoord` built-in
//! against the concrete graph, inline every bound argument as a constant,
//! then hand the result to `optimize.rs` before `codegen.rs` JITs it.
//!
//! Only identity child transforms are supported (an Open Question resolved
//! in favour of a hard error rather than silently wrong output — see
//! DESIGN.md); `samplerTransform`/`samplerCoord` therefore always fold to
//! the ambient destination coordinate once resolved.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::EngineError;
use crate::ir::{Callee, ExprKind, Function, Module, Stmt, TypedExpr};
use crate::optimize::optimize_function;
use crate::quark::Quark;
use crate::sampler::arena::{ArgumentValue, KernelSamplerNode, SamplerArena, SamplerId, SamplerNode};
use crate::types::{Specifier, Type};

pub struct TextureEntry {
    pub width: u32,
    pub height: u32,
    pub pixels: Rc<Vec<u8>>,
}

pub struct SpecializedFunction {
    pub name: String,
    pub function: Function,
}

pub struct SpecializedGraph {
    pub root: String,
    pub functions: Vec<SpecializedFunction>,
    pub textures: Vec<TextureEntry>,
}

struct Builder<'a> {
    arena: &'a SamplerArena,
    kernel_memo: HashMap<SamplerId, String>,
    texture_memo: HashMap<SamplerId, u32>,
    textures: Vec<TextureEntry>,
    functions: Vec<SpecializedFunction>,
}

/// Specialises the subgraph reachable from `root`, which must be a kernel
/// sampler.
pub fn specialize(arena: &SamplerArena, root: SamplerId) -> Result<SpecializedGraph, EngineError> {
    arena
        .validate_reachable(root)
        .map_err(EngineError::UnboundSampler)?;

    let SamplerNode::Kernel(root_node) = arena.node(root) else {
        return Err(EngineError::UnboundSampler(root));
    };
    let root_entry = root_node
        .kernel
        .kernel(&root_node.entry)
        .expect("a valid kernel sampler's entry always names a compiled kernel record");
    // Open Question resolution: the reduce-kernel execution path is left for
    // a future extension, so a render/reduce kernel's signature is fully
    // modeled but only a `render` kernel is an executable root.
    if root_entry.target != crate::proto::KernelTarget::Render {
        return Err(EngineError::ReduceNotExecutable(root));
    }

    let mut builder = Builder {
        arena,
        kernel_memo: HashMap::new(),
        texture_memo: HashMap::new(),
        textures: Vec::new(),
        functions: Vec::new(),
    };
    let root_name = builder.specialize_kernel(root)?;
    Ok(SpecializedGraph {
        root: root_name,
        functions: builder.functions,
        textures: builder.textures,
    })
}

impl<'a> Builder<'a> {
    fn specialize_kernel(&mut self, id: SamplerId) -> Result<String, EngineError> {
        if let Some(name) = self.kernel_memo.get(&id) {
            return Ok(name.clone());
        }

        if !self.arena.transform(id).is_identity() {
            return Err(EngineError::UnsupportedTransform(id));
        }

        let SamplerNode::Kernel(node) = self.arena.node(id) else {
            return Err(EngineError::UnboundSampler(id));
        };

        let prefix = format!("__kf_n{}_", id.index());
        let entry_name = format!("{prefix}{}", node.entry);
        // Reserve the memo entry before recursing so a kernel sampler whose
        // own body (indirectly) re-enters the same sampler id is at least
        // terminated rather than looping forever; true self-reference is
        // impossible through bind_argument (a node can't be bound as its
        // own child before it exists), but stay defensive.
        self.kernel_memo.insert(id, entry_name.clone());

        let module = node
            .kernel
            .module()
            .expect("validate_reachable guarantees a valid module");
        let entry_fn = module
            .find(&node.entry)
            .expect("validate_reachable guarantees the entry function exists")
            .clone();

        self.collect_module_closure(id, node, module, &entry_fn, &prefix)?;

        Ok(entry_name)
    }

    fn collect_module_closure(
        &mut self,
        id: SamplerId,
        node: &KernelSamplerNode,
        module: &Module,
        entry_fn: &Function,
        prefix: &str,
    ) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        let mut frontier = vec![entry_fn.name.clone()];
        seen.insert(entry_fn.name.clone());
        let mut closure = Vec::new();

        while let Some(name) = frontier.pop() {
            let f = if name == entry_fn.name {
                entry_fn.clone()
            } else {
                module
                    .find(&name)
                    .expect("Callee::User only ever names a function in the same module")
                    .clone()
            };
            for callee in called_names(&f) {
                if seen.insert(callee.clone()) {
                    frontier.push(callee);
                }
            }
            closure.push(f);
        }

        let substitutions = self.build_argument_substitutions(id, node, entry_fn)?;

        for mut f in closure {
            let is_entry = f.name == entry_fn.name;
            rename_user_calls(&mut f, prefix);
            if is_entry {
                self.resolve_sampler_builtins(node, &mut f)?;
                substitute_params(&mut f, &substitutions);
            }
            let unique_name = format!("{prefix}{}", f.name);
            f.name = unique_name.clone();
            optimize_function(&mut f);
            self.functions.push(SpecializedFunction {
                name: unique_name,
                function: f,
            });
        }
        Ok(())
    }

    /// Non-sampler `in` parameters of the entry kernel are bound to
    /// concrete values at lock time; build the slot -> constant map used to
    /// erase them before codegen ever sees a `Param` reference.
    fn build_argument_substitutions(
        &self,
        id: SamplerId,
        node: &KernelSamplerNode,
        entry_fn: &Function,
    ) -> Result<HashMap<u32, ExprKind>, EngineError> {
        let mut out = HashMap::new();
        for (slot, param) in entry_fn.params.iter().enumerate() {
            if param.ty.specifier == Specifier::Sampler {
                continue;
            }
            let quark = Quark::new(&param.name);
            let value = node.args.get(&quark);
            let kind = match value {
                Some(ArgumentValue::Float(f)) => ExprKind::ConstFloat(*f as f64),
                Some(ArgumentValue::Int(i)) => ExprKind::ConstInt(*i),
                Some(ArgumentValue::Bool(b)) => ExprKind::ConstBool(*b),
                Some(ArgumentValue::Vector { lanes, arity }) => ExprKind::VectorCtor(
                    lanes[..*arity as usize]
                        .iter()
                        .map(|v| TypedExpr::new(Type::plain(Specifier::Float), ExprKind::ConstFloat(*v as f64)))
                        .collect(),
                ),
                _ => return Err(EngineError::UnboundSampler(id)),
            };
            out.insert(slot as u32, kind);
        }
        Ok(out)
    }

    fn resolve_sampler_builtins(
        &mut self,
        node: &KernelSamplerNode,
        f: &mut Function,
    ) -> Result<(), EngineError> {
        let mut err = None;
        rewrite_stmts(&mut f.body, &mut |expr| {
            if err.is_some() {
                return;
            }
            if let ExprKind::Call { callee, args } = &mut expr.kind {
                let is_builtin = matches!(
                    callee,
                    Callee::Sample | Callee::SamplerTransform | Callee::SamplerExtent | Callee::SamplerCoord
                );
                if !is_builtin {
                    return;
                }
                let slot = match args.first().map(|a| &a.kind) {
                    Some(ExprKind::Param(slot)) => *slot,
                    _ => {
                        err = Some(EngineError::UnsupportedSamplerExpression);
                        return;
                    }
                };
                let param_name = &f_param_name(f, slot);
                let quark = Quark::new(param_name);
                let child = match node.args.get(&quark) {
                    Some(ArgumentValue::Sampler(id)) => *id,
                    _ => {
                        err = Some(EngineError::UnsupportedSamplerExpression);
                        return;
                    }
                };
                match self.resolve_one_builtin(callee.clone(), child, args.as_slice()) {
                    Ok(replacement) => *expr = replacement,
                    Err(e) => err = Some(e),
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        Ok(())
    }

    fn resolve_one_builtin(
        &mut self,
        callee: Callee,
        child: SamplerId,
        args: &[TypedExpr],
    ) -> Result<TypedExpr, EngineError> {
        if !self.arena.transform(child).is_identity() {
            return Err(EngineError::UnsupportedTransform(child));
        }
        let coord = args.get(1).cloned();
        match callee {
            Callee::SamplerCoord => Ok(dest_coord_call()),
            Callee::SamplerTransform => Ok(coord.unwrap_or_else(dest_coord_call)),
            Callee::SamplerExtent => {
                let rect = self.arena.extent(child);
                Ok(TypedExpr::new(
                    Type::plain(Specifier::Vec4),
                    ExprKind::VectorCtor(
                        rect.as_array()
                            .into_iter()
                            .map(|v| TypedExpr::new(Type::plain(Specifier::Float), ExprKind::ConstFloat(v as f64)))
                            .collect(),
                    ),
                ))
            }
            Callee::Sample => {
                let coord = coord.ok_or(EngineError::UnsupportedSamplerExpression)?;
                match self.arena.node(child) {
                    SamplerNode::Null => Ok(TypedExpr::new(
                        Type::plain(Specifier::Vec4),
                        ExprKind::VectorCtor(
                            [0.0_f64; 4]
                                .into_iter()
                                .map(|v| TypedExpr::new(Type::plain(Specifier::Float), ExprKind::ConstFloat(v)))
                                .collect(),
                        ),
                    )),
                    SamplerNode::Texture(tex) => {
                        let idx = *self.texture_memo.entry(child).or_insert_with(|| {
                            let i = self.textures.len() as u32;
                            self.textures.push(TextureEntry {
                                width: tex.width,
                                height: tex.height,
                                pixels: Rc::new(tex.pixels.clone()),
                            });
                            i
                        });
                        Ok(TypedExpr::new(
                            Type::plain(Specifier::Vec4),
                            ExprKind::Call {
                                callee: Callee::TextureSample(idx),
                                args: vec![coord],
                            },
                        ))
                    }
                    SamplerNode::Kernel(_) => {
                        let child_name = self.specialize_kernel(child)?;
                        Ok(TypedExpr::new(
                            Type::plain(Specifier::Vec4),
                            ExprKind::Call {
                                callee: Callee::User(child_name),
                                args: vec![coord],
                            },
                        ))
                    }
                }
            }
            other => unreachable!("not a sampler built-in: {other:?}"),
        }
    }
}

fn f_param_name(f: &Function, slot: u32) -> String {
    f.params[slot as usize].name.clone()
}

fn dest_coord_call() -> TypedExpr {
    TypedExpr::new(
        Type::plain(Specifier::Vec2),
        ExprKind::Call {
            callee: Callee::DestCoord,
            args: Vec::new(),
        },
    )
}

fn called_names(f: &Function) -> Vec<String> {
    let mut names = Vec::new();
    walk_stmts(&f.body, &mut |expr| {
        if let ExprKind::Call {
            callee: Callee::User(name),
            ..
        } = &expr.kind
        {
            names.push(name.clone());
        }
    });
    names
}

fn rename_user_calls(f: &mut Function, prefix: &str) {
    rewrite_stmts(&mut f.body, &mut |expr| {
        if let ExprKind::Call {
            callee: Callee::User(name),
            ..
        } = &mut expr.kind
        {
            *name = format!("{prefix}{name}");
        }
    });
}

fn substitute_params(f: &mut Function, substitutions: &HashMap<u32, ExprKind>) {
    rewrite_stmts(&mut f.body, &mut |expr| {
        if let ExprKind::Param(slot) = expr.kind {
            if let Some(replacement) = substitutions.get(&slot) {
                expr.kind = replacement.clone();
            }
        }
    });
}

/// Shared read-only tree walk used to collect information (e.g. which
/// functions a body calls) without mutating it.
fn walk_stmts(stmts: &[Stmt], visit: &mut impl FnMut(&TypedExpr)) {
    for stmt in stmts {
        match stmt {
            Stmt::Let { init: Some(e), .. } => walk_expr(e, visit),
            Stmt::Expr(e) | Stmt::Return(Some(e)) => walk_expr(e, visit),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                walk_expr(cond, visit);
                walk_stmts(then_branch, visit);
                walk_stmts(else_branch, visit);
            }
            Stmt::While { cond, body } => {
                walk_expr(cond, visit);
                walk_stmts(body, visit);
            }
            Stmt::Loop {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    walk_stmts(std::slice::from_ref(init), visit);
                }
                if let Some(cond) = cond {
                    walk_expr(cond, visit);
                }
                if let Some(step) = step {
                    walk_expr(step, visit);
                }
                walk_stmts(body, visit);
            }
            Stmt::Block(b) => walk_stmts(b, visit),
            _ => {}
        }
    }
}

fn walk_expr(expr: &TypedExpr, visit: &mut impl FnMut(&TypedExpr)) {
    visit(expr);
    match &expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => walk_expr(operand, visit),
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, visit);
            walk_expr(rhs, visit);
        }
        ExprKind::VectorCtor(args) | ExprKind::Call { args, .. } => {
            for a in args {
                walk_expr(a, visit);
            }
        }
        ExprKind::Swizzle { base, .. } => walk_expr(base, visit),
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr(cond, visit);
            walk_expr(then_expr, visit);
            walk_expr(else_expr, visit);
        }
        ExprKind::Assign { value, .. } => walk_expr(value, visit),
        _ => {}
    }
}

/// Mutating counterpart of [`walk_stmts`]: `visit` is called bottom-up on
/// every subexpression so it can replace a node's `kind` in place.
fn rewrite_stmts(stmts: &mut [Stmt], visit: &mut impl FnMut(&mut TypedExpr)) {
    for stmt in stmts.iter_mut() {
        match stmt {
            Stmt::Let { init: Some(e), .. } => rewrite_expr(e, visit),
            Stmt::Expr(e) | Stmt::Return(Some(e)) => rewrite_expr(e, visit),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                rewrite_expr(cond, visit);
                rewrite_stmts(then_branch, visit);
                rewrite_stmts(else_branch, visit);
            }
            Stmt::While { cond, body } => {
                rewrite_expr(cond, visit);
                rewrite_stmts(body, visit);
            }
            Stmt::Loop {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    rewrite_stmts(std::slice::from_mut(init.as_mut()), visit);
                }
                if let Some(cond) = cond {
                    rewrite_expr(cond, visit);
                }
                if let Some(step) = step {
                    rewrite_expr(step, visit);
                }
                rewrite_stmts(body, visit);
            }
            Stmt::Block(b) => rewrite_stmts(b, visit),
            _ => {}
        }
    }
}

fn rewrite_expr(expr: &mut TypedExpr, visit: &mut impl FnMut(&mut TypedExpr)) {
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => rewrite_expr(operand, visit),
        ExprKind::Binary { lhs, rhs, .. } => {
            rewrite_expr(lhs, visit);
            rewrite_expr(rhs, visit);
        }
        ExprKind::VectorCtor(args) | ExprKind::Call { args, .. } => {
            for a in args.iter_mut() {
                rewrite_expr(a, visit);
            }
        }
        ExprKind::Swizzle { base, .. } => rewrite_expr(base, visit),
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            rewrite_expr(cond, visit);
            rewrite_expr(then_expr, visit);
            rewrite_expr(else_expr, visit);
        }
        ExprKind::Assign { value, .. } => rewrite_expr(value, visit),
        _ => {}
    }
    visit(expr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::CompiledKernel;
    use crate::sampler::transform::Affine;

    fn compile(src: &str) -> CompiledKernel {
        let mut k = CompiledKernel::new();
        let log = k.compile(src);
        assert!(log.success(), "{:?}", log.log.diagnostics);
        k
    }

    #[test]
    fn flat_kernel_specializes_with_no_children() {
        let mut arena = SamplerArena::new();
        let k = compile("kernel vec4 solid(static vec4 color) { return color; }");
        let id = arena.insert_kernel_sampler(k, "solid".into(), Affine::IDENTITY, None);
        arena
            .set_argument(
                id,
                "color",
                ArgumentValue::Vector {
                    lanes: [1.0, 0.0, 0.0, 1.0],
                    arity: 4,
                },
            )
            .unwrap();
        let graph = specialize(&arena, id).unwrap();
        assert_eq!(graph.functions.len(), 1);
        assert_eq!(graph.functions[0].name, graph.root);
    }

    #[test]
    fn chained_kernels_produce_two_functions_with_a_user_call() {
        let mut arena = SamplerArena::new();
        let inner = compile("kernel vec4 flat(static vec4 c) { return c; }");
        let outer = compile(
            "kernel vec4 tint(sampler src, static vec4 color) { return sample(src, samplerCoord(src)) * color; }",
        );
        let inner_id = arena.insert_kernel_sampler(inner, "flat".into(), Affine::IDENTITY, None);
        arena
            .set_argument(
                inner_id,
                "c",
                ArgumentValue::Vector {
                    lanes: [0.5, 0.5, 0.5, 1.0],
                    arity: 4,
                },
            )
            .unwrap();
        let outer_id = arena.insert_kernel_sampler(outer, "tint".into(), Affine::IDENTITY, None);
        arena
            .set_argument(outer_id, "src", ArgumentValue::Sampler(inner_id))
            .unwrap();
        arena
            .set_argument(
                outer_id,
                "color",
                ArgumentValue::Vector {
                    lanes: [1.0, 1.0, 1.0, 1.0],
                    arity: 4,
                },
            )
            .unwrap();

        let graph = specialize(&arena, outer_id).unwrap();
        assert_eq!(graph.functions.len(), 2);
    }

    #[test]
    fn non_identity_transform_is_rejected() {
        let mut arena = SamplerArena::new();
        let k = compile("kernel vec4 solid(static vec4 color) { return color; }");
        let id = arena.insert_kernel_sampler(k, "solid".into(), Affine::translation(1.0, 0.0), None);
        arena
            .set_argument(
                id,
                "color",
                ArgumentValue::Vector {
                    lanes: [1.0, 0.0, 0.0, 1.0],
                    arity: 4,
                },
            )
            .unwrap();
        assert!(matches!(
            specialize(&arena, id),
            Err(EngineError::UnsupportedTransform(_))
        ));
    }
}
