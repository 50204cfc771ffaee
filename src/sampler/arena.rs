//! Sampler graph arena.
//!
//! Samplers are tagged variants stored in an arena and referred to by a
//! 32-bit [`SamplerId`] rather than ref-counted objects with signal/slot
//! connections. A node only ever learns its parent at bind time, which makes
//! cycles impossible by construction: you cannot bind a sampler as an
//! argument of a node that doesn't exist yet.

use std::collections::HashMap;

use crate::compiled::CompiledKernel;
use crate::quark::Quark;
use crate::sampler::rect::Rect;
use crate::sampler::signal::Signal;
use crate::sampler::transform::Affine;
use crate::types::{Specifier, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(u32);

impl SamplerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A value bound to a kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Float(f32),
    Int(i64),
    Bool(bool),
    /// Always stored 4-wide; only the first `arity` lanes are meaningful.
    Vector { lanes: [f32; 4], arity: u8 },
    Sampler(SamplerId),
}

impl ArgumentValue {
    pub fn type_matches(&self, ty: Type) -> bool {
        match (self, ty.specifier) {
            (ArgumentValue::Float(_), Specifier::Float) => true,
            (ArgumentValue::Int(_), Specifier::Int) => true,
            (ArgumentValue::Bool(_), Specifier::Bool) => true,
            (ArgumentValue::Vector { arity, .. }, spec) => spec.arity() == *arity as usize,
            (ArgumentValue::Sampler(_), Specifier::Sampler) => true,
            _ => false,
        }
    }
}

pub struct KernelSamplerNode {
    pub kernel: CompiledKernel,
    pub entry: String,
    pub args: HashMap<Quark, ArgumentValue>,
    pub transform: Affine,
    pub crop: Option<Rect>,
}

pub struct TextureSamplerNode {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA32 pixels, row-major, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    pub transform: Affine,
}

pub enum SamplerNode {
    Kernel(KernelSamplerNode),
    Texture(TextureSamplerNode),
    /// Infinite transparent source.
    Null,
}

struct Slot {
    node: SamplerNode,
    parents: Vec<SamplerId>,
    /// The arena-wide clock value of the most recent module-changed event
    /// reachable at or below this node ( happens-before chain; the render
    /// engine keys its JIT cache on `(root, module_epoch)`).
    module_epoch: u64,
}

#[derive(Debug)]
pub enum BindError {
    WrongType,
    UnknownArgument,
    NotAKernelSampler,
}

#[derive(Default)]
pub struct SamplerArena {
    slots: Vec<Slot>,
    clock: u64,
}

impl SamplerArena {
    pub fn new() -> SamplerArena {
        SamplerArena::default()
    }

    fn insert(&mut self, node: SamplerNode) -> SamplerId {
        let id = SamplerId(self.slots.len() as u32);
        self.slots.push(Slot {
            node,
            parents: Vec::new(),
            module_epoch: self.clock,
        });
        id
    }

    pub fn insert_kernel_sampler(
        &mut self,
        kernel: CompiledKernel,
        entry: String,
        transform: Affine,
        crop: Option<Rect>,
    ) -> SamplerId {
        self.insert(SamplerNode::Kernel(KernelSamplerNode {
            kernel,
            entry,
            args: HashMap::new(),
            transform,
            crop,
        }))
    }

    pub fn insert_texture_sampler(
        &mut self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        transform: Affine,
    ) -> SamplerId {
        self.insert(SamplerNode::Texture(TextureSamplerNode {
            width,
            height,
            pixels,
            transform,
        }))
    }

    pub fn insert_null_sampler(&mut self) -> SamplerId {
        self.insert(SamplerNode::Null)
    }

    pub fn node(&self, id: SamplerId) -> &SamplerNode {
        &self.slots[id.index()].node
    }

    pub fn module_epoch(&self, id: SamplerId) -> u64 {
        self.slots[id.index()].module_epoch
    }

    /// Bind `arg` on a kernel sampler to `value`, computing and propagating
    /// whichever [`Signal`] / "change-signal soundness" requires: no signal
    /// if unchanged, `ModuleChanged` for a `static` argument,
    /// `ContentsChanged` otherwise. If `value` is itself a sampler, `id` is
    /// registered as its parent.
    pub fn set_argument(
        &mut self,
        id: SamplerId,
        arg: &str,
        value: ArgumentValue,
    ) -> Result<(), BindError> {
        let quark = Quark::new(arg);
        let (decl_ty, prev_child) = {
            let Some(SamplerNode::Kernel(k)) = self.slots.get(id.index()).map(|s| &s.node) else {
                return Err(BindError::NotAKernelSampler);
            };
            let Some(spec) = k.kernel.kernel(&k.entry).and_then(|rec| {
                rec.args.iter().find(|a| a.name == arg)
            }) else {
                return Err(BindError::UnknownArgument);
            };
            if !value.type_matches(spec.ty) {
                return Err(BindError::WrongType);
            }
            let prev_child = match k.args.get(&quark) {
                Some(ArgumentValue::Sampler(child)) => Some(*child),
                _ => None,
            };
            (spec.ty, prev_child)
        };

        let unchanged = matches!(
            &self.slots[id.index()].node,
            SamplerNode::Kernel(k) if k.args.get(&quark) == Some(&value)
        );

        if let SamplerNode::Kernel(k) = &mut self.slots[id.index()].node {
            k.args.insert(quark, value.clone());
        }

        if let ArgumentValue::Sampler(new_child) = &value {
            if Some(*new_child) != prev_child {
                self.slots[new_child.index()].parents.push(id);
            }
        }

        if unchanged {
            return Ok(());
        }

        let signal = if decl_ty.is_static() {
            Signal::ModuleChanged
        } else {
            Signal::ContentsChanged
        };
        self.emit(id, signal);
        Ok(())
    }

    /// Record that the underlying compiled kernel of `id` was just
    /// recompiled.
    pub fn notify_recompiled(&mut self, id: SamplerId) {
        self.emit(id, Signal::ModuleChanged);
    }

    fn emit(&mut self, id: SamplerId, signal: Signal) {
        if signal == Signal::ModuleChanged {
            self.clock += 1;
            self.bump_epoch(id, self.clock);
        }
        // contents-changed/extents-changed still propagate upward so a
        // parent's own cache (if any) can react, but they do not bump the
        // module epoch the render engine keys its JIT cache on.
        let mut frontier = self.slots[id.index()].parents.clone();
        let mut seen: std::collections::HashSet<SamplerId> = frontier.iter().copied().collect();
        while let Some(parent) = frontier.pop() {
            if signal == Signal::ModuleChanged {
                self.bump_epoch(parent, self.clock);
            }
            for gp in self.slots[parent.index()].parents.clone() {
                if seen.insert(gp) {
                    frontier.push(gp);
                }
            }
        }
    }

    fn bump_epoch(&mut self, id: SamplerId, epoch: u64) {
        self.slots[id.index()].module_epoch = epoch;
    }

    /// sampler validity: kernel valid + every declared arg bound with a
    /// matching type (texture: non-zero buffer). Recurses into bound child
    /// samplers.
    pub fn validate_reachable(&self, root: SamplerId) -> Result<(), SamplerId> {
        let mut visited = std::collections::HashSet::new();
        self.validate_one(root, &mut visited)
    }

    fn validate_one(
        &self,
        id: SamplerId,
        visited: &mut std::collections::HashSet<SamplerId>,
    ) -> Result<(), SamplerId> {
        if !visited.insert(id) {
            return Ok(());
        }
        match &self.slots[id.index()].node {
            SamplerNode::Null => Ok(()),
            SamplerNode::Texture(t) => {
                if t.width == 0 || t.height == 0 {
                    Err(id)
                } else {
                    Ok(())
                }
            }
            SamplerNode::Kernel(k) => {
                if !k.kernel.is_valid() {
                    return Err(id);
                }
                let Some(rec) = k.kernel.kernel(&k.entry) else {
                    return Err(id);
                };
                for spec in &rec.args {
                    match k.args.get(&Quark::new(&spec.name)) {
                        Some(v) if v.type_matches(spec.ty) => {}
                        _ => return Err(id),
                    }
                }
                for v in k.args.values() {
                    if let ArgumentValue::Sampler(child) = v {
                        self.validate_one(*child, visited)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Acquire any runtime resources needed for a render pass over the
    /// subgraph reachable from `root`. Balanced on every exit path: on
    /// partial failure, already-locked nodes are unlocked before returning
    /// `false`.
    pub fn lock(&self, root: SamplerId) -> bool {
        let mut locked = Vec::new();
        if self.lock_rec(root, &mut locked) {
            true
        } else {
            for id in locked.into_iter().rev() {
                self.unlock_one(id);
            }
            false
        }
    }

    fn lock_rec(&self, id: SamplerId, locked: &mut Vec<SamplerId>) -> bool {
        let ok = match &self.slots[id.index()].node {
            SamplerNode::Null | SamplerNode::Texture(_) => true,
            SamplerNode::Kernel(k) => k.args.values().all(|v| match v {
                ArgumentValue::Sampler(child) => self.lock_rec(*child, locked),
                _ => true,
            }),
        };
        if ok {
            locked.push(id);
        }
        ok
    }

    fn unlock_one(&self, _id: SamplerId) {
        // Texture/null samplers in this implementation hold no runtime
        // resource beyond the in-memory buffer already owned by the node,
        // so unlocking is a no-op; kept as an explicit call site so a future
        // backend with real resource acquisition has somewhere to hook in.
    }

    pub fn unlock(&self, root: SamplerId) {
        self.unlock_rec(root);
    }

    fn unlock_rec(&self, id: SamplerId) {
        self.unlock_one(id);
        if let SamplerNode::Kernel(k) = &self.slots[id.index()].node {
            for v in k.args.values() {
                if let ArgumentValue::Sampler(child) = v {
                    self.unlock_rec(*child);
                }
            }
        }
    }

    /// The effective world-space extent of `id`: the intersection of any
    /// crop rectangle with the transformed extent.
    pub fn extent(&self, id: SamplerId) -> Rect {
        match &self.slots[id.index()].node {
            SamplerNode::Null => Rect::EMPTY,
            SamplerNode::Texture(t) => {
                t.transform.map_rect(Rect::from_xywh(0.0, 0.0, t.width as f32, t.height as f32))
            }
            SamplerNode::Kernel(k) => {
                let own = k.crop.unwrap_or(Rect::INFINITE);
                k.transform.map_rect(own)
            }
        }
    }

    pub fn transform(&self, id: SamplerId) -> Affine {
        match &self.slots[id.index()].node {
            SamplerNode::Null => Affine::IDENTITY,
            SamplerNode::Texture(t) => t.transform,
            SamplerNode::Kernel(k) => k.transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tint_kernel() -> CompiledKernel {
        let mut k = CompiledKernel::new();
        let log = k.compile(
            "kernel vec4 tint(sampler src, static vec4 color) { return sample(src, samplerCoord(src)) * color; }",
        );
        assert!(log.success(), "{:?}", log.log.diagnostics);
        k
    }

    #[test]
    fn setting_static_argument_emits_module_changed_and_bumps_epoch() {
        let mut arena = SamplerArena::new();
        let id = arena.insert_kernel_sampler(tint_kernel(), "tint".into(), Affine::IDENTITY, None);
        let tex = arena.insert_texture_sampler(1, 1, vec![255, 0, 0, 255], Affine::IDENTITY);
        arena
            .set_argument(id, "src", ArgumentValue::Sampler(tex))
            .unwrap();
        let before = arena.module_epoch(id);
        arena
            .set_argument(
                id,
                "color",
                ArgumentValue::Vector {
                    lanes: [1.0, 1.0, 1.0, 1.0],
                    arity: 4,
                },
            )
            .unwrap();
        assert!(arena.module_epoch(id) > before);
    }

    #[test]
    fn setting_same_value_emits_no_signal() {
        let mut arena = SamplerArena::new();
        let id = arena.insert_kernel_sampler(tint_kernel(), "tint".into(), Affine::IDENTITY, None);
        let v = ArgumentValue::Vector {
            lanes: [1.0, 0.0, 0.0, 1.0],
            arity: 4,
        };
        arena.set_argument(id, "color", v.clone()).unwrap();
        let before = arena.module_epoch(id);
        arena.set_argument(id, "color", v).unwrap();
        assert_eq!(arena.module_epoch(id), before);
    }

    #[test]
    fn unset_argument_fails_validation() {
        let mut arena = SamplerArena::new();
        let id = arena.insert_kernel_sampler(tint_kernel(), "tint".into(), Affine::IDENTITY, None);
        assert_eq!(arena.validate_reachable(id), Err(id));
    }

    #[test]
    fn fully_bound_kernel_sampler_validates() {
        let mut arena = SamplerArena::new();
        let id = arena.insert_kernel_sampler(tint_kernel(), "tint".into(), Affine::IDENTITY, None);
        let tex = arena.insert_texture_sampler(2, 2, vec![0; 16], Affine::IDENTITY);
        arena.set_argument(id, "src", ArgumentValue::Sampler(tex)).unwrap();
        arena
            .set_argument(
                id,
                "color",
                ArgumentValue::Vector {
                    lanes: [1.0, 1.0, 1.0, 1.0],
                    arity: 4,
                },
            )
            .unwrap();
        assert_eq!(arena.validate_reachable(id), Ok(()));
    }

    #[test]
    fn zero_sized_texture_is_invalid() {
        let mut arena = SamplerArena::new();
        let id = arena.insert_texture_sampler(0, 0, vec![], Affine::IDENTITY);
        assert_eq!(arena.validate_reachable(id), Err(id));
    }
}
