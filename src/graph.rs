//! A small JSON sampler-graph description format for the demo CLI
//! (`--graph-json`): named nodes, each either a decoded texture or a
//! compiled kernel with its arguments, referencing each other by node id.
//! Not part of the stable library API — a convenience surface for the demo
//! binary, kept out of `RenderEngine`/`SamplerArena` itself.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::compiled::CompiledKernel;
use crate::sampler::{Affine, ArgumentValue, SamplerArena, SamplerId};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphDescription {
    pub version: String,
    pub root: String,
    pub nodes: HashMap<String, NodeDesc>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDesc {
    Texture {
        path: String,
    },
    Kernel {
        source: String,
        entry: String,
        #[serde(default)]
        args: HashMap<String, ArgValue>,
    },
}

/// One kernel-argument binding. Untagged so the JSON reads naturally: a bare
/// number, a short array, or `{"sampler": "<node id>"}`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ArgValue {
    Scalar(f32),
    Vector(Vec<f32>),
    SamplerRef { sampler: String },
}

pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<(SamplerArena, SamplerId)> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    let desc: GraphDescription =
        serde_json::from_str(&text).with_context(|| format!("failed to parse graph json at {}", path.display()))?;
    build_graph(&desc)
}

/// Builds an arena from an already-parsed description, resolving sampler
/// references depth-first and memoizing each node id to the `SamplerId` it
/// produced (a node referenced by two kernels is only built once).
pub fn build_graph(desc: &GraphDescription) -> Result<(SamplerArena, SamplerId)> {
    let mut arena = SamplerArena::new();
    let mut built: HashMap<String, SamplerId> = HashMap::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let root = resolve_node(desc, &desc.root, &mut arena, &mut built, &mut visiting)?;
    Ok((arena, root))
}

fn resolve_node(
    desc: &GraphDescription,
    id: &str,
    arena: &mut SamplerArena,
    built: &mut HashMap<String, SamplerId>,
    visiting: &mut HashSet<String>,
) -> Result<SamplerId> {
    if let Some(sid) = built.get(id) {
        return Ok(*sid);
    }
    if !visiting.insert(id.to_string()) {
        bail!("cycle detected in sampler graph at node {id}");
    }

    let node = desc
        .nodes
        .get(id)
        .ok_or_else(|| anyhow!("node not found: {id}"))?;

    let sid = match node {
        NodeDesc::Texture { path } => {
            let img = image::open(path)
                .with_context(|| format!("failed to decode texture node {id} ({path})"))?
                .to_rgba8();
            let (width, height) = img.dimensions();
            arena.insert_texture_sampler(width, height, img.into_raw(), Affine::IDENTITY)
        }
        NodeDesc::Kernel { source, entry, args } => {
            let mut kernel = CompiledKernel::new();
            let log = kernel.compile(source);
            if !log.success() {
                bail!("kernel node {id} failed to compile: {:?}", log.log.diagnostics);
            }
            let kernel_root = arena.insert_kernel_sampler(kernel, entry.clone(), Affine::IDENTITY, None);
            for (arg_name, value) in args {
                let resolved = resolve_arg(desc, id, value, arena, built, visiting)?;
                arena
                    .set_argument(kernel_root, arg_name, resolved)
                    .map_err(|e| anyhow!("node {id}: failed to bind argument {arg_name}: {e:?}"))?;
            }
            kernel_root
        }
    };

    visiting.remove(id);
    built.insert(id.to_string(), sid);
    Ok(sid)
}

fn resolve_arg(
    desc: &GraphDescription,
    owner_id: &str,
    value: &ArgValue,
    arena: &mut SamplerArena,
    built: &mut HashMap<String, SamplerId>,
    visiting: &mut HashSet<String>,
) -> Result<ArgumentValue> {
    match value {
        ArgValue::Scalar(f) => Ok(ArgumentValue::Float(*f)),
        ArgValue::Vector(lanes) => {
            if lanes.is_empty() || lanes.len() > 4 {
                bail!("node {owner_id}: vector arguments must have 1 to 4 lanes, got {}", lanes.len());
            }
            let mut padded = [0.0f32; 4];
            padded[..lanes.len()].copy_from_slice(lanes);
            Ok(ArgumentValue::Vector { lanes: padded, arity: lanes.len() as u8 })
        }
        ArgValue::SamplerRef { sampler } => {
            let child = resolve_node(desc, sampler, arena, built, visiting)?;
            Ok(ArgumentValue::Sampler(child))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_kernel_only_graph_and_binds_static_args() {
        let json = r#"{
            "version": "1",
            "root": "tint",
            "nodes": {
                "tint": {
                    "type": "kernel",
                    "source": "kernel vec4 tint(static float r, static float g, static float b) { return vec4(r, g, b, 1.0); }",
                    "entry": "tint",
                    "args": { "r": 0.5, "g": 0.25, "b": 0.75 }
                }
            }
        }"#;
        let desc: GraphDescription = serde_json::from_str(json).unwrap();
        let (_arena, root) = build_graph(&desc).unwrap();
        assert_eq!(root.index(), 0);
    }

    #[test]
    fn resolves_sampler_references_between_nodes() {
        let json = r#"{
            "version": "1",
            "root": "blend",
            "nodes": {
                "a": { "type": "kernel", "source": "kernel vec4 a() { return vec4(1.0,0.0,0.0,1.0); }", "entry": "a" },
                "blend": {
                    "type": "kernel",
                    "source": "kernel vec4 b(sampler src) { return sample(src, samplerCoord(src)); }",
                    "entry": "b",
                    "args": { "src": { "sampler": "a" } }
                }
            }
        }"#;
        let desc: GraphDescription = serde_json::from_str(json).unwrap();
        let (arena, root) = build_graph(&desc).unwrap();
        assert!(arena.validate_reachable(root).is_ok());
    }

    #[test]
    fn a_cycle_between_kernel_nodes_is_rejected() {
        let json = r#"{
            "version": "1",
            "root": "a",
            "nodes": {
                "a": {
                    "type": "kernel",
                    "source": "kernel vec4 a(sampler src) { return sample(src, samplerCoord(src)); }",
                    "entry": "a",
                    "args": { "src": { "sampler": "b" } }
                },
                "b": {
                    "type": "kernel",
                    "source": "kernel vec4 b(sampler src) { return sample(src, samplerCoord(src)); }",
                    "entry": "b",
                    "args": { "src": { "sampler": "a" } }
                }
            }
        }"#;
        let desc: GraphDescription = serde_json::from_str(json).unwrap();
        let err = build_graph(&desc).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn missing_node_reference_is_a_clear_error() {
        let json = r#"{
            "version": "1",
            "root": "missing",
            "nodes": {}
        }"#;
        let desc: GraphDescription = serde_json::from_str(json).unwrap();
        let err = build_graph(&desc).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
