//! Image-processing core: a small C-like kernel language compiled to a
//! typed IR (`frontend/`, `ir.rs`), specialised against a sampler graph
//! (`specialise.rs`) and JITed with Cranelift (`codegen.rs`), then
//! rasterised by a tiled worker pool (`render.rs`).
//!
//! See DESIGN.md for the module layout and the reasoning behind it.

pub mod ast;
pub mod codegen;
pub mod compiled;
pub mod diagnostics;
pub mod error;
pub mod frontend;
pub mod graph;
pub mod ir;
pub mod lexer;
pub mod optimize;
pub mod parser;
pub mod pixel_format;
pub mod proto;
pub mod quark;
pub mod render;
pub mod sampler;
pub mod specialise;
pub mod symtab;
pub mod types;

pub use compiled::CompiledKernel;
pub use error::{EngineError, Result};
pub use pixel_format::PixelFormat;
pub use render::{EngineConfig, RenderEngine};
pub use sampler::{ArgumentValue, SamplerArena, SamplerId};
