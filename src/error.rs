//! Engine-level error type.
//!
//! Front-end compile errors travel through
//! [`crate::diagnostics::DiagnosticLog`] instead, since they're reported as
//! a batch alongside warnings; `EngineError` covers the smaller set of
//! things that can go wrong once a graph is bound and asked to render.

use thiserror::Error;

use crate::sampler::SamplerId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sampler {0:?} is not fully bound (missing or mistyped argument)")]
    UnboundSampler(SamplerId),

    /// Open Question resolution: only identity child transforms are
    /// supported; a non-identity transform anywhere in the reachable graph
    /// is a hard error rather than a silently-wrong render.
    #[error("sampler {0:?} has a non-identity transform, which this engine does not support")]
    UnsupportedTransform(SamplerId),

    /// A `sample` call whose sampler argument isn't a bare reference to a
    /// sampler-typed parameter.
    #[error("sample() with a non-trivial sampler expression is not supported")]
    UnsupportedSamplerExpression,

    /// Open Question resolution: reduce kernels (`void`-returning) describe
    /// a side-effecting traversal the specialiser never constructs a pixel
    /// function for; attempting to render one directly is a programming
    /// error, not a render failure.
    #[error("kernel {0:?} is a reduce kernel and cannot be used as a render root")]
    ReduceNotExecutable(SamplerId),

    #[error("requested pixel format {0:?} is not supported as a render target")]
    UnsupportedOutputFormat(crate::pixel_format::PixelFormat),

    #[error("output buffer is too small: need at least {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("JIT compilation failed: {0}")]
    JitFailure(String),

    /// Open Question resolution: a worker panic is caught at the pool
    /// boundary and reported as a render failure; the pool itself survives
    /// and remains usable for the next render.
    #[error("a render worker panicked: {0}")]
    WorkerDispatch(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
