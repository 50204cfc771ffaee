//! Render engine.
//!
//! Owns the JIT-function cache (keyed on `(root, module_epoch)` — see
//! `sampler::arena`'s epoch-clock comment) and a fixed-size worker pool that
//! tiles a render request into horizontal strips and dispatches them over a
//! `crossbeam_channel`, mirroring the sender/receiver/`thread::spawn` style
//! `ws.rs` uses for its own background loops, generalised here to a
//! persistent pool of CPU workers rather than one thread per connection.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::codegen::{self, CompiledRoot};
use crate::error::EngineError;
use crate::pixel_format::{write_pixel, PixelFormat};
use crate::sampler::arena::{SamplerArena, SamplerId};
use crate::sampler::rect::Rect;
use crate::specialise;

/// Rows per tile.
pub const DEFAULT_STRIP_HEIGHT: u32 = 8;

/// A raw, non-owning pointer into the caller's output buffer for one strip.
/// Strips assigned to different tiles never overlap, so handing each worker
/// its own `StripPtr` is sound even though `*mut u8` isn't `Send` by
/// default.
struct StripPtr(*mut u8);
unsafe impl Send for StripPtr {}

struct Job {
    id: usize,
    root: Arc<CompiledRoot>,
    format: PixelFormat,
    strip: StripPtr,
    strip_len: usize,
    width: u32,
    rows: u32,
    row_stride: usize,
    // World-space mapping: pixel (px, py) within the *whole* image (not just
    // this strip) samples at (origin_x + (px + 0.5) * scale_x, origin_y +
    // (row_offset + py + 0.5) * scale_y).
    origin_x: f32,
    origin_y: f32,
    scale_x: f32,
    scale_y: f32,
    row_offset: u32,
    // Root sampler's extent in world space: pixels whose center falls
    // outside render as transparent rather than evaluating the kernel.
    clip: Rect,
}

enum JobResult {
    Done(usize),
    Panicked(usize, String),
}

/// A persistent pool of CPU workers sized to `available_parallelism`.
/// Workers borrow only immutable state per job — a shared `CompiledRoot` and
/// their own disjoint strip pointer — never the sampler graph itself.
pub struct WorkerPool {
    job_tx: Sender<Job>,
    result_rx: Receiver<JobResult>,
    _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new() -> WorkerPool {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_worker_count(workers)
    }

    pub fn with_worker_count(workers: usize) -> WorkerPool {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<JobResult>();

        let handles = (0..workers)
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let id = job.id;
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_job(&job)));
                        let msg = match outcome {
                            Ok(()) => None,
                            Err(payload) => Some(panic_message(&payload)),
                        };
                        let result = match msg {
                            None => JobResult::Done(id),
                            Some(m) => JobResult::Panicked(id, m),
                        };
                        // The pool outlives every render; a send failure
                        // only happens once the engine itself is being torn
                        // down, in which case dropping the result is fine.
                        let _ = result_tx.send(result);
                    }
                })
            })
            .collect();

        WorkerPool {
            job_tx,
            result_rx,
            _handles: handles,
        }
    }

    /// Submit every tile of one render, block until all complete or the
    /// first panic is observed. The pool itself survives a panicking job and
    /// remains usable for the next render.
    fn dispatch(&self, jobs: Vec<Job>) -> Result<(), EngineError> {
        let total = jobs.len();
        for job in jobs {
            self.job_tx.send(job).expect("worker pool threads are alive for the engine's lifetime");
        }
        let mut outstanding = total;
        let mut first_panic = None;
        while outstanding > 0 {
            match self.result_rx.recv().expect("worker pool threads are alive for the engine's lifetime") {
                JobResult::Done(_) => outstanding -= 1,
                JobResult::Panicked(_, msg) => {
                    outstanding -= 1;
                    first_panic.get_or_insert(msg);
                }
            }
        }
        match first_panic {
            Some(msg) => Err(EngineError::WorkerDispatch(msg)),
            None => Ok(()),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> WorkerPool {
        WorkerPool::new()
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

/// Runs one tile: evaluate the compiled function at every pixel center in
/// the strip and pack it into the destination format.
fn run_job(job: &Job) {
    let strip = unsafe { std::slice::from_raw_parts_mut(job.strip.0, job.strip_len) };
    for row in 0..job.rows {
        let world_y = job.origin_y + (job.row_offset + row) as f32 * job.scale_y + job.scale_y * 0.5;
        let row_start = row as usize * job.row_stride;
        for col in 0..job.width {
            let world_x = job.origin_x + col as f32 * job.scale_x + job.scale_x * 0.5;
            let bpp = job
                .format
                .bytes_per_pixel()
                .expect("render targets are always fixed-stride formats");
            let px_start = row_start + col as usize * bpp;
            let dst = &mut strip[px_start..px_start + bpp];
            if job.clip.contains(world_x, world_y) {
                let straight = job.root.eval(world_x, world_y);
                write_pixel(job.format, dst, straight);
            } else {
                dst.fill(0);
            }
        }
    }
}

struct CacheEntry {
    epoch: u64,
    root: Arc<CompiledRoot>,
}

/// Engine configuration (worker count, default strip height) — a plain
/// struct the caller passes in directly rather than a config-file format;
/// the library keeps no persisted state of its own.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// `None` defers to `std::thread::available_parallelism()`.
    pub workers: Option<usize>,
    pub strip_height: u32,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            workers: None,
            strip_height: DEFAULT_STRIP_HEIGHT,
        }
    }
}

/// Owns the sampler graph's JIT cache and the worker pool used to rasterise
/// against it.
///
/// Compilation/specialisation is single-threaded: every method here takes
/// `&mut SamplerArena` or serialises through `&self`'s internal `Mutex`,
/// matching "exactly one compilation/specialisation at a time per root"
/// without requiring the caller to hold an external lock.
pub struct RenderEngine {
    pool: WorkerPool,
    cache: Mutex<HashMap<SamplerId, CacheEntry>>,
    default_strip_height: u32,
    compile_count: AtomicUsize,
}

impl RenderEngine {
    pub fn new() -> RenderEngine {
        RenderEngine::with_config(EngineConfig::default())
    }

    pub fn with_worker_count(workers: usize) -> RenderEngine {
        RenderEngine::with_config(EngineConfig {
            workers: Some(workers),
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> RenderEngine {
        let pool = match config.workers {
            Some(n) => WorkerPool::with_worker_count(n),
            None => WorkerPool::new(),
        };
        RenderEngine {
            pool,
            cache: Mutex::new(HashMap::new()),
            default_strip_height: config.strip_height.max(1),
            compile_count: AtomicUsize::new(0),
        }
    }

    /// Total number of times the JIT compiler has actually run, across every
    /// root this engine has ever served — exposed so callers can observe a
    /// fresh specialise+JIT pass happening without reaching into private
    /// state.
    pub fn jit_compile_count(&self) -> usize {
        self.compile_count.load(Ordering::Relaxed)
    }

    /// The epoch this engine's cache currently believes `root` is at, or
    /// `None` if nothing has been compiled for it yet. Tests use this to
    /// observe that a render after a `module-changed` signal produced a
    /// freshly specialised function.
    pub fn cached_epoch(&self, root: SamplerId) -> Option<u64> {
        self.cache.lock().expect("cache mutex poisoned").get(&root).map(|e| e.epoch)
    }

    fn compiled_root(
        &self,
        arena: &SamplerArena,
        root: SamplerId,
    ) -> Result<Arc<CompiledRoot>, EngineError> {
        arena.validate_reachable(root).map_err(EngineError::UnboundSampler)?;
        let epoch = arena.module_epoch(root);

        {
            let cache = self.cache.lock().expect("cache mutex poisoned");
            if let Some(entry) = cache.get(&root) {
                if entry.epoch == epoch {
                    return Ok(entry.root.clone());
                }
            }
        }

        let graph = specialise::specialize(arena, root)?;
        let compiled = Arc::new(codegen::compile_graph(&graph)?);
        self.compile_count.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.cache.lock().expect("cache mutex poisoned");
        cache.insert(
            root,
            CacheEntry {
                epoch,
                root: compiled.clone(),
            },
        );
        Ok(compiled)
    }

    /// "get_renderer_function(root, format) → function handle | none" — the
    /// specialised-and-JITed function behind `root`, for callers that want
    /// to invoke it directly rather than through `render_into_buffer`.
    pub fn get_renderer_function(
        &self,
        arena: &SamplerArena,
        root: SamplerId,
        format: PixelFormat,
    ) -> Result<Arc<CompiledRoot>, EngineError> {
        if !format.is_output_capable() {
            return Err(EngineError::UnsupportedOutputFormat(format));
        }
        self.compiled_root(arena, root)
    }

    /// `render_into_buffer`, 's five numbered steps.
    #[allow(clippy::too_many_arguments)]
    pub fn render_into_buffer(
        &self,
        arena: &SamplerArena,
        root: SamplerId,
        extent_rect: Rect,
        buffer: &mut [u8],
        width: u32,
        height: u32,
        row_stride: usize,
        format: PixelFormat,
    ) -> Result<(), EngineError> {
        self.render_into_buffer_tiled(
            arena,
            root,
            extent_rect,
            buffer,
            width,
            height,
            row_stride,
            format,
            self.default_strip_height,
        )
    }

    /// As `render_into_buffer`, but with an explicit strip height — used by
    /// "Tile independence" property test to assert identical output across
    /// strip heights in `{1, 2, 8, 64, rows}`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_into_buffer_tiled(
        &self,
        arena: &SamplerArena,
        root: SamplerId,
        extent_rect: Rect,
        buffer: &mut [u8],
        width: u32,
        height: u32,
        row_stride: usize,
        format: PixelFormat,
        strip_height: u32,
    ) -> Result<(), EngineError> {
        if !format.is_output_capable() {
            return Err(EngineError::UnsupportedOutputFormat(format));
        }
        let needed = row_stride
            .checked_mul(height as usize)
            .ok_or(EngineError::BufferTooSmall { needed: usize::MAX, got: buffer.len() })?;
        if buffer.len() < needed {
            return Err(EngineError::BufferTooSmall { needed, got: buffer.len() });
        }

        // Step 1: acquire the sampler lock.
        if !arena.lock(root) {
            return Err(EngineError::UnboundSampler(root));
        }
        let result = self.render_locked(
            arena,
            root,
            extent_rect,
            buffer,
            width,
            height,
            row_stride,
            format,
            strip_height.max(1),
        );
        // Step 5: release the sampler lock on every exit path.
        arena.unlock(root);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn render_locked(
        &self,
        arena: &SamplerArena,
        root: SamplerId,
        extent_rect: Rect,
        buffer: &mut [u8],
        width: u32,
        height: u32,
        row_stride: usize,
        format: PixelFormat,
        strip_height: u32,
    ) -> Result<(), EngineError> {
        // Step 2: resolve the entry function for this pixel format.
        let compiled = self.compiled_root(arena, root)?;

        let scale_x = if width == 0 { 0.0 } else { extent_rect.width() / width as f32 };
        let scale_y = if height == 0 { 0.0 } else { extent_rect.height() / height as f32 };
        let clip = arena.extent(root);

        // Step 3: tile the output into horizontal strips.
        let mut jobs = Vec::new();
        let mut row_offset = 0u32;
        let mut job_id = 0usize;
        while row_offset < height {
            let rows = strip_height.min(height - row_offset);
            let strip_byte_offset = row_offset as usize * row_stride;
            let strip_len = rows as usize * row_stride;
            let strip_ptr = unsafe { buffer.as_mut_ptr().add(strip_byte_offset) };
            jobs.push(Job {
                id: job_id,
                root: compiled.clone(),
                format,
                strip: StripPtr(strip_ptr),
                strip_len,
                width,
                rows,
                row_stride,
                origin_x: extent_rect.x0,
                origin_y: extent_rect.y0,
                scale_x,
                scale_y,
                row_offset,
                clip,
            });
            job_id += 1;
            row_offset += rows;
        }

        // Step 4: submit to the worker pool and wait for completion.
        self.pool.dispatch(jobs)
    }
}

impl Default for RenderEngine {
    fn default() -> RenderEngine {
        RenderEngine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::CompiledKernel;
    use crate::sampler::arena::ArgumentValue;
    use crate::sampler::transform::Affine;

    fn compile(src: &str) -> CompiledKernel {
        let mut k = CompiledKernel::new();
        let log = k.compile(src);
        assert!(log.success(), "{:?}", log.log.diagnostics);
        k
    }

    #[test]
    fn identity_passthrough_reproduces_source_texture() {
        // scenario S1.
        let mut arena = SamplerArena::new();
        let kernel = compile("kernel vec4 id(sampler src) { return sample(src, samplerCoord(src)); }");
        let pixels = vec![
            255, 0, 0, 255, //
            0, 255, 0, 255, //
            0, 0, 255, 255, //
            255, 255, 255, 255,
        ];
        let tex = arena.insert_texture_sampler(2, 2, pixels.clone(), Affine::IDENTITY);
        let root = arena.insert_kernel_sampler(kernel, "id".into(), Affine::IDENTITY, None);
        arena.set_argument(root, "src", ArgumentValue::Sampler(tex)).unwrap();

        let engine = RenderEngine::new();
        let mut buf = vec![0u8; 2 * 2 * 4];
        engine
            .render_into_buffer(
                &arena,
                root,
                Rect::from_xywh(0.0, 0.0, 2.0, 2.0),
                &mut buf,
                2,
                2,
                8,
                PixelFormat::Rgba32,
            )
            .unwrap();
        assert_eq!(buf, pixels);
    }

    #[test]
    fn tile_height_does_not_change_output() {
        // scenario S6 / "Tile independence".
        let mut arena = SamplerArena::new();
        let kernel = compile(
            "kernel vec4 g() { return vec4(destCoord().x / 100.0, destCoord().y / 100.0, 0.0, 1.0); }",
        );
        let root = arena.insert_kernel_sampler(kernel, "g".into(), Affine::IDENTITY, None);
        let engine = RenderEngine::new();

        let extent = Rect::from_xywh(0.0, 0.0, 100.0, 100.0);
        let mut reference = vec![0u8; 100 * 100 * 4];
        engine
            .render_into_buffer_tiled(&arena, root, extent, &mut reference, 100, 100, 400, PixelFormat::Rgba32, 100)
            .unwrap();

        for strip_height in [1, 2, 8, 64] {
            let mut buf = vec![0u8; 100 * 100 * 4];
            engine
                .render_into_buffer_tiled(&arena, root, extent, &mut buf, 100, 100, 400, PixelFormat::Rgba32, strip_height)
                .unwrap();
            assert_eq!(buf, reference, "strip height {strip_height} diverged");
        }
    }

    #[test]
    fn cache_is_reused_until_a_static_argument_changes() {
        // "Cache invalidation".
        let mut arena = SamplerArena::new();
        let kernel = compile("kernel vec4 k(static float s, float t) { return vec4(s, t, 0.0, 1.0); }");
        let root = arena.insert_kernel_sampler(kernel, "k".into(), Affine::IDENTITY, None);
        arena.set_argument(root, "s", ArgumentValue::Float(0.25)).unwrap();
        arena.set_argument(root, "t", ArgumentValue::Float(0.25)).unwrap();

        let engine = RenderEngine::new();
        let mut buf = vec![0u8; 4];
        let extent = Rect::from_xywh(0.0, 0.0, 1.0, 1.0);
        engine.render_into_buffer(&arena, root, extent, &mut buf, 1, 1, 4, PixelFormat::Rgba32).unwrap();
        let epoch_before = engine.cached_epoch(root).unwrap();

        // Non-static rebind: same cache entry.
        arena.set_argument(root, "t", ArgumentValue::Float(0.75)).unwrap();
        engine.render_into_buffer(&arena, root, extent, &mut buf, 1, 1, 4, PixelFormat::Rgba32).unwrap();
        assert_eq!(engine.cached_epoch(root).unwrap(), epoch_before);

        // Static rebind: cache entry's epoch must advance.
        arena.set_argument(root, "s", ArgumentValue::Float(0.75)).unwrap();
        engine.render_into_buffer(&arena, root, extent, &mut buf, 1, 1, 4, PixelFormat::Rgba32).unwrap();
        assert!(engine.cached_epoch(root).unwrap() > epoch_before);
    }

    #[test]
    fn unbound_sampler_fails_the_render() {
        let mut arena = SamplerArena::new();
        let kernel = compile("kernel vec4 k(sampler src) { return sample(src, samplerCoord(src)); }");
        let root = arena.insert_kernel_sampler(kernel, "k".into(), Affine::IDENTITY, None);
        let engine = RenderEngine::new();
        let mut buf = vec![0u8; 4];
        let err = engine
            .render_into_buffer(
                &arena,
                root,
                Rect::from_xywh(0.0, 0.0, 1.0, 1.0),
                &mut buf,
                1,
                1,
                4,
                PixelFormat::Rgba32,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::UnboundSampler(_)));
    }

    #[test]
    fn buffer_too_small_is_rejected_before_any_dispatch() {
        let mut arena = SamplerArena::new();
        let kernel = compile("kernel vec4 k() { return vec4(1.0, 1.0, 1.0, 1.0); }");
        let root = arena.insert_kernel_sampler(kernel, "k".into(), Affine::IDENTITY, None);
        let engine = RenderEngine::new();
        let mut buf = vec![0u8; 2]; // needs 4
        let err = engine
            .render_into_buffer(
                &arena,
                root,
                Rect::from_xywh(0.0, 0.0, 1.0, 1.0),
                &mut buf,
                1,
                1,
                4,
                PixelFormat::Rgba32,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::BufferTooSmall { .. }));
    }
}
