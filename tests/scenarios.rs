//! End-to-end scenarios exercised against the public crate API (front-end
//! compile → sampler graph → render), as integration tests under `tests/`
//! rather than `#[cfg(test)]` for these cross-cutting cases.

use kernelforge::sampler::{Affine, Rect};
use kernelforge::{ArgumentValue, CompiledKernel, PixelFormat, RenderEngine, SamplerArena};

fn compile_ok(src: &str) -> CompiledKernel {
    let mut k = CompiledKernel::new();
    let log = k.compile(src);
    assert!(log.success(), "compile failed: {:?}", log.log.diagnostics);
    k
}

/// S1: identity pass-through reproduces a 2x2 texture byte-for-byte.
#[test]
fn s1_identity_passthrough() {
    let kernel = compile_ok("kernel vec4 id(sampler src) { return sample(src, samplerCoord(src)); }");
    let mut arena = SamplerArena::new();
    #[rustfmt::skip]
    let pixels = vec![
        255, 0, 0, 255,
        0, 255, 0, 255,
        0, 0, 255, 255,
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

/// S2: static vs non-static argument rebinding emits the right signal and
/// invalidates (or doesn't invalidate) the JIT cache accordingly.
#[test]
fn s2_static_vs_non_static_rebinding() {
    let kernel = compile_ok("kernel vec4 k(static float s, float t) { return vec4(s, t, 0.0, 1.0); }");
    let mut arena = SamplerArena::new();
    let root = arena.insert_kernel_sampler(kernel, "k".into(), Affine::IDENTITY, None);

    arena.set_argument(root, "s", ArgumentValue::Float(0.25)).unwrap();
    arena.set_argument(root, "t", ArgumentValue::Float(0.25)).unwrap();
    let epoch_after_first_static = arena.module_epoch(root);

    arena.set_argument(root, "s", ArgumentValue::Float(0.75)).unwrap();
    assert!(arena.module_epoch(root) > epoch_after_first_static, "static rebind must bump the epoch");
    let epoch_after_second_static = arena.module_epoch(root);

    arena.set_argument(root, "t", ArgumentValue::Float(0.75)).unwrap();
    assert_eq!(
        arena.module_epoch(root),
        epoch_after_second_static,
        "non-static rebind must not bump the epoch"
    );

    let engine = RenderEngine::new();
    let extent = Rect::from_xywh(0.0, 0.0, 1.0, 1.0);
    let mut buf = vec![0u8; 4];
    engine.render_into_buffer(&arena, root, extent, &mut buf, 1, 1, 4, PixelFormat::Rgba32).unwrap();
    let epoch_cached = engine.cached_epoch(root).unwrap();
    assert_eq!(epoch_cached, epoch_after_second_static);
}

/// S3: two constant-color children blended 50/50.
#[test]
fn s3_two_child_composition() {
    let kernel = compile_ok(
        "kernel vec4 blend(sampler a, sampler b) { \
            return 0.5 * sample(a, samplerCoord(a)) + 0.5 * sample(b, samplerCoord(b)); \
        }",
    );
    let mut arena = SamplerArena::new();
    let red = arena.insert_texture_sampler(1, 1, vec![255, 0, 0, 255], Affine::IDENTITY);
    let blue = arena.insert_texture_sampler(1, 1, vec![0, 0, 255, 255], Affine::IDENTITY);
    let root = arena.insert_kernel_sampler(kernel, "blend".into(), Affine::IDENTITY, None);
    arena.set_argument(root, "a", ArgumentValue::Sampler(red)).unwrap();
    arena.set_argument(root, "b", ArgumentValue::Sampler(blue)).unwrap();

    let engine = RenderEngine::new();
    let mut buf = vec![0u8; 4];
    engine
        .render_into_buffer(&arena, root, Rect::from_xywh(0.0, 0.0, 1.0, 1.0), &mut buf, 1, 1, 4, PixelFormat::Rgba32)
        .unwrap();
    assert!((126..=129).contains(&buf[0]), "red channel {} not ~127", buf[0]);
    assert_eq!(buf[1], 0);
    assert!((126..=129).contains(&buf[2]), "blue channel {} not ~127", buf[2]);
    assert_eq!(buf[3], 255);
}

/// S4: overload resolution picks the int->float widening candidate for
/// `f(1)`, the exact-vec2 candidate for `f(vec2(..))`, and rejects an
/// arity mismatch.
#[test]
fn s4_overload_resolution() {
    let src = "\
        float f(float x) { return x; }\n\
        float f(vec2 v) { return v.x; }\n\
        kernel vec4 use_scalar() { return vec4(f(1), 0.0, 0.0, 1.0); }\n\
        kernel vec4 use_vector() { return vec4(f(vec2(1.0, 2.0)), 0.0, 0.0, 1.0); }\n\
        kernel vec4 bad() { return vec4(f(1, 2), 0.0, 0.0, 1.0); }\n\
    ";
    let mut k = CompiledKernel::new();
    let log = k.compile(src);
    assert!(!log.success(), "arity-mismatched call must fail to compile");
    assert!(k.kernel("use_scalar").is_some(), "use_scalar must still be recorded");
    assert!(k.kernel("use_vector").is_some(), "use_vector must still be recorded");
    assert!(k.kernel("bad").is_none(), "bad must be rejected, not partially recorded");
}

/// S5: undefined symbol recovery — exactly one error, first and third
/// kernels still compiled.
#[test]
fn s5_undefined_symbol_recovery() {
    let src = "\
        kernel vec4 first() { return vec4(1.0, 0.0, 0.0, 1.0); }\n\
        kernel vec4 second() { return vec4(undefined_symbol, 0.0, 0.0, 1.0); }\n\
        kernel vec4 third() { return vec4(0.0, 0.0, 1.0, 1.0); }\n\
    ";
    let mut k = CompiledKernel::new();
    let log = k.compile(src);
    assert!(!log.success());
    assert_eq!(log.log.errors().count(), 1, "{:?}", log.log.diagnostics);
    assert!(k.kernel("first").is_some());
    assert!(k.kernel("third").is_some());
    assert!(k.kernel("second").is_none());
}

/// S6: tile parity for a destCoord()-driven gradient at strip heights 1
/// and 100 (the full image in one strip).
#[test]
fn s6_tile_parity_gradient() {
    let kernel = compile_ok(
        "kernel vec4 g() { return vec4(destCoord().x / 100.0, destCoord().y / 100.0, 0.0, 1.0); }",
    );
    let mut arena = SamplerArena::new();
    let root = arena.insert_kernel_sampler(kernel, "g".into(), Affine::IDENTITY, None);
    let engine = RenderEngine::new();
    let extent = Rect::from_xywh(0.0, 0.0, 100.0, 100.0);

    let mut strip1 = vec![0u8; 100 * 100 * 4];
    engine
        .render_into_buffer_tiled(&arena, root, extent, &mut strip1, 100, 100, 400, PixelFormat::Rgba32, 1)
        .unwrap();
    let mut strip100 = vec![0u8; 100 * 100 * 4];
    engine
        .render_into_buffer_tiled(&arena, root, extent, &mut strip100, 100, 100, 400, PixelFormat::Rgba32, 100)
        .unwrap();
    assert_eq!(strip1, strip100);
}

/// "Extent conservatism": pixels outside the root sampler's extent render as
/// transparent.
#[test]
fn extent_conservatism_outside_is_transparent() {
    let kernel = compile_ok("kernel vec4 id(sampler src) { return sample(src, samplerCoord(src)); }");
    let mut arena = SamplerArena::new();
    let tex = arena.insert_texture_sampler(2, 2, vec![255, 255, 255, 255].repeat(4), Affine::IDENTITY);
    let root = arena.insert_kernel_sampler(kernel, "id".into(), Affine::IDENTITY, None);
    arena.set_argument(root, "src", ArgumentValue::Sampler(tex)).unwrap();

    let engine = RenderEngine::new();
    // Render a region entirely past the 2x2 texture's extent.
    let mut buf = vec![0u8; 2 * 2 * 4];
    engine
        .render_into_buffer(
            &arena,
            root,
            Rect::from_xywh(10.0, 10.0, 2.0, 2.0),
            &mut buf,
            2,
            2,
            8,
            PixelFormat::Rgba32,
        )
        .unwrap();
    assert_eq!(buf, vec![0u8; 16]);
}

/// "Premultiplied identity": an opaque pixel is byte-identical between a
/// format and its premultiplied counterpart.
#[test]
fn premultiplied_identity_for_opaque_pixels() {
    let kernel = compile_ok("kernel vec4 solid() { return vec4(0.2, 0.4, 0.6, 1.0); }");
    let mut arena = SamplerArena::new();
    let root = arena.insert_kernel_sampler(kernel, "solid".into(), Affine::IDENTITY, None);
    let engine = RenderEngine::new();
    let extent = Rect::from_xywh(0.0, 0.0, 1.0, 1.0);

    let mut straight = vec![0u8; 4];
    engine.render_into_buffer(&arena, root, extent, &mut straight, 1, 1, 4, PixelFormat::Rgba32).unwrap();
    let mut premul = vec![0u8; 4];
    engine
        .render_into_buffer(&arena, root, extent, &mut premul, 1, 1, 4, PixelFormat::Rgba32Premultiplied)
        .unwrap();
    assert_eq!(straight, premul);
}

/// "Deterministic rendering": two renders of the same request produce byte-
/// identical buffers.
#[test]
fn deterministic_rendering_is_repeatable() {
    let kernel = compile_ok(
        "kernel vec4 g() { return vec4(destCoord().x / 10.0, destCoord().y / 10.0, 0.0, 1.0); }",
    );
    let mut arena = SamplerArena::new();
    let root = arena.insert_kernel_sampler(kernel, "g".into(), Affine::IDENTITY, None);
    let engine = RenderEngine::new();
    let extent = Rect::from_xywh(0.0, 0.0, 10.0, 10.0);

    let mut first = vec![0u8; 10 * 10 * 4];
    engine.render_into_buffer(&arena, root, extent, &mut first, 10, 10, 40, PixelFormat::Rgba32).unwrap();
    let mut second = vec![0u8; 10 * 10 * 4];
    engine.render_into_buffer(&arena, root, extent, &mut second, 10, 10, 40, PixelFormat::Rgba32).unwrap();
    assert_eq!(first, second);
}

/// step 7 / "Specialisation closure": a non-static sampler argument is a
/// hard error until the non-static path is implemented.
#[test]
fn reduce_kernel_cannot_be_rendered() {
    let kernel = compile_ok("kernel void noop(sampler src) { }");
    let mut arena = SamplerArena::new();
    let tex = arena.insert_texture_sampler(1, 1, vec![0, 0, 0, 0], Affine::IDENTITY);
    let root = arena.insert_kernel_sampler(kernel, "noop".into(), Affine::IDENTITY, None);
    arena.set_argument(root, "src", ArgumentValue::Sampler(tex)).unwrap();

    let engine = RenderEngine::new();
    let mut buf = vec![0u8; 4];
    let err = engine
        .render_into_buffer(&arena, root, Rect::from_xywh(0.0, 0.0, 1.0, 1.0), &mut buf, 1, 1, 4, PixelFormat::Rgba32)
        .unwrap_err();
    assert!(matches!(err, kernelforge::EngineError::ReduceNotExecutable(_)));
}

/// Open Question resolution: a non-identity child transform is a hard error
/// rather than a silent identity fallback.
#[test]
fn non_identity_child_transform_is_a_hard_error() {
    let kernel = compile_ok("kernel vec4 id(sampler src) { return sample(src, samplerCoord(src)); }");
    let mut arena = SamplerArena::new();
    let tex = arena.insert_texture_sampler(2, 2, vec![0; 16], Affine::translation(1.0, 0.0));
    let root = arena.insert_kernel_sampler(kernel, "id".into(), Affine::IDENTITY, None);
    arena.set_argument(root, "src", ArgumentValue::Sampler(tex)).unwrap();

    let engine = RenderEngine::new();
    let mut buf = vec![0u8; 4];
    let err = engine
        .render_into_buffer(&arena, root, Rect::from_xywh(0.0, 0.0, 1.0, 1.0), &mut buf, 1, 1, 4, PixelFormat::Rgba32)
        .unwrap_err();
    assert!(matches!(err, kernelforge::EngineError::UnsupportedTransform(_)));
}
