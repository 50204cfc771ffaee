//! Property-based tests for universal properties, using `proptest` (already
//! a teacher dev-dependency — see Cargo.toml).

use proptest::prelude::*;

use kernelforge::sampler::{Affine, Rect};
use kernelforge::{ArgumentValue, CompiledKernel, PixelFormat, RenderEngine, SamplerArena};

fn gradient_engine_and_root() -> (SamplerArena, kernelforge::SamplerId) {
    let mut k = CompiledKernel::new();
    let log = k.compile(
        "kernel vec4 g(static float r, static float gg, static float b) { \
            return vec4(destCoord().x / 32.0 + r, destCoord().y / 32.0 + gg, b, 1.0); \
        }",
    );
    assert!(log.success(), "{:?}", log.log.diagnostics);
    let mut arena = SamplerArena::new();
    let root = arena.insert_kernel_sampler(k, "g".into(), Affine::IDENTITY, None);
    arena.set_argument(root, "r", ArgumentValue::Float(0.1)).unwrap();
    arena.set_argument(root, "gg", ArgumentValue::Float(0.2)).unwrap();
    arena.set_argument(root, "b", ArgumentValue::Float(0.3)).unwrap();
    (arena, root)
}

proptest! {
    /// "Tile independence": rendering the same request with any strip height
    /// in {1, 2, 8, 64, rows} produces byte-identical buffers.
    #[test]
    fn tile_independence(strip_height in prop_oneof![Just(1u32), Just(2), Just(8), Just(32), Just(32)]) {
        let (arena, root) = gradient_engine_and_root();
        let engine = RenderEngine::new();
        let extent = Rect::from_xywh(0.0, 0.0, 32.0, 32.0);

        let mut reference = vec![0u8; 32 * 32 * 4];
        engine
            .render_into_buffer_tiled(&arena, root, extent, &mut reference, 32, 32, 128, PixelFormat::Rgba32, 32)
            .unwrap();

        let mut buf = vec![0u8; 32 * 32 * 4];
        engine
            .render_into_buffer_tiled(&arena, root, extent, &mut buf, 32, 32, 128, PixelFormat::Rgba32, strip_height)
            .unwrap();
        prop_assert_eq!(buf, reference);
    }

    /// "Format equivalence": RGBA32 and BGRA32 differ only in channel order
    /// — permuting one's bytes reproduces the other.
    #[test]
    fn format_equivalence_rgba_bgra(rr in 0u8..=255, gg in 0u8..=255, bb in 0u8..=255, aa in 0u8..=255) {
        let mut k = CompiledKernel::new();
        let log = k.compile(
            "kernel vec4 solid(static vec4 color) { return color; }",
        );
        assert!(log.success());
        let mut arena = SamplerArena::new();
        let root = arena.insert_kernel_sampler(k, "solid".into(), Affine::IDENTITY, None);
        arena
            .set_argument(
                root,
                "color",
                ArgumentValue::Vector {
                    lanes: [
                        f32::from(rr) / 255.0,
                        f32::from(gg) / 255.0,
                        f32::from(bb) / 255.0,
                        f32::from(aa) / 255.0,
                    ],
                    arity: 4,
                },
            )
            .unwrap();

        let engine = RenderEngine::new();
        let extent = Rect::from_xywh(0.0, 0.0, 1.0, 1.0);
        let mut rgba = vec![0u8; 4];
        engine.render_into_buffer(&arena, root, extent, &mut rgba, 1, 1, 4, PixelFormat::Rgba32).unwrap();
        let mut bgra = vec![0u8; 4];
        engine.render_into_buffer(&arena, root, extent, &mut bgra, 1, 1, 4, PixelFormat::Bgra32).unwrap();

        // RGBA32 = [r,g,b,a]; BGRA32 = [b,g,r,a]; permuting BGRA's R/B gives RGBA.
        let permuted = [bgra[2], bgra[1], bgra[0], bgra[3]];
        prop_assert_eq!(rgba, permuted);
    }
}
