//! Headless command-line demo for the kernel-forge render engine: a
//! hand-rolled CLI (`parse_cli` walking `args: &[String]`, `anyhow::Result`
//! everywhere, no clap).
//!
//! Compiles a kernel source file (or a small built-in gradient kernel if
//! none is given), binds an optional source PNG as a `sampler`-typed
//! argument, renders it, and writes the result out as PNG via the `image`
//! crate. `--graph-json` takes a multi-node sampler-graph description
//! (see `kernelforge::graph`) in place of `--kernel-file`/`--source-image`.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Rgba};

use kernelforge::proto::KernelTarget;
use kernelforge::sampler::{Affine, SamplerArena};
use kernelforge::{ArgumentValue, CompiledKernel, PixelFormat, RenderEngine};

#[derive(Debug, Default)]
struct Cli {
    kernel_file: Option<PathBuf>,
    source_image: Option<PathBuf>,
    graph_json: Option<PathBuf>,
    output: PathBuf,
    width: u32,
    height: u32,
}

const DEFAULT_KERNEL: &str = "kernel vec4 gradient() { \
    return vec4(destCoord().x / 256.0, destCoord().y / 256.0, 0.5, 1.0); \
}";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli {
        output: PathBuf::from("kernelforge-out.png"),
        width: 256,
        height: 256,
        ..Cli::default()
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--kernel-file" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --kernel-file"))?;
                cli.kernel_file = Some(PathBuf::from(v));
                i += 2;
            }
            "--source-image" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --source-image"))?;
                cli.source_image = Some(PathBuf::from(v));
                i += 2;
            }
            "--graph-json" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --graph-json"))?;
                cli.graph_json = Some(PathBuf::from(v));
                i += 2;
            }
            "--output" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --output"))?;
                cli.output = PathBuf::from(v);
                i += 2;
            }
            "--width" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --width"))?;
                cli.width = v.parse().context("--width must be a positive integer")?;
                i += 2;
            }
            "--height" => {
                let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --height"))?;
                cli.height = v.parse().context("--height must be a positive integer")?;
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --kernel-file <path>, \
                     --source-image <path>, --graph-json <path>, --output <path.png>, \
                     --width <n>, --height <n>)"
                ));
            }
        }
    }
    Ok(cli)
}

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;

    let (arena, root) = if let Some(graph_path) = &cli.graph_json {
        kernelforge::graph::load_graph_from_path(graph_path)
            .with_context(|| format!("failed to load --graph-json {}", graph_path.display()))?
    } else {
        let source = match &cli.kernel_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read --kernel-file {}", path.display()))?,
            None => DEFAULT_KERNEL.to_string(),
        };

        let mut kernel = CompiledKernel::new();
        let log = kernel.compile(&source);
        if !log.success() {
            for diag in &log.log.diagnostics {
                log::error!("{diag:?}");
            }
            return Err(anyhow!("kernel source failed to compile, see diagnostics above"));
        }
        let Some(entry) = kernel.kernels().iter().find(|k| k.target == KernelTarget::Render).cloned() else {
            return Err(anyhow!("no render (vec4-returning) kernel found in source"));
        };

        let mut arena = SamplerArena::new();
        let root = arena.insert_kernel_sampler(kernel, entry.name.clone(), Affine::IDENTITY, None);

        if let Some(image_path) = &cli.source_image {
            let img = image::open(image_path)
                .with_context(|| format!("failed to decode --source-image {}", image_path.display()))?
                .to_rgba8();
            let (w, h) = img.dimensions();
            let tex = arena.insert_texture_sampler(w, h, img.into_raw(), Affine::IDENTITY);
            let sampler_arg = entry
                .args
                .iter()
                .find(|a| a.is_sampler())
                .ok_or_else(|| anyhow!("kernel has no sampler-typed argument to bind --source-image to"))?;
            arena
                .set_argument(root, &sampler_arg.name, ArgumentValue::Sampler(tex))
                .map_err(|e| anyhow!("failed to bind {}: {e:?}", sampler_arg.name))?;
        }

        (arena, root)
    };

    let engine = RenderEngine::new();
    let row_stride = cli.width as usize * 4;
    let mut buffer = vec![0u8; row_stride * cli.height as usize];
    let extent = kernelforge::sampler::Rect::from_xywh(0.0, 0.0, cli.width as f32, cli.height as f32);
    engine
        .render_into_buffer(
            &arena,
            root,
            extent,
            &mut buffer,
            cli.width,
            cli.height,
            row_stride,
            PixelFormat::Rgba32,
        )
        .map_err(|e| anyhow!("render failed: {e}"))?;

    let image: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(cli.width, cli.height, buffer)
        .ok_or_else(|| anyhow!("rendered buffer did not match the requested dimensions"))?;
    image
        .save(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    log::info!("wrote {}", cli.output.display());
    Ok(())
}
