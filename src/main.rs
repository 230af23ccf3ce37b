//! `roiseg` CLI - Segment the region of interest of an image.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roiseg::pipeline::{Normalization, DEFAULT_TARGET_SIZE, IMAGENET_MEAN, IMAGENET_STD};
use roiseg::{segment_file, Config, Device, MaskEncoding, ResizePolicy};

/// Which side of the image the target size applies to.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResizeMode {
    /// Scale the shorter side to the target size.
    ShorterSide,
    /// Scale the height to the target size.
    Height,
}

/// How pixels outside the region of interest are written.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Encoding {
    /// Outside-ROI pixels are 255, like foreground.
    Legacy,
    /// Foreground 255, background 0, outside ROI 128.
    ThreeValued,
}

/// Segment an image within a region-of-interest mask using a pretrained network.
#[derive(Parser, Debug)]
#[command(name = "roiseg")]
#[command(version, about, long_about = None)]
struct Args {
    /// Exported network weights (ONNX).
    #[arg(short, long, value_name = "PATH")]
    weights: PathBuf,

    /// Input RGB image.
    #[arg(short, long, value_name = "PATH")]
    image: PathBuf,

    /// Region-of-interest mask. Zero pixels are outside the region.
    #[arg(short, long, value_name = "PATH")]
    roi: PathBuf,

    /// Output mask path.
    #[arg(short, long, default_value = "test_result.png", value_name = "PATH")]
    output: PathBuf,

    /// Compute device: cpu, cuda or cuda:N.
    #[arg(short, long, default_value = "cpu", value_parser = parse_device)]
    device: Device,

    /// Target size of the resize step.
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE, value_name = "INT")]
    target_size: u32,

    /// Side of the image the target size applies to.
    #[arg(long, value_enum, default_value = "shorter-side")]
    resize_mode: ResizeMode,

    /// Number of foreground classes, background excluded.
    #[arg(long, default_value = "1", value_name = "INT")]
    classes: usize,

    /// Base channel width of the network.
    #[arg(long, default_value = "32", value_name = "INT")]
    base_channels: usize,

    /// Per-channel normalization mean, RGB order.
    #[arg(long, value_delimiter = ',', value_name = "FLOAT")]
    mean: Option<Vec<f32>>,

    /// Per-channel normalization standard deviation, RGB order.
    #[arg(long, value_delimiter = ',', value_name = "FLOAT")]
    std: Option<Vec<f32>>,

    /// Encoding of pixels outside the region of interest.
    #[arg(long, value_enum, default_value = "legacy")]
    encoding: Encoding,

    /// Name of the score output in the exported graph.
    #[arg(long, default_value = "out", value_name = "NAME")]
    output_name: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_device(s: &str) -> std::result::Result<Device, String> {
    s.parse::<Device>().map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("roiseg={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    let config = build_config(args)?;

    let report = segment_file(config, &args.weights, &args.image, &args.roi, &args.output)
        .with_context(|| format!("Failed to segment {}", args.image.display()))?;

    println!("inference time: {}", report.inference_time.as_secs_f64());
    println!(
        "Saved {}x{} mask to {} ({} foreground pixels, {} outside ROI)",
        report.width,
        report.height,
        args.output.display(),
        report.foreground_pixels,
        report.outside_roi_pixels
    );

    Ok(())
}

fn build_config(args: &Args) -> Result<Config> {
    let resize = match args.resize_mode {
        ResizeMode::ShorterSide => ResizePolicy::ShorterSide(args.target_size),
        ResizeMode::Height => ResizePolicy::Height(args.target_size),
    };

    let encoding = match args.encoding {
        Encoding::Legacy => MaskEncoding::Legacy,
        Encoding::ThreeValued => MaskEncoding::ThreeValued,
    };

    let normalization = Normalization {
        mean: triple(args.mean.as_deref(), IMAGENET_MEAN, "mean")?,
        std: triple(args.std.as_deref(), IMAGENET_STD, "std")?,
    };

    let config = Config {
        resize,
        class_count: args.classes,
        base_channel_width: args.base_channels,
        normalization,
        device: args.device,
        encoding,
        output_name: args.output_name.clone(),
    };

    config.validate().context("Invalid configuration")?;

    Ok(config)
}

fn triple(values: Option<&[f32]>, default: [f32; 3], name: &str) -> Result<[f32; 3]> {
    match values {
        None => Ok(default),
        Some(&[a, b, c]) => Ok([a, b, c]),
        Some(other) => anyhow::bail!("--{name} needs 3 values, got {}", other.len()),
    }
}
