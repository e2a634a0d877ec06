//! lasertone: prepare an image for laser engraving.
//!
//! Decodes an image file, looks up the material preset, runs the
//! lasertone pipeline, writes the engraving-ready PNG, and prints
//! per-stage diagnostics. Useful for:
//!
//! - Checking which image type the classifier picks, and why
//! - Comparing dither algorithms and tone settings on one material
//! - Measuring per-stage durations across repeated runs
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lasertone -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod presets;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use lasertone_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use lasertone_pipeline::{
    Analysis, DitherType, ImageType, LaserType, MaterialContext, Overrides, PipelineError,
    ProcessRequest, ProcessingParams,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::presets::PresetTable;

/// Prepare an image for laser engraving.
///
/// Converts the image to a tone-mapped, optionally dithered grayscale
/// bitmap tuned to the chosen material and laser, and prints per-stage
/// diagnostics.
#[derive(Parser)]
#[command(name = "lasertone", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Write the processed image (PNG) to this path.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write the grayscale intermediate (PNG) to this path.
    #[arg(long)]
    gray_output: Option<PathBuf>,

    /// Material id from the preset table.
    #[arg(long, default_value = "wood")]
    material: String,

    /// Material variant from the preset table.
    #[arg(long, default_value = "light")]
    variant: String,

    /// Laser source.
    #[arg(long, value_enum, default_value_t = Laser::Diode)]
    laser: Laser,

    /// Replace the built-in preset table with this JSON file.
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Brightness offset in percent (-100..=100).
    #[arg(long, allow_hyphen_values = true)]
    brightness: Option<i32>,

    /// Contrast multiplier (0.1..=3.0).
    #[arg(long)]
    contrast: Option<f64>,

    /// Contrast pivot; skips the computed anchor gray.
    #[arg(long)]
    anchor_gray: Option<u8>,

    /// Unsharp-mask amount (0..=100).
    #[arg(long)]
    sharpness: Option<u8>,

    /// Dither algorithm; enables dithering.
    #[arg(long, value_enum, conflicts_with = "no_dither")]
    dither: Option<Dither>,

    /// Disable dithering regardless of the preset.
    #[arg(long)]
    no_dither: bool,

    /// Binarization threshold for error-diffusion dithering.
    #[arg(long)]
    dither_threshold: Option<u8>,

    /// Skip classification and treat the image as this type
    /// (photo, cartoon, or portrait; case-insensitive).
    #[arg(long, value_name = "TYPE")]
    image_type: Option<ImageType>,

    /// Full processing parameters as a JSON string.
    ///
    /// When provided, the preset table and all other parameter flags
    /// are ignored. Keys are the camelCase `ProcessingParams` names.
    #[arg(long)]
    params_json: Option<String>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics and analysis as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Log filter (e.g. `debug`, `lasertone_pipeline=trace`). Overrides `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,
}

/// Laser source selection.
#[derive(Clone, Copy, ValueEnum)]
enum Laser {
    /// Blue/violet diode module.
    Diode,
    /// CO2 tube.
    Co2,
    /// Fiber source.
    Fiber,
}

impl From<Laser> for LaserType {
    fn from(laser: Laser) -> Self {
        match laser {
            Laser::Diode => Self::Diode,
            Laser::Co2 => Self::Co2,
            Laser::Fiber => Self::Fiber,
        }
    }
}

/// Dither algorithm selection.
#[derive(Clone, Copy, ValueEnum)]
enum Dither {
    /// Floyd-Steinberg error diffusion.
    FloydSteinberg,
    /// Jarvis-Judice-Ninke error diffusion.
    JarvisJudiceNinke,
    /// Atkinson error diffusion.
    Atkinson,
    /// Binary 8x8 Bayer ordered dithering.
    Ordered,
    /// Multi-level 8x8 Bayer dithering.
    Bayer,
}

impl From<Dither> for DitherType {
    fn from(dither: Dither) -> Self {
        match dither {
            Dither::FloydSteinberg => Self::FloydSteinberg,
            Dither::JarvisJudiceNinke => Self::JarvisJudiceNinke,
            Dither::Atkinson => Self::Atkinson,
            Dither::Ordered => Self::Ordered,
            Dither::Bayer => Self::Bayer,
        }
    }
}

/// Build the [`ProcessingParams`] for this run.
///
/// If `--params-json` is provided it is parsed directly and the preset
/// table and individual flags are ignored. Otherwise the preset for the
/// material is looked up and the individual flags are applied on top.
fn params_from_cli(
    cli: &Cli,
    material: &MaterialContext,
) -> Result<ProcessingParams, PipelineError> {
    if let Some(ref json) = cli.params_json {
        return serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("--params-json: {e}")));
    }

    let table = match cli.presets {
        Some(ref path) => PresetTable::load(path)?,
        None => PresetTable::builtin()?,
    };
    let mut params = table.resolve(material)?;

    if let Some(brightness) = cli.brightness {
        params.brightness = brightness;
    }
    if let Some(contrast) = cli.contrast {
        params.contrast = contrast;
    }
    if let Some(sharpness) = cli.sharpness {
        params.sharpness = sharpness;
    }
    if let Some(dither) = cli.dither {
        params.dither_enabled = true;
        params.dither_type = dither.into();
    }
    if cli.no_dither {
        params.dither_enabled = false;
    }
    if let Some(threshold) = cli.dither_threshold {
        params.dither_threshold = threshold;
    }
    Ok(params)
}

/// Assemble the full request from CLI arguments.
fn request_from_cli(cli: &Cli) -> Result<ProcessRequest, PipelineError> {
    let material = MaterialContext::new(&cli.material, &cli.variant, cli.laser.into());
    let params = params_from_cli(cli, &material)?;
    Ok(ProcessRequest {
        material,
        params,
        overrides: Overrides {
            anchor_gray: cli.anchor_gray,
            known_image_type: cli.image_type,
            face_timeout: None,
        },
    })
}

/// JSON document printed by `--json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    diagnostics: &'a PipelineDiagnostics,
    analysis: &'a Analysis,
    params: &'a ProcessingParams,
    was_inverted: bool,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("lasertone=info,lasertone_pipeline=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let request = request_from_cli(cli)?;

    let image = image::open(&cli.image_path)
        .map_err(|e| format!("reading {}: {e}", cli.image_path.display()))?
        .to_rgba8();

    eprintln!(
        "Image: {} ({}x{})",
        cli.image_path.display(),
        image.width(),
        image.height(),
    );
    eprintln!(
        "Material: {} / {} ({} laser)",
        request.material.material_id, request.material.variant, request.material.laser_type,
    );
    eprintln!("Params: {:#?}", request.params);
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        // No face detector is wired into the CLI; portraits need
        // `--image-type portrait`.
        let (output, diagnostics) = lasertone_pipeline::process_image_with_diagnostics(
            &image, &request, None, &StdClock,
        )
        .await;

        if cli.json {
            let report = JsonReport {
                diagnostics: &diagnostics,
                analysis: &output.analysis,
                params: &output.params,
                was_inverted: output.was_inverted,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", diagnostics.report());
        }

        // Write images on the first run only.
        if run == 0 {
            if let Some(ref path) = cli.output {
                output
                    .processed
                    .save(path)
                    .map_err(|e| format!("writing {}: {e}", path.display()))?;
                eprintln!("Processed image written to {}", path.display());
            }
            if let Some(ref path) = cli.gray_output {
                output
                    .gray
                    .save(path)
                    .map_err(|e| format!("writing {}: {e}", path.display()))?;
                eprintln!("Grayscale image written to {}", path.display());
            }
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_count = all_diagnostics[0].stages().len();
    for index in 0..stage_count {
        let name = all_diagnostics[0].stages()[index].0;
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| d.stages()[index].1.duration.as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("lasertone").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_resolve_builtin_preset() {
        let cli = parse(&["in.png"]);
        let request = request_from_cli(&cli).unwrap();
        assert_eq!(request.material.material_id, "wood");
        assert_eq!(request.material.laser_type, LaserType::Diode);
        let expected = PresetTable::builtin()
            .unwrap()
            .resolve(&request.material)
            .unwrap();
        assert_eq!(request.params, expected);
        assert_eq!(request.overrides, Overrides::default());
    }

    #[test]
    fn flags_override_preset_fields() {
        let cli = parse(&[
            "in.png",
            "--brightness",
            "-20",
            "--contrast",
            "1.8",
            "--sharpness",
            "60",
            "--dither",
            "bayer",
            "--dither-threshold",
            "100",
        ]);
        let params = request_from_cli(&cli).unwrap().params;
        assert_eq!(params.brightness, -20);
        assert!((params.contrast - 1.8).abs() < f64::EPSILON);
        assert_eq!(params.sharpness, 60);
        assert!(params.dither_enabled);
        assert_eq!(params.dither_type, DitherType::Bayer);
        assert_eq!(params.dither_threshold, 100);
    }

    #[test]
    fn no_dither_disables_preset_dither() {
        let cli = parse(&["in.png", "--no-dither"]);
        assert!(!request_from_cli(&cli).unwrap().params.dither_enabled);
    }

    #[test]
    fn dither_and_no_dither_conflict() {
        let result = Cli::try_parse_from(["lasertone", "in.png", "--dither", "ordered", "--no-dither"]);
        assert!(result.is_err());
    }

    #[test]
    fn params_json_replaces_everything() {
        let cli = parse(&[
            "in.png",
            "--material",
            "nonexistent",
            "--brightness",
            "50",
            "--params-json",
            r#"{"contrast": 2.0, "invert": true}"#,
        ]);
        let params = request_from_cli(&cli).unwrap().params;
        assert_eq!(params.brightness, 0);
        assert!((params.contrast - 2.0).abs() < f64::EPSILON);
        assert!(params.invert);
    }

    #[test]
    fn bad_params_json_is_invalid_config() {
        let cli = parse(&["in.png", "--params-json", "{not json"]);
        assert!(matches!(
            request_from_cli(&cli),
            Err(PipelineError::InvalidConfig(msg)) if msg.starts_with("--params-json")
        ));
    }

    #[test]
    fn unknown_material_is_reported() {
        let cli = parse(&["in.png", "--material", "granite"]);
        assert!(matches!(request_from_cli(&cli), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn overrides_come_from_flags() {
        let cli = parse(&[
            "in.png",
            "--anchor-gray",
            "90",
            "--image-type",
            "cartoon",
            "--laser",
            "co2",
        ]);
        let request = request_from_cli(&cli).unwrap();
        assert_eq!(request.overrides.anchor_gray, Some(90));
        assert_eq!(request.overrides.known_image_type, Some(ImageType::Cartoon));
        assert_eq!(request.material.laser_type, LaserType::Co2);
    }

    #[test]
    fn image_type_flag_ignores_case() {
        let cli = parse(&["in.png", "--image-type", "Portrait"]);
        assert_eq!(cli.image_type, Some(ImageType::Portrait));
    }

    #[test]
    fn unknown_image_type_is_rejected() {
        let result = Cli::try_parse_from(["lasertone", "in.png", "--image-type", "sketch"]);
        assert!(result.is_err());
    }
}
