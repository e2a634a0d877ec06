//! Pipeline diagnostics: timing and per-stage metrics.
//!
//! [`process_image_with_diagnostics`] runs the staged pipeline and records
//! how long each stage took and what it decided. Time is read through a
//! caller-supplied [`Clock`], so the library never touches a platform
//! timer itself and tests can use a fake one.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::anchor::AnchorSource;
use crate::classify::{Decision, FaceDetection};
use crate::pipeline::{Pipeline, PipelineStage, ProcessOutput};
use crate::types::{DitherType, ImageType, ProcessRequest, RgbaImage};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// An opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: grayscale conversion.
    pub grayscale: StageDiagnostics,
    /// Stage 2: histogram statistics and feature extraction.
    pub analysis: StageDiagnostics,
    /// Stage 3: classification and anchor resolution.
    pub classification: StageDiagnostics,
    /// Stage 4: brightness/contrast and levels.
    pub tone: StageDiagnostics,
    /// Stage 5: sharpening.
    pub sharpen: StageDiagnostics,
    /// Stage 6: dithering and inversion.
    pub output: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Image size.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: Option<StageMetrics>,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Grayscale conversion.
    Grayscale {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Statistics and features.
    Analysis {
        /// Mean gray level.
        mean: f64,
        /// Gray-level standard deviation.
        std_dev: f64,
        /// Histogram peaks retained.
        peak_count: usize,
        /// Near-black or near-white fraction.
        bw_ratio: f64,
        /// Whether classifier features were computed.
        features_extracted: bool,
    },
    /// Classification and anchor.
    Classification {
        /// Resulting type.
        image_type: ImageType,
        /// Decision trace.
        decision: Decision,
        /// Resolved anchor gray.
        anchor_gray: u8,
        /// Where the anchor came from.
        anchor_source: AnchorSource,
    },
    /// Tone mapping.
    Tone {
        /// Brightness offset applied.
        brightness: i32,
        /// Contrast multiplier applied.
        contrast: f64,
        /// Contrast pivot.
        anchor_gray: u8,
        /// Levels input black point.
        level_in_low: u8,
        /// Levels input white point.
        level_in_high: u8,
    },
    /// Sharpening.
    Sharpen {
        /// Amount in `[0, 100]`; 0 means skipped.
        amount: u8,
    },
    /// Dithering and inversion.
    Output {
        /// Dithering algorithm, if dithering ran.
        dither: Option<DitherType>,
        /// Pixels with gray 255 in the final image.
        white_pixels: u64,
        /// Whether the image was inverted.
        inverted: bool,
    },
}

/// Run-wide summary values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
}

impl PipelineDiagnostics {
    /// Per-stage entries in pipeline order.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Grayscale", &self.grayscale),
            ("Analysis", &self.analysis),
            ("Classification", &self.classification),
            ("Tone", &self.tone),
            ("Sharpen", &self.sharpen),
            ("Output", &self.output),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = diag.metrics.as_ref().map_or_else(String::new, format_metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Grayscale { width, height } => format!("{width}x{height}"),
        StageMetrics::Analysis {
            mean,
            std_dev,
            peak_count,
            bw_ratio,
            features_extracted,
        } => {
            let features = if *features_extracted { "features" } else { "no features" };
            format!(
                "mean={mean:.1} sd={std_dev:.1} peaks={peak_count} bw={:.1}% {features}",
                bw_ratio * 100.0,
            )
        }
        StageMetrics::Classification {
            image_type,
            decision,
            anchor_gray,
            anchor_source,
        } => {
            let source = match anchor_source {
                AnchorSource::Computed => "computed",
                AnchorSource::Override => "override",
            };
            format!("{image_type} ({decision}) anchor={anchor_gray} ({source})")
        }
        StageMetrics::Tone {
            brightness,
            contrast,
            anchor_gray,
            level_in_low,
            level_in_high,
        } => format!(
            "brightness={brightness} contrast={contrast:.2} anchor={anchor_gray} levels={level_in_low}..{level_in_high}",
        ),
        StageMetrics::Sharpen { amount } => {
            if *amount == 0 {
                "skipped".to_owned()
            } else {
                format!("amount={amount}")
            }
        }
        StageMetrics::Output {
            dither,
            white_pixels,
            inverted,
        } => {
            let dither = dither.map_or_else(|| "none".to_owned(), |d| format!("{d:?}"));
            let inverted = if *inverted { " inverted" } else { "" };
            format!("dither={dither} white={white_pixels}{inverted}")
        }
    }
}

/// Count pixels whose gray value is 255.
pub(crate) fn count_white_pixels(image: &RgbaImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] == 255)))
        .sum()
}

/// Advance one stage and record its duration and metrics.
macro_rules! timed {
    ($clock:expr, $stage:expr) => {{
        let start = $clock.now();
        let next = $stage;
        let duration = $clock.elapsed(&start);
        let metrics = next.metrics();
        (next, StageDiagnostics { duration, metrics })
    }};
}

/// Run the full pipeline, recording per-stage diagnostics.
///
/// Produces the same [`ProcessOutput`] as [`crate::process_image`].
pub async fn process_image_with_diagnostics<C: Clock>(
    image: &RgbaImage,
    request: &ProcessRequest,
    detection: Option<&FaceDetection<'_>>,
    clock: &C,
) -> (ProcessOutput, PipelineDiagnostics) {
    let total_start = clock.now();
    let pending = Pipeline::new(image.clone(), request.clone());

    let (grayscaled, grayscale) = timed!(clock, pending.grayscale());
    let (analyzed, analysis) = timed!(clock, grayscaled.analyze());
    let (classified, classification) = timed!(clock, analyzed.classify(detection).await);
    let (toned, tone) = timed!(clock, classified.tone());
    let (sharpened, sharpen) = timed!(clock, toned.sharpen());
    let (finished, output) = timed!(clock, sharpened.finish());

    let total_duration = clock.elapsed(&total_start);
    let (width, height) = image.dimensions();
    let diagnostics = PipelineDiagnostics {
        grayscale,
        analysis,
        classification,
        tone,
        sharpen,
        output,
        total_duration,
        summary: PipelineSummary {
            image_width: width,
            image_height: height,
            pixel_count: u64::from(width) * u64::from(height),
        },
    };
    tracing::trace!(total_ms = duration_ms(total_duration), "pipeline finished");
    (finished.into_output(), diagnostics)
}
