//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! [`crate::process_image`] runs everything in one call. [`Pipeline`]
//! lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use lasertone_pipeline::{Pipeline, ProcessRequest, RgbaImage};
//! # async fn run(image: RgbaImage, request: ProcessRequest) {
//! let output = Pipeline::new(image, request)
//!     .grayscale()
//!     .analyze()
//!     .classify(None)
//!     .await
//!     .tone()
//!     .sharpen()
//!     .finish()
//!     .into_output();
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! the intermediates computed so far. Skipping or reordering stages is a
//! compile error. Only classification is async, because it may consult
//! a [`FaceDetector`](crate::classify::FaceDetector).

use serde::{Deserialize, Serialize};

use crate::anchor::{self, AnchorGray};
use crate::classify::{self, Classification, ClassifierInput, Decision, FaceDetection};
use crate::diagnostics::StageMetrics;
use crate::types::{
    DEFAULT_FACE_TIMEOUT, FeatureSet, HistogramFeatures, ImageStats, ImageType, ProcessRequest,
    ProcessingParams, RgbaImage,
};

/// What the analysis concluded about the source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Content category.
    pub image_type: ImageType,
    /// How the category was reached.
    pub decision: Decision,
    /// Classifier features; `None` when the caller supplied the type.
    pub features: Option<FeatureSet>,
    /// Histogram shape of the grayscale image.
    pub histogram_features: HistogramFeatures,
    /// Contrast pivot used for tone mapping.
    pub anchor: AnchorGray,
}

/// Everything one processing call produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// The engraving-ready image.
    pub processed: RgbaImage,
    /// The grayscale conversion of the source, before tone mapping.
    pub gray: RgbaImage,
    /// Statistics of `gray`.
    pub image_stats: ImageStats,
    /// The parameters actually applied (clamped, with the resolved anchor).
    pub params: ProcessingParams,
    /// Classification and anchor trace.
    pub analysis: Analysis,
    /// Whether the final image was inverted.
    pub was_inverted: bool,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing.
#[must_use = "pipeline stages are consumed by advancing; call .grayscale() to continue"]
pub struct Pending {
    request: ProcessRequest,
    original: RgbaImage,
}

impl Pending {
    /// The source image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// The request, with parameters already clamped.
    #[must_use]
    pub const fn request(&self) -> &ProcessRequest {
        &self.request
    }

    /// Convert to grayscale.
    pub fn grayscale(self) -> Grayscaled {
        let gray = crate::grayscale::to_grayscale(&self.original);
        Grayscaled {
            request: self.request,
            original: self.original,
            gray,
        }
    }
}

// ───────────────────────── Stage 1: Grayscaled ───────────────────────

/// Pipeline state after grayscale conversion.
#[must_use = "pipeline stages are consumed by advancing; call .analyze() to continue"]
pub struct Grayscaled {
    request: ProcessRequest,
    original: RgbaImage,
    gray: RgbaImage,
}

impl Grayscaled {
    /// The grayscale image (`R == G == B`).
    #[must_use]
    pub const fn gray(&self) -> &RgbaImage {
        &self.gray
    }

    /// Compute histogram statistics and, unless the caller already
    /// knows the image type, the classifier features.
    pub fn analyze(self) -> Analyzed {
        let histogram = crate::histogram::histogram(&self.gray);
        let histogram_features = crate::histogram::analyze_histogram_features(&histogram);
        let stats = crate::histogram::stats_from_histogram(histogram);
        let features = self.request.overrides.known_image_type.is_none().then(|| {
            crate::features::extract_features(&self.original, &self.gray, &histogram_features)
        });
        Analyzed {
            request: self.request,
            original: self.original,
            gray: self.gray,
            stats,
            histogram_features,
            features,
        }
    }
}

// ───────────────────────── Stage 2: Analyzed ─────────────────────────

/// Pipeline state after statistics and feature extraction.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Analyzed {
    request: ProcessRequest,
    original: RgbaImage,
    gray: RgbaImage,
    stats: ImageStats,
    histogram_features: HistogramFeatures,
    features: Option<FeatureSet>,
}

impl Analyzed {
    /// Statistics of the grayscale image.
    #[must_use]
    pub const fn stats(&self) -> &ImageStats {
        &self.stats
    }

    /// Histogram shape features.
    #[must_use]
    pub const fn histogram_features(&self) -> &HistogramFeatures {
        &self.histogram_features
    }

    /// Classifier features, if they were extracted.
    #[must_use]
    pub const fn features(&self) -> Option<&FeatureSet> {
        self.features.as_ref()
    }

    /// Classify the image and resolve the anchor gray.
    ///
    /// A caller-supplied image type skips the classifier entirely; a
    /// caller-supplied anchor skips the anchor formula. The detector, if
    /// any, is bounded by its own [`Timer`](crate::classify::Timer), so no
    /// particular async runtime is required.
    pub async fn classify(self, detection: Option<&FaceDetection<'_>>) -> Classified {
        let overrides = self.request.overrides;
        let classification = match (overrides.known_image_type, &self.features) {
            (Some(known), _) => Classification::known(known),
            (None, Some(features)) => {
                let input = ClassifierInput {
                    features,
                    histogram: &self.histogram_features,
                    std_dev: self.stats.std_dev,
                };
                let timeout = overrides.face_timeout.unwrap_or(DEFAULT_FACE_TIMEOUT);
                classify::classify(&input, &self.original, detection, timeout).await
            }
            // `analyze` extracts features whenever the type is unknown.
            (None, None) => Classification {
                image_type: ImageType::Photo,
                decision: Decision::Default,
            },
        };

        let anchor = anchor::resolve_anchor_gray(
            classification.image_type,
            &self.stats,
            &self.request.material,
            overrides.anchor_gray,
        );
        let mut request = self.request;
        request.params.anchor_gray = anchor.value;

        Classified {
            request,
            gray: self.gray,
            stats: self.stats,
            histogram_features: self.histogram_features,
            features: self.features,
            classification,
            anchor,
        }
    }
}

// ───────────────────────── Stage 3: Classified ───────────────────────

/// Pipeline state after classification and anchor resolution.
#[must_use = "pipeline stages are consumed by advancing; call .tone() to continue"]
pub struct Classified {
    request: ProcessRequest,
    gray: RgbaImage,
    stats: ImageStats,
    histogram_features: HistogramFeatures,
    features: Option<FeatureSet>,
    classification: Classification,
    anchor: AnchorGray,
}

impl Classified {
    /// The classification and its trace.
    #[must_use]
    pub const fn classification(&self) -> Classification {
        self.classification
    }

    /// The resolved anchor gray.
    #[must_use]
    pub const fn anchor(&self) -> AnchorGray {
        self.anchor
    }

    /// Apply brightness/contrast around the anchor, then levels.
    pub fn tone(self) -> Toned {
        let p = &self.request.params;
        let adjusted =
            crate::tone::apply_brightness_contrast(&self.gray, p.brightness, p.contrast, p.anchor_gray);
        let toned = crate::tone::apply_levels(
            &adjusted,
            p.level_in_low,
            p.level_in_high,
            p.level_out_low,
            p.level_out_high,
            self.classification.image_type,
        );
        Toned {
            prior: self,
            toned,
        }
    }
}

// ───────────────────────── Stage 4: Toned ────────────────────────────

/// Pipeline state after tone mapping.
#[must_use = "pipeline stages are consumed by advancing; call .sharpen() to continue"]
pub struct Toned {
    prior: Classified,
    toned: RgbaImage,
}

impl Toned {
    /// The tone-mapped image.
    #[must_use]
    pub const fn toned(&self) -> &RgbaImage {
        &self.toned
    }

    /// Apply unsharp-mask sharpening.
    pub fn sharpen(self) -> Sharpened {
        let amount = f64::from(self.prior.request.params.sharpness);
        let sharpened = crate::sharpen::sharpen(&self.toned, amount);
        Sharpened {
            prior: self.prior,
            sharpened,
        }
    }
}

// ───────────────────────── Stage 5: Sharpened ────────────────────────

/// Pipeline state after sharpening.
#[must_use = "pipeline stages are consumed by advancing; call .finish() to continue"]
pub struct Sharpened {
    prior: Classified,
    sharpened: RgbaImage,
}

impl Sharpened {
    /// The sharpened image.
    #[must_use]
    pub const fn sharpened(&self) -> &RgbaImage {
        &self.sharpened
    }

    /// Dither and invert as requested.
    pub fn finish(self) -> Finished {
        let p = &self.prior.request.params;
        let was_inverted = p.invert;
        let dithered = p.dither_enabled.then(|| {
            crate::dither::dither(&self.sharpened, p.dither_type, p.dither_threshold, p.bayer_levels)
        });
        let base = dithered.unwrap_or(self.sharpened);
        let processed = if was_inverted {
            crate::tone::invert(&base)
        } else {
            base
        };
        Finished {
            prior: self.prior,
            processed,
            was_inverted,
        }
    }
}

// ───────────────────────── Stage 6: Finished ─────────────────────────

/// The final pipeline state.
#[must_use = "call .into_output() to take the results"]
pub struct Finished {
    prior: Classified,
    processed: RgbaImage,
    was_inverted: bool,
}

impl Finished {
    /// The engraving-ready image.
    #[must_use]
    pub const fn processed(&self) -> &RgbaImage {
        &self.processed
    }

    /// Take the results.
    #[must_use]
    pub fn into_output(self) -> ProcessOutput {
        let prior = self.prior;
        ProcessOutput {
            processed: self.processed,
            gray: prior.gray,
            image_stats: prior.stats,
            params: prior.request.params,
            analysis: Analysis {
                image_type: prior.classification.image_type,
                decision: prior.classification.decision,
                features: prior.features,
                histogram_features: prior.histogram_features,
                anchor: prior.anchor,
            },
            was_inverted: self.was_inverted,
        }
    }
}

// ──────────────────────────── Stage metadata ─────────────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 7;

/// Implemented by every stage for uniform naming and diagnostics.
pub trait PipelineStage {
    /// Human-readable name of this stage.
    const NAME: &str;

    /// Zero-based index (`0` for Pending through `6` for Finished).
    const INDEX: usize;

    /// Metrics describing the work done to reach this stage. `None` for
    /// [`Pending`].
    fn metrics(&self) -> Option<StageMetrics>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }
}

impl PipelineStage for Grayscaled {
    const NAME: &str = "grayscale";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Grayscale {
            width: self.gray.width(),
            height: self.gray.height(),
        })
    }
}

impl PipelineStage for Analyzed {
    const NAME: &str = "analyze";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Analysis {
            mean: self.stats.mean,
            std_dev: self.stats.std_dev,
            peak_count: self.histogram_features.peak_count(),
            bw_ratio: self.histogram_features.bw_ratio,
            features_extracted: self.features.is_some(),
        })
    }
}

impl PipelineStage for Classified {
    const NAME: &str = "classify";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Classification {
            image_type: self.classification.image_type,
            decision: self.classification.decision,
            anchor_gray: self.anchor.value,
            anchor_source: self.anchor.source,
        })
    }
}

impl PipelineStage for Toned {
    const NAME: &str = "tone";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        let p = &self.prior.request.params;
        Some(StageMetrics::Tone {
            brightness: p.brightness,
            contrast: p.contrast,
            anchor_gray: p.anchor_gray,
            level_in_low: p.level_in_low,
            level_in_high: p.level_in_high,
        })
    }
}

impl PipelineStage for Sharpened {
    const NAME: &str = "sharpen";
    const INDEX: usize = 5;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Sharpen {
            amount: self.prior.request.params.sharpness,
        })
    }
}

impl PipelineStage for Finished {
    const NAME: &str = "output";
    const INDEX: usize = 6;

    fn metrics(&self) -> Option<StageMetrics> {
        let p = &self.prior.request.params;
        Some(StageMetrics::Output {
            dither: p.dither_enabled.then_some(p.dither_type),
            white_pixels: crate::diagnostics::count_white_pixels(&self.processed),
            inverted: self.was_inverted,
        })
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental image processing pipeline.
///
/// Created via [`Pipeline::new`], which stores the image and request
/// without doing any processing.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline. Parameters are clamped into range here.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(image: RgbaImage, mut request: ProcessRequest) -> Pending {
        request.params = request.params.clamped();
        tracing::trace!(
            material = %request.material.material_id,
            variant = %request.material.variant,
            laser = %request.material.laser_type,
            width = image.width(),
            height = image.height(),
            "pipeline created"
        );
        Pending {
            request,
            original: image,
        }
    }
}
