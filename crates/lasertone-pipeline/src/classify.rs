//! Rule-based image classification.
//!
//! An ordered decision list of pure predicates over the [`FeatureSet`]
//! and histogram shape. The first rule that fires classifies the image
//! as [`ImageType::Cartoon`]. When no rule fires, an optional
//! [`FaceDetector`] is consulted: any detected face makes the image a
//! [`ImageType::Portrait`]. Everything else is a [`ImageType::Photo`].
//!
//! The thresholds are hand-tuned and kept exactly as calibrated,
//! including branches that rarely or never fire on real histograms.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{self, Either};
use serde::{Deserialize, Serialize};

use crate::types::{FeatureSet, HistogramFeatures, ImageType, RgbaImage};

/// One Cartoon rule in the decision list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// At most three peaks and `bw_ratio > 0.8`.
    StrongCartoon,
    /// `low_variance > 0.95`, or `> 0.92` with any black/white mass.
    NearBinaryFlat,
    /// `bw_ratio > 0.7`, or `> 0.5` with `low_variance > 0.7`.
    BlackWhiteDominance,
    /// Long edges, few color blocks, simple palette, mostly flat.
    GeometricShapes,
    /// Very simple palette, mostly flat, at most four peaks.
    ColorConsistency,
    /// Flat with sharp distinct edges, unless the histogram or skin
    /// tones suggest a photograph.
    SharpFlatCombo,
}

impl Rule {
    /// Rules in evaluation order.
    pub const ORDERED: [Self; 6] = [
        Self::StrongCartoon,
        Self::NearBinaryFlat,
        Self::BlackWhiteDominance,
        Self::GeometricShapes,
        Self::ColorConsistency,
        Self::SharpFlatCombo,
    ];

    /// Whether this rule classifies the input as Cartoon.
    #[must_use]
    pub fn fires(self, input: &ClassifierInput<'_>) -> bool {
        let f = input.features;
        let peaks = input.histogram.peak_count();
        let bw = f.bw_ratio;
        let flat = f.low_variance_area_ratio;
        match self {
            // `peaks == 0` only happens for degenerate histograms.
            Self::StrongCartoon => peaks <= 3 && bw > 0.8,
            Self::NearBinaryFlat => flat > 0.95 || (flat > 0.92 && bw > 0.001),
            Self::BlackWhiteDominance => bw > 0.7 || (bw > 0.5 && flat > 0.7),
            Self::GeometricShapes => {
                f.long_edge_ratio > 0.15
                    && f.color_block_count < 10
                    && f.color_simplicity > 0.7
                    && flat > 0.8
            }
            Self::ColorConsistency => f.color_simplicity > 0.85 && flat > 0.75 && peaks <= 4,
            Self::SharpFlatCombo => {
                let candidate = flat > 0.85
                    && bw > 0.01
                    && f.distinct_edge_ratio > 0.04
                    && f.edge_contrast > 50.0;
                let photographic = (peaks == 1 && input.std_dev < 50.0)
                    || peaks > 5
                    || f.skin_tone_ratio > 0.3;
                candidate && !photographic
            }
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StrongCartoon => "strong-cartoon",
            Self::NearBinaryFlat => "near-binary-flat",
            Self::BlackWhiteDominance => "black-white-dominance",
            Self::GeometricShapes => "geometric-shapes",
            Self::ColorConsistency => "color-consistency",
            Self::SharpFlatCombo => "sharp-flat-combo",
        })
    }
}

/// Everything the rules read.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    /// Edge, texture, and color features.
    pub features: &'a FeatureSet,
    /// Histogram shape.
    pub histogram: &'a HistogramFeatures,
    /// Gray-level standard deviation.
    pub std_dev: f64,
}

impl ClassifierInput<'_> {
    /// An image with no edges and no black/white mass, such as a single
    /// uniform mid-gray, carries no cartoon evidence at all. Its perfect
    /// flatness would otherwise satisfy the flat-image rules.
    ///
    /// The guard is broader than uniform fills. Any smooth image with no
    /// detected edges and no near-black or near-white pixels (soft pastel
    /// art, a gentle gradient) skips every rule in [`Rule::ORDERED`],
    /// including [`Rule::NearBinaryFlat`] and [`Rule::ColorConsistency`]
    /// which would otherwise fire on it, and goes on to face detection
    /// or the Photo default.
    #[must_use]
    pub fn is_featureless(&self) -> bool {
        self.features.bw_ratio <= 0.0 && self.features.edge_ratio <= 0.0
    }
}

/// First rule in [`Rule::ORDERED`] that fires, if any.
#[must_use]
pub fn classify_rules(input: &ClassifierInput<'_>) -> Option<Rule> {
    if input.is_featureless() {
        return None;
    }
    Rule::ORDERED.into_iter().find(|rule| rule.fires(input))
}

/// Why an image ended up with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Decision {
    /// A Cartoon rule fired.
    Rule {
        /// The rule.
        rule: Rule,
    },
    /// The face detector reported faces.
    FaceDetected {
        /// Number of faces reported.
        faces: usize,
    },
    /// Nothing fired and no faces were found.
    Default,
    /// The caller supplied the type.
    Known,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rule { rule } => write!(f, "rule {rule}"),
            Self::FaceDetected { faces } => write!(f, "{faces} face(s) detected"),
            Self::Default => f.write_str("default"),
            Self::Known => f.write_str("caller supplied"),
        }
    }
}

/// A classification and its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// The resulting type.
    pub image_type: ImageType,
    /// How it was reached.
    pub decision: Decision,
}

impl Classification {
    /// A classification supplied by the caller.
    #[must_use]
    pub const fn known(image_type: ImageType) -> Self {
        Self {
            image_type,
            decision: Decision::Known,
        }
    }
}

// ───────────────────────────── Face detection ─────────────────────────

/// Axis-aligned face bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Box width.
    pub width: f64,
    /// Box height.
    pub height: f64,
}

/// One face reported by a [`FaceDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Where the face is.
    pub bounds: FaceBox,
    /// Detector confidence.
    pub score: f64,
}

/// Errors a face detector may report. The classifier recovers from all
/// of them by treating the image as having no faces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaceDetectionError {
    /// The detector or its model is not loaded.
    #[error("face detector unavailable")]
    Unavailable,
    /// The detector ran and failed.
    #[error("face detection failed: {0}")]
    Failed(String),
    /// The detector did not answer in time.
    #[error("face detection timed out")]
    TimedOut,
}

/// A host-provided face detection capability.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detect faces in an RGBA image.
    async fn detect_faces(&self, image: &RgbaImage)
    -> Result<Vec<DetectedFace>, FaceDetectionError>;
}

/// Source of delays used to bound the face detector.
///
/// The classifier never reaches for an ambient runtime; the host
/// supplies the timer for whatever executor drives the pipeline.
#[async_trait]
pub trait Timer: Send + Sync {
    /// Complete once `duration` has elapsed.
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by `tokio::time::sleep`.
///
/// # Panics
///
/// Sleeping panics unless awaited inside a Tokio runtime with the time
/// driver enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A face detector together with the timer that bounds it.
#[derive(Clone, Copy)]
pub struct FaceDetection<'a> {
    pub detector: &'a dyn FaceDetector,
    pub timer: &'a dyn Timer,
}

impl<'a> FaceDetection<'a> {
    #[must_use]
    pub const fn new(detector: &'a dyn FaceDetector, timer: &'a dyn Timer) -> Self {
        Self { detector, timer }
    }

    /// Bound `detector` with [`TokioTimer`]. Only for pipelines polled
    /// on a Tokio runtime; use [`FaceDetection::new`] elsewhere.
    #[must_use]
    pub const fn tokio(detector: &'a dyn FaceDetector) -> Self {
        Self::new(detector, &TokioTimer)
    }
}

impl std::fmt::Debug for FaceDetection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceDetection").finish_non_exhaustive()
    }
}

/// Ask the detector for faces, racing it against the timer.
async fn detect_with_timeout(
    detection: &FaceDetection<'_>,
    image: &RgbaImage,
    timeout: Duration,
) -> Result<Vec<DetectedFace>, FaceDetectionError> {
    let detect = detection.detector.detect_faces(image);
    let deadline = detection.timer.sleep(timeout);
    match future::select(detect, deadline).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(FaceDetectionError::TimedOut),
    }
}

/// Classify an image.
///
/// Runs the rule list first. Only if no rule fires is the detector
/// consulted; a detector error or timeout is logged and treated as "no
/// faces". Never fails.
pub async fn classify(
    input: &ClassifierInput<'_>,
    image: &RgbaImage,
    detection: Option<&FaceDetection<'_>>,
    timeout: Duration,
) -> Classification {
    if let Some(rule) = classify_rules(input) {
        tracing::debug!(%rule, "classified as cartoon");
        return Classification {
            image_type: ImageType::Cartoon,
            decision: Decision::Rule { rule },
        };
    }

    if let Some(detection) = detection {
        match detect_with_timeout(detection, image, timeout).await {
            Ok(faces) if !faces.is_empty() => {
                tracing::debug!(faces = faces.len(), "classified as portrait");
                return Classification {
                    image_type: ImageType::Portrait,
                    decision: Decision::FaceDetected { faces: faces.len() },
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "face detection skipped"),
        }
    }

    tracing::debug!("classified as photo");
    Classification {
        image_type: ImageType::Photo,
        decision: Decision::Default,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Peak;

    fn peaks(n: usize) -> HistogramFeatures {
        HistogramFeatures {
            peaks: (0..n)
                .map(|i| Peak {
                    position: u8::try_from(i * 40).unwrap(),
                    height: 0.1,
                })
                .collect(),
            ..HistogramFeatures::default()
        }
    }

    /// Features of a busy, continuous-tone photo: no rule fires.
    fn photo_features() -> FeatureSet {
        FeatureSet {
            edge_ratio: 0.3,
            distinct_edge_ratio: 0.1,
            long_edge_ratio: 0.05,
            long_edge_count: 2,
            edge_contrast: 40.0,
            low_variance_area_ratio: 0.2,
            color_simplicity: 0.1,
            skin_tone_ratio: 0.0,
            color_block_count: 80,
            bw_ratio: 0.05,
        }
    }

    fn first_rule(features: &FeatureSet, hist: &HistogramFeatures, std_dev: f64) -> Option<Rule> {
        classify_rules(&ClassifierInput {
            features,
            histogram: hist,
            std_dev,
        })
    }

    #[test]
    fn photo_features_fire_nothing() {
        assert_eq!(first_rule(&photo_features(), &peaks(3), 60.0), None);
    }

    #[test]
    fn strong_cartoon() {
        let f = FeatureSet {
            bw_ratio: 0.85,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(2), 60.0), Some(Rule::StrongCartoon));
        assert_eq!(first_rule(&f, &peaks(0), 60.0), Some(Rule::StrongCartoon));
    }

    #[test]
    fn near_binary_flat() {
        let f = FeatureSet {
            low_variance_area_ratio: 0.96,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(3), 60.0), Some(Rule::NearBinaryFlat));
        // Slightly less flat still fires once a trace of black/white exists.
        let traced = FeatureSet {
            low_variance_area_ratio: 0.93,
            bw_ratio: 0.002,
            ..photo_features()
        };
        assert_eq!(first_rule(&traced, &peaks(3), 60.0), Some(Rule::NearBinaryFlat));
        let g = FeatureSet {
            low_variance_area_ratio: 0.93,
            bw_ratio: 0.0005,
            ..photo_features()
        };
        assert_ne!(first_rule(&g, &peaks(3), 60.0), Some(Rule::NearBinaryFlat));
    }

    #[test]
    fn black_white_dominance() {
        let f = FeatureSet {
            bw_ratio: 0.75,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(3), 60.0), Some(Rule::BlackWhiteDominance));
        let g = FeatureSet {
            bw_ratio: 0.55,
            low_variance_area_ratio: 0.72,
            ..photo_features()
        };
        assert_eq!(first_rule(&g, &peaks(3), 60.0), Some(Rule::BlackWhiteDominance));
    }

    #[test]
    fn geometric_shapes() {
        let f = FeatureSet {
            long_edge_ratio: 0.2,
            color_block_count: 5,
            color_simplicity: 0.75,
            low_variance_area_ratio: 0.82,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(3), 60.0), Some(Rule::GeometricShapes));
    }

    #[test]
    fn color_consistency() {
        let f = FeatureSet {
            color_simplicity: 0.9,
            low_variance_area_ratio: 0.78,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(3), 60.0), Some(Rule::ColorConsistency));
    }

    fn sharp_flat() -> FeatureSet {
        FeatureSet {
            low_variance_area_ratio: 0.88,
            bw_ratio: 0.02,
            distinct_edge_ratio: 0.05,
            edge_contrast: 60.0,
            ..photo_features()
        }
    }

    #[test]
    fn sharp_flat_combo_fires() {
        assert_eq!(first_rule(&sharp_flat(), &peaks(3), 60.0), Some(Rule::SharpFlatCombo));
    }

    #[test]
    fn sharp_flat_combo_rejections() {
        // Single narrow peak.
        assert_eq!(first_rule(&sharp_flat(), &peaks(1), 30.0), None);
        // Single peak but wide spread still fires.
        assert_eq!(first_rule(&sharp_flat(), &peaks(1), 55.0), Some(Rule::SharpFlatCombo));
        // Too many peaks.
        assert_eq!(first_rule(&sharp_flat(), &peaks(6), 60.0), None);
        // Skin tones.
        let skin = FeatureSet {
            skin_tone_ratio: 0.4,
            ..sharp_flat()
        };
        assert_eq!(first_rule(&skin, &peaks(3), 60.0), None);
    }

    #[test]
    fn featureless_image_skips_rules() {
        let f = FeatureSet {
            low_variance_area_ratio: 1.0,
            color_simplicity: 31.0 / 32.0,
            color_block_count: 1,
            ..FeatureSet::default()
        };
        assert_eq!(first_rule(&f, &peaks(1), 0.0), None);
    }

    #[test]
    fn smooth_pastel_image_skips_flat_rules() {
        let pastel = FeatureSet {
            low_variance_area_ratio: 0.96,
            color_simplicity: 0.9,
            color_block_count: 3,
            ..FeatureSet::default()
        };
        let hist = peaks(2);
        let input = ClassifierInput {
            features: &pastel,
            histogram: &hist,
            std_dev: 20.0,
        };
        assert!(input.is_featureless());
        assert!(Rule::NearBinaryFlat.fires(&input));
        assert!(Rule::ColorConsistency.fires(&input));
        assert_eq!(classify_rules(&input), None);
    }

    #[test]
    fn rule_order_is_priority() {
        // Satisfies rules 1, 2, and 3 at once.
        let f = FeatureSet {
            bw_ratio: 0.9,
            low_variance_area_ratio: 0.99,
            ..photo_features()
        };
        assert_eq!(first_rule(&f, &peaks(2), 60.0), Some(Rule::StrongCartoon));
    }

    #[test]
    fn decision_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Decision::Rule {
            rule: Rule::NearBinaryFlat,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"rule","rule":"near-binary-flat"}"#);
        let json = serde_json::to_string(&Decision::FaceDetected { faces: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"faceDetected","faces":2}"#);
    }

    // --- face detection ---

    struct Faces(usize);

    #[async_trait]
    impl FaceDetector for Faces {
        async fn detect_faces(
            &self,
            _image: &RgbaImage,
        ) -> Result<Vec<DetectedFace>, FaceDetectionError> {
            Ok(vec![
                DetectedFace {
                    bounds: FaceBox {
                        x: 1.0,
                        y: 1.0,
                        width: 4.0,
                        height: 4.0,
                    },
                    score: 0.9,
                };
                self.0
            ])
        }
    }

    struct Broken;

    #[async_trait]
    impl FaceDetector for Broken {
        async fn detect_faces(
            &self,
            _image: &RgbaImage,
        ) -> Result<Vec<DetectedFace>, FaceDetectionError> {
            Err(FaceDetectionError::Unavailable)
        }
    }

    struct Stalled;

    #[async_trait]
    impl FaceDetector for Stalled {
        async fn detect_faces(
            &self,
            _image: &RgbaImage,
        ) -> Result<Vec<DetectedFace>, FaceDetectionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    async fn run(detector: Option<&dyn FaceDetector>, features: &FeatureSet) -> Classification {
        let detection = detector.map(FaceDetection::tokio);
        let hist = peaks(3);
        let input = ClassifierInput {
            features,
            histogram: &hist,
            std_dev: 60.0,
        };
        classify(
            &input,
            &RgbaImage::new(8, 8),
            detection.as_ref(),
            Duration::from_secs(3),
        )
        .await
    }

    #[tokio::test]
    async fn faces_make_a_portrait() {
        let c = run(Some(&Faces(2)), &photo_features()).await;
        assert_eq!(c.image_type, ImageType::Portrait);
        assert_eq!(c.decision, Decision::FaceDetected { faces: 2 });
    }

    #[tokio::test]
    async fn no_faces_is_a_photo() {
        let c = run(Some(&Faces(0)), &photo_features()).await;
        assert_eq!(c.image_type, ImageType::Photo);
        assert_eq!(c.decision, Decision::Default);
    }

    #[tokio::test]
    async fn detector_error_falls_back_to_photo() {
        let c = run(Some(&Broken), &photo_features()).await;
        assert_eq!(c.image_type, ImageType::Photo);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_detector_times_out() {
        let c = run(Some(&Stalled), &photo_features()).await;
        assert_eq!(c.image_type, ImageType::Photo);
        assert_eq!(c.decision, Decision::Default);
    }

    #[tokio::test]
    async fn rules_win_over_faces() {
        let f = FeatureSet {
            bw_ratio: 0.9,
            ..photo_features()
        };
        let c = run(Some(&Faces(1)), &f).await;
        assert_eq!(c.image_type, ImageType::Cartoon);
    }

    #[tokio::test]
    async fn no_detector_is_a_photo() {
        let c = run(None, &photo_features()).await;
        assert_eq!(c.image_type, ImageType::Photo);
    }
}
