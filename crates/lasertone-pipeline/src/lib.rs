//! lasertone-pipeline: image analysis and tone mapping for laser
//! engraving (sans-IO).
//!
//! Turns an RGBA photograph, drawing, or portrait into a single-channel,
//! optionally dithered bitmap tuned to a material and laser:
//! grayscale -> histogram and feature analysis -> classification ->
//! anchor gray -> brightness/contrast/levels -> sharpen -> optional
//! dither -> optional invert.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! [`RgbaImage`] buffers and returns structured data; decoding and
//! encoding image files lives in the CLI.

pub mod anchor;
pub mod classify;
pub mod diagnostics;
pub mod dither;
pub mod edge;
pub mod features;
pub mod grayscale;
pub mod histogram;
pub mod pipeline;
pub mod region;
pub mod sharpen;
pub mod tone;
pub mod types;

pub use anchor::{AnchorGray, AnchorSource};
pub use classify::{
    Classification, Decision, DetectedFace, FaceBox, FaceDetection, FaceDetectionError,
    FaceDetector, Rule, Timer, TokioTimer,
};
pub use diagnostics::process_image_with_diagnostics;
pub use pipeline::{Analysis, Pipeline, ProcessOutput};
pub use types::{
    DitherType, FeatureSet, GrayImage, Histogram, HistogramFeatures, ImageStats, ImageType,
    LaserType, MaterialContext, Overrides, PipelineError, ProcessRequest, ProcessingParams,
    RgbaImage, image_from_rgba8,
};

/// Run the full processing pipeline on an RGBA image.
///
/// Parameters in `request` are clamped into range first. The image type
/// comes from `request.overrides.known_image_type` when set, otherwise
/// from the classifier, which consults `detection` only when no Cartoon
/// rule fires. Face detection failures and timeouts are logged and never
/// surface. The timeout runs on the timer carried by `detection`, so
/// this future can be polled on any executor.
///
/// Zero-sized images are valid: analysis falls back to neutral values
/// and the output is empty.
pub async fn process_image(
    image: &RgbaImage,
    request: &ProcessRequest,
    detection: Option<&FaceDetection<'_>>,
) -> ProcessOutput {
    Pipeline::new(image.clone(), request.clone())
        .grayscale()
        .analyze()
        .classify(detection)
        .await
        .tone()
        .sharpen()
        .finish()
        .into_output()
}

/// [`process_image`] on a raw interleaved RGBA8 buffer.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidImageData`] if the buffer length is
/// not a multiple of 4 or does not equal `width * height * 4`.
pub async fn process_rgba8(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    request: &ProcessRequest,
    detection: Option<&FaceDetection<'_>>,
) -> Result<ProcessOutput, PipelineError> {
    let image = image_from_rgba8(width, height, pixels)?;
    Ok(process_image(&image, request, detection).await)
}
