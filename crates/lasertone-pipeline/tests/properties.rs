//! Integration tests: invariants that hold for any input image.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::Rgba;
use lasertone_pipeline::anchor::{adjust_for_material, resolve_anchor_gray};
use lasertone_pipeline::{
    Analysis, DitherType, ImageType, LaserType, MaterialContext, Overrides, ProcessRequest,
    ProcessingParams, RgbaImage, dither, histogram, process_image, tone,
};

const DITHER_TYPES: [DitherType; 5] = [
    DitherType::FloydSteinberg,
    DitherType::JarvisJudiceNinke,
    DitherType::Atkinson,
    DitherType::Ordered,
    DitherType::Bayer,
];

/// A handful of structurally different test images.
fn samples() -> Vec<RgbaImage> {
    let mut state: u32 = 7;
    let mut next = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        state.to_be_bytes()[1]
    };
    let noise = RgbaImage::from_fn(23, 31, |_, _| Rgba([next(), next(), next(), 255]));
    let gradient = RgbaImage::from_fn(64, 8, |x, _| {
        let v = u8::try_from(x * 4).unwrap();
        Rgba([v, v / 2, 255 - v, 255])
    });
    let bars = RgbaImage::from_fn(30, 30, |x, _| {
        let v = if (x / 5) % 2 == 0 { 20 } else { 235 };
        Rgba([v, v, v, 128])
    });
    let tiny = RgbaImage::from_pixel(1, 1, Rgba([90, 160, 30, 255]));
    vec![noise, gradient, bars, tiny, RgbaImage::new(0, 0)]
}

fn request(material: &str, variant: &str, params: ProcessingParams) -> ProcessRequest {
    ProcessRequest {
        material: MaterialContext::new(material, variant, LaserType::Diode),
        params,
        overrides: Overrides::default(),
    }
}

#[test]
fn invert_is_an_involution() {
    for image in samples() {
        assert_eq!(tone::invert(&tone::invert(&image)), image);
    }
}

#[test]
fn histogram_counts_every_pixel() {
    for image in samples() {
        let expected = u64::from(image.width()) * u64::from(image.height());
        assert_eq!(histogram::histogram(&image).total(), expected);
    }
}

#[test]
fn levels_are_monotonic() {
    let ramp = RgbaImage::from_fn(256, 1, |x, _| {
        let v = u8::try_from(x).unwrap();
        Rgba([v, v, v, 255])
    });
    for image_type in [ImageType::Photo, ImageType::Cartoon, ImageType::Portrait] {
        for (low, high) in [(0, 255), (30, 200), (100, 101), (0, 1)] {
            let out = tone::apply_levels(&ramp, low, high, 0, 255, image_type);
            let values: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
            assert!(
                values.windows(2).all(|w| w[0] <= w[1]),
                "levels {low}..{high} not monotonic for {image_type}"
            );
        }
    }
}

#[test]
fn dithering_is_deterministic_and_binary() {
    for image in samples() {
        let gray = lasertone_pipeline::grayscale::to_grayscale(&image);
        for dither_type in DITHER_TYPES {
            let first = dither::dither(&gray, dither_type, 128, 4);
            let second = dither::dither(&gray, dither_type, 128, 4);
            assert_eq!(first, second, "{dither_type:?} is not deterministic");
            if dither_type != DitherType::Bayer {
                assert!(
                    first.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255),
                    "{dither_type:?} produced a gray level"
                );
            }
        }
    }
}

#[tokio::test]
async fn processed_output_is_gray_and_keeps_alpha() {
    for image in samples() {
        for dither_enabled in [false, true] {
            let params = ProcessingParams {
                brightness: 15,
                contrast: 1.6,
                sharpness: 40,
                dither_enabled,
                ..ProcessingParams::default()
            };
            let output = process_image(&image, &request("wood", "light", params), None).await;
            assert_eq!(output.processed.dimensions(), image.dimensions());
            for (out, src) in output.processed.pixels().zip(image.pixels()) {
                assert_eq!(out.0[0], out.0[1]);
                assert_eq!(out.0[1], out.0[2]);
                assert_eq!(out.0[3], src.0[3]);
            }
        }
    }
}

#[tokio::test]
async fn processing_is_deterministic() {
    let params = ProcessingParams {
        sharpness: 30,
        dither_enabled: true,
        dither_type: DitherType::Atkinson,
        ..ProcessingParams::default()
    };
    for image in samples() {
        let req = request("leather", "dark", params.clone());
        let first = process_image(&image, &req, None).await;
        let second = process_image(&image, &req, None).await;
        assert_eq!(first, second);
    }
}

#[test]
fn anchor_survives_strongest_material_boost() {
    let metal_dark = MaterialContext::new("metal", "dark", LaserType::Fiber);
    let wood = MaterialContext::new("wood", "light", LaserType::Co2);
    for image in samples() {
        let stats = histogram::stats(&image);
        for image_type in [ImageType::Photo, ImageType::Cartoon, ImageType::Portrait] {
            let plain = resolve_anchor_gray(image_type, &stats, &wood, None).value;
            let boosted = resolve_anchor_gray(image_type, &stats, &metal_dark, None).value;
            assert!(boosted >= plain, "{image_type}: {boosted} < {plain}");
        }
    }
    // 250 * 1.1 * 1.05 overflows a byte and must clamp rather than wrap.
    assert_eq!(adjust_for_material(250, &metal_dark), 255);
    assert_eq!(adjust_for_material(200, &metal_dark), 231);
}

#[tokio::test]
async fn every_image_gets_a_type() {
    for image in samples() {
        let output = process_image(&image, &request("wood", "light", ProcessingParams::default()), None).await;
        assert!(matches!(
            output.analysis.image_type,
            ImageType::Photo | ImageType::Cartoon
        ));
    }
}

#[tokio::test]
async fn analysis_serializes_with_camel_case_keys() {
    let image = samples().remove(2);
    let output = process_image(&image, &request("wood", "light", ProcessingParams::default()), None).await;

    let json = serde_json::to_value(&output.analysis).unwrap();
    assert!(json.get("imageType").is_some());
    assert!(json.get("histogramFeatures").is_some());
    assert!(json["decision"].get("kind").is_some());

    let back: Analysis = serde_json::from_value(json).unwrap();
    assert_eq!(back.image_type, output.analysis.image_type);
    assert_eq!(back.decision, output.analysis.decision);
}

#[test]
fn preset_record_accepts_partial_and_unknown_keys() {
    let json = r#"{
        "brightness": -20,
        "ditherType": "bayer",
        "bayerLevels": 5,
        "laserPower": 70,
        "passes": 2
    }"#;
    let params: ProcessingParams = serde_json::from_str(json).unwrap();
    assert_eq!(params.brightness, -20);
    assert_eq!(params.dither_type, DitherType::Bayer);
    assert_eq!(params.bayer_levels, 5);
    assert!((params.contrast - 1.0).abs() < f64::EPSILON);
    assert!(!params.dither_enabled);

    let written = serde_json::to_string(&params).unwrap();
    assert!(written.contains("\"ditherType\":\"bayer\""));
    assert!(!written.contains("laserPower"));
}

#[test]
fn unknown_dither_name_is_rejected() {
    let result = serde_json::from_str::<ProcessingParams>(r#"{"ditherType": "stucki"}"#);
    assert!(result.is_err());
}
