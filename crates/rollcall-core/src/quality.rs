//! Face crop quality scoring.
//!
//! Combines a sharpness signal (variance of the Laplacian) with mean
//! brightness into a single 0–100 score used to gate enrollment captures.

use image::{GrayImage, RgbImage};

/// Crops smaller than this on either side are capped at [`SMALL_FACE_SCORE`].
pub const DEFAULT_MIN_FACE_SIZE: u32 = 150;
/// Score given to crops too small to judge reliably.
pub const SMALL_FACE_SCORE: f32 = 50.0;
pub const MAX_SCORE: f32 = 100.0;

const SHARPNESS_WEIGHT: f32 = 0.5;
const BRIGHTNESS_WEIGHT: f32 = 50.0;

/// Score a color face crop with the default minimum face size.
pub fn score(face: &RgbImage) -> f32 {
    score_with_min_size(face, DEFAULT_MIN_FACE_SIZE)
}

/// Score a color face crop in `[0, 100]`.
///
/// Empty crops score 0; crops with either side below `min_size` score 50.
pub fn score_with_min_size(face: &RgbImage, min_size: u32) -> f32 {
    let (w, h) = face.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    if w < min_size || h < min_size {
        return SMALL_FACE_SCORE;
    }

    let gray = image::imageops::grayscale(face);
    score_from_metrics(laplacian_variance(&gray), mean_brightness(&gray))
}

/// `min(100, 0.5 * sharpness + 50 * brightness)`, where brightness is in `[0, 1]`.
pub fn score_from_metrics(sharpness: f32, brightness: f32) -> f32 {
    (SHARPNESS_WEIGHT * sharpness + BRIGHTNESS_WEIGHT * brightness).min(MAX_SCORE)
}

/// Mean intensity divided by the maximum channel value (255).
pub fn mean_brightness(gray: &GrayImage) -> f32 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    (sum as f64 / pixels.len() as f64 / 255.0) as f32
}

/// Variance of the 4-neighbour Laplacian `[0 1 0; 1 -4 1; 0 1 0]`.
///
/// Borders are reflected without repeating the edge pixel (reflect-101).
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let (w, h) = (w as i64, h as i64);
    let px = |x: i64, y: i64| -> f64 {
        gray.get_pixel(reflect_101(x, w) as u32, reflect_101(y, h) as u32).0[0] as f64
    };

    let n = (w * h) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let v = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

fn reflect_101(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= len {
        i = 2 * (len - 1) - i;
    }
    i.clamp(0, len - 1)
}
