//! Local Binary Patterns Histograms face classifier.
//!
//! Each canonical 100×100 grayscale sample is turned into 8-neighbour LBP
//! codes, split into an 8×8 grid of cells, and described by the concatenation
//! of per-cell normalized 256-bin histograms. Prediction is nearest neighbour
//! under the chi-square distance, so lower distance means a closer match.

use image::GrayImage;
use thiserror::Error;

/// Side length of the canonical sample fed to the classifier.
pub const CANONICAL_SIZE: u32 = 100;

const GRID: usize = 8;
const BINS: usize = 256;
const HISTOGRAM_LEN: usize = GRID * GRID * BINS;
const ARTIFACT_MAGIC: &[u8; 4] = b"LBPH";

/// Classifier label. Always ≥ 1; see [`crate::labels::LabelMapping`].
pub type Label = u32;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier has not been trained")]
    Untrained,
    #[error("{samples} samples but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },
    #[error("sample is {width}x{height}, expected {CANONICAL_SIZE}x{CANONICAL_SIZE}")]
    BadSampleSize { width: u32, height: u32 },
    #[error("corrupt classifier artifact: {0}")]
    Corrupt(&'static str),
}

/// Closest training sample for a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Lower is more confident.
    pub distance: f32,
}

/// Trainable face classifier working on canonical grayscale samples.
pub trait FaceClassifier: Send {
    /// Replace any previous state with a model fitted on `samples`.
    fn train(&mut self, samples: &[GrayImage], labels: &[Label]) -> Result<(), ClassifierError>;
    fn predict(&self, sample: &GrayImage) -> Result<Prediction, ClassifierError>;
    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError>;
}

#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    histograms: Vec<Vec<f32>>,
    labels: Vec<Label>,
}

impl LbphClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inverse of [`FaceClassifier::to_bytes`].
    ///
    /// Layout: `LBPH`, sample count (u32 LE), then per sample a label (u32 LE)
    /// followed by the histogram as f32 LE.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClassifierError> {
        let rest = bytes
            .strip_prefix(ARTIFACT_MAGIC.as_slice())
            .ok_or(ClassifierError::Corrupt("bad magic"))?;
        let (count, mut rest) = take_u32(rest)?;
        let record_len = 4 + HISTOGRAM_LEN * 4;
        if rest.len() != count as usize * record_len {
            return Err(ClassifierError::Corrupt("length does not match sample count"));
        }

        let mut model = Self::default();
        for _ in 0..count {
            let (label, body) = take_u32(rest)?;
            let (hist, tail) = body.split_at(HISTOGRAM_LEN * 4);
            model.labels.push(label);
            model.histograms.push(
                hist.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            );
            rest = tail;
        }
        Ok(model)
    }

    /// Number of stored training samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FaceClassifier for LbphClassifier {
    fn train(&mut self, samples: &[GrayImage], labels: &[Label]) -> Result<(), ClassifierError> {
        if samples.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }
        let histograms = samples
            .iter()
            .map(spatial_histogram)
            .collect::<Result<Vec<_>, _>>()?;
        self.histograms = histograms;
        self.labels = labels.to_vec();
        Ok(())
    }

    fn predict(&self, sample: &GrayImage) -> Result<Prediction, ClassifierError> {
        let probe = spatial_histogram(sample)?;
        let mut best: Option<Prediction> = None;
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square(hist, &probe);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction { label, distance });
            }
        }
        best.ok_or(ClassifierError::Untrained)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        let mut out = Vec::with_capacity(8 + self.labels.len() * (4 + HISTOGRAM_LEN * 4));
        out.extend_from_slice(ARTIFACT_MAGIC);
        out.extend_from_slice(&(self.labels.len() as u32).to_le_bytes());
        for (hist, label) in self.histograms.iter().zip(&self.labels) {
            out.extend_from_slice(&label.to_le_bytes());
            for v in hist {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Ok(out)
    }
}

fn take_u32(bytes: &[u8]) -> Result<(u32, &[u8]), ClassifierError> {
    if bytes.len() < 4 {
        return Err(ClassifierError::Corrupt("truncated"));
    }
    let (head, tail) = bytes.split_at(4);
    Ok((u32::from_le_bytes([head[0], head[1], head[2], head[3]]), tail))
}

/// 8-neighbour LBP code image of size `(w-2)×(h-2)`, row-major.
fn lbp_codes(img: &GrayImage) -> (Vec<u8>, usize, usize) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw = img.as_raw();
    let (cw, ch) = (w.saturating_sub(2), h.saturating_sub(2));
    let mut codes = Vec::with_capacity(cw * ch);
    // Clockwise from top-left.
    const OFFSETS: [(isize, isize); 8] = [(-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0)];
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let center = raw[y * w + x];
            let mut code = 0u8;
            for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
                let nx = (x as isize + dx) as usize;
                let ny = (y as isize + dy) as usize;
                if raw[ny * w + nx] >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }
    (codes, cw, ch)
}

fn spatial_histogram(img: &GrayImage) -> Result<Vec<f32>, ClassifierError> {
    if img.width() != CANONICAL_SIZE || img.height() != CANONICAL_SIZE {
        return Err(ClassifierError::BadSampleSize {
            width: img.width(),
            height: img.height(),
        });
    }
    let (codes, w, h) = lbp_codes(img);
    let (cell_w, cell_h) = (w / GRID, h / GRID);
    let mut hist = vec![0.0f32; HISTOGRAM_LEN];

    for gy in 0..GRID {
        for gx in 0..GRID {
            let base = (gy * GRID + gx) * BINS;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    hist[base + codes[y * w + x] as usize] += 1.0;
                }
            }
            let total = (cell_w * cell_h) as f32;
            if total > 0.0 {
                for v in &mut hist[base..base + BINS] {
                    *v /= total;
                }
            }
        }
    }
    Ok(hist)
}

/// Symmetric chi-square: `sum 2 (a - b)^2 / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| *x + *y > 0.0)
        .map(|(x, y)| 2.0 * (x - y).powi(2) / (x + y))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(period: u32) -> GrayImage {
        GrayImage::from_fn(CANONICAL_SIZE, CANONICAL_SIZE, |x, _| {
            if (x / period) % 2 == 0 { Luma([220]) } else { Luma([30]) }
        })
    }

    fn blobs(seed: u32) -> GrayImage {
        GrayImage::from_fn(CANONICAL_SIZE, CANONICAL_SIZE, |x, y| {
            Luma([((x * 7 + y * 13 + seed * 31) % 251) as u8])
        })
    }

    #[test]
    fn test_predict_identical_sample_has_zero_distance() {
        let mut lbph = LbphClassifier::new();
        lbph.train(&[stripes(3), blobs(1)], &[1, 2]).unwrap();
        let p = lbph.predict(&blobs(1)).unwrap();
        assert_eq!(p.label, 2);
        assert!(p.distance.abs() < 1e-6);
    }

    #[test]
    fn test_predict_nearest_label() {
        let mut lbph = LbphClassifier::new();
        lbph.train(&[stripes(3), stripes(4), blobs(1), blobs(2)], &[1, 1, 2, 2]).unwrap();
        assert_eq!(lbph.predict(&stripes(5)).unwrap().label, 1);
    }

    #[test]
    fn test_untrained_predict_fails() {
        let lbph = LbphClassifier::new();
        assert!(matches!(lbph.predict(&stripes(2)), Err(ClassifierError::Untrained)));
    }

    #[test]
    fn test_rejects_non_canonical_sample() {
        let mut lbph = LbphClassifier::new();
        let small = GrayImage::new(50, 50);
        assert!(matches!(
            lbph.train(&[small], &[1]),
            Err(ClassifierError::BadSampleSize { width: 50, height: 50 })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut lbph = LbphClassifier::new();
        assert!(matches!(
            lbph.train(&[stripes(2)], &[1, 2]),
            Err(ClassifierError::LengthMismatch { samples: 1, labels: 2 })
        ));
    }

    #[test]
    fn test_bytes_restore_predictions() {
        let mut lbph = LbphClassifier::new();
        lbph.train(&[stripes(3), blobs(4)], &[7, 9]).unwrap();
        let restored = LbphClassifier::from_bytes(&lbph.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.predict(&blobs(4)).unwrap().label, 9);
    }

    #[test]
    fn test_from_bytes_rejects_truncated() {
        let mut lbph = LbphClassifier::new();
        lbph.train(&[stripes(3)], &[1]).unwrap();
        let bytes = lbph.to_bytes().unwrap();
        assert!(matches!(
            LbphClassifier::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ClassifierError::Corrupt(_))
        ));
        assert!(matches!(LbphClassifier::from_bytes(b"nope"), Err(ClassifierError::Corrupt(_))));
    }

    #[test]
    fn test_cell_histograms_are_normalized() {
        let hist = spatial_histogram(&blobs(3)).unwrap();
        for cell in hist.chunks(BINS) {
            let sum: f32 = cell.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_flat_image_codes_are_all_ones() {
        let flat = GrayImage::from_pixel(5, 5, Luma([10]));
        let (codes, w, h) = lbp_codes(&flat);
        assert_eq!((w, h), (3, 3));
        assert!(codes.iter().all(|&c| c == 0xFF));
    }
}
