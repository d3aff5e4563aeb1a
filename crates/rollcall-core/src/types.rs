use chrono::{NaiveDate, NaiveTime};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Number of face samples every enrolled subject carries.
pub const SAMPLES_PER_SUBJECT: usize = 5;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Integer crop rectangle `(x, y, width, height)` clamped to a `frame_w`×`frame_h` frame.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn clamped(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(frame_w);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(frame_h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }

    /// Copy this region out of `frame`. An out-of-frame box yields an empty image.
    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        match self.clamped(frame.width(), frame.height()) {
            Some((x, y, w, h)) => image::imageops::crop_imm(frame, x, y, w, h).to_image(),
            None => RgbImage::new(0, 0),
        }
    }
}

/// The five encoded face samples of one subject. Always replaced as a whole set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSamples(pub [Vec<u8>; SAMPLES_PER_SUBJECT]);

impl FaceSamples {
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }
}

/// Descriptive fields of a subject, without any image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub key: String,
    pub name: String,
    pub gender: String,
    pub class: String,
    /// Coursework score, once one has been computed.
    pub score: Option<f32>,
}

/// A fully enrolled subject: descriptive fields, representative image and samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectProfile {
    pub summary: SubjectSummary,
    /// Encoded representative (avatar) image.
    pub representative: Vec<u8>,
    pub samples: FaceSamples,
}

/// Field edits for an existing subject. `representative` is left unchanged when `None`.
#[derive(Debug, Clone)]
pub struct SubjectUpdate {
    pub key: String,
    pub name: String,
    pub gender: String,
    pub class: String,
    pub representative: Option<Vec<u8>>,
}

/// Stored samples of one subject, as read back for training.
///
/// Columns that are missing in the store come back as empty buffers and are
/// skipped like any other undecodable sample.
#[derive(Debug, Clone)]
pub struct SampleSet {
    pub key: String,
    pub samples: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            _ => None,
        }
    }
}

/// One ledger row. `ordinal` is the 1-based check-in count for the subject on `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub subject_key: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
    pub ordinal: u32,
}

/// Ledger row joined with the subject's descriptive fields, for history views.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEntry {
    pub subject_key: String,
    pub name: String,
    pub class: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
}
