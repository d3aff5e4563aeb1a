//! Quality-gated enrollment capture and commit.
//!
//! [`EnrollmentCapture`] consumes one frame's detections per tick and keeps a
//! crop only when exactly one face is visible and its quality clears the gate.
//! Once five crops are held the capture completes and stops asking for frames.

use crate::error::ValidationError;
use crate::events::{EventBus, RollEvent};
use crate::quality;
use crate::store::{Store, StoreError};
use crate::types::{BoundingBox, FaceSamples, SubjectProfile, SubjectSummary, SAMPLES_PER_SUBJECT};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_QUALITY_THRESHOLD: f32 = 80.0;
/// Stored samples are re-encoded as JPEG at this square size.
pub const STORED_SAMPLE_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sample encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    AwaitingSingleFace,
    ScoringFace,
    Captured(usize),
    Complete,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub quality_threshold: f32,
    pub min_face_size: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            min_face_size: quality::DEFAULT_MIN_FACE_SIZE,
        }
    }
}

/// A crop accepted by the quality gate.
#[derive(Debug, Clone)]
pub struct CapturedSample {
    pub crop: RgbImage,
    pub quality: f32,
}

/// What one tick did, for progress display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrollmentProgress {
    pub state: CaptureState,
    /// Samples held so far, 0–5.
    pub samples: usize,
    /// Quality of the single face seen this tick, if any.
    pub quality: Option<f32>,
    pub multiple_faces: bool,
    /// A new sample was accepted this tick.
    pub captured: bool,
}

pub struct EnrollmentCapture {
    config: CaptureConfig,
    state: CaptureState,
    samples: Vec<CapturedSample>,
    stopped: bool,
}

impl EnrollmentCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            samples: Vec::with_capacity(SAMPLES_PER_SUBJECT),
            stopped: false,
        }
    }

    /// Begin accepting frames.
    pub fn start(&mut self) {
        if self.state == CaptureState::Idle {
            self.state = CaptureState::AwaitingSingleFace;
        }
    }

    /// Halt capture. Samples already taken are kept.
    pub fn stop(&mut self) {
        if !self.stopped {
            tracing::info!(samples = self.samples.len(), "enrollment capture stopped");
        }
        self.stopped = true;
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == CaptureState::Complete
    }

    /// Whether further frames are wanted.
    pub fn wants_frames(&self) -> bool {
        !self.stopped && !matches!(self.state, CaptureState::Idle | CaptureState::Complete)
    }

    pub fn samples(&self) -> &[CapturedSample] {
        &self.samples
    }

    /// Process one frame and the faces detected in it.
    pub fn tick(&mut self, frame: &RgbImage, faces: &[BoundingBox]) -> EnrollmentProgress {
        let mut progress = EnrollmentProgress {
            state: self.state,
            samples: self.samples.len(),
            quality: None,
            multiple_faces: false,
            captured: false,
        };
        if !self.wants_frames() {
            return progress;
        }

        match faces {
            [] => self.state = CaptureState::AwaitingSingleFace,
            [face] => {
                self.state = CaptureState::ScoringFace;
                let crop = face.crop(frame);
                let score = quality::score_with_min_size(&crop, self.config.min_face_size);
                progress.quality = Some(score);

                if score >= self.config.quality_threshold && self.samples.len() < SAMPLES_PER_SUBJECT {
                    self.samples.push(CapturedSample { crop, quality: score });
                    progress.captured = true;
                    tracing::info!(count = self.samples.len(), quality = score, "enrollment sample captured");
                }

                self.state = if self.samples.len() >= SAMPLES_PER_SUBJECT {
                    tracing::info!("enrollment capture complete");
                    CaptureState::Complete
                } else if self.samples.is_empty() {
                    CaptureState::AwaitingSingleFace
                } else {
                    CaptureState::Captured(self.samples.len())
                };
            }
            many => {
                progress.multiple_faces = true;
                tracing::debug!(count = many.len(), "multiple faces in frame, not capturing");
            }
        }

        progress.state = self.state;
        progress.samples = self.samples.len();
        progress
    }

    /// Encode the captured set for storage. Requires exactly five samples.
    pub fn encoded_samples(&self) -> Result<FaceSamples, EnrollmentError> {
        if self.samples.len() != SAMPLES_PER_SUBJECT {
            return Err(ValidationError::IncompleteSamples {
                captured: self.samples.len(),
                required: SAMPLES_PER_SUBJECT,
            }
            .into());
        }
        let mut encoded: [Vec<u8>; SAMPLES_PER_SUBJECT] = Default::default();
        for (slot, sample) in encoded.iter_mut().zip(&self.samples) {
            *slot = encode_sample(&sample.crop)?;
        }
        Ok(FaceSamples(encoded))
    }
}

fn encode_sample(crop: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let resized = image::imageops::resize(crop, STORED_SAMPLE_SIZE, STORED_SAMPLE_SIZE, FilterType::Triangle);
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(resized).write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
    Ok(buf)
}

/// Descriptive fields entered for a new subject.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentForm {
    pub key: String,
    pub name: String,
    pub gender: String,
    pub class: String,
    pub representative: Option<PathBuf>,
}

/// Read and check a representative image file.
pub fn read_representative(path: &std::path::Path) -> Result<Vec<u8>, ValidationError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ValidationError::UnreadableRepresentative(format!("{}: {e}", path.display())))?;
    image::load_from_memory(&bytes)
        .map_err(|e| ValidationError::UnreadableRepresentative(format!("{}: {e}", path.display())))?;
    Ok(bytes)
}

/// Persist a new subject from a completed capture.
///
/// Checks, in order: key present, name and class present, key unused,
/// representative image readable, exactly five samples. Nothing is written
/// unless all pass.
pub fn commit_enrollment(
    store: &dyn Store,
    events: &EventBus,
    form: &EnrollmentForm,
    capture: &EnrollmentCapture,
) -> Result<SubjectProfile, EnrollmentError> {
    let key = form.key.trim();
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }
    if form.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name").into());
    }
    if form.class.trim().is_empty() {
        return Err(ValidationError::MissingField("class").into());
    }
    if store.subject_exists(key)? {
        return Err(ValidationError::DuplicateKey(key.to_string()).into());
    }
    let path = form
        .representative
        .as_deref()
        .ok_or(ValidationError::MissingRepresentative)?;
    let representative = read_representative(path)?;
    let samples = capture.encoded_samples()?;

    let profile = SubjectProfile {
        summary: SubjectSummary {
            key: key.to_string(),
            name: form.name.trim().to_string(),
            gender: form.gender.trim().to_string(),
            class: form.class.trim().to_string(),
            score: None,
        },
        representative,
        samples,
    };
    store.insert_subject(&profile)?;

    tracing::info!(key, "subject enrolled");
    events.publish(RollEvent::EnrollmentCompleted { key: key.to_string() });
    Ok(profile)
}

/// Overwrite an existing subject's samples with a completed capture.
pub fn replace_samples(
    store: &dyn Store,
    events: &EventBus,
    key: &str,
    capture: &EnrollmentCapture,
) -> Result<(), EnrollmentError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }
    let samples = capture.encoded_samples()?;
    if !store.replace_samples(key, &samples)? {
        return Err(ValidationError::UnknownSubject(key.to_string()).into());
    }
    tracing::info!(key, "face samples replaced");
    events.publish(RollEvent::SamplesReplaced { key: key.to_string() });
    Ok(())
}
