//! Per-frame recognition decision.
//!
//! Every frame is judged on its own: a match on one frame says nothing about
//! the next.

use crate::lbph::{Label, Prediction};
use crate::store::Store;
use crate::training::{canonicalize, TrainedModel};
use crate::types::{BoundingBox, SubjectSummary};
use image::RgbImage;

/// Distances at or above this are not matches.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 85.0;

#[derive(Debug, Clone, PartialEq)]
pub enum NoMatchReason {
    NoFace,
    ModelUnavailable,
    BelowConfidence { distance: f32 },
    /// The classifier produced a label the current mapping does not know.
    StaleLabel { label: Label },
    /// The mapped subject has been removed from the store.
    SubjectMissing { key: String },
    StoreUnavailable,
    InferenceFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub subject: SubjectSummary,
    pub representative: Vec<u8>,
    pub label: Label,
    pub distance: f32,
    pub face: BoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Matched(Match),
    NoMatch(NoMatchReason),
}

impl Recognition {
    pub fn matched(&self) -> Option<&Match> {
        match self {
            Recognition::Matched(m) => Some(m),
            Recognition::NoMatch(_) => None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched().is_some()
    }
}

/// Owns the active model, if any, and makes the per-frame decision.
pub struct RecognitionEngine {
    model: Option<TrainedModel>,
    threshold: f32,
}

impl RecognitionEngine {
    pub fn new(model: Option<TrainedModel>, threshold: f32) -> Self {
        if model.is_none() {
            tracing::warn!("no classifier loaded; every frame will be unrecognized");
        }
        Self { model, threshold }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Decide on one frame given the faces detected in it. Only the first face is used.
    pub fn recognize(&self, frame: &RgbImage, faces: &[BoundingBox], store: &dyn Store) -> Recognition {
        let Some(model) = &self.model else {
            return Recognition::NoMatch(NoMatchReason::ModelUnavailable);
        };
        let Some(face) = faces.first() else {
            return Recognition::NoMatch(NoMatchReason::NoFace);
        };

        let crop = face.crop(frame);
        if crop.width() == 0 || crop.height() == 0 {
            return Recognition::NoMatch(NoMatchReason::NoFace);
        }
        let probe = canonicalize(&image::imageops::grayscale(&crop));

        let prediction = match model.classifier.predict(&probe) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "classifier inference failed");
                return Recognition::NoMatch(NoMatchReason::InferenceFailed);
            }
        };
        self.decide(model, prediction, face, store)
    }

    fn decide(&self, model: &TrainedModel, prediction: Prediction, face: &BoundingBox, store: &dyn Store) -> Recognition {
        let Prediction { label, distance } = prediction;
        tracing::trace!(label, distance, "prediction");

        if distance >= self.threshold {
            return Recognition::NoMatch(NoMatchReason::BelowConfidence { distance });
        }
        let Some(key) = model.mapping.resolve(label) else {
            tracing::warn!(label, "classifier label missing from mapping");
            return Recognition::NoMatch(NoMatchReason::StaleLabel { label });
        };

        match store.subject(key) {
            Ok(Some(profile)) => Recognition::Matched(Match {
                subject: profile.summary,
                representative: profile.representative,
                label,
                distance,
                face: face.clone(),
            }),
            Ok(None) => {
                tracing::info!(key, "recognized subject no longer exists");
                Recognition::NoMatch(NoMatchReason::SubjectMissing { key: key.to_string() })
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "store lookup failed during recognition");
                Recognition::NoMatch(NoMatchReason::StoreUnavailable)
            }
        }
    }
}
