//! rollcall-core: Face enrollment, recognition and attendance ledger engine.
//!
//! Faces are located with SCRFD via ONNX Runtime, gated on a sharpness and
//! brightness quality score during enrollment, and identified with an LBPH
//! classifier trained from the stored samples. Persistence is abstracted
//! behind [`store::Store`].

pub mod detector;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod labels;
pub mod lbph;
pub mod ledger;
pub mod quality;
pub mod recognition;
pub mod scoring;
pub mod store;
pub mod subjects;
pub mod training;
pub mod types;

pub use detector::{FaceDetector, ScrfdDetector};
pub use error::ValidationError;
pub use events::{EventBus, RollEvent};
pub use labels::LabelMapping;
pub use ledger::Ledger;
pub use recognition::{Recognition, RecognitionEngine};
pub use store::{HistoryFilter, Store, StoreError};
pub use types::{
    AttendanceEntry, AttendanceRecord, AttendanceStatus, BoundingBox, FaceSamples, SampleSet,
    SubjectProfile, SubjectSummary, SubjectUpdate, SAMPLES_PER_SUBJECT,
};
