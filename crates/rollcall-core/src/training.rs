//! Classifier lifecycle: train from stored samples, persist, load.
//!
//! The artifact and the label mapping are written as a pair. The artifact
//! records the fingerprint of the mapping it was fitted with, and a load whose
//! two files disagree is refused.

use crate::events::{EventBus, RollEvent};
use crate::labels::LabelMapping;
use crate::lbph::{ClassifierError, FaceClassifier, Label, LbphClassifier, CANONICAL_SIZE};
use crate::store::{Store, StoreError};
use image::imageops::FilterType;
use image::GrayImage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ARTIFACT_FILE: &str = "classifier.lbph";
pub const MAPPING_FILE: &str = "labels.json";

/// Artifact header: magic, then the 64 hex digits of the mapping fingerprint.
const ENVELOPE_MAGIC: &[u8; 9] = b"ROLLCALL1";
const FINGERPRINT_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("no decodable face samples to train on")]
    NoData,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("encoding label mapping: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("persisting model: {0}")]
    Persist(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model files not found in {0}")]
    NotFound(String),
    #[error("reading model: {0}")]
    Io(#[from] std::io::Error),
    #[error("label mapping unreadable: {0}")]
    Mapping(#[from] serde_json::Error),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("artifact was trained against a different label mapping")]
    MappingMismatch,
    #[error("artifact header is malformed")]
    BadHeader,
}

/// Where the artifact and mapping live.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub artifact: PathBuf,
    pub mapping: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            artifact: dir.join(ARTIFACT_FILE),
            mapping: dir.join(MAPPING_FILE),
        }
    }
}

/// A classifier together with the mapping it was trained against.
pub struct TrainedModel {
    pub classifier: Box<dyn FaceClassifier>,
    pub mapping: LabelMapping,
}

/// Summary of a successful training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingReport {
    pub subjects: usize,
    pub samples: usize,
    pub skipped: usize,
}

/// Decode an encoded face image to the canonical 100×100 grayscale sample.
pub fn decode_sample(bytes: &[u8]) -> Option<GrayImage> {
    if bytes.is_empty() {
        return None;
    }
    let img = image::load_from_memory(bytes).ok()?;
    Some(canonicalize(&img.to_luma8()))
}

pub fn canonicalize(gray: &GrayImage) -> GrayImage {
    image::imageops::resize(gray, CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
}

/// Fit a fresh classifier on every stored sample and persist it with its mapping.
///
/// On [`TrainingError::NoData`] nothing is written, so whatever model was
/// active before stays valid.
pub fn train(
    store: &dyn Store,
    paths: &ModelPaths,
    events: &EventBus,
) -> Result<(TrainedModel, TrainingReport), TrainingError> {
    let sets = store.training_samples()?;
    let mapping = LabelMapping::build(sets.iter().map(|s| s.key.as_str()));

    let mut samples: Vec<GrayImage> = Vec::new();
    let mut labels: Vec<Label> = Vec::new();
    let mut skipped = 0usize;
    for set in &sets {
        let Some(label) = mapping.label_of(&set.key) else {
            continue;
        };
        for (i, bytes) in set.samples.iter().enumerate() {
            match decode_sample(bytes) {
                Some(sample) => {
                    samples.push(sample);
                    labels.push(label);
                }
                None => {
                    skipped += 1;
                    tracing::warn!(key = %set.key, sample = i + 1, "undecodable face sample skipped");
                }
            }
        }
    }

    if samples.is_empty() {
        tracing::warn!(subjects = sets.len(), skipped, "training aborted: no usable samples");
        return Err(TrainingError::NoData);
    }

    let mut classifier = LbphClassifier::new();
    classifier.train(&samples, &labels)?;
    persist(&classifier, &mapping, paths)?;

    let report = TrainingReport {
        subjects: mapping.len(),
        samples: samples.len(),
        skipped,
    };
    tracing::info!(
        subjects = report.subjects,
        samples = report.samples,
        skipped = report.skipped,
        "classifier trained"
    );
    events.publish(RollEvent::ModelTrained {
        subjects: report.subjects,
        samples: report.samples,
    });

    Ok((
        TrainedModel {
            classifier: Box::new(classifier),
            mapping,
        },
        report,
    ))
}

/// Load the persisted pair. Any failure means "no model".
pub fn load(paths: &ModelPaths) -> Result<TrainedModel, LoadError> {
    if !paths.artifact.exists() || !paths.mapping.exists() {
        let dir = paths
            .artifact
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        return Err(LoadError::NotFound(dir));
    }
    let mapping: LabelMapping = serde_json::from_slice(&fs::read(&paths.mapping)?)?;
    let artifact = fs::read(&paths.artifact)?;
    let (fingerprint, payload) = split_envelope(&artifact).ok_or(LoadError::BadHeader)?;
    if fingerprint != mapping.fingerprint().as_bytes() {
        tracing::warn!(
            artifact = %paths.artifact.display(),
            mapping = %paths.mapping.display(),
            "classifier artifact does not match label mapping"
        );
        return Err(LoadError::MappingMismatch);
    }
    let classifier = LbphClassifier::from_bytes(payload)?;
    tracing::info!(subjects = mapping.len(), samples = classifier.len(), "classifier loaded");
    Ok(TrainedModel {
        classifier: Box::new(classifier),
        mapping,
    })
}

/// Write artifact and mapping both-or-neither.
///
/// Both are first written to temporary siblings. Only when both succeed are
/// the live files swapped in; if the second swap fails the first is rolled
/// back from its backup.
fn persist(classifier: &dyn FaceClassifier, mapping: &LabelMapping, paths: &ModelPaths) -> Result<(), TrainingError> {
    let payload = classifier.to_bytes()?;
    let mut artifact_bytes = Vec::with_capacity(ENVELOPE_MAGIC.len() + FINGERPRINT_LEN + payload.len());
    artifact_bytes.extend_from_slice(ENVELOPE_MAGIC);
    artifact_bytes.extend_from_slice(mapping.fingerprint().as_bytes());
    artifact_bytes.extend_from_slice(&payload);
    let mapping_bytes = serde_json::to_vec_pretty(mapping)?;

    let artifact_tmp = sibling(&paths.artifact, "tmp");
    let mapping_tmp = sibling(&paths.mapping, "tmp");
    let staged = write_synced(&artifact_tmp, &artifact_bytes).and_then(|_| write_synced(&mapping_tmp, &mapping_bytes));
    if let Err(e) = staged {
        let _ = fs::remove_file(&artifact_tmp);
        let _ = fs::remove_file(&mapping_tmp);
        return Err(e.into());
    }

    let artifact_bak = sibling(&paths.artifact, "bak");
    let had_artifact = paths.artifact.exists();
    if had_artifact {
        if let Err(e) = fs::rename(&paths.artifact, &artifact_bak) {
            let _ = fs::remove_file(&artifact_tmp);
            let _ = fs::remove_file(&mapping_tmp);
            return Err(e.into());
        }
    }
    if let Err(e) = fs::rename(&artifact_tmp, &paths.artifact) {
        if had_artifact {
            let _ = fs::rename(&artifact_bak, &paths.artifact);
        }
        let _ = fs::remove_file(&mapping_tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&mapping_tmp, &paths.mapping) {
        let _ = fs::remove_file(&paths.artifact);
        if had_artifact {
            let _ = fs::rename(&artifact_bak, &paths.artifact);
        }
        let _ = fs::remove_file(&mapping_tmp);
        return Err(e.into());
    }
    if had_artifact {
        let _ = fs::remove_file(&artifact_bak);
    }
    Ok(())
}

fn split_envelope(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let rest = bytes.strip_prefix(ENVELOPE_MAGIC.as_slice())?;
    (rest.len() >= FINGERPRINT_LEN).then(|| rest.split_at(FINGERPRINT_LEN))
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{FaceSamples, SubjectProfile, SubjectSummary};
    use image::{DynamicImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png(seed: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(120, 120, |x, y| Luma([((x * (3 + seed) + y * (5 + seed)) % 251) as u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn subject(key: &str, samples: [Vec<u8>; 5]) -> SubjectProfile {
        SubjectProfile {
            summary: SubjectSummary {
                key: key.into(),
                name: key.into(),
                gender: String::new(),
                class: "K1".into(),
                score: None,
            },
            representative: png(0),
            samples: FaceSamples(samples),
        }
    }

    fn good(seed: u32) -> [Vec<u8>; 5] {
        std::array::from_fn(|i| png(seed * 10 + i as u32))
    }

    fn garbage() -> [Vec<u8>; 5] {
        std::array::from_fn(|_| b"garbage".to_vec())
    }

    #[test]
    fn test_train_assigns_labels_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV002", good(1))).unwrap();
        store.insert_subject(&subject("SV001", good(2))).unwrap();

        let (model, report) = train(&store, &paths, &EventBus::new()).unwrap();
        assert_eq!(report, TrainingReport { subjects: 2, samples: 10, skipped: 0 });
        assert_eq!(model.mapping.label_of("SV002"), Some(1));
        assert_eq!(model.mapping.label_of("SV001"), Some(2));

        let loaded = load(&paths).unwrap();
        assert_eq!(loaded.mapping, model.mapping);
        let probe = decode_sample(&png(20)).unwrap();
        let p = loaded.classifier.predict(&probe).unwrap();
        assert_eq!(loaded.mapping.resolve(p.label), Some("SV001"));
        assert!(p.distance < 1e-4);
    }

    #[test]
    fn test_undecodable_samples_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut mixed = good(1);
        mixed[2] = b"corrupt".to_vec();
        mixed[4] = Vec::new();
        store.insert_subject(&subject("SV001", mixed)).unwrap();

        let (_, report) = train(&store, &ModelPaths::in_dir(dir.path()), &EventBus::new()).unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_no_data_leaves_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV001", good(1))).unwrap();
        train(&store, &paths, &EventBus::new()).unwrap();
        let before_artifact = fs::read(&paths.artifact).unwrap();
        let before_mapping = fs::read(&paths.mapping).unwrap();

        let broken = MemoryStore::default();
        broken.insert_subject(&subject("SV009", garbage())).unwrap();
        assert!(matches!(train(&broken, &paths, &EventBus::new()), Err(TrainingError::NoData)));

        assert_eq!(fs::read(&paths.artifact).unwrap(), before_artifact);
        assert_eq!(fs::read(&paths.mapping).unwrap(), before_mapping);
        assert!(load(&paths).is_ok());
    }

    #[test]
    fn test_empty_store_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let result = train(&MemoryStore::default(), &ModelPaths::in_dir(dir.path()), &EventBus::new());
        assert!(matches!(result, Err(TrainingError::NoData)));
        assert!(!dir.path().join(ARTIFACT_FILE).exists());
    }

    #[test]
    fn test_failed_mapping_swap_restores_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV001", good(1))).unwrap();
        train(&store, &paths, &EventBus::new()).unwrap();
        let before_artifact = fs::read(&paths.artifact).unwrap();

        // A non-empty directory where the mapping lives makes the final rename fail.
        fs::remove_file(&paths.mapping).unwrap();
        fs::create_dir(&paths.mapping).unwrap();
        fs::write(paths.mapping.join("keep"), b"x").unwrap();

        store.insert_subject(&subject("SV002", good(2))).unwrap();
        let result = train(&store, &paths, &EventBus::new());
        assert!(matches!(result, Err(TrainingError::Persist(_))));

        assert_eq!(fs::read(&paths.artifact).unwrap(), before_artifact);
        let leftovers: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp") || n.ends_with(".bak"))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(&ModelPaths::in_dir(dir.path())), Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_load_rejects_mismatched_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV001", good(1))).unwrap();
        train(&store, &paths, &EventBus::new()).unwrap();

        let other = LabelMapping::build(["SV001", "SV777"]);
        fs::write(&paths.mapping, serde_json::to_vec(&other).unwrap()).unwrap();
        assert!(matches!(load(&paths), Err(LoadError::MappingMismatch)));
    }

    #[test]
    fn test_load_rejects_foreign_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        fs::write(&paths.mapping, br#"{"1":"SV001"}"#).unwrap();
        fs::write(&paths.artifact, b"%YAML opencv model").unwrap();
        assert!(matches!(load(&paths), Err(LoadError::BadHeader)));
    }

    #[test]
    fn test_train_publishes_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV001", good(1))).unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        train(&store, &ModelPaths::in_dir(dir.path()), &bus).unwrap();
        assert_eq!(rx.try_recv().unwrap(), RollEvent::ModelTrained { subjects: 1, samples: 5 });
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        store.insert_subject(&subject("SV001", good(1))).unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        train(&store, &paths, &EventBus::new()).unwrap();
        train(&store, &paths, &EventBus::new()).unwrap();
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![ARTIFACT_FILE.to_string(), MAPPING_FILE.to_string()]);
    }
}
