//! Subject lookups and edits outside enrollment.

use crate::enrollment::read_representative;
use crate::error::ValidationError;
use crate::store::{Store, StoreError};
use crate::types::{SubjectProfile, SubjectSummary, SubjectUpdate};
use std::path::PathBuf;
use thiserror::Error;

/// Longest accepted search fragment, in characters.
pub const MAX_SEARCH_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SubjectError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Requested changes to a subject's descriptive fields.
#[derive(Debug, Clone, Default)]
pub struct SubjectEdit {
    pub name: String,
    pub gender: String,
    pub class: String,
    /// New representative image; the stored one is kept when `None`.
    pub representative: Option<PathBuf>,
}

/// Trim and check a search fragment. Empty input is allowed and lists everyone.
pub fn validate_search(fragment: &str) -> Result<&str, ValidationError> {
    let fragment = fragment.trim();
    if fragment.chars().count() > MAX_SEARCH_LEN {
        return Err(ValidationError::BadSearch(format!("longer than {MAX_SEARCH_LEN} characters")));
    }
    if fragment.chars().any(char::is_control) {
        return Err(ValidationError::BadSearch("contains control characters".into()));
    }
    Ok(fragment)
}

pub fn search(store: &dyn Store, fragment: &str) -> Result<Vec<SubjectSummary>, SubjectError> {
    let fragment = validate_search(fragment)?;
    if fragment.is_empty() {
        return Ok(store.subjects()?);
    }
    Ok(store.search_subjects(fragment)?)
}

pub fn roster(store: &dyn Store, class: &str) -> Result<Vec<SubjectSummary>, SubjectError> {
    let class = class.trim();
    if class.is_empty() {
        return Err(ValidationError::MissingField("class").into());
    }
    Ok(store.class_roster(class)?)
}

pub fn profile(store: &dyn Store, key: &str) -> Result<SubjectProfile, SubjectError> {
    let key = key.trim();
    store
        .subject(key)?
        .ok_or_else(|| ValidationError::UnknownSubject(key.to_string()).into())
}

/// Apply `edit` to the subject `key`. Name and class must stay non-empty.
pub fn edit_subject(store: &dyn Store, key: &str, edit: &SubjectEdit) -> Result<(), SubjectError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }
    if edit.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name").into());
    }
    if edit.class.trim().is_empty() {
        return Err(ValidationError::MissingField("class").into());
    }
    let representative = edit.representative.as_deref().map(read_representative).transpose()?;

    let update = SubjectUpdate {
        key: key.to_string(),
        name: edit.name.trim().to_string(),
        gender: edit.gender.trim().to_string(),
        class: edit.class.trim().to_string(),
        representative,
    };
    if !store.update_subject(&update)? {
        return Err(ValidationError::UnknownSubject(key.to_string()).into());
    }
    tracing::info!(key, representative_changed = update.representative.is_some(), "subject edited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::FaceSamples;
    use image::{ImageFormat, RgbImage};

    fn seeded() -> MemoryStore {
        let store = MemoryStore::default();
        for (key, class) in [("SV002", "K54"), ("SV001", "K54"), ("GV100", "K55")] {
            store
                .insert_subject(&SubjectProfile {
                    summary: SubjectSummary {
                        key: key.into(),
                        name: format!("Name {key}"),
                        gender: "F".into(),
                        class: class.into(),
                        score: None,
                    },
                    representative: vec![9],
                    samples: FaceSamples(Default::default()),
                })
                .unwrap();
        }
        store
    }

    fn keys(list: Vec<SubjectSummary>) -> Vec<String> {
        list.into_iter().map(|s| s.key).collect()
    }

    #[test]
    fn test_empty_search_lists_all() {
        let store = seeded();
        assert_eq!(search(&store, "  ").unwrap().len(), 3);
    }

    #[test]
    fn test_search_by_fragment() {
        let store = seeded();
        assert_eq!(keys(search(&store, "SV").unwrap()), vec!["SV001", "SV002"]);
        assert!(search(&store, "XYZ").unwrap().is_empty());
    }

    #[test]
    fn test_search_ignores_ascii_case() {
        let store = seeded();
        assert_eq!(keys(search(&store, "sv00").unwrap()), vec!["SV001", "SV002"]);
        assert_eq!(keys(search(&store, "gV1").unwrap()), vec!["GV100"]);
    }

    #[test]
    fn test_search_rejects_bad_input() {
        let store = seeded();
        assert!(matches!(
            search(&store, "SV\u{0}01"),
            Err(SubjectError::Validation(ValidationError::BadSearch(_)))
        ));
        let long = "x".repeat(MAX_SEARCH_LEN + 1);
        assert!(matches!(
            search(&store, &long),
            Err(SubjectError::Validation(ValidationError::BadSearch(_)))
        ));
    }

    #[test]
    fn test_roster_ordered_by_key() {
        let store = seeded();
        assert_eq!(keys(roster(&store, "K54").unwrap()), vec!["SV001", "SV002"]);
        assert!(matches!(
            roster(&store, ""),
            Err(SubjectError::Validation(ValidationError::MissingField("class")))
        ));
    }

    #[test]
    fn test_profile_unknown() {
        let store = seeded();
        assert!(matches!(
            profile(&store, "SV404"),
            Err(SubjectError::Validation(ValidationError::UnknownSubject(_)))
        ));
        assert_eq!(profile(&store, " SV001 ").unwrap().summary.key, "SV001");
    }

    #[test]
    fn test_edit_fields_keeps_representative() {
        let store = seeded();
        let edit = SubjectEdit {
            name: " New Name ".into(),
            gender: "M".into(),
            class: "K56".into(),
            representative: None,
        };
        edit_subject(&store, "SV001", &edit).unwrap();
        let p = profile(&store, "SV001").unwrap();
        assert_eq!(p.summary.name, "New Name");
        assert_eq!(p.summary.class, "K56");
        assert_eq!(p.representative, vec![9]);
    }

    #[test]
    fn test_edit_replaces_representative() {
        let store = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        RgbImage::new(8, 8).save_with_format(&path, ImageFormat::Png).unwrap();
        let edit = SubjectEdit {
            name: "A".into(),
            gender: "F".into(),
            class: "K54".into(),
            representative: Some(path.clone()),
        };
        edit_subject(&store, "SV002", &edit).unwrap();
        assert_eq!(profile(&store, "SV002").unwrap().representative, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_edit_rejects_undecodable_representative() {
        let store = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        std::fs::write(&path, b"not an image").unwrap();
        let edit = SubjectEdit {
            name: "A".into(),
            gender: "F".into(),
            class: "K54".into(),
            representative: Some(path),
        };
        assert!(matches!(
            edit_subject(&store, "SV002", &edit),
            Err(SubjectError::Validation(ValidationError::UnreadableRepresentative(_)))
        ));
        assert_eq!(profile(&store, "SV002").unwrap().summary.name, "Name SV002");
    }

    #[test]
    fn test_edit_unknown_or_blank() {
        let store = seeded();
        let edit = SubjectEdit { name: "A".into(), class: "K".into(), ..Default::default() };
        assert!(matches!(
            edit_subject(&store, "SV404", &edit),
            Err(SubjectError::Validation(ValidationError::UnknownSubject(_)))
        ));
        let blank = SubjectEdit { name: " ".into(), class: "K".into(), ..Default::default() };
        assert!(matches!(
            edit_subject(&store, "SV001", &blank),
            Err(SubjectError::Validation(ValidationError::MissingField("name")))
        ));
    }
}
