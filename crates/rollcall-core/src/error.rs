use thiserror::Error;

/// A precondition failed before anything was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("subject key is empty")]
    EmptyKey,
    #[error("{0} is empty")]
    MissingField(&'static str),
    #[error("subject key already exists: {0}")]
    DuplicateKey(String),
    #[error("no such subject: {0}")]
    UnknownSubject(String),
    #[error("no representative image chosen")]
    MissingRepresentative,
    #[error("representative image unreadable: {0}")]
    UnreadableRepresentative(String),
    #[error("exactly {required} face samples are required, {captured} captured")]
    IncompleteSamples { captured: usize, required: usize },
    #[error("invalid search input: {0}")]
    BadSearch(String),
}
