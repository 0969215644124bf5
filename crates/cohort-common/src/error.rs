use thiserror::Error;

/// Failure to build a merged specification from a role and its cluster.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("{origin} parameters must be a JSON object, found {found}")]
    NotAnObject {
        origin: &'static str,
        found: &'static str,
    },
}
