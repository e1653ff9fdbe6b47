use super::entities::Key;

/// Errors surfaced by the row store and the run lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    MissingEntity(&'static str, Key),
    DuplicateName(&'static str, String),
    AlreadyRunning,
    NotRunning,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEntity(entity, key) => {
                write!(f, "No {entity} with key {key} exists in the store!")
            }
            Self::DuplicateName(entity, name) => {
                write!(f, "A {entity} named {name} already exists!")
            }
            Self::AlreadyRunning => {
                write!(f, "Stop the current run before starting a new one!")
            }
            Self::NotRunning => write!(f, "No run is being recorded!"),
        }
    }
}

impl std::error::Error for StoreError {}
