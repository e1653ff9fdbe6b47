use crate::store::error::StoreError;

/// Errors from fleet-wide operations. These are the failures the request
/// layer reports back to the operator as client errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    /// A reset was requested while the ECC servers disagree on their state
    InconsistentFleet,
    /// A fleet transition was refused because something it needs is not
    /// in place yet
    PrerequisiteFailed(String),
    AlreadyRunning,
    NotRunning,
    Store(StoreError),
}

impl From<StoreError> for FleetError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::AlreadyRunning => Self::AlreadyRunning,
            StoreError::NotRunning => Self::NotRunning,
            other => Self::Store(other),
        }
    }
}

impl std::fmt::Display for FleetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InconsistentFleet => write!(
                f,
                "Cannot reset while the ECC servers are in inconsistent states!"
            ),
            Self::PrerequisiteFailed(msg) => write!(f, "{msg}"),
            Self::AlreadyRunning => {
                write!(f, "Stop the current run before starting a new one!")
            }
            Self::NotRunning => write!(f, "No run is being recorded!"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FleetError {}
