use crate::ecc::error::EccError;
use crate::remote::error::RemoteError;
use crate::store::error::StoreError;

/// Failure of one dispatched task body
#[derive(Debug)]
pub enum TaskError {
    /// The soft deadline fired and the body was interrupted
    SoftTimeLimit(&'static str),
    Ecc(EccError),
    Remote(RemoteError),
    Store(StoreError),
}

impl From<EccError> for TaskError {
    fn from(value: EccError) -> Self {
        Self::Ecc(value)
    }
}

impl From<RemoteError> for TaskError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<StoreError> for TaskError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoftTimeLimit(task) => {
                write!(f, "Task {task} was cut off by its soft time limit")
            }
            Self::Ecc(e) => write!(f, "{e}"),
            Self::Remote(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TaskError {}
