//! The transition graph of the getEccSoapServer state machine. The
//! machine is linear, Idle through Running, and every legal request moves
//! it exactly one step.
use super::error::TransitionError;
use crate::store::entities::EccState;

const DESCRIBE_OP: &str = "Describe";
const PREPARE_OP: &str = "Prepare";
const CONFIGURE_OP: &str = "Configure";
const START_OP: &str = "Start";
const UNDO_OP: &str = "Undo";
const BREAKUP_OP: &str = "Breakup";
const STOP_OP: &str = "Stop";

/// One of the seven transition operations of the SOAP service. The
/// Display impl gives the exact operation name on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccOperation {
    Describe,
    Prepare,
    Configure,
    Start,
    Undo,
    Breakup,
    Stop,
}

impl std::fmt::Display for EccOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Describe => write!(f, "{DESCRIBE_OP}"),
            Self::Prepare => write!(f, "{PREPARE_OP}"),
            Self::Configure => write!(f, "{CONFIGURE_OP}"),
            Self::Start => write!(f, "{START_OP}"),
            Self::Undo => write!(f, "{UNDO_OP}"),
            Self::Breakup => write!(f, "{BREAKUP_OP}"),
            Self::Stop => write!(f, "{STOP_OP}"),
        }
    }
}

impl From<EccOperation> for String {
    fn from(value: EccOperation) -> String {
        value.to_string()
    }
}

/// Look up the operation that takes the machine from `current` to
/// `target`. Fails if no step is needed or if the states are not
/// adjacent; fleet-level pseudo-targets like reset must be resolved to a
/// concrete adjacent state before calling this.
pub fn compute_transition(
    current: EccState,
    target: EccState,
) -> Result<EccOperation, TransitionError> {
    use EccState::*;
    if current == target {
        return Err(TransitionError::NoTransitionNeeded(current));
    }
    match (current, target) {
        (Idle, Described) => Ok(EccOperation::Describe),
        (Described, Idle) => Ok(EccOperation::Undo),
        (Described, Prepared) => Ok(EccOperation::Prepare),
        (Prepared, Described) => Ok(EccOperation::Undo),
        (Prepared, Ready) => Ok(EccOperation::Configure),
        (Ready, Prepared) => Ok(EccOperation::Breakup),
        (Ready, Running) => Ok(EccOperation::Start),
        (Running, Ready) => Ok(EccOperation::Stop),
        _ => Err(TransitionError::NonAdjacentStates(current, target)),
    }
}
