use crate::store::entities::{BadStateValue, EccState};
use crate::store::error::StoreError;

/// A transition request that the state machine cannot satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    NoTransitionNeeded(EccState),
    NonAdjacentStates(EccState, EccState),
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTransitionNeeded(state) => {
                write!(f, "Already at the {state} state, no transition needed!")
            }
            Self::NonAdjacentStates(current, target) => write!(
                f,
                "Can only transition one step at a time, not {current} to {target}!"
            ),
        }
    }
}

impl std::error::Error for TransitionError {}

/// Everything that can go wrong talking to or about an ECC server
#[derive(Debug)]
pub enum EccError {
    /// SOAP/connection level failure
    Transport(reqwest::Error),
    /// The remote returned a non-zero ErrorCode; carries its ErrorMessage
    Remote(String),
    /// The ECC server has no selected config set
    NoConfigSelected(String),
    /// A data source of this ECC server has no data router to link
    NoDataRouter(String),
    Transition(TransitionError),
    MalformedXml(String),
    UnknownConfigType(String),
    FailedXmlParse(quick_xml::Error),
    FailedXmlAttr(quick_xml::events::attributes::AttrError),
    FailedXmlUtf8(std::string::FromUtf8Error),
    InvalidStringToInt(std::num::ParseIntError),
    BadState(BadStateValue),
    MissingReplyField(&'static str),
    Store(StoreError),
}

impl From<reqwest::Error> for EccError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<TransitionError> for EccError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<quick_xml::Error> for EccError {
    fn from(value: quick_xml::Error) -> Self {
        Self::FailedXmlParse(value)
    }
}

impl From<quick_xml::events::attributes::AttrError> for EccError {
    fn from(value: quick_xml::events::attributes::AttrError) -> Self {
        Self::FailedXmlAttr(value)
    }
}

impl From<std::string::FromUtf8Error> for EccError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::FailedXmlUtf8(value)
    }
}

impl From<std::num::ParseIntError> for EccError {
    fn from(value: std::num::ParseIntError) -> Self {
        Self::InvalidStringToInt(value)
    }
}

impl From<BadStateValue> for EccError {
    fn from(value: BadStateValue) -> Self {
        Self::BadState(value)
    }
}

impl From<StoreError> for EccError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl std::fmt::Display for EccError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Request to the ECC server failed: {e}"),
            Self::Remote(msg) => write!(f, "ECC server returned an error: {msg}"),
            Self::NoConfigSelected(name) => {
                write!(f, "ECC server {name} has no config associated with it!")
            }
            Self::NoDataRouter(name) => {
                write!(f, "Data source {name} has no data router associated with it!")
            }
            Self::Transition(e) => write!(f, "{e}"),
            Self::MalformedXml(msg) => write!(f, "Could not understand XML payload: {msg}"),
            Self::UnknownConfigType(kind) => {
                write!(f, "Unknown or missing config type: {kind}")
            }
            Self::FailedXmlParse(e) => write!(f, "Failed to parse XML body: {e}"),
            Self::FailedXmlAttr(e) => write!(f, "Failed to parse XML attribute: {e}"),
            Self::FailedXmlUtf8(e) => write!(f, "Failed to convert XML to String: {e}"),
            Self::InvalidStringToInt(e) => {
                write!(f, "Failed to parse string to integer: {e}")
            }
            Self::BadState(e) => write!(f, "{e}"),
            Self::MissingReplyField(field) => {
                write!(f, "ECC reply did not contain the {field} field!")
            }
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EccError {}
