//! Frame runtime errors

use ads_core::{
    CaptureError, ClassificationError, DomError, FatalError, ProtocolError, RegistrationError,
    TimeoutError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("Element {0} was already screened")]
    AlreadyScreened(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
