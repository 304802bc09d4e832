//! Ad Screening Core Library
//!
//! Types shared by the background classifier (`ads-filter`) and the per-frame
//! content runtime (`ads-frame`). Everything that crosses a context boundary
//! lives here so both sides agree on the wire shape.
//!
//! # Modules
//!
//! - `types`: media types, rule option masks, snapshots and capture payloads
//! - `error`: error taxonomy shared by every crate
//! - `url`: allocation-free URL slicing plus relative resolution
//! - `domain`: registrable-domain approximation and third-party checks

pub mod domain;
pub mod error;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use domain::{is_third_party, registrable_domain};
pub use error::{
    CaptureError, ClassificationError, DomError, FatalError, ParseError, ProtocolError,
    RegistrationError, TimeoutError,
};
pub use types::{
    AdCapture, AdSnapshot, CaptureReport, CaptureType, ClassifyResponse, MediaType, PartyMask, Rect,
    ScreenshotArea, ScreenshotResponse, Size, Threshold, TypeMask,
};
