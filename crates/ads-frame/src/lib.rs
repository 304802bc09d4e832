//! Ad Screening Frame Runtime
//!
//! Runs in every document of a page. Each document gets one [`Frame`] that
//! screens its elements, registers the frames nested in it, and talks to
//! parent and child frames over a correlated request/response protocol.
//!
//! # Modules
//!
//! - `dom`: host traits for elements, documents, transport and background
//! - `protocol`: cross-frame envelope and request/response payloads
//! - `frame`: request table, message dispatch and child registration
//! - `screen`: element discovery and screening
//! - `element`: per-element snapshot, verdict and markers
//! - `capture`: capture target selection and capture strategies
//! - `retry`: bounded retry and timeout combinators
//! - `config`: runtime tunables
//! - `mock`: in-memory host for tests (feature `mock`)

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod capture;
pub mod config;
pub mod dom;
pub mod element;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod retry;
pub mod screen;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use capture::{find_best_capture_target, CaptureOutcome, GRAPHIC_TAGS};
pub use config::FrameConfig;
pub use dom::{Background, ContextHandle, Document, DomElement, ElementRef, LoadOutcome, Transport};
pub use element::{AdElement, ScreenState, FRAME_ID_ATTR, LOCAL_ID_ATTR};
pub use error::{FrameError, Result};
pub use frame::{Frame, FrameChild, FrameHost, FrameSlot, RegistrationState};
pub use protocol::{Envelope, Request, RequestId, RequestKind, Response};
pub use retry::{retry, with_timeout, Exhausted, RetryPolicy};
pub use screen::{ScreenOutcome, ELEMENT_TAGS};

/// A poisoned lock only means another task panicked mid-update; the
/// guarded data stays usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
