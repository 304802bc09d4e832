//! Host DOM abstraction
//!
//! The runtime never touches a concrete DOM. A host (browser bindings, a
//! headless engine, or the in-memory [`mock`](crate::mock) DOM) implements
//! these traits.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use ads_core::{AdSnapshot, CaptureError, CaptureReport, ClassificationError, ClassifyResponse};
use ads_core::{DomError, Rect, ScreenshotArea, ScreenshotResponse, Size};

/// Opaque address of a browsing context (a window) for message passing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextHandle(pub String);

impl ContextHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of waiting for an element's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The content exists but cannot be inspected (cross-origin frame).
    Opaque,
}

pub type ElementRef = Arc<dyn DomElement>;

/// One element of a host document.
pub trait DomElement: Send + Sync + fmt::Debug {
    /// Lowercase tag name.
    fn local_name(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;
    fn set_attribute(&self, name: &str, value: &str);

    fn add_class(&self, class: &str);
    fn remove_class(&self, class: &str);
    fn has_class(&self, class: &str) -> bool;

    /// Element children in document order.
    fn children(&self) -> Vec<ElementRef>;

    fn outer_html(&self) -> String;

    /// Border box relative to the owning document's viewport.
    fn bounding_rect(&self) -> Rect;

    /// Browsing context of a frame element's content window.
    fn content_context(&self) -> Option<ContextHandle>;

    /// Resolve once the element's content has loaded.
    fn wait_until_loaded(&self) -> BoxFuture<'static, Result<LoadOutcome, DomError>>;

    /// Encode an `img` or `canvas` as a data URL.
    fn encode_graphic(&self) -> BoxFuture<'static, Result<String, CaptureError>>;

    fn descendants(&self) -> Vec<ElementRef> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementRef> = self.children().into_iter().rev().collect();
        while let Some(element) = stack.pop() {
            stack.extend(element.children().into_iter().rev());
            out.push(element);
        }
        out
    }

    fn is_one_of(&self, tags: &[&str]) -> bool {
        let name = self.local_name();
        tags.iter().any(|tag| name.eq_ignore_ascii_case(tag))
    }
}

/// The document a frame runs in.
pub trait Document: Send + Sync {
    fn url(&self) -> String;

    /// True for the top-level browsing context.
    fn is_top(&self) -> bool;

    /// All elements with one of `tags`, in document order.
    fn elements_by_tag(&self, tags: &[&str]) -> Vec<ElementRef>;

    /// Elements inserted from now on. Delivery order is unspecified and an
    /// element may be delivered more than once.
    fn mutations(&self) -> BoxStream<'static, ElementRef>;

    fn viewport(&self) -> Size;

    fn device_pixel_ratio(&self) -> f64;
}

/// Cross-context message primitive. Delivery is asynchronous and may silently
/// fail.
pub trait Transport: Send + Sync {
    fn post_message(&self, source: &ContextHandle, target: &ContextHandle, message: serde_json::Value);
}

/// Privileged background process.
pub trait Background: Send + Sync {
    fn classify(&self, snapshot: AdSnapshot) -> BoxFuture<'static, Result<ClassifyResponse, ClassificationError>>;

    /// Fire and forget.
    fn report_capture(&self, snapshot: &AdSnapshot, report: CaptureReport);

    /// Visible-tab capture of `area`, in device pixels.
    fn request_screenshot(
        &self,
        snapshot: &AdSnapshot,
        area: ScreenshotArea,
    ) -> BoxFuture<'static, Result<ScreenshotResponse, CaptureError>>;
}

/// Compare element identity.
pub fn same_element(a: &ElementRef, b: &ElementRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
