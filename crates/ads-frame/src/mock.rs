//! In-memory DOM, message bus and background
//!
//! Drives frames outside a browser. Element geometry, load behaviour and
//! graphic data are set up front; the bus delivers messages between frames
//! attached to it on the tokio runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::BoxStream;
use serde_json::Value;

use ads_core::{
    AdSnapshot, CaptureError, CaptureReport, ClassificationError, ClassifyResponse, DomError, Rect,
    ScreenshotArea, ScreenshotResponse, Size,
};

use crate::dom::{Background, ContextHandle, Document, DomElement, ElementRef, LoadOutcome, Transport};
use crate::frame::{Frame, FrameHost};
use crate::lock;

const VOID_TAGS: &[&str] = &["img", "input", "embed", "source", "track", "param", "br", "hr"];

// =============================================================================
// Elements
// =============================================================================

/// How an element behaves when waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockLoad {
    Complete,
    /// Loaded, but the content is cross-origin.
    Opaque,
    /// Never finishes loading.
    Never,
    Failed(String),
}

#[derive(Debug)]
pub struct MockElement {
    tag: String,
    attributes: Mutex<Vec<(String, String)>>,
    classes: Mutex<Vec<String>>,
    children: Mutex<Vec<ElementRef>>,
    rect: Mutex<Rect>,
    context: Option<ContextHandle>,
    load: MockLoad,
    graphic: Option<String>,
}

impl MockElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: Mutex::new(Vec::new()),
            classes: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            rect: Mutex::new(Rect::default()),
            context: None,
            load: MockLoad::Complete,
            graphic: None,
        }
    }

    pub fn with_attr(self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_class(self, class: &str) -> Self {
        self.add_class(class);
        self
    }

    pub fn with_child(self, child: Arc<MockElement>) -> Self {
        lock(&self.children).push(child);
        self
    }

    pub fn with_rect(self, rect: Rect) -> Self {
        *lock(&self.rect) = rect;
        self
    }

    /// Place the element at the viewport origin with the given size.
    pub fn with_size(self, width: f64, height: f64) -> Self {
        self.with_rect(Rect::new(0.0, 0.0, width, height))
    }

    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_load(mut self, load: MockLoad) -> Self {
        self.load = load;
        self
    }

    /// Data URL returned when the element is encoded. Without it encoding
    /// fails as for a tainted canvas.
    pub fn with_graphic(mut self, data_url: &str) -> Self {
        self.graphic = Some(data_url.to_string());
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_rect(&self, rect: Rect) {
        *lock(&self.rect) = rect;
    }

    pub fn append_child(&self, child: ElementRef) {
        lock(&self.children).push(child);
    }

    pub fn classes(&self) -> Vec<String> {
        lock(&self.classes).clone()
    }
}

impl DomElement for MockElement {
    fn local_name(&self) -> String {
        self.tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        if name == "class" {
            let classes = lock(&self.classes);
            return (!classes.is_empty()).then(|| classes.join(" "));
        }
        lock(&self.attributes)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    fn set_attribute(&self, name: &str, value: &str) {
        if name == "class" {
            *lock(&self.classes) = value.split_whitespace().map(str::to_string).collect();
            return;
        }
        let mut attributes = lock(&self.attributes);
        match attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
    }

    fn add_class(&self, class: &str) {
        let mut classes = lock(&self.classes);
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    fn remove_class(&self, class: &str) {
        lock(&self.classes).retain(|c| c != class);
    }

    fn has_class(&self, class: &str) -> bool {
        lock(&self.classes).iter().any(|c| c == class)
    }

    fn children(&self) -> Vec<ElementRef> {
        lock(&self.children).clone()
    }

    fn outer_html(&self) -> String {
        let mut html = format!("<{}", self.tag);
        for (name, value) in lock(&self.attributes).iter() {
            let _ = write!(html, " {}=\"{}\"", name, value.replace('"', "&quot;"));
        }
        if let Some(classes) = self.attribute("class") {
            let _ = write!(html, " class=\"{}\"", classes);
        }
        html.push('>');

        if VOID_TAGS.contains(&self.tag.as_str()) {
            return html;
        }
        for child in self.children() {
            html.push_str(&child.outer_html());
        }
        let _ = write!(html, "</{}>", self.tag);
        html
    }

    fn bounding_rect(&self) -> Rect {
        *lock(&self.rect)
    }

    fn content_context(&self) -> Option<ContextHandle> {
        self.context.clone()
    }

    fn wait_until_loaded(&self) -> BoxFuture<'static, Result<LoadOutcome, DomError>> {
        match self.load.clone() {
            MockLoad::Complete => future::ready(Ok(LoadOutcome::Loaded)).boxed(),
            MockLoad::Opaque => future::ready(Ok(LoadOutcome::Opaque)).boxed(),
            MockLoad::Never => future::pending().boxed(),
            MockLoad::Failed(reason) => future::ready(Err(DomError::LoadFailed(reason))).boxed(),
        }
    }

    fn encode_graphic(&self) -> BoxFuture<'static, Result<String, CaptureError>> {
        let encoded = self
            .graphic
            .clone()
            .ok_or_else(|| CaptureError::Encode(format!("<{}> cannot be read", self.tag)));
        future::ready(encoded).boxed()
    }
}

// =============================================================================
// Document
// =============================================================================

pub struct MockDocument {
    url: String,
    is_top: bool,
    roots: Mutex<Vec<ElementRef>>,
    viewport: Mutex<Size>,
    device_pixel_ratio: f64,
    observers: Mutex<Vec<mpsc::UnboundedSender<ElementRef>>>,
}

impl MockDocument {
    pub fn new(url: &str, is_top: bool) -> Self {
        Self {
            url: url.to_string(),
            is_top,
            roots: Mutex::new(Vec::new()),
            viewport: Mutex::new(Size::new(1280.0, 800.0)),
            device_pixel_ratio: 1.0,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Add content without notifying observers.
    pub fn append(&self, element: ElementRef) {
        lock(&self.roots).push(element);
    }

    /// Add content and notify observers, as a script inserting it would.
    pub fn insert(&self, element: ElementRef) {
        self.append(Arc::clone(&element));
        lock(&self.observers).retain(|observer| observer.unbounded_send(Arc::clone(&element)).is_ok());
    }

    pub fn set_viewport(&self, size: Size) {
        *lock(&self.viewport) = size;
    }
}

impl Document for MockDocument {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn is_top(&self) -> bool {
        self.is_top
    }

    fn elements_by_tag(&self, tags: &[&str]) -> Vec<ElementRef> {
        let mut found = Vec::new();
        for root in lock(&self.roots).iter() {
            if root.is_one_of(tags) {
                found.push(Arc::clone(root));
            }
            found.extend(root.descendants().into_iter().filter(|e| e.is_one_of(tags)));
        }
        found
    }

    fn mutations(&self) -> BoxStream<'static, ElementRef> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.observers).push(tx);
        Box::pin(rx)
    }

    fn viewport(&self) -> Size {
        *lock(&self.viewport)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }
}

// =============================================================================
// Message bus
// =============================================================================

/// In-process transport between frames.
///
/// Messages to unknown or severed contexts vanish, like a post to a closed
/// or cross-origin window that never answers.
#[derive(Default)]
pub struct LocalBus {
    frames: Mutex<HashMap<ContextHandle, Weak<Frame>>>,
    severed: Mutex<HashSet<ContextHandle>>,
    delays: Mutex<HashMap<ContextHandle, Duration>>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, frame: &Arc<Frame>) {
        lock(&self.frames).insert(frame.context().clone(), Arc::downgrade(frame));
    }

    pub fn sever(&self, context: &ContextHandle) {
        lock(&self.severed).insert(context.clone());
    }

    /// Delay every delivery to `context`.
    pub fn delay(&self, context: &ContextHandle, by: Duration) {
        lock(&self.delays).insert(context.clone(), by);
    }
}

impl Transport for LocalBus {
    fn post_message(&self, source: &ContextHandle, target: &ContextHandle, message: Value) {
        if lock(&self.severed).contains(target) {
            log::trace!("dropping message to severed {}", target);
            return;
        }
        let Some(frame) = lock(&self.frames).get(target).and_then(Weak::upgrade) else {
            log::trace!("no frame at {}", target);
            return;
        };
        let delay = lock(&self.delays).get(target).copied();

        let source = source.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            frame.on_message(source, &message);
        });
    }
}

// =============================================================================
// Background
// =============================================================================

type Classifier = dyn Fn(&AdSnapshot) -> Result<ClassifyResponse, ClassificationError> + Send + Sync;

/// Background double that records what frames send it.
pub struct MockBackground {
    classifier: Box<Classifier>,
    classified: Mutex<Vec<AdSnapshot>>,
    reports: Mutex<Vec<(AdSnapshot, CaptureReport)>>,
    screenshots: Mutex<Vec<ScreenshotArea>>,
    screenshot_results: Mutex<VecDeque<bool>>,
}

impl MockBackground {
    pub fn new<F>(classifier: F) -> Arc<Self>
    where
        F: Fn(&AdSnapshot) -> Result<ClassifyResponse, ClassificationError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            classifier: Box::new(classifier),
            classified: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            screenshots: Mutex::new(Vec::new()),
            screenshot_results: Mutex::new(VecDeque::new()),
        })
    }

    pub fn always(is_ad: bool) -> Arc<Self> {
        Self::new(move |_| Ok(ClassifyResponse::verdict(is_ad)))
    }

    /// Queue results for upcoming screenshot requests. Once the queue is
    /// empty every screenshot succeeds.
    pub fn queue_screenshots(&self, results: &[bool]) {
        lock(&self.screenshot_results).extend(results.iter().copied());
    }

    pub fn classified(&self) -> Vec<AdSnapshot> {
        lock(&self.classified).clone()
    }

    pub fn reports(&self) -> Vec<(AdSnapshot, CaptureReport)> {
        lock(&self.reports).clone()
    }

    pub fn screenshots(&self) -> Vec<ScreenshotArea> {
        lock(&self.screenshots).clone()
    }
}

impl Background for MockBackground {
    fn classify(&self, snapshot: AdSnapshot) -> BoxFuture<'static, Result<ClassifyResponse, ClassificationError>> {
        let verdict = (self.classifier)(&snapshot);
        lock(&self.classified).push(snapshot);
        future::ready(verdict).boxed()
    }

    fn report_capture(&self, snapshot: &AdSnapshot, report: CaptureReport) {
        lock(&self.reports).push((snapshot.clone(), report));
    }

    fn request_screenshot(
        &self,
        _snapshot: &AdSnapshot,
        area: ScreenshotArea,
    ) -> BoxFuture<'static, Result<ScreenshotResponse, CaptureError>> {
        lock(&self.screenshots).push(area);
        let captured = lock(&self.screenshot_results).pop_front().unwrap_or(true);
        future::ready(Ok(ScreenshotResponse { captured })).boxed()
    }
}

/// Wire a document, bus and background into a frame host.
pub fn host(document: Arc<MockDocument>, bus: Arc<LocalBus>, background: Arc<MockBackground>) -> FrameHost {
    FrameHost {
        document,
        transport: bus,
        background,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_html() {
        let object = MockElement::new("object")
            .with_attr("data", "https://ads.net/a.swf")
            .with_class("promo")
            .with_child(MockElement::new("param").with_attr("name", "movie").build())
            .build();

        assert_eq!(
            object.outer_html(),
            r#"<object data="https://ads.net/a.swf" class="promo"><param name="movie"></object>"#
        );
    }

    #[test]
    fn test_elements_by_tag_in_document_order() {
        let document = MockDocument::new("https://example.com/", true).build();
        let inner = MockElement::new("img").with_attr("id", "inner").build();
        document.append(MockElement::new("div").with_child(inner).build());
        document.append(MockElement::new("img").with_attr("id", "outer").build());

        let ids: Vec<_> = document
            .elements_by_tag(&["img"])
            .iter()
            .filter_map(|e| e.attribute("id"))
            .collect();
        assert_eq!(ids, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn test_insert_notifies_observers() {
        use futures::StreamExt;

        let document = MockDocument::new("https://example.com/", true).build();
        let mut mutations = document.mutations();
        document.insert(MockElement::new("iframe").build());

        let inserted = mutations.next().await.unwrap();
        assert_eq!(inserted.local_name(), "iframe");
    }
}
