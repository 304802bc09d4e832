//! Per-document frame: cross-frame requests and the child registry
//!
//! A [`Frame`] owns the pending-request table for its document, answers
//! requests from other frames, and registers the frames nested inside it.
//! Registration is driven by the parent: it pings the child's window, marks
//! the frame element with the child's id, then confirms with `setRegistered`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use ads_core::{ProtocolError, RegistrationError};

use crate::config::FrameConfig;
use crate::dom::{same_element, Background, ContextHandle, Document, ElementRef, Transport};
use crate::element::FRAME_ID_ATTR;
use crate::error::Result;
use crate::lock;
use crate::protocol::{Envelope, Request, RequestId, Response};
use crate::retry::{retry, with_timeout};

pub const FRAME_TAGS: &[&str] = &["iframe", "frame"];

/// Collaborators a frame talks to.
#[derive(Clone)]
pub struct FrameHost {
    pub document: Arc<dyn Document>,
    pub transport: Arc<dyn Transport>,
    pub background: Arc<dyn Background>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// Pinged by the parent, not yet confirmed.
    Pinging,
    Registered,
}

/// A frame element seen by this frame, with the child's id once registered.
#[derive(Debug, Clone)]
pub struct FrameChild {
    pub element: ElementRef,
    pub frame_id: Option<String>,
}

pub struct Frame {
    id: String,
    context: ContextHandle,
    host: FrameHost,
    config: FrameConfig,
    state: Mutex<RegistrationState>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Envelope>>>,
    children: Mutex<Vec<FrameChild>>,
    claims: Mutex<()>,
    pub(crate) safe_to_screen: AtomicBool,
    pub(crate) screening_started: AtomicBool,
    scroll: watch::Sender<Option<Instant>>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &self.registration_state())
            .finish_non_exhaustive()
    }
}

impl Frame {
    pub fn new(context: ContextHandle, host: FrameHost, config: FrameConfig) -> Arc<Self> {
        let state = if host.document.is_top() {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        };
        let (scroll, _) = watch::channel(None);

        let frame = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            context,
            host,
            config,
            state: Mutex::new(state),
            pending: Mutex::new(HashMap::new()),
            children: Mutex::new(Vec::new()),
            claims: Mutex::new(()),
            safe_to_screen: AtomicBool::new(false),
            screening_started: AtomicBool::new(false),
            scroll,
        });
        log::debug!("{} created in {}", frame.id, frame.host.document.url());
        frame
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn document(&self) -> &dyn Document {
        self.host.document.as_ref()
    }

    pub fn background(&self) -> &dyn Background {
        self.host.background.as_ref()
    }

    pub fn registration_state(&self) -> RegistrationState {
        *lock(&self.state)
    }

    pub fn is_registered(&self) -> bool {
        self.registration_state() == RegistrationState::Registered
    }

    pub fn is_safe_to_screen(&self) -> bool {
        self.safe_to_screen.load(Ordering::SeqCst)
    }

    pub fn children(&self) -> Vec<FrameChild> {
        lock(&self.children).clone()
    }

    /// Registered children that can be addressed.
    pub fn registered_children(&self) -> Vec<(String, ContextHandle)> {
        lock(&self.children)
            .iter()
            .filter_map(|child| {
                let frame_id = child.frame_id.clone()?;
                let context = child.element.content_context()?;
                Some((frame_id, context))
            })
            .collect()
    }

    /// Windows of every frame element in this document, registered or not.
    /// Frames screened as ads are never asked to register their own
    /// children, so requests that walk a subtree address windows directly.
    pub fn nested_contexts(&self) -> Vec<ContextHandle> {
        self.host
            .document
            .elements_by_tag(FRAME_TAGS)
            .iter()
            .filter_map(|element| element.content_context())
            .collect()
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    // =========================================================================
    // Scroll tracking
    // =========================================================================

    /// Record a scroll or resize of this frame's window.
    pub fn on_scroll(&self) {
        self.scroll.send_replace(Some(Instant::now()));
    }

    pub fn last_scroll(&self) -> Option<Instant> {
        *self.scroll.borrow()
    }

    pub(crate) fn scroll_events(&self) -> watch::Receiver<Option<Instant>> {
        self.scroll.subscribe()
    }

    /// Mark `element` as taken for screening. False if it already was.
    pub(crate) fn claim(&self, element: &ElementRef, local_id: &str) -> bool {
        use crate::element::LOCAL_ID_ATTR;

        let _guard = lock(&self.claims);
        if element.attribute(LOCAL_ID_ATTR).is_some() {
            return false;
        }
        element.set_attribute(LOCAL_ID_ATTR, local_id);
        true
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send `request` to `target` and wait for the correlated response.
    ///
    /// With a timeout, expiry yields [`FrameError::Timeout`] and a later
    /// response is dropped.
    pub async fn request_window(
        &self,
        target: &ContextHandle,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let kind = request.kind();
        let request_id = RequestId::generate();
        let envelope = Envelope::request(request_id.clone(), &self.id, &request);

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);

        log::trace!("{} sending {} ({}) to {}", self.id, kind, request_id, target);
        self.host
            .transport
            .post_message(&self.context, target, envelope.to_value());

        let received = with_timeout(kind.as_str(), timeout, rx).await;
        lock(&self.pending).remove(&request_id);

        let response = received?
            .map_err(|_| ProtocolError::Remote(format!("request {request_id} was abandoned")))?;
        Ok(response.to_response(kind)?)
    }

    /// Probe `target` and return the id it reports.
    pub async fn ping(&self, target: &ContextHandle, timeout: Duration) -> Result<String> {
        match self.request_window(target, Request::Ping, Some(timeout)).await? {
            Response::Pong { frame_id } => Ok(frame_id),
            other => Err(ProtocolError::Mismatch {
                expected: "ping".to_string(),
                got: other.kind().to_string(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Incoming messages
    // =========================================================================

    /// Entry point for every message posted to this frame's window.
    pub fn on_message(self: &Arc<Self>, source: ContextHandle, message: &Value) {
        let envelope = match Envelope::decode(message) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                log::warn!("{} rejected message from {}: {}", self.id, source, e);
                return;
            }
        };

        if envelope.is_request {
            self.on_request(source, envelope);
        } else {
            self.on_response(envelope);
        }
    }

    fn on_request(self: &Arc<Self>, source: ContextHandle, envelope: Envelope) {
        let request = match envelope.to_request() {
            Ok(request) => request,
            Err(e) => {
                log::warn!("{} rejected {} request from {}: {}", self.id, envelope.kind, source, e);
                self.respond(&source, &envelope, Err(e.to_string()));
                return;
            }
        };

        let frame = Arc::clone(self);
        tokio::spawn(async move {
            let result = frame.handle_request(request).await.map_err(|e| e.to_string());
            frame.respond(&source, &envelope, result);
        });
    }

    fn on_response(&self, envelope: Envelope) {
        let sender = lock(&self.pending).remove(&envelope.request_id);
        match sender {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    log::debug!("{} requester went away before the response", self.id);
                }
            }
            None => log::debug!(
                "{} has no pending request {} ({})",
                self.id,
                envelope.request_id,
                envelope.kind
            ),
        }
    }

    fn respond(&self, target: &ContextHandle, request: &Envelope, result: std::result::Result<Response, String>) {
        let envelope = Envelope::response(request, &self.id, result);
        self.host
            .transport
            .post_message(&self.context, target, envelope.to_value());
    }

    async fn handle_request(self: &Arc<Self>, request: Request) -> Result<Response> {
        match request {
            Request::Ping => {
                let mut state = lock(&self.state);
                if *state == RegistrationState::Unregistered {
                    *state = RegistrationState::Pinging;
                }
                Ok(Response::Pong {
                    frame_id: self.id.clone(),
                })
            }
            Request::SetRegistered { frame_id } => {
                if frame_id != self.id {
                    return Err(RegistrationError::Refused(format!(
                        "registration for {} sent to {}",
                        frame_id, self.id
                    ))
                    .into());
                }
                *lock(&self.state) = RegistrationState::Registered;
                log::debug!("{} registered with parent", self.id);
                Ok(Response::Registered { registered: true })
            }
            Request::StartScreen { top_url } => {
                let top_url = top_url.unwrap_or_else(|| self.host.document.url());
                let frame = Arc::clone(self);
                tokio::spawn(async move {
                    frame.screen_all(top_url).await;
                });
                Ok(Response::ScreenStarted)
            }
            Request::ChildrenDoneLoading => Ok(Response::ChildrenLoaded {
                done: self.children_done_loading().await,
            }),
            Request::CaptureFillGraphic { size, ad } => Ok(Response::FillGraphic {
                captured: self.capture_fill_graphic(size, &ad).await,
            }),
        }
    }

    // =========================================================================
    // Child registry
    // =========================================================================

    fn record_child(&self, element: &ElementRef, frame_id: Option<String>) {
        let mut children = lock(&self.children);
        match children.iter_mut().find(|child| same_element(&child.element, element)) {
            Some(child) => {
                if frame_id.is_some() {
                    child.frame_id = frame_id;
                }
            }
            None => children.push(FrameChild {
                element: Arc::clone(element),
                frame_id,
            }),
        }
    }

    /// Register the frame behind `element` as a child of this frame.
    ///
    /// An element already carrying a frame id marker is registered without
    /// contacting the child.
    pub async fn register_child(&self, element: &ElementRef) -> std::result::Result<String, RegistrationError> {
        if let Some(frame_id) = element.attribute(FRAME_ID_ATTR) {
            log::debug!("{} already registered as a child of {}", frame_id, self.id);
            self.record_child(element, Some(frame_id.clone()));
            return Ok(frame_id);
        }

        let context = element.content_context().ok_or(RegistrationError::NoContext)?;
        self.record_child(element, None);

        let ping_timeout = self.config.ping_timeout;
        let target = &context;
        let frame_id = retry(self.config.registration_policy(), |_| self.ping(target, ping_timeout))
            .await
            .map_err(|exhausted| RegistrationError::Exhausted {
                attempts: exhausted.attempts,
            })?;

        let confirmed = self
            .request_window(
                &context,
                Request::SetRegistered {
                    frame_id: frame_id.clone(),
                },
                Some(self.config.request_timeout),
            )
            .await;
        match confirmed {
            Ok(Response::Registered { registered: true }) => {}
            Ok(_) => return Err(RegistrationError::Refused(format!("{frame_id} declined registration"))),
            Err(e) => return Err(RegistrationError::Refused(e.to_string())),
        }

        element.set_attribute(FRAME_ID_ATTR, &frame_id);
        self.record_child(element, Some(frame_id.clone()));
        log::debug!("{} registered child {}", self.id, frame_id);
        Ok(frame_id)
    }

    /// Whether every nested frame has loaded, asking each child window about
    /// its own subtree. A window that never answers has nothing more to wait
    /// for beyond its own load.
    pub async fn children_done_loading(&self) -> bool {
        let load_timeout = Some(self.config.load_timeout);

        for element in self.host.document.elements_by_tag(FRAME_TAGS) {
            match with_timeout("frame load", load_timeout, element.wait_until_loaded()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    log::debug!("{} child frame failed to load: {}", self.id, e);
                    return false;
                }
                Err(e) => {
                    log::debug!("{}: {}", self.id, e);
                    return false;
                }
            }

            let Some(context) = element.content_context() else {
                continue;
            };

            let answer = self
                .request_window(&context, Request::ChildrenDoneLoading, Some(self.config.request_timeout))
                .await;
            match answer {
                Ok(Response::ChildrenLoaded { done: true }) => {}
                Ok(_) => return false,
                Err(e) => log::debug!("{} could not ask {} about loading: {}", self.id, context, e),
            }
        }

        true
    }

    /// Start screening. Only the top frame starts on its own; nested frames
    /// wait for `startScreen` from their parent.
    pub async fn start(self: &Arc<Self>) -> Vec<crate::screen::ScreenOutcome> {
        if !self.host.document.is_top() {
            log::debug!("{} waiting for parent to start screening", self.id);
            return Vec::new();
        }
        self.screen_all(self.host.document.url()).await
    }
}

/// Holds the one frame of a document. Re-injection reuses it.
#[derive(Debug, Default)]
pub struct FrameSlot(OnceLock<Arc<Frame>>);

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<F>(&self, create: F) -> Arc<Frame>
    where
        F: FnOnce() -> Arc<Frame>,
    {
        Arc::clone(self.0.get_or_init(create))
    }

    pub fn get(&self) -> Option<Arc<Frame>> {
        self.0.get().cloned()
    }
}
