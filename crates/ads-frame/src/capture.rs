//! Ad capture
//!
//! Once an element is confirmed as an ad, the best visual target inside it
//! is chosen and captured:
//!
//! - `img`/`canvas` targets are encoded locally and reported as images.
//! - Frame targets are asked to capture a graphic of matching size
//!   themselves (`captureFillGraphic`), after their subtree has loaded.
//! - Anything else falls back to a visible-tab screenshot, retried until no
//!   scroll happened while it was taken.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use ads_core::{AdSnapshot, CaptureError, CaptureReport, CaptureType, FatalError, Rect, Size, Threshold};

use crate::dom::{ElementRef, LoadOutcome};
use crate::element::AdElement;
use crate::error::Result;
use crate::frame::{Frame, FRAME_TAGS};
use crate::protocol::{Request, Response};
use crate::retry::with_timeout;

/// Elements that can be encoded locally.
pub const GRAPHIC_TAGS: &[&str] = &["img", "canvas"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Encoded locally.
    Image,
    /// Captured by the child frame the ad lives in.
    Subframe,
    Screenshot,
}

// =============================================================================
// Target Selection
// =============================================================================

/// Choose what to capture for `element`.
///
/// An `img` or `canvas` is its own target. Otherwise the descendant graphic
/// whose area is closest to the container's wins, provided it is at least
/// `threshold.area` and within `threshold.ratio` of the container area, so a
/// container with no rendered area has no graphic target. Frames with no
/// qualifying graphic fall back to themselves.
pub fn find_best_capture_target(element: &ElementRef, threshold: &Threshold) -> Option<ElementRef> {
    if element.is_one_of(GRAPHIC_TAGS) {
        return Some(Arc::clone(element));
    }

    let container = element.bounding_rect().area();
    let candidates = element
        .descendants()
        .into_iter()
        .filter(|candidate| candidate.is_one_of(GRAPHIC_TAGS))
        .map(|candidate| {
            let area = candidate.bounding_rect().area();
            (candidate, area)
        })
        .filter(|(_, area)| *area >= threshold.area);

    // Smaller difference wins; ties keep document order.
    let mut best: Option<(ElementRef, f64)> = None;
    for (candidate, area) in candidates {
        let difference = (area - container).abs();
        if container <= 0.0 || difference / container > threshold.ratio {
            continue;
        }

        if best.as_ref().map_or(true, |(_, best_difference)| difference < *best_difference) {
            best = Some((candidate, difference));
        }
    }

    best.map(|(candidate, _)| candidate)
        .or_else(|| element.is_one_of(FRAME_TAGS).then(|| Arc::clone(element)))
}

/// The graphic whose size is closest to `size`, if any is within `tolerance`.
pub fn closest_graphic(graphics: &[ElementRef], size: Size, tolerance: f64) -> Option<&ElementRef> {
    let mut best: Option<(&ElementRef, f64)> = None;
    for graphic in graphics {
        let distance = graphic.bounding_rect().size().distance(&size);
        if distance > tolerance {
            continue;
        }
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((graphic, distance));
        }
    }
    best.map(|(graphic, _)| graphic)
}

// =============================================================================
// Capture
// =============================================================================

/// Wait until the ad's content is ready to be captured.
async fn ensure_loaded(element: &ElementRef, load_timeout: Duration) -> Result<()> {
    let tag = element.local_name();
    match tag.as_str() {
        "img" | "input" | "picture" | "iframe" | "frame" => {
            let outcome = with_timeout("load", Some(load_timeout), element.wait_until_loaded())
                .await?
                .map_err(|e| CaptureError::Load(e.to_string()))?;
            if outcome == LoadOutcome::Opaque {
                log::debug!("<{}> content is cross-origin, capturing anyway", tag);
            }
            Ok(())
        }
        "object" | "embed" => Ok(()),
        _ => Err(CaptureError::Unsupported(tag).into()),
    }
}

/// Capture the confirmed ad `ad` owned by `frame`.
pub async fn capture(frame: &Frame, ad: &mut AdElement) -> Result<CaptureOutcome> {
    let config = frame.config();
    ensure_loaded(ad.element(), config.load_timeout).await?;

    let threshold = config.capture_threshold;
    let target = find_best_capture_target(ad.element(), &threshold).ok_or(CaptureError::NoTarget)?;
    if target.bounding_rect().area() < threshold.area {
        return Err(CaptureError::TooSmall {
            minimum: threshold.area as u64,
        }
        .into());
    }

    if target.is_one_of(GRAPHIC_TAGS) {
        let payload = target.encode_graphic().await?;
        frame.background().report_capture(
            ad.snapshot(),
            CaptureReport {
                capture_type: CaptureType::Image,
                payload,
            },
        );
        return Ok(CaptureOutcome::Image);
    }

    if target.is_one_of(FRAME_TAGS) && capture_in_subframe(frame, &target, ad.snapshot()).await? {
        return Ok(CaptureOutcome::Subframe);
    }

    screenshot(frame, ad, &target).await
}

/// Ask the frame behind `target` to capture a graphic of its own size.
/// A frame element without a window cannot be captured at all.
async fn capture_in_subframe(frame: &Frame, target: &ElementRef, snapshot: &AdSnapshot) -> Result<bool> {
    let context = target
        .content_context()
        .ok_or_else(|| FatalError(format!("<{}> ad has no window", target.local_name())))?;
    let timeout = Some(frame.config().request_timeout);

    match frame.request_window(&context, Request::ChildrenDoneLoading, timeout).await {
        Ok(Response::ChildrenLoaded { done: true }) => {}
        Ok(_) => log::debug!("{} subtree of {} still loading", frame.id(), context),
        Err(e) => log::debug!("{} could not wait for {}: {}", frame.id(), context, e),
    }

    let request = Request::CaptureFillGraphic {
        size: target.bounding_rect().size(),
        ad: snapshot.clone(),
    };
    let captured = match frame.request_window(&context, request, timeout).await {
        Ok(Response::FillGraphic { captured }) => captured,
        Ok(_) => false,
        Err(e) => {
            log::debug!("{} fill graphic request to {} failed: {}", frame.id(), context, e);
            false
        }
    };
    Ok(captured)
}

impl Frame {
    /// Handle `captureFillGraphic`: encode the local graphic closest to
    /// `size`, or pass the request down to every nested frame window.
    pub async fn capture_fill_graphic(&self, size: Size, ad: &AdSnapshot) -> bool {
        let graphics = self.document().elements_by_tag(GRAPHIC_TAGS);

        if let Some(graphic) = closest_graphic(&graphics, size, self.config().fill_graphic_tolerance) {
            match graphic.encode_graphic().await {
                Ok(payload) => {
                    self.background().report_capture(
                        ad,
                        CaptureReport {
                            capture_type: CaptureType::Image,
                            payload,
                        },
                    );
                    log::debug!("{} captured fill graphic for {}", self.id(), ad.local_id);
                    return true;
                }
                Err(e) => log::warn!("{} could not encode fill graphic: {}", self.id(), e),
            }
        }

        let timeout = Some(self.config().request_timeout);
        for context in self.nested_contexts() {
            let request = Request::CaptureFillGraphic { size, ad: ad.clone() };
            match self.request_window(&context, request, timeout).await {
                Ok(Response::FillGraphic { captured: true }) => return true,
                Ok(_) => {}
                Err(e) => log::debug!("{} fill graphic request to {} failed: {}", self.id(), context, e),
            }
        }

        false
    }
}

// =============================================================================
// Screenshots
// =============================================================================

async fn screenshot(frame: &Frame, ad: &mut AdElement, target: &ElementRef) -> Result<CaptureOutcome> {
    if !frame.document().is_top() {
        return Err(CaptureError::NotTopLevel.into());
    }

    ad.set_screenshot_active(true);
    let result = screenshot_loop(frame, ad.snapshot(), target).await;
    ad.set_screenshot_active(false);
    result
}

async fn screenshot_loop(frame: &Frame, snapshot: &AdSnapshot, target: &ElementRef) -> Result<CaptureOutcome> {
    let attempts = frame.config().screenshot_attempts;
    let scale = frame.document().device_pixel_ratio();

    for attempt in 1..=attempts {
        wait_until_settled(frame, target).await;

        let requested_at = Instant::now();
        let area = target.bounding_rect().to_screenshot_area(scale);
        let response = frame.background().request_screenshot(snapshot, area).await?;

        let scrolled = frame.last_scroll().is_some_and(|at| at > requested_at);
        if response.captured && !scrolled {
            return Ok(CaptureOutcome::Screenshot);
        }
        log::debug!(
            "{} screenshot attempt {}/{} discarded (captured: {}, scrolled: {})",
            snapshot.local_id,
            attempt,
            attempts,
            response.captured,
            scrolled
        );
    }

    Err(CaptureError::Unstable(attempts).into())
}

fn in_view(frame: &Frame, target: &ElementRef) -> bool {
    let viewport = frame.document().viewport();
    Rect::new(0.0, 0.0, viewport.width, viewport.height).contains(&target.bounding_rect())
}

/// Wait until no scroll happened for the configured quiet period and the
/// target lies entirely inside the viewport.
async fn wait_until_settled(frame: &Frame, target: &ElementRef) {
    let quiet_period = frame.config().scroll_wait_time;
    let mut scrolls = frame.scroll_events();

    loop {
        if let Some(last) = frame.last_scroll() {
            let quiet_for = last.elapsed();
            if quiet_for < quiet_period {
                tokio::time::sleep(quiet_period - quiet_for).await;
                continue;
            }
        }

        if in_view(frame, target) {
            return;
        }

        log::trace!("{} waiting for target to scroll into view", frame.id());
        if scrolls.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockElement;

    fn threshold() -> Threshold {
        Threshold::default()
    }

    #[test]
    fn test_graphic_is_own_target() {
        let img: ElementRef = MockElement::new("img").with_size(10.0, 10.0).build();
        let target = find_best_capture_target(&img, &threshold()).unwrap();
        assert!(crate::dom::same_element(&target, &img));
    }

    #[test]
    fn test_closest_area_wins() {
        let big = MockElement::new("img").with_size(100.0, 90.0).build();
        let tiny = MockElement::new("img").with_size(10.0, 5.0).build();
        let container: ElementRef = MockElement::new("object")
            .with_size(100.0, 100.0)
            .with_child(tiny)
            .with_child(big.clone())
            .build();

        let target = find_best_capture_target(&container, &threshold()).unwrap();
        let big: ElementRef = big;
        assert!(crate::dom::same_element(&target, &big));
    }

    #[test]
    fn test_ratio_rejects_distant_areas() {
        let small = MockElement::new("canvas").with_size(40.0, 40.0).build();
        let container: ElementRef = MockElement::new("object")
            .with_size(100.0, 100.0)
            .with_child(small)
            .build();

        assert!(find_best_capture_target(&container, &threshold()).is_none());
    }

    #[test]
    fn test_collapsed_container_has_no_graphic_target() {
        let img = MockElement::new("img").with_size(30.0, 30.0).build();
        let container: ElementRef = MockElement::new("object")
            .with_size(0.0, 0.0)
            .with_child(img)
            .build();
        assert!(find_best_capture_target(&container, &threshold()).is_none());

        let canvas = MockElement::new("canvas").with_size(30.0, 30.0).build();
        let frame: ElementRef = MockElement::new("iframe")
            .with_size(0.0, 0.0)
            .with_child(canvas)
            .build();
        let target = find_best_capture_target(&frame, &threshold()).unwrap();
        assert!(crate::dom::same_element(&target, &frame));
    }

    #[test]
    fn test_ties_keep_document_order() {
        let first = MockElement::new("img").with_size(90.0, 100.0).build();
        let second = MockElement::new("img").with_size(100.0, 90.0).build();
        let container: ElementRef = MockElement::new("object")
            .with_size(100.0, 100.0)
            .with_child(first.clone())
            .with_child(second)
            .build();

        let target = find_best_capture_target(&container, &threshold()).unwrap();
        let first: ElementRef = first;
        assert!(crate::dom::same_element(&target, &first));
    }

    #[test]
    fn test_frame_falls_back_to_itself() {
        let frame: ElementRef = MockElement::new("iframe").with_size(300.0, 250.0).build();
        let target = find_best_capture_target(&frame, &threshold()).unwrap();
        assert!(crate::dom::same_element(&target, &frame));
    }

    #[test]
    fn test_closest_graphic_within_tolerance() {
        let graphics: Vec<ElementRef> = vec![
            MockElement::new("img").with_size(300.0, 260.0).build(),
            MockElement::new("img").with_size(302.0, 251.0).build(),
            MockElement::new("canvas").with_size(300.0, 249.0).build(),
        ];

        let best = closest_graphic(&graphics, Size::new(300.0, 250.0), 5.0).unwrap();
        assert!(crate::dom::same_element(best, &graphics[2]));
        assert!(closest_graphic(&graphics, Size::new(728.0, 90.0), 5.0).is_none());
    }
}
