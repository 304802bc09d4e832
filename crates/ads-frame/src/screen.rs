//! Screening coordinator
//!
//! Discovery has two feeds: a sweep of the elements present when screening
//! starts, and the document's mutation stream for elements inserted later.
//! The mutation stream is subscribed before the sweep so nothing inserted in
//! between is missed; elements it delivers are only screened once the sweep
//! has been dispatched (`safe_to_screen`). Each element is claimed through its
//! local id marker, so an element seen by both feeds is screened once.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;

use ads_core::{CaptureError, MediaType};

use crate::capture::{capture, CaptureOutcome};
use crate::dom::ElementRef;
use crate::element::AdElement;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::protocol::Request;

/// Tags of elements that are screened.
pub const ELEMENT_TAGS: &[&str] = &["img", "picture", "audio", "video", "frame", "iframe", "object", "embed"];

/// What happened to one discovered element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenOutcome {
    /// Already claimed, or not a screenable tag.
    Skipped,
    NotAd,
    Captured(CaptureOutcome),
    /// An ad whose capture target is below the minimum area.
    TooSmall,
    /// An ad that could not be captured; it is not retried.
    Discarded,
}

impl Frame {
    /// Screen every candidate element of this frame, then keep screening
    /// inserted elements for the life of the frame.
    ///
    /// Returns the outcomes of the initial sweep. Calling it again is a no-op.
    pub async fn screen_all(self: &Arc<Self>, top_url: String) -> Vec<ScreenOutcome> {
        if self.screening_started.swap(true, Ordering::SeqCst) {
            log::debug!("{} is already screening", self.id());
            return Vec::new();
        }
        log::info!("{} screening {} (top {})", self.id(), self.document().url(), top_url);

        let mutations = self.document().mutations();
        let sweep = self.document().elements_by_tag(ELEMENT_TAGS);
        let pending: Vec<_> = sweep
            .into_iter()
            .map(|element| self.screen_element(element, &top_url))
            .collect();

        self.safe_to_screen.store(true, Ordering::SeqCst);

        let frame = Arc::downgrade(self);
        let observed_top_url = top_url.clone();
        tokio::spawn(async move {
            let mut mutations = mutations;
            while let Some(inserted) = mutations.next().await {
                let Some(frame) = frame.upgrade() else {
                    break;
                };
                if !frame.is_safe_to_screen() {
                    continue;
                }

                let mut candidates = vec![Arc::clone(&inserted)];
                candidates.extend(inserted.descendants());
                for element in candidates.into_iter().filter(|e| e.is_one_of(ELEMENT_TAGS)) {
                    let frame = Arc::clone(&frame);
                    let top_url = observed_top_url.clone();
                    tokio::spawn(async move {
                        frame.screen_element(element, &top_url).await;
                    });
                }
            }
            log::trace!("mutation stream ended");
        });

        join_all(pending).await
    }

    /// Screen one element: classify it, capture it if it is an ad, or hand a
    /// non-ad frame over to its own screening pass.
    pub async fn screen_element(self: &Arc<Self>, element: ElementRef, top_url: &str) -> ScreenOutcome {
        let Some(mut ad) = AdElement::new(element, top_url, &self.document().url()) else {
            return ScreenOutcome::Skipped;
        };
        if !self.claim(ad.element(), ad.local_id()) {
            log::trace!("{} skipping already screened <{}>", self.id(), ad.element().local_name());
            return ScreenOutcome::Skipped;
        }

        let is_ad = match ad.screen(self.background()).await {
            Ok(is_ad) => is_ad,
            Err(e) => {
                log::error!("{} could not screen {}: {}", self.id(), ad.local_id(), e);
                return ScreenOutcome::Skipped;
            }
        };

        if !is_ad {
            if ad.media_type() == MediaType::Subdocument {
                self.screen_child_frame(ad.element(), top_url).await;
            }
            return ScreenOutcome::NotAd;
        }

        match capture(self, &mut ad).await {
            Ok(outcome) => {
                ad.mark_recorded();
                log::info!("{} captured ad {} ({:?})", self.id(), ad.local_id(), outcome);
                ScreenOutcome::Captured(outcome)
            }
            Err(FrameError::Capture(CaptureError::TooSmall { minimum })) => {
                log::debug!("{} ad {} is smaller than {}px", self.id(), ad.local_id(), minimum);
                ScreenOutcome::TooSmall
            }
            Err(e) => {
                log::warn!("{} could not capture ad {}: {}", self.id(), ad.local_id(), e);
                ScreenOutcome::Discarded
            }
        }
    }

    /// Register the frame behind `element` and tell it to start screening.
    async fn screen_child_frame(&self, element: &ElementRef, top_url: &str) {
        let frame_id = match self.register_child(element).await {
            Ok(frame_id) => frame_id,
            Err(e) => {
                log::warn!("{} left a child frame unscreened: {}", self.id(), e);
                return;
            }
        };
        let Some(context) = element.content_context() else {
            return;
        };

        let request = Request::StartScreen {
            top_url: Some(top_url.to_string()),
        };
        match self
            .request_window(&context, request, Some(self.config().request_timeout))
            .await
        {
            Ok(_) => log::debug!("{} started screening in child {}", self.id(), frame_id),
            Err(e) => log::warn!("{} could not start screening in child {}: {}", self.id(), frame_id, e),
        }
    }
}
