//! Screenable element wrapper
//!
//! An [`AdElement`] is created once per candidate element. It takes the
//! snapshot sent for classification, remembers the verdict and keeps the
//! element's marker classes in sync with its state.

use ads_core::url::{has_foreign_scheme, resolve};
use ads_core::{AdSnapshot, ClassificationError, ClassifyResponse, MediaType};

use crate::dom::{Background, DomElement, ElementRef};
use crate::error::{FrameError, Result};

/// Attribute carrying an element's local id once it is screened.
pub const LOCAL_ID_ATTR: &str = "data-adscreen-local-id";
/// Attribute carrying a registered child frame's id on its frame element.
pub const FRAME_ID_ATTR: &str = "data-adscreen-frame-id";

pub const CLASS_IN_PROGRESS: &str = "adscreen-screen-inprogress";
pub const CLASS_DONE: &str = "adscreen-screen-done";
pub const CLASS_NOT_AD: &str = "adscreen-notad";
pub const CLASS_IS_AD: &str = "adscreen-isad";
pub const CLASS_RECORDED: &str = "adscreen-recorded";
pub const CLASS_NOT_RECORDED: &str = "adscreen-notrecorded";

const ALL_CLASSES: [&str; 6] = [
    CLASS_IN_PROGRESS,
    CLASS_DONE,
    CLASS_NOT_AD,
    CLASS_IS_AD,
    CLASS_RECORDED,
    CLASS_NOT_RECORDED,
];

/// `<param>` names that carry an object's source.
const OBJECT_PARAMS: [&str; 4] = ["movie", "source", "src", "FileName"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    None,
    Started,
    Done,
}

#[derive(Debug)]
pub struct AdElement {
    element: ElementRef,
    snapshot: AdSnapshot,
    state: ScreenState,
    is_ad: bool,
    recorded: bool,
    screenshot_active: bool,
}

impl AdElement {
    /// Wrap `element`. `None` for tags that are never screened.
    pub fn new(element: ElementRef, top_url: &str, base_url: &str) -> Option<Self> {
        let media_type = MediaType::from_tag(&element.local_name())?;
        let snapshot = AdSnapshot {
            local_id: uuid::Uuid::new_v4().to_string(),
            top_url: top_url.to_string(),
            html: element.outer_html(),
            media_type,
            candidate_urls: urls_from_element(element.as_ref(), base_url),
        };

        Some(Self {
            element,
            snapshot,
            state: ScreenState::None,
            is_ad: false,
            recorded: false,
            screenshot_active: false,
        })
    }

    pub fn element(&self) -> &ElementRef {
        &self.element
    }

    pub fn snapshot(&self) -> &AdSnapshot {
        &self.snapshot
    }

    pub fn local_id(&self) -> &str {
        &self.snapshot.local_id
    }

    pub fn media_type(&self) -> MediaType {
        self.snapshot.media_type
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn is_ad(&self) -> bool {
        self.is_ad
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    /// Classify the element through the background.
    ///
    /// Fails open: a classification error is logged and the element counts
    /// as not an ad. Screening an element twice is an error.
    pub async fn screen(&mut self, background: &dyn Background) -> Result<bool> {
        if self.state != ScreenState::None {
            return Err(FrameError::AlreadyScreened(self.snapshot.local_id.clone()));
        }

        self.element.set_attribute(LOCAL_ID_ATTR, &self.snapshot.local_id);
        self.state = ScreenState::Started;
        self.apply_markers();

        self.is_ad = match background.classify(self.snapshot.clone()).await {
            Ok(ClassifyResponse { is_ad, error: None }) => is_ad,
            Ok(ClassifyResponse { error: Some(reason), .. }) => {
                log::error!("{}: {}", self.snapshot.local_id, ClassificationError::Rejected(reason));
                false
            }
            Err(e) => {
                log::error!("{}: {}", self.snapshot.local_id, e);
                false
            }
        };

        self.state = ScreenState::Done;
        self.apply_markers();
        log::debug!(
            "{} <{}> classified as {}",
            self.snapshot.local_id,
            self.snapshot.media_type.as_str(),
            if self.is_ad { "ad" } else { "not ad" }
        );
        Ok(self.is_ad)
    }

    pub fn mark_recorded(&mut self) {
        self.recorded = true;
        self.apply_markers();
    }

    /// While a screenshot is pending every marker class is removed so the
    /// capture shows the page as the user sees it.
    pub fn set_screenshot_active(&mut self, active: bool) {
        self.screenshot_active = active;
        self.apply_markers();
    }

    fn apply_markers(&self) {
        let element = &self.element;

        if self.screenshot_active {
            for class in ALL_CLASSES {
                element.remove_class(class);
            }
            return;
        }

        match self.state {
            ScreenState::None => return,
            ScreenState::Started => {
                element.remove_class(CLASS_DONE);
                element.add_class(CLASS_IN_PROGRESS);
                return;
            }
            ScreenState::Done => {
                element.remove_class(CLASS_IN_PROGRESS);
                element.add_class(CLASS_DONE);
            }
        }

        if self.is_ad {
            element.remove_class(CLASS_NOT_AD);
            element.add_class(CLASS_IS_AD);
            if self.recorded {
                element.remove_class(CLASS_NOT_RECORDED);
                element.add_class(CLASS_RECORDED);
            } else {
                element.remove_class(CLASS_RECORDED);
                element.add_class(CLASS_NOT_RECORDED);
            }
        } else {
            element.remove_class(CLASS_IS_AD);
            element.remove_class(CLASS_RECORDED);
            element.remove_class(CLASS_NOT_RECORDED);
            element.add_class(CLASS_NOT_AD);
        }
    }
}

// =============================================================================
// Candidate URLs
// =============================================================================

/// Source URLs of `element`, resolved against `base_url`.
///
/// Non-network schemes (`data:`, `blob:`, `javascript:`, ...) are dropped.
pub fn urls_from_element(element: &dyn DomElement, base_url: &str) -> Vec<String> {
    let raw = match element.local_name().as_str() {
        "object" => urls_from_object(element),
        "video" | "audio" | "picture" => urls_from_media(element),
        _ => urls_from_sources(element),
    };

    let mut urls: Vec<String> = Vec::with_capacity(raw.len());
    for url in raw {
        if url.is_empty() || has_foreign_scheme(&url) {
            continue;
        }
        let url = match resolve(&url, base_url) {
            Some(resolved) => resolved,
            None => url,
        };
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// `src` plus every `srcset` candidate with its descriptor stripped.
fn urls_from_sources(element: &dyn DomElement) -> Vec<String> {
    let mut urls = Vec::new();

    if let Some(src) = element.attribute("src") {
        urls.push(src.trim().to_string());
    }
    if let Some(srcset) = element.attribute("srcset") {
        urls.extend(
            srcset
                .split(',')
                .map(str::trim)
                .filter(|candidate| !candidate.is_empty())
                .map(strip_descriptor)
                .map(str::to_string),
        );
    }
    urls
}

fn strip_descriptor(candidate: &str) -> &str {
    match candidate.rsplit_once(char::is_whitespace) {
        Some((url, _)) => url.trim_end(),
        None => candidate,
    }
}

fn urls_from_media(element: &dyn DomElement) -> Vec<String> {
    let mut urls = urls_from_sources(element);

    for child in element.children() {
        if child.is_one_of(&["source", "track"]) {
            urls.extend(urls_from_sources(child.as_ref()));
        }
    }
    if let Some(poster) = element.attribute("poster") {
        urls.push(poster.trim().to_string());
    }
    urls
}

fn urls_from_object(element: &dyn DomElement) -> Vec<String> {
    if let Some(data) = element.attribute("data") {
        return vec![data.trim().to_string()];
    }

    element
        .children()
        .into_iter()
        .filter(|child| child.is_one_of(&["param"]))
        .filter(|param| {
            param
                .attribute("name")
                .is_some_and(|name| OBJECT_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(&name)))
        })
        .filter_map(|param| param.attribute("value"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .take(1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackground, MockElement};
    use ads_core::ClassificationError;

    const BASE: &str = "https://news.example.com/articles/today.html";

    #[test]
    fn test_img_urls_resolve_and_strip_descriptors() {
        let img = MockElement::new("img")
            .with_attr("src", "/banner.png")
            .with_attr("srcset", "banner-2x.png 2x, https://cdn.ads.net/b.png  640w")
            .build();

        assert_eq!(
            urls_from_element(img.as_ref(), BASE),
            vec![
                "https://news.example.com/banner.png",
                "https://news.example.com/articles/banner-2x.png",
                "https://cdn.ads.net/b.png",
            ]
        );
    }

    #[test]
    fn test_foreign_schemes_dropped() {
        let img = MockElement::new("img")
            .with_attr("src", "data:image/png;base64,AAAA")
            .build();
        assert!(urls_from_element(img.as_ref(), BASE).is_empty());
    }

    #[test]
    fn test_video_collects_sources_and_poster() {
        let video = MockElement::new("video")
            .with_attr("poster", "https://ads.net/poster.jpg")
            .with_child(MockElement::new("source").with_attr("src", "https://ads.net/clip.mp4").build())
            .with_child(MockElement::new("track").with_attr("src", "captions.vtt").build())
            .build();

        assert_eq!(
            urls_from_element(video.as_ref(), BASE),
            vec![
                "https://ads.net/clip.mp4",
                "https://news.example.com/articles/captions.vtt",
                "https://ads.net/poster.jpg",
            ]
        );
    }

    #[test]
    fn test_object_prefers_data_then_params() {
        let with_data = MockElement::new("object").with_attr("data", "https://ads.net/a.swf").build();
        assert_eq!(urls_from_element(with_data.as_ref(), BASE), vec!["https://ads.net/a.swf"]);

        let with_param = MockElement::new("object")
            .with_child(MockElement::new("param").with_attr("name", "quality").with_attr("value", "high").build())
            .with_child(MockElement::new("param").with_attr("name", "movie").with_attr("value", "https://ads.net/b.swf").build())
            .build();
        assert_eq!(urls_from_element(with_param.as_ref(), BASE), vec!["https://ads.net/b.swf"]);
    }

    #[test]
    fn test_unscreenable_tag() {
        let div = MockElement::new("div").build();
        assert!(AdElement::new(div, BASE, BASE).is_none());
    }

    #[test]
    fn test_snapshot_contents() {
        let img = MockElement::new("img").with_attr("src", "https://ads.net/x.png").build();
        let ad = AdElement::new(img, "https://top.example.com/", BASE).unwrap();

        assert_eq!(ad.snapshot().top_url, "https://top.example.com/");
        assert_eq!(ad.media_type(), MediaType::Image);
        assert_eq!(ad.snapshot().html, r#"<img src="https://ads.net/x.png">"#);
        assert_eq!(ad.state(), ScreenState::None);
    }

    #[tokio::test]
    async fn test_screen_marks_element() {
        let img = MockElement::new("img").with_attr("src", "https://ads.net/x.png").build();
        let background = MockBackground::always(true);
        let mut ad = AdElement::new(img.clone(), BASE, BASE).unwrap();

        assert!(ad.screen(background.as_ref()).await.unwrap());
        assert_eq!(ad.state(), ScreenState::Done);
        assert_eq!(img.attribute(LOCAL_ID_ATTR).as_deref(), Some(ad.local_id()));
        assert!(img.has_class(CLASS_DONE));
        assert!(img.has_class(CLASS_IS_AD));
        assert!(img.has_class(CLASS_NOT_RECORDED));
        assert!(!img.has_class(CLASS_IN_PROGRESS));

        ad.mark_recorded();
        assert!(img.has_class(CLASS_RECORDED));
        assert!(!img.has_class(CLASS_NOT_RECORDED));
    }

    #[tokio::test]
    async fn test_screen_twice_is_error() {
        let img = MockElement::new("img").build();
        let background = MockBackground::always(false);
        let mut ad = AdElement::new(img, BASE, BASE).unwrap();

        assert!(!ad.screen(background.as_ref()).await.unwrap());
        let err = ad.screen(background.as_ref()).await.unwrap_err();
        assert!(matches!(err, FrameError::AlreadyScreened(id) if id == ad.local_id()));
    }

    #[tokio::test]
    async fn test_classification_failure_fails_open() {
        let img = MockElement::new("img").build();
        let background = MockBackground::new(|_| Err(ClassificationError::Channel("port closed".into())));
        let mut ad = AdElement::new(img.clone(), BASE, BASE).unwrap();

        assert!(!ad.screen(background.as_ref()).await.unwrap());
        assert!(img.has_class(CLASS_NOT_AD));

        let rejected = MockBackground::new(|_| Ok(ClassifyResponse::failed("no filter")));
        let mut ad = AdElement::new(MockElement::new("img").build(), BASE, BASE).unwrap();
        assert!(!ad.screen(rejected.as_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn test_screenshot_active_hides_markers() {
        let img = MockElement::new("img").build();
        let background = MockBackground::always(true);
        let mut ad = AdElement::new(img.clone(), BASE, BASE).unwrap();
        ad.screen(background.as_ref()).await.unwrap();

        ad.set_screenshot_active(true);
        assert!(img.classes().is_empty());

        ad.set_screenshot_active(false);
        assert!(img.has_class(CLASS_IS_AD));
    }
}
