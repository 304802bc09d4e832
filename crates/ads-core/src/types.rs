//! Core type definitions for ad screening
//!
//! These types travel between the content frames and the background
//! classifier, so they all carry serde derives with the camelCase field
//! names the extension host uses.

use serde::{Deserialize, Serialize};

// =============================================================================
// Media Types
// =============================================================================

/// Kind of element being screened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[serde(alias = "IMAGE")]
    Image,
    #[serde(alias = "MEDIA")]
    Media,
    #[serde(alias = "SUBDOCUMENT")]
    Subdocument,
    #[serde(alias = "OBJECT")]
    Object,
}

impl MediaType {
    /// Map an element's local name to the media type it is screened as.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "img" | "input" | "picture" => Some(Self::Image),
            "audio" | "video" => Some(Self::Media),
            "frame" | "iframe" => Some(Self::Subdocument),
            "object" | "embed" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Media => "media",
            Self::Subdocument => "subdocument",
            Self::Object => "object",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "media" => Some(Self::Media),
            "subdocument" => Some(Self::Subdocument),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

// =============================================================================
// Rule Type Options (bit mask for $image, $object, ...)
// =============================================================================

bitflags::bitflags! {
    /// Request type options a URL rule may constrain itself to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeMask: u8 {
        const SCRIPT = 1 << 0;
        const IMAGE = 1 << 1;
        const STYLESHEET = 1 << 2;
        const OBJECT = 1 << 3;
        const OBJECT_SUBREQUEST = 1 << 4;
        const SUBDOCUMENT = 1 << 5;

        /// All recognised types
        const ALL = 0x3F;
    }
}

impl TypeMask {
    /// Parse a filter option name (without `~`).
    pub fn from_option(name: &str) -> Option<Self> {
        match name {
            "script" => Some(Self::SCRIPT),
            "image" => Some(Self::IMAGE),
            "stylesheet" => Some(Self::STYLESHEET),
            "object" => Some(Self::OBJECT),
            "object-subrequest" => Some(Self::OBJECT_SUBREQUEST),
            "subdocument" => Some(Self::SUBDOCUMENT),
            _ => None,
        }
    }

    /// The option bit a media type is checked against. Media types without a
    /// counterpart (audio/video) are never filtered by type options.
    pub fn for_media(media_type: MediaType) -> Option<Self> {
        match media_type {
            MediaType::Image => Some(Self::IMAGE),
            MediaType::Object => Some(Self::OBJECT),
            MediaType::Subdocument => Some(Self::SUBDOCUMENT),
            MediaType::Media => None,
        }
    }

    /// Whether a rule carrying this mask applies to `media_type`.
    #[inline]
    pub fn includes(self, media_type: MediaType) -> bool {
        match Self::for_media(media_type) {
            Some(bit) => self.contains(bit),
            None => true,
        }
    }
}

// =============================================================================
// Party Masks
// =============================================================================

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        /// Matches first-party requests
        const FIRST_PARTY = 1 << 0;
        /// Matches third-party requests
        const THIRD_PARTY = 1 << 1;
        /// Matches both
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

impl PartyMask {
    #[inline]
    pub fn allows(self, is_third_party: bool) -> bool {
        if is_third_party {
            self.contains(Self::THIRD_PARTY)
        } else {
            self.contains(Self::FIRST_PARTY)
        }
    }
}

// =============================================================================
// Ad Snapshot (classification input)
// =============================================================================

/// Immutable description of one screened element, captured once when the
/// element is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdSnapshot {
    pub local_id: String,
    pub top_url: String,
    pub html: String,
    pub media_type: MediaType,
    #[serde(default, alias = "adUrls", alias = "urls")]
    pub candidate_urls: Vec<String>,
}

/// Reply on the classification channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResponse {
    pub is_ad: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassifyResponse {
    pub fn verdict(is_ad: bool) -> Self {
        Self { is_ad, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            is_ad: false,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Capture Payloads
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    Image,
    Screenshot,
}

/// Visual evidence for a confirmed ad, reported outward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    #[serde(rename = "type")]
    pub capture_type: CaptureType,
    /// Encoded image (a data URL for local captures).
    pub payload: String,
}

/// One captured ad as sent on the capture-report channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCapture {
    pub ad: AdSnapshot,
    pub capture: CaptureReport,
}

/// Viewport area handed to the background for a visible-tab capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotArea {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenshotResponse {
    pub captured: bool,
}

// =============================================================================
// Geometry
// =============================================================================

/// Capture target acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Maximum `|area(candidate) - area(container)| / area(container)`.
    pub ratio: f64,
    /// Minimum candidate area in square pixels.
    pub area: f64,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            ratio: 0.5,
            area: 512.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Euclidean distance between two sizes.
    pub fn distance(&self, other: &Size) -> f64 {
        let dw = self.width - other.width;
        let dh = self.height - other.height;
        (dw * dw + dh * dh).sqrt()
    }
}

/// Axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right() <= self.right()
            && other.top >= self.top
            && other.bottom() <= self.bottom()
    }

    pub fn to_screenshot_area(&self, scale: f64) -> ScreenshotArea {
        ScreenshotArea {
            top: self.top * scale,
            left: self.left * scale,
            width: self.width * scale,
            height: self.height * scale,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_tag() {
        assert_eq!(MediaType::from_tag("IMG"), Some(MediaType::Image));
        assert_eq!(MediaType::from_tag("video"), Some(MediaType::Media));
        assert_eq!(MediaType::from_tag("iframe"), Some(MediaType::Subdocument));
        assert_eq!(MediaType::from_tag("embed"), Some(MediaType::Object));
        assert_eq!(MediaType::from_tag("div"), None);
    }

    #[test]
    fn test_type_mask_ignores_media() {
        let mask = TypeMask::SCRIPT;
        assert!(!mask.includes(MediaType::Image));
        assert!(mask.includes(MediaType::Media));
        assert!(TypeMask::ALL.includes(MediaType::Subdocument));
    }

    #[test]
    fn test_party_mask() {
        assert!(PartyMask::ALL.allows(true));
        assert!(PartyMask::ALL.allows(false));
        assert!(!PartyMask::THIRD_PARTY.allows(false));
        assert!(!PartyMask::FIRST_PARTY.allows(true));
    }

    #[test]
    fn test_snapshot_accepts_legacy_field_names() {
        let json = r#"{"localId":"a","topUrl":"http://x.com/","html":"<img>","mediaType":"IMAGE","adUrls":["http://y.com/a.png"]}"#;
        let snapshot: AdSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.media_type, MediaType::Image);
        assert_eq!(snapshot.candidate_urls, vec!["http://y.com/a.png".to_string()]);
    }

    #[test]
    fn test_rect_contains() {
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
        assert!(viewport.contains(&Rect::new(10.0, 10.0, 300.0, 250.0)));
        assert!(!viewport.contains(&Rect::new(500.0, 10.0, 300.0, 250.0)));
    }

    #[test]
    fn test_size_distance() {
        let a = Size::new(300.0, 250.0);
        let b = Size::new(303.0, 254.0);
        assert_eq!(a.distance(&b), 5.0);
    }
}
