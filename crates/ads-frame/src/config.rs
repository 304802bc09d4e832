//! Frame runtime tunables
//!
//! Durations are written in milliseconds in JSON (`ping_timeout_ms`, ...).
//! Missing keys take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ads_core::Threshold;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Pings sent to a child frame before registration gives up.
    pub registration_attempts: u32,
    #[serde(rename = "registration_delay_ms", with = "millis")]
    pub registration_delay: Duration,
    #[serde(rename = "ping_timeout_ms", with = "millis")]
    pub ping_timeout: Duration,
    /// Timeout for `startScreen`, `childrenDoneLoading` and `captureFillGraphic`.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    #[serde(rename = "load_timeout_ms", with = "millis")]
    pub load_timeout: Duration,
    /// Quiet period after the last scroll before a screenshot is taken.
    #[serde(rename = "scroll_wait_time_ms", with = "millis")]
    pub scroll_wait_time: Duration,
    pub screenshot_attempts: u32,
    pub capture_threshold: Threshold,
    /// Maximum size distance, in pixels, for a fill graphic match.
    pub fill_graphic_tolerance: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            registration_attempts: 5,
            registration_delay: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(5),
            scroll_wait_time: Duration::from_millis(500),
            screenshot_attempts: 10,
            capture_threshold: Threshold::default(),
            fill_graphic_tolerance: 5.0,
        }
    }
}

impl FrameConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn registration_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.registration_attempts, self.registration_delay)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
