//! Background-side classification service
//!
//! Owns the process-wide filter, answers the classification channel for
//! content frames, tracks per-tab state and queues capture reports.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;

use ads_core::{AdCapture, AdSnapshot, ClassifyResponse};

use crate::filter::{Filter, LoadStats, RuleCounts};
use crate::FilterError;

pub type TabId = u32;

/// Number of queued captures handed out per drain.
pub const CAPTURE_BATCH_SIZE: usize = 10;

/// Periodic filter list refresh.
#[derive(Debug, Clone)]
pub struct ReloadConfig {
    pub list_urls: Vec<String>,
    pub reload_interval: Duration,
    /// Delay before retrying after a failed download.
    pub retry_delay: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            list_urls: Vec::new(),
            reload_interval: Duration::from_secs(4 * 24 * 60 * 60),
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// A captured ad waiting for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCapture {
    pub tab_id: TabId,
    #[serde(flatten)]
    pub record: AdCapture,
}

#[derive(Debug, Default)]
struct TabState {
    url: Option<String>,
    captured: u32,
}

#[derive(Debug, Default)]
pub struct BackgroundService {
    filter: RwLock<Filter>,
    tabs: Mutex<HashMap<TabId, TabState>>,
    captures: Mutex<VecDeque<QueuedCapture>>,
}

impl BackgroundService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter: RwLock::new(filter),
            ..Self::default()
        }
    }

    // =========================================================================
    // Filter management
    // =========================================================================

    pub fn add_rules_from_text(&self, text: &str) -> Result<LoadStats, FilterError> {
        let mut filter = self
            .filter
            .write()
            .map_err(|e| FilterError::Poisoned(e.to_string()))?;
        Ok(filter.add_rules_from_text(text))
    }

    /// Swap in a new rule set built from several list texts.
    pub fn reload_from_texts<S: AsRef<str>>(&self, texts: &[S]) -> Result<LoadStats, FilterError> {
        let mut fresh = Filter::new();
        let mut stats = LoadStats::default();
        for text in texts {
            stats.merge(&fresh.add_rules_from_text(text.as_ref()));
        }

        let mut filter = self
            .filter
            .write()
            .map_err(|e| FilterError::Poisoned(e.to_string()))?;
        *filter = fresh;
        Ok(stats)
    }

    pub fn rule_counts(&self) -> Result<RuleCounts, FilterError> {
        let filter = self
            .filter
            .read()
            .map_err(|e| FilterError::Poisoned(e.to_string()))?;
        Ok(filter.rule_counts())
    }

    // =========================================================================
    // Classification channel
    // =========================================================================

    /// Answer a classification request. The tab's last known URL replaces the
    /// snapshot's `top_url`. Failures answer "not an ad" with the error set.
    pub fn classify(&self, tab_id: Option<TabId>, mut snapshot: AdSnapshot) -> ClassifyResponse {
        if let Some(url) = tab_id.and_then(|id| self.tab_url(id)) {
            snapshot.top_url = url;
        }

        match self.filter.read() {
            Ok(filter) => ClassifyResponse::verdict(filter.classify(&snapshot)),
            Err(e) => {
                log::error!("Classification of {} failed: {}", snapshot.local_id, e);
                ClassifyResponse::failed(e.to_string())
            }
        }
    }

    // =========================================================================
    // Tab bookkeeping
    // =========================================================================

    /// Record a tab's URL. Navigating to a different URL resets its counter.
    pub fn tab_updated(&self, tab_id: TabId, url: &str) {
        let Ok(mut tabs) = self.tabs.lock() else {
            log::warn!("Tab registry unavailable, ignoring update for tab {}", tab_id);
            return;
        };
        let state = tabs.entry(tab_id).or_default();
        if state.url.as_deref() != Some(url) {
            state.url = Some(url.to_string());
            state.captured = 0;
        }
    }

    pub fn tab_removed(&self, tab_id: TabId) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(&tab_id);
        }
    }

    pub fn tab_url(&self, tab_id: TabId) -> Option<String> {
        let tabs = self.tabs.lock().ok()?;
        tabs.get(&tab_id).and_then(|state| state.url.clone())
    }

    pub fn captured_count(&self, tab_id: TabId) -> u32 {
        self.tabs
            .lock()
            .ok()
            .and_then(|tabs| tabs.get(&tab_id).map(|state| state.captured))
            .unwrap_or(0)
    }

    // =========================================================================
    // Capture queue
    // =========================================================================

    /// Queue a captured ad. As with classification, the tab's last known URL
    /// replaces the snapshot's `top_url`.
    pub fn record_capture(&self, tab_id: TabId, mut record: AdCapture) -> Result<(), FilterError> {
        let tab_url = {
            let mut tabs = self
                .tabs
                .lock()
                .map_err(|e| FilterError::Poisoned(e.to_string()))?;
            let state = tabs.entry(tab_id).or_default();
            state.captured += 1;
            state.url.clone()
        };

        let mut queue = self
            .captures
            .lock()
            .map_err(|e| FilterError::Poisoned(e.to_string()))?;
        if let Some(url) = tab_url {
            record.ad.top_url = url;
        }
        queue.push_back(QueuedCapture { tab_id, record });
        log::debug!("Queued capture for tab {} ({} pending)", tab_id, queue.len());
        Ok(())
    }

    /// Take the next batch of at most [`CAPTURE_BATCH_SIZE`] captures.
    pub fn drain_captures(&self) -> Vec<QueuedCapture> {
        match self.captures.lock() {
            Ok(mut queue) => {
                let n = queue.len().min(CAPTURE_BATCH_SIZE);
                queue.drain(..n).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn pending_captures(&self) -> usize {
        self.captures.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

// =============================================================================
// Remote lists
// =============================================================================

#[cfg(feature = "fetch")]
mod remote {
    use std::sync::Arc;

    use super::*;

    /// Download one filter list.
    pub async fn fetch_list(client: &reqwest::Client, url: &str) -> Result<String, FilterError> {
        let fetch_err = |reason: String| FilterError::Fetch {
            url: url.to_string(),
            reason,
        };

        log::debug!("Fetching filter list from: {}", url);
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(response.status().to_string()));
        }
        response.text().await.map_err(|e| fetch_err(e.to_string()))
    }

    impl BackgroundService {
        /// Download one list and append its rules.
        pub async fn add_rules_from_url(&self, client: &reqwest::Client, url: &str) -> Result<LoadStats, FilterError> {
            let text = fetch_list(client, url).await?;
            self.add_rules_from_text(&text)
        }

        /// Download every list, then replace the rule set. Nothing changes if
        /// any download fails.
        pub async fn reload_from_urls(
            &self,
            client: &reqwest::Client,
            urls: &[String],
        ) -> Result<LoadStats, FilterError> {
            let mut texts = Vec::with_capacity(urls.len());
            for url in urls {
                texts.push(fetch_list(client, url).await?);
            }
            self.reload_from_texts(&texts)
        }

        /// Reload forever: every `reload_interval` on success, after
        /// `retry_delay` on failure.
        pub async fn run_reload_loop(self: Arc<Self>, client: reqwest::Client, config: ReloadConfig) {
            loop {
                let wait = match self.reload_from_urls(&client, &config.list_urls).await {
                    Ok(stats) => {
                        log::info!("Reloaded filter lists: {} rules", stats.added.total());
                        config.reload_interval
                    }
                    Err(e) => {
                        log::warn!("Filter reload failed, retrying in {:?}: {}", config.retry_delay, e);
                        config.retry_delay
                    }
                };
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(feature = "fetch")]
pub use remote::fetch_list;

#[cfg(test)]
mod tests {
    use super::*;
    use ads_core::{CaptureReport, CaptureType, MediaType};

    fn service() -> BackgroundService {
        let service = BackgroundService::new();
        service
            .add_rules_from_text("||adserver.example^$third-party\n")
            .unwrap();
        service
    }

    fn snapshot(top_url: &str) -> AdSnapshot {
        AdSnapshot {
            local_id: "1".to_string(),
            top_url: top_url.to_string(),
            html: "<img>".to_string(),
            media_type: MediaType::Image,
            candidate_urls: vec!["http://adserver.example/a.png".to_string()],
        }
    }

    fn record() -> AdCapture {
        AdCapture {
            ad: snapshot("http://frame.site/"),
            capture: CaptureReport {
                capture_type: CaptureType::Image,
                payload: "data:image/png;base64,AAAA".to_string(),
            },
        }
    }

    #[test]
    fn test_classify_uses_tab_url() {
        let service = service();
        assert!(service.classify(None, snapshot("http://news.site/")).is_ad);

        // The snapshot claims a first-party page; the tab knows better.
        service.tab_updated(7, "http://news.site/");
        let response = service.classify(Some(7), snapshot("http://adserver.example/"));
        assert!(response.is_ad);
        assert!(response.error.is_none());

        assert!(!service.classify(None, snapshot("http://adserver.example/")).is_ad);
    }

    #[test]
    fn test_navigation_resets_counter() {
        let service = service();
        service.tab_updated(1, "http://a.com/");
        service.record_capture(1, record()).unwrap();
        service.record_capture(1, record()).unwrap();
        assert_eq!(service.captured_count(1), 2);

        service.tab_updated(1, "http://a.com/");
        assert_eq!(service.captured_count(1), 2);

        service.tab_updated(1, "http://b.com/");
        assert_eq!(service.captured_count(1), 0);

        service.tab_removed(1);
        assert_eq!(service.tab_url(1), None);
    }

    #[test]
    fn test_capture_queue_batches() {
        let service = service();
        for _ in 0..23 {
            service.record_capture(3, record()).unwrap();
        }
        assert_eq!(service.drain_captures().len(), 10);
        assert_eq!(service.drain_captures().len(), 10);
        assert_eq!(service.drain_captures().len(), 3);
        assert!(service.drain_captures().is_empty());
        assert_eq!(service.pending_captures(), 0);
    }

    #[test]
    fn test_queued_capture_keeps_ad_with_tab_url() {
        let service = service();
        service.record_capture(4, record()).unwrap();
        service.tab_updated(5, "http://news.site/story");
        service.record_capture(5, record()).unwrap();

        let batch = service.drain_captures();
        assert_eq!(batch.len(), 2);
        // No known URL for tab 4: the frame's own claim stands.
        assert_eq!(batch[0].record.ad.top_url, "http://frame.site/");
        assert_eq!(batch[1].record.ad.top_url, "http://news.site/story");
        assert_eq!(batch[1].record.ad.candidate_urls, vec!["http://adserver.example/a.png"]);
        assert_eq!(batch[1].record.capture.payload, "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_reload_replaces_rule_set() {
        let service = service();
        let stats = service.reload_from_texts(&["##.ad", "@@||ok.net^"]).unwrap();
        assert_eq!(stats.added.element_blacklist, 1);
        assert_eq!(stats.added.url_whitelist, 1);

        let counts = service.rule_counts().unwrap();
        assert_eq!(counts.url_blacklist, 0);
        assert!(!service.classify(None, snapshot("http://news.site/")).is_ad);
    }

    #[test]
    fn test_default_reload_config() {
        let config = ReloadConfig::default();
        assert_eq!(config.reload_interval, Duration::from_secs(345_600));
        assert_eq!(config.retry_delay, Duration::from_secs(60));
    }
}
