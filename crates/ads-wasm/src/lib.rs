//! WebAssembly bindings for the ad screening background
//!
//! The extension host owns one [`BackgroundService`] through these bindings.
//! Snapshots and capture reports cross the boundary as JSON strings in the
//! camelCase shape the content scripts send.

use std::sync::OnceLock;

use wasm_bindgen::prelude::*;

use ads_core::domain;
use ads_core::url::hostname;
use ads_core::{AdCapture, AdSnapshot, ClassifyResponse};
use ads_filter::{BackgroundService, LoadStats, RuleCounts, TabId};

static SERVICE: OnceLock<BackgroundService> = OnceLock::new();

fn service() -> Result<&'static BackgroundService, JsValue> {
    SERVICE
        .get()
        .ok_or_else(|| JsValue::from_str("Not initialized. Call init() first."))
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[wasm_bindgen]
pub fn init() -> Result<(), JsValue> {
    SERVICE
        .set(BackgroundService::new())
        .map_err(|_| JsValue::from_str("Already initialized. Reload the page to reinitialize."))
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    SERVICE.get().is_some()
}

// =============================================================================
// Filter lists
// =============================================================================

#[wasm_bindgen]
pub fn add_rules_from_text(text: &str) -> Result<JsValue, JsValue> {
    let stats = service()?.add_rules_from_text(text).map_err(to_js_error)?;
    Ok(stats_object(&stats))
}

/// Replace every rule with the given list texts.
#[wasm_bindgen]
pub fn reload_from_texts(list_texts: JsValue) -> Result<JsValue, JsValue> {
    let list_array = js_sys::Array::from(&list_texts);

    let mut texts = Vec::with_capacity(list_array.length() as usize);
    for value in list_array.iter() {
        let text = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("List text must be a string"))?;
        texts.push(text);
    }

    let stats = service()?.reload_from_texts(&texts).map_err(to_js_error)?;
    Ok(stats_object(&stats))
}

#[wasm_bindgen]
pub fn reset() -> Result<(), JsValue> {
    service()?
        .reload_from_texts::<&str>(&[])
        .map(|_| ())
        .map_err(to_js_error)
}

#[wasm_bindgen]
pub fn rule_counts() -> Result<JsValue, JsValue> {
    let counts = service()?.rule_counts().map_err(to_js_error)?;
    Ok(counts_object(&counts).into())
}

fn counts_object(counts: &RuleCounts) -> js_sys::Object {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"urlBlacklist".into(), &JsValue::from(counts.url_blacklist as u32));
    let _ = js_sys::Reflect::set(&result, &"urlWhitelist".into(), &JsValue::from(counts.url_whitelist as u32));
    let _ = js_sys::Reflect::set(&result, &"elementBlacklist".into(), &JsValue::from(counts.element_blacklist as u32));
    let _ = js_sys::Reflect::set(&result, &"elementWhitelist".into(), &JsValue::from(counts.element_whitelist as u32));
    let _ = js_sys::Reflect::set(&result, &"total".into(), &JsValue::from(counts.total() as u32));
    result
}

fn stats_object(stats: &LoadStats) -> JsValue {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"added".into(), &counts_object(&stats.added));
    let _ = js_sys::Reflect::set(&result, &"skipped".into(), &JsValue::from(stats.skipped as u32));
    let _ = js_sys::Reflect::set(&result, &"dropped".into(), &JsValue::from(stats.dropped as u32));
    result.into()
}

// =============================================================================
// Classification channel
// =============================================================================

/// Classify a JSON snapshot; always answers with a JSON `ClassifyResponse`.
#[wasm_bindgen]
pub fn classify(snapshot_json: &str, tab_id: Option<u32>) -> String {
    match SERVICE.get() {
        Some(service) => classify_json(service, tab_id, snapshot_json),
        None => response_json(&ClassifyResponse::failed("Filter not initialized")),
    }
}

pub fn classify_json(service: &BackgroundService, tab_id: Option<TabId>, snapshot_json: &str) -> String {
    let response = match serde_json::from_str::<AdSnapshot>(snapshot_json) {
        Ok(snapshot) => service.classify(tab_id, snapshot),
        Err(e) => {
            log::error!("Malformed classification request: {}", e);
            ClassifyResponse::failed(format!("Malformed snapshot: {}", e))
        }
    };
    response_json(&response)
}

fn response_json(response: &ClassifyResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|_| r#"{"isAd":false,"error":"unserializable"}"#.to_string())
}

// =============================================================================
// Tabs and captures
// =============================================================================

#[wasm_bindgen]
pub fn tab_updated(tab_id: u32, url: &str) -> Result<(), JsValue> {
    service()?.tab_updated(tab_id, url);
    Ok(())
}

#[wasm_bindgen]
pub fn tab_removed(tab_id: u32) -> Result<(), JsValue> {
    service()?.tab_removed(tab_id);
    Ok(())
}

#[wasm_bindgen]
pub fn captured_count(tab_id: u32) -> u32 {
    SERVICE.get().map_or(0, |service| service.captured_count(tab_id))
}

#[wasm_bindgen]
pub fn record_capture(tab_id: u32, capture_json: &str) -> Result<(), JsValue> {
    record_capture_json(service()?, tab_id, capture_json).map_err(|e| JsValue::from_str(&e))
}

/// Next batch of queued captures as a JSON array of `{tabId, ad, capture}`.
#[wasm_bindgen]
pub fn drain_captures() -> Result<String, JsValue> {
    Ok(drain_captures_json(service()?))
}

/// Queue `{ad, capture}` sent by a content frame.
pub fn record_capture_json(service: &BackgroundService, tab_id: TabId, capture_json: &str) -> Result<(), String> {
    let record: AdCapture =
        serde_json::from_str(capture_json).map_err(|e| format!("Malformed capture report: {}", e))?;
    service.record_capture(tab_id, record).map_err(|e| e.to_string())
}

pub fn drain_captures_json(service: &BackgroundService) -> String {
    serde_json::to_string(&service.drain_captures()).unwrap_or_else(|_| "[]".to_string())
}

// =============================================================================
// Helpers
// =============================================================================

#[wasm_bindgen]
pub fn is_third_party_js(top_url: &str, request_url: &str) -> bool {
    match (hostname(top_url), hostname(request_url)) {
        (Some(top), Some(request)) => domain::is_third_party(&top, &request),
        _ => false,
    }
}

#[wasm_bindgen]
pub fn registrable_domain_js(host: &str) -> String {
    domain::registrable_domain(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_with(rules: &str) -> BackgroundService {
        let service = BackgroundService::new();
        service.add_rules_from_text(rules).unwrap();
        service
    }

    fn snapshot_json(url: &str) -> String {
        json!({
            "localId": "ad-1",
            "topUrl": "https://news.example.com/",
            "html": format!("<img src=\"{}\">", url),
            "mediaType": "image",
            "candidateUrls": [url],
        })
        .to_string()
    }

    #[test]
    fn test_classify_json() {
        let service = service_with("||adserver.example^$image\n@@||adserver.example/safe.png$image\n");

        let ad = classify_json(&service, None, &snapshot_json("http://adserver.example/banner.png"));
        assert_eq!(ad, r#"{"isAd":true}"#);

        let excused = classify_json(&service, None, &snapshot_json("http://adserver.example/safe.png"));
        assert_eq!(excused, r#"{"isAd":false}"#);
    }

    #[test]
    fn test_malformed_snapshot_fails_open() {
        let service = service_with("||adserver.example^\n");
        let response: ClassifyResponse = serde_json::from_str(&classify_json(&service, None, "{not json")).unwrap();
        assert!(!response.is_ad);
        assert!(response.error.unwrap().starts_with("Malformed snapshot"));
    }

    #[test]
    fn test_tab_url_overrides_top_url() {
        let service = service_with("||adserver.example^$domain=example.org\n");
        let json = snapshot_json("https://adserver.example/x.png");

        assert_eq!(classify_json(&service, Some(3), &json), r#"{"isAd":false}"#);
        service.tab_updated(3, "https://www.example.org/page");
        assert_eq!(classify_json(&service, Some(3), &json), r#"{"isAd":true}"#);
    }

    #[test]
    fn test_capture_queue_roundtrip() {
        let service = BackgroundService::new();
        service.tab_updated(7, "https://news.example.com/");

        let mut ad: serde_json::Value =
            serde_json::from_str(&snapshot_json("http://adserver.example/banner.png")).unwrap();
        ad["topUrl"] = json!("https://frame.example.net/");
        let message = json!({
            "ad": ad,
            "capture": { "type": "image", "payload": "data:image/png;base64,AA==" },
        });
        record_capture_json(&service, 7, &message.to_string()).unwrap();
        assert!(record_capture_json(&service, 7, r#"{"type":"image","payload":"AA=="}"#).is_err());
        assert!(record_capture_json(&service, 7, &json!({ "ad": ad, "capture": { "type": "video" } }).to_string()).is_err());

        let drained: serde_json::Value = serde_json::from_str(&drain_captures_json(&service)).unwrap();
        assert_eq!(drained.as_array().map(Vec::len), Some(1));
        assert_eq!(drained[0]["tabId"], 7);
        assert_eq!(drained[0]["ad"]["localId"], "ad-1");
        assert_eq!(drained[0]["ad"]["topUrl"], "https://news.example.com/");
        assert_eq!(drained[0]["ad"]["candidateUrls"][0], "http://adserver.example/banner.png");
        assert_eq!(drained[0]["capture"]["type"], "image");
        assert_eq!(drain_captures_json(&service), "[]");
    }

    #[test]
    fn test_third_party_helper() {
        assert!(is_third_party_js("https://news.example.com/", "https://cdn.ads.net/a.png"));
        assert!(!is_third_party_js("https://news.example.com/", "https://img.example.com/a.png"));
        assert!(!is_third_party_js("https://news.example.com/", "/relative.png"));
    }
}
