//! Rule storage and ad classification
//!
//! The filter holds four insertion-ordered sequences. Within a sequence the
//! first matching rule wins; across a blacklist/whitelist pair a whitelist
//! match always overrides the blacklist match.

use scraper::{ElementRef, Html};
use serde::Serialize;

use ads_core::url::hostname;
use ads_core::{is_third_party, AdSnapshot, MediaType};

use crate::parser::{parse_line, ParsedLine};
use crate::rule::{ElementRule, UrlContext, UrlRule};

// =============================================================================
// Query / Verdict
// =============================================================================

/// Input to [`Filter::is_ad`].
#[derive(Debug, Clone, Copy)]
pub struct AdQuery<'a> {
    pub candidate_urls: &'a [String],
    pub top_url: &'a str,
    pub media_type: MediaType,
    pub html: &'a str,
}

impl<'a> From<&'a AdSnapshot> for AdQuery<'a> {
    fn from(snapshot: &'a AdSnapshot) -> Self {
        Self {
            candidate_urls: &snapshot.candidate_urls,
            top_url: &snapshot.top_url,
            media_type: snapshot.media_type,
            html: &snapshot.html,
        }
    }
}

/// The rule that decided a verdict.
#[derive(Debug, Clone, Copy)]
pub enum MatchedRule<'f> {
    Url(&'f UrlRule),
    Element(&'f ElementRule),
}

impl MatchedRule<'_> {
    pub fn raw(&self) -> &str {
        match self {
            Self::Url(rule) => &rule.raw,
            Self::Element(rule) => &rule.raw,
        }
    }
}

/// A non-empty classification result. `exception` is set when a whitelist
/// rule excused a blacklist match; such a verdict means "not an ad".
#[derive(Debug, Clone, Copy)]
pub struct Verdict<'f> {
    pub rule: MatchedRule<'f>,
    pub exception: bool,
}

impl Verdict<'_> {
    #[inline]
    pub fn is_ad(&self) -> bool {
        !self.exception
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCounts {
    pub url_blacklist: usize,
    pub url_whitelist: usize,
    pub element_blacklist: usize,
    pub element_whitelist: usize,
}

impl RuleCounts {
    pub fn total(&self) -> usize {
        self.url_blacklist + self.url_whitelist + self.element_blacklist + self.element_whitelist
    }

    pub fn merge(&mut self, other: &RuleCounts) {
        self.url_blacklist += other.url_blacklist;
        self.url_whitelist += other.url_whitelist;
        self.element_blacklist += other.element_blacklist;
        self.element_whitelist += other.element_whitelist;
    }
}

/// Outcome of one `add_rules` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub added: RuleCounts,
    /// Blank and comment lines.
    pub skipped: usize,
    /// Lines that failed to compile or use unsupported syntax.
    pub dropped: usize,
}

impl LoadStats {
    pub fn merge(&mut self, other: &LoadStats) {
        self.added.merge(&other.added);
        self.skipped += other.skipped;
        self.dropped += other.dropped;
    }
}

// =============================================================================
// Filter
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Filter {
    url_blacklist: Vec<UrlRule>,
    url_whitelist: Vec<UrlRule>,
    element_blacklist: Vec<ElementRule>,
    element_whitelist: Vec<ElementRule>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every rule.
    pub fn reset(&mut self) {
        self.url_blacklist.clear();
        self.url_whitelist.clear();
        self.element_blacklist.clear();
        self.element_whitelist.clear();
    }

    /// Compile and append lines. Bad lines are logged and dropped.
    pub fn add_rules<'a, I>(&mut self, lines: I) -> LoadStats
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stats = LoadStats::default();

        for line in lines {
            match parse_line(line) {
                Ok(Some(ParsedLine::Url { exception, rule })) => {
                    if exception {
                        self.url_whitelist.push(rule);
                        stats.added.url_whitelist += 1;
                    } else {
                        self.url_blacklist.push(rule);
                        stats.added.url_blacklist += 1;
                    }
                }
                Ok(Some(ParsedLine::Element { exception, rule })) => {
                    if exception {
                        self.element_whitelist.push(rule);
                        stats.added.element_whitelist += 1;
                    } else {
                        self.element_blacklist.push(rule);
                        stats.added.element_blacklist += 1;
                    }
                }
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    log::debug!("Dropping filter line '{}': {}", line.trim(), e);
                    stats.dropped += 1;
                }
            }
        }

        log::info!(
            "Loaded {} rules ({} url block, {} url allow, {} element block, {} element allow), dropped {}",
            stats.added.total(),
            stats.added.url_blacklist,
            stats.added.url_whitelist,
            stats.added.element_blacklist,
            stats.added.element_whitelist,
            stats.dropped
        );

        stats
    }

    pub fn add_rules_from_text(&mut self, text: &str) -> LoadStats {
        self.add_rules(text.lines())
    }

    /// Replace every rule with the contents of `text`.
    pub fn reload_from_text(&mut self, text: &str) -> LoadStats {
        self.reset();
        self.add_rules_from_text(text)
    }

    pub fn rule_counts(&self) -> RuleCounts {
        RuleCounts {
            url_blacklist: self.url_blacklist.len(),
            url_whitelist: self.url_whitelist.len(),
            element_blacklist: self.element_blacklist.len(),
            element_whitelist: self.element_whitelist.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rule_counts().total() == 0
    }

    // =========================================================================
    // Matching
    // =========================================================================

    /// Classify an element. URL candidates are tried in order and the first
    /// one producing a verdict decides; otherwise element rules are matched
    /// against the root of the captured HTML.
    pub fn is_ad(&self, query: &AdQuery<'_>) -> Option<Verdict<'_>> {
        let top_host = hostname(query.top_url).unwrap_or_default();

        for url in query.candidate_urls {
            if let Some(verdict) = self.match_url(url, &top_host, query.media_type) {
                return Some(verdict);
            }
        }

        self.match_element(query.html, &top_host)
    }

    /// URL-only classification of a single candidate.
    pub fn is_url_ad(&self, url: &str, top_url: &str, media_type: MediaType) -> Option<Verdict<'_>> {
        let top_host = hostname(top_url).unwrap_or_default();
        self.match_url(url, &top_host, media_type)
    }

    /// Element-only classification of an HTML snapshot.
    pub fn is_element_ad(&self, html: &str, top_url: &str) -> Option<Verdict<'_>> {
        let top_host = hostname(top_url).unwrap_or_default();
        self.match_element(html, &top_host)
    }

    /// Boolean verdict used by the classification channel.
    pub fn classify(&self, snapshot: &AdSnapshot) -> bool {
        self.is_ad(&AdQuery::from(snapshot))
            .map(|verdict| verdict.is_ad())
            .unwrap_or(false)
    }

    fn match_url(&self, url: &str, top_host: &str, media_type: MediaType) -> Option<Verdict<'_>> {
        let third_party = match hostname(url) {
            Some(host) => is_third_party(top_host, &host),
            None => false,
        };
        let ctx = UrlContext {
            url,
            top_host,
            is_third_party: third_party,
            media_type,
        };

        let blocked = self.url_blacklist.iter().find(|rule| rule.matches(&ctx))?;
        match self.url_whitelist.iter().find(|rule| rule.matches(&ctx)) {
            Some(allowed) => Some(Verdict {
                rule: MatchedRule::Url(allowed),
                exception: true,
            }),
            None => Some(Verdict {
                rule: MatchedRule::Url(blocked),
                exception: false,
            }),
        }
    }

    fn match_element(&self, html: &str, top_host: &str) -> Option<Verdict<'_>> {
        if self.element_blacklist.is_empty() || html.trim().is_empty() {
            return None;
        }

        let fragment = Html::parse_fragment(html);
        let root = fragment.root_element().children().find_map(ElementRef::wrap)?;

        let blocked = self
            .element_blacklist
            .iter()
            .find(|rule| rule.matches(top_host, &root))?;
        match self
            .element_whitelist
            .iter()
            .find(|rule| rule.matches(top_host, &root))
        {
            Some(allowed) => Some(Verdict {
                rule: MatchedRule::Element(allowed),
                exception: true,
            }),
            None => Some(Verdict {
                rule: MatchedRule::Element(blocked),
                exception: false,
            }),
        }
    }
}
