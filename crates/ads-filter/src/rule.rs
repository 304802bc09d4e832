//! Compiled filter rules
//!
//! Rules are immutable once compiled. URL rules match candidate request URLs;
//! element rules match a CSS selector against the root of an element's HTML
//! snapshot.

use regex::Regex;
use scraper::{ElementRef, Selector};

use ads_core::{MediaType, ParseError, PartyMask, TypeMask};

use crate::pattern::rule_to_regex;

// =============================================================================
// Domain Constraints
// =============================================================================

/// One entry of a `domain=` option or an element rule's domain prefix.
#[derive(Debug, Clone)]
pub struct DomainPattern {
    pub negates: bool,
    pub domain: String,
    regex: Regex,
}

impl DomainPattern {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let raw = raw.trim();
        let (negates, domain) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };

        if domain.is_empty() {
            return Err(ParseError::InvalidDomains(raw.to_string()));
        }

        let domain = domain.to_ascii_lowercase();
        let regex = rule_to_regex(&domain)?;
        Ok(Self {
            negates,
            domain,
            regex,
        })
    }

    #[inline]
    pub fn matches(&self, hostname: &str) -> bool {
        self.regex.is_match(hostname)
    }
}

/// Ordered list of domain patterns a rule is restricted to.
#[derive(Debug, Clone, Default)]
pub struct DomainConstraint {
    patterns: Vec<DomainPattern>,
}

impl DomainConstraint {
    /// Parse a separated list of domains, skipping empty entries.
    pub fn parse_list<'a>(entries: impl Iterator<Item = &'a str>) -> Result<Self, ParseError> {
        let mut patterns = Vec::new();
        for entry in entries {
            if entry.trim().is_empty() {
                continue;
            }
            patterns.push(DomainPattern::parse(entry)?);
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[DomainPattern] {
        &self.patterns
    }

    pub fn extend(&mut self, other: DomainConstraint) {
        self.patterns.extend(other.patterns);
    }

    /// Whether a rule with this constraint applies on a page at `hostname`.
    ///
    /// A matching negated entry always excludes. Otherwise at least one
    /// positive entry must match; a list of only negated entries applies to
    /// every other host.
    pub fn applies_to(&self, hostname: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let mut has_include = false;
        let mut included = false;
        for pattern in &self.patterns {
            if pattern.negates {
                if pattern.matches(hostname) {
                    return false;
                }
            } else {
                has_include = true;
                included = included || pattern.matches(hostname);
            }
        }

        !has_include || included
    }
}

// =============================================================================
// URL Rules
// =============================================================================

/// Options parsed from the `$...` suffix of a URL rule.
#[derive(Debug, Clone)]
pub struct RuleOptions {
    pub type_mask: TypeMask,
    pub party_mask: PartyMask,
    pub domains: DomainConstraint,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            type_mask: TypeMask::ALL,
            party_mask: PartyMask::ALL,
            domains: DomainConstraint::default(),
        }
    }
}

/// Per-URL facts shared by every rule evaluated against one candidate.
#[derive(Debug, Clone)]
pub struct UrlContext<'a> {
    pub url: &'a str,
    pub top_host: &'a str,
    pub is_third_party: bool,
    pub media_type: MediaType,
}

#[derive(Debug, Clone)]
pub struct UrlRule {
    /// Rule text without the `@@` exception marker.
    pub raw: String,
    pub pattern: String,
    regex: Regex,
    pub options: RuleOptions,
}

impl UrlRule {
    pub fn new(raw: &str, pattern: &str, options: RuleOptions) -> Result<Self, ParseError> {
        let regex = rule_to_regex(pattern)?;
        Ok(Self {
            raw: raw.to_string(),
            pattern: pattern.to_string(),
            regex,
            options,
        })
    }

    #[inline]
    pub fn matches_url(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    #[inline]
    pub fn includes_type(&self, media_type: MediaType) -> bool {
        self.options.type_mask.includes(media_type)
    }

    /// Full check: party, page domain, type and pattern.
    pub fn matches(&self, ctx: &UrlContext<'_>) -> bool {
        self.options.party_mask.allows(ctx.is_third_party)
            && self.options.domains.applies_to(ctx.top_host)
            && self.includes_type(ctx.media_type)
            && self.matches_url(ctx.url)
    }
}

// =============================================================================
// Element Rules
// =============================================================================

#[derive(Debug, Clone)]
pub struct ElementRule {
    pub raw: String,
    pub selector_text: String,
    selector: Selector,
    pub domains: DomainConstraint,
}

impl ElementRule {
    pub fn new(raw: &str, domain_list: &str, selector_text: &str) -> Result<Self, ParseError> {
        let selector_text = selector_text.trim();
        if selector_text.is_empty() {
            return Err(ParseError::Empty);
        }

        let selector = Selector::parse(selector_text).map_err(|e| ParseError::InvalidSelector {
            selector: selector_text.to_string(),
            reason: e.to_string(),
        })?;
        let domains = DomainConstraint::parse_list(domain_list.split(','))?;

        Ok(Self {
            raw: raw.to_string(),
            selector_text: selector_text.to_string(),
            selector,
            domains,
        })
    }

    pub fn matches(&self, hostname: &str, element: &ElementRef<'_>) -> bool {
        self.domains.applies_to(hostname) && self.selector.matches(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn constraint(list: &str) -> DomainConstraint {
        DomainConstraint::parse_list(list.split('|')).expect("domains should parse")
    }

    #[test]
    fn test_negated_domain_excludes() {
        let c = constraint("~example.com");
        assert!(!c.applies_to("example.com"));
        assert!(!c.applies_to("www.example.com"));
        assert!(c.applies_to("other.org"));
    }

    #[test]
    fn test_positive_domain_required() {
        let c = constraint("site.com|~shop.site.com");
        assert!(c.applies_to("site.com"));
        assert!(c.applies_to("news.site.com"));
        assert!(!c.applies_to("shop.site.com"));
        assert!(!c.applies_to("other.org"));
    }

    #[test]
    fn test_empty_domain_entry_rejected() {
        assert!(DomainPattern::parse("~").is_err());
    }

    #[test]
    fn test_url_rule_checks_type_and_party() {
        let options = RuleOptions {
            type_mask: TypeMask::IMAGE,
            party_mask: PartyMask::THIRD_PARTY,
            domains: DomainConstraint::default(),
        };
        let rule = UrlRule::new("||ads.net^$image,third-party", "||ads.net^", options).unwrap();

        let mut ctx = UrlContext {
            url: "http://ads.net/a.png",
            top_host: "site.com",
            is_third_party: true,
            media_type: MediaType::Image,
        };
        assert!(rule.matches(&ctx));

        ctx.is_third_party = false;
        assert!(!rule.matches(&ctx));

        ctx.is_third_party = true;
        ctx.media_type = MediaType::Subdocument;
        assert!(!rule.matches(&ctx));

        ctx.media_type = MediaType::Media;
        assert!(rule.matches(&ctx));
    }

    #[test]
    fn test_element_rule_matches_selector() {
        let rule = ElementRule::new("##img.banner", "", "img.banner").unwrap();
        let html = Html::parse_fragment(r#"<img class="banner" src="a.png">"#);
        let element = html
            .root_element()
            .children()
            .find_map(ElementRef::wrap)
            .expect("fragment has an element");
        assert!(rule.matches("site.com", &element));
    }

    #[test]
    fn test_element_rule_rejects_bad_selector() {
        let err = ElementRule::new("##div:-abp-has(.ad)", "", "div:-abp-has(.ad)").unwrap_err();
        assert!(matches!(err, ParseError::InvalidSelector { .. }));
    }
}
