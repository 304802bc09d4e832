//! Filter glob syntax to regular expression
//!
//! Supported subset:
//!
//! - `*` matches any run of characters
//! - `^` matches a separator: end of input, `/` or `:`
//! - a leading `||` anchors to the start of a domain (after `.` or `://`)
//! - a leading `|` anchors to the start of the input
//! - a trailing `|` anchors to the end of the input
//!
//! Every other character is matched literally.

use regex::Regex;

use ads_core::ParseError;

const DOMAIN_START: &str = r"(?:\.|://)";
const SEPARATOR: &str = "(?:$|/|:)";

/// Translate a filter pattern into regex source.
pub fn rule_to_pattern(rule: &str) -> String {
    let (start_anchor, body) = if let Some(rest) = rule.strip_prefix("||") {
        (DOMAIN_START, rest)
    } else if let Some(rest) = rule.strip_prefix('|') {
        ("^", rest)
    } else {
        ("", rule)
    };

    let (body, end_anchor) = match body.strip_suffix('|') {
        Some(rest) => (rest, "$"),
        None => (body, ""),
    };

    let mut out = String::with_capacity(body.len() * 2 + 16);
    out.push_str(start_anchor);

    let mut buf = [0u8; 4];
    for ch in body.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '^' => out.push_str(SEPARATOR),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }

    out.push_str(end_anchor);
    out
}

/// Compile a filter pattern.
pub fn rule_to_regex(rule: &str) -> Result<Regex, ParseError> {
    let source = rule_to_pattern(rule);
    Regex::new(&source).map_err(|e| ParseError::InvalidPattern {
        pattern: rule.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(rule: &str) -> Regex {
        rule_to_regex(rule).expect("pattern should compile")
    }

    #[test]
    fn domain_anchor_matches_domain_and_subdomains() {
        let re = compile("||example.com^");
        assert!(re.is_match("http://example.com/x"));
        assert!(re.is_match("http://sub.example.com/x"));
        assert!(re.is_match("https://example.com:8080/x"));
        assert!(re.is_match("http://example.com"));
        assert!(!re.is_match("http://notexample.com/x"));
        assert!(!re.is_match("http://example.company.com/x"));
    }

    #[test]
    fn wildcard_matches_any_run() {
        let re = compile("/ads/*.png");
        assert!(re.is_match("/ads/banner123.png"));
        assert!(re.is_match("http://site.com/ads/banner123.png"));
        assert!(!re.is_match("/noads/banner.png"));
    }

    #[test]
    fn every_wildcard_is_expanded() {
        let re = compile("/ad*/*_728x90.");
        assert!(re.is_match("http://x.com/adserve/img_728x90.gif"));
    }

    #[test]
    fn start_and_end_anchors() {
        let re = compile("|http://ads.");
        assert!(re.is_match("http://ads.site.com/"));
        assert!(!re.is_match("https://x.com/?u=http://ads.site.com/"));

        let re = compile(".swf|");
        assert!(re.is_match("http://x.com/movie.swf"));
        assert!(!re.is_match("http://x.com/movie.swf?x=1"));
    }

    #[test]
    fn metacharacters_are_literal() {
        let re = compile("/banner.php?id=(1)");
        assert!(re.is_match("http://x.com/banner.php?id=(1)"));
        assert!(!re.is_match("http://x.com/bannerXphp?id=(1)"));
    }

    #[test]
    fn separator_matches_colon_slash_and_end() {
        let re = compile("ads^");
        assert!(re.is_match("http://x.com/ads/"));
        assert!(re.is_match("http://x.com/ads"));
        assert!(re.is_match("http://ads:80/"));
        assert!(!re.is_match("http://x.com/adsense"));
    }

    #[test]
    fn pattern_source() {
        assert_eq!(rule_to_pattern("||a.com^"), r"(?:\.|://)a\.com(?:$|/|:)");
        assert_eq!(rule_to_pattern("|a*b|"), "^a.*b$");
    }
}
