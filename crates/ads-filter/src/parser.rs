//! Filter list line parser
//!
//! Classifies one line of an EasyList-style list and compiles it into a URL or
//! element rule. Blank lines and comments yield `Ok(None)`; lines that cannot
//! be compiled yield a `ParseError` and are dropped by the caller.

use ads_core::{ParseError, PartyMask, TypeMask};

use crate::rule::{DomainConstraint, ElementRule, RuleOptions, UrlRule};

/// One compiled line.
#[derive(Debug, Clone)]
pub enum ParsedLine {
    Url { exception: bool, rule: UrlRule },
    Element { exception: bool, rule: ElementRule },
}

impl ParsedLine {
    pub fn is_exception(&self) -> bool {
        match self {
            Self::Url { exception, .. } | Self::Element { exception, .. } => *exception,
        }
    }
}

/// Cosmetic separators this engine does not implement (extended CSS,
/// snippets, style injection).
const UNSUPPORTED_SEPARATORS: &[&str] = &["#?#", "#$#", "#@?#", "#@$#", "#%#", "#@%#"];

pub fn parse_line(line: &str) -> Result<Option<ParsedLine>, ParseError> {
    let line = line.trim();
    if line.is_empty() || is_comment_line(line) {
        return Ok(None);
    }

    if UNSUPPORTED_SEPARATORS.iter().any(|sep| line.contains(sep)) {
        return Err(ParseError::Unsupported(line.to_string()));
    }

    if let Some(pos) = line.find("#@#") {
        let rule = ElementRule::new(line, &line[..pos], &line[pos + 3..])?;
        return Ok(Some(ParsedLine::Element {
            exception: true,
            rule,
        }));
    }

    let (exception, body) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    if let Some(pos) = body.find("##") {
        let rule = ElementRule::new(line, &body[..pos], &body[pos + 2..])?;
        return Ok(Some(ParsedLine::Element { exception, rule }));
    }

    let (pattern, options_text) = split_rule_options(body);
    let pattern = pattern.trim();
    let options = match options_text {
        Some(text) => parse_options(text)?,
        None => RuleOptions::default(),
    };

    if pattern.is_empty() && options_text.is_none() {
        return Err(ParseError::Empty);
    }

    let rule = UrlRule::new(body, pattern, options)?;
    Ok(Some(ParsedLine::Url { exception, rule }))
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!')
        || line.starts_with('[')
        || (line.starts_with('#') && !line.starts_with("##") && !line.starts_with("#@#"))
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.find('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

// =============================================================================
// Options
// =============================================================================

fn parse_options(text: &str) -> Result<RuleOptions, ParseError> {
    let mut type_include = TypeMask::empty();
    let mut type_exclude = TypeMask::empty();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();
    let mut domains = DomainConstraint::default();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if let Some(value) = raw_lower.strip_prefix("domain=") {
            domains.extend(DomainConstraint::parse_list(value.split('|'))?);
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if let Some(mask) = TypeMask::from_option(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        if let Some(mask) = party_option(name) {
            if negated {
                party_exclude |= mask;
            } else {
                party_include |= mask;
            }
            continue;
        }

        log::trace!("Ignoring unknown filter option '{}'", raw);
    }

    let type_bits = finalize_mask(type_include.bits(), type_exclude.bits(), TypeMask::ALL.bits())
        .ok_or_else(|| ParseError::Unsupported(format!("type options exclude everything: {text}")))?;
    let party_bits = finalize_mask(party_include.bits(), party_exclude.bits(), PartyMask::ALL.bits())
        .ok_or_else(|| ParseError::Unsupported(format!("party options exclude everything: {text}")))?;

    Ok(RuleOptions {
        type_mask: TypeMask::from_bits_truncate(type_bits),
        party_mask: PartyMask::from_bits_truncate(party_bits),
        domains,
    })
}

fn party_option(name: &str) -> Option<PartyMask> {
    match name {
        "third-party" | "thirdparty" | "3p" => Some(PartyMask::THIRD_PARTY),
        "first-party" | "firstparty" | "1p" => Some(PartyMask::FIRST_PARTY),
        _ => None,
    }
}

/// Combine include and exclude option bits. Only exclusions means "all but
/// these"; a mask left empty makes the rule unmatchable.
fn finalize_mask(include: u8, exclude: u8, all: u8) -> Option<u8> {
    let include = include & all;
    let exclude = exclude & all;
    let mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return None;
    }
    Some(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ads_core::MediaType;

    fn url_rule(line: &str) -> (bool, UrlRule) {
        match parse_line(line) {
            Ok(Some(ParsedLine::Url { exception, rule })) => (exception, rule),
            other => panic!("expected url rule for {line}, got {other:?}"),
        }
    }

    fn element_rule(line: &str) -> (bool, ElementRule) {
        match parse_line(line) {
            Ok(Some(ParsedLine::Element { exception, rule })) => (exception, rule),
            other => panic!("expected element rule for {line}, got {other:?}"),
        }
    }

    #[test]
    fn test_skips_blank_and_comments() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("! Title: EasyList").unwrap().is_none());
        assert!(parse_line("[Adblock Plus 2.0]").unwrap().is_none());
        assert!(parse_line("# hosts comment").unwrap().is_none());
    }

    #[test]
    fn test_block_and_exception_url_rules() {
        let (exception, rule) = url_rule("||adserver.example^$image");
        assert!(!exception);
        assert_eq!(rule.pattern, "||adserver.example^");
        assert_eq!(rule.options.type_mask, TypeMask::IMAGE);

        let (exception, rule) = url_rule("@@||adserver.example/safe.png$image");
        assert!(exception);
        assert_eq!(rule.pattern, "||adserver.example/safe.png");
    }

    #[test]
    fn test_negated_type_means_all_others() {
        let (_, rule) = url_rule("/banner/*$~image");
        assert!(!rule.includes_type(MediaType::Image));
        assert!(rule.includes_type(MediaType::Subdocument));
        assert!(rule.includes_type(MediaType::Object));
    }

    #[test]
    fn test_party_options() {
        let (_, rule) = url_rule("||tracker.net^$third-party");
        assert_eq!(rule.options.party_mask, PartyMask::THIRD_PARTY);

        let (_, rule) = url_rule("||tracker.net^$~third-party");
        assert_eq!(rule.options.party_mask, PartyMask::FIRST_PARTY);
    }

    #[test]
    fn test_contradictory_options_dropped() {
        assert!(matches!(
            parse_line("||x.com^$image,~image"),
            Err(ParseError::Unsupported(_))
        ));
        assert!(parse_line("||x.com^$third-party,~third-party").is_err());
    }

    #[test]
    fn test_domain_option() {
        let (_, rule) = url_rule("/ads/*$domain=news.com|~shop.news.com");
        assert!(rule.options.domains.applies_to("news.com"));
        assert!(!rule.options.domains.applies_to("shop.news.com"));
        assert!(!rule.options.domains.applies_to("other.com"));
    }

    #[test]
    fn test_unknown_option_ignored() {
        let (_, rule) = url_rule("||x.com^$popup,image");
        assert_eq!(rule.options.type_mask, TypeMask::IMAGE);
    }

    #[test]
    fn test_element_rules() {
        let (exception, rule) = element_rule("##.ad-banner");
        assert!(!exception);
        assert_eq!(rule.selector_text, ".ad-banner");
        assert!(rule.domains.is_empty());

        let (exception, rule) = element_rule("example.com,~shop.example.com##div#sponsor");
        assert!(!exception);
        assert_eq!(rule.domains.patterns().len(), 2);

        let (exception, _) = element_rule("example.com#@#.ad-banner");
        assert!(exception);

        let (exception, _) = element_rule("@@##.ad-banner");
        assert!(exception);
    }

    #[test]
    fn test_unsupported_cosmetics() {
        assert!(matches!(
            parse_line("example.com#?#div:-abp-has(.ad)"),
            Err(ParseError::Unsupported(_))
        ));
        assert!(parse_line("example.com#$#abort-on-property-read x").is_err());
        assert!(parse_line("example.com#%#window.x=1").is_err());
    }

    #[test]
    fn test_empty_pattern_without_options() {
        assert_eq!(parse_line("@@").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn test_empty_pattern_with_options() {
        let (_, rule) = url_rule("$image,domain=ads.com");
        assert_eq!(rule.pattern, "");
        assert!(rule.matches_url("http://anything.net/x.png"));
    }
}
