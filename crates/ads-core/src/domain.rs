//! Registrable-domain approximation for third-party checks
//!
//! A host's registrable domain is approximated by its last two labels. This
//! is wrong for multi-part public suffixes (`example.co.uk` and
//! `other.co.uk` compare equal); rules relying on `third-party` inherit that
//! approximation.
//!
//! # Examples
//!
//! ```
//! use ads_core::domain::registrable_domain;
//!
//! assert_eq!(registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(registrable_domain("example.co.uk"), "co.uk");
//! ```

/// Last two labels of `host`, or the host itself when it has fewer.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    let mut dots = host.rmatch_indices('.');
    dots.next();
    match dots.next() {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    }
}

/// Check if two hosts share the same registrable domain.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    registrable_domain(host1).eq_ignore_ascii_case(registrable_domain(host2))
}

/// Check if a request host is third-party relative to the top-level host.
pub fn is_third_party(top_host: &str, request_host: &str) -> bool {
    !is_same_site(top_host, request_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.com"), "example.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("example.com."), "example.com");
    }

    #[test]
    fn test_third_party() {
        assert!(!is_third_party("www.example.com", "ads.example.com"));
        assert!(is_third_party("www.example.com", "adserver.example"));
        assert!(!is_third_party("Example.com", "cdn.example.COM"));
    }

    #[test]
    fn test_multi_part_suffix_is_approximated() {
        assert!(is_same_site("shop.co.uk", "news.co.uk"));
    }
}
