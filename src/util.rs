use std::collections::HashMap;

use url::Url;

/// Character-level Shannon entropy in bits: `-Σ p(c)·log2 p(c)`.
pub fn url_entropy(url: &str) -> f64 {
    let total = url.chars().count();
    if total == 0 {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in url.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    let total = total as f64;
    freq.values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum::<f64>()
        .max(0.0)
}

/// True when the string parses as a URL with both a scheme and a host.
pub fn is_absolute_url(s: &str) -> bool {
    Url::parse(s).map(|u| u.has_host()).unwrap_or(false)
}

/// `target` resolved against `base` when it is relative; otherwise unchanged.
pub fn resolve_url(base: &str, target: &str) -> String {
    let target = target.trim();
    if is_absolute_url(target) {
        return target.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(target))
        .map(String::from)
        .unwrap_or_else(|_| target.to_string())
}

/// Canonical `scheme://host/path/` form used for login page matching.
pub fn normalize_page_url(s: &str) -> Option<String> {
    let u = Url::parse(s).ok()?;
    let host = u.host_str()?;
    let mut out = format!("{}://{}", u.scheme(), host);
    if let Some(port) = u.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(u.path());
    if !out.ends_with('/') {
        out.push('/');
    }
    Some(out)
}

/// Whether `current` is one of the known login pages once query string and
/// fragment are dropped.
pub fn verify_login_page(current: &str, login_pages: &[String]) -> bool {
    let Some(current) = normalize_page_url(current) else {
        return false;
    };
    login_pages
        .iter()
        .filter_map(|p| normalize_page_url(p))
        .any(|p| p == current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_repeated_char_is_zero() {
        assert_eq!(url_entropy("aaaa"), 0.0);
        assert_eq!(url_entropy(""), 0.0);
    }

    #[test]
    fn entropy_of_two_distinct_chars_is_one_bit() {
        assert!((url_entropy("ab") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn random_looking_segment_scores_higher_than_repetitive_one() {
        let repetitive = url_entropy("https://site.test/aaaaaaaaaaaa");
        let random = url_entropy("https://site.test/x9Qz7LmK2pVw");
        assert!(random > repetitive);
    }

    #[test]
    fn absolute_url_needs_scheme_and_host() {
        assert!(is_absolute_url("https://example.com/a"));
        assert!(!is_absolute_url("/relative/path"));
        assert!(!is_absolute_url("mailto:someone@example.com"));
    }

    #[test]
    fn relative_targets_resolve_against_the_current_page() {
        let base = "https://site.test/docs/intro?tab=1";
        assert_eq!(resolve_url(base, "/pricing"), "https://site.test/pricing");
        assert_eq!(resolve_url(base, "../api"), "https://site.test/api");
        assert_eq!(resolve_url(base, "guide"), "https://site.test/docs/guide");
        assert_eq!(resolve_url(base, " https://other.test/x "), "https://other.test/x");
        assert_eq!(resolve_url("about:blank", "/pricing"), "/pricing");
    }

    #[test]
    fn login_page_matching_ignores_query_and_trailing_slash() {
        let pages = vec!["https://www.instagram.com/accounts/login/".to_string()];
        assert!(verify_login_page(
            "https://www.instagram.com/accounts/login?next=%2F",
            &pages
        ));
        assert!(!verify_login_page("https://www.instagram.com/explore/", &pages));
        assert!(!verify_login_page("not a url", &pages));
    }
}
