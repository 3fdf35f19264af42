use super::extract_domain;
use url::Url;

/// Checks if a domain matches a wildcard pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches:
///    - "example.com" (the bare domain)
///    - "blog.example.com" (single subdomain)
///    - "api.v2.example.com" (nested subdomains)
///
/// # Arguments
///
/// * `pattern` - The domain pattern, optionally starting with "*."
/// * `candidate` - The domain to check against the pattern
///
/// # Returns
///
/// * `true` - If the candidate matches the pattern
/// * `false` - Otherwise
///
/// # Examples
///
/// ```
/// use notice_harvest::url::matches_wildcard;
///
/// // Exact match
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(!matches_wildcard("example.com", "other.com"));
///
/// // Wildcard match
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "blog.example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "example.org"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        // Wildcard pattern: matches the base domain itself or any subdomain
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        // Exact match only
        candidate == pattern
    }
}

/// Checks a URL against one allow-list entry
///
/// Entries starting with `file://` are path prefixes and only admit local
/// file URLs below that prefix. Every other entry is a domain pattern
/// matched against the URL host with [`matches_wildcard`].
///
/// # Examples
///
/// ```
/// use url::Url;
/// use notice_harvest::url::matches_allow_entry;
///
/// let page = Url::parse("https://mp.weixin.qq.com/s/abc").unwrap();
/// assert!(matches_allow_entry("mp.weixin.qq.com", &page));
/// assert!(!matches_allow_entry("file:///srv/notices/", &page));
///
/// let local = Url::parse("file:///srv/notices/12.html").unwrap();
/// assert!(matches_allow_entry("file:///srv/notices/", &local));
/// ```
pub fn matches_allow_entry(entry: &str, url: &Url) -> bool {
    if entry.starts_with("file://") {
        if url.scheme() != "file" {
            return false;
        }
        // Compare in the same percent-encoded form the target URL uses
        return match Url::parse(entry) {
            Ok(prefix) => url.as_str().starts_with(prefix.as_str()),
            Err(_) => url.as_str().starts_with(entry),
        };
    }

    match extract_domain(url) {
        Some(host) => matches_wildcard(&entry.to_lowercase(), &host),
        None => false,
    }
}
