use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// URLs without a host (such as `file://` URLs) yield `None`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use notice_harvest::url::extract_domain;
///
/// let url = Url::parse("https://MP.Weixin.QQ.com/s/abc").unwrap();
/// assert_eq!(extract_domain(&url), Some("mp.weixin.qq.com".to_string()));
///
/// let url = Url::parse("file:///srv/notices/1.html").unwrap();
/// assert_eq!(extract_domain(&url), None);
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
}

/// Returns true for local-file targets
pub fn is_local_file(url: &Url) -> bool {
    url.scheme() == "file"
}

/// Builds the robots.txt URL for the origin of `url`
///
/// Returns `None` for URLs that have no network origin.
pub fn robots_url(url: &Url) -> Option<Url> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}
