//! URL normalization helpers, grounded in
//! `original_source/src/frontend/replayserver.cc` and `src/util/util.cc`.

const HTTP: &str = "http://";
const HTTPS: &str = "https://";
const WWW: &str = "www.";

pub fn remove_scheme(url: &str) -> &str {
    url.strip_prefix(HTTPS)
        .or_else(|| url.strip_prefix(HTTP))
        .unwrap_or(url)
}

pub fn strip_www(s: &str) -> &str {
    s.strip_prefix(WWW).unwrap_or(s)
}

pub fn remove_trailing_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}

pub fn extract_hostname(url: &str) -> &str {
    let rest = remove_scheme(url);
    match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

/// `scheme://www.host/path?query` -> `host`, with trailing slashes removed.
pub fn escape_page_url(page_url: &str) -> String {
    let without_scheme = remove_scheme(page_url);
    let without_www = strip_www(without_scheme);
    remove_trailing_slash(without_www).to_string()
}

/// Path portion with scheme + `www.` stripped: `http://www.ex.com/a?x` ->
/// `/a?x`. If the input has no path component at all, returns `/`.
pub fn strip_hostname_and_www(url: &str) -> String {
    let without_scheme = remove_scheme(url);
    let without_www = strip_www(without_scheme);
    match without_www.find('/') {
        Some(idx) => without_www[idx..].to_string(),
        None => "/".to_string(),
    }
}

pub fn strip_query(path: &str) -> &str {
    match path.find('?') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// Last path segment, truncated at the first `;` (matrix-parameter
/// separator), used for the Tier-2 fallback's last-segment match.
pub fn last_path_segment(path_no_query: &str) -> &str {
    let segment = match path_no_query.rfind('/') {
        Some(idx) => &path_no_query[idx + 1..],
        None => path_no_query,
    };
    match segment.find(';') {
        Some(idx) => &segment[..idx],
        None => segment,
    }
}
