//! Replay matcher (spec §4.4): given an incoming request description and a
//! directory of recorded request/response pairs, selects the "best" stored
//! response. Grounded in `original_source/src/frontend/replayserver.cc`'s
//! `match_score`/`match_url`/`check_redirect`, generalized into the
//! two-tier scoring scheme spec.md describes explicitly.

use std::path::Path;

use retrace_core::record::{RequestResponse, Scheme};
use retrace_core::sift4::sift4;
use retrace_core::url_util::{last_path_segment, strip_hostname_and_www, strip_query};
use retrace_core::error::Result;

use crate::env::ReplayEnv;

const SIFT4_MAX_OFFSET: usize = 500;
const SIFT4_MAX_DISTANCE: usize = 200;

/// Open Question 2: which scoring function backs the Tier-2 fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier2Strategy {
    /// Default: gate on an exact last-path-segment match, then break ties
    /// among those candidates with the bounded Sift4 edit distance.
    Sift4EditDistance,
    /// Alternate: no exact-match gate; score every candidate by the common
    /// prefix length of its last path segment against the incoming one.
    LastTokenCommonPrefix,
}

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub tier2: Tier2Strategy,
    /// spec.md §4.4 "Redirect reconciliation (optional, disabled by default)".
    pub check_redirects: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tier2: Tier2Strategy::Sift4EditDistance,
            check_redirects: false,
        }
    }
}

/// Reads every record file in `dir` and returns the best match per spec
/// §4.4, or `None` if nothing matched (caller turns that into a 404).
/// Ties within a tier are broken by directory-iteration order, since later
/// candidates only replace the current best on a strictly greater score.
pub fn find_best_match(
    dir: &Path,
    env: &ReplayEnv,
    config: &MatcherConfig,
) -> Result<Option<RequestResponse>> {
    let wanted_scheme = if env.https { Scheme::Https } else { Scheme::Http };
    let req_url = strip_hostname_and_www(&env.request_uri);
    let req_q = strip_query(&req_url).to_string();

    let mut candidates: Vec<(RequestResponse, String, String)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let mut file = std::fs::File::open(entry.path())?;
        let record = match retrace_core::codec::read_record(&mut file) {
            Ok(r) => r,
            Err(_) => continue, // a malformed record file is skipped, not fatal to the whole directory
        };

        if record.scheme != wanted_scheme {
            continue;
        }
        if !host_headers_match(env, &record) {
            continue;
        }

        let saved_url = strip_hostname_and_www(&record.request.uri);
        candidates.push((record, req_url.clone(), saved_url));
    }

    let mut best_mm_score = 0usize;
    let mut best_mm_index: Option<usize> = None;
    for (i, (_, req_url, saved_url)) in candidates.iter().enumerate() {
        let saved_q = strip_query(saved_url);
        if req_q == saved_q {
            let score = longest_common_prefix(saved_url, req_url);
            if score > best_mm_score {
                best_mm_score = score;
                best_mm_index = Some(i);
            }
        }
    }

    let chosen_index = if best_mm_score > 0 {
        best_mm_index
    } else {
        tier2_match(&candidates, &req_q, config.tier2)
    };

    let Some(index) = chosen_index else {
        return Ok(None);
    };
    let (record, _, _) = candidates.swap_remove(index);

    if config.check_redirects && redirect_invalidates(env, &record) {
        return Ok(None);
    }

    Ok(Some(record))
}

fn host_headers_match(env: &ReplayEnv, record: &RequestResponse) -> bool {
    match (&env.http_host, record.request.headers.get("host")) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn tier2_match(
    candidates: &[(RequestResponse, String, String)],
    req_q: &str,
    strategy: Tier2Strategy,
) -> Option<usize> {
    match strategy {
        Tier2Strategy::Sift4EditDistance => {
            let req_last = last_path_segment(req_q);
            let mut best_distance = usize::MAX;
            let mut best_index = None;
            for (i, (_, req_url, saved_url)) in candidates.iter().enumerate() {
                let saved_q = strip_query(saved_url);
                if last_path_segment(saved_q) != req_last {
                    continue;
                }
                let distance = sift4(req_url, saved_url, SIFT4_MAX_OFFSET, SIFT4_MAX_DISTANCE);
                if distance < best_distance {
                    best_distance = distance;
                    best_index = Some(i);
                }
            }
            best_index
        }
        Tier2Strategy::LastTokenCommonPrefix => {
            let req_last = last_path_segment(req_q);
            let mut best_score = 0usize;
            let mut best_index = None;
            for (i, (_, _, saved_url)) in candidates.iter().enumerate() {
                let saved_q = strip_query(saved_url);
                let saved_last = last_path_segment(saved_q);
                let score = longest_common_prefix(saved_last, req_last);
                if score > best_score {
                    best_score = score;
                    best_index = Some(i);
                }
            }
            best_index
        }
    }
}

/// spec.md §4.4 "Redirect reconciliation": a 301/302 whose `Location` path
/// equals the request path is treated as an invalid match (score forced to
/// 0), grounded in `replayserver.cc`'s `check_redirect`.
fn redirect_invalidates(env: &ReplayEnv, record: &RequestResponse) -> bool {
    if !matches!(record.response.status, 301 | 302) {
        return false;
    }
    let Some(location) = record.response.headers.get("location") else {
        return false;
    };
    let location_host = retrace_core::url_util::extract_hostname(location);
    let location_path = strip_hostname_and_www(location);
    let request_path = strip_hostname_and_www(&env.request_uri);
    let saved_host = record.request.headers.get("host").unwrap_or("");
    location_path == request_path && location_host == saved_host
}

fn longest_common_prefix(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::codec::write_record;
    use retrace_core::message::{HeaderList, HttpRequest, HttpResponse};

    fn record(uri: &str, host: &str, scheme: Scheme, body: &[u8]) -> RequestResponse {
        let mut headers = HeaderList::new();
        headers.push("Host", host);
        RequestResponse {
            scheme,
            request: HttpRequest {
                method: "GET".into(),
                uri: uri.into(),
                version: "HTTP/1.1".into(),
                headers,
                body: Vec::new(),
                request_id: None,
            },
            response: HttpResponse {
                version: "HTTP/1.1".into(),
                status: 200,
                reason: "OK".into(),
                headers: HeaderList::new(),
                body: body.to_vec(),
            },
        }
    }

    fn write_named(dir: &Path, name: &str, rec: &RequestResponse) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        write_record(&mut f, rec).unwrap();
    }

    fn env(uri: &str, https: bool, host: Option<&str>) -> ReplayEnv {
        ReplayEnv {
            chdir: "/tmp".into(),
            record_path: "/tmp".into(),
            loading_page: None,
            dependency_file: None,
            think_time_file: None,
            request_uri: uri.to_string(),
            request_method: "GET".to_string(),
            server_protocol: "HTTP/1.1".to_string(),
            http_host: host.map(|s| s.to_string()),
            https,
        }
    }

    #[test]
    fn https_host_filter_rejects_scheme_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_named(
            dir.path(),
            "r1",
            &record("/a?x=1", "ex.com", Scheme::Http, b"hello"),
        );
        let e = env("/a?x=1", true, Some("ex.com"));
        let result = find_best_match(dir.path(), &e, &MatcherConfig::default()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn exact_path_match_wins_tier1() {
        let dir = tempfile::tempdir().unwrap();
        write_named(
            dir.path(),
            "r1",
            &record("/a?x=1", "ex.com", Scheme::Http, b"hello"),
        );
        let e = env("/a?x=1", false, Some("ex.com"));
        let result = find_best_match(dir.path(), &e, &MatcherConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(result.response.body, b"hello");
    }

    #[test]
    fn longest_prefix_breaks_ties_between_candidates() {
        let dir = tempfile::tempdir().unwrap();
        write_named(dir.path(), "r1", &record("/a/b/c", "ex.com", Scheme::Http, b"c"));
        write_named(dir.path(), "r2", &record("/a/b/d", "ex.com", Scheme::Http, b"d"));
        let e = env("/a/b/c?q", false, Some("ex.com"));
        let result = find_best_match(dir.path(), &e, &MatcherConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(result.response.body, b"c");
    }

    #[test]
    fn edit_distance_fallback_picks_the_closer_last_segment_match() {
        let dir = tempfile::tempdir().unwrap();
        write_named(
            dir.path(),
            "r1",
            &record("/cdn/old/v123.js", "ex.com", Scheme::Http, b"near"),
        );
        write_named(
            dir.path(),
            "r2",
            &record(
                "/completely/different/tree/of/folders/v123.js",
                "ex.com",
                Scheme::Http,
                b"far",
            ),
        );
        let e = env("/cdn/v123.js", false, Some("ex.com"));
        let result = find_best_match(dir.path(), &e, &MatcherConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(result.response.body, b"near");
    }

    #[test]
    fn no_candidate_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        write_named(
            dir.path(),
            "r1",
            &record("/totally/unrelated/zzz.png", "ex.com", Scheme::Http, b"x"),
        );
        let e = env("/cdn/v123.js", false, Some("ex.com"));
        let result = find_best_match(dir.path(), &e, &MatcherConfig::default()).unwrap();
        assert!(result.is_none());
    }
}
