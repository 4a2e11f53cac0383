//! Synthesizes the fixed-shape HTTP responses replay mode writes on error
//! paths (spec §7): missing configuration, no match, and uncaught failure.

use retrace_core::message::{HeaderList, HttpResponse};

fn plain_text(status: u16, reason: &str, body: String) -> HttpResponse {
    let mut headers = HeaderList::new();
    headers.push("Content-Type", "text/plain");
    HttpResponse {
        version: "HTTP/1.1".into(),
        status,
        reason: reason.into(),
        headers,
        body: body.into_bytes(),
    }
}

/// "Missing-config in replay mode produces an HTTP 500 ... naming the
/// missing variable."
pub fn missing_config(var: &str) -> HttpResponse {
    plain_text(
        500,
        "Internal Server Error",
        format!("retrace-replay: missing environment variable: {var}"),
    )
}

/// "No-match produces an HTTP 404 ... `Cache-Control: max-age=60`."
pub fn no_match() -> HttpResponse {
    let mut response = plain_text(404, "Not Found", "replayserver: could not find a match.".to_string());
    response.headers.push("Cache-Control", "max-age=60");
    response
}

/// "Any uncaught failure in replay mode produces HTTP 500 with the error
/// printed in the body."
pub fn internal_error(err: impl std::fmt::Display) -> HttpResponse {
    plain_text(
        500,
        "Internal Server Error",
        format!("retrace-replay received an error:\n\n{err}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_body_matches_spec_text() {
        let response = no_match();
        assert_eq!(response.status, 404);
        assert_eq!(response.headers.get("Cache-Control"), Some("max-age=60"));
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "replayserver: could not find a match."
        );
    }

    #[test]
    fn missing_config_names_the_variable() {
        let response = missing_config("HTTP_HOST");
        assert_eq!(response.status, 500);
        assert!(String::from_utf8(response.body).unwrap().contains("HTTP_HOST"));
    }
}
