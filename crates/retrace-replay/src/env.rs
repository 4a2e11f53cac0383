//! CGI-style environment variable parsing for replay mode (spec §6).

use std::env;
use std::path::PathBuf;

use retrace_core::error::{CoreError, Result};

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| CoreError::MissingConfig(name.to_string()))
}

/// The replay server's entire configuration surface: a flat set of CGI
/// environment variables set by the surrounding reverse proxy (Apache/H2O,
/// out of scope here per spec §1).
pub struct ReplayEnv {
    pub chdir: PathBuf,
    pub record_path: PathBuf,
    pub loading_page: Option<String>,
    pub dependency_file: Option<PathBuf>,
    /// spec.md §6's "server-think-time file" input. Not a CGI variable the
    /// original implementation defines; named here after `DEPENDENCY_FILE`'s
    /// convention (see DESIGN.md).
    pub think_time_file: Option<PathBuf>,
    pub request_uri: String,
    pub request_method: String,
    pub server_protocol: String,
    pub http_host: Option<String>,
    pub https: bool,
}

impl ReplayEnv {
    /// Reads the full set from the process environment. Fails on the first
    /// missing *required* variable (`MAHIMAHI_CHDIR`, `MAHIMAHI_RECORD_PATH`,
    /// `REQUEST_URI`, `REQUEST_METHOD`, `SERVER_PROTOCOL`); `LOADING_PAGE`,
    /// `DEPENDENCY_FILE`, `THINK_TIME_FILE`, `HTTP_HOST` and `HTTPS` are
    /// optional per spec §4.4/§6.
    pub fn from_process_env() -> Result<Self> {
        Ok(Self {
            chdir: PathBuf::from(required("MAHIMAHI_CHDIR")?),
            record_path: PathBuf::from(required("MAHIMAHI_RECORD_PATH")?),
            loading_page: env::var("LOADING_PAGE").ok(),
            dependency_file: env::var("DEPENDENCY_FILE")
                .ok()
                .filter(|v| v != "None")
                .map(PathBuf::from),
            think_time_file: env::var("THINK_TIME_FILE")
                .ok()
                .filter(|v| v != "None")
                .map(PathBuf::from),
            request_uri: required("REQUEST_URI")?,
            request_method: required("REQUEST_METHOD")?,
            server_protocol: required("SERVER_PROTOCOL")?,
            http_host: env::var("HTTP_HOST").ok(),
            https: env::var("HTTPS").is_ok(),
        })
    }

    /// `<method> <uri> <protocol>`, used by the matcher's URL extraction the
    /// same way `replayserver.cc`'s `request_line` is.
    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.request_method, self.request_uri, self.server_protocol)
    }

    /// Reconstructs the full URL the request targeted, for think-time lookup
    /// and dependency-file keys (`scheme://host<path>`).
    pub fn full_url(&self) -> String {
        let scheme = if self.https { "https://" } else { "http://" };
        let host = self.http_host.as_deref().unwrap_or("");
        format!("{scheme}{host}{}", self.request_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_matches_cgi_shape() {
        let env = ReplayEnv {
            chdir: PathBuf::from("/tmp"),
            record_path: PathBuf::from("/tmp/records"),
            loading_page: None,
            dependency_file: None,
            think_time_file: None,
            request_uri: "/a?x=1".to_string(),
            request_method: "GET".to_string(),
            server_protocol: "HTTP/1.1".to_string(),
            http_host: Some("ex.com".to_string()),
            https: false,
        };
        assert_eq!(env.request_line(), "GET /a?x=1 HTTP/1.1");
        assert_eq!(env.full_url(), "http://ex.com/a?x=1");
    }

    #[test]
    fn https_presence_is_flag_only() {
        let env = ReplayEnv {
            chdir: PathBuf::from("/tmp"),
            record_path: PathBuf::from("/tmp/records"),
            loading_page: None,
            dependency_file: None,
            think_time_file: None,
            request_uri: "/".to_string(),
            request_method: "GET".to_string(),
            server_protocol: "HTTP/1.1".to_string(),
            http_host: Some("ex.com".to_string()),
            https: true,
        };
        assert_eq!(env.full_url(), "https://ex.com/");
    }
}
