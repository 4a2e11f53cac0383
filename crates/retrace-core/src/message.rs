use serde::{Deserialize, Serialize};

/// A single HTTP header, preserving the casing it arrived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// An ordered header list with case-insensitive lookup. Order is preserved
/// on construction and on `push`; `remove` deletes every header matching the
/// name case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<Header>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.get("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

/// A parsed HTTP request. Immutable after parse except for explicit header
/// add/remove operations (the replay matcher mutates response headers, not
/// request headers, but the same invariant applies to both message kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    /// Assigned by the serializer on admission; absent until then.
    pub request_id: Option<u64>,
}

impl HttpRequest {
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Reconstructs the absolute-ish URL used for matching/priority lookups:
    /// `scheme://host` + the request path, or just the request-target if it
    /// is already absolute (proxy-form requests carry an absolute URI).
    pub fn url(&self, https: bool) -> String {
        if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            return self.uri.clone();
        }
        let scheme = if https { "https" } else { "http" };
        let host = self.headers.get("host").unwrap_or("unknown");
        format!("{scheme}://{host}{}", self.uri)
    }

    pub fn first_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }
}

/// A parsed HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn first_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    /// RFC 7230 §3.3.3 body-size rule for status codes with no body,
    /// independent of whether Content-Length/Transfer-Encoding is present.
    pub fn status_forbids_body(status: u16) -> bool {
        matches!(status, 100..=199 | 204 | 304)
    }

    /// Serialize to the wire form (status line + headers + CRLFCRLF + body),
    /// setting Content-Length to the actual body length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        out.extend_from_slice(self.first_line().as_bytes());
        out.extend_from_slice(b"\r\n");
        for h in self.headers.iter() {
            if h.name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            out.extend_from_slice(h.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(h.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
