//! Incremental HTTP/1.x framing.
//!
//! `RequestFramer` and `ResponseFramer` each consume arbitrarily-chunked byte
//! buffers and produce a lazy queue of fully parsed messages. Header-line
//! tokenizing is delegated to `httparse`; the state machine that decides how
//! much body to read (`Content-Length` / chunked / EOF-terminated / none at
//! all) is hand-rolled, since RFC 7230 body-size resolution is not something
//! `httparse` does for you.

use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::message::{HeaderList, HttpRequest, HttpResponse};

const MAX_HEADERS: usize = 64;

#[derive(Debug)]
enum BodyMode {
    /// No body at all (HEAD response, 1xx/204/304, or a request with
    /// neither Content-Length nor Transfer-Encoding).
    None,
    Fixed { remaining: usize },
    Chunked(ChunkState),
    /// Response only: read until the peer closes the connection.
    UntilEof,
}

#[derive(Debug)]
enum ChunkState {
    /// Waiting for `<hex-size>\r\n`.
    Size,
    /// Reading `remaining` bytes of chunk data, then a trailing CRLF.
    Data { remaining: usize },
    /// Reading trailer headers after the terminal `0\r\n`.
    Trailer,
    Done,
}

struct InProgress<Meta> {
    meta: Meta,
    headers: HeaderList,
    body: Vec<u8>,
    mode: BodyMode,
}

enum State<Meta> {
    FirstLine,
    Body(InProgress<Meta>),
}

struct RequestMeta {
    method: String,
    uri: String,
    version: String,
}

struct ResponseMeta {
    version: String,
    status: u16,
    reason: String,
}

/// What the `ResponseFramer` needs to know about a request to resolve its
/// paired response's body-size rule (the `new_request_arrived` contract).
#[derive(Debug, Clone, Copy)]
pub struct RequestShape {
    pub is_head: bool,
}

pub struct RequestFramer {
    buf: Vec<u8>,
    state: State<RequestMeta>,
    completed: VecDeque<HttpRequest>,
}

impl Default for RequestFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: State::FirstLine,
            completed: VecDeque::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        self.advance()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn front(&self) -> Option<&HttpRequest> {
        self.completed.front()
    }

    pub fn pop(&mut self) -> Option<HttpRequest> {
        self.completed.pop_front()
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            match &mut self.state {
                State::FirstLine => {
                    let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
                    let mut req = httparse::Request::new(&mut headers_buf);
                    let status = req
                        .parse(&self.buf)
                        .map_err(|e| CoreError::Parse(format!("request line/headers: {e}")))?;
                    let used = match status {
                        httparse::Status::Complete(n) => n,
                        httparse::Status::Partial => return Ok(()),
                    };

                    let method = req.method.unwrap_or("GET").to_string();
                    let uri = req.path.unwrap_or("/").to_string();
                    let version = if req.version == Some(1) {
                        "HTTP/1.1".to_string()
                    } else {
                        "HTTP/1.0".to_string()
                    };
                    let mut headers = HeaderList::new();
                    for h in req.headers.iter() {
                        headers.push(h.name.to_string(), String::from_utf8_lossy(h.value).into_owned());
                    }

                    let mode = if headers.is_chunked() {
                        BodyMode::Chunked(ChunkState::Size)
                    } else if let Some(len) = headers.content_length() {
                        if len == 0 {
                            BodyMode::None
                        } else {
                            BodyMode::Fixed { remaining: len }
                        }
                    } else {
                        BodyMode::None
                    };

                    self.buf.drain(0..used);
                    self.state = State::Body(InProgress {
                        meta: RequestMeta { method, uri, version },
                        headers,
                        body: Vec::new(),
                        mode,
                    });
                }
                State::Body(_) => {
                    if !advance_body(&mut self.state, &mut self.buf, false)? {
                        return Ok(());
                    }
                    let State::Body(progress) = std::mem::replace(&mut self.state, State::FirstLine)
                    else {
                        unreachable!()
                    };
                    self.completed.push_back(HttpRequest {
                        method: progress.meta.method,
                        uri: progress.meta.uri,
                        version: progress.meta.version,
                        headers: progress.headers,
                        body: progress.body,
                        request_id: None,
                    });
                }
            }
        }
    }
}

pub struct ResponseFramer {
    buf: Vec<u8>,
    state: State<ResponseMeta>,
    completed: VecDeque<HttpResponse>,
    /// Body-shape info for requests whose responses haven't started yet,
    /// oldest first. Fed via `new_request_arrived`.
    pending_requests: VecDeque<RequestShape>,
    eof: bool,
}

impl Default for ResponseFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: State::FirstLine,
            completed: VecDeque::new(),
            pending_requests: VecDeque::new(),
            eof: false,
        }
    }

    /// Must be called once per request, in order, before the matching
    /// response can be finalized (see module docs).
    pub fn new_request_arrived(&mut self, req: &HttpRequest) {
        self.pending_requests.push_back(RequestShape { is_head: req.is_head() });
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        self.advance()
    }

    /// Signal that the peer has closed its write side. Finalizes an
    /// EOF-terminated body in progress, if any; otherwise a fatal error if a
    /// known-length body was still pending.
    pub fn eof(&mut self) -> Result<()> {
        self.eof = true;
        self.advance()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn front(&self) -> Option<&HttpResponse> {
        self.completed.front()
    }

    pub fn pop(&mut self) -> Option<HttpResponse> {
        self.completed.pop_front()
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            match &mut self.state {
                State::FirstLine => {
                    let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
                    let mut resp = httparse::Response::new(&mut headers_buf);
                    let status = resp
                        .parse(&self.buf)
                        .map_err(|e| CoreError::Parse(format!("status line/headers: {e}")))?;
                    let used = match status {
                        httparse::Status::Complete(n) => n,
                        httparse::Status::Partial => return Ok(()),
                    };

                    let Some(shape) = self.pending_requests.pop_front() else {
                        return Err(CoreError::Internal(
                            "response arrived with no matching request (new_request_arrived contract violated)".into(),
                        ));
                    };

                    let status_code = resp.code.unwrap_or(200);
                    let reason = resp.reason.unwrap_or("").to_string();
                    let version = if resp.version == Some(1) {
                        "HTTP/1.1".to_string()
                    } else {
                        "HTTP/1.0".to_string()
                    };
                    let mut headers = HeaderList::new();
                    for h in resp.headers.iter() {
                        headers.push(h.name.to_string(), String::from_utf8_lossy(h.value).into_owned());
                    }

                    let mode = if shape.is_head || HttpResponse::status_forbids_body(status_code) {
                        BodyMode::None
                    } else if headers.is_chunked() {
                        BodyMode::Chunked(ChunkState::Size)
                    } else if let Some(len) = headers.content_length() {
                        if len == 0 {
                            BodyMode::None
                        } else {
                            BodyMode::Fixed { remaining: len }
                        }
                    } else {
                        BodyMode::UntilEof
                    };

                    self.buf.drain(0..used);
                    self.state = State::Body(InProgress {
                        meta: ResponseMeta { version, status: status_code, reason },
                        headers,
                        body: Vec::new(),
                        mode,
                    });
                }
                State::Body(_) => {
                    if !advance_body(&mut self.state, &mut self.buf, self.eof)? {
                        return Ok(());
                    }
                    let State::Body(progress) = std::mem::replace(&mut self.state, State::FirstLine)
                    else {
                        unreachable!()
                    };
                    self.completed.push_back(HttpResponse {
                        version: progress.meta.version,
                        status: progress.meta.status,
                        reason: progress.meta.reason,
                        headers: progress.headers,
                        body: progress.body,
                    });
                }
            }
        }
    }
}

/// Drives one message's body state machine as far as the current buffer
/// allows. Returns `Ok(true)` once the body is complete (caller then moves
/// `state` out), `Ok(false)` if more bytes are needed.
fn advance_body<Meta>(state: &mut State<Meta>, buf: &mut Vec<u8>, eof: bool) -> Result<bool> {
    let State::Body(progress) = state else {
        unreachable!("advance_body called outside State::Body")
    };

    loop {
        match &mut progress.mode {
            BodyMode::None => return Ok(true),
            BodyMode::Fixed { remaining } => {
                let take = (*remaining).min(buf.len());
                progress.body.extend_from_slice(&buf[..take]);
                buf.drain(0..take);
                *remaining -= take;
                if *remaining == 0 {
                    return Ok(true);
                }
                if eof {
                    return Err(CoreError::Parse(
                        "peer closed connection mid-body with Content-Length still pending".into(),
                    ));
                }
                return Ok(false);
            }
            BodyMode::UntilEof => {
                progress.body.extend_from_slice(buf);
                buf.clear();
                if eof {
                    return Ok(true);
                }
                return Ok(false);
            }
            BodyMode::Chunked(chunk_state) => match chunk_state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(false);
                    };
                    let line = std::str::from_utf8(&buf[..line_end])
                        .map_err(|_| CoreError::Parse("chunk size line is not UTF-8".into()))?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| CoreError::Parse(format!("invalid chunk size: {size_str:?}")))?;
                    buf.drain(0..line_end + 2);
                    *chunk_state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    let take = (*remaining).min(buf.len());
                    progress.body.extend_from_slice(&buf[..take]);
                    buf.drain(0..take);
                    *remaining -= take;
                    if *remaining > 0 {
                        if eof {
                            return Err(CoreError::Parse(
                                "peer closed connection mid-chunk".into(),
                            ));
                        }
                        return Ok(false);
                    }
                    // Consume the chunk-terminating CRLF.
                    if buf.len() < 2 {
                        if eof {
                            return Err(CoreError::Parse(
                                "peer closed connection before chunk CRLF".into(),
                            ));
                        }
                        return Ok(false);
                    }
                    buf.drain(0..2);
                    *chunk_state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    // The common case: no trailers, just the terminating
                    // CRLF after the `0\r\n` size line.
                    if buf.len() >= 2 && &buf[..2] == b"\r\n" {
                        buf.drain(0..2);
                        *chunk_state = ChunkState::Done;
                        continue;
                    }
                    // Otherwise trailers end at the first blank line; we
                    // don't expose them, just consume up to and including it.
                    let Some(blank) = find_double_crlf(buf) else {
                        if eof {
                            return Err(CoreError::Parse(
                                "peer closed connection mid-trailer".into(),
                            ));
                        }
                        return Ok(false);
                    };
                    buf.drain(0..blank);
                    *chunk_state = ChunkState::Done;
                }
                ChunkState::Done => return Ok(true),
            },
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_content_length_round_trip() {
        let mut framer = RequestFramer::new();
        let msg = b"POST /a?x=1 HTTP/1.1\r\nHost: ex.com\r\nContent-Length: 5\r\n\r\nhello";
        for chunk in msg.chunks(3) {
            framer.feed(chunk).unwrap();
        }
        let req = framer.pop().expect("one complete request");
        assert_eq!(req.method, "POST");
        assert_eq!(req.uri, "/a?x=1");
        assert_eq!(req.body, b"hello");
        assert_eq!(req.headers.get("Host"), Some("ex.com"));
    }

    #[test]
    fn request_with_no_body_markers_has_empty_body() {
        let mut framer = RequestFramer::new();
        framer.feed(b"GET / HTTP/1.1\r\nHost: ex.com\r\n\r\n").unwrap();
        let req = framer.pop().unwrap();
        assert!(req.body.is_empty());
    }

    #[test]
    fn response_chunked_body() {
        let mut framer = ResponseFramer::new();
        framer.new_request_arrived(&HttpRequest {
            method: "GET".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: HeaderList::new(),
            body: Vec::new(),
            request_id: None,
        });
        let msg = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        for chunk in msg.chunks(7) {
            framer.feed(chunk).unwrap();
        }
        let resp = framer.pop().expect("one complete response");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn response_head_request_has_no_body_despite_content_length() {
        let mut framer = ResponseFramer::new();
        framer.new_request_arrived(&HttpRequest {
            method: "HEAD".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: HeaderList::new(),
            body: Vec::new(),
            request_id: None,
        });
        framer
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n")
            .unwrap();
        let resp = framer.pop().expect("HEAD response completes with no body bytes");
        assert!(resp.body.is_empty());
    }

    #[test]
    fn response_204_has_no_body() {
        let mut framer = ResponseFramer::new();
        framer.new_request_arrived(&HttpRequest {
            method: "POST".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: HeaderList::new(),
            body: Vec::new(),
            request_id: None,
        });
        framer.feed(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        let resp = framer.pop().expect("204 completes immediately");
        assert!(resp.body.is_empty());
    }

    #[test]
    fn response_eof_terminated_body() {
        let mut framer = ResponseFramer::new();
        framer.new_request_arrived(&HttpRequest {
            method: "GET".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: HeaderList::new(),
            body: Vec::new(),
            request_id: None,
        });
        framer.feed(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(framer.is_empty());
        framer.feed(b"partial-bo").unwrap();
        assert!(framer.is_empty());
        framer.feed(b"dy").unwrap();
        assert!(framer.is_empty());
        framer.eof().unwrap();
        let resp = framer.pop().expect("EOF finalizes the body");
        assert_eq!(resp.body, b"partial-body");
    }

    #[test]
    fn response_without_matching_request_is_an_internal_error() {
        let mut framer = ResponseFramer::new();
        let err = framer.feed(b"HTTP/1.1 200 OK\r\n\r\n").unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[test]
    fn fatal_eof_mid_content_length_body() {
        let mut framer = ResponseFramer::new();
        framer.new_request_arrived(&HttpRequest {
            method: "GET".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: HeaderList::new(),
            body: Vec::new(),
            request_id: None,
        });
        framer
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap();
        assert!(framer.eof().is_err());
    }
}
