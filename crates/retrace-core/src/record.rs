use serde::{Deserialize, Serialize};

use crate::message::{HttpRequest, HttpResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn from_https_flag(https: bool) -> Self {
        if https { Scheme::Https } else { Scheme::Http }
    }
}

/// One persisted request/response pair. Created by the recorder on response
/// completion; read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResponse {
    pub scheme: Scheme,
    pub request: HttpRequest,
    pub response: HttpResponse,
}
