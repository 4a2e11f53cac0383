use std::path::PathBuf;
use std::sync::Arc;

use crate::tls::CertAuthority;
use retrace_serializer::Serializer;

/// Everything a running proxy needs besides the listening socket itself.
pub struct ProxyConfig {
    pub recording_dir: PathBuf,
    pub serializer: Arc<Serializer>,
    pub https: bool,
    pub ca: Option<Arc<CertAuthority>>,
}

impl ProxyConfig {
    pub fn new(recording_dir: PathBuf, serializer: Arc<Serializer>) -> Self {
        Self {
            recording_dir,
            serializer,
            https: false,
            ca: None,
        }
    }

    pub fn with_tls(mut self, ca: Arc<CertAuthority>) -> Self {
        self.https = true;
        self.ca = Some(ca);
        self
    }
}
