//! TLS MITM for port-443 connections: a pre-provisioned CA mints per-host
//! leaf certificates on the fly for the downstream (client-facing) server
//! handshake, while the upstream (origin-facing) client handshake verifies
//! the real origin against the host trust store.
//!
//! The teacher proxies HTTPS by handing `rustls`/`rcgen` to `hudsucker`,
//! which models an explicit CONNECT-based proxy the client knows it's
//! talking to. That doesn't fit here: traffic arrives already DNAT'd, so
//! this module drives `rustls`/`tokio-rustls`/`rcgen` directly instead.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rcgen::{CertificateParams, DistinguishedName, DnType, Issuer, KeyPair};
use retrace_core::error::{CoreError, Result};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// The proxy's signing CA, plus a cache of leaf certs minted for hosts seen
/// so far (re-minting per-connection would be wasteful and would also defeat
/// browsers' session-resumption expectations within a single run).
pub struct CertAuthority {
    issuer: Issuer<'static, KeyPair>,
    ca_der: CertificateDer<'static>,
    leaf_cache: Mutex<HashMap<String, Arc<rustls::sign::CertifiedKey>>>,
}

impl std::fmt::Debug for CertAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertAuthority").finish_non_exhaustive()
    }
}

impl CertAuthority {
    /// Loads a pre-provisioned CA certificate and key from PEM files
    /// (spec §6: "TLS assets ... supplied out-of-band").
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;

        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| CoreError::Tls(format!("parsing CA key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| CoreError::Tls(format!("parsing CA cert: {e}")))?;
        Self::from_parts(params, key_pair)
    }

    /// Generates a fresh, self-signed CA (used only by tests and local
    /// development runs where no CA has been provisioned).
    pub fn generate_ephemeral() -> Result<Self> {
        let key_pair =
            KeyPair::generate().map_err(|e| CoreError::Tls(format!("generating CA key: {e}")))?;
        let mut params = CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "retrace MITM CA");
        params.distinguished_name = name;
        Self::from_parts(params, key_pair)
    }

    fn from_parts(params: CertificateParams, key_pair: KeyPair) -> Result<Self> {
        let ca_cert = params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| CoreError::Tls(format!("self-signing CA: {e}")))?;
        let ca_der = ca_cert.der().clone();
        let issuer = Issuer::new(params, key_pair);

        Ok(Self {
            issuer,
            ca_der,
            leaf_cache: Mutex::new(HashMap::new()),
        })
    }

    fn mint_leaf(&self, host: &str) -> Result<Arc<rustls::sign::CertifiedKey>> {
        let leaf_key = KeyPair::generate()
            .map_err(|e| CoreError::Tls(format!("generating leaf key for {host}: {e}")))?;
        let mut params = CertificateParams::new(vec![host.to_string()])
            .map_err(|e| CoreError::Tls(format!("building leaf params for {host}: {e}")))?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, host);
        params.distinguished_name = name;

        let leaf_cert = params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(|e| CoreError::Tls(format!("signing leaf for {host}: {e}")))?;

        let chain = vec![leaf_cert.der().clone(), self.ca_der.clone()];
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&PrivateKeyDer::Pkcs8(
            PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        ))
        .map_err(|e| CoreError::Tls(format!("loading leaf signing key for {host}: {e}")))?;

        Ok(Arc::new(rustls::sign::CertifiedKey::new(chain, signing_key)))
    }

    fn certified_key_for(&self, host: &str) -> Result<Arc<rustls::sign::CertifiedKey>> {
        if let Some(key) = self.leaf_cache.lock().unwrap().get(host) {
            return Ok(key.clone());
        }
        let key = self.mint_leaf(host)?;
        self.leaf_cache
            .lock()
            .unwrap()
            .insert(host.to_string(), key.clone());
        Ok(key)
    }
}

/// Resolves a client certificate for each incoming handshake based on SNI,
/// minting one lazily per distinct host.
struct SniResolver {
    ca: Arc<CertAuthority>,
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver").finish_non_exhaustive()
    }
}

impl rustls::server::ResolvesServerCert for SniResolver {
    fn resolve(
        &self,
        client_hello: rustls::server::ClientHello,
    ) -> Option<Arc<rustls::sign::CertifiedKey>> {
        let host = client_hello.server_name()?;
        self.ca.certified_key_for(host).ok()
    }
}

/// Builds the downstream (client-facing) TLS acceptor. The same acceptor
/// serves every MITM'd connection; which leaf cert is presented is decided
/// per-handshake by `SniResolver`.
pub fn server_acceptor(ca: Arc<CertAuthority>) -> TlsAcceptor {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver { ca }));
    TlsAcceptor::from(Arc::new(config))
}

/// Builds the upstream (origin-facing) TLS connector, verifying the real
/// origin's certificate against the platform's native trust store.
pub fn client_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Individual malformed platform certs are skipped rather than fatal.
        let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
