//! TLS setup for transport sessions.
//!
//! The crypto provider and the trusted CA bundle are initialized once per
//! process. Every later session must ask for the same trust parameters; a
//! session configured with a different CA bundle fails instead of silently
//! using the first one.
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use once_cell::sync::OnceCell;
use rustls::{ClientConfig, RootCertStore};

use crate::error::{ClientError, ClientResult};

/// Trust parameters for TLS sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsConfig {
    /// PEM bundle of CA certificates trusted for the server.
    pub ca_file: PathBuf,
    /// Name checked against the server certificate; defaults to the host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            ca_file: ca_file.into(),
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

static TRUST_STORE: OnceCell<TrustStore> = OnceCell::new();

/// Returns the shared client configuration, initializing it on first use.
pub(crate) fn client_config(tls: &TlsConfig) -> ClientResult<Arc<ClientConfig>> {
    let store = TRUST_STORE.get_or_try_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
        TrustStore::load(&tls.ca_file)
    })?;
    store.matching(tls)
}

struct TrustStore {
    ca_file: PathBuf,
    config: Arc<ClientConfig>,
}

impl TrustStore {
    fn load(ca_file: &Path) -> ClientResult<Self> {
        let roots = load_roots(ca_file)?;
        info!(
            "initialized tls trust store from {:?} ({} certificates)",
            ca_file,
            roots.len()
        );

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            ca_file: ca_file.to_path_buf(),
            config: Arc::new(config),
        })
    }

    fn matching(&self, tls: &TlsConfig) -> ClientResult<Arc<ClientConfig>> {
        if self.ca_file != tls.ca_file {
            return Err(ClientError::Tls(format!(
                "trust store already initialized from {:?}, cannot switch to {:?}",
                self.ca_file, tls.ca_file
            )));
        }
        Ok(Arc::clone(&self.config))
    }
}

fn load_roots(ca_file: &Path) -> ClientResult<RootCertStore> {
    let file = File::open(ca_file)
        .map_err(|e| ClientError::Tls(format!("failed to open {ca_file:?}: {e}")))?;
    let mut reader = BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ClientError::Tls(format!("invalid PEM in {ca_file:?}: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("failed to add CA certificate: {e}")))?;
    }
    debug!("loaded {} trusted roots", roots.len());

    if roots.is_empty() {
        return Err(ClientError::Tls(format!(
            "no certificates found in {ca_file:?}"
        )));
    }
    Ok(roots)
}
