//! Client configuration

use std::path::PathBuf;

/// Configuration for a lock service session.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// host:port address of the lock server
    pub address: String,
    /// Don't automatically renew leases before they expire
    pub no_auto_renew: bool,
    /// Use TLS to connect to the server
    pub use_tls: bool,
    /// Don't verify the server's certificate
    pub skip_verify: bool,
    /// Path to a CA certificate file (PEM format)
    pub ca_file: Option<PathBuf>,
    /// Path to a TLS certificate for this client (PEM format)
    pub tls_cert: Option<PathBuf>,
    /// Path to the TLS key for this client (PEM format)
    pub tls_key: Option<PathBuf>,
    /// Shared-secret password sent with every request
    pub password: Option<String>,
    /// Maximum number of retries when the server is unreachable
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Disable automatic lease renewal for locks acquired with a lease
    /// timeout. The caller is then responsible for renewing in time.
    pub fn with_no_auto_renew(mut self) -> Self {
        self.no_auto_renew = true;
        self
    }

    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.use_tls = true;
        self.ca_file = Some(ca_file.into());
        self
    }

    /// Present a client certificate and key. Implies TLS.
    pub fn with_identity(
        mut self,
        tls_cert: impl Into<PathBuf>,
        tls_key: impl Into<PathBuf>,
    ) -> Self {
        self.use_tls = true;
        self.tls_cert = Some(tls_cert.into());
        self.tls_key = Some(tls_key.into());
        self
    }
}
