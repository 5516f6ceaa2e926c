//! Connection configuration.
//!
//! [`ConnectionOptions`] carries everything a connect attempt needs:
//! timeouts, retry budget, connect attributes, compression, TLS, SNI,
//! DSCP, and certificate validation. Options are frozen for the duration
//! of an operation once `run()` is called; the operation setters enforce
//! the state window.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Wire compression codecs a driver may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Zlib,
    Zstd,
    Lz4,
}

impl CompressionAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            CompressionAlgorithm::Zlib => "zlib",
            CompressionAlgorithm::Zstd => "zstd",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

/// Opaque TLS configuration handle.
///
/// TLS library bindings live in the driver; the engine only threads the
/// provider through to the connection and asks it to store an
/// established session for reuse. Drivers downcast through `as_any`.
pub trait SslOptionsProvider: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Server certificate material handed to the validation callback.
#[derive(Debug, Clone)]
pub struct ServerCert {
    der: Vec<u8>,
}

impl ServerCert {
    pub fn new(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// DER-encoded certificate bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Context handed to a certificate validation callback.
pub enum CertValidationContext<'a> {
    /// The connect operation itself, when the operation-as-context flag
    /// was set.
    Operation(&'a crate::connect::ConnectOperation),
    /// The user-supplied context value.
    User(&'a (dyn Any + Send + Sync)),
    /// No context was configured.
    None,
}

/// Validation callback: return true when the certificate is acceptable.
/// An error description may be written through `error_out`.
pub type CertValidatorCallback =
    Arc<dyn Fn(&ServerCert, CertValidationContext<'_>, &mut Option<String>) -> bool + Send + Sync>;

/// Certificate validation configuration.
#[derive(Clone)]
pub struct CertValidationOptions {
    pub(crate) callback: CertValidatorCallback,
    pub(crate) context: Option<Arc<dyn Any + Send + Sync>>,
    /// Hand the operation itself to the callback instead of `context`.
    pub(crate) op_as_context: bool,
}

impl CertValidationOptions {
    pub fn new(callback: CertValidatorCallback) -> Self {
        Self {
            callback,
            context: None,
            op_as_context: false,
        }
    }

    pub fn with_context(mut self, context: Arc<dyn Any + Send + Sync>) -> Self {
        self.context = Some(context);
        self
    }

    /// Pass the operation as the callback context.
    pub fn with_operation_as_context(mut self) -> Self {
        self.op_as_context = true;
        self
    }
}

impl fmt::Debug for CertValidationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertValidationOptions")
            .field("op_as_context", &self.op_as_context)
            .field("has_context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

/// Connection configuration record.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Per-attempt timeout
    timeout: Duration,
    /// Default timeout for queries issued on the established connection
    query_timeout: Duration,
    /// Budget across all connect attempts; defaults to `timeout`
    total_timeout: Option<Duration>,
    /// TCP-handshake-only timeout; `None` falls back to the client
    /// default, zero disables
    connect_tcp_timeout: Option<Duration>,
    /// Number of connect attempts, >= 1
    connect_attempts: u32,
    /// MySQL connect attributes
    attributes: HashMap<String, String>,
    compression: Option<CompressionAlgorithm>,
    ssl_options_provider: Option<Arc<dyn SslOptionsProvider>>,
    sni_server_name: Option<String>,
    dscp: Option<u8>,
    cert_validation: Option<CertValidationOptions>,
    reset_conn_before_close: bool,
    delayed_reset_conn: bool,
    change_user_enabled: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(1),
            total_timeout: None,
            connect_tcp_timeout: None,
            connect_attempts: 1,
            attributes: HashMap::new(),
            compression: None,
            ssl_options_provider: None,
            sni_server_name: None,
            dscp: None,
            cert_validation: None,
            reset_conn_before_close: false,
            delayed_reset_conn: false,
            change_user_enabled: false,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default timeout for subsequent queries.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the budget across all connect attempts.
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Set the TCP-handshake-only timeout. Zero disables it.
    pub fn connect_tcp_timeout(mut self, timeout: Duration) -> Self {
        self.connect_tcp_timeout = Some(timeout);
        self
    }

    /// Set the number of connect attempts (minimum 1).
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    /// Add one MySQL connect attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace the connect attribute map.
    pub fn attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.compression = Some(algorithm);
        self
    }

    pub fn ssl_options_provider(mut self, provider: Arc<dyn SslOptionsProvider>) -> Self {
        self.ssl_options_provider = Some(provider);
        self
    }

    pub fn sni_server_name(mut self, name: impl Into<String>) -> Self {
        self.sni_server_name = Some(name.into());
        self
    }

    /// Set the DSCP code point (0-63).
    pub fn dscp(mut self, dscp: u8) -> Self {
        debug_assert!(dscp <= 63, "DSCP code points are 6 bits");
        self.dscp = Some(dscp);
        self
    }

    pub fn cert_validation(mut self, options: CertValidationOptions) -> Self {
        self.cert_validation = Some(options);
        self
    }

    /// Issue a session reset before the connection is closed.
    pub fn reset_conn_before_close(mut self) -> Self {
        self.reset_conn_before_close = true;
        self
    }

    /// Defer the close-time reset instead of blocking on it.
    pub fn delayed_reset_conn(mut self) -> Self {
        self.delayed_reset_conn = true;
        self
    }

    /// Allow `change_user` on the established connection.
    pub fn change_user_enabled(mut self) -> Self {
        self.change_user_enabled = true;
        self
    }

    // -- accessors ---------------------------------------------------

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Total budget across attempts; defaults to the per-attempt value.
    pub fn get_total_timeout(&self) -> Duration {
        self.total_timeout.unwrap_or(self.timeout)
    }

    pub fn get_connect_tcp_timeout(&self) -> Option<Duration> {
        self.connect_tcp_timeout
    }

    pub fn get_connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn get_attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn get_compression(&self) -> Option<CompressionAlgorithm> {
        self.compression
    }

    pub fn get_ssl_options_provider(&self) -> Option<&Arc<dyn SslOptionsProvider>> {
        self.ssl_options_provider.as_ref()
    }

    pub fn get_sni_server_name(&self) -> Option<&str> {
        self.sni_server_name.as_deref()
    }

    pub fn get_dscp(&self) -> Option<u8> {
        self.dscp
    }

    pub fn get_cert_validation(&self) -> Option<&CertValidationOptions> {
        self.cert_validation.as_ref()
    }

    pub fn is_reset_conn_before_close(&self) -> bool {
        self.reset_conn_before_close
    }

    pub fn is_delayed_reset_conn(&self) -> bool {
        self.delayed_reset_conn
    }

    pub fn is_change_user_enabled(&self) -> bool {
        self.change_user_enabled
    }

    // -- in-place mutators used by operation setters -----------------

    pub(crate) fn set_timeout_value(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_query_timeout_value(&mut self, timeout: Duration) {
        self.query_timeout = timeout;
    }

    pub(crate) fn set_total_timeout_value(&mut self, timeout: Duration) {
        self.total_timeout = Some(timeout);
    }

    pub(crate) fn set_connect_tcp_timeout_value(&mut self, timeout: Duration) {
        self.connect_tcp_timeout = Some(timeout);
    }

    pub(crate) fn set_connect_attempts_value(&mut self, attempts: u32) {
        self.connect_attempts = attempts.max(1);
    }

    pub(crate) fn set_attributes_value(&mut self, attributes: HashMap<String, String>) {
        self.attributes = attributes;
    }

    pub(crate) fn set_compression_value(&mut self, algorithm: CompressionAlgorithm) {
        self.compression = Some(algorithm);
    }

    pub(crate) fn set_ssl_provider_value(&mut self, provider: Arc<dyn SslOptionsProvider>) {
        self.ssl_options_provider = Some(provider);
    }

    pub(crate) fn set_sni_server_name_value(&mut self, name: String) {
        self.sni_server_name = Some(name);
    }

    pub(crate) fn set_dscp_value(&mut self, dscp: u8) {
        self.dscp = Some(dscp);
    }

    pub(crate) fn set_cert_validation_value(&mut self, options: CertValidationOptions) {
        self.cert_validation = Some(options);
    }

    pub(crate) fn enable_reset_conn_before_close(&mut self) {
        self.reset_conn_before_close = true;
    }

    pub(crate) fn enable_delayed_reset_conn(&mut self) {
        self.delayed_reset_conn = true;
    }

    pub(crate) fn enable_change_user(&mut self) {
        self.change_user_enabled = true;
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("timeout", &self.timeout)
            .field("query_timeout", &self.query_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("connect_tcp_timeout", &self.connect_tcp_timeout)
            .field("connect_attempts", &self.connect_attempts)
            .field("attributes", &self.attributes)
            .field("compression", &self.compression)
            .field("has_ssl_provider", &self.ssl_options_provider.is_some())
            .field("sni_server_name", &self.sni_server_name)
            .field("dscp", &self.dscp)
            .field("has_cert_validation", &self.cert_validation.is_some())
            .field("reset_conn_before_close", &self.reset_conn_before_close)
            .field("delayed_reset_conn", &self.delayed_reset_conn)
            .field("change_user_enabled", &self.change_user_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trip() {
        let opts = ConnectionOptions::new()
            .timeout(Duration::from_millis(500))
            .query_timeout(Duration::from_secs(5))
            .total_timeout(Duration::from_secs(3))
            .connect_attempts(3)
            .attribute("program_name", "sqlstream-tests")
            .compression(CompressionAlgorithm::Zstd)
            .sni_server_name("db.internal")
            .dscp(46);

        assert_eq!(opts.get_timeout(), Duration::from_millis(500));
        assert_eq!(opts.get_query_timeout(), Duration::from_secs(5));
        assert_eq!(opts.get_total_timeout(), Duration::from_secs(3));
        assert_eq!(opts.get_connect_attempts(), 3);
        assert_eq!(
            opts.get_attributes().get("program_name"),
            Some(&"sqlstream-tests".to_string())
        );
        assert_eq!(opts.get_compression(), Some(CompressionAlgorithm::Zstd));
        assert_eq!(opts.get_sni_server_name(), Some("db.internal"));
        assert_eq!(opts.get_dscp(), Some(46));
    }

    #[test]
    fn total_timeout_defaults_to_per_attempt() {
        let opts = ConnectionOptions::new().timeout(Duration::from_millis(250));
        assert_eq!(opts.get_total_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn connect_attempts_floor_is_one() {
        let opts = ConnectionOptions::new().connect_attempts(0);
        assert_eq!(opts.get_connect_attempts(), 1);
    }

    #[test]
    fn compression_names() {
        assert_eq!(CompressionAlgorithm::Zlib.name(), "zlib");
        assert_eq!(CompressionAlgorithm::Zstd.name(), "zstd");
        assert_eq!(CompressionAlgorithm::Lz4.name(), "lz4");
    }
}
