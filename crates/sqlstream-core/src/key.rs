//! Immutable connection identity.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a MySQL endpoint plus credentials.
///
/// Keys are immutable after construction and shared by reference
/// (`Arc<ConnectionKey>`); two keys compare equal iff every field is
/// equal. The password never appears in `Display` output; logging sinks
/// get [`ConnectionKey::password_hash`] instead.
#[derive(Debug, Clone)]
pub struct ConnectionKey {
    host: String,
    port: u16,
    unix_socket_path: String,
    user: String,
    password: String,
    database: String,
    password_hash: u64,
}

impl ConnectionKey {
    /// Create a key for a TCP endpoint.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        let password = password.into();
        let password_hash = hash_str(&password);
        Self {
            host: host.into(),
            port,
            unix_socket_path: String::new(),
            user: user.into(),
            password,
            database: database.into(),
            password_hash,
        }
    }

    /// Create a key for a Unix-socket endpoint.
    pub fn for_unix_socket(
        socket_path: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        let password = password.into();
        let password_hash = hash_str(&password);
        Self {
            host: String::new(),
            port: 0,
            unix_socket_path: socket_path.into(),
            user: user.into(),
            password,
            database: database.into(),
            password_hash,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unix_socket_path(&self) -> &str {
        &self.unix_socket_path
    }

    /// True when this key addresses a Unix socket rather than TCP.
    pub fn uses_unix_socket(&self) -> bool {
        !self.unix_socket_path.is_empty()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// The raw password, consumed by the driver during the handshake.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Stable digest of the password, safe to log.
    pub fn password_hash(&self) -> u64 {
        self.password_hash
    }

    /// `host:port` for TCP keys, the socket path otherwise.
    pub fn endpoint(&self) -> String {
        if self.uses_unix_socket() {
            self.unix_socket_path.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for ConnectionKey {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.unix_socket_path == other.unix_socket_path
            && self.user == other.user
            && self.password == other.password
            && self.database == other.database
    }
}

impl Eq for ConnectionKey {}

impl Hash for ConnectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.unix_socket_path.hash(state);
        self.user.hash(state);
        self.password_hash.hash(state);
        self.database.hash(state);
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.endpoint(), self.user, self.database)
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_covers_all_fields() {
        let a = ConnectionKey::new("db1", 3306, "web", "s3cret", "prod");
        let b = ConnectionKey::new("db1", 3306, "web", "s3cret", "prod");
        let c = ConnectionKey::new("db1", 3306, "web", "other", "prod");
        let d = ConnectionKey::new("db2", 3306, "web", "s3cret", "prod");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn display_never_contains_the_password() {
        let key = ConnectionKey::new("db1", 3306, "web", "s3cret", "prod");
        let shown = key.to_string();
        assert!(shown.contains("db1:3306"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn unix_socket_endpoint() {
        let key = ConnectionKey::for_unix_socket("/run/mysqld.sock", "web", "", "prod");
        assert!(key.uses_unix_socket());
        assert_eq!(key.endpoint(), "/run/mysqld.sock");
        assert_eq!(key.port(), 0);
    }

    #[test]
    fn password_hash_depends_only_on_the_password() {
        let a = ConnectionKey::new("db1", 3306, "web", "s3cret", "prod");
        let b = ConnectionKey::new("db9", 3307, "ops", "s3cret", "test");
        let c = ConnectionKey::new("db1", 3306, "web", "other", "prod");

        assert_eq!(a.password_hash(), b.password_hash());
        assert_ne!(a.password_hash(), c.password_hash());
    }
}
