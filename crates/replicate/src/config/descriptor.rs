//! Connection descriptors of the form `user[:password]@host[:port]`.

use crate::error::{ReplicateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default MySQL port used when a descriptor omits one.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Where and as whom to connect.
///
/// Parsed from `user[:password]@host[:port]`. The password may itself contain
/// `@` or `:`; the host part is whatever follows the last `@`. IPv6 hosts are
/// written in brackets (`root@[::1]:3307`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionDescriptor {
    pub user: String,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

impl ConnectionDescriptor {
    /// `host:port`, as used in diagnostics and for same-server checks.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Full descriptor text including the password.
    fn to_descriptor_string(&self) -> String {
        match &self.password {
            Some(pw) => format!("{}:{}@{}", self.user, pw, self.address()),
            None => format!("{}@{}", self.user, self.address()),
        }
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ReplicateError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (credentials, endpoint) = s.rsplit_once('@').ok_or_else(|| {
            ReplicateError::Config(format!(
                "invalid connection descriptor '{}': expected user[:password]@host[:port]",
                redact(s)
            ))
        })?;

        let (user, password) = match credentials.split_once(':') {
            Some((user, pw)) if pw.is_empty() => (user, None),
            Some((user, pw)) => (user, Some(pw.to_string())),
            None => (credentials, None),
        };
        if user.is_empty() {
            return Err(ReplicateError::Config(format!(
                "invalid connection descriptor '{}': user is empty",
                redact(s)
            )));
        }

        let (host, port) = parse_endpoint(endpoint).map_err(|reason| {
            ReplicateError::Config(format!(
                "invalid connection descriptor '{}': {}",
                redact(s),
                reason
            ))
        })?;

        Ok(Self {
            user: user.to_string(),
            password,
            host,
            port,
        })
    }
}

fn parse_endpoint(endpoint: &str) -> std::result::Result<(String, u16), String> {
    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated '[' in host".to_string())?;
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(format!("unexpected '{}' after host", after)),
            },
        }
    } else {
        match endpoint.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (endpoint, None),
        }
    };

    if host.is_empty() {
        return Err("host is empty".to_string());
    }

    let port = match port {
        None => DEFAULT_MYSQL_PORT,
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err(format!("invalid port '{}'", p)),
            Ok(n) => n,
        },
    };

    Ok((host.to_string(), port))
}

/// Blank out anything between the first ':' and the last '@'.
fn redact(s: &str) -> String {
    match (s.find(':'), s.rfind('@')) {
        (Some(colon), Some(at)) if colon < at => {
            format!("{}:[REDACTED]{}", &s[..colon], &s[at..])
        }
        _ => s.to_string(),
    }
}

impl TryFrom<String> for ConnectionDescriptor {
    type Error = ReplicateError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ConnectionDescriptor> for String {
    fn from(value: ConnectionDescriptor) -> Self {
        value.to_descriptor_string()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
