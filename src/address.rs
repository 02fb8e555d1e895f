/*! Where a FastCGI backend listens.
 *
 * Backends are addressed by `host:port`, the same string identifies
 * the backend's slot in the [`ConPool`](crate::client::con_pool::ConPool).
*/

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct BackendAddress {
    host: String,
    port: u16,
}

#[derive(Debug, Error)]
pub enum AddrParseError {
    #[error("missing ':' between host and port in {0:?}")]
    NoPort(String),
    #[error("empty host in {0:?}")]
    NoHost(String),
    #[error("bad port: {0}")]
    BadPort(#[from] ParseIntError),
}

impl BackendAddress {
    pub fn new<H: Into<String>>(host: H, port: u16) -> BackendAddress {
        BackendAddress {
            host: host.into(),
            port,
        }
    }
    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    /// Identity of this backend inside the pool
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BackendAddress {
    type Err = AddrParseError;

    /// the port is everything after the last `:`
    fn from_str(s: &str) -> Result<BackendAddress, AddrParseError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddrParseError::NoPort(s.to_owned()))?;
        if host.is_empty() {
            return Err(AddrParseError::NoHost(s.to_owned()));
        }
        Ok(BackendAddress::new(host, port.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_host_colon_port() {
        let a = BackendAddress::new("127.0.0.1", 9010);
        assert_eq!(a.key(), "127.0.0.1:9010");
        assert_eq!(a.host(), "127.0.0.1");
        assert_eq!(a.port(), 9010);
    }

    #[test]
    fn parse() {
        let a: BackendAddress = "php-fpm.local:9000".parse().unwrap();
        assert_eq!(a, BackendAddress::new("php-fpm.local", 9000));
        let a: BackendAddress = "::1:9000".parse().unwrap();
        assert_eq!(a.host(), "::1");
        assert!("localhost".parse::<BackendAddress>().is_err());
        assert!(":9000".parse::<BackendAddress>().is_err());
        assert!("localhost:http".parse::<BackendAddress>().is_err());
        assert!("localhost:70000".parse::<BackendAddress>().is_err());
    }
}
