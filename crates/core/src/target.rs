//! Broker connection targets.
//!
//! Accepts `mqtt://host[:port]`, `tcp://host[:port]` or a bare
//! `host[:port]`. The default port is 1883.

use std::fmt;

use crate::error::CoreError;

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Parsed host/port pair for a broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerTarget {
    pub host: String,
    pub port: u16,
}

impl BrokerTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        let rest = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
            None => trimmed,
        };
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, port)
            }
            None => (authority, DEFAULT_BROKER_PORT),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mqtt://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_url_with_port() {
        let target = BrokerTarget::parse("mqtt://broker.local:1884").unwrap();
        assert_eq!(target, BrokerTarget::new("broker.local", 1884));
    }

    #[test]
    fn defaults_port() {
        let target = BrokerTarget::parse("tcp://broker").unwrap();
        assert_eq!(target.port, DEFAULT_BROKER_PORT);
    }

    #[test]
    fn parses_bare_host() {
        let target = BrokerTarget::parse("localhost:1883").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.to_string(), "mqtt://localhost:1883");
    }

    #[test]
    fn rejects_bad_input() {
        assert_matches!(
            BrokerTarget::parse("http://host:80"),
            Err(CoreError::InvalidTarget { .. })
        );
        assert_matches!(
            BrokerTarget::parse("mqtt://host:notaport"),
            Err(CoreError::InvalidTarget { .. })
        );
        assert_matches!(BrokerTarget::parse("mqtt://:1883"), Err(CoreError::InvalidTarget { .. }));
    }
}
