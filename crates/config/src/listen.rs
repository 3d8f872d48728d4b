use std::fmt;

/// Host names that count as the local machine when binding.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "::1"];

/// A parsed `host:port` listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl ListenAddr {
    /// Parse `host:port`.
    ///
    /// The host may be empty (becomes `localhost`) or a bracketed IPv6
    /// literal; the port may be empty (becomes 0, an ephemeral port).
    pub fn parse(hostport: &str) -> anyhow::Result<Self> {
        let Some((host, port)) = hostport.rsplit_once(':') else {
            anyhow::bail!("could not split http address {hostport:?}: missing port");
        };
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| anyhow::anyhow!("could not split http address {hostport:?}"))?,
            None if host.contains(':') => {
                anyhow::bail!("could not split http address {hostport:?}: too many colons")
            },
            None => host,
        };
        let host = if host.is_empty() {
            "localhost"
        } else {
            host
        };
        let port = if port.is_empty() {
            0
        } else {
            port.parse::<u16>()
                .map_err(|e| anyhow::anyhow!("invalid port number {port:?}: {e}"))?
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Whether the server should only accept local peers.
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_localhost() {
        let addr = ListenAddr::parse(":7080").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 7080);
        assert!(addr.is_loopback());
    }

    #[test]
    fn empty_port_is_ephemeral() {
        let addr = ListenAddr::parse("0.0.0.0:").unwrap();
        assert_eq!(addr.port, 0);
        assert!(!addr.is_loopback());
    }

    #[test]
    fn ipv6_literal() {
        let addr = ListenAddr::parse("[::1]:80").unwrap();
        assert_eq!(addr.host, "::1");
        assert!(addr.is_loopback());
        assert_eq!(addr.to_string(), "[::1]:80");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ListenAddr::parse("localhost").is_err());
        assert!(ListenAddr::parse("localhost:http").is_err());
        assert!(ListenAddr::parse("localhost:70000").is_err());
        assert!(ListenAddr::parse("::1:80").is_err());
    }
}
