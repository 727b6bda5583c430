//! Discovery of this host's outward-facing address per IP family.

use crate::error::{NodeError, Result};
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    /// Wildcard address of this family, used when binding listeners.
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn matches(self, addr: &SocketAddr) -> bool {
        AddressFamily::of(&addr.ip()) == self
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Resolves the address peers should use to reach this host.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, family: AddressFamily) -> Result<IpAddr>;
}

/// Asks the OS routing table which local address would be used to reach a
/// public host. Connecting a UDP socket sends no packets.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    v4_probe: SocketAddr,
    v6_probe: SocketAddr,
}

impl Default for RouteResolver {
    fn default() -> Self {
        Self {
            v4_probe: SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 80)),
            v6_probe: SocketAddr::from((
                Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111),
                80,
            )),
        }
    }
}

impl RouteResolver {
    pub fn new(v4_probe: SocketAddr, v6_probe: SocketAddr) -> Self {
        Self { v4_probe, v6_probe }
    }

    fn probe(&self, family: AddressFamily) -> std::io::Result<IpAddr> {
        let target = match family {
            AddressFamily::V4 => self.v4_probe,
            AddressFamily::V6 => self.v6_probe,
        };
        let socket = UdpSocket::bind(SocketAddr::new(family.unspecified(), 0))?;
        socket.connect(target)?;
        Ok(socket.local_addr()?.ip())
    }
}

impl AddressResolver for RouteResolver {
    fn resolve(&self, family: AddressFamily) -> Result<IpAddr> {
        let ip = self
            .probe(family)
            .map_err(|e| NodeError::AddressUnavailable {
                family,
                reason: e.to_string(),
            })?;
        if !is_reachable(&ip) {
            return Err(NodeError::AddressUnavailable {
                family,
                reason: format!("{} is not reachable from other hosts", ip),
            });
        }
        Ok(ip)
    }
}

/// Rejects addresses no remote peer could dial back.
pub fn is_reachable(ip: &IpAddr) -> bool {
    if ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => {
            let link_local = Ipv4Network::new(Ipv4Addr::new(169, 254, 0, 0), 16)
                .map(|net| net.contains(*v4))
                .unwrap_or(false);
            !link_local && !v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let link_local = Ipv6Network::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10)
                .map(|net| net.contains(*v6))
                .unwrap_or(false);
            !link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_filter() {
        assert!(!is_reachable(&"127.0.0.1".parse().unwrap()));
        assert!(!is_reachable(&"0.0.0.0".parse().unwrap()));
        assert!(!is_reachable(&"169.254.10.1".parse().unwrap()));
        assert!(!is_reachable(&"::1".parse().unwrap()));
        assert!(!is_reachable(&"fe80::1".parse().unwrap()));
        assert!(is_reachable(&"192.168.1.20".parse().unwrap()));
        assert!(is_reachable(&"203.0.113.7".parse().unwrap()));
        assert!(is_reachable(&"2001:db8::42".parse().unwrap()));
    }

    #[test]
    fn test_family_helpers() {
        assert_eq!(AddressFamily::of(&"10.0.0.1".parse().unwrap()), AddressFamily::V4);
        assert_eq!(AddressFamily::of(&"::1".parse().unwrap()), AddressFamily::V6);
        assert!(AddressFamily::V6.matches(&"[::1]:9981".parse().unwrap()));
        assert!(!AddressFamily::V4.matches(&"[::1]:9981".parse().unwrap()));
        assert_eq!(AddressFamily::V4.to_string(), "IPv4");
    }

    #[test]
    fn test_loopback_probe_is_rejected() {
        let resolver = RouteResolver::new(
            "127.0.0.1:9".parse().unwrap(),
            "[::1]:9".parse().unwrap(),
        );
        let err = resolver.resolve(AddressFamily::V4).unwrap_err();
        assert!(matches!(
            err,
            NodeError::AddressUnavailable {
                family: AddressFamily::V4,
                ..
            }
        ));
    }
}
