use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use crate::utils::error::NetworkError;

/// An immutable IPv4 or IPv6 network address.
///
/// IPv6 addresses carry a zone id (interface scope) so that link-local peers
/// stay routable after a round trip through a string or a socket address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    /// IPv4 address.
    V4(Ipv4Addr),
    /// IPv6 address with its zone id (0 when unscoped).
    V6 {
        address: Ipv6Addr,
        zone_id: u32,
    },
}

impl NetworkAddress {
    /// Returns `true` for an IPv4 address.
    pub fn is_v4(&self) -> bool {
        matches!(self, NetworkAddress::V4(_))
    }

    /// Returns `true` for an IPv6 address.
    pub fn is_v6(&self) -> bool {
        matches!(self, NetworkAddress::V6 { .. })
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(address: Ipv4Addr) -> Self {
        NetworkAddress::V4(address)
    }
}

impl From<Ipv6Addr> for NetworkAddress {
    fn from(address: Ipv6Addr) -> Self {
        NetworkAddress::V6 { address, zone_id: 0 }
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAddress::V4(address) => write!(f, "{}", address),
            NetworkAddress::V6 { address, zone_id: 0 } => write!(f, "{}", address),
            NetworkAddress::V6 { address, zone_id } => write!(f, "{}%{}", address, zone_id),
        }
    }
}

impl FromStr for NetworkAddress {
    type Err = NetworkError;

    /// Parses either address family; IPv6 accepts a trailing `%zone` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(v4) = s.parse::<Ipv4Addr>() {
            return Ok(v4.into());
        }
        let (address, zone) = match s.split_once('%') {
            Some((address, zone)) => {
                let zone_id = zone
                    .parse::<u32>()
                    .map_err(|_| NetworkError::AddressParse(s.to_string()))?;
                (address, zone_id)
            }
            None => (s, 0),
        };
        let address = address
            .parse::<Ipv6Addr>()
            .map_err(|_| NetworkError::AddressParse(s.to_string()))?;
        Ok(NetworkAddress::V6 { address, zone_id: zone })
    }
}

/// An (address, port) pair identifying one side of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NetworkEndpoint {
    pub address: NetworkAddress,
    pub port: u16,
}

impl NetworkEndpoint {
    /// Creates an endpoint from anything convertible to a [`NetworkAddress`].
    pub fn new(address: impl Into<NetworkAddress>, port: u16) -> Self {
        Self { address: address.into(), port }
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            NetworkAddress::V4(_) => write!(f, "{}:{}", self.address, self.port),
            NetworkAddress::V6 { .. } => write!(f, "[{}]:{}", self.address, self.port),
        }
    }
}

impl From<SocketAddr> for NetworkEndpoint {
    /// Converts from a socket address, reporting IPv4-mapped IPv6 peers
    /// (`::ffff:a.b.c.d`, as produced by a dual-stack listen socket) as
    /// plain IPv4 endpoints.
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => NetworkEndpoint::new(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(mapped) => NetworkEndpoint::new(mapped, v6.port()),
                None => NetworkEndpoint {
                    address: NetworkAddress::V6 {
                        address: *v6.ip(),
                        zone_id: v6.scope_id(),
                    },
                    port: v6.port(),
                },
            },
        }
    }
}

impl From<NetworkEndpoint> for SocketAddr {
    fn from(endpoint: NetworkEndpoint) -> Self {
        match endpoint.address {
            NetworkAddress::V4(address) => SocketAddrV4::new(address, endpoint.port).into(),
            NetworkAddress::V6 { address, zone_id } => {
                SocketAddrV6::new(address, endpoint.port, 0, zone_id).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_ipv4() {
        let address: NetworkAddress = "192.168.1.20".parse().unwrap();
        assert_eq!(address, NetworkAddress::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(address.to_string(), "192.168.1.20");
    }

    #[test]
    fn parses_and_formats_ipv6_with_zone() {
        let address: NetworkAddress = "fe80::1%3".parse().unwrap();
        assert_eq!(
            address,
            NetworkAddress::V6 { address: "fe80::1".parse().unwrap(), zone_id: 3 }
        );
        assert_eq!(address.to_string(), "fe80::1%3");

        let unscoped: NetworkAddress = "::1".parse().unwrap();
        assert_eq!(unscoped.to_string(), "::1");
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-an-address".parse::<NetworkAddress>().is_err());
        assert!("fe80::1%zone".parse::<NetworkAddress>().is_err());
    }

    #[test]
    fn normalizes_v4_mapped_socket_addresses() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:8080".parse().unwrap();
        let endpoint = NetworkEndpoint::from(mapped);
        assert_eq!(endpoint, NetworkEndpoint::new(Ipv4Addr::LOCALHOST, 8080));
    }

    #[test]
    fn endpoint_round_trips_through_socket_addr() {
        let endpoint = NetworkEndpoint {
            address: NetworkAddress::V6 { address: "fe80::2".parse().unwrap(), zone_id: 7 },
            port: 502,
        };
        let addr = SocketAddr::from(endpoint);
        assert_eq!(NetworkEndpoint::from(addr), endpoint);
        assert_eq!(endpoint.to_string(), "[fe80::2%7]:502");
    }
}
