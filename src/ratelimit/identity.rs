//! Identity key derivation.

use std::fmt;
use std::net::IpAddr;

/// Header carrying the caller's API token (sent as `API_KEY`; header names
/// are case-insensitive and stored lowercase).
pub const API_KEY_HEADER: &str = "api_key";

/// Suffix appended to an identity key to name its block-marker series.
pub const BLOCK_SUFFIX: &str = "_block";

/// The request attributes a limiter may key on.
///
/// This is all the transport layer has to hand over; limiters never see the
/// request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Peer address of the connection, if known
    pub remote_addr: Option<IpAddr>,
    /// Value of the `API_KEY` header, if present
    pub api_key: Option<String>,
}

impl RequestIdentity {
    pub fn new(remote_addr: Option<IpAddr>, api_key: Option<String>) -> Self {
        Self {
            remote_addr,
            api_key,
        }
    }

    /// Identity with only a peer address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self::new(Some(ip), None)
    }
}

/// An identity dimension a limiter partitions counters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Peer IP address
    Ip,
    /// API token from the `API_KEY` header
    Token,
}

impl Dimension {
    /// Fixed prefix that namespaces keys of this dimension.
    pub fn prefix(&self) -> &'static str {
        match self {
            Dimension::Ip => "IP_",
            Dimension::Token => "TOKEN_",
        }
    }

    /// Short lowercase name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Ip => "ip",
            Dimension::Token => "token",
        }
    }

    /// Derive this dimension's key for a request.
    ///
    /// Returns `None` when the request carries nothing for this dimension:
    /// no peer address, or a missing or empty token.
    pub fn derive(&self, request: &RequestIdentity) -> Option<IdentityKey> {
        match self {
            Dimension::Ip => request
                .remote_addr
                .map(|ip| IdentityKey::new(*self, &ip.to_string())),
            Dimension::Token => request
                .api_key
                .as_deref()
                .filter(|token| !token.is_empty())
                .map(|token| IdentityKey::new(*self, token)),
        }
    }

    /// Key used when nothing could be derived for this dimension.
    pub fn unknown(&self) -> IdentityKey {
        IdentityKey::new(*self, "unknown")
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A namespaced counter key such as `IP_10.0.0.1` or `TOKEN_abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(dimension: Dimension, raw: &str) -> Self {
        Self(format!("{}{}", dimension.prefix(), raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the series that records block triggers for this identity.
    pub fn block_key(&self) -> String {
        format!("{}{}", self.0, BLOCK_SUFFIX)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_ip_key() {
        let request = RequestIdentity::from_ip(ip(192, 168, 0, 7));
        let key = Dimension::Ip.derive(&request).unwrap();
        assert_eq!(key.as_str(), "IP_192.168.0.7");
    }

    #[test]
    fn test_token_key() {
        let request = RequestIdentity::new(None, Some("SomeToken".to_string()));
        let key = Dimension::Token.derive(&request).unwrap();
        assert_eq!(key.as_str(), "TOKEN_SomeToken");
    }

    #[test]
    fn test_empty_token_yields_nothing() {
        let request = RequestIdentity::new(Some(ip(1, 2, 3, 4)), Some(String::new()));
        assert!(Dimension::Token.derive(&request).is_none());

        let request = RequestIdentity::from_ip(ip(1, 2, 3, 4));
        assert!(Dimension::Token.derive(&request).is_none());
    }

    #[test]
    fn test_missing_address_yields_nothing() {
        let request = RequestIdentity::default();
        assert!(Dimension::Ip.derive(&request).is_none());
        assert_eq!(Dimension::Ip.unknown().as_str(), "IP_unknown");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let request = RequestIdentity::new(Some(ip(10, 0, 0, 1)), Some("t".to_string()));
        assert_eq!(
            Dimension::Ip.derive(&request),
            Dimension::Ip.derive(&request.clone())
        );
        assert_eq!(
            Dimension::Token.derive(&request),
            Dimension::Token.derive(&request.clone())
        );
    }

    #[test]
    fn test_dimensions_never_collide() {
        // A token that looks like an address still lands in its own namespace.
        let request = RequestIdentity::new(Some(ip(10, 0, 0, 1)), Some("10.0.0.1".to_string()));
        let by_ip = Dimension::Ip.derive(&request).unwrap();
        let by_token = Dimension::Token.derive(&request).unwrap();
        assert_ne!(by_ip, by_token);
    }

    #[test]
    fn test_block_key() {
        let key = IdentityKey::new(Dimension::Ip, "10.0.0.1");
        assert_eq!(key.block_key(), "IP_10.0.0.1_block");
    }
}
