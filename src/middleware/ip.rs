//! Client identity resolution.
//!
//! The client identity keys rate-limit accounting and fills the
//! `X-Forwarded-For` header sent upstream. It is resolved from the TCP peer
//! address that `axum::serve` records as [`ConnectInfo`].
//!
//! # Trusted Proxies
//!
//! `X-Forwarded-For` and `X-Real-IP` are client-controlled. They are honored
//! only when the TCP peer falls inside one of the `TRUSTED_PROXIES` CIDR
//! ranges. With no ranges configured, forwarded headers are ignored and the
//! peer address is the identity.
//!
//! ```text
//!   peer in TRUSTED_PROXIES?
//!        │
//!    yes ├──▶ X-Forwarded-For (first hop) ─▶ X-Real-IP ─▶ peer IP
//!        │
//!     no └──▶ peer IP
//! ```
//!
//! ## The "unknown" Fallback
//!
//! When the peer address is not available (a service driven without
//! connect info, e.g. in unit tests), all such requests share the
//! `"unknown"` key.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback IP value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Protocol advertised upstream when no trusted proxy says otherwise.
pub const DEFAULT_FORWARDED_PROTO: &str = "http";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as /32 or /128. Returns `None` if the
    /// format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // IPv4-mapped IPv6 peers match IPv4 ranges
            (IpAddr::V4(_), IpAddr::V6(addr)) => addr
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(&IpAddr::V4(v4))),
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Set of networks whose forwarded headers are honored.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    /// Check if any ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if a peer address belongs to a trusted proxy.
    ///
    /// With no ranges configured nothing is trusted.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Header Parsing
// =============================================================================

/// First hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
fn forwarded_ip_from_headers<B>(req: &Request<B>) -> Option<&str> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return Some(first_ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim());
    }

    None
}

/// TCP peer address recorded by `into_make_service_with_connect_info`.
#[inline]
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

// =============================================================================
// Public API
// =============================================================================

/// Resolve the client identity for a request.
///
/// # Returns
///
/// `Cow<'static, str>` - Borrowed for "unknown" (no allocation), owned for actual IPs.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(peer) = peer_addr(req) else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer_ip = peer.ip();

    if trusted.is_trusted(&peer_ip) {
        if let Some(ip) = forwarded_ip_from_headers(req) {
            return Cow::Owned(ip.to_string());
        }
    } else if trusted.is_enabled() && forwarded_ip_from_headers(req).is_some() {
        debug!(
            peer = %peer_ip,
            "Ignoring forwarded client IP header from untrusted peer"
        );
    }

    Cow::Owned(peer_ip.to_string())
}

/// Protocol to advertise in `X-Forwarded-Proto`.
///
/// A trusted proxy's own `X-Forwarded-Proto` wins (it may have terminated
/// TLS); otherwise the gateway's listener protocol is used.
pub fn forwarded_proto<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> String {
    if let Some(peer) = peer_addr(req)
        && trusted.is_trusted(&peer.ip())
        && let Some(value) = req.headers().get("x-forwarded-proto")
        && let Ok(proto) = value.to_str()
        && !proto.trim().is_empty()
    {
        return proto.trim().to_ascii_lowercase();
    }

    req.uri()
        .scheme_str()
        .unwrap_or(DEFAULT_FORWARDED_PROTO)
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_from(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        let mut builder = Request::builder();
        builder
            .extensions_mut()
            .unwrap()
            .insert(ConnectInfo(addr));
        builder
    }

    fn trusted(cidrs: &[&str]) -> TrustedProxyConfig {
        TrustedProxyConfig::new(&cidrs.iter().map(|c| c.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_peer_ip_used_without_trusted_proxies() {
        let req = request_from("203.0.113.7:50000")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();

        // Spoofed header is ignored
        assert_eq!(
            extract_client_ip(&req, &TrustedProxyConfig::default()),
            "203.0.113.7"
        );
    }

    #[test]
    fn test_xff_honored_from_trusted_peer() {
        let req = request_from("10.0.0.5:40000")
            .header("x-forwarded-for", "192.168.1.1, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&req, &trusted(&["10.0.0.0/8"])),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_xff_ignored_from_untrusted_peer() {
        let req = request_from("198.51.100.2:40000")
            .header("x-forwarded-for", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&req, &trusted(&["10.0.0.0/8"])),
            "198.51.100.2"
        );
    }

    #[test]
    fn test_real_ip_fallback_from_trusted_peer() {
        let req = request_from("10.0.0.5:40000")
            .header("x-real-ip", " 192.168.1.9 ")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&req, &trusted(&["10.0.0.0/8"])),
            "192.168.1.9"
        );
    }

    #[test]
    fn test_empty_xff_falls_back_to_peer() {
        let req = request_from("10.0.0.5:40000")
            .header("x-forwarded-for", "   ")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&req, &trusted(&["10.0.0.0/8"])),
            "10.0.0.5"
        );
    }

    #[test]
    fn test_unknown_without_connect_info_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let ip = extract_client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_forwarded_proto_default_http() {
        let req = request_from("203.0.113.7:50000")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_proto(&req, &TrustedProxyConfig::default()), "http");
    }

    #[test]
    fn test_forwarded_proto_from_trusted_proxy() {
        let req = request_from("127.0.0.1:50000")
            .header("x-forwarded-proto", "HTTPS")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_proto(&req, &trusted(&["127.0.0.0/8"])), "https");
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert_eq!(cidr.prefix_len, 8);
    }

    #[test]
    fn test_cidr_parse_ipv6() {
        let cidr = CidrRange::parse("::1/128").unwrap();
        assert_eq!(cidr.prefix_len, 128);
    }

    #[test]
    fn test_cidr_parse_single_ip() {
        let cidr = CidrRange::parse("192.168.1.1").unwrap();
        assert_eq!(cidr.prefix_len, 32);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/8/1").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();

        assert!(cidr.contains(&"10.0.0.1".parse().unwrap()));
        assert!(cidr.contains(&"10.255.255.255".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_cidr_matches_ipv4_mapped_peer() {
        let cidr = CidrRange::parse("127.0.0.0/8").unwrap();
        assert!(cidr.contains(&"::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_empty_trusts_nothing() {
        let config = TrustedProxyConfig::new(&[]);
        assert!(!config.is_enabled());
        assert!(!config.is_trusted(&"10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_skips_invalid() {
        let config = trusted(&["garbage", "172.16.0.0/12"]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"172.31.255.255".parse().unwrap()));
        assert!(!config.is_trusted(&"192.168.1.1".parse().unwrap()));
    }
}
