//! Throttle key derivation from network addresses.
//!
//! The throttler treats any `u64` as an independent bucket; these helpers
//! give callers a stable key per client address.
//!
//! IPv4 addresses map to their 32-bit value, so every IPv4 client gets its
//! own bucket. IPv6 addresses map to their /64 prefix: hosts inside one
//! routed /64 share a bucket, which stops a client from dodging the limit by
//! rotating interface identifiers.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, ThrottleError};

/// Key assigned to addresses that cannot be parsed.
///
/// Every malformed address collapses into this one bucket, so a burst of
/// garbage input throttles itself collectively. Callers that need a
/// different policy should use [`try_key_from_addr`].
pub const UNKNOWN_KEY: u64 = 0;

/// Derive a throttle key from an IP address.
pub fn key_from_ip(ip: IpAddr) -> u64 {
    match ip {
        IpAddr::V4(v4) => u64::from(u32::from(v4)),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => u64::from(u32::from(v4)),
            None => (u128::from(v6) >> 64) as u64,
        },
    }
}

/// Derive a throttle key from a textual address.
///
/// Accepts a bare IP (`203.0.113.7`, `2001:db8::1`), a bracketed IPv6
/// address (`[2001:db8::1]`) or a socket address (`203.0.113.7:443`,
/// `[2001:db8::1]:443`). Anything else maps to [`UNKNOWN_KEY`].
pub fn key_from_addr(addr: &str) -> u64 {
    try_key_from_addr(addr).unwrap_or(UNKNOWN_KEY)
}

/// Like [`key_from_addr`], but reports unparseable input.
pub fn try_key_from_addr(addr: &str) -> Result<u64> {
    parse_ip(addr.trim())
        .map(key_from_ip)
        .ok_or_else(|| ThrottleError::InvalidAddress(addr.to_string()))
}

fn parse_ip(addr: &str) -> Option<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    addr.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
}
