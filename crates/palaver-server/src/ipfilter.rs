//! IP filter evaluation
//!
//! Patterns match by literal address equality or IPv4 `network/bits` CIDR
//! containment. IPv4-mapped IPv6 addresses are normalized to plain IPv4
//! first so CIDR matching operates on the 32-bit space; other IPv6
//! addresses match only by exact equality.

use crate::config::{FilterKind, IpFilterRule};
use std::net::IpAddr;

/// Strip the `::ffff:` mapping from IPv4-mapped IPv6 addresses
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        IpAddr::V4(_) => ip,
    }
}

/// Evaluate an address against the ordered filter list
///
/// When any whitelist entry exists the address must match at least one of
/// them; a matching blacklist entry always denies; otherwise the address is
/// allowed.
pub fn is_allowed(filters: &[IpFilterRule], ip: IpAddr) -> bool {
    let ip = normalize_ip(ip);

    let has_whitelist = filters.iter().any(|f| f.kind == FilterKind::Whitelist);
    if has_whitelist {
        let whitelisted = filters
            .iter()
            .filter(|f| f.kind == FilterKind::Whitelist)
            .any(|f| pattern_matches(&f.pattern, ip));
        if !whitelisted {
            return false;
        }
    }

    !filters
        .iter()
        .filter(|f| f.kind == FilterKind::Blacklist)
        .any(|f| pattern_matches(&f.pattern, ip))
}

/// Whether a single pattern matches an already-normalized address
fn pattern_matches(pattern: &str, ip: IpAddr) -> bool {
    if let Some((network, bits)) = pattern.split_once('/') {
        return cidr_v4_matches(network, bits, ip);
    }
    match pattern.parse::<IpAddr>() {
        Ok(parsed) => normalize_ip(parsed) == ip,
        Err(_) => false,
    }
}

/// IPv4 CIDR containment; non-IPv4 addresses never match a CIDR pattern
fn cidr_v4_matches(network: &str, bits: &str, ip: IpAddr) -> bool {
    let IpAddr::V4(addr) = ip else {
        return false;
    };
    let Ok(net) = network.parse::<std::net::Ipv4Addr>() else {
        return false;
    };
    let Ok(bits) = bits.parse::<u8>() else {
        return false;
    };
    if bits > 32 {
        return false;
    }
    let mask: u32 = if bits == 0 {
        0
    } else {
        u32::MAX << (32 - bits)
    };
    (u32::from(addr) & mask) == (u32::from(net) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, kind: FilterKind) -> IpFilterRule {
        IpFilterRule {
            pattern: pattern.to_string(),
            kind,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        assert!(is_allowed(&[], ip("203.0.113.9")));
        assert!(is_allowed(&[], ip("2001:db8::1")));
    }

    #[test]
    fn test_blacklist_literal_denies() {
        let filters = [rule("203.0.113.9", FilterKind::Blacklist)];
        assert!(!is_allowed(&filters, ip("203.0.113.9")));
        assert!(is_allowed(&filters, ip("203.0.113.10")));
    }

    #[test]
    fn test_blacklist_cidr_denies_network() {
        let filters = [rule("10.0.0.0/8", FilterKind::Blacklist)];
        assert!(!is_allowed(&filters, ip("10.1.2.3")));
        assert!(is_allowed(&filters, ip("11.0.0.1")));
    }

    #[test]
    fn test_whitelist_requires_match() {
        let filters = [rule("192.168.1.0/24", FilterKind::Whitelist)];
        assert!(is_allowed(&filters, ip("192.168.1.77")));
        assert!(!is_allowed(&filters, ip("192.168.2.77")));
    }

    #[test]
    fn test_blacklist_wins_inside_whitelist() {
        let filters = [
            rule("192.168.1.0/24", FilterKind::Whitelist),
            rule("192.168.1.5", FilterKind::Blacklist),
        ];
        assert!(is_allowed(&filters, ip("192.168.1.4")));
        assert!(!is_allowed(&filters, ip("192.168.1.5")));
    }

    #[test]
    fn test_v4_mapped_v6_normalized_for_cidr() {
        let filters = [rule("10.0.0.0/8", FilterKind::Blacklist)];
        assert!(!is_allowed(&filters, ip("::ffff:10.1.2.3")));
    }

    #[test]
    fn test_v6_literal_matches_exactly() {
        let filters = [rule("2001:db8::1", FilterKind::Blacklist)];
        assert!(!is_allowed(&filters, ip("2001:db8::1")));
        assert!(is_allowed(&filters, ip("2001:db8::2")));
    }

    #[test]
    fn test_v6_never_matches_cidr() {
        let filters = [rule("0.0.0.0/0", FilterKind::Blacklist)];
        assert!(is_allowed(&filters, ip("2001:db8::1")));
        assert!(!is_allowed(&filters, ip("198.51.100.1")));
    }

    #[test]
    fn test_zero_bits_matches_all_v4() {
        let filters = [rule("0.0.0.0/0", FilterKind::Whitelist)];
        assert!(is_allowed(&filters, ip("8.8.8.8")));
    }

    #[test]
    fn test_malformed_patterns_never_match() {
        let filters = [
            rule("not-an-ip", FilterKind::Blacklist),
            rule("10.0.0.0/99", FilterKind::Blacklist),
        ];
        assert!(is_allowed(&filters, ip("10.0.0.1")));
    }

    #[test]
    fn test_normalize_ip() {
        assert_eq!(normalize_ip(ip("::ffff:1.2.3.4")), ip("1.2.3.4"));
        assert_eq!(normalize_ip(ip("1.2.3.4")), ip("1.2.3.4"));
        assert_eq!(normalize_ip(ip("2001:db8::1")), ip("2001:db8::1"));
    }
}
