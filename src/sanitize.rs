//! Dial-time IP address policy and the DNS hook that enforces it.
//!
//! The sanitizer decides allow/deny for a single candidate address; the
//! [`GuardedResolver`] applies it to every freshly resolved address, so the
//! decision is made after DNS resolution and immediately before connect.
//! Checking at URL-parse time would be bypassable: a hostname can resolve to
//! a different (internal) address at request time than whatever an earlier
//! validation step observed.
//!
//! Literal-IP hosts never reach a resolver; they are checked against the
//! same policy during request validation, since a literal cannot rebind.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use ip_network::{IpNetwork, Ipv6Network};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use url::Url;

use crate::error::BoxError;

/// Marker error: every address the name resolved to fell within a blocked or
/// reserved range. Recovered from the transport error chain and surfaced as
/// [`Error::ReservedAddress`](crate::Error::ReservedAddress).
#[derive(Debug, Error)]
#[error("all resolved addresses fall within blocked / reserved IP ranges")]
pub(crate) struct AddrDenied;

/// Marker error: the name does not exist (NXDOMAIN-equivalent). Recovered
/// from the transport error chain and surfaced as
/// [`Error::HostNotFound`](crate::Error::HostNotFound).
#[derive(Debug, Error)]
#[error("no addresses found for host")]
pub(crate) struct NameNotFound;

/// Allow/deny policy over IP prefixes.
///
/// Evaluation order: a blocked prefix always wins, then an allowed prefix,
/// then the default policy, which permits only globally routable addresses.
/// Stateless; shared by reference between the resolver hook, the redirect
/// policy and request validation.
#[derive(Debug, Default)]
pub struct AddrSanitizer {
    allow: Vec<IpNetwork>,
    block: Vec<IpNetwork>,
}

impl AddrSanitizer {
    /// Creates a sanitizer from configured allow and block prefix lists.
    #[must_use]
    pub fn new(allow: Vec<IpNetwork>, block: Vec<IpNetwork>) -> Self {
        Self { allow, block }
    }

    /// Returns whether dialing `addr` is permitted.
    #[must_use]
    pub fn permits(&self, addr: IpAddr) -> bool {
        if self.block.iter().any(|net| net.contains(addr)) {
            return false;
        }
        if self.allow.iter().any(|net| net.contains(addr)) {
            return true;
        }
        !is_reserved(addr)
    }
}

/// Returns whether `addr` belongs to a range the default policy refuses to
/// dial: loopback, private, link-local, and the other non-globally-routable
/// blocks an attacker could use to reach internal services.
fn is_reserved(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => is_reserved_v6(v6),
    }
}

fn is_reserved_v4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.is_multicast()
        || addr.is_documentation()
        // 100.64.0.0/10, carrier-grade NAT (RFC 6598)
        || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 64)
        // 192.0.0.0/24, IETF protocol assignments (RFC 6890)
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15, benchmarking (RFC 2544)
        || (octets[0] == 198 && (octets[1] & 0b1111_1110) == 18)
        // 240.0.0.0/4, reserved (RFC 1112)
        || octets[0] >= 240
}

fn is_reserved_v6(addr: Ipv6Addr) -> bool {
    // v4-mapped addresses smuggle a v4 target into a v6 dial; apply the
    // v4 policy to the embedded address.
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_reserved_v4(mapped);
    }
    let network = Ipv6Network::from(addr);
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_unspecified()
        || addr.is_multicast()
        || network.is_unique_local()
        || network.is_unicast_link_local()
        // 2001:db8::/32, documentation (RFC 3849)
        || (segments[0] == 0x2001 && segments[1] == 0xdb8)
}

/// Returns the literal IP host of a URL, or `None` for domain hosts.
pub(crate) fn host_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        url::Host::Domain(_) => None,
        url::Host::Ipv4(addr) => Some(IpAddr::V4(addr)),
        url::Host::Ipv6(addr) => Some(IpAddr::V6(addr)),
    }
}

/// DNS resolver that filters every resolved address through the sanitizer
/// before the transport may connect to it.
pub(crate) struct GuardedResolver {
    resolver: TokioAsyncResolver,
    sanitizer: Arc<AddrSanitizer>,
}

impl GuardedResolver {
    /// Builds a resolver from the system configuration, falling back to the
    /// library defaults when no system configuration is readable.
    pub(crate) fn new(sanitizer: Arc<AddrSanitizer>) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self {
            resolver,
            sanitizer,
        }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        let sanitizer = Arc::clone(&self.sanitizer);
        Box::pin(async move {
            let lookup = resolver
                .lookup_ip(name.as_str())
                .await
                .map_err(|err| -> BoxError {
                    if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                        Box::new(NameNotFound)
                    } else {
                        // Other resolver failures are transient; the retry
                        // engine treats them as generic retryable errors.
                        Box::new(err)
                    }
                })?;
            let addrs = filter_resolved(&sanitizer, lookup.iter())?;
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Applies the sanitizer to a fresh DNS answer. Denied addresses are dropped;
/// the dial proceeds with the permitted subset. An answer with no permitted
/// address fails with [`AddrDenied`], an empty answer with [`NameNotFound`].
fn filter_resolved(
    sanitizer: &AddrSanitizer,
    resolved: impl Iterator<Item = IpAddr>,
) -> Result<Vec<SocketAddr>, BoxError> {
    let mut permitted = Vec::new();
    let mut denied = 0usize;
    for addr in resolved {
        if sanitizer.permits(addr) {
            // Placeholder port; the transport substitutes the real one.
            permitted.push(SocketAddr::new(addr, 0));
        } else {
            denied += 1;
        }
    }
    if permitted.is_empty() {
        if denied > 0 {
            return Err(Box::new(AddrDenied));
        }
        return Err(Box::new(NameNotFound));
    }
    Ok(permitted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sanitizer(allow: &[&str], block: &[&str]) -> AddrSanitizer {
        AddrSanitizer::new(
            allow.iter().map(|net| net.parse().unwrap()).collect(),
            block.iter().map(|net| net.parse().unwrap()).collect(),
        )
    }

    fn addr(literal: &str) -> IpAddr {
        literal.parse().unwrap()
    }

    // ==================== Default Policy Tests ====================

    #[test]
    fn test_default_policy_permits_global_addresses() {
        let policy = AddrSanitizer::default();
        assert!(policy.permits(addr("93.184.216.34")));
        assert!(policy.permits(addr("2606:2800:220:1:248:1893:25c8:1946")));
    }

    #[test]
    fn test_default_policy_denies_loopback() {
        let policy = AddrSanitizer::default();
        assert!(!policy.permits(addr("127.0.0.1")));
        assert!(!policy.permits(addr("127.255.255.254")));
        assert!(!policy.permits(addr("::1")));
    }

    #[test]
    fn test_default_policy_denies_private_ranges() {
        let policy = AddrSanitizer::default();
        assert!(!policy.permits(addr("10.0.0.1")));
        assert!(!policy.permits(addr("172.16.5.4")));
        assert!(!policy.permits(addr("192.168.1.1")));
        // IPv6 unique local
        assert!(!policy.permits(addr("fd12:3456:789a::1")));
    }

    #[test]
    fn test_default_policy_denies_link_local() {
        let policy = AddrSanitizer::default();
        // Cloud metadata endpoints live here; the classic SSRF target.
        assert!(!policy.permits(addr("169.254.169.254")));
        assert!(!policy.permits(addr("fe80::1")));
    }

    #[test]
    fn test_default_policy_denies_other_reserved_ranges() {
        let policy = AddrSanitizer::default();
        assert!(!policy.permits(addr("0.0.0.0")));
        assert!(!policy.permits(addr("255.255.255.255")));
        assert!(!policy.permits(addr("224.0.0.251")));
        assert!(!policy.permits(addr("100.64.0.1"))); // CGNAT
        assert!(!policy.permits(addr("198.18.0.1"))); // benchmarking
        assert!(!policy.permits(addr("192.0.2.1"))); // documentation
        assert!(!policy.permits(addr("240.0.0.1"))); // reserved
        assert!(!policy.permits(addr("::")));
        assert!(!policy.permits(addr("2001:db8::1")));
    }

    #[test]
    fn test_v4_mapped_v6_uses_embedded_v4_policy() {
        let policy = AddrSanitizer::default();
        assert!(!policy.permits(addr("::ffff:127.0.0.1")));
        assert!(!policy.permits(addr("::ffff:10.0.0.1")));
        assert!(policy.permits(addr("::ffff:93.184.216.34")));
    }

    // ==================== Allow/Block List Tests ====================

    #[test]
    fn test_allow_list_opens_reserved_range() {
        let policy = sanitizer(&["127.0.0.0/8"], &[]);
        assert!(policy.permits(addr("127.0.0.1")));
        // Other reserved ranges stay denied.
        assert!(!policy.permits(addr("10.0.0.1")));
    }

    #[test]
    fn test_block_list_closes_global_range() {
        let policy = sanitizer(&[], &["93.184.0.0/16"]);
        assert!(!policy.permits(addr("93.184.216.34")));
        assert!(policy.permits(addr("1.1.1.1")));
    }

    #[test]
    fn test_block_wins_over_allow() {
        // Same prefix in both lists: block is evaluated first and wins.
        let policy = sanitizer(&["127.0.0.0/8"], &["127.0.0.0/8"]);
        assert!(!policy.permits(addr("127.0.0.1")));

        // A narrower block inside a wider allow also wins.
        let policy = sanitizer(&["10.0.0.0/8"], &["10.1.0.0/16"]);
        assert!(!policy.permits(addr("10.1.2.3")));
        assert!(policy.permits(addr("10.2.0.1")));
    }

    // ==================== Resolver Filter Tests ====================

    #[test]
    fn test_filter_resolved_keeps_permitted_subset() {
        let policy = AddrSanitizer::default();
        let resolved = vec![addr("93.184.216.34"), addr("10.0.0.1")];
        let permitted = filter_resolved(&policy, resolved.into_iter()).unwrap();
        assert_eq!(permitted.len(), 1);
        assert_eq!(permitted[0].ip(), addr("93.184.216.34"));
    }

    #[test]
    fn test_filter_resolved_all_denied_is_reserved_marker() {
        let policy = AddrSanitizer::default();
        // A rebinding answer pointing only at internal targets.
        let resolved = vec![addr("127.0.0.1"), addr("169.254.169.254")];
        let err = filter_resolved(&policy, resolved.into_iter()).unwrap_err();
        assert!(err.downcast_ref::<AddrDenied>().is_some());
    }

    #[test]
    fn test_filter_resolved_empty_answer_is_not_found_marker() {
        let policy = AddrSanitizer::default();
        let err = filter_resolved(&policy, std::iter::empty()).unwrap_err();
        assert!(err.downcast_ref::<NameNotFound>().is_some());
    }

    // ==================== host_ip Tests ====================

    #[test]
    fn test_host_ip_literal_v4() {
        let url = Url::parse("http://127.0.0.1:8080/path").unwrap();
        assert_eq!(host_ip(&url), Some(addr("127.0.0.1")));
    }

    #[test]
    fn test_host_ip_literal_v6() {
        let url = Url::parse("http://[::1]/path").unwrap();
        assert_eq!(host_ip(&url), Some(addr("::1")));
    }

    #[test]
    fn test_host_ip_domain_is_none() {
        let url = Url::parse("https://example.com/path").unwrap();
        assert_eq!(host_ip(&url), None);
    }
}
