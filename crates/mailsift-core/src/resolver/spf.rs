//! SPF (Sender Policy Framework) evaluation
//!
//! Implements the RFC 7208 mechanisms needed to classify a sender: `all`,
//! `include`, `a`, `mx`, `ip4`, `ip6`, `exists` and the `redirect` modifier.

use super::{DnsResolver, SpfChecker};
use async_trait::async_trait;
use mailsift_common::{Error, Result};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// SPF verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfResult {
    /// The sending IP is authorized
    Pass,
    /// The sending IP is explicitly not authorized
    Fail,
    /// The sending IP is probably not authorized (soft fail)
    SoftFail,
    /// The domain owner has no opinion
    Neutral,
    /// No SPF record found
    None,
    /// Temporary error (DNS timeout, etc.)
    TempError,
    /// Permanent error (invalid SPF record)
    PermError,
}

impl SpfResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpfResult::Pass => "pass",
            SpfResult::Fail => "fail",
            SpfResult::SoftFail => "softfail",
            SpfResult::Neutral => "neutral",
            SpfResult::None => "none",
            SpfResult::TempError => "temperror",
            SpfResult::PermError => "permerror",
        }
    }
}

#[derive(Debug, Clone)]
enum SpfMechanism {
    All,
    Include(String),
    A(Option<String>),
    Mx(Option<String>),
    Ip4(ipnet::Ipv4Net),
    Ip6(ipnet::Ipv6Net),
    Ptr(Option<String>),
    Exists(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SpfQualifier {
    Pass,     // + (default)
    Fail,     // -
    SoftFail, // ~
    Neutral,  // ?
}

impl SpfQualifier {
    fn to_result(self) -> SpfResult {
        match self {
            SpfQualifier::Pass => SpfResult::Pass,
            SpfQualifier::Fail => SpfResult::Fail,
            SpfQualifier::SoftFail => SpfResult::SoftFail,
            SpfQualifier::Neutral => SpfResult::Neutral,
        }
    }
}

#[derive(Debug, Clone)]
struct SpfDirective {
    qualifier: SpfQualifier,
    mechanism: SpfMechanism,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// SPF checker on top of a [`DnsResolver`]
pub struct DnsSpfChecker {
    resolver: Arc<dyn DnsResolver>,
    max_dns_lookups: usize,
}

impl DnsSpfChecker {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            resolver,
            max_dns_lookups: 10, // RFC 7208 limit
        }
    }

    /// Recursive SPF check with depth tracking
    fn check_spf<'a>(
        &'a self,
        domain: &'a str,
        client_ip: IpAddr,
        depth: usize,
    ) -> BoxFuture<'a, Result<SpfResult>> {
        Box::pin(async move {
            if depth >= self.max_dns_lookups {
                return Ok(SpfResult::PermError);
            }

            let spf_record = match self.get_spf_record(domain).await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(SpfResult::None),
                Err(e) => {
                    debug!("SPF lookup failed for {}: {}", domain, e);
                    return Ok(SpfResult::TempError);
                }
            };

            debug!("Found SPF record for {}: {}", domain, spf_record);

            let directives = match parse_spf_record(&spf_record) {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to parse SPF record for {}: {}", domain, e);
                    return Ok(SpfResult::PermError);
                }
            };

            for directive in directives {
                if let Some(result) = self
                    .evaluate_directive(&directive, domain, client_ip, depth)
                    .await?
                {
                    return Ok(result);
                }
            }

            Ok(SpfResult::Neutral)
        })
    }

    async fn get_spf_record(&self, domain: &str) -> Result<Option<String>> {
        let records = self.resolver.lookup_txt(domain).await?;
        Ok(records
            .into_iter()
            .find(|txt| txt.starts_with("v=spf1 ") || txt == "v=spf1"))
    }

    fn evaluate_directive<'a>(
        &'a self,
        directive: &'a SpfDirective,
        domain: &'a str,
        client_ip: IpAddr,
        depth: usize,
    ) -> BoxFuture<'a, Result<Option<SpfResult>>> {
        Box::pin(async move {
            let matches = match &directive.mechanism {
                SpfMechanism::All => true,

                SpfMechanism::Ip4(network) => match client_ip {
                    IpAddr::V4(ip) => network.contains(&ip),
                    IpAddr::V6(_) => false,
                },

                SpfMechanism::Ip6(network) => match client_ip {
                    IpAddr::V6(ip) => network.contains(&ip),
                    IpAddr::V4(_) => false,
                },

                SpfMechanism::A(target) => {
                    let target_domain = target.as_deref().unwrap_or(domain);
                    self.check_a_record(target_domain, client_ip).await
                }

                SpfMechanism::Mx(target) => {
                    let target_domain = target.as_deref().unwrap_or(domain);
                    self.check_mx_record(target_domain, client_ip).await
                }

                SpfMechanism::Include(included_domain) => {
                    let result = self
                        .check_spf(included_domain, client_ip, depth + 1)
                        .await?;
                    result == SpfResult::Pass
                }

                // Deprecated and expensive; never matches
                SpfMechanism::Ptr(_) => false,

                SpfMechanism::Exists(target) => self
                    .resolver
                    .lookup_addr(target)
                    .await
                    .map(|addrs| addrs.iter().any(IpAddr::is_ipv4))
                    .unwrap_or(false),
            };

            Ok(matches.then(|| directive.qualifier.to_result()))
        })
    }

    async fn check_a_record(&self, domain: &str, client_ip: IpAddr) -> bool {
        match self.resolver.lookup_addr(domain).await {
            Ok(addrs) => addrs.contains(&client_ip),
            Err(_) => false,
        }
    }

    async fn check_mx_record(&self, domain: &str, client_ip: IpAddr) -> bool {
        let Ok(hosts) = self.resolver.lookup_mx(domain).await else {
            return false;
        };
        for mx_host in hosts {
            if self.check_a_record(&mx_host, client_ip).await {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl SpfChecker for DnsSpfChecker {
    async fn check_host(&self, ip: IpAddr, helo: &str, sender: &str) -> SpfResult {
        let domain = match extract_domain(sender) {
            Some(d) => d,
            None if !helo.is_empty() => helo.to_lowercase(),
            None => {
                debug!("No domain to check SPF for sender {:?}", sender);
                return SpfResult::None;
            }
        };

        debug!("Checking SPF for domain {} from IP {}", domain, ip);

        match self.check_spf(&domain, ip, 0).await {
            Ok(result) => result,
            Err(e) => {
                debug!("SPF check error for {}: {}", domain, e);
                SpfResult::TempError
            }
        }
    }
}

/// Domain part of an address, lowercased
pub fn extract_domain(email: &str) -> Option<String> {
    let email = email.trim_start_matches('<').trim_end_matches('>');

    let at_pos = email.rfind('@')?;
    let domain = &email[at_pos + 1..];
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

fn parse_spf_record(record: &str) -> Result<Vec<SpfDirective>> {
    let mut directives = Vec::new();

    let terms = record
        .strip_prefix("v=spf1")
        .ok_or_else(|| Error::Resolver("Invalid SPF record: missing v=spf1".into()))?
        .trim();

    for term in terms.split_whitespace() {
        // Modifiers other than redirect carry no verdict
        if term.contains('=') {
            if let Some(domain) = term.strip_prefix("redirect=") {
                directives.push(SpfDirective {
                    qualifier: SpfQualifier::Pass,
                    mechanism: SpfMechanism::Include(domain.to_string()),
                });
            }
            continue;
        }

        let (qualifier, mechanism_str) = match term.chars().next() {
            Some('+') => (SpfQualifier::Pass, &term[1..]),
            Some('-') => (SpfQualifier::Fail, &term[1..]),
            Some('~') => (SpfQualifier::SoftFail, &term[1..]),
            Some('?') => (SpfQualifier::Neutral, &term[1..]),
            _ => (SpfQualifier::Pass, term),
        };

        directives.push(SpfDirective {
            qualifier,
            mechanism: parse_mechanism(mechanism_str)?,
        });
    }

    Ok(directives)
}

fn parse_mechanism(s: &str) -> Result<SpfMechanism> {
    let invalid = |what: &str| Error::Resolver(format!("Invalid SPF {}: {}", what, s));

    match s {
        "all" => return Ok(SpfMechanism::All),
        "a" => return Ok(SpfMechanism::A(None)),
        "mx" => return Ok(SpfMechanism::Mx(None)),
        "ptr" => return Ok(SpfMechanism::Ptr(None)),
        _ => {}
    }

    if let Some(domain) = s.strip_prefix("a:") {
        return Ok(SpfMechanism::A(Some(domain.to_string())));
    }
    if let Some(domain) = s.strip_prefix("mx:") {
        return Ok(SpfMechanism::Mx(Some(domain.to_string())));
    }
    if let Some(network) = s.strip_prefix("ip4:") {
        let net = if network.contains('/') {
            network.parse().map_err(|_| invalid("ip4"))?
        } else {
            format!("{}/32", network).parse().map_err(|_| invalid("ip4"))?
        };
        return Ok(SpfMechanism::Ip4(net));
    }
    if let Some(network) = s.strip_prefix("ip6:") {
        let net = if network.contains('/') {
            network.parse().map_err(|_| invalid("ip6"))?
        } else {
            format!("{}/128", network).parse().map_err(|_| invalid("ip6"))?
        };
        return Ok(SpfMechanism::Ip6(net));
    }
    if let Some(domain) = s.strip_prefix("include:") {
        return Ok(SpfMechanism::Include(domain.to_string()));
    }
    if let Some(domain) = s.strip_prefix("ptr:") {
        return Ok(SpfMechanism::Ptr(Some(domain.to_string())));
    }
    if let Some(domain) = s.strip_prefix("exists:") {
        return Ok(SpfMechanism::Exists(domain.to_string()));
    }

    Err(invalid("mechanism"))
}
