//! DNS resolver backed by trust-dns

use super::DnsResolver;
use async_trait::async_trait;
use mailsift_common::config::ResolverConfig as ResolverSettings;
use mailsift_common::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::info;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

/// Asynchronous resolver; answers are cached per record TTL by trust-dns
pub struct TrustDnsResolver {
    resolver: TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Build from settings; no nameservers means the system configuration
    pub fn new(settings: &ResolverSettings) -> Result<Self> {
        let timeout = Duration::from_millis(settings.timeout_ms);

        let resolver = if settings.nameservers.is_empty() {
            let (config, mut opts) = trust_dns_resolver::system_conf::read_system_conf()
                .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
            opts.timeout = timeout;
            TokioAsyncResolver::tokio(config, opts)
        } else {
            let mut group = NameServerConfigGroup::new();
            for server in &settings.nameservers {
                let addr = parse_nameserver(server)?;
                group.extend(
                    NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true)
                        .iter()
                        .cloned(),
                );
            }
            let mut opts = ResolverOpts::default();
            opts.timeout = timeout;
            TokioAsyncResolver::tokio(ResolverConfig::from_parts(None, vec![], group), opts)
        };

        info!(
            nameservers = ?settings.nameservers,
            timeout_ms = settings.timeout_ms,
            "DNS resolver ready"
        );
        Ok(Self { resolver })
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

fn parse_nameserver(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| Error::Config(format!("invalid nameserver: {}", server)))
}

/// NXDOMAIN and empty answers are not errors here
fn empty_or_error<T>(err: ResolveError) -> Result<Vec<T>> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
        _ => Err(Error::Resolver(err.to_string())),
    }
}

fn host(name: String) -> String {
    name.trim_end_matches('.').to_string()
}

#[async_trait]
impl DnsResolver for TrustDnsResolver {
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => Ok(lookup.iter().map(|name| host(name.to_string())).collect()),
            Err(e) => empty_or_error(e),
        }
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|record| {
                    record
                        .txt_data()
                        .iter()
                        .map(|d| String::from_utf8_lossy(d))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => empty_or_error(e),
        }
    }

    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>> {
        match self.resolver.mx_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| host(mx.exchange().to_string()))
                .collect()),
            Err(e) => empty_or_error(e),
        }
    }

    async fn lookup_addr(&self, name: &str) -> Result<Vec<IpAddr>> {
        match self.resolver.lookup_ip(name).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => empty_or_error(e),
        }
    }
}
