//! External lookups: DNS, SPF and network regions

mod dns;
mod region;
mod spf;

pub use dns::TrustDnsResolver;
pub use region::{NoRegionLookup, StaticRegionLookup};
pub use spf::{extract_domain, DnsSpfChecker, SpfResult};

use async_trait::async_trait;
use mailsift_common::Result;
use std::net::IpAddr;

/// DNS queries used by feature extraction
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Host names of the PTR records of `ip`, without trailing dots
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>>;

    /// TXT strings of `name`, each record's chunks concatenated
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;

    /// Exchange hosts of the MX records of `name`
    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>>;

    /// A and AAAA addresses of `name`
    async fn lookup_addr(&self, name: &str) -> Result<Vec<IpAddr>>;
}

/// Sender Policy Framework evaluation
#[async_trait]
pub trait SpfChecker: Send + Sync {
    /// Evaluate the policy of the sender's domain, or of the HELO name for
    /// the null sender
    async fn check_host(&self, ip: IpAddr, helo: &str, sender: &str) -> SpfResult;
}

/// Geographic placement of a client address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    pub country: String,
    pub province: String,
    pub city: String,
}

/// Maps client addresses to regions
#[async_trait]
pub trait RegionLookup: Send + Sync {
    async fn lookup_region(&self, ip: IpAddr) -> Result<Option<Region>>;
}
