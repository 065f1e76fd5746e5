//! Network to region lookups

use super::{Region, RegionLookup};
use async_trait::async_trait;
use ipnet::IpNet;
use mailsift_common::config::RegionEntry;
use mailsift_common::{Error, Result};
use std::net::IpAddr;

/// Region lookup that knows nothing
pub struct NoRegionLookup;

#[async_trait]
impl RegionLookup for NoRegionLookup {
    async fn lookup_region(&self, _ip: IpAddr) -> Result<Option<Region>> {
        Ok(None)
    }
}

/// Region table from configuration; the most specific network wins
pub struct StaticRegionLookup {
    networks: Vec<(IpNet, Region)>,
}

impl StaticRegionLookup {
    pub fn new(entries: &[RegionEntry]) -> Result<Self> {
        let mut networks = entries
            .iter()
            .map(|entry| {
                let net: IpNet = entry
                    .network
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid region network: {}", entry.network)))?;
                Ok((
                    net,
                    Region {
                        country: entry.country.clone(),
                        province: entry.province.clone(),
                        city: entry.city.clone(),
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        networks.sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[async_trait]
impl RegionLookup for StaticRegionLookup {
    async fn lookup_region(&self, ip: IpAddr) -> Result<Option<Region>> {
        Ok(self
            .networks
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, region)| region.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(network: &str, city: &str) -> RegionEntry {
        RegionEntry {
            network: network.to_string(),
            country: "Exampleland".to_string(),
            province: String::new(),
            city: city.to_string(),
        }
    }

    #[tokio::test]
    async fn test_most_specific_network_wins() {
        let lookup = StaticRegionLookup::new(&[
            entry("203.0.113.0/24", "Wide"),
            entry("203.0.113.128/25", "Narrow"),
        ])
        .unwrap();

        let city = |ip: &str| {
            let ip: IpAddr = ip.parse().unwrap();
            let lookup = &lookup;
            async move { lookup.lookup_region(ip).await.unwrap().map(|r| r.city) }
        };
        assert_eq!(city("203.0.113.200").await.as_deref(), Some("Narrow"));
        assert_eq!(city("203.0.113.5").await.as_deref(), Some("Wide"));
        assert_eq!(city("192.0.2.1").await, None);
    }

    #[test]
    fn test_invalid_network() {
        assert!(StaticRegionLookup::new(&[entry("not-a-net", "x")]).is_err());
    }
}
