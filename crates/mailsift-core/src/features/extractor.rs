//! Turns checkpoint signals into features

use super::catalog::FilterCatalog;
use super::mime::{parse_headers, parse_message};
use super::signals::{names, Payload, Signals};
use crate::hash::{FuzzyHasher, Spamsum};
use crate::metrics::MetricEngine;
use crate::preprocess::HtmlScanner;
use crate::resolver::{extract_domain, DnsResolver, Region, RegionLookup, SpfChecker};
use chrono::Utc;
use mailsift_common::types::{FilterCategory, FilterStage};
use mailsift_common::{Config, Feature, Result};
use mailsift_storage::FilterField;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Separator of multi-valued signals
pub const MULTI_VALUE_SEPARATOR: &str = "\r\n";

/// External lookups used during extraction
#[derive(Clone)]
pub struct Resolvers {
    pub dns: Arc<dyn DnsResolver>,
    pub spf: Arc<dyn SpfChecker>,
    pub regions: Arc<dyn RegionLookup>,
}

/// Tunables of the extractor
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub resolver_timeout: Duration,
    pub ptr_ttl: Duration,
    pub spf: bool,
    pub hasher: FuzzyHasher,
}

impl ExtractorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resolver_timeout: Duration::from_millis(config.resolver.timeout_ms),
            ptr_ttl: Duration::from_secs(config.resolver.ptr_cache_ttl_secs),
            spf: config.resolver.spf,
            hasher: FuzzyHasher::new(config.filter.min_hash_size, config.filter.hash_window),
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            resolver_timeout: Duration::from_millis(1500),
            ptr_ttl: Duration::from_secs(6 * 3600),
            spf: true,
            hasher: FuzzyHasher::default(),
        }
    }
}

/// Fuzzy hash computed from the message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    pub spamsum: Spamsum,
    pub is_attachment: bool,
}

/// Signals of a complete message plus the hashes to persist
#[derive(Debug, Clone, Default)]
pub struct BodyAnalysis {
    pub signals: Signals,
    pub hashes: Vec<ContentHash>,
}

fn wants(fields: &[FilterField], names: &[&str]) -> bool {
    fields
        .iter()
        .any(|f| names.iter().any(|n| f.name.eq_ignore_ascii_case(n)))
}

fn text_of(payload: &Payload, current: &Signals, name: &str) -> Option<String> {
    payload
        .lookup(current, name)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Feature extraction for every checkpoint of a transaction
pub struct FeatureExtractor {
    catalog: Arc<FilterCatalog>,
    metrics: MetricEngine,
    resolvers: Resolvers,
    settings: ExtractorSettings,
    html: HtmlScanner,
}

impl FeatureExtractor {
    pub fn new(
        catalog: Arc<FilterCatalog>,
        metrics: MetricEngine,
        resolvers: Resolvers,
        settings: ExtractorSettings,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            metrics,
            resolvers,
            settings,
            html: HtmlScanner::new()?,
        })
    }

    pub fn catalog(&self) -> &Arc<FilterCatalog> {
        &self.catalog
    }

    /// Field and metric features of a checkpoint
    ///
    /// The signals are remembered in the payload so later checkpoints and
    /// metrics spanning several stages can read them.
    pub async fn extract(
        &self,
        stage: FilterStage,
        signals: &Signals,
        payload: &mut Payload,
    ) -> Vec<Feature> {
        payload.record(stage, signals);
        let mut features = self.field_features(stage, signals).await;

        let now = Utc::now();
        for definition in self.catalog.metrics_for(stage).await {
            match definition.metric.category() {
                Ok(FilterCategory::All) => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(metric = %definition.metric.name, error = %e, "Metric with an invalid category");
                    continue;
                }
            }

            let Some(primary) = text_of(payload, signals, &definition.primary.name) else {
                continue;
            };
            let secondary = match &definition.secondary {
                Some(field) => match text_of(payload, signals, &field.name) {
                    Some(value) => Some(value),
                    None => continue,
                },
                None => None,
            };

            match self
                .metrics
                .observe(&definition.metric, &primary, secondary.as_deref(), now)
                .await
            {
                Ok(Some(feature)) => features.push(feature),
                Ok(None) => {}
                Err(e) => {
                    debug!(metric = %definition.metric.name, error = %e, "Metric skipped")
                }
            }
        }

        features
    }

    /// Field features only; used for single header events so that header
    /// metrics are counted once, at end of headers
    pub async fn extract_fields(
        &self,
        stage: FilterStage,
        signals: &Signals,
        payload: &mut Payload,
    ) -> Vec<Feature> {
        payload.record(stage, signals);
        self.field_features(stage, signals).await
    }

    async fn field_features(&self, stage: FilterStage, signals: &Signals) -> Vec<Feature> {
        self.catalog
            .fields_for(stage)
            .await
            .into_iter()
            .filter_map(|field| {
                signals
                    .get(&field.name)
                    .map(|value| Feature::new(field.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Connection signals, with PTR and region lookups when a field asks for them
    pub async fn connect_signals(
        &self,
        hostname: &str,
        family: &str,
        port: Option<u16>,
        address: &str,
    ) -> Signals {
        let mut signals = Signals::new()
            .with(names::HOSTNAME, hostname)
            .with(names::FAMILY, family)
            .with(names::CLIENT_IP, address);
        if let Some(port) = port {
            signals.set(names::PORT, i64::from(port));
        }

        let Ok(ip) = address.parse::<IpAddr>() else {
            return signals;
        };

        let fields = self.catalog.fields_for(FilterStage::Connect).await;
        let want_ptr = wants(&fields, &[names::PTR]);
        let want_region = wants(
            &fields,
            &[names::REGION, names::COUNTRY, names::PROVINCE, names::CITY],
        );

        let (ptr, region) = tokio::join!(
            async {
                if want_ptr {
                    self.ptr(ip).await
                } else {
                    None
                }
            },
            async {
                if want_region {
                    self.bounded("region", self.resolvers.regions.lookup_region(ip))
                        .await
                        .flatten()
                } else {
                    None
                }
            },
        );

        if let Some(ptr) = ptr {
            signals.set(names::PTR, ptr);
        }
        if let Some(region) = region {
            set_region(&mut signals, region);
        }
        signals
    }

    /// Envelope sender signals, with SPF and domain existence checks
    pub async fn mail_signals(&self, sender: &str, payload: &Payload) -> Signals {
        let domain = extract_domain(sender);
        let mut signals = Signals::new().with(names::SENDER, sender);
        if let Some(domain) = &domain {
            signals.set(names::SENDER_DOMAIN, domain.clone());
        }

        let fields = self.catalog.fields_for(FilterStage::MailFrom).await;
        let client_ip = payload
            .get(names::CLIENT_IP)
            .and_then(|v| v.to_string().parse::<IpAddr>().ok());
        let helo = payload
            .get(names::HELO)
            .map(|v| v.to_string())
            .unwrap_or_default();

        let spf_ip = client_ip.filter(|_| self.settings.spf && wants(&fields, &[names::SPF]));
        let exist_domain = domain
            .as_deref()
            .filter(|_| wants(&fields, &[names::SENDER_DOMAIN_EXIST]));

        let (spf, exists) = tokio::join!(
            async {
                match spf_ip {
                    Some(ip) => {
                        let check = self.resolvers.spf.check_host(ip, &helo, sender);
                        match tokio::time::timeout(self.settings.resolver_timeout, check).await {
                            Ok(result) => Some(result),
                            Err(_) => {
                                debug!(lookup = "spf", "Lookup timed out");
                                None
                            }
                        }
                    }
                    None => None,
                }
            },
            async {
                match exist_domain {
                    Some(domain) => self.domain_exists(domain).await,
                    None => None,
                }
            },
        );

        if let Some(spf) = spf {
            signals.set(names::SPF, spf.as_str());
        }
        if let Some(exists) = exists {
            signals.set(names::SENDER_DOMAIN_EXIST, exists);
        }
        signals
    }

    /// Structured header signals from the accumulated header block
    pub fn header_signals(&self, block: &[u8]) -> Signals {
        let Some(headers) = parse_headers(block) else {
            debug!("Header block could not be parsed");
            return Signals::new();
        };

        Signals::new()
            .with(names::HEADER_FROM, headers.header_from)
            .with(names::NICK, headers.nick)
            .with(names::MAILER, headers.mailer)
            .with(names::SUBJECT, headers.subject)
            .with(names::MESSAGE_ID, headers.message_id)
    }

    /// Content signals of the complete message
    pub fn body_signals(&self, raw: &[u8], size: usize) -> BodyAnalysis {
        let mut analysis = BodyAnalysis {
            signals: Signals::new().with(names::SIZE, size as i64),
            hashes: Vec::new(),
        };

        let Some(message) = parse_message(raw) else {
            warn!(size, "Message could not be parsed");
            return analysis;
        };

        let scanned = (!message.html.is_empty()).then(|| self.html.scan(&message.html));
        let text = if message.text.trim().is_empty() {
            scanned.as_ref().map(|c| c.text.clone()).unwrap_or_default()
        } else {
            message.text.clone()
        };

        let mut urls = scanned.map(|c| c.urls).unwrap_or_default();
        for url in self.html.text_urls(&text) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }

        let hasher = &self.settings.hasher;
        let text_hash = hasher
            .hash(text.as_bytes())
            .or_else(|| hasher.hash(message.html.as_bytes()));

        let signals = &mut analysis.signals;
        signals.set(names::TEXT, text);
        signals.set(names::HTML, message.html.clone());
        signals.set(names::URL, urls.join(MULTI_VALUE_SEPARATOR));
        if let Some(hash) = text_hash {
            signals.set(names::TEXT_HASH, hash.to_string());
            analysis.hashes.push(ContentHash {
                spamsum: hash,
                is_attachment: false,
            });
        }

        let mut attach_names = Vec::new();
        let mut attach_hashes = Vec::new();
        let mut attach_digests = Vec::new();
        for attachment in &message.attachments {
            if !attachment.name.is_empty() {
                attach_names.push(attachment.name.clone());
            }
            if let Some(hash) = hasher.hash(&attachment.content) {
                attach_hashes.push(hash.to_string());
                analysis.hashes.push(ContentHash {
                    spamsum: hash,
                    is_attachment: true,
                });
            }
            attach_digests.push(hex::encode(Sha256::digest(&attachment.content)));
        }

        let signals = &mut analysis.signals;
        signals.set(names::ATTACH_NAME, attach_names.join(MULTI_VALUE_SEPARATOR));
        signals.set(names::ATTACH_HASH, attach_hashes.join(MULTI_VALUE_SEPARATOR));
        signals.set(names::ATTACH_DIGEST, attach_digests.join(MULTI_VALUE_SEPARATOR));
        signals.set(names::ATTACH_COUNT, message.attachments.len() as i64);
        analysis
    }

    /// First PTR name, held in the shared cache
    async fn ptr(&self, ip: IpAddr) -> Option<String> {
        let key = format!("ptr:{}", ip);
        let cache = self.metrics.cache();
        match cache.get_string(&key).await {
            Ok(Some(host)) => return Some(host),
            Ok(None) => {}
            Err(e) => debug!(key = %key, error = %e, "PTR cache unavailable"),
        }

        let hosts = self
            .bounded("ptr", self.resolvers.dns.lookup_ptr(ip))
            .await?;
        let host = hosts.into_iter().next().unwrap_or_default();
        if let Err(e) = cache.set_string(&key, &host, self.settings.ptr_ttl).await {
            debug!(key = %key, error = %e, "Failed to cache PTR answer");
        }
        Some(host)
    }

    /// Whether the domain has MX or address records
    async fn domain_exists(&self, domain: &str) -> Option<bool> {
        let (mx, addr) = tokio::join!(
            self.bounded("mx", self.resolvers.dns.lookup_mx(domain)),
            self.bounded("addr", self.resolvers.dns.lookup_addr(domain)),
        );
        match (mx, addr) {
            (None, None) => None,
            (mx, addr) => Some(
                mx.map_or(false, |m| !m.is_empty()) || addr.map_or(false, |a| !a.is_empty()),
            ),
        }
    }

    /// Run a lookup under the resolver timeout; failures yield nothing
    async fn bounded<T>(
        &self,
        lookup: &'static str,
        query: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.settings.resolver_timeout, query).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                debug!(lookup, error = %e, "Lookup failed");
                None
            }
            Err(_) => {
                debug!(lookup, "Lookup timed out");
                None
            }
        }
    }
}

fn set_region(signals: &mut Signals, region: Region) {
    let joined = [&region.country, &region.province, &region.city]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("|");
    signals.set(names::REGION, joined);
    signals.set(names::COUNTRY, region.country);
    signals.set(names::PROVINCE, region.province);
    signals.set(names::CITY, region.city);
}
