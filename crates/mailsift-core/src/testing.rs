//! In-memory repositories for tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mailsift_common::types::{FieldId, FilterStage, MetricId, RecordStatus, RuleId, Timestamp, TransactionId};
use mailsift_common::{Error, Result};
use mailsift_storage::{
    assemble_definitions, CreateFilterField, CreateFilterLog, CreateFilterMetric, CreateFilterRule,
    CreateFuzzyHash, FilterField, FilterFieldRepository, FilterLog, FilterLogRepository,
    FilterMetric, FilterMetricRepository, FilterRule, FilterRuleRepository, FuzzyHash,
    FuzzyHashRepository, MetricDefinition,
};
use crate::context::{FilterContext, SessionSettings};
use crate::features::{ExtractorSettings, FeatureExtractor, FilterCatalog, Resolvers};
use crate::metrics::{MemoryMetricCache, MetricEngine};
use crate::resolver::{DnsResolver, DnsSpfChecker, NoRegionLookup};
use crate::rules::{KnowledgeBase, RuleCompiler, RuleEngine};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

static CLOCK: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing timestamps so every change is visible to pollers
pub fn tick() -> Timestamp {
    Utc::now() + Duration::seconds(CLOCK.fetch_add(1, Ordering::SeqCst))
}

pub fn field(name: &str, stage: FilterStage) -> FilterField {
    FilterField {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        stage: stage.to_string(),
        can_metric: true,
        status: RecordStatus::Active.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn rule(priority: i32, action: &str) -> FilterRule {
    FilterRule {
        id: Uuid::new_v4(),
        priority,
        description: format!("{} at {}", action, priority),
        action: action.to_string(),
        client_ip: None,
        sender: None,
        header_from: None,
        nick: None,
        rcpt: None,
        size: None,
        mailer: None,
        subject: None,
        text: None,
        html: None,
        text_hash: None,
        attach_name: None,
        attach_hash: None,
        attach_digest: None,
        url: None,
        assembly: None,
        status: RecordStatus::Active.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn metric(name: &str, primary: &FilterField, secondary: Option<&FilterField>, operation: &str) -> FilterMetric {
    FilterMetric {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        primary_field_id: primary.id,
        secondary_field_id: secondary.map(|f| f.id),
        operation: operation.to_string(),
        category: "all".to_string(),
        unit: "minute".to_string(),
        interval: 10,
        status: RecordStatus::Active.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: Mutex<Vec<FilterRule>>,
}

impl MemoryRuleRepository {
    /// Insert or replace a rule, marking it updated now
    pub async fn put(&self, mut rule: FilterRule) {
        rule.updated_at = tick();
        let mut rules = self.rules.lock().await;
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
    }

    pub async fn deactivate_all(&self) {
        let now = tick();
        for rule in self.rules.lock().await.iter_mut() {
            rule.status = RecordStatus::Inactive.to_string();
            rule.updated_at = now;
        }
    }
}

#[async_trait]
impl FilterRuleRepository for MemoryRuleRepository {
    async fn create(&self, _input: CreateFilterRule) -> Result<FilterRule> {
        Err(Error::Database("not supported".into()))
    }

    async fn get(&self, id: RuleId) -> Result<Option<FilterRule>> {
        Ok(self.rules.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<FilterRule>> {
        let mut rules: Vec<_> = self
            .rules
            .lock()
            .await
            .iter()
            .filter(|r| r.status == RecordStatus::Active.as_str())
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn last_update(&self) -> Result<Option<Timestamp>> {
        Ok(self.rules.lock().await.iter().map(|r| r.updated_at).max())
    }

    async fn update(&self, _id: RuleId, _input: CreateFilterRule) -> Result<FilterRule> {
        Err(Error::Database("not supported".into()))
    }

    async fn toggle(&self, _id: RuleId) -> Result<RecordStatus> {
        Err(Error::Database("not supported".into()))
    }

    async fn delete(&self, id: RuleId) -> Result<()> {
        self.rules.lock().await.retain(|r| r.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFieldRepository {
    pub fields: Mutex<Vec<FilterField>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MemoryFieldRepository {
    pub fn with(fields: Vec<FilterField>) -> Self {
        Self {
            fields: Mutex::new(fields),
            fail: Default::default(),
        }
    }
}

#[async_trait]
impl FilterFieldRepository for MemoryFieldRepository {
    async fn create(&self, input: CreateFilterField) -> Result<FilterField> {
        let mut created = field(&input.name, input.stage);
        created.can_metric = input.can_metric;
        self.fields.lock().await.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: FieldId) -> Result<Option<FilterField>> {
        Ok(self.fields.lock().await.iter().find(|f| f.id == id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<FilterField>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Database("unavailable".into()));
        }
        Ok(self.fields.lock().await.iter().filter(|f| f.is_active()).cloned().collect())
    }

    async fn list_active_by_stage(&self, stage: FilterStage) -> Result<Vec<FilterField>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|f| f.stage == stage.as_str())
            .collect())
    }

    async fn update(&self, id: FieldId, input: CreateFilterField) -> Result<FilterField> {
        let mut fields = self.fields.lock().await;
        let field = fields
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::Database("not found".into()))?;
        field.name = input.name;
        field.stage = input.stage.to_string();
        field.can_metric = input.can_metric;
        Ok(field.clone())
    }

    async fn toggle(&self, id: FieldId) -> Result<RecordStatus> {
        let mut fields = self.fields.lock().await;
        let field = fields
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::Database("not found".into()))?;
        let next = if field.is_active() {
            RecordStatus::Inactive
        } else {
            RecordStatus::Active
        };
        field.status = next.to_string();
        Ok(next)
    }

    async fn delete(&self, id: FieldId) -> Result<()> {
        self.fields.lock().await.retain(|f| f.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMetricRepository {
    pub metrics: Mutex<Vec<FilterMetric>>,
    pub fields: Mutex<Vec<FilterField>>,
}

impl MemoryMetricRepository {
    pub fn with(metrics: Vec<FilterMetric>, fields: Vec<FilterField>) -> Self {
        Self {
            metrics: Mutex::new(metrics),
            fields: Mutex::new(fields),
        }
    }
}

#[async_trait]
impl FilterMetricRepository for MemoryMetricRepository {
    async fn create(&self, input: CreateFilterMetric) -> Result<FilterMetric> {
        input.validate()?;
        let created = FilterMetric {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            primary_field_id: input.primary_field_id,
            secondary_field_id: input.secondary_field_id,
            operation: input.operation.to_string(),
            category: input.category.to_string(),
            unit: input.unit.to_string(),
            interval: input.interval,
            status: RecordStatus::Active.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.metrics.lock().await.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: MetricId) -> Result<Option<FilterMetric>> {
        Ok(self.metrics.lock().await.iter().find(|m| m.id == id).cloned())
    }

    async fn list_active_definitions(&self) -> Result<Vec<MetricDefinition>> {
        let metrics = self.metrics.lock().await.clone();
        let fields = self.fields.lock().await.clone();
        Ok(assemble_definitions(metrics, fields))
    }

    async fn update(&self, _id: MetricId, _input: CreateFilterMetric) -> Result<FilterMetric> {
        Err(Error::Database("not supported".into()))
    }

    async fn toggle(&self, id: MetricId) -> Result<RecordStatus> {
        let mut metrics = self.metrics.lock().await;
        let metric = metrics
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::Database("not found".into()))?;
        let next = if metric.is_active() {
            RecordStatus::Inactive
        } else {
            RecordStatus::Active
        };
        metric.status = next.to_string();
        Ok(next)
    }

    async fn delete(&self, id: MetricId) -> Result<()> {
        self.metrics.lock().await.retain(|m| m.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHashRepository {
    pub hashes: Mutex<Vec<FuzzyHash>>,
}

#[async_trait]
impl FuzzyHashRepository for MemoryHashRepository {
    async fn create_if_absent(&self, input: CreateFuzzyHash) -> Result<FuzzyHash> {
        let mut hashes = self.hashes.lock().await;
        if let Some(existing) = hashes.iter().find(|h| h.hash == input.hash) {
            return Ok(existing.clone());
        }
        let record = FuzzyHash {
            id: Uuid::new_v4(),
            hash: input.hash,
            session_id: input.session_id,
            chunk_size: input.chunk_size,
            is_attachment: input.is_attachment,
            created_at: Utc::now(),
        };
        hashes.push(record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FuzzyHash>> {
        Ok(self.hashes.lock().await.iter().find(|h| h.hash == hash).cloned())
    }
}

#[derive(Default)]
pub struct MemoryLogRepository {
    pub logs: Mutex<Vec<CreateFilterLog>>,
}

#[async_trait]
impl FilterLogRepository for MemoryLogRepository {
    async fn create(&self, input: CreateFilterLog) -> Result<Uuid> {
        self.logs.lock().await.push(input);
        Ok(Uuid::new_v4())
    }

    async fn list_by_transaction(&self, transaction_id: TransactionId) -> Result<Vec<FilterLog>> {
        Ok(self
            .logs
            .lock()
            .await
            .iter()
            .filter(|l| l.transaction_id == transaction_id)
            .map(|l| FilterLog {
                id: Uuid::new_v4(),
                transaction_id: l.transaction_id,
                client_ip: l.client_ip.clone(),
                sender: l.sender.clone(),
                nick: l.nick.clone(),
                rcpt: l.rcpt.clone(),
                size: l.size,
                mailer: l.mailer.clone(),
                subject: l.subject.clone(),
                features: l.features.clone(),
                action: l.action.map(|a| a.to_string()),
                rule_id: l.rule_id,
                created_at: Utc::now(),
            })
            .collect())
    }
}

/// DNS answers from a fixed table
#[derive(Default, Clone)]
pub struct StaticDns {
    txt: std::collections::HashMap<String, Vec<String>>,
    mx: std::collections::HashMap<String, Vec<String>>,
    addr: std::collections::HashMap<String, Vec<std::net::IpAddr>>,
    ptr: std::collections::HashMap<std::net::IpAddr, Vec<String>>,
    /// Answer every query after this long
    pub delay: Option<std::time::Duration>,
}

impl StaticDns {
    pub fn txt(mut self, name: &str, value: &str) -> Self {
        self.txt.entry(name.to_string()).or_default().push(value.to_string());
        self
    }

    pub fn mx(mut self, name: &str, host: &str) -> Self {
        self.mx.entry(name.to_string()).or_default().push(host.to_string());
        self
    }

    pub fn addr(mut self, name: &str, ip: &str) -> Self {
        if let Ok(ip) = ip.parse() {
            self.addr.entry(name.to_string()).or_default().push(ip);
        }
        self
    }

    pub fn ptr(mut self, ip: &str, host: &str) -> Self {
        if let Ok(ip) = ip.parse() {
            self.ptr.entry(ip).or_default().push(host.to_string());
        }
        self
    }

    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl crate::resolver::DnsResolver for StaticDns {
    async fn lookup_ptr(&self, ip: std::net::IpAddr) -> Result<Vec<String>> {
        self.pause().await;
        Ok(self.ptr.get(&ip).cloned().unwrap_or_default())
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        self.pause().await;
        Ok(self.txt.get(name).cloned().unwrap_or_default())
    }

    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>> {
        self.pause().await;
        Ok(self.mx.get(name).cloned().unwrap_or_default())
    }

    async fn lookup_addr(&self, name: &str) -> Result<Vec<std::net::IpAddr>> {
        self.pause().await;
        Ok(self.addr.get(name).cloned().unwrap_or_default())
    }
}

/// Session context over in-memory stores
pub struct TestContext {
    pub ctx: Arc<FilterContext>,
    pub hashes: Arc<MemoryHashRepository>,
    pub logs: Arc<MemoryLogRepository>,
}

/// Context with the given active fields and rules, no metrics and no DNS data
pub fn context(fields: Vec<FilterField>, rules: Vec<FilterRule>) -> TestContext {
    let cache = Arc::new(MemoryMetricCache::new());
    let catalog = Arc::new(FilterCatalog::new(
        cache.clone(),
        Arc::new(MemoryFieldRepository::with(fields)),
        Arc::new(MemoryMetricRepository::default()),
        std::time::Duration::from_secs(300),
    ));
    let dns: Arc<dyn DnsResolver> = Arc::new(StaticDns::default());
    let resolvers = Resolvers {
        spf: Arc::new(DnsSpfChecker::new(dns.clone())),
        dns,
        regions: Arc::new(NoRegionLookup),
    };
    let extractor = FeatureExtractor::new(
        catalog,
        MetricEngine::new(cache),
        resolvers,
        ExtractorSettings::default(),
    )
    .expect("extractor");

    let engine = Arc::new(RuleEngine::new());
    if !rules.is_empty() {
        let program = RuleCompiler::new()
            .and_then(|c| c.compile(&rules).map_err(Error::from))
            .expect("rules compile");
        engine.install(KnowledgeBase {
            program,
            version: None,
        });
    }

    let hashes = Arc::new(MemoryHashRepository::default());
    let logs = Arc::new(MemoryLogRepository::default());
    TestContext {
        ctx: Arc::new(FilterContext::new(
            extractor,
            engine,
            hashes.clone(),
            logs.clone(),
            SessionSettings::default(),
        )),
        hashes,
        logs,
    }
}
