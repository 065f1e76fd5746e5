//! Database models

use chrono::{DateTime, Utc};
use mailsift_common::types::{
    FieldId, FilterAction, FilterCategory, FilterStage, MetricId, MetricOperation, MetricUnit,
    RecordStatus, RuleId, TransactionId,
};
use mailsift_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Filter field model: which raw signal is available at which stage
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FilterField {
    pub id: FieldId,
    pub name: String,
    pub description: Option<String>,
    pub stage: String,
    pub can_metric: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FilterField {
    /// Stage the field becomes available at
    pub fn stage(&self) -> Result<FilterStage> {
        self.stage.parse()
    }

    /// Whether the field participates in extraction
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active.as_str()
    }
}

/// Filter field creation / update input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFilterField {
    pub name: String,
    pub description: Option<String>,
    pub stage: FilterStage,
    pub can_metric: bool,
}

/// Filter metric model: windowed aggregation over one or two fields
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FilterMetric {
    pub id: MetricId,
    pub name: String,
    pub description: Option<String>,
    pub primary_field_id: FieldId,
    pub secondary_field_id: Option<FieldId>,
    pub operation: String,
    pub category: String,
    pub unit: String,
    #[sqlx(rename = "bucket_interval")]
    pub interval: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FilterMetric {
    pub fn operation(&self) -> Result<MetricOperation> {
        self.operation.parse()
    }

    pub fn category(&self) -> Result<FilterCategory> {
        self.category.parse()
    }

    pub fn unit(&self) -> Result<MetricUnit> {
        self.unit.parse()
    }

    /// Whether the metric participates in extraction
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active.as_str()
    }
}

/// Filter metric creation / update input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFilterMetric {
    pub name: String,
    pub description: Option<String>,
    pub primary_field_id: FieldId,
    pub secondary_field_id: Option<FieldId>,
    pub operation: MetricOperation,
    pub category: FilterCategory,
    pub unit: MetricUnit,
    pub interval: i32,
}

impl CreateFilterMetric {
    /// A metric over a single field can only count
    pub fn validate(&self) -> Result<()> {
        if self.secondary_field_id.is_none() && self.operation != MetricOperation::Count {
            return Err(Error::Config(format!(
                "metric {} needs a secondary field to collect",
                self.name
            )));
        }
        if self.interval < 1 {
            return Err(Error::Config(format!(
                "metric {} has a non-positive interval",
                self.name
            )));
        }
        Ok(())
    }
}

/// Metric together with the fields it is bound to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub metric: FilterMetric,
    pub primary: FilterField,
    pub secondary: Option<FilterField>,
}

impl MetricDefinition {
    /// Stage at which every bound field is available
    pub fn stage(&self) -> Result<FilterStage> {
        let primary = self.primary.stage()?;
        match &self.secondary {
            Some(secondary) => Ok(primary.max(secondary.stage()?)),
            None => Ok(primary),
        }
    }
}

/// Filter rule model
///
/// Every condition column holds an `operator::value` pair or nothing;
/// `assembly` holds extra `;;`-separated expressions.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: RuleId,
    pub priority: i32,
    pub description: String,
    pub action: String,
    pub client_ip: Option<String>,
    pub sender: Option<String>,
    pub header_from: Option<String>,
    pub nick: Option<String>,
    pub rcpt: Option<String>,
    pub size: Option<String>,
    pub mailer: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub text_hash: Option<String>,
    pub attach_name: Option<String>,
    pub attach_hash: Option<String>,
    pub attach_digest: Option<String>,
    pub url: Option<String>,
    pub assembly: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FilterRule {
    pub fn action(&self) -> Result<FilterAction> {
        self.action.parse()
    }

    /// Non-empty condition columns, paired with the feature they test
    pub fn field_conditions(&self) -> Vec<(&'static str, &str)> {
        let columns: [(&'static str, &Option<String>); 15] = [
            ("ClientIP", &self.client_ip),
            ("Sender", &self.sender),
            ("HeaderFrom", &self.header_from),
            ("Nick", &self.nick),
            ("Rcpt", &self.rcpt),
            ("Size", &self.size),
            ("Mailer", &self.mailer),
            ("Subject", &self.subject),
            ("Text", &self.text),
            ("Html", &self.html),
            ("TextHash", &self.text_hash),
            ("AttachName", &self.attach_name),
            ("AttachHash", &self.attach_hash),
            ("AttachDigest", &self.attach_digest),
            ("URL", &self.url),
        ];

        columns
            .into_iter()
            .filter_map(|(feature, value)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (feature, v))
            })
            .collect()
    }
}

/// Filter rule creation / update input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFilterRule {
    pub priority: i32,
    pub description: String,
    pub action: Option<FilterAction>,
    pub client_ip: Option<String>,
    pub sender: Option<String>,
    pub header_from: Option<String>,
    pub nick: Option<String>,
    pub rcpt: Option<String>,
    pub size: Option<String>,
    pub mailer: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub text_hash: Option<String>,
    pub attach_name: Option<String>,
    pub attach_hash: Option<String>,
    pub attach_digest: Option<String>,
    pub url: Option<String>,
    pub assembly: Option<String>,
}

/// Persisted fuzzy hash
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FuzzyHash {
    pub id: Uuid,
    pub hash: String,
    pub session_id: TransactionId,
    pub chunk_size: i64,
    pub is_attachment: bool,
    pub created_at: DateTime<Utc>,
}

/// Fuzzy hash creation input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFuzzyHash {
    pub hash: String,
    pub session_id: TransactionId,
    pub chunk_size: i64,
    pub is_attachment: bool,
}

/// Per-transaction filter log record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FilterLog {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub client_ip: Option<String>,
    pub sender: Option<String>,
    pub nick: Option<String>,
    pub rcpt: Option<String>,
    pub size: i64,
    pub mailer: Option<String>,
    pub subject: Option<String>,
    pub features: serde_json::Value,
    pub action: Option<String>,
    pub rule_id: Option<RuleId>,
    pub created_at: DateTime<Utc>,
}

/// Filter log creation input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFilterLog {
    pub transaction_id: TransactionId,
    pub client_ip: Option<String>,
    pub sender: Option<String>,
    pub nick: Option<String>,
    pub rcpt: Option<String>,
    pub size: i64,
    pub mailer: Option<String>,
    pub subject: Option<String>,
    pub features: serde_json::Value,
    pub action: Option<FilterAction>,
    pub rule_id: Option<RuleId>,
}
