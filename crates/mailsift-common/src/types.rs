//! Common types for mailsift

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for filter fields
pub type FieldId = Uuid;

/// Unique identifier for filter metrics
pub type MetricId = Uuid;

/// Unique identifier for filter rules
pub type RuleId = Uuid;

/// Unique identifier for one mail transaction inside a milter session
pub type TransactionId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Implements `Display`, `FromStr` and `as_str` for a snake_case enum
/// stored as text in the database.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Storage/wire name of the value
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::Error::Config(format!(
                        "invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// SMTP phase at which a signal becomes available
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    Connect,
    Helo,
    MailFrom,
    RcptTo,
    Header,
    Data,
}

text_enum!(FilterStage {
    Connect => "connect",
    Helo => "helo",
    MailFrom => "mail_from",
    RcptTo => "rcpt_to",
    Header => "header",
    Data => "data",
});

impl FilterStage {
    /// All stages in transaction order
    pub const ALL: [FilterStage; 6] = [
        FilterStage::Connect,
        FilterStage::Helo,
        FilterStage::MailFrom,
        FilterStage::RcptTo,
        FilterStage::Header,
        FilterStage::Data,
    ];
}

/// Disposition attached to a filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Accept,
    Trash,
    Defer,
    Reject,
    Discard,
    Quarantine,
}

text_enum!(FilterAction {
    Accept => "accept",
    Trash => "trash",
    Defer => "defer",
    Reject => "reject",
    Discard => "discard",
    Quarantine => "quarantine",
});

/// Aggregation performed by a windowed metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOperation {
    /// Counter incremented per occurrence
    Count,
    /// Distinct secondary values collected per primary value
    Collect,
}

text_enum!(MetricOperation {
    Count => "count",
    Collect => "collect",
});

/// Time unit of a metric bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

text_enum!(MetricUnit {
    Minute => "minute",
    Hour => "hour",
    Day => "day",
    Week => "week",
    Month => "month",
    Year => "year",
});

/// Mail category a metric is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCategory {
    All,
    Unknown,
    Ham,
    Spam,
}

text_enum!(FilterCategory {
    All => "all",
    Unknown => "unknown",
    Ham => "ham",
    Spam => "spam",
});

/// Administrative status of fields, metrics and rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Inactive,
    Active,
    Deleted,
}

text_enum!(RecordStatus {
    Inactive => "inactive",
    Active => "active",
    Deleted => "deleted",
});

/// Typed feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeatureValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FeatureValue {
    /// Type tag of the value
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureValue::String(_) => "string",
            FeatureValue::Int(_) => "int",
            FeatureValue::Float(_) => "float",
            FeatureValue::Bool(_) => "bool",
        }
    }

    /// Numeric view used by comparison operators
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Bool(_) => None,
            FeatureValue::String(s) => s.trim().parse().ok(),
        }
    }

    /// Whether the value carries no information
    pub fn is_empty(&self) -> bool {
        matches!(self, FeatureValue::String(s) if s.is_empty())
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureValue::String(v) => f.write_str(v),
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::String(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::String(v.to_string())
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

/// Named signal derived from a mail transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(flatten)]
    pub value: FeatureValue,
}

impl Feature {
    /// Create a new feature
    pub fn new(name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_order_and_names() {
        assert!(FilterStage::Connect < FilterStage::RcptTo);
        assert!(FilterStage::Header < FilterStage::Data);
        assert_eq!(FilterStage::MailFrom.to_string(), "mail_from");
        assert_eq!("rcpt_to".parse::<FilterStage>().unwrap(), FilterStage::RcptTo);
        assert!("rcpt".parse::<FilterStage>().is_err());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("quarantine".parse::<FilterAction>().unwrap(), FilterAction::Quarantine);
        assert_eq!(FilterAction::Defer.as_str(), "defer");
    }

    #[test]
    fn test_feature_type_tag_survives_json() {
        let feature = Feature::new("Size", 2048i64);
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Size", "type": "int", "value": 2048})
        );

        let back: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(back, feature);

        let text = Feature::new("Size", "2048");
        let back: Feature =
            serde_json::from_value(serde_json::to_value(&text).unwrap()).unwrap();
        assert_eq!(back.value.kind(), "string");
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(FeatureValue::from("12").as_f64(), Some(12.0));
        assert_eq!(FeatureValue::from("abc").as_f64(), None);
        assert_eq!(FeatureValue::Bool(true).as_f64(), None);
    }
}
