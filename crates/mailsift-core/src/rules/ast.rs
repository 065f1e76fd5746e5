//! Typed rule conditions

use crate::features::FeatureStore;
use mailsift_common::{CompileError, FeatureValue};
use std::fmt;
use std::str::FromStr;

/// Comparison applied to a feature value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Contains,
    HasPrefix,
    HasSuffix,
    /// Text equality
    Equals,
    /// Text inequality
    NotEquals,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Numeric equality
    Equal,
    /// Numeric inequality
    NotEqual,
}

impl Operator {
    /// Whether the operator compares numbers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::Gt
                | Operator::Lt
                | Operator::Gte
                | Operator::Lte
                | Operator::Equal
                | Operator::NotEqual
        )
    }
}

impl FromStr for Operator {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contains" => Ok(Operator::Contains),
            "hasprefix" => Ok(Operator::HasPrefix),
            "hassuffix" => Ok(Operator::HasSuffix),
            "equals" => Ok(Operator::Equals),
            "notequals" => Ok(Operator::NotEquals),
            "gt" => Ok(Operator::Gt),
            "lt" => Ok(Operator::Lt),
            "gte" => Ok(Operator::Gte),
            "lte" => Ok(Operator::Lte),
            "equal" => Ok(Operator::Equal),
            "notequal" => Ok(Operator::NotEqual),
            other => Err(CompileError::InvalidCondition {
                field: String::new(),
                reason: format!("unknown operator {}", other),
            }),
        }
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Number(f64),
}

/// One `feature <op> operand` test
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub operand: Operand,
}

impl Condition {
    /// Build a condition, checking the operand suits the operator
    pub fn new(field: impl Into<String>, op: Operator, raw: &str) -> Result<Self, CompileError> {
        let field = field.into();
        let operand = if op.is_numeric() {
            let number = raw.trim().parse::<f64>().map_err(|_| CompileError::InvalidCondition {
                field: field.clone(),
                reason: format!("{:?} needs a number, got {:?}", op, raw),
            })?;
            Operand::Number(number)
        } else {
            Operand::Text(raw.to_string())
        };
        Ok(Self { field, op, operand })
    }

    /// Evaluate against the transaction features
    ///
    /// A missing feature never matches, nor does a numeric test on a
    /// non-numeric value.
    pub fn matches(&self, features: &FeatureStore) -> bool {
        let Some(value) = features.find(&self.field) else {
            return false;
        };

        match &self.operand {
            Operand::Text(expected) => {
                let actual = text_of(value);
                match self.op {
                    Operator::Contains => actual.contains(expected.as_str()),
                    Operator::HasPrefix => actual.starts_with(expected.as_str()),
                    Operator::HasSuffix => actual.ends_with(expected.as_str()),
                    Operator::Equals => actual == *expected,
                    Operator::NotEquals => actual != *expected,
                    _ => false,
                }
            }
            Operand::Number(expected) => {
                let Some(actual) = value.as_f64() else {
                    return false;
                };
                match self.op {
                    Operator::Gt => actual > *expected,
                    Operator::Lt => actual < *expected,
                    Operator::Gte => actual >= *expected,
                    Operator::Lte => actual <= *expected,
                    Operator::Equal => actual == *expected,
                    Operator::NotEqual => actual != *expected,
                    _ => false,
                }
            }
        }
    }
}

fn text_of(value: &FeatureValue) -> String {
    match value {
        FeatureValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = &self.field;
        match (&self.operand, self.op) {
            (Operand::Text(v), Operator::Contains) => write!(f, "feature.{}.Contains({})", field, quote(v)),
            (Operand::Text(v), Operator::HasPrefix) => write!(f, "feature.{}.HasPrefix({})", field, quote(v)),
            (Operand::Text(v), Operator::HasSuffix) => write!(f, "feature.{}.HasSuffix({})", field, quote(v)),
            (Operand::Text(v), Operator::NotEquals) => write!(f, "feature.{} != {}", field, quote(v)),
            (Operand::Text(v), _) => write!(f, "feature.{} == {}", field, quote(v)),
            (Operand::Number(n), op) => {
                let symbol = match op {
                    Operator::Gt => ">",
                    Operator::Lt => "<",
                    Operator::Gte => ">=",
                    Operator::Lte => "<=",
                    Operator::NotEqual => "!=",
                    _ => "==",
                };
                write!(f, "feature.{} {} {}", field, symbol, n)
            }
        }
    }
}
