//! Compiles stored filter rules into an executable program

use super::ast::{Condition, Operator};
use mailsift_common::types::{FilterAction, RuleId};
use mailsift_common::{CompileError, Error, Result};
use mailsift_storage::FilterRule;
use regex::Regex;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Separator of expressions in a rule's `assembly` column
const ASSEMBLY_SEPARATOR: &str = ";;";

/// One compiled rule: all conditions must hold
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: RuleId,
    pub salience: i32,
    pub description: String,
    pub action: FilterAction,
    pub conditions: Vec<Condition>,
}

impl CompiledRule {
    /// Debug rendering of the rule
    pub fn to_drl(&self) -> String {
        let when = self
            .conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" && ");

        format!(
            "rule rule_{id} \"{desc}\" salience {salience} {{\n\twhen\n\t\t{when}\n\tthen\n\t\tresult.RuleID=\"{id}\";\n\t\tresult.Action=\"{action}\";\n\t\tRetract(\"rule_{id}\");\n\t\tComplete();\n}}\n",
            id = self.id,
            desc = self.description.replace('"', ""),
            salience = self.salience,
            when = when,
            action = self.action,
        )
    }
}

/// Rules ordered for first-match evaluation
#[derive(Debug, Clone, Default)]
pub struct Program {
    rules: Vec<CompiledRule>,
}

impl Program {
    /// Highest salience first, ties broken by rule id
    pub fn new(mut rules: Vec<CompiledRule>) -> Self {
        rules.sort_by(|a, b| match b.salience.cmp(&a.salience) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        });
        Self { rules }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_drl(&self) -> String {
        self.rules.iter().map(CompiledRule::to_drl).collect::<Vec<_>>().join("\n")
    }
}

/// Parses condition columns and assembly expressions
pub struct RuleCompiler {
    method_call: Regex,
    comparison: Regex,
}

impl RuleCompiler {
    pub fn new() -> Result<Self> {
        let method_call = Regex::new(
            r#"^\s*(?:feature\.)?([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*((?i:contains|hasprefix|hassuffix))\s*\(\s*"((?:[^"\\]|\\.)*)"\s*\)\s*$"#,
        )
        .map_err(|e| Error::Config(format!("rule pattern: {}", e)))?;
        let comparison = Regex::new(
            r#"^\s*(?:feature\.)?([A-Za-z_][A-Za-z0-9_]*)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$"#,
        )
        .map_err(|e| Error::Config(format!("rule pattern: {}", e)))?;

        Ok(Self {
            method_call,
            comparison,
        })
    }

    /// Compile every rule; rules that fail are skipped with a warning
    pub fn compile(&self, rules: &[FilterRule]) -> std::result::Result<Program, CompileError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.compile_rule(rule) {
                Ok(unit) => {
                    debug!(rule_id = %rule.id, "rule compiled:\n{}", unit.to_drl());
                    compiled.push(unit);
                }
                Err(e) => warn!(rule_id = %rule.id, "Skipping rule: {}", e),
            }
        }

        if compiled.is_empty() {
            return Err(CompileError::NoActiveRules);
        }
        Ok(Program::new(compiled))
    }

    /// Compile a single rule
    pub fn compile_rule(&self, rule: &FilterRule) -> std::result::Result<CompiledRule, CompileError> {
        let action = rule.action().map_err(|e| CompileError::InvalidCondition {
            field: "action".to_string(),
            reason: e.to_string(),
        })?;

        let mut conditions = Vec::new();
        for (field, define) in rule.field_conditions() {
            conditions.push(parse_column(field, define)?);
        }

        if let Some(assembly) = rule.assembly.as_deref() {
            for fragment in assembly.split(ASSEMBLY_SEPARATOR) {
                if fragment.trim().is_empty() {
                    continue;
                }
                match self.parse_expression(fragment) {
                    Ok(condition) => conditions.push(condition),
                    Err(e) => warn!(rule_id = %rule.id, fragment, "Ignoring expression: {}", e),
                }
            }
        }

        if conditions.is_empty() {
            return Err(CompileError::EmptyCondition(rule.id.to_string()));
        }

        Ok(CompiledRule {
            id: rule.id,
            salience: rule.priority,
            description: rule.description.clone(),
            action,
            conditions,
        })
    }

    /// Parse one assembly expression such as `Subject.Contains("x")` or `Size > 10`
    pub fn parse_expression(&self, fragment: &str) -> std::result::Result<Condition, CompileError> {
        if let Some(caps) = self.method_call.captures(fragment) {
            let op: Operator = caps[2].parse()?;
            return Condition::new(&caps[1], op, &unescape(&caps[3]));
        }

        if let Some(caps) = self.comparison.captures(fragment) {
            let field = &caps[1];
            let symbol = &caps[2];
            let rhs = &caps[3];

            if let Some(text) = quoted(rhs) {
                let op = match symbol {
                    "==" => Operator::Equals,
                    "!=" => Operator::NotEquals,
                    _ => {
                        return Err(CompileError::InvalidCondition {
                            field: field.to_string(),
                            reason: format!("{} cannot compare text", symbol),
                        })
                    }
                };
                return Condition::new(field, op, &text);
            }

            let op = match symbol {
                "==" => Operator::Equal,
                "!=" => Operator::NotEqual,
                ">=" => Operator::Gte,
                "<=" => Operator::Lte,
                ">" => Operator::Gt,
                _ => Operator::Lt,
            };
            return Condition::new(field, op, rhs);
        }

        Err(CompileError::InvalidCondition {
            field: String::new(),
            reason: format!("cannot parse {:?}", fragment.trim()),
        })
    }
}

/// Parse an `operator::value` condition column
fn parse_column(field: &str, define: &str) -> std::result::Result<Condition, CompileError> {
    let (op, value) = define
        .split_once("::")
        .ok_or_else(|| CompileError::InvalidCondition {
            field: field.to_string(),
            reason: format!("expected operator::value, got {:?}", define),
        })?;

    let op: Operator = op.parse().map_err(|e| match e {
        CompileError::InvalidCondition { reason, .. } => CompileError::InvalidCondition {
            field: field.to_string(),
            reason,
        },
        other => other,
    })?;
    Condition::new(field, op, value)
}

fn quoted(rhs: &str) -> Option<String> {
    let inner = rhs.strip_prefix('"')?.strip_suffix('"')?;
    Some(unescape(inner))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
