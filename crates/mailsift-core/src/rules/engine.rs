//! Rule evaluation over the current knowledge base

use super::compiler::Program;
use crate::features::FeatureStore;
use arc_swap::ArcSwapOption;
use mailsift_common::types::{FilterAction, RuleId, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// Compiled program plus the rule-set version it was built from
#[derive(Debug)]
pub struct KnowledgeBase {
    pub program: Program,
    pub version: Option<Timestamp>,
}

/// Outcome of a rule evaluation
///
/// The default decision (no rule, no action) lets the transaction continue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    pub rule_id: Option<RuleId>,
    pub action: Option<FilterAction>,
}

impl Decision {
    pub fn matched(&self) -> bool {
        self.rule_id.is_some()
    }
}

/// Evaluates features against an atomically replaceable knowledge base
#[derive(Default)]
pub struct RuleEngine {
    kb: ArcSwapOption<KnowledgeBase>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new knowledge base; in-flight evaluations keep the old one
    pub fn install(&self, kb: KnowledgeBase) {
        self.kb.store(Some(Arc::new(kb)));
    }

    pub fn current(&self) -> Option<Arc<KnowledgeBase>> {
        self.kb.load_full()
    }

    /// First matching rule in salience order
    pub fn evaluate(&self, features: &FeatureStore) -> Decision {
        let guard = self.kb.load();
        let Some(kb) = guard.as_ref() else {
            return Decision::default();
        };

        for rule in kb.program.rules() {
            if rule.conditions.iter().all(|c| c.matches(features)) {
                debug!(rule_id = %rule.id, action = %rule.action, "rule matched");
                return Decision {
                    rule_id: Some(rule.id),
                    action: Some(rule.action),
                };
            }
        }
        Decision::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::rule;
    use crate::rules::RuleCompiler;
    use mailsift_common::Feature;
    use pretty_assertions::assert_eq;

    fn features() -> FeatureStore {
        vec![
            Feature::new("Sender", "x@bad.example"),
            Feature::new("Size", 5000i64),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_no_knowledge_base_continues() {
        let engine = RuleEngine::new();
        assert_eq!(engine.evaluate(&features()), Decision::default());
        assert!(!engine.evaluate(&features()).matched());
    }

    #[test]
    fn test_highest_salience_wins() {
        let compiler = RuleCompiler::new().unwrap();
        let mut low = rule(10, "reject");
        low.sender = Some("contains::bad.example".to_string());
        let mut high = rule(100, "accept");
        high.size = Some("gt::1000".to_string());
        let mut miss = rule(1000, "discard");
        miss.size = Some("lt::10".to_string());

        let engine = RuleEngine::new();
        engine.install(KnowledgeBase {
            program: compiler.compile(&[low.clone(), high.clone(), miss]).unwrap(),
            version: None,
        });

        assert_eq!(
            engine.evaluate(&features()),
            Decision {
                rule_id: Some(high.id),
                action: Some(FilterAction::Accept),
            }
        );

        let small: FeatureStore = vec![
            Feature::new("Sender", "x@bad.example"),
            Feature::new("Size", 500i64),
        ]
        .into_iter()
        .collect();
        assert_eq!(engine.evaluate(&small).rule_id, Some(low.id));
    }

    #[test]
    fn test_swap_replaces_program() {
        let compiler = RuleCompiler::new().unwrap();
        let mut first = rule(1, "reject");
        first.size = Some("gt::0".to_string());
        let mut second = rule(1, "defer");
        second.size = Some("gt::0".to_string());

        let engine = RuleEngine::new();
        engine.install(KnowledgeBase {
            program: compiler.compile(&[first]).unwrap(),
            version: None,
        });
        let held = engine.current().unwrap();

        engine.install(KnowledgeBase {
            program: compiler.compile(&[second]).unwrap(),
            version: None,
        });
        assert_eq!(engine.evaluate(&features()).action, Some(FilterAction::Defer));
        assert_eq!(held.program.rules()[0].action, FilterAction::Reject);
    }
}
