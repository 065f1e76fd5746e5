//! Background rule reloading

use super::compiler::RuleCompiler;
use super::engine::{KnowledgeBase, RuleEngine};
use mailsift_common::types::Timestamp;
use mailsift_common::Result;
use mailsift_storage::FilterRuleRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Polls the rule set's last update and recompiles when it changes
pub struct RuleReloader {
    repo: Arc<dyn FilterRuleRepository>,
    engine: Arc<RuleEngine>,
    compiler: RuleCompiler,
    interval: Duration,
    last_success: Option<Option<Timestamp>>,
    last_failure: Option<Option<Timestamp>>,
}

impl RuleReloader {
    pub fn new(
        repo: Arc<dyn FilterRuleRepository>,
        engine: Arc<RuleEngine>,
        interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            repo,
            engine,
            compiler: RuleCompiler::new()?,
            interval,
            last_success: None,
            last_failure: None,
        })
    }

    /// Check once; returns whether a new knowledge base was installed
    ///
    /// A version that already failed to compile is not retried until the
    /// rule set changes again. Repository errors are returned and retried on
    /// the next poll.
    pub async fn reload_once(&mut self) -> Result<bool> {
        let version = self.repo.last_update().await?;
        if self.last_success == Some(version) || self.last_failure == Some(version) {
            return Ok(false);
        }

        let rules = self.repo.list_active().await?;
        match self.compiler.compile(&rules) {
            Ok(program) => {
                info!(
                    rules = program.len(),
                    version = ?version,
                    "Installed new rule knowledge base"
                );
                self.engine.install(KnowledgeBase { program, version });
                self.last_success = Some(version);
                self.last_failure = None;
                Ok(true)
            }
            Err(e) => {
                error!(
                    version = ?version,
                    "Rule compilation failed, keeping the current knowledge base: {}",
                    e
                );
                self.last_failure = Some(version);
                Ok(false)
            }
        }
    }

    /// Poll until the task is aborted
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reload_once().await {
                debug!("Rule reload check failed: {}", e);
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
