//! Shared state handed to every milter session

use crate::features::FeatureExtractor;
use crate::milter::codec::action;
use crate::rules::RuleEngine;
use mailsift_common::Config;
use mailsift_storage::{FilterLogRepository, FuzzyHashRepository};
use std::sync::Arc;
use std::time::Duration;

/// Per-connection protocol settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Action flags offered during option negotiation
    pub actions: u32,
    /// Protocol flags offered during option negotiation
    pub protocol: u32,
    pub max_frame_size: usize,
    pub read_timeout: Duration,
    /// Write a filter log record at end of body
    pub filter_log: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            actions: config.milter.actions,
            protocol: config.milter.protocol,
            max_frame_size: config.milter.max_frame_size,
            read_timeout: Duration::from_secs(config.milter.read_timeout_secs),
            filter_log: config.filter.filter_log,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            actions: action::ADDHDRS
                | action::CHGBODY
                | action::ADDRCPT
                | action::DELRCPT
                | action::CHGHDRS
                | action::QUARANTINE
                | action::CHGFROM,
            protocol: 0,
            max_frame_size: 65535 + 1024,
            read_timeout: Duration::from_secs(300),
            filter_log: true,
        }
    }
}

/// Everything a session needs besides its own connection
pub struct FilterContext {
    pub extractor: FeatureExtractor,
    pub engine: Arc<RuleEngine>,
    pub hashes: Arc<dyn FuzzyHashRepository>,
    pub logs: Arc<dyn FilterLogRepository>,
    pub settings: SessionSettings,
}

impl FilterContext {
    pub fn new(
        extractor: FeatureExtractor,
        engine: Arc<RuleEngine>,
        hashes: Arc<dyn FuzzyHashRepository>,
        logs: Arc<dyn FilterLogRepository>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            extractor,
            engine,
            hashes,
            logs,
            settings,
        }
    }
}
