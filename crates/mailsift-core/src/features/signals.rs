//! Raw signals collected from the SMTP transaction

use mailsift_common::types::FilterStage;
use mailsift_common::FeatureValue;
use std::collections::HashMap;

/// Names of the signals the session produces
pub mod names {
    pub const CLIENT_IP: &str = "ClientIP";
    pub const HOSTNAME: &str = "Hostname";
    pub const FAMILY: &str = "Family";
    pub const PORT: &str = "Port";
    pub const PTR: &str = "PTR";
    pub const REGION: &str = "Region";
    pub const COUNTRY: &str = "Country";
    pub const PROVINCE: &str = "Province";
    pub const CITY: &str = "City";
    pub const HELO: &str = "Helo";
    pub const SENDER: &str = "Sender";
    pub const SENDER_DOMAIN: &str = "SenderDomain";
    pub const SPF: &str = "SPF";
    pub const SENDER_DOMAIN_EXIST: &str = "SenderDomainExist";
    pub const RCPT: &str = "Rcpt";
    pub const RCPT_COUNT: &str = "RcptCount";
    pub const HEADER_FROM: &str = "HeaderFrom";
    pub const NICK: &str = "Nick";
    pub const MAILER: &str = "Mailer";
    pub const SUBJECT: &str = "Subject";
    pub const MESSAGE_ID: &str = "MessageID";
    pub const SIZE: &str = "Size";
    pub const TEXT: &str = "Text";
    pub const HTML: &str = "Html";
    pub const URL: &str = "URL";
    pub const TEXT_HASH: &str = "TextHash";
    pub const ATTACH_NAME: &str = "AttachName";
    pub const ATTACH_HASH: &str = "AttachHash";
    pub const ATTACH_DIGEST: &str = "AttachDigest";
    pub const ATTACH_COUNT: &str = "AttachCount";
}

/// Signals available at the current checkpoint
#[derive(Debug, Clone, Default)]
pub struct Signals {
    values: HashMap<String, FeatureValue>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signal; empty strings are dropped
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        let value = value.into();
        if !value.is_empty() {
            self.values.insert(name.into(), value);
        }
    }

    /// Add a signal even when its value is empty
    ///
    /// Header values are taken as sent; an empty header is still a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name).or_else(|| {
            self.values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeatureValue)> {
        self.values.iter()
    }
}

/// Signals accumulated over the connection and the current transaction
///
/// Connect and HELO signals belong to the connection and survive an abort;
/// everything later belongs to the transaction.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    connection: Signals,
    transaction: Signals,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the signals of a checkpoint
    pub fn record(&mut self, stage: FilterStage, signals: &Signals) {
        let target = match stage {
            FilterStage::Connect | FilterStage::Helo => &mut self.connection,
            _ => &mut self.transaction,
        };
        for (name, value) in signals.iter() {
            target.insert(name.clone(), value.clone());
        }
    }

    /// Current signals first, then the transaction, then the connection
    pub fn lookup<'a>(&'a self, current: &'a Signals, name: &str) -> Option<&'a FeatureValue> {
        current
            .get(name)
            .or_else(|| self.transaction.get(name))
            .or_else(|| self.connection.get(name))
    }

    /// Accumulated value, transaction before connection
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.transaction
            .get(name)
            .or_else(|| self.connection.get(name))
    }

    pub fn reset_transaction(&mut self) {
        self.transaction = Signals::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_signals_dropped() {
        let signals = Signals::new().with(names::SENDER, "").with(names::HELO, "mx");
        assert!(signals.get(names::SENDER).is_none());
        assert_eq!(signals.get("helo"), Some(&FeatureValue::from("mx")));
    }

    #[test]
    fn test_empty_header_value_kept() {
        let mut signals = Signals::new();
        signals.insert("X-Empty", "");
        assert_eq!(signals.get("x-empty"), Some(&FeatureValue::from("")));

        let mut payload = Payload::new();
        payload.record(FilterStage::Header, &signals);
        assert_eq!(payload.get("X-Empty"), Some(&FeatureValue::from("")));
    }

    #[test]
    fn test_payload_lookup_order_and_reset() {
        let mut payload = Payload::new();
        payload.record(
            FilterStage::Connect,
            &Signals::new().with(names::CLIENT_IP, "192.0.2.1"),
        );
        payload.record(
            FilterStage::RcptTo,
            &Signals::new().with(names::RCPT, "a@example.org"),
        );

        let current = Signals::new().with(names::RCPT, "b@example.org");
        assert_eq!(
            payload.lookup(&current, names::RCPT),
            Some(&FeatureValue::from("b@example.org"))
        );
        assert_eq!(
            payload.lookup(&Signals::new(), names::RCPT),
            Some(&FeatureValue::from("a@example.org"))
        );

        payload.reset_transaction();
        assert!(payload.lookup(&Signals::new(), names::RCPT).is_none());
        assert_eq!(
            payload.lookup(&Signals::new(), names::CLIENT_IP),
            Some(&FeatureValue::from("192.0.2.1"))
        );
    }
}
