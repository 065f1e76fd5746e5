//! Milter session: one MTA connection, possibly many transactions

use super::codec::{
    command, decode_cstrings, decode_pairs, protocol, read_message, read_u32, write_message,
    Message, PROTOCOL_VERSION,
};
use super::Response;
use crate::context::FilterContext;
use crate::disposition;
use crate::features::{names, FeatureStore, Payload, Signals};
use crate::rules::Decision;
use mailsift_common::types::{FilterStage, TransactionId};
use mailsift_common::{Error, Feature, Result};
use mailsift_storage::{CreateFilterLog, CreateFuzzyHash};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Milter session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for option negotiation
    Initial,
    OptionsNegotiated,
    Connected,
    HeloSeen,
    /// Envelope seen, header lines arriving
    HeadersAccumulating,
    HeadersComplete,
    BodyAccumulating,
    TransactionComplete,
    Aborted,
    Closed,
}

/// Replies to one command and whether the connection ends
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub responses: Vec<Response>,
    pub close: bool,
}

impl Outcome {
    fn reply(responses: Vec<Response>) -> Self {
        Self {
            responses,
            close: false,
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

/// Envelope address without angle brackets
fn strip_brackets(address: &str) -> String {
    address
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn family_name(family: u8) -> &'static str {
    match family {
        b'L' => "unix",
        b'4' => "tcp4",
        b'6' => "tcp6",
        _ => "unknown",
    }
}

/// Parsed connect payload
#[derive(Debug, PartialEq, Eq)]
struct ConnectInfo {
    hostname: String,
    family: u8,
    port: Option<u16>,
    address: String,
}

/// `hostname\0 family [port] address\0`; `Ok(None)` when an inet family
/// lacks its port
fn parse_connect(payload: &[u8]) -> Result<Option<ConnectInfo>> {
    let nul = payload
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::Protocol("connect without hostname terminator".to_string()))?;
    let hostname = String::from_utf8_lossy(&payload[..nul]).into_owned();

    let rest = &payload[nul + 1..];
    let Some((&family, rest)) = rest.split_first() else {
        return Err(Error::Protocol("connect without address family".to_string()));
    };

    let (port, rest) = match family {
        b'4' | b'6' => {
            if rest.len() < 2 {
                return Ok(None);
            }
            (Some(u16::from_be_bytes([rest[0], rest[1]])), &rest[2..])
        }
        _ => (None, rest),
    };

    let address = decode_cstrings(rest).into_iter().next().unwrap_or_default();
    Ok(Some(ConnectInfo {
        hostname,
        family,
        port,
        address,
    }))
}

/// One milter connection
pub struct Session {
    ctx: Arc<FilterContext>,
    peer: String,
    state: SessionState,
    version: u32,
    actions: u32,
    protocol: u32,
    macros: HashMap<String, String>,
    transaction_id: TransactionId,
    payload: Payload,
    features: FeatureStore,
    /// Connect and HELO features, restored after an abort
    connection_features: Vec<Feature>,
    headers: Vec<u8>,
    body: Vec<u8>,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Session {
    pub fn new(ctx: Arc<FilterContext>, peer: impl Into<String>) -> Self {
        Self {
            ctx,
            peer: peer.into(),
            state: SessionState::Initial,
            version: PROTOCOL_VERSION,
            actions: 0,
            protocol: 0,
            macros: HashMap::new(),
            transaction_id: Uuid::new_v4(),
            payload: Payload::new(),
            features: FeatureStore::new(),
            connection_features: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn features(&self) -> &FeatureStore {
        &self.features
    }

    #[cfg(test)]
    fn macros(&self) -> &HashMap<String, String> {
        &self.macros
    }

    /// Negotiated (version, actions, protocol)
    #[cfg(test)]
    fn negotiated(&self) -> (u32, u32, u32) {
        (self.version, self.actions, self.protocol)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            trace!(peer = %self.peer, from = ?self.state, to = ?state, "Session state");
            self.state = state;
        }
    }

    /// Serve frames until the peer quits, goes silent or breaks the protocol
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let read_timeout = self.ctx.settings.read_timeout;
        let max_frame = self.ctx.settings.max_frame_size;

        loop {
            let message =
                match tokio::time::timeout(read_timeout, read_message(&mut reader, max_frame)).await
                {
                    Ok(Ok(Some(message))) => message,
                    Ok(Ok(None)) => {
                        debug!(peer = %self.peer, "Connection closed by MTA");
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(peer = %self.peer, error = %e, "Milter read failed");
                        self.set_state(SessionState::Closed);
                        return Err(e);
                    }
                    Err(_) => {
                        warn!(peer = %self.peer, "Milter connection idle, closing");
                        break;
                    }
                };

            let outcome = match self.handle_message(message).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => {
                    warn!(peer = %self.peer, error = %e, "Protocol violation, closing");
                    self.set_state(SessionState::Closed);
                    return Err(e);
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "Command failed, answering tempfail");
                    Outcome {
                        responses: vec![Response::TempFail],
                        close: false,
                    }
                }
            };

            for response in &outcome.responses {
                write_message(&mut writer, &response.to_message()).await?;
            }
            if outcome.close {
                break;
            }
        }

        self.set_state(SessionState::Closed);
        Ok(())
    }

    /// Process one inbound frame
    pub async fn handle_message(&mut self, message: Message) -> Result<Outcome> {
        trace!(peer = %self.peer, opcode = %char::from(message.opcode), len = message.payload.len(), "Milter command");

        match message.opcode {
            command::OPTNEG => self.on_optneg(&message.payload),
            command::MACRO => self.on_macro(&message.payload),
            command::CONNECT => self.on_connect(&message.payload).await,
            command::HELO => self.on_helo(&message.payload).await,
            command::MAIL => self.on_mail(&message.payload).await,
            command::RCPT => self.on_rcpt(&message.payload).await,
            command::HEADER => self.on_header(&message.payload).await,
            command::EOH => self.on_eoh().await,
            command::BODY => {
                self.body.extend_from_slice(&message.payload);
                self.set_state(SessionState::BodyAccumulating);
                Ok(self.unless_suppressed(protocol::NR_BODY, vec![Response::Continue]))
            }
            command::BODYEOB => self.on_eob(&message.payload).await,
            command::ABORT => {
                self.reset_transaction();
                self.set_state(SessionState::Aborted);
                Ok(Outcome::silent())
            }
            command::QUIT => {
                self.set_state(SessionState::Closed);
                Ok(Outcome {
                    responses: Vec::new(),
                    close: true,
                })
            }
            command::QUIT_NC => {
                self.reset_connection();
                self.set_state(SessionState::OptionsNegotiated);
                Ok(Outcome::silent())
            }
            command::DATA => Ok(self.unless_suppressed(protocol::NR_DATA, vec![Response::Continue])),
            command::UNKNOWN => {
                Ok(self.unless_suppressed(protocol::NR_UNKN, vec![Response::Continue]))
            }
            other => Err(Error::Protocol(format!(
                "unknown milter command 0x{:02x}",
                other
            ))),
        }
    }

    fn on_optneg(&mut self, payload: &[u8]) -> Result<Outcome> {
        let (Some(version), Some(actions), Some(protocol)) = (
            read_u32(payload, 0),
            read_u32(payload, 4),
            read_u32(payload, 8),
        ) else {
            return Err(Error::Protocol(format!(
                "option negotiation payload of {} bytes",
                payload.len()
            )));
        };

        self.version = version.min(PROTOCOL_VERSION);
        self.actions = actions & self.ctx.settings.actions;
        self.protocol = protocol & self.ctx.settings.protocol;
        self.set_state(SessionState::OptionsNegotiated);
        debug!(
            peer = %self.peer,
            version = self.version,
            actions = self.actions,
            protocol = self.protocol,
            "Options negotiated"
        );

        Ok(Outcome::reply(vec![Response::OptNeg {
            version: self.version,
            actions: self.actions,
            protocol: self.protocol,
        }]))
    }

    fn on_macro(&mut self, payload: &[u8]) -> Result<Outcome> {
        let Some((&cmd, pairs)) = payload.split_first() else {
            return Err(Error::Protocol("empty macro payload".to_string()));
        };
        self.macros = decode_pairs(pairs)?.into_iter().collect();
        trace!(peer = %self.peer, command = %char::from(cmd), count = self.macros.len(), "Macros");
        Ok(Outcome::silent())
    }

    async fn on_connect(&mut self, payload: &[u8]) -> Result<Outcome> {
        let Some(info) = parse_connect(payload)? else {
            warn!(peer = %self.peer, "Connect without port, deferring");
            return Ok(Outcome::reply(vec![Response::TempFail]));
        };
        self.set_state(SessionState::Connected);
        debug!(
            peer = %self.peer,
            hostname = %info.hostname,
            address = %info.address,
            "Client connected"
        );

        let signals = self
            .ctx
            .extractor
            .connect_signals(&info.hostname, family_name(info.family), info.port, &info.address)
            .await;
        let decision = self.checkpoint(FilterStage::Connect, &signals).await;
        Ok(self.decide(FilterStage::Connect, &decision, protocol::NR_CONN))
    }

    async fn on_helo(&mut self, payload: &[u8]) -> Result<Outcome> {
        let helo = decode_cstrings(payload).into_iter().next().unwrap_or_default();
        self.set_state(SessionState::HeloSeen);

        let signals = Signals::new().with(names::HELO, helo);
        let decision = self.checkpoint(FilterStage::Helo, &signals).await;
        Ok(self.decide(FilterStage::Helo, &decision, protocol::NR_HELO))
    }

    async fn on_mail(&mut self, payload: &[u8]) -> Result<Outcome> {
        let sender = decode_cstrings(payload)
            .into_iter()
            .next()
            .map(|s| strip_brackets(&s))
            .unwrap_or_default();
        self.set_state(SessionState::HeadersAccumulating);
        self.sender = Some(sender.clone());

        let signals = self.ctx.extractor.mail_signals(&sender, &self.payload).await;
        let decision = self.checkpoint(FilterStage::MailFrom, &signals).await;
        Ok(self.decide(FilterStage::MailFrom, &decision, protocol::NR_MAIL))
    }

    async fn on_rcpt(&mut self, payload: &[u8]) -> Result<Outcome> {
        let rcpt = decode_cstrings(payload)
            .into_iter()
            .next()
            .map(|s| strip_brackets(&s))
            .unwrap_or_default();
        self.recipients.push(rcpt.clone());

        let signals = Signals::new()
            .with(names::RCPT, rcpt)
            .with(names::RCPT_COUNT, self.recipients.len() as i64);
        let decision = self.checkpoint(FilterStage::RcptTo, &signals).await;
        Ok(self.decide(FilterStage::RcptTo, &decision, protocol::NR_RCPT))
    }

    async fn on_header(&mut self, payload: &[u8]) -> Result<Outcome> {
        let mut parts = decode_cstrings(payload).into_iter();
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Protocol("header without a name".to_string()))?;
        let value = parts.next().unwrap_or_default();
        self.set_state(SessionState::HeadersAccumulating);

        self.headers.extend_from_slice(name.as_bytes());
        self.headers.extend_from_slice(b": ");
        self.headers.extend_from_slice(value.as_bytes());
        self.headers.extend_from_slice(b"\r\n");

        let mut signals = Signals::new();
        signals.insert(name, value);
        let features = self
            .ctx
            .extractor
            .extract_fields(FilterStage::Header, &signals, &mut self.payload)
            .await;
        self.features.extend(features);
        Ok(self.unless_suppressed(protocol::NR_HDR, vec![Response::Continue]))
    }

    async fn on_eoh(&mut self) -> Result<Outcome> {
        self.set_state(SessionState::HeadersComplete);
        let signals = self.ctx.extractor.header_signals(&self.headers);
        let decision = self.checkpoint(FilterStage::Header, &signals).await;
        Ok(self.decide(FilterStage::Header, &decision, protocol::NR_EOH))
    }

    async fn on_eob(&mut self, payload: &[u8]) -> Result<Outcome> {
        self.body.extend_from_slice(payload);

        let size = self.headers.len() + self.body.len();
        let mut raw = Vec::with_capacity(size + 2);
        raw.extend_from_slice(&self.headers);
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(&self.body);

        let analysis = self.ctx.extractor.body_signals(&raw, size);
        for hash in &analysis.hashes {
            let input = CreateFuzzyHash {
                hash: hash.spamsum.to_string(),
                session_id: self.transaction_id,
                chunk_size: i64::from(hash.spamsum.block_size),
                is_attachment: hash.is_attachment,
            };
            if let Err(e) = self.ctx.hashes.create_if_absent(input).await {
                warn!(transaction_id = %self.transaction_id, error = %e, "Failed to persist fuzzy hash");
            }
        }

        let decision = self.checkpoint(FilterStage::Data, &analysis.signals).await;
        if self.ctx.settings.filter_log {
            self.write_filter_log(size, &decision).await;
        }

        let responses = disposition::map(&decision, FilterStage::Data, self.actions);
        self.reset_transaction();
        self.set_state(SessionState::TransactionComplete);
        Ok(Outcome::reply(responses))
    }

    /// Extract the features of a checkpoint and evaluate the rules
    async fn checkpoint(&mut self, stage: FilterStage, signals: &Signals) -> Decision {
        let features = self
            .ctx
            .extractor
            .extract(stage, signals, &mut self.payload)
            .await;
        if matches!(stage, FilterStage::Connect | FilterStage::Helo) {
            self.connection_features.extend(features.iter().cloned());
        }
        self.features.extend(features);

        let decision = self.ctx.engine.evaluate(&self.features);
        if decision.matched() {
            info!(
                transaction_id = %self.transaction_id,
                peer = %self.peer,
                stage = %stage,
                rule_id = ?decision.rule_id,
                action = ?decision.action,
                "Rule matched"
            );
        } else {
            debug!(
                transaction_id = %self.transaction_id,
                stage = %stage,
                features = self.features.len(),
                "No rule matched"
            );
        }
        decision
    }

    fn decide(&self, stage: FilterStage, decision: &Decision, no_reply: u32) -> Outcome {
        self.unless_suppressed(no_reply, disposition::map(decision, stage, self.actions))
    }

    fn unless_suppressed(&self, no_reply: u32, responses: Vec<Response>) -> Outcome {
        if self.protocol & no_reply != 0 {
            Outcome::silent()
        } else {
            Outcome::reply(responses)
        }
    }

    async fn write_filter_log(&self, size: usize, decision: &Decision) {
        let text = |name: &str| self.payload.get(name).map(|v| v.to_string());
        let log = CreateFilterLog {
            transaction_id: self.transaction_id,
            client_ip: text(names::CLIENT_IP),
            sender: self.sender.clone(),
            nick: text(names::NICK),
            rcpt: (!self.recipients.is_empty()).then(|| self.recipients.join(",")),
            size: size as i64,
            mailer: text(names::MAILER),
            subject: text(names::SUBJECT),
            features: self.features.to_json(),
            action: decision.action,
            rule_id: decision.rule_id,
        };
        if let Err(e) = self.ctx.logs.create(log).await {
            warn!(transaction_id = %self.transaction_id, error = %e, "Failed to write filter log");
        }
    }

    /// Start a new transaction on the same connection
    fn reset_transaction(&mut self) {
        self.transaction_id = Uuid::new_v4();
        self.payload.reset_transaction();
        self.features = self.connection_features.iter().cloned().collect();
        self.headers.clear();
        self.body.clear();
        self.sender = None;
        self.recipients.clear();
        self.macros.clear();
    }

    /// Forget the client; negotiated options stay
    fn reset_connection(&mut self) {
        self.connection_features.clear();
        self.payload = Payload::new();
        self.reset_transaction();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milter::codec::{action, encode, encode_cstrings, reply};
    use crate::testing::{context, field, rule, TestContext};
    use mailsift_common::FeatureValue;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn optneg(actions: u32, protocol: u32) -> Message {
        let mut payload = 6u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&actions.to_be_bytes());
        payload.extend_from_slice(&protocol.to_be_bytes());
        Message::new(command::OPTNEG, payload)
    }

    fn connect(host: &str, family: u8, port: Option<u16>, addr: &str) -> Message {
        let mut payload = encode_cstrings(&[host]);
        payload.push(family);
        if let Some(port) = port {
            payload.extend_from_slice(&port.to_be_bytes());
        }
        payload.extend(encode_cstrings(&[addr]));
        Message::new(command::CONNECT, payload)
    }

    fn cstr(opcode: u8, strings: &[&str]) -> Message {
        Message::new(opcode, encode_cstrings(strings))
    }

    fn spam_sender_rule() -> mailsift_storage::FilterRule {
        let mut r = rule(10, "reject");
        r.sender = Some("contains::spammer".to_string());
        r
    }

    #[test]
    fn test_parse_connect() {
        let msg = connect("mx.example.net", b'4', Some(2525), "192.0.2.1");
        let info = parse_connect(&msg.payload).unwrap().unwrap();
        assert_eq!(info.hostname, "mx.example.net");
        assert_eq!(info.port, Some(2525));
        assert_eq!(info.address, "192.0.2.1");

        let unix = connect("localhost", b'L', None, "/run/smtp.sock");
        let info = parse_connect(&unix.payload).unwrap().unwrap();
        assert_eq!(info.port, None);
        assert_eq!(info.address, "/run/smtp.sock");

        let mut short = encode_cstrings(&["host"]);
        short.push(b'4');
        assert_eq!(parse_connect(&short).unwrap(), None);
        assert!(parse_connect(b"no-terminator").is_err());
    }

    #[tokio::test]
    async fn test_option_negotiation() {
        let TestContext { ctx, .. } = context(vec![], vec![]);
        let mut session = Session::new(ctx, "test");

        let outcome = session
            .handle_message(optneg(0x1ff, protocol::NR_HDR))
            .await
            .unwrap();
        assert_eq!(
            outcome.responses,
            vec![Response::OptNeg {
                version: 6,
                actions: 0x7f,
                protocol: 0,
            }]
        );
        assert_eq!(session.state(), SessionState::OptionsNegotiated);

        let short = Message::new(command::OPTNEG, vec![0, 0, 0, 6]);
        assert!(matches!(
            session.handle_message(short).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_header_yields_empty_feature() {
        let TestContext { ctx, .. } = context(vec![field("X-Campaign", FilterStage::Header)], vec![]);
        let mut session = Session::new(ctx, "test");
        session.handle_message(optneg(0x7f, 0)).await.unwrap();

        let outcome = session
            .handle_message(cstr(command::HEADER, &["X-Campaign", ""]))
            .await
            .unwrap();
        assert_eq!(outcome.responses, vec![Response::Continue]);
        assert_eq!(
            session.features().get("X-Campaign"),
            Some(&FeatureValue::from(""))
        );
    }

    #[tokio::test]
    async fn test_macros_replaced_without_reply() {
        let TestContext { ctx, .. } = context(vec![], vec![]);
        let mut session = Session::new(ctx, "test");

        let mut payload = vec![b'C'];
        payload.extend(encode_cstrings(&["j", "mx.example", "{daemon_name}", "smtpd"]));
        let outcome = session
            .handle_message(Message::new(command::MACRO, payload))
            .await
            .unwrap();
        assert!(outcome.responses.is_empty());
        assert_eq!(session.macros().get("j").map(String::as_str), Some("mx.example"));

        let mut odd = vec![b'M'];
        odd.extend(encode_cstrings(&["i"]));
        assert!(session
            .handle_message(Message::new(command::MACRO, odd))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_connect_without_port_tempfails() {
        let TestContext { ctx, .. } = context(vec![], vec![]);
        let mut session = Session::new(ctx, "test");

        let outcome = session
            .handle_message(connect("host", b'4', None, ""))
            .await
            .unwrap();
        assert_eq!(outcome.responses, vec![Response::TempFail]);
        assert!(!outcome.close);
    }

    #[tokio::test]
    async fn test_reject_at_mail_from() {
        let TestContext { ctx, .. } = context(
            vec![field("Sender", FilterStage::MailFrom)],
            vec![spam_sender_rule()],
        );
        let mut session = Session::new(ctx, "test");
        session.handle_message(optneg(0x7f, 0)).await.unwrap();

        let outcome = session
            .handle_message(cstr(command::MAIL, &["<ok@example.org>", "SIZE=100"]))
            .await
            .unwrap();
        assert_eq!(outcome.responses, vec![Response::Continue]);
        assert_eq!(
            session.features().get("Sender"),
            Some(&FeatureValue::from("ok@example.org"))
        );

        session.handle_message(Message::bare(command::ABORT)).await.unwrap();
        let outcome = session
            .handle_message(cstr(command::MAIL, &["<spammer@bad.example>"]))
            .await
            .unwrap();
        assert_eq!(outcome.responses, vec![Response::Reject]);
        assert!(!outcome.close);
    }

    #[tokio::test]
    async fn test_rcpt_count_and_current_recipient() {
        let TestContext { ctx, .. } = context(
            vec![field("Rcpt", FilterStage::RcptTo), field("RcptCount", FilterStage::RcptTo)],
            vec![],
        );
        let mut session = Session::new(ctx, "test");

        for rcpt in ["<a@example.org>", "<b@example.org>"] {
            session.handle_message(cstr(command::RCPT, &[rcpt])).await.unwrap();
        }
        assert_eq!(
            session.features().get("Rcpt"),
            Some(&FeatureValue::from("b@example.org"))
        );
        assert_eq!(session.features().get("RcptCount"), Some(&FeatureValue::Int(2)));
    }

    #[tokio::test]
    async fn test_abort_resets_transaction_but_keeps_connection() {
        let TestContext { ctx, .. } = context(
            vec![
                field("ClientIP", FilterStage::Connect),
                field("Sender", FilterStage::MailFrom),
            ],
            vec![],
        );
        let mut session = Session::new(ctx, "test");
        session.handle_message(optneg(0x7f, 0)).await.unwrap();
        session
            .handle_message(connect("mx", b'4', Some(25), "192.0.2.1"))
            .await
            .unwrap();
        session
            .handle_message(cstr(command::MAIL, &["<a@example.org>"]))
            .await
            .unwrap();
        let before = session.transaction_id();

        let outcome = session.handle_message(Message::bare(command::ABORT)).await.unwrap();
        assert!(outcome.responses.is_empty());
        assert_ne!(session.transaction_id(), before);
        assert_eq!(session.state(), SessionState::Aborted);
        // The connection outlives the aborted transaction, so connect and
        // HELO features are kept while transaction features are dropped
        assert!(session.features().get("Sender").is_none());
        assert_eq!(
            session.features().get("ClientIP"),
            Some(&FeatureValue::from("192.0.2.1"))
        );
        assert_eq!(session.negotiated().1, 0x7f);
    }

    #[tokio::test]
    async fn test_no_reply_flags_suppress_responses() {
        let mut test = context(vec![], vec![]);
        Arc::get_mut(&mut test.ctx).unwrap().settings.protocol = protocol::NR_HELO | protocol::NR_HDR;
        let mut session = Session::new(test.ctx, "test");
        session
            .handle_message(optneg(0x7f, protocol::NR_HELO | protocol::NR_HDR))
            .await
            .unwrap();

        let outcome = session
            .handle_message(cstr(command::HELO, &["mx.example"]))
            .await
            .unwrap();
        assert!(outcome.responses.is_empty());

        let outcome = session
            .handle_message(cstr(command::HEADER, &["Subject", "hi"]))
            .await
            .unwrap();
        assert!(outcome.responses.is_empty());

        let outcome = session
            .handle_message(cstr(command::MAIL, &["<a@example.org>"]))
            .await
            .unwrap();
        assert_eq!(outcome.responses, vec![Response::Continue]);
    }

    #[tokio::test]
    async fn test_quarantine_at_end_of_body_persists_everything() {
        let mut r = rule(5, "quarantine");
        r.subject = Some("contains::invoice".to_string());
        let test = context(
            vec![
                field("Subject", FilterStage::Header),
                field("TextHash", FilterStage::Data),
            ],
            vec![r],
        );
        let mut session = Session::new(test.ctx.clone(), "test");
        session
            .handle_message(optneg(action::QUARANTINE | action::ADDHDRS, 0))
            .await
            .unwrap();
        session
            .handle_message(cstr(command::MAIL, &["<billing@shop.example>"]))
            .await
            .unwrap();
        session
            .handle_message(cstr(command::RCPT, &["<me@example.org>"]))
            .await
            .unwrap();
        session
            .handle_message(cstr(command::HEADER, &["From", "billing@shop.example"]))
            .await
            .unwrap();
        session
            .handle_message(cstr(command::HEADER, &["Subject", "Your invoice"]))
            .await
            .unwrap();

        // Quarantine is held back until the end of body
        let outcome = session.handle_message(Message::bare(command::EOH)).await.unwrap();
        assert_eq!(outcome.responses, vec![Response::Reject]);

        let body = "Please find the overdue amount listed below. ".repeat(10);
        session
            .handle_message(Message::new(command::BODY, body.as_bytes().to_vec()))
            .await
            .unwrap();
        let transaction = session.transaction_id();
        let outcome = session.handle_message(Message::bare(command::BODYEOB)).await.unwrap();
        assert_eq!(outcome.responses.len(), 2);
        assert!(matches!(outcome.responses[0], Response::Quarantine(_)));
        assert_eq!(outcome.responses[1], Response::Accept);
        assert_eq!(session.state(), SessionState::TransactionComplete);
        assert_ne!(session.transaction_id(), transaction);

        let hashes = test.hashes.hashes.lock().await;
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].session_id, transaction);
        assert!(!hashes[0].is_attachment);

        let logs = test.logs.logs.lock().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].transaction_id, transaction);
        assert_eq!(logs[0].subject.as_deref(), Some("Your invoice"));
        assert_eq!(logs[0].rcpt.as_deref(), Some("me@example.org"));
        assert_eq!(logs[0].action, Some(mailsift_common::types::FilterAction::Quarantine));
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_protocol_error() {
        let TestContext { ctx, .. } = context(vec![], vec![]);
        let mut session = Session::new(ctx, "test");
        assert!(matches!(
            session.handle_message(Message::bare(b'Z')).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_session_over_stream() {
        let TestContext { ctx, .. } = context(
            vec![field("Sender", FilterStage::MailFrom)],
            vec![spam_sender_rule()],
        );
        let (mut mta, filter) = tokio::io::duplex(4096);
        let task = tokio::spawn(Session::new(ctx, "duplex").run(filter));

        let mut wire = Vec::new();
        for message in [
            optneg(0x7f, 0),
            connect("mx", b'4', Some(25), "192.0.2.1"),
            cstr(command::MAIL, &["<spammer@bad.example>"]),
            Message::bare(command::QUIT),
        ] {
            wire.extend(encode(&message));
        }
        mta.write_all(&wire).await.unwrap();

        let mut replies = Vec::new();
        mta.read_to_end(&mut replies).await.unwrap();
        task.await.unwrap().unwrap();

        // optneg (4 + 13), continue (4 + 1), reject (4 + 1)
        assert_eq!(replies.len(), 17 + 5 + 5);
        assert_eq!(replies[4], reply::OPTNEG);
        assert_eq!(replies[17 + 4], reply::CONTINUE);
        assert_eq!(replies[22 + 4], reply::REJECT);
    }

    #[tokio::test]
    async fn test_truncated_frame_ends_session() {
        let TestContext { ctx, .. } = context(vec![], vec![]);
        let (mut mta, filter) = tokio::io::duplex(64);
        let task = tokio::spawn(Session::new(ctx, "duplex").run(filter));

        mta.write_all(&[0, 0, 0, 9, b'H']).await.unwrap();
        drop(mta);
        assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
    }
}
