//! Replies and modification actions sent to the MTA

use super::codec::{encode_cstrings, reply, Message};

/// Reply to a milter command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Continue,
    Accept,
    Reject,
    Discard,
    TempFail,
    /// Option negotiation reply: version, actions, protocol
    OptNeg {
        version: u32,
        actions: u32,
        protocol: u32,
    },
    AddHeader {
        name: String,
        value: String,
    },
    /// Replace the `index`-th occurrence (1-based) of a header; an empty value deletes it
    ChangeHeader {
        index: u32,
        name: String,
        value: String,
    },
    InsertHeader {
        index: u32,
        name: String,
        value: String,
    },
    ChangeFrom {
        sender: String,
        args: Option<String>,
    },
    AddRcpt(String),
    DelRcpt(String),
    ReplaceBody(Vec<u8>),
    Quarantine(String),
}

impl Response {
    /// Whether the reply ends the command (as opposed to a modification)
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Response::Continue
                | Response::Accept
                | Response::Reject
                | Response::Discard
                | Response::TempFail
                | Response::OptNeg { .. }
        )
    }

    /// Wire frame for the reply
    pub fn to_message(&self) -> Message {
        match self {
            Response::Continue => Message::bare(reply::CONTINUE),
            Response::Accept => Message::bare(reply::ACCEPT),
            Response::Reject => Message::bare(reply::REJECT),
            Response::Discard => Message::bare(reply::DISCARD),
            Response::TempFail => Message::bare(reply::TEMPFAIL),
            Response::OptNeg {
                version,
                actions,
                protocol,
            } => {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&version.to_be_bytes());
                payload.extend_from_slice(&actions.to_be_bytes());
                payload.extend_from_slice(&protocol.to_be_bytes());
                Message::new(reply::OPTNEG, payload)
            }
            Response::AddHeader { name, value } => {
                Message::new(reply::ADDHEADER, encode_cstrings(&[name, value]))
            }
            Response::ChangeHeader { index, name, value } => {
                indexed_header(reply::CHGHEADER, *index, name, value)
            }
            Response::InsertHeader { index, name, value } => {
                indexed_header(reply::INSHEADER, *index, name, value)
            }
            Response::ChangeFrom { sender, args } => {
                let payload = match args {
                    Some(args) => encode_cstrings(&[sender, args]),
                    None => encode_cstrings(&[sender]),
                };
                Message::new(reply::CHGFROM, payload)
            }
            Response::AddRcpt(rcpt) => Message::new(reply::ADDRCPT, encode_cstrings(&[rcpt])),
            Response::DelRcpt(rcpt) => Message::new(reply::DELRCPT, encode_cstrings(&[rcpt])),
            Response::ReplaceBody(body) => Message::new(reply::REPLBODY, body.clone()),
            Response::Quarantine(reason) => {
                Message::new(reply::QUARANTINE, encode_cstrings(&[reason]))
            }
        }
    }
}

fn indexed_header(opcode: u8, index: u32, name: &str, value: &str) -> Message {
    let mut payload = index.to_be_bytes().to_vec();
    payload.extend(encode_cstrings(&[name, value]));
    Message::new(opcode, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_replies() {
        assert_eq!(Response::Continue.to_message(), Message::bare(b'c'));
        assert_eq!(Response::Reject.to_message(), Message::bare(b'r'));
        assert_eq!(Response::TempFail.to_message(), Message::bare(b't'));
        assert!(Response::Discard.is_final());
        assert!(!Response::Quarantine("spam".into()).is_final());
    }

    #[test]
    fn test_optneg_layout() {
        let msg = Response::OptNeg {
            version: 6,
            actions: 0x21,
            protocol: 0x1000,
        }
        .to_message();
        assert_eq!(msg.opcode, b'O');
        assert_eq!(msg.payload, vec![0, 0, 0, 6, 0, 0, 0, 0x21, 0, 0, 0x10, 0]);
    }

    #[test]
    fn test_header_modifications() {
        let msg = Response::ChangeHeader {
            index: 2,
            name: "X-Spam".into(),
            value: String::new(),
        }
        .to_message();
        assert_eq!(msg.opcode, b'm');
        assert_eq!(msg.payload, b"\0\0\0\x02X-Spam\0\0".to_vec());

        let msg = Response::AddHeader {
            name: "X-Filter".into(),
            value: "checked".into(),
        }
        .to_message();
        assert_eq!(msg.payload, b"X-Filter\0checked\0".to_vec());
    }

    #[test]
    fn test_envelope_modifications() {
        let msg = Response::ChangeFrom {
            sender: "<bounce@example.org>".into(),
            args: Some("SIZE=100".into()),
        }
        .to_message();
        assert_eq!(msg.payload, b"<bounce@example.org>\0SIZE=100\0".to_vec());

        assert_eq!(
            Response::Quarantine("rule 7".into()).to_message(),
            Message::new(b'q', b"rule 7\0".to_vec())
        );
        assert_eq!(
            Response::DelRcpt("<a@b.example>".into()).to_message().opcode,
            b'-'
        );
    }
}
