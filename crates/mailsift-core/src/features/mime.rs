//! MIME views of the header block and the full message

use mail_parser::{MessageParser, MimeHeaders, PartType};

/// Structured headers available at end of headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    pub header_from: String,
    pub nick: String,
    pub mailer: String,
    pub subject: String,
    pub message_id: String,
}

/// One attachment or inline binary part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

/// Parsed content of a complete message
#[derive(Debug, Clone, Default)]
pub struct MessageSummary {
    pub headers: HeaderSummary,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

fn summarize_headers(message: &mail_parser::Message<'_>) -> HeaderSummary {
    let from = message.from().and_then(|a| a.first());
    let text_header = |name: &'static str| {
        message
            .header(name)
            .and_then(|h| h.as_text())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    HeaderSummary {
        header_from: from
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        nick: from
            .and_then(|a| a.name())
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        mailer: text_header("X-Mailer")
            .or_else(|| text_header("User-Agent"))
            .unwrap_or_default(),
        subject: message.subject().map(|s| s.to_string()).unwrap_or_default(),
        message_id: message.message_id().map(|s| s.to_string()).unwrap_or_default(),
    }
}

/// Parse a header block (without the body)
pub fn parse_headers(block: &[u8]) -> Option<HeaderSummary> {
    let mut raw = block.to_vec();
    if !raw.ends_with(b"\r\n\r\n") {
        raw.extend_from_slice(b"\r\n");
    }
    MessageParser::default()
        .parse(&raw[..])
        .map(|message| summarize_headers(&message))
}

/// Parse a whole message; the first non-attachment text and HTML parts
/// become the bodies
pub fn parse_message(raw: &[u8]) -> Option<MessageSummary> {
    let message = MessageParser::default().parse(raw)?;

    let mut summary = MessageSummary {
        headers: summarize_headers(&message),
        ..Default::default()
    };

    for (idx, part) in message.parts.iter().enumerate() {
        if message.attachments.contains(&idx) {
            continue;
        }
        match &part.body {
            PartType::Text(text) if summary.text.is_empty() => summary.text = text.to_string(),
            PartType::Html(html) if summary.html.is_empty() => summary.html = html.to_string(),
            _ => {}
        }
    }

    summary.attachments = message
        .attachments()
        .map(|part| Attachment {
            name: part.attachment_name().unwrap_or_default().to_string(),
            content: part.contents().to_vec(),
        })
        .collect();

    Some(summary)
}
