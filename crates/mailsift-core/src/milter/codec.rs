//! Milter wire codec
//!
//! A frame is a big-endian `u32` length covering the opcode and payload,
//! followed by one opcode byte and the payload. Strings inside payloads
//! are NUL-terminated.

use mailsift_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Highest protocol version spoken
pub const PROTOCOL_VERSION: u32 = 6;

/// Commands sent by the MTA
pub mod command {
    pub const ABORT: u8 = b'A';
    pub const BODY: u8 = b'B';
    pub const CONNECT: u8 = b'C';
    pub const MACRO: u8 = b'D';
    pub const BODYEOB: u8 = b'E';
    pub const HELO: u8 = b'H';
    pub const QUIT_NC: u8 = b'K';
    pub const HEADER: u8 = b'L';
    pub const MAIL: u8 = b'M';
    pub const EOH: u8 = b'N';
    pub const OPTNEG: u8 = b'O';
    pub const QUIT: u8 = b'Q';
    pub const RCPT: u8 = b'R';
    pub const DATA: u8 = b'T';
    pub const UNKNOWN: u8 = b'U';
}

/// Replies sent back to the MTA
pub mod reply {
    pub const ADDRCPT: u8 = b'+';
    pub const DELRCPT: u8 = b'-';
    pub const ACCEPT: u8 = b'a';
    pub const REPLBODY: u8 = b'b';
    pub const CONTINUE: u8 = b'c';
    pub const DISCARD: u8 = b'd';
    pub const CHGFROM: u8 = b'e';
    pub const ADDHEADER: u8 = b'h';
    pub const INSHEADER: u8 = b'i';
    pub const CHGHEADER: u8 = b'm';
    pub const OPTNEG: u8 = b'O';
    pub const QUARANTINE: u8 = b'q';
    pub const REJECT: u8 = b'r';
    pub const TEMPFAIL: u8 = b't';
}

/// Modification actions (`SMFIF_*`)
pub mod action {
    pub const ADDHDRS: u32 = 0x01;
    pub const CHGBODY: u32 = 0x02;
    pub const ADDRCPT: u32 = 0x04;
    pub const DELRCPT: u32 = 0x08;
    pub const CHGHDRS: u32 = 0x10;
    pub const QUARANTINE: u32 = 0x20;
    pub const CHGFROM: u32 = 0x40;
}

/// Protocol steps the MTA may skip or not wait a reply for (`SMFIP_*`)
pub mod protocol {
    pub const NOCONNECT: u32 = 0x01;
    pub const NOHELO: u32 = 0x02;
    pub const NOMAIL: u32 = 0x04;
    pub const NORCPT: u32 = 0x08;
    pub const NOBODY: u32 = 0x10;
    pub const NOHDRS: u32 = 0x20;
    pub const NOEOH: u32 = 0x40;
    pub const NR_HDR: u32 = 0x80;
    pub const NOUNKNOWN: u32 = 0x100;
    pub const NODATA: u32 = 0x200;
    pub const SKIP: u32 = 0x400;
    pub const RCPT_REJ: u32 = 0x800;
    pub const NR_CONN: u32 = 0x1000;
    pub const NR_HELO: u32 = 0x2000;
    pub const NR_MAIL: u32 = 0x4000;
    pub const NR_RCPT: u32 = 0x8000;
    pub const NR_DATA: u32 = 0x10000;
    pub const NR_UNKN: u32 = 0x20000;
    pub const NR_EOH: u32 = 0x40000;
    pub const NR_BODY: u32 = 0x80000;
    pub const HDR_LEADSPC: u32 = 0x100000;
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(opcode: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Frame without payload
    pub fn bare(opcode: u8) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }
}

/// Encode a frame into its wire form
pub fn encode(message: &Message) -> Vec<u8> {
    let len = (message.payload.len() + 1) as u32;
    let mut buf = Vec::with_capacity(message.payload.len() + 5);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(message.opcode);
    buf.extend_from_slice(&message.payload);
    buf
}

/// Decode one complete frame from a buffer
pub fn decode(buf: &[u8]) -> Result<Message> {
    if buf.len() < 4 {
        return Err(Error::Protocol("truncated frame length".to_string()));
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 {
        return Err(Error::Protocol("zero-length frame".to_string()));
    }
    if buf.len() - 4 != len {
        return Err(Error::Protocol(format!(
            "frame length {} does not match {} buffered bytes",
            len,
            buf.len() - 4
        )));
    }
    Ok(Message::new(buf[4], &buf[5..]))
}

/// Read one frame
///
/// Returns `Ok(None)` when the peer closes the connection between frames.
/// A close inside a frame, a zero length or a length above `max_len`
/// is a protocol error.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Protocol("truncated frame length".to_string()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::Protocol("zero-length frame".to_string()));
    }
    if len > max_len {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, max_len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Protocol(format!("truncated frame body, expected {} bytes", len))
        } else {
            Error::Io(e)
        }
    })?;

    let payload = buf.split_off(1);
    Ok(Some(Message {
        opcode: buf[0],
        payload,
    }))
}

/// Write and flush one frame
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(message)).await?;
    writer.flush().await?;
    Ok(())
}

/// Split a NUL-terminated payload into strings
///
/// Exactly one trailing NUL is removed before splitting, so an empty
/// value inside the list survives (`name\0\0` is `["name", ""]`).
pub fn decode_cstrings(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    let trimmed = payload.strip_suffix(&[0]).unwrap_or(payload);
    trimmed
        .split(|b| *b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Split a payload into name/value pairs
pub fn decode_pairs(payload: &[u8]) -> Result<Vec<(String, String)>> {
    let strings = decode_cstrings(payload);
    if strings.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "odd number of strings ({}) in name/value list",
            strings.len()
        )));
    }
    let mut iter = strings.into_iter();
    let mut pairs = Vec::new();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((name, value));
    }
    Ok(pairs)
}

/// NUL-terminate and concatenate strings
pub fn encode_cstrings<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(strings.iter().map(|s| s.as_ref().len() + 1).sum());
    for s in strings {
        buf.extend_from_slice(s.as_ref().as_bytes());
        buf.push(0);
    }
    buf
}

/// Read a big-endian `u32` at `offset`
pub fn read_u32(payload: &[u8], offset: usize) -> Option<u32> {
    let bytes = payload.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
