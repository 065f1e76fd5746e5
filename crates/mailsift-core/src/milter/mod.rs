//! Milter protocol server
//!
//! The MTA streams each SMTP transaction over a length-prefixed binary
//! protocol. Commands handled:
//! - option negotiation, macros
//! - connect, HELO, MAIL FROM, RCPT TO
//! - header, end of headers, body chunk, end of body
//! - abort, quit, quit keeping the connection, DATA, unknown

pub mod codec;
pub mod response;
pub mod server;
pub mod session;

pub use codec::Message;
pub use response::Response;
pub use server::{ListenAddr, MilterServer};
pub use session::{Outcome, Session, SessionState};
