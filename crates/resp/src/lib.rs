//! RESP (REdis Serialization Protocol) client support
//!
//! Implements the protocol surface the controller needs to talk to data
//! nodes: command encoding, reply parsing, and a connection type with
//! per-request deadlines.

mod client;
mod encoder;
mod reader;

pub use client::Connection;
pub use encoder::encode_command;
pub use reader::read_value;

use bytes::Bytes;
use std::io;

/// A decoded RESP reply
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: `+OK\r\n`
    SimpleString(Bytes),
    /// Error reply: `-ERR message\r\n`
    Error(String),
    /// Integer: `:123\r\n`
    Integer(i64),
    /// Bulk string: `$5\r\nhello\r\n`
    BulkString(Bytes),
    /// Array of replies
    Array(Vec<RespValue>),
    /// Null bulk string or null array
    Null,
}

impl RespValue {
    /// True for the `+OK` reply
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s.as_ref() == b"OK")
    }

    /// The error message, if this is an error reply
    pub fn as_error(&self) -> Option<&str> {
        match self {
            RespValue::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Text content of a simple or bulk string reply
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) | RespValue::BulkString(s) => {
                Some(String::from_utf8_lossy(s).to_string())
            }
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// RESP protocol and transport errors
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("invalid RESP type: {0}")]
    InvalidType(u8),
    #[error("request timed out")]
    TimedOut,
}
