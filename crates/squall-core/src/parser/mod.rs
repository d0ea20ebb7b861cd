//! Streaming HTTP/1.1 request parser
//!
//! Bytes are fed in whatever fragments the socket delivers. The tokenizer
//! splits them on the delimiter set of the current [`ParserState`] and hands
//! each finished token to the trigger selected for that state (see
//! `trigger.rs`), which updates the request and picks the next state.
//!
//! Once the blank line after the headers is seen, `Content-Length` bytes
//! are queued verbatim as the body. Url-encoded form bodies are then run
//! through the body-parameter trigger.
//!
//! ```
//! use squall_core::parser::RequestParser;
//!
//! let addr = "127.0.0.1:8080".parse().unwrap();
//! let mut parser = RequestParser::new(addr, addr);
//! parser.feed(b"GET /index.html HT").unwrap();
//! parser.feed(b"TP/1.1\r\n\r\n").unwrap();
//!
//! let request = parser.into_request().unwrap();
//! assert_eq!(request.path(), "/index.html");
//! ```

mod method;
mod trigger;

pub use method::Method;

use crate::body::RequestBody;
use crate::request::Request;
use crate::{Error, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use trigger::{Pending, Token};

/// Longest token accepted before the message is rejected
pub const MAX_TOKEN_LEN: usize = 64 * 1024;

/// Parser cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    Method,
    Path,
    Protocol,
    HeaderName,
    HeaderValue,
    /// Whole rest of the line is one value
    UserAgentValue,
    CookieName,
    CookieValue,
    QsParamName,
    QsParamValue,
    BodyParamName,
    BodyParamValue,
    /// Raw body bytes, not tokenized
    Body,
    Complete,
    Failed,
}

impl ParserState {
    /// Check if `byte` closes the current token
    fn is_delimiter(self, byte: u8) -> bool {
        use ParserState::*;

        match self {
            Method | Path => byte == b' ' || byte == b'\n',
            Protocol | UserAgentValue => byte == b'\n',
            HeaderName => byte == b':' || byte == b'\n',
            HeaderValue => byte == b',' || byte == b'\n',
            CookieName => byte == b'=' || byte == b';' || byte == b'\n',
            CookieValue => byte == b';' || byte == b'\n',
            QsParamName | BodyParamName => byte == b'=' || byte == b'&',
            QsParamValue | BodyParamValue => byte == b'&',
            Body | Complete | Failed => false,
        }
    }
}

/// Incremental request parser, one per message
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    token: Vec<u8>,
    pending: Pending,
    request: Request,
    body: Vec<Bytes>,
    remaining: u64,
}

impl RequestParser {
    /// Create a parser for a request arriving from `client` on `server`
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            state: ParserState::Method,
            token: Vec::with_capacity(64),
            pending: Pending::default(),
            request: Request::empty(client, server),
            body: Vec::new(),
            remaining: 0,
        }
    }

    /// Feed a fragment, returning how many bytes were consumed
    ///
    /// Consumption stops at the end of the message; the unconsumed tail
    /// belongs to the next request on the connection. After an error the
    /// parser stays failed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.feed_inner(bytes) {
            Ok(consumed) => Ok(consumed),
            Err(e) => {
                self.state = ParserState::Failed;
                Err(e)
            }
        }
    }

    /// Check if a whole message has been parsed
    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Current parser state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Check if any byte of a message has been seen
    pub fn has_started(&self) -> bool {
        self.state != ParserState::Method || !self.token.is_empty()
    }

    /// Take the parsed request, `None` while incomplete
    pub fn into_request(self) -> Option<Request> {
        self.is_complete().then_some(self.request)
    }

    fn feed_inner(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        while consumed < bytes.len() {
            match self.state {
                ParserState::Complete => break,
                ParserState::Failed => return Err(Error::parse("Parser already failed")),
                ParserState::Body => {
                    let available = (bytes.len() - consumed) as u64;
                    let take = self.remaining.min(available) as usize;
                    self.body.push(Bytes::copy_from_slice(&bytes[consumed..consumed + take]));
                    consumed += take;
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.complete()?;
                    }
                }
                state => {
                    let byte = bytes[consumed];
                    consumed += 1;

                    if byte == b'\r' {
                        continue;
                    }
                    if state.is_delimiter(byte) {
                        self.on_delimiter(state, byte)?;
                    } else {
                        if self.token.len() >= MAX_TOKEN_LEN {
                            return Err(Error::parse(format!(
                                "Token longer than {} bytes in state {:?}",
                                MAX_TOKEN_LEN, state
                            )));
                        }
                        self.token.push(byte);
                    }
                }
            }
        }
        Ok(consumed)
    }

    fn on_delimiter(&mut self, state: ParserState, byte: u8) -> Result<()> {
        let raw = String::from_utf8_lossy(&self.token).into_owned();
        self.token.clear();
        let text = raw.trim();
        let end_of_line = byte == b'\n';

        match state {
            // blank lines and extra spaces around the request line
            ParserState::Method | ParserState::Path if text.is_empty() => {
                if end_of_line && state == ParserState::Path {
                    return Err(Error::parse("Incomplete request line"));
                }
                return Ok(());
            }
            ParserState::Method | ParserState::Path if end_of_line => {
                return Err(Error::parse(format!("Incomplete request line at '{}'", text)));
            }
            ParserState::HeaderName if end_of_line => {
                if text.is_empty() {
                    return self.end_of_headers();
                }
                return Err(Error::parse(format!("Malformed header line '{}'", text)));
            }
            ParserState::HeaderValue if text.is_empty() && !end_of_line => return Ok(()),
            _ => {}
        }

        let trigger = trigger::select(state);
        self.state = trigger(state, Token { text, end_of_line }, &mut self.pending, &mut self.request)?;
        Ok(())
    }

    fn end_of_headers(&mut self) -> Result<()> {
        if self.request.content_length > 0 {
            self.remaining = self.request.content_length as u64;
            self.state = ParserState::Body;
            Ok(())
        } else {
            self.complete()
        }
    }

    fn complete(&mut self) -> Result<()> {
        self.request.body = RequestBody::from_chunks(std::mem::take(&mut self.body));

        if self.request.is_form() {
            let form = self.request.body_string();
            trigger::feed_params(&form, ParserState::BodyParamName, &mut self.pending, &mut self.request)?;
        }
        self.state = ParserState::Complete;
        Ok(())
    }
}
