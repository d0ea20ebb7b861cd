//! Response serializer
//!
//! Turns a [`Response`] into a queue of fixed-size `Bytes` chunks ready for
//! non-blocking writes. The body is generated first so that
//! `Content-Length`, `Content-Type` and `Content-Encoding` are part of the
//! header block.

use crate::body::{ChunkSink, DEFAULT_CHUNK_SIZE, EOM};
use crate::cookie::{Cookie, SESSION_LIFETIME};
use crate::response::Response;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::VecDeque;
use std::io::{self, Write};

const CRLF: &[u8] = b"\r\n";

/// Format of `Date` headers and cookie `Expires` attributes
pub(crate) const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Serialized response
#[derive(Debug)]
pub struct Serialized {
    /// Head and body chunks, closed by the empty sentinel chunk
    pub buffers: VecDeque<Bytes>,
    /// Body length on the wire (compressed length when gzipped)
    pub body_length: u64,
}

/// One-shot response serializer
#[derive(Debug)]
pub struct ResponseSerializer {
    gzip: bool,
    chunk_size: usize,
}

impl ResponseSerializer {
    /// `gzip` requests compression of bodies that declare a content type
    pub fn new(gzip: bool) -> Self {
        Self {
            gzip,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Serialize `response`, adding the entity headers it derives from the body
    pub fn serialize(self, response: &mut Response) -> io::Result<Serialized> {
        let (body, body_length) = self.write_body(response)?;

        let mut head = ChunkSink::with_chunk_size(self.chunk_size);
        write!(
            head,
            "{}/{} {}",
            response.protocol_name(),
            response.protocol_version(),
            response.status()
        )?;
        head.write_all(CRLF)?;

        for (name, values) in response.headers().iter() {
            write!(head, "{}: {}", name, values.join(", "))?;
            head.write_all(CRLF)?;
        }
        for cookie in response.cookies() {
            head.write_all(set_cookie_line(cookie, Utc::now()).as_bytes())?;
            head.write_all(CRLF)?;
        }
        head.write_all(CRLF)?;

        let (mut buffers, _) = head.finish();
        buffers.retain(|chunk| !chunk.is_empty());
        buffers.extend(body);
        Ok(Serialized { buffers, body_length })
    }

    fn write_body(&self, response: &mut Response) -> io::Result<(VecDeque<Bytes>, u64)> {
        let content_type = response.body().content_type().map(str::to_string);
        let gzip = self.gzip && content_type.is_some();

        let mut sink = ChunkSink::with_chunk_size(self.chunk_size);
        if gzip {
            let mut encoder = GzEncoder::new(&mut sink, Compression::default());
            response.body().write_to(&mut encoder)?;
            encoder.finish()?;
        } else {
            response.body().write_to(&mut sink)?;
        }
        let (chunks, written) = sink.finish();

        if let Some(content_type) = content_type {
            if response.header("content-type").is_none() {
                response.add_header("Content-Type", content_type);
            }
        }
        // The length on the wire is always the one counted here
        response.remove_header("content-length");
        if gzip {
            response.set_header("Content-Encoding", "gzip");
        }
        if written > 0 {
            response.add_header("Content-Length", written.to_string());
        }

        debug_assert_eq!(chunks.back(), Some(&EOM));
        Ok((chunks, written))
    }
}

/// Render the `Set-Cookie` header line for `cookie`
pub fn set_cookie_line(cookie: &Cookie, now: DateTime<Utc>) -> String {
    let mut line = format!("Set-Cookie: {}={};", cookie.name(), cookie.value());

    if let Some(path) = cookie.path() {
        line.push_str(&format!(" Path={};", path));
    }
    if let Some(domain) = cookie.domain() {
        line.push_str(&format!(" Domain={};", domain));
    }
    if !cookie.ports().is_empty() {
        let ports: Vec<String> = cookie.ports().iter().map(u16::to_string).collect();
        line.push_str(&format!(" Port=\"{}\";", ports.join(",")));
    }
    if cookie.max_age() != SESSION_LIFETIME {
        let expires = TimeDelta::try_seconds(cookie.max_age())
            .and_then(|age| now.checked_add_signed(age))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        line.push_str(&format!(" Expires={};", expires.format(RFC1123)));
    }
    line.push_str(" HttpOnly");
    line
}
