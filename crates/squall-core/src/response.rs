//! HTTP Response types

use crate::cookie::Cookie;
use crate::multimap::MultiMap;
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Protocol name used until the request's is copied over
pub const DEFAULT_PROTOCOL_NAME: &str = "HTTP";

/// Protocol version used until the request's is copied over
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.1";

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    // 1xx Informational
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);

    // 2xx Success
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NON_AUTHORITATIVE_INFORMATION: StatusCode = StatusCode(203);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const RESET_CONTENT: StatusCode = StatusCode(205);
    pub const PARTIAL_CONTENT: StatusCode = StatusCode(206);

    // 3xx Redirection
    pub const MULTIPLE_CHOICES: StatusCode = StatusCode(300);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const USE_PROXY: StatusCode = StatusCode(305);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);

    // 4xx Client Errors
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const PAYMENT_REQUIRED: StatusCode = StatusCode(402);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const NOT_ACCEPTABLE: StatusCode = StatusCode(406);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const GONE: StatusCode = StatusCode(410);
    pub const LENGTH_REQUIRED: StatusCode = StatusCode(411);
    pub const PRECONDITION_FAILED: StatusCode = StatusCode(412);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const URI_TOO_LONG: StatusCode = StatusCode(414);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const RANGE_NOT_SATISFIABLE: StatusCode = StatusCode(416);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);

    // 5xx Server Errors
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);
    pub const HTTP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    /// Look up one of the known status codes
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = StatusCode(code);
        if status.reason_phrase().is_empty() {
            None
        } else {
            Some(status)
        }
    }

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Body-producing capability attached to a response
///
/// The serializer asks for the content type, then lets the writer stream
/// itself into the output sink exactly once.
pub trait BodyWriter: Send {
    /// Content type of the produced bytes, if any
    fn content_type(&self) -> Option<&str>;

    /// Stream the body into `output`
    fn write_to(&self, output: &mut dyn Write) -> io::Result<()>;
}

/// Default writer: no content type, no bytes
#[derive(Debug, Default)]
pub struct EmptyBody;

impl BodyWriter for EmptyBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn write_to(&self, _output: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory body
#[derive(Debug, Clone)]
pub struct BytesBody {
    content_type: String,
    bytes: Bytes,
}

impl BytesBody {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

impl BodyWriter for BytesBody {
    fn content_type(&self) -> Option<&str> {
        Some(&self.content_type)
    }

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        output.write_all(&self.bytes)
    }
}

/// Body streamed from a file on disk
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
    content_type: &'static str,
}

impl FileBody {
    /// Serve `path`, guessing the content type from its extension
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = mime_type(&path);
        Self { path, content_type }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BodyWriter for FileBody {
    fn content_type(&self) -> Option<&str> {
        Some(self.content_type)
    }

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        let mut file = File::open(&self.path)?;
        io::copy(&mut file, output)?;
        Ok(())
    }
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// HTTP Response
///
/// Headers and cookies are append-only; the body is a [`BodyWriter`]
/// drained by the serializer.
pub struct Response {
    status: StatusCode,
    protocol_name: String,
    protocol_version: String,
    headers: MultiMap<String, String>,
    cookies: Vec<Cookie>,
    body: Box<dyn BodyWriter>,
}

impl Response {
    /// Create a new response
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            protocol_name: DEFAULT_PROTOCOL_NAME.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            headers: MultiMap::new(),
            cookies: Vec::new(),
            body: Box::new(EmptyBody),
        }
    }

    /// Create a 200 OK response
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Mirror the request protocol
    pub fn set_protocol(&mut self, name: impl Into<String>, version: impl Into<String>) {
        self.protocol_name = name.into();
        self.protocol_version = version.into();
    }

    /// Append a header value
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add(name.into(), value.into());
    }

    /// Replace every value of a header (case-insensitive) with `value`
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.remove_ignore_case(&name);
        self.headers.add(name, value.into());
    }

    /// Drop a header (case-insensitive)
    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove_ignore_case(name).is_some()
    }

    pub fn headers(&self) -> &MultiMap<String, String> {
        &self.headers
    }

    /// First value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all_ignore_case(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Append a cookie to be set on the client
    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Replace the body writer
    pub fn set_body(&mut self, body: impl BodyWriter + 'static) {
        self.body = Box::new(body);
    }

    pub fn body(&self) -> &dyn BodyWriter {
        self.body.as_ref()
    }

    /// Set a plain-text body
    pub fn text(&mut self, body: impl Into<Bytes>) {
        self.set_body(BytesBody::new("text/plain; charset=utf-8", body));
    }

    /// Set an HTML body
    pub fn html(&mut self, body: impl Into<Bytes>) {
        self.set_body(BytesBody::new("text/html; charset=utf-8", body));
    }

    /// Set a JSON body
    pub fn json(&mut self, body: impl Into<Bytes>) {
        self.set_body(BytesBody::new("application/json", body));
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(body: &dyn BodyWriter) -> Vec<u8> {
        let mut out = Vec::new();
        body.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_status_code() {
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::NOT_FOUND.is_client_error());
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_server_error());
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
        assert_eq!(StatusCode::from_u16(500), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(StatusCode::from_u16(299), None);
    }

    #[test]
    fn test_default_response() {
        let res = Response::default();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.protocol_name(), "HTTP");
        assert_eq!(res.protocol_version(), "1.1");
        assert!(res.body().content_type().is_none());
        assert!(drain(res.body()).is_empty());
    }

    #[test]
    fn test_headers_append() {
        let mut res = Response::ok();
        res.add_header("Vary", "Accept");
        res.add_header("Vary", "Cookie");
        assert_eq!(res.headers().get_all("Vary").unwrap(), &["Accept", "Cookie"]);
        assert_eq!(res.header("vary"), Some("Accept"));
    }

    #[test]
    fn test_text_body() {
        let mut res = Response::ok();
        res.text("Hello");
        assert_eq!(res.body().content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(drain(res.body()), b"Hello");
    }

    #[test]
    fn test_file_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("404.html");
        std::fs::write(&path, "<h1>gone</h1>").unwrap();

        let body = FileBody::new(&path);
        assert_eq!(body.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(drain(&body), b"<h1>gone</h1>");
    }

    #[test]
    fn test_missing_file_fails() {
        let body = FileBody::new("/definitely/not/here.txt");
        let mut out = Vec::new();
        assert!(body.write_to(&mut out).is_err());
    }
}
