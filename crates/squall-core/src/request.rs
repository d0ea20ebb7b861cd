//! HTTP Request types

use crate::body::{BodyReader, BytesReader, RequestBody, StringReader};
use crate::cookie::Cookie;
use crate::multimap::MultiMap;
use crate::parser::Method;
use crate::session::Session;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

/// `Content-Length` value before the header has been seen
pub const UNKNOWN_LENGTH: i64 = -1;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP Request
///
/// Filled in by the streaming parser; the session is attached afterwards
/// by the session manager.
#[derive(Debug)]
pub struct Request {
    pub(crate) client: SocketAddr,
    pub(crate) server: SocketAddr,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) protocol_name: String,
    pub(crate) protocol_version: String,
    pub(crate) headers: MultiMap<String, String>,
    pub(crate) query: MultiMap<String, String>,
    pub(crate) parameters: MultiMap<String, String>,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) content_length: i64,
    pub(crate) body: RequestBody,
    pub(crate) session: Option<Arc<Session>>,
}

impl Request {
    pub(crate) fn empty(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            client,
            server,
            method: Method::Get,
            path: String::new(),
            protocol_name: String::new(),
            protocol_version: String::new(),
            headers: MultiMap::new(),
            query: MultiMap::new(),
            parameters: MultiMap::new(),
            cookies: Vec::new(),
            content_length: UNKNOWN_LENGTH,
            body: RequestBody::new(),
            session: None,
        }
    }

    /// Remote peer address
    pub fn client_addr(&self) -> SocketAddr {
        self.client
    }

    /// Remote peer host, as text
    pub fn client_host(&self) -> String {
        self.client.ip().to_string()
    }

    pub fn client_port(&self) -> u16 {
        self.client.port()
    }

    /// Local host the request arrived on, as text
    pub fn server_host(&self) -> String {
        self.server.ip().to_string()
    }

    pub fn server_port(&self) -> u16 {
        self.server.port()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Decoded path, without the query string
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Protocol name, e.g. `HTTP`
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// Protocol version, e.g. `1.1`
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn headers(&self) -> &MultiMap<String, String> {
        &self.headers
    }

    /// First value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a header (case-insensitive)
    pub fn header_values(&self, name: &str) -> Option<&[String]> {
        self.headers.get_all_ignore_case(name)
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Check if the body is an url-encoded form
    pub fn is_form(&self) -> bool {
        self.content_type()
            .map(|v| v.trim().to_ascii_lowercase().starts_with(FORM_URLENCODED))
            .unwrap_or(false)
    }

    /// Check if the client accepts gzip-encoded responses
    ///
    /// `gzip;q=0` is a refusal.
    pub fn accepts_gzip(&self) -> bool {
        self.header_values("accept-encoding")
            .map(|values| {
                values
                    .iter()
                    .flat_map(|v| v.split(','))
                    .any(|coding| {
                        let mut parts = coding.split(';');
                        let is_gzip = parts
                            .next()
                            .map(|name| name.trim().eq_ignore_ascii_case("gzip"))
                            .unwrap_or(false);
                        is_gzip && quality(parts) > 0.0
                    })
            })
            .unwrap_or(false)
    }

    /// Check if the client asked to close the connection after this exchange
    pub fn wants_close(&self) -> bool {
        self.header_values("connection")
            .map(|values| values.iter().any(|v| v.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    }

    /// Query string parameters, in arrival order
    pub fn query_params(&self) -> &MultiMap<String, String> {
        &self.query
    }

    /// First value of a query string parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get_first(name).map(String::as_str)
    }

    /// Form parameters from an url-encoded body
    pub fn parameters(&self) -> &MultiMap<String, String> {
        &self.parameters
    }

    /// First value of a form parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get_first(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// First cookie with the given name
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name() == name)
    }

    /// Declared body length, [`UNKNOWN_LENGTH`] when no header was sent
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Stream the body through `reader`; can be repeated
    pub fn read_body<R: BodyReader>(&self, reader: R) -> R::Output {
        self.body.read(reader)
    }

    /// Whole body as bytes
    pub fn body_bytes(&self) -> Bytes {
        self.read_body(BytesReader::default())
    }

    /// Whole body as text (lossy UTF-8)
    pub fn body_string(&self) -> String {
        self.read_body(StringReader::default())
    }

    /// Session attached for this request
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub(crate) fn set_session(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }
}

/// Builder for constructing requests outside the parser
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Create a new builder
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let local = SocketAddr::from(([127, 0, 0, 1], 0));
        let mut request = Request::empty(local, local);
        request.method = method;
        request.path = path.into();
        request.protocol_name = "HTTP".to_string();
        request.protocol_version = "1.1".to_string();
        Self { request }
    }

    /// Set the peer addresses
    pub fn addresses(mut self, client: SocketAddr, server: SocketAddr) -> Self {
        self.request.client = client;
        self.request.server = server;
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.add(name.into(), value.into());
        self
    }

    /// Add a query string parameter
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.add(name.into(), value.into());
        self
    }

    /// Add a request cookie
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.request.cookies.push(cookie);
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.request.content_length = body.len() as i64;
        self.request.body = RequestBody::from_chunks(Some(body));
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}

/// The `q` weight among coding parameters, 1 when absent and 0 when unreadable
fn quality<'a>(params: impl Iterator<Item = &'a str>) -> f32 {
    for param in params {
        if let Some((name, value)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("q") {
                return value.trim().parse::<f32>().unwrap_or(0.0);
            }
        }
    }
    1.0
}
