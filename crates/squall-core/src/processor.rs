//! Per-request protocol processing
//!
//! Runs on a worker thread once the parser has a complete request: stamps
//! the standard headers, attaches the session, dispatches, mirrors the
//! request protocol and serializes. A response is always produced unless
//! serialization itself fails, in which case the connection is dropped.

use crate::dispatcher::Dispatcher;
use crate::request::Request;
use crate::response::{EmptyBody, Response, StatusCode};
use crate::serializer::{ResponseSerializer, RFC1123};
use crate::session::{SessionManager, SESSION_COOKIE_NAME};
use crate::Error;
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the connection should do after processing
#[derive(Debug)]
pub enum Outcome {
    /// Write `buffers` in order, then read the next request if `keep_alive`
    Write { buffers: VecDeque<Bytes>, keep_alive: bool },
    /// Close the connection without writing
    Abort,
}

/// Request orchestrator shared by every worker
#[derive(Debug, Clone)]
pub struct ProtocolProcessor {
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    server_name: String,
}

impl ProtocolProcessor {
    pub fn new(sessions: Arc<SessionManager>, dispatcher: Arc<Dispatcher>, server_name: impl Into<String>) -> Self {
        Self {
            sessions,
            dispatcher,
            server_name: server_name.into(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Process one complete request
    ///
    /// `keep_alive` is the connection's keep-alive timeout when the socket
    /// has `SO_KEEPALIVE` set, `None` otherwise.
    pub fn process(&self, mut request: Request, keep_alive: Option<Duration>) -> Outcome {
        let started = Instant::now();
        log_request(&request);

        let reuse = keep_alive.filter(|_| !request.wants_close());
        let mut response = self.stamped(reuse);
        let mut failed = false;

        let handled = self
            .sessions
            .manage_session(&mut request, &mut response)
            .and_then(|_| self.dispatcher.dispatch(&request, &mut response).map_err(Error::from));
        if let Err(e) = handled {
            tracing::error!(method = %request.method(), path = %request.path(), error = %e, "request failed");
            // Nothing the handler wrote survives except the session cookie
            let mut fresh = self.stamped(None);
            for cookie in response.cookies().iter().filter(|c| c.name() == SESSION_COOKIE_NAME) {
                fresh.add_cookie(cookie.clone());
            }
            response = fresh;
            self.internal_error(&mut response);
            failed = true;
        }

        response.set_protocol(request.protocol_name(), request.protocol_version());
        let keep_alive = reuse.is_some() && !failed;
        let outcome = self.serialize(&mut response, request.accepts_gzip(), keep_alive);

        tracing::info!(
            method = %request.method(),
            path = %request.path(),
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        outcome
    }

    /// Answer a request that could not be parsed; the connection closes
    pub fn fail(&self, error: &Error) -> Outcome {
        tracing::warn!(error = %error, "rejecting malformed request");
        let mut response = self.stamped(None);
        self.internal_error(&mut response);
        self.serialize(&mut response, false, false)
    }

    fn stamped(&self, keep_alive: Option<Duration>) -> Response {
        let mut response = Response::ok();
        response.add_header("Date", Utc::now().format(RFC1123).to_string());
        response.add_header("Server", self.server_name.as_str());
        match keep_alive {
            Some(timeout) => {
                response.add_header("Keep-Alive", format!("timeout={}", timeout.as_secs()));
                response.add_header("Connection", "keep-alive");
            }
            None => {
                response.add_header("Connection", "close");
            }
        }
        response
    }

    fn internal_error(&self, response: &mut Response) {
        response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.set_body(EmptyBody);
        self.dispatcher.apply_default_body(response);
    }

    fn serialize(&self, response: &mut Response, gzip: bool, keep_alive: bool) -> Outcome {
        match ResponseSerializer::new(gzip).serialize(response) {
            Ok(serialized) => {
                log_response(response);
                Outcome::Write {
                    buffers: serialized.buffers,
                    keep_alive,
                }
            }
            Err(e) => {
                tracing::error!(status = %response.status(), error = %e, "serialization failed, dropping connection");
                Outcome::Abort
            }
        }
    }
}

fn log_request(request: &Request) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    tracing::debug!(
        client = %request.client_addr(),
        "{} {} {}/{}",
        request.method(),
        request.path(),
        request.protocol_name(),
        request.protocol_version()
    );
    for (name, values) in request.headers().iter() {
        tracing::debug!("> {}: {}", name, values.join(", "));
    }
    for cookie in request.cookies() {
        tracing::debug!("> cookie {}={}", cookie.name(), cookie.value());
    }
}

fn log_response(response: &Response) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    tracing::debug!("< {}/{} {}", response.protocol_name(), response.protocol_version(), response.status());
    for (name, values) in response.headers().iter() {
        tracing::debug!("< {}: {}", name, values.join(", "));
    }
    for cookie in response.cookies() {
        tracing::debug!("< set-cookie {}={}", cookie.name(), cookie.value());
    }
}
