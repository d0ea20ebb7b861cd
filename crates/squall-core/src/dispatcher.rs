//! Pattern dispatcher
//!
//! Routes are tried in registration order and the first match wins:
//! - `*.ext` matches any path ending with `.ext`
//! - `/static/*` matches any path starting with `/static/`
//! - anything else must equal the path exactly
//!
//! A file registered for the final status code replaces the body, which is
//! how error pages and fallbacks are served without touching handlers.

use crate::request::Request;
use crate::response::{FileBody, Response, StatusCode};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Request handler
///
/// Failures are I/O-classified; the processor turns them into a 500.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Request, response: &mut Response) -> io::Result<()>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request, &mut Response) -> io::Result<()> + Send + Sync,
{
    fn handle(&self, request: &Request, response: &mut Response) -> io::Result<()> {
        self(request, response)
    }
}

/// Path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Whole path must match
    Literal(String),
    /// Path must start with the text (`/prefix*`)
    Prefix(String),
    /// Path must end with the text (`*suffix`)
    Suffix(String),
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        if let Some(suffix) = pattern.strip_prefix('*') {
            Pattern::Suffix(suffix.to_string())
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Literal(pattern.to_string())
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Literal(literal) => path == literal,
            Pattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Pattern::Suffix(suffix) => path.ends_with(suffix.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Pattern::parse(pattern)
    }
}

impl From<String> for Pattern {
    fn from(pattern: String) -> Self {
        Pattern::parse(&pattern)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(literal) => f.write_str(literal),
            Pattern::Prefix(prefix) => write!(f, "{}*", prefix),
            Pattern::Suffix(suffix) => write!(f, "*{}", suffix),
        }
    }
}

/// Dispatch table
///
/// Built once before serving, then shared read-only by every worker.
#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<(Pattern, Arc<dyn RequestHandler>)>,
    default_bodies: HashMap<StatusCode, PathBuf>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; earlier registrations take precedence
    pub fn handle(&mut self, pattern: impl Into<Pattern>, handler: impl RequestHandler + 'static) -> &mut Self {
        self.routes.push((pattern.into(), Arc::new(handler)));
        self
    }

    /// Serve `file` as the body of every response ending with `status`
    pub fn default_response(&mut self, status: StatusCode, file: impl Into<PathBuf>) -> Result<&mut Self> {
        let file = file.into();
        if !file.is_file() {
            return Err(Error::Config(format!(
                "Default response for {} must be an existing regular file, got '{}'",
                status,
                file.display()
            )));
        }
        self.default_bodies.insert(status, file);
        Ok(self)
    }

    /// Pattern that would serve `path`
    pub fn route_for(&self, path: &str) -> Option<&Pattern> {
        self.routes
            .iter()
            .map(|(pattern, _)| pattern)
            .find(|pattern| pattern.matches(path))
    }

    /// Run the first matching handler, then apply the default body for
    /// the resulting status
    ///
    /// Handler failures are returned untouched.
    pub fn dispatch(&self, request: &Request, response: &mut Response) -> io::Result<()> {
        let path = request.path();

        match self.routes.iter().find(|(pattern, _)| pattern.matches(path)) {
            Some((pattern, handler)) => {
                tracing::debug!(%path, %pattern, "dispatching");
                response.set_status(StatusCode::OK);
                handler.handle(request, response)?;
            }
            None => {
                tracing::debug!(%path, "no handler matched");
                response.set_status(StatusCode::NOT_FOUND);
            }
        }

        self.apply_default_body(response);
        Ok(())
    }

    /// Replace the body with the file registered for the response status
    pub fn apply_default_body(&self, response: &mut Response) -> bool {
        match self.default_bodies.get(&response.status()) {
            Some(file) => {
                tracing::debug!(status = %response.status(), file = %file.display(), "serving default body");
                response.set_body(FileBody::new(file.clone()));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<String> = self.routes.iter().map(|(p, _)| p.to_string()).collect();
        f.debug_struct("Dispatcher")
            .field("routes", &patterns)
            .field("default_bodies", &self.default_bodies)
            .finish()
    }
}
