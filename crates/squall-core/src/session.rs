//! Sessions
//!
//! The [`SessionManager`] owns a concurrent registry of sessions keyed by a
//! random identifier carried in the `SQUALLSESSIONID` cookie. Every new
//! session gets a one-shot expiry task on the [`Scheduler`] that drops it
//! from the registry once its max-age has elapsed, regardless of traffic.

use crate::cookie::Cookie;
use crate::request::Request;
use crate::response::Response;
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

/// Name of the cookie carrying the session identifier
pub const SESSION_COOKIE_NAME: &str = "SQUALLSESSIONID";

/// Session attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    String(String),
    Number(f64),
    Bool(bool),
    Array(Vec<SessionValue>),
    Object(HashMap<String, SessionValue>),
    Null,
}

impl SessionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SessionValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|n| n as i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SessionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SessionValue::Null)
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        SessionValue::String(s)
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        SessionValue::String(s.to_string())
    }
}

impl From<f64> for SessionValue {
    fn from(n: f64) -> Self {
        SessionValue::Number(n)
    }
}

impl From<i64> for SessionValue {
    fn from(n: i64) -> Self {
        SessionValue::Number(n as f64)
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        SessionValue::Bool(b)
    }
}

impl From<Vec<SessionValue>> for SessionValue {
    fn from(values: Vec<SessionValue>) -> Self {
        SessionValue::Array(values)
    }
}

/// Server-side session
///
/// Shared between the registry and every request presenting its
/// identifier. Attributes and timestamps are independently locked; the
/// identifier never changes.
pub struct Session {
    id: Uuid,
    created_at: SystemTime,
    last_accessed: Mutex<SystemTime>,
    is_new: AtomicBool,
    attributes: RwLock<HashMap<String, SessionValue>>,
}

impl Session {
    fn new() -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_accessed: Mutex::new(now),
            is_new: AtomicBool::new(true),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_time(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_accessed_time(&self) -> SystemTime {
        *self.last_accessed.lock()
    }

    /// Check if the client has not yet presented this session back
    pub fn is_new(&self) -> bool {
        self.is_new.load(Ordering::Acquire)
    }

    /// Get a copy of an attribute
    pub fn get(&self, key: &str) -> Option<SessionValue> {
        self.attributes.read().get(key).cloned()
    }

    /// Set an attribute, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<SessionValue>) -> Option<SessionValue> {
        self.attributes.write().insert(key.into(), value.into())
    }

    /// Remove an attribute
    pub fn remove(&self, key: &str) -> Option<SessionValue> {
        self.attributes.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.read().contains_key(key)
    }

    /// Attribute names, in no particular order
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }

    /// Update an attribute in place under the write lock
    pub fn update<F>(&self, key: &str, f: F) -> SessionValue
    where
        F: FnOnce(Option<&SessionValue>) -> SessionValue,
    {
        let mut attributes = self.attributes.write();
        let value = f(attributes.get(key));
        attributes.insert(key.to_string(), value.clone());
        value
    }

    fn touch(&self) {
        *self.last_accessed.lock() = SystemTime::now();
        self.is_new.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_accessed", &self.last_accessed_time())
            .field("is_new", &self.is_new())
            .field("attributes", &self.attributes.read().len())
            .finish()
    }
}

/// One-shot delayed task
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Facility running delayed tasks in the background
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`
    fn schedule(&self, delay: Duration, task: Task);

    /// Drop every task that has not run yet
    fn shutdown(&self) {}
}

/// [`Scheduler`] backed by tokio timers
#[derive(Debug)]
pub struct TokioScheduler {
    handle: Handle,
    stop: watch::Sender<bool>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        let (stop, _) = watch::channel(false);
        Self { handle, stop }
    }

    /// Scheduler on the runtime of the calling task
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            tracing::warn!(?delay, "scheduler is shut down, dropping task");
            return;
        }
        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => task(),
                _ = stop.changed() => {}
            }
        });
    }

    fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

/// Concurrent session registry with background expiry
pub struct SessionManager {
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    max_age: Duration,
    scheduler: Box<dyn Scheduler>,
    closed: AtomicBool,
}

impl SessionManager {
    pub fn new(max_age: Duration, scheduler: impl Scheduler + 'static) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_age,
            scheduler: Box::new(scheduler),
            closed: AtomicBool::new(false),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Attach a session to `request`, creating one when needed
    ///
    /// A known identifier in any `SQUALLSESSIONID` cookie reuses that
    /// session and refreshes its last-accessed time. Otherwise a new
    /// session is registered, scheduled for expiry and announced to the
    /// client with a `Set-Cookie`.
    pub fn manage_session(&self, request: &mut Request, response: &mut Response) -> Result<Arc<Session>> {
        if let Some(session) = request.session() {
            return Ok(session.clone());
        }

        if let Some(session) = self.find(request) {
            tracing::debug!(session = %session.id(), "reusing session");
            session.touch();
            request.set_session(session.clone());
            return Ok(session);
        }

        // Without a live scheduler a new session would never expire
        if self.is_closed() {
            tracing::warn!(path = %request.path(), "refusing to create a session after shutdown");
            return Err(Error::SessionsClosed);
        }

        let session = Arc::new(Session::new());
        let cookie = self.session_cookie(&session, request)?;
        let id = session.id();

        self.sessions.insert(id, session.clone());
        let registry = Arc::clone(&self.sessions);
        self.scheduler.schedule(
            self.max_age,
            Box::new(move || {
                if registry.remove(&id).is_some() {
                    tracing::debug!(session = %id, "session expired");
                }
            }),
        );

        tracing::debug!(session = %id, max_age = ?self.max_age, "created session");
        response.add_cookie(cookie);
        request.set_session(session.clone());
        Ok(session)
    }

    /// Look a session up by identifier
    pub fn lookup(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a session before its expiry
    pub fn invalidate(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancel pending expiry tasks and forget every session
    ///
    /// No session can be created afterwards.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.scheduler.shutdown();
        self.sessions.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn find(&self, request: &Request) -> Option<Arc<Session>> {
        request
            .cookies()
            .iter()
            .filter(|cookie| cookie.name() == SESSION_COOKIE_NAME)
            .filter_map(|cookie| Uuid::parse_str(cookie.value()).ok())
            .find_map(|id| self.lookup(&id))
    }

    fn session_cookie(&self, session: &Session, request: &Request) -> Result<Cookie> {
        let mut builder = Cookie::builder()
            .name(SESSION_COOKIE_NAME)
            .value(session.id().to_string())
            .domain(request.server_host())
            .path("/")
            .max_age(cookie_max_age(self.max_age));
        if request.server_port() != 0 {
            builder = builder.port(request.server_port());
        }
        builder.build()
    }
}

/// Whole seconds for the cookie, never rounding a live session down to 0
fn cookie_max_age(max_age: Duration) -> i64 {
    let secs = max_age.as_secs().saturating_add(u64::from(max_age.subsec_nanos() > 0));
    secs.min(i64::MAX as u64) as i64
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}
