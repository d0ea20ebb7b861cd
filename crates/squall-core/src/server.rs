//! Native server
//!
//! Readiness-driven transport around the protocol engine:
//! - multi-threaded tokio runtime, threads named `protocol-processor-N`
//! - one task per connection owning its parser
//! - request processing on the blocking pool, bounded by `workers` permits
//! - SO_REUSEADDR / SO_REUSEPORT / TCP_NODELAY listener
//! - keep-alive and pipelining: bytes after a message stay for the next one

use crate::dispatcher::Dispatcher;
use crate::parser::RequestParser;
use crate::processor::{Outcome, ProtocolProcessor};
use crate::session::{Scheduler, SessionManager, TokioScheduler};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    /// Maximum number of requests processed at once
    pub workers: usize,
    pub session_max_age: Duration,
    /// Idle time allowed between requests; zero disables keep-alive
    pub keep_alive_timeout: Duration,
    /// Value of the `Server` header
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: num_cpus::get(),
            session_max_age: Duration::from_secs(30 * 60),
            keep_alive_timeout: Duration::from_secs(15),
            server_name: concat!("squall/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Check the configuration once, before serving
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.session_max_age < Duration::from_secs(1) {
            return Err(Error::Config(format!(
                "session max-age must be at least one second, got {:?}",
                self.session_max_age
            )));
        }
        if self.session_max_age.as_secs() > i64::MAX as u64 {
            return Err(Error::Config(format!(
                "session max-age of {}s does not fit a cookie",
                self.session_max_age.as_secs()
            )));
        }
        self.socket_addr().map(|_| ())
    }

    /// Resolve `host:port`
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve host '{}': {}", self.host, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("host '{}' resolved to no address", self.host)))
    }

    fn keep_alive(&self) -> Option<Duration> {
        (!self.keep_alive_timeout.is_zero()).then_some(self.keep_alive_timeout)
    }
}

/// Create a TCP listener socket with optimizations
pub fn create_optimized_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - let several processes share the port
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    // TCP_NODELAY - inherited by accepted sockets on most platforms
    socket.set_nodelay(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;

    Ok(socket)
}

/// Tracks open connections for draining on shutdown
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicU64,
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Open connections
    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Decrements the tracker when a connection task ends, however it ends
struct ConnectionGuard(Arc<ConnectionTracker>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// HTTP/1.1 server
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    processor: ProtocolProcessor,
    permits: Arc<Semaphore>,
    tracker: Arc<ConnectionTracker>,
}

impl Server {
    /// Create a server whose sessions expire on the current tokio runtime
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::Config("server must be created inside a tokio runtime".to_string()))?;
        Self::with_scheduler(config, dispatcher, TokioScheduler::new(handle))
    }

    /// Create a server with a custom session expiry scheduler
    pub fn with_scheduler(
        config: ServerConfig,
        dispatcher: Dispatcher,
        scheduler: impl Scheduler + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionManager::new(config.session_max_age, scheduler));
        let processor = ProtocolProcessor::new(sessions, Arc::new(dispatcher), config.server_name.clone());
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.workers)),
            tracker: Arc::new(ConnectionTracker::new()),
            config,
            processor,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.processor.sessions()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.count()
    }

    /// Bind the configured address
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.socket_addr()?;
        let socket = create_optimized_socket(&addr)?;
        let listener = TcpListener::from_std(socket.into())?;
        tracing::info!(addr = %listener.local_addr()?, workers = self.config.workers, "listening");
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let accept_loop = async {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                if self.tracker.is_shutting_down() {
                    drop(stream);
                    continue;
                }

                let connection = Connection {
                    processor: self.processor.clone(),
                    permits: Arc::clone(&self.permits),
                    keep_alive_timeout: self.config.keep_alive(),
                };
                self.tracker.increment();
                let guard = ConnectionGuard(Arc::clone(&self.tracker));

                tokio::spawn(async move {
                    let _guard = guard;
                    tracing::debug!(%peer, "connection opened");
                    if let Err(e) = connection.run(stream).await {
                        tracing::debug!(%peer, error = %e, "connection error");
                    }
                    tracing::debug!(%peer, "connection closed");
                });
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown => {
                tracing::info!("shutdown requested, no longer accepting");
                self.tracker.start_shutdown();
            }
        }
        Ok(())
    }

    /// Wait for open connections to finish
    ///
    /// Returns false when `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.start_shutdown();
        let start = Instant::now();

        while self.tracker.count() > 0 {
            if start.elapsed() >= timeout {
                tracing::warn!(open = self.tracker.count(), "connections still open after drain timeout");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Build the runtime, serve until Ctrl-C, then drain and drop all sessions
pub fn run(config: ServerConfig, dispatcher: Dispatcher) -> Result<()> {
    config.validate()?;

    let counter = AtomicUsize::new(0);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name_fn(move || format!("protocol-processor-{}", counter.fetch_add(1, Ordering::SeqCst)))
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = Server::new(config, dispatcher)?;
        let listener = server.bind()?;

        server
            .serve(listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "cannot listen for Ctrl-C");
                }
            })
            .await?;

        server.drain(Duration::from_secs(5)).await;
        server.sessions().shutdown();
        tracing::info!("server stopped");
        Ok(())
    })
}

/// Per-connection state, moved into the connection task
struct Connection {
    processor: ProtocolProcessor,
    permits: Arc<Semaphore>,
    keep_alive_timeout: Option<Duration>,
}

impl Connection {
    async fn run(self, stream: TcpStream) -> io::Result<()> {
        let client = stream.peer_addr()?;
        let server = stream.local_addr()?;

        {
            let socket = SockRef::from(&stream);
            socket.set_nodelay(true)?;
            if self.keep_alive_timeout.is_some() {
                socket.set_keepalive(true)?;
            }
        }

        let mut pending = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let mut parser = RequestParser::new(client, server);
            let mut parsed = Ok(());

            loop {
                if !pending.is_empty() {
                    match parser.feed(&pending) {
                        Ok(consumed) => pending.advance(consumed),
                        Err(e) => {
                            parsed = Err(e);
                            break;
                        }
                    }
                }
                if parser.is_complete() {
                    break;
                }

                match self.read(&stream, &mut buf).await? {
                    Some(n) => pending.extend_from_slice(&buf[..n]),
                    None if parser.has_started() => {
                        tracing::debug!(%client, "connection ended mid-request");
                        return Ok(());
                    }
                    None => return Ok(()),
                }
            }

            let outcome = match parsed {
                Ok(()) => match parser.into_request() {
                    Some(request) => {
                        let keep_alive = self.socket_keep_alive(&stream);
                        self.process(move |p| p.process(request, keep_alive)).await?
                    }
                    None => return Ok(()),
                },
                Err(e) => self.process(move |p| p.fail(&e)).await?,
            };

            match outcome {
                Outcome::Write { buffers, keep_alive } => {
                    if let Err(e) = write_buffers(&stream, buffers).await {
                        tracing::error!(%client, error = %e, "write failed, dropping connection");
                        return Err(e);
                    }
                    if !keep_alive {
                        return Ok(());
                    }
                }
                Outcome::Abort => return Ok(()),
            }
        }
    }

    /// Read once, `None` on end of stream or idle timeout
    async fn read(&self, stream: &TcpStream, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            match self.keep_alive_timeout {
                Some(timeout) => {
                    if tokio::time::timeout(timeout, stream.readable()).await.is_err() {
                        return Ok(None);
                    }
                }
                None => stream.readable().await?,
            }

            match stream.try_read(buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Keep-alive timeout to advertise, when the socket has SO_KEEPALIVE
    fn socket_keep_alive(&self, stream: &TcpStream) -> Option<Duration> {
        match SockRef::from(stream).keepalive() {
            Ok(true) => self.keep_alive_timeout,
            Ok(false) => None,
            Err(e) => {
                tracing::debug!(error = %e, "cannot read SO_KEEPALIVE");
                None
            }
        }
    }

    /// Run `job` on the blocking pool once a worker permit is free
    async fn process<F>(&self, job: F) -> io::Result<Outcome>
    where
        F: FnOnce(&ProtocolProcessor) -> Outcome + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let processor = self.processor.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job(&processor)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Drain `buffers` in order, stopping at the sentinel
async fn write_buffers(stream: &TcpStream, buffers: VecDeque<Bytes>) -> io::Result<()> {
    for mut chunk in buffers {
        if chunk.is_empty() {
            break;
        }
        while chunk.has_remaining() {
            stream.writable().await?;
            match stream.try_write(&chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => chunk.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.workers >= 1);
        assert_eq!(config.session_max_age, Duration::from_secs(1800));
        assert!(config.server_name.starts_with("squall/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(ServerConfig::new().workers(0).validate().is_err());
        assert!(ServerConfig::new().host("").validate().is_err());
        assert!(ServerConfig::new().session_max_age(Duration::ZERO).validate().is_err());
        assert!(ServerConfig::new()
            .session_max_age(Duration::from_millis(999))
            .validate()
            .is_err());
        assert!(ServerConfig::new().session_max_age(Duration::from_secs(1)).validate().is_ok());
        assert!(ServerConfig::new()
            .session_max_age(Duration::from_secs(u64::MAX))
            .validate()
            .is_err());
        assert!(matches!(
            ServerConfig::new().workers(0).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_keep_alive_toggle() {
        assert_eq!(
            ServerConfig::new().keep_alive_timeout(Duration::from_secs(3)).keep_alive(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(ServerConfig::new().keep_alive_timeout(Duration::ZERO).keep_alive(), None);
    }

    #[test]
    fn test_socket_addr() {
        let addr = ServerConfig::new().host("127.0.0.1").port(9000).socket_addr().unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            Server::new(ServerConfig::default(), Dispatcher::new()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_optimized_socket_binds_ephemeral_port() {
        let socket = create_optimized_socket(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = TcpListener::from_std(socket.into()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_connection_tracker() {
        let tracker = Arc::new(ConnectionTracker::new());
        tracker.increment();
        {
            let _guard = ConnectionGuard(Arc::clone(&tracker));
            tracker.increment();
            assert_eq!(tracker.count(), 2);
        }
        assert_eq!(tracker.count(), 1);
        assert!(!tracker.is_shutting_down());
        tracker.start_shutdown();
        assert!(tracker.is_shutting_down());
    }
}
