//! squall-core: Embeddable HTTP/1.1 protocol engine
//!
//! The pieces, leaves first:
//! - [`parser`] - streaming token/trigger request parser
//! - [`session`] - concurrent session registry with background expiry
//! - [`dispatcher`] - first-match pattern routing with default-file bodies
//! - [`serializer`] - response to fixed-size chunks, optional gzip
//! - [`processor`] - per-request orchestration
//! - [`server`] - readiness-driven tokio transport
//!
//! ```no_run
//! use squall_core::{Dispatcher, Request, Response, ServerConfig};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.handle("/hello", |_: &Request, response: &mut Response| -> std::io::Result<()> {
//!     response.text("hello");
//!     Ok(())
//! });
//!
//! squall_core::server::run(ServerConfig::default().port(8080), dispatcher).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod body;
pub mod cookie;
pub mod dispatcher;
pub mod error;
pub mod multimap;
pub mod parser;
pub mod processor;
pub mod request;
pub mod response;
pub mod serializer;
pub mod server;
pub mod session;

// Re-exports
pub use body::{BodyReader, BytesReader, RequestBody, StringReader};
pub use cookie::{Cookie, CookieBuilder};
pub use dispatcher::{Dispatcher, Pattern, RequestHandler};
pub use error::{Error, Result};
pub use multimap::MultiMap;
pub use parser::{Method, RequestParser};
pub use processor::{Outcome, ProtocolProcessor};
pub use request::{Request, RequestBuilder};
pub use response::{BodyWriter, BytesBody, EmptyBody, FileBody, Response, StatusCode};
pub use serializer::ResponseSerializer;
pub use server::{Server, ServerConfig};
pub use session::{Scheduler, Session, SessionManager, SessionValue, TokioScheduler, SESSION_COOKIE_NAME};
