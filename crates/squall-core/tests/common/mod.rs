//! Raw TCP client and server bootstrap shared by the integration tests.

#![allow(dead_code)]

use squall_core::{Dispatcher, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Running server; dropping it stops accepting
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<Server>,
    _stop: oneshot::Sender<()>,
}

pub fn config() -> ServerConfig {
    ServerConfig::new()
        .host("127.0.0.1")
        .port(0)
        .workers(2)
        .keep_alive_timeout(Duration::from_secs(5))
        .server_name("squall/test")
}

pub async fn start(dispatcher: Dispatcher, config: ServerConfig) -> TestServer {
    let server = Arc::new(Server::new(config, dispatcher).expect("server"));
    let listener = server.bind().expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (stop, stopped) = oneshot::channel::<()>();

    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await;
    });

    TestServer {
        addr,
        server,
        _stop: stop,
    }
}

/// Parsed response
#[derive(Debug)]
pub struct Reply {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `name=value` of the first Set-Cookie line
    pub fn cookie_pair(&self) -> Option<String> {
        self.header("set-cookie")
            .and_then(|line| line.split(';').next())
            .map(|pair| pair.trim().to_string())
    }
}

/// Client keeping unread bytes between responses
pub struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.stream.write_all(raw.as_bytes()).await.expect("write");
    }

    pub async fn read_reply(&mut self) -> Reply {
        let head_end = loop {
            if let Some(at) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break at + 4;
            }
            assert!(self.fill().await > 0, "connection closed before response head");
        };

        let head = String::from_utf8_lossy(&self.buffer[..head_end]).into_owned();
        let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
        let status_line = lines.next().expect("status line").to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(": "))
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        let length: usize = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse().expect("numeric length"))
            .unwrap_or(0);
        while self.buffer.len() < head_end + length {
            assert!(self.fill().await > 0, "connection closed before response body");
        }

        let body = self.buffer[head_end..head_end + length].to_vec();
        self.buffer.drain(..head_end + length);
        Reply {
            status_line,
            headers,
            body,
        }
    }

    /// Check the server closed the connection
    pub async fn is_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut byte)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    async fn fill(&mut self) -> usize {
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .expect("read");
        self.buffer.extend_from_slice(&chunk[..n]);
        n
    }
}
