//! End-to-end tests over real TCP connections.

use flate2::read::GzDecoder;
use squall_core::{Dispatcher, Request, Response, SessionValue, StatusCode, SESSION_COOKIE_NAME};
use std::io::{self, Read, Write};

mod common;
use common::Client;

fn demo_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .handle("/hello", |request: &Request, response: &mut Response| -> io::Result<()> {
            let name = request.query_param("name").unwrap_or("world");
            response.text(format!("hello {}", name));
            Ok(())
        })
        .handle("/visits", |request: &Request, response: &mut Response| -> io::Result<()> {
            let session = request
                .session()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no session"))?;
            let visits = session.update("visits", |v| {
                SessionValue::from(v.and_then(SessionValue::as_i64).unwrap_or(0) + 1)
            });
            response.text(format!("{}", visits.as_i64().unwrap_or(0)));
            Ok(())
        })
        .handle("/form", |request: &Request, response: &mut Response| -> io::Result<()> {
            let user = request.parameter("user").unwrap_or("");
            let lang = request.parameter("lang").unwrap_or("");
            response.text(format!("{}:{}", user, lang));
            Ok(())
        })
        .handle("*.fail", |_: &Request, response: &mut Response| -> io::Result<()> {
            response.add_header("Location", "/elsewhere");
            Err(io::Error::new(io::ErrorKind::Other, "handler failure"))
        });
    dispatcher
}

#[tokio::test]
async fn test_hello_round_trip() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GET /hello?name=squall HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let reply = client.read_reply().await;

    assert_eq!(reply.status_line, "HTTP/1.1 200 OK");
    assert_eq!(reply.text(), "hello squall");
    assert_eq!(reply.header("server"), Some("squall/test"));
    assert_eq!(reply.header("connection"), Some("keep-alive"));
    assert_eq!(reply.header("keep-alive"), Some("timeout=5"));
    assert!(reply.header("date").is_some());
    assert!(reply.cookie_pair().unwrap().starts_with(SESSION_COOKIE_NAME));
}

#[tokio::test]
async fn test_keep_alive_and_pipelining() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client
        .send("GET /hello?name=one HTTP/1.1\r\n\r\nGET /hello?name=two HTTP/1.1\r\n\r\n")
        .await;
    assert_eq!(client.read_reply().await.text(), "hello one");
    assert_eq!(client.read_reply().await.text(), "hello two");

    client.send("GET /hello?name=three HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_reply().await.text(), "hello three");
}

#[tokio::test]
async fn test_fragmented_request() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    for fragment in ["GE", "T /hel", "lo HTTP/1", ".1\r\nHost: x\r", "\n\r\n"] {
        client.send(fragment).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(client.read_reply().await.text(), "hello world");
}

#[tokio::test]
async fn test_session_is_reused() {
    let server = common::start(demo_dispatcher(), common::config()).await;

    let mut first = Client::connect(server.addr).await;
    first.send("GET /visits HTTP/1.1\r\n\r\n").await;
    let reply = first.read_reply().await;
    assert_eq!(reply.text(), "1");
    let cookie = reply.cookie_pair().expect("session cookie");

    let mut second = Client::connect(server.addr).await;
    second
        .send(&format!("GET /visits HTTP/1.1\r\nCookie: theme=dark; {}\r\n\r\n", cookie))
        .await;
    let reply = second.read_reply().await;
    assert_eq!(reply.text(), "2");
    assert!(reply.header("set-cookie").is_none());
    assert_eq!(server.server.sessions().len(), 1);
}

#[tokio::test]
async fn test_form_parameters() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    let body = "user=j%C3%B6rg&lang=rust+lang";
    client
        .send(&format!(
            "POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;
    assert_eq!(client.read_reply().await.text(), "jörg:rust lang");
}

#[tokio::test]
async fn test_parse_error_is_500_and_closes() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("BREW /pot HTTP/1.1\r\n\r\n").await;
    let reply = client.read_reply().await;

    assert_eq!(reply.status(), 500);
    assert_eq!(reply.header("connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_handler_failure_is_500() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GET /report.fail HTTP/1.1\r\n\r\n").await;
    let reply = client.read_reply().await;
    assert_eq!(reply.status_line, "HTTP/1.1 500 Internal Server Error");
    assert_eq!(reply.headers_named("connection"), vec!["close"]);
    assert!(reply.header("keep-alive").is_none());
    assert!(reply.header("location").is_none());
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_not_found_default_body() {
    let mut page = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
    page.write_all(b"<h1>404</h1>").unwrap();

    let mut dispatcher = demo_dispatcher();
    dispatcher.default_response(StatusCode::NOT_FOUND, page.path()).unwrap();
    let server = common::start(dispatcher, common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GET /missing HTTP/1.0\r\n\r\n").await;
    let reply = client.read_reply().await;

    assert_eq!(reply.status_line, "HTTP/1.0 404 Not Found");
    assert_eq!(reply.body, b"<h1>404</h1>");
    assert_eq!(reply.header("content-type"), Some("text/html; charset=utf-8"));
}

#[tokio::test]
async fn test_gzip_response() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client
        .send("GET /hello HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\n\r\n")
        .await;
    let reply = client.read_reply().await;
    assert_eq!(reply.header("content-encoding"), Some("gzip"));

    let mut text = String::new();
    GzDecoder::new(&reply.body[..]).read_to_string(&mut text).unwrap();
    assert_eq!(text, "hello world");
}

#[tokio::test]
async fn test_connection_close_requested() {
    let server = common::start(demo_dispatcher(), common::config()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let reply = client.read_reply().await;
    assert_eq!(reply.header("connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_keep_alive_disabled() {
    let config = common::config().keep_alive_timeout(std::time::Duration::ZERO);
    let server = common::start(demo_dispatcher(), config).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GET /hello HTTP/1.1\r\n\r\n").await;
    let reply = client.read_reply().await;
    assert!(reply.header("keep-alive").is_none());
    assert_eq!(reply.headers_named("connection"), vec!["close"]);
    assert!(client.is_closed().await);
}
