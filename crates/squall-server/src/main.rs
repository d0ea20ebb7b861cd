use clap::Parser;
use squall_core::{Dispatcher, Request, Response, ServerConfig, SessionValue, StatusCode};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Demo server for the squall HTTP/1.1 engine
#[derive(Parser, Debug)]
#[command(name = "squall", version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "SQUALL_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind, 0 for an ephemeral port
    #[arg(short, long, env = "SQUALL_PORT", default_value_t = 8080)]
    port: u16,

    /// Requests processed at once (defaults to the number of CPUs)
    #[arg(short, long, env = "SQUALL_WORKERS")]
    workers: Option<usize>,

    /// Session lifetime in seconds
    #[arg(long, env = "SQUALL_SESSION_MAX_AGE", default_value_t = 1800)]
    session_max_age: u64,

    /// Idle seconds allowed between requests, 0 disables keep-alive
    #[arg(long, env = "SQUALL_KEEP_ALIVE", default_value_t = 15)]
    keep_alive: u64,

    /// File served as the body of every 404
    #[arg(long, env = "SQUALL_NOT_FOUND")]
    not_found: Option<PathBuf>,

    /// File served as the body of every 500
    #[arg(long, env = "SQUALL_SERVER_ERROR")]
    server_error: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squall_core=info,squall=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new()
        .host(args.host)
        .port(args.port)
        .session_max_age(Duration::from_secs(args.session_max_age))
        .keep_alive_timeout(Duration::from_secs(args.keep_alive));
    if let Some(workers) = args.workers {
        config = config.workers(workers);
    }

    let mut dispatcher = routes();
    if let Some(file) = args.not_found {
        dispatcher.default_response(StatusCode::NOT_FOUND, file)?;
    }
    if let Some(file) = args.server_error {
        dispatcher.default_response(StatusCode::INTERNAL_SERVER_ERROR, file)?;
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        session_max_age = ?config.session_max_age,
        keep_alive = ?config.keep_alive_timeout,
        "squall {} starting",
        env!("CARGO_PKG_VERSION")
    );
    squall_core::server::run(config, dispatcher)?;
    Ok(())
}

fn routes() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .handle("/", index)
        .handle("/hello", hello)
        .handle("/visits", visits)
        .handle("/echo*", echo);
    dispatcher
}

fn index(_: &Request, response: &mut Response) -> io::Result<()> {
    response.html(
        "<!doctype html><title>squall</title>\
         <ul><li><a href=\"/hello?name=you\">/hello</a></li>\
         <li><a href=\"/visits\">/visits</a></li>\
         <li><a href=\"/echo/anything\">/echo/*</a></li></ul>",
    );
    Ok(())
}

fn hello(request: &Request, response: &mut Response) -> io::Result<()> {
    let name = request.query_param("name").unwrap_or("world");
    response.text(format!("Hello, {}!\n", name));
    Ok(())
}

fn visits(request: &Request, response: &mut Response) -> io::Result<()> {
    let session = request
        .session()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "request has no session"))?;
    let count = session.update("visits", |current| {
        SessionValue::from(current.and_then(SessionValue::as_i64).unwrap_or(0) + 1)
    });
    response.text(format!(
        "session {} visited {} time(s)\n",
        session.id(),
        count.as_i64().unwrap_or(0)
    ));
    Ok(())
}

/// Reflect the request back as plain text
fn echo(request: &Request, response: &mut Response) -> io::Result<()> {
    let mut out = format!(
        "{} {} {}/{}\n",
        request.method(),
        request.path(),
        request.protocol_name(),
        request.protocol_version()
    );
    for (name, values) in request.headers().iter() {
        out.push_str(&format!("{}: {}\n", name, values.join(", ")));
    }
    for (name, values) in request.query_params().iter() {
        out.push_str(&format!("?{}={}\n", name, values.join(",")));
    }
    for (name, values) in request.parameters().iter() {
        out.push_str(&format!("&{}={}\n", name, values.join(",")));
    }
    out.push('\n');
    out.push_str(&request.body_string());
    response.text(out);
    Ok(())
}
