//! HTTP API for pushing payloads into the shared block and reading series back.
//!
//! Uses `std::net::TcpListener` with one thread per connection; every
//! thread shares the same [`Block`]. At most `max_connections` requests are
//! served at once; connections past that get a 503 and are closed. Request
//! heads are capped at [`MAX_HEAD_BYTES`] and bodies at `max_body_bytes`.
//!
//! Endpoints:
//!
//! - `POST /metrics` — ingest one payload; replies with the ingest summary
//! - `POST /series`  — body is a selector such as `up{job="api"}`; replies with the series
//! - `GET /health`   — liveness check
//! - `GET /info`     — block stats (JSON)
//!
//! A payload that fails to read is rejected as a whole: 400 for syntax
//! errors, 422 for semantic ones. Nothing from a rejected payload reaches
//! the block.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use cadenza::reader::parse_selector;
use cadenza::{Block, CadenzaError, LineReader, Reader};
use serde_json::json;
use thiserror::Error;

use crate::config::IngestorConfig;

/// Largest accepted request line plus headers, in bytes.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Why a request could not be read off the wire.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The request line or headers could not be understood.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The declared body is larger than the configured limit.
    #[error("request body of {length} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// Declared `Content-Length`.
        length: usize,
        /// Configured `max_body_bytes`.
        limit: usize,
    },

    /// The request line and headers did not end within [`MAX_HEAD_BYTES`].
    #[error("request head exceeds limit of {limit} bytes")]
    HeadTooLarge {
        /// The head size limit.
        limit: usize,
    },

    /// The connection failed or timed out.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A parsed HTTP request.
#[derive(Debug)]
pub struct Request {
    /// Request method, e.g. `POST`.
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    /// Request body.
    pub body: Vec<u8>,
}

/// A JSON HTTP response.
#[derive(Debug)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: String,
}

impl Response {
    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &json!({ "error": message.into() }))
    }

    fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        write!(
            out,
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            self.status,
            status_text(self.status),
            self.body.len(),
            self.body,
        )?;
        out.flush()
    }
}

/// Binds the configured address and serves requests until the process exits.
///
/// # Errors
///
/// Returns the bind error if the listener cannot be created.
pub fn run_api_server(block: Arc<Block>, config: Arc<IngestorConfig>) -> io::Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)?;
    tracing::info!("listening on {addr}");

    serve(&listener, &block, &config);
    Ok(())
}

/// A claim on one of the server's connection slots, released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    /// Claims a slot, or returns `None` if `limit` slots are already taken.
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accepts connections forever, handling each on its own thread.
pub fn serve(listener: &TcpListener, block: &Arc<Block>, config: &Arc<IngestorConfig>) {
    let active = Arc::new(AtomicUsize::new(0));

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        let Some(slot) = ConnectionSlot::acquire(&active, config.max_connections) else {
            tracing::warn!(
                limit = config.max_connections,
                "connection limit reached, rejecting"
            );
            if let Err(e) = Response::error(503, "too many connections").write_to(&stream) {
                tracing::debug!("failed to send 503: {e}");
            }
            continue;
        };

        let block = Arc::clone(block);
        let config = Arc::clone(config);
        let spawned = thread::Builder::new()
            .name("ingest-conn".to_string())
            .spawn(move || {
                let _slot = slot;
                if let Err(e) = handle_connection(&stream, &block, &config) {
                    tracing::debug!("request error: {e}");
                }
            });

        if let Err(e) = spawned {
            tracing::warn!("failed to spawn connection thread: {e}");
        }
    }
}

/// Reads one request from the connection and writes the response.
fn handle_connection(
    stream: &TcpStream,
    block: &Block,
    config: &IngestorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    stream.set_read_timeout(config.read_timeout())?;

    let response = match read_request(stream, config.max_body_bytes) {
        Ok(request) => route(&request, block),
        Err(e @ RequestError::BodyTooLarge { .. }) => Response::error(413, e.to_string()),
        Err(e @ RequestError::HeadTooLarge { .. }) => Response::error(431, e.to_string()),
        Err(e @ RequestError::Malformed(_)) => Response::error(400, e.to_string()),
        Err(RequestError::Io(e)) => return Err(e.into()),
    };

    response.write_to(stream)?;
    Ok(())
}

/// Parses `METHOD /path HTTP/1.x`, the headers, and a `Content-Length` body.
///
/// # Errors
///
/// - [`RequestError::Malformed`] for a bad request line or `Content-Length`
/// - [`RequestError::HeadTooLarge`] if the head runs past [`MAX_HEAD_BYTES`]
/// - [`RequestError::BodyTooLarge`] if the body exceeds `max_body_bytes`
/// - [`RequestError::Io`] if the connection fails before the body is read
pub fn read_request<R: Read>(source: R, max_body_bytes: usize) -> Result<Request, RequestError> {
    let mut reader = BufReader::new(source);
    let mut head = (&mut reader).take(MAX_HEAD_BYTES as u64);

    let request_line = read_head_line(&mut head)?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(RequestError::Malformed(format!(
            "bad request line '{}'",
            request_line.trim()
        )));
    };
    let path = target.split_once('?').map_or(target, |(p, _)| p).to_string();
    let method = method.to_string();

    let mut content_length = 0usize;
    loop {
        let line = read_head_line(&mut head)?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().map_err(|_| {
                RequestError::Malformed(format!("invalid content-length '{}'", value.trim()))
            })?;
        }
    }

    if content_length > max_body_bytes {
        return Err(RequestError::BodyTooLarge {
            length: content_length,
            limit: max_body_bytes,
        });
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;

    Ok(Request { method, path, body })
}

/// Reads one head line, failing if the head limit cuts it short.
fn read_head_line<R: BufRead>(head: &mut io::Take<R>) -> Result<String, RequestError> {
    let mut line = String::new();
    head.read_line(&mut line)?;
    if !line.ends_with('\n') && head.limit() == 0 {
        return Err(RequestError::HeadTooLarge {
            limit: MAX_HEAD_BYTES,
        });
    }
    Ok(line)
}

/// Dispatches a request to its handler.
pub fn route(request: &Request, block: &Block) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/metrics") => handle_ingest(&request.body, block),
        ("POST", "/series") => handle_lookup(&request.body, block),
        ("GET", "/health") => Response::json(200, &json!({ "status": "ok" })),
        ("GET", "/info") => Response::json(200, &json!(block.stats())),
        (_, "/metrics" | "/series" | "/health" | "/info") => {
            Response::error(405, "method not allowed")
        }
        _ => Response::error(404, "not found"),
    }
}

/// `POST /metrics` — reads the payload and folds it into the block.
fn handle_ingest(body: &[u8], block: &Block) -> Response {
    match LineReader::new().read(body) {
        Ok(group) => {
            let summary = block.ingest(group);
            Response::json(200, &json!(summary))
        }
        Err(e) => {
            tracing::warn!(line = e.line, "rejected payload: {e}");
            let status = if e.is_syntax() { 400 } else { 422 };
            Response::json(status, &json!({ "error": e.to_string(), "line": e.line }))
        }
    }
}

/// `POST /series` — looks up one series by selector.
fn handle_lookup(body: &[u8], block: &Block) -> Response {
    let Ok(selector) = std::str::from_utf8(body) else {
        return Response::error(400, "selector is not valid UTF-8");
    };

    let (name, labels) = match parse_selector(selector) {
        Ok(parsed) => parsed,
        Err(e) => return Response::error(400, e.to_string()),
    };

    match block.lookup(&name, &labels) {
        Ok(series) => Response::json(200, &json!(series)),
        Err(e @ CadenzaError::Lookup(_)) => Response::error(404, e.to_string()),
        Err(e) => Response::error(500, e.to_string()),
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
