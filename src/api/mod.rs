//! HTTP surface over the tracker.
//!
//! Blocking `TcpListener` on its own thread with a cooperative shutdown flag.
//! MJPEG clients get a dedicated thread each; every other request is served
//! inline and the connection closed.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{CameraSource, Numeric, SessionRequest};
use crate::error::TrackerError;
use crate::journal::DEFAULT_TAIL_LINES;
use crate::session::Tracker;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
const MJPEG_INTERVAL: Duration = Duration::from_millis(50);
const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Directory served under `/captures/`.
    pub captures_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            captures_dir: PathBuf::from("output_frames"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    tracker: Arc<Tracker>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, tracker: Arc<Tracker>) -> Self {
        Self { cfg, tracker }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let context = ApiContext {
            cfg: self.cfg,
            tracker: self.tracker,
            shutdown: shutdown.clone(),
        };
        let join = std::thread::Builder::new()
            .name("deskwatch-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, context) {
                    log::error!("api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

#[derive(Clone)]
struct ApiContext {
    cfg: ApiConfig,
    tracker: Arc<Tracker>,
    shutdown: Arc<AtomicBool>,
}

fn run_api(listener: TcpListener, ctx: ApiContext) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &ctx) {
                    log::warn!("api request rejected: {:#}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = match read_request(&mut stream, ctx.cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(
                &mut stream,
                400,
                &json!({"status": "error", "message": format!("{:#}", err)}),
            )?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        ("GET", "/status") => {
            let body = serde_json::to_value(ctx.tracker.status())?;
            write_json_response(&mut stream, 200, &body)
        }
        ("GET", "/logs") => {
            let lines = request
                .query
                .get("lines")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TAIL_LINES);
            let logs = ctx.tracker.logs(lines).unwrap_or_else(|err| {
                log::warn!("journal read failed: {:#}", err);
                vec!["Error reading log file".to_string()]
            });
            write_json_response(&mut stream, 200, &json!({"status": "success", "logs": logs}))
        }
        ("GET", "/frame.jpg") => {
            let jpeg = ctx.tracker.current_frame_jpeg()?;
            write_response(&mut stream, 200, "image/jpeg", &jpeg)
        }
        ("GET", "/video_feed") => {
            let tracker = ctx.tracker.clone();
            let shutdown = ctx.shutdown.clone();
            std::thread::Builder::new()
                .name("deskwatch-mjpeg".to_string())
                .spawn(move || {
                    if let Err(err) = stream_mjpeg(stream, &tracker, &shutdown) {
                        log::debug!("mjpeg client gone: {:#}", err);
                    }
                })?;
            Ok(())
        }
        ("GET", path) if path.starts_with("/captures/") => {
            serve_capture(&mut stream, &ctx.cfg, &path["/captures/".len()..])
        }
        ("POST", "/start") | ("POST", "/start_tracking") => {
            let session: SessionRequest = if request.body.iter().all(u8::is_ascii_whitespace) {
                SessionRequest::default()
            } else {
                match serde_json::from_slice(&request.body) {
                    Ok(session) => session,
                    Err(err) => {
                        return write_json_response(
                            &mut stream,
                            400,
                            &json!({"status": "error", "message": format!("invalid session request: {}", err)}),
                        )
                    }
                }
            };
            let outcome = ctx.tracker.start_request(session).map(|_| "Tracking started");
            write_outcome(&mut stream, outcome)
        }
        ("POST", "/stop") | ("POST", "/stop_tracking") => {
            let outcome = ctx.tracker.stop().map(|_| "Tracking stopped");
            write_outcome(&mut stream, outcome)
        }
        ("POST", "/upload") | ("POST", "/upload_video") => handle_upload(&mut stream, ctx, &request),
        (_, "/health" | "/status" | "/logs" | "/frame.jpg" | "/video_feed" | "/start"
        | "/start_tracking" | "/stop" | "/stop_tracking" | "/upload" | "/upload_video") => {
            write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))
        }
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

/// `POST /upload?filename=desk.mp4&absence_threshold=5...` with the video as the raw body.
fn handle_upload(stream: &mut TcpStream, ctx: &ApiContext, request: &HttpRequest) -> Result<()> {
    if request.body.is_empty() {
        return write_json_response(
            stream,
            400,
            &json!({"status": "error", "message": "No video file in request"}),
        );
    }
    let Some(filename) = request.query.get("filename").filter(|f| !f.trim().is_empty()) else {
        return write_json_response(
            stream,
            400,
            &json!({"status": "error", "message": "No video file selected"}),
        );
    };

    let session = upload_session_request(&request.query);
    let outcome = ctx
        .tracker
        .store_upload(filename, &request.body)
        .and_then(|_| ctx.tracker.start_request(session))
        .map(|_| "Tracking started");
    write_outcome(stream, outcome)
}

fn upload_session_request(query: &HashMap<String, String>) -> SessionRequest {
    let numeric = |key: &str| query.get(key).map(|v| Numeric::Text(v.clone()));
    let area_method = query.get("area_method").cloned();
    let manual_coords = if area_method.as_deref() == Some("manual") {
        query.get("manual_coords").cloned()
    } else {
        None
    };
    SessionRequest {
        source_type: Some("upload".to_string()),
        camera_source: query.get("camera_source").cloned().map(CameraSource::Locator),
        absence_threshold: numeric("absence_threshold"),
        confidence: numeric("confidence"),
        area_method,
        manual_coords,
    }
}

fn serve_capture(stream: &mut TcpStream, cfg: &ApiConfig, name: &str) -> Result<()> {
    let safe = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !safe {
        return write_json_response(stream, 400, &json!({"error": "invalid_capture_name"}));
    }
    match std::fs::read(cfg.captures_dir.join(name)) {
        Ok(bytes) => write_response(stream, 200, content_type_for(name), &bytes),
        Err(_) => write_json_response(stream, 404, &json!({"error": "not_found"})),
    }
}

fn content_type_for(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".png") {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

fn stream_mjpeg(mut stream: TcpStream, tracker: &Tracker, shutdown: &AtomicBool) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    while !shutdown.load(Ordering::SeqCst) {
        let jpeg = tracker.current_frame_jpeg()?;
        let part = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            MJPEG_BOUNDARY,
            jpeg.len()
        );
        stream.write_all(part.as_bytes())?;
        stream.write_all(&jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        std::thread::sleep(MJPEG_INTERVAL);
    }
    Ok(())
}

fn write_outcome(stream: &mut TcpStream, outcome: Result<&str, TrackerError>) -> Result<()> {
    match outcome {
        Ok(message) => write_json_response(
            stream,
            200,
            &json!({"status": "success", "message": message}),
        ),
        Err(err) => {
            log::warn!("request failed: {}", err);
            write_json_response(
                stream,
                status_for(&err),
                &json!({"status": "error", "message": err.to_string()}),
            )
        }
    }
}

fn status_for(err: &TrackerError) -> u16 {
    match err {
        TrackerError::AlreadyRunning | TrackerError::NotRunning => 409,
        TrackerError::Configuration(_) | TrackerError::NoUploadedVideo => 400,
        TrackerError::SourceUnavailable(_) | TrackerError::FrameReadFailure(_) => 503,
        TrackerError::Inference(_) | TrackerError::Io(_) => 500,
    }
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers were complete"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(anyhow!(
            "request body of {} bytes exceeds the {} byte limit",
            content_length,
            max_body
        ));
    }
    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let remaining = (content_length - body.len()) as u64;
        (&mut *stream)
            .take(remaining)
            .read_to_end(&mut body)
            .context("read request body")?;
        if body.len() < content_length {
            return Err(anyhow!(
                "request body truncated: expected {} bytes, got {}",
                content_length,
                body.len()
            ));
        }
    }

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_query_becomes_upload_session() {
        let query = parse_query("filename=desk.mp4&absence_threshold=3&area_method=manual&manual_coords=0.2%2C0.2%2C0.8%2C0.8");
        let request = upload_session_request(&query);
        assert_eq!(request.source_type.as_deref(), Some("upload"));
        assert_eq!(request.absence_threshold, Some(Numeric::Text("3".to_string())));
        assert_eq!(request.manual_coords.as_deref(), Some("0.2,0.2,0.8,0.8"));
    }

    #[test]
    fn manual_coords_ignored_for_auto_uploads() {
        let query = parse_query("filename=a.mp4&manual_coords=1,2,3,4");
        assert_eq!(upload_session_request(&query).manual_coords, None);
    }

    #[test]
    fn error_statuses_follow_taxonomy() {
        assert_eq!(status_for(&TrackerError::AlreadyRunning), 409);
        assert_eq!(status_for(&TrackerError::NoUploadedVideo), 400);
        assert_eq!(status_for(&TrackerError::source_unavailable("cam")), 503);
    }

    #[test]
    fn capture_content_types() {
        assert_eq!(content_type_for("frame_000001.JPG"), "image/jpeg");
        assert_eq!(content_type_for("notes.txt"), "application/octet-stream");
    }
}
