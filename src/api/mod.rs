//! `potholed` collection server.
//!
//! Single-threaded HTTP/1.1 service over a plain `TcpListener`: one
//! connection is read, answered and closed at a time. Uploads are routed
//! into the event store by payload shape; reads return either the raw
//! three-log snapshot or the classified markers computed from it.

use crate::config::PotholedConfig;
use crate::images::{ImageStore, DEFAULT_IMAGE_DIR};
use crate::markers::{Marker, MarkerPipeline, MarkerSet};
use crate::payload::ParseMode;
use crate::proximity::{ProximityAlert, ProximityMonitor};
use crate::storage::{EventLog, EventLogStore};
use crate::{GeoPoint, SensorKind, SeverityPolicy};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub image_dir: PathBuf,
    pub severity: SeverityPolicy,
    pub proximity: ProximityMonitor,
    pub parse_mode: ParseMode,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            severity: SeverityPolicy::default(),
            proximity: ProximityMonitor::default(),
            parse_mode: ParseMode::default(),
        }
    }
}

impl From<&PotholedConfig> for ApiConfig {
    fn from(cfg: &PotholedConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            image_dir: cfg.image_dir.clone(),
            severity: cfg.severity,
            proximity: cfg.proximity,
            parse_mode: cfg.parse_mode,
        }
    }
}

/// Body of `GET /markers`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerReport {
    pub markers: Vec<Marker>,
    pub camera_hint: Option<Marker>,
}

impl From<MarkerSet> for MarkerReport {
    fn from(set: MarkerSet) -> Self {
        let camera_hint = set.camera_hint().cloned();
        Self {
            markers: set.into_vec(),
            camera_hint,
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

pub struct ApiServer<S> {
    cfg: ApiConfig,
    store: S,
}

impl<S: EventLogStore + Send + 'static> ApiServer<S> {
    pub fn new(cfg: ApiConfig, store: S) -> Self {
        Self { cfg, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
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

        let images = ImageStore::new(&self.cfg.image_dir)?;
        let mut service = Service {
            store: self.store,
            images,
            pipeline: MarkerPipeline::new(self.cfg.severity).with_mode(self.cfg.parse_mode),
            proximity: self.cfg.proximity,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &mut service, shutdown_thread) {
                log::error!("collection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api<S: EventLogStore>(
    listener: TcpListener,
    service: &mut Service<S>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("collection api request rejected: {}", err);
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

fn handle_connection<S: EventLogStore>(mut stream: TcpStream, service: &mut Service<S>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return Response::error(403, "forbidden").write_to(&mut stream);
    }

    let request = match read_request(&mut stream)? {
        Ok(request) => request,
        Err(response) => return response.write_to(&mut stream),
    };
    let response = service.handle(&request);
    response.write_to(&mut stream)
}

struct Service<S> {
    store: S,
    images: ImageStore,
    pipeline: MarkerPipeline,
    proximity: ProximityMonitor,
}

impl<S: EventLogStore> Service<S> {
    fn handle(&mut self, request: &HttpRequest) -> Response {
        match request.method.as_str() {
            "POST" => self.ingest(request),
            "GET" => match request.path.as_str() {
                "/health" => Response::json(200, &json!({"status": "ok"})),
                "/" | "/logs" => self.logs(),
                "/markers" => self.markers(),
                "/proximity" => self.proximity(request),
                _ => Response::error(404, "not_found"),
            },
            _ => Response::error(405, "method_not_allowed"),
        }
    }

    fn ingest(&mut self, request: &HttpRequest) -> Response {
        let Some(header_id) = request.header("detection-id") else {
            return Response::error(400, "Detection-ID header missing");
        };
        match request.content_type().as_deref() {
            Some("application/json") => self.ingest_json(header_id, &request.body),
            Some("image/jpeg") => match self.images.save(header_id, &request.body) {
                Ok(filename) => {
                    log::info!("saved image as {}", filename);
                    Response::json(
                        200,
                        &json!({"status": "success", "type": "image", "filename": filename}),
                    )
                }
                Err(err) => {
                    log::error!("error processing image upload: {}", err);
                    Response::error(400, &err.to_string())
                }
            },
            _ => Response::error(400, "Unsupported content type"),
        }
    }

    fn ingest_json(&mut self, header_id: &str, body: &[u8]) -> Response {
        let routed = parse_upload(body);
        let (event_log, payload) = match routed {
            Ok(routed) => routed,
            Err(err) => {
                log::error!("error processing upload: {}", err);
                return Response::error(400, &err.to_string());
            }
        };
        if let Err(err) = self.store.append(event_log, header_id, &payload) {
            log::error!("error appending to {} log: {}", event_log, err);
            return Response::error(500, "Server error");
        }
        log::info!("received {} payload for detection {}", event_log, header_id);
        Response::json(200, &json!({"status": "success", "type": event_log.as_str()}))
    }

    fn logs(&mut self) -> Response {
        match self.store.snapshot() {
            Ok(snapshot) => Response::json(200, &snapshot),
            Err(err) => {
                log::error!("error reading event logs: {}", err);
                Response::error(500, "Server error")
            }
        }
    }

    fn classified(&mut self) -> std::result::Result<MarkerSet, Response> {
        let snapshot = self.store.snapshot().map_err(|err| {
            log::error!("error reading event logs: {}", err);
            Response::error(500, "Server error")
        })?;
        self.pipeline
            .run(&snapshot)
            .map_err(|err| Response::error(422, &format!("{err:#}")))
    }

    fn markers(&mut self) -> Response {
        match self.classified() {
            Ok(set) => Response::json(200, &MarkerReport::from(set)),
            Err(response) => response,
        }
    }

    fn proximity(&mut self, request: &HttpRequest) -> Response {
        let query = request.query();
        let coord = |key: &str| query.get(key).and_then(|v| v.parse::<f64>().ok());
        let (Some(lat), Some(lng)) = (coord("lat"), coord("lng")) else {
            return Response::error(400, "lat and lng query parameters are required");
        };
        let accuracy = match query.get("accuracy") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) => v,
                Err(_) => return Response::error(400, "accuracy must be a number"),
            },
            None => 0.0,
        };
        let set = match self.classified() {
            Ok(set) => set,
            Err(response) => return response,
        };
        let alert: Option<ProximityAlert> =
            self.proximity.check(&set, GeoPoint::new(lat, lng), accuracy);
        if let Some(alert) = &alert {
            log::info!(
                "proximity warning: detection {} at {:.1} m",
                alert.marker.detection_id,
                alert.distance_m
            );
        }
        Response::json(200, &json!({ "alert": alert }))
    }
}

/// Routes an upload body to its log by shape: coordinates make a GPS
/// entry, a `type` names the inertial log.
pub fn parse_upload(body: &[u8]) -> Result<(EventLog, Value)> {
    if body.is_empty() {
        return Err(anyhow!("Empty JSON data received"));
    }
    let data: Value =
        serde_json::from_slice(body).map_err(|e| anyhow!("invalid JSON payload: {}", e))?;
    let obj = data
        .as_object()
        .ok_or_else(|| anyhow!("Invalid data format"))?;
    let event_log = if obj.contains_key("latitude") && obj.contains_key("longitude") {
        EventLog::Gps
    } else if let Some(kind) = obj.get("type") {
        match kind.as_str().and_then(SensorKind::parse) {
            Some(SensorKind::Accelerometer) => EventLog::Accelerometer,
            Some(SensorKind::Gyroscope) => EventLog::Gyroscope,
            None => return Err(anyhow!("Invalid sensor data type")),
        }
    } else {
        return Err(anyhow!("Invalid data format"));
    };
    Ok((event_log, data))
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => {
                log::error!("response serialization failed: {}", err);
                Self::error(500, "Server error")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({"status": "error", "message": message})
                .to_string()
                .into_bytes(),
        }
    }

    fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        let status_line = match self.status {
            200 => "HTTP/1.1 200 OK",
            400 => "HTTP/1.1 400 Bad Request",
            403 => "HTTP/1.1 403 Forbidden",
            404 => "HTTP/1.1 404 Not Found",
            405 => "HTTP/1.1 405 Method Not Allowed",
            413 => "HTTP/1.1 413 Payload Too Large",
            422 => "HTTP/1.1 422 Unprocessable Entity",
            _ => "HTTP/1.1 500 Internal Server Error",
        };
        let header = format!(
            "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            status_line = status_line,
            content_type = self.content_type,
            len = self.body.len()
        );
        stream.write_all(header.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(())
    }
}

/// Reads one request. The inner `Err` is a response to send back instead
/// of handling the request (oversized or malformed input).
fn read_request(stream: &mut TcpStream) -> Result<std::result::Result<HttpRequest, Response>> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Ok(Err(Response::error(413, "request headers too large")));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
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

    let content_length = match headers.get("content-length") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(len) => len,
            Err(_) => return Ok(Err(Response::error(400, "invalid Content-Length"))),
        },
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Ok(Err(Response::error(413, "request body too large")));
    }

    let mut body = data[header_end + 4..].to_vec();
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request body"));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        headers,
        body,
    }))
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Media type without parameters, lowercased.
    fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or(value)
                .trim()
                .to_ascii_lowercase()
        })
    }

    fn query(&self) -> HashMap<&str, &str> {
        self.raw_path
            .split_once('?')
            .map(|(_, query)| {
                query
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .collect()
            })
            .unwrap_or_default()
    }
}
