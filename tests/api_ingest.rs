use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use serde_json::{json, Value};

use pothole_telemetry::api::{ApiConfig, ApiServer};
use pothole_telemetry::{EventLog, EventLogStore, SqliteEventLogStore};

fn spawn_server(dir: &tempfile::TempDir) -> (pothole_telemetry::api::ApiHandle, String) {
    let db_path = dir.path().join("pothole.db");
    let db_path = db_path.to_string_lossy().to_string();
    let store = SqliteEventLogStore::open(&db_path).expect("open store");
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        image_dir: dir.path().join("potholes"),
        ..ApiConfig::default()
    };
    let handle = ApiServer::new(cfg, store).spawn().expect("spawn api");
    (handle, db_path)
}

fn send(addr: SocketAddr, raw: &[u8]) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.write_all(raw).expect("write request");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).expect("read response");
    let text = String::from_utf8_lossy(&response).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = text.split("\r\n\r\n").nth(1).unwrap_or_default();
    let value = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, value)
}

fn post(addr: SocketAddr, detection_id: Option<&str>, content_type: &str, body: &[u8]) -> (u16, Value) {
    let mut raw = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
        content_type,
        body.len()
    );
    if let Some(id) = detection_id {
        raw.push_str(&format!("Detection-ID: {}\r\n", id));
    }
    raw.push_str("\r\n");
    let mut bytes = raw.into_bytes();
    bytes.extend_from_slice(body);
    send(addr, &bytes)
}

fn get(addr: SocketAddr, path: &str) -> (u16, Value) {
    let raw = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    send(addr, raw.as_bytes())
}

fn post_json(addr: SocketAddr, detection_id: &str, value: Value) -> (u16, Value) {
    post(
        addr,
        Some(detection_id),
        "application/json",
        value.to_string().as_bytes(),
    )
}

#[test]
fn ingest_routes_payloads_into_their_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, db_path) = spawn_server(&dir);
    let addr = handle.addr;

    let (status, body) = post_json(
        addr,
        "5",
        json!({"detection_id": "5", "latitude": 1.0, "longitude": 2.0}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["type"], "gps");

    let (status, body) = post_json(
        addr,
        "5",
        json!({"type": "accelerometer", "detection_id": "5", "x": 0.0, "y": 8.0, "z": 3.5}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["type"], "accelerometer");

    let (status, body) = post_json(
        addr,
        "5",
        json!({"type": "gyroscope", "detection_id": "5", "x": 0.1, "y": 0.0, "z": 0.0}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["type"], "gyroscope");

    let (status, snapshot) = get(addr, "/logs");
    assert_eq!(status, 200);
    assert_eq!(snapshot["gps_log"].as_array().map(Vec::len), Some(1));
    assert_eq!(snapshot["accelerometer_log"].as_array().map(Vec::len), Some(1));
    assert_eq!(snapshot["gyroscope_log"].as_array().map(Vec::len), Some(1));
    assert_eq!(snapshot["gps_log"][0]["latitude"], 1.0);

    handle.stop().expect("stop api");

    let mut store = SqliteEventLogStore::open(&db_path).expect("reopen store");
    assert_eq!(store.count(EventLog::Gps).expect("count"), 1);
    assert_eq!(store.count(EventLog::Accelerometer).expect("count"), 1);
    assert_eq!(store.count(EventLog::Gyroscope).expect("count"), 1);
}

#[test]
fn ingest_rejects_bad_uploads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _) = spawn_server(&dir);
    let addr = handle.addr;

    let body = json!({"detection_id": "1", "latitude": 1.0, "longitude": 2.0}).to_string();
    let (status, reply) = post(addr, None, "application/json", body.as_bytes());
    assert_eq!(status, 400);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "Detection-ID header missing");

    let (status, reply) = post(addr, Some("1"), "text/plain", b"hello");
    assert_eq!(status, 400);
    assert_eq!(reply["message"], "Unsupported content type");

    let (status, reply) = post_json(addr, "1", json!({"type": "magnetometer", "x": 1.0}));
    assert_eq!(status, 400);
    assert_eq!(reply["message"], "Invalid sensor data type");

    let (status, reply) = post_json(addr, "1", json!({"detection_id": "1"}));
    assert_eq!(status, 400);
    assert_eq!(reply["message"], "Invalid data format");

    let (status, reply) = post(addr, Some("1"), "application/json", b"");
    assert_eq!(status, 400);
    assert_eq!(reply["message"], "Empty JSON data received");

    let (status, _) = get(addr, "/nowhere");
    assert_eq!(status, 404);

    let (status, snapshot) = get(addr, "/");
    assert_eq!(status, 200);
    assert_eq!(snapshot["gps_log"], json!([]));
    assert_eq!(snapshot["accelerometer_log"], json!([]));

    handle.stop().expect("stop api");
}

#[test]
fn jpeg_uploads_are_saved_by_detection_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _) = spawn_server(&dir);
    let addr = handle.addr;

    let jpeg = [0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
    let (status, reply) = post(addr, Some("12"), "image/jpeg", &jpeg);
    assert_eq!(status, 200);
    assert_eq!(reply["type"], "image");
    assert_eq!(reply["filename"], "12.jpg");

    let saved = std::fs::read(dir.path().join("potholes").join("12.jpg")).expect("saved image");
    assert_eq!(saved, jpeg);

    let (status, reply) = post(addr, Some("13"), "image/jpeg", b"");
    assert_eq!(status, 400);
    assert_eq!(reply["message"], "Empty image data received");

    handle.stop().expect("stop api");
}

#[test]
fn markers_and_proximity_are_served_from_the_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _) = spawn_server(&dir);
    let addr = handle.addr;

    post_json(
        addr,
        "7",
        json!({"detection_id": "7", "latitude": 51.5, "longitude": -0.12}),
    );
    post_json(
        addr,
        "7",
        json!({"type": "accelerometer", "detection_id": "7", "x": 30.0, "y": 8.0, "z": 3.5}),
    );
    post_json(
        addr,
        "9",
        json!({"detection_id": "9", "latitude": 10.0, "longitude": 10.0}),
    );

    let (status, report) = get(addr, "/markers");
    assert_eq!(status, 200);
    let markers = report["markers"].as_array().expect("markers");
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0]["detection_id"], "7");
    assert_eq!(markers[0]["category"], "Severe");
    assert_eq!(markers[0]["label"], "Severe Pothole : 30.0 , 0.0");
    assert_eq!(report["camera_hint"]["detection_id"], "7");

    let (status, reply) = get(addr, "/proximity?lat=51.50005&lng=-0.12&accuracy=5");
    assert_eq!(status, 200);
    assert_eq!(reply["alert"]["marker"]["detection_id"], "7");
    assert!(reply["alert"]["distance_m"].as_f64().expect("distance") < 20.0);

    let (status, reply) = get(addr, "/proximity?lat=51.6&lng=-0.12&accuracy=5");
    assert_eq!(status, 200);
    assert_eq!(reply["alert"], Value::Null);

    let (status, _) = get(addr, "/proximity?lat=51.5");
    assert_eq!(status, 400);

    handle.stop().expect("stop api");
}
