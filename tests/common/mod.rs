//! Shared helpers for the integration tests: an in-process HTTP stub that
//! stands in for the Surfline API, canned payloads, and a config builder
//! rooted in a temp directory.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};

use surfline_bronze::config::Config;

// ---------------------------------------------------------------------------
// Canned responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Canned {
    pub fn json(status: u16, body: &Value) -> Self {
        Canned {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Canned {
            status,
            content_type: "text/html",
            body: body.to_string(),
        }
    }
}

/// `{"data": {"<entity>": [ ...hourly records... ]}}` starting at midnight
/// UTC of `start`.
pub fn hourly_payload(entity: &str, start: &str, hours: i64) -> Value {
    let date = NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap();
    let first = Utc
        .from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        .timestamp();
    let records: Vec<Value> = (0..hours)
        .map(|h| {
            json!({
                "timestamp": first + h * 3600,
                "utcOffset": -3,
                "speed": 10.0 + h as f64,
                "direction": 90 + h,
            })
        })
        .collect();
    json!({ "associated": { "units": { "windSpeed": "KTS" } }, "data": { entity: records } })
}

// ---------------------------------------------------------------------------
// HTTP stub
// ---------------------------------------------------------------------------

/// Serves one canned response per `start` query value; anything else gets
/// `fallback`. Every request line is recorded.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub fn start(routes: HashMap<String, Canned>, fallback: Canned) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                let seen = Arc::clone(&seen);
                let fallback = fallback.clone();
                thread::spawn(move || serve(stream, &routes, &fallback, &seen));
            }
        });

        StubServer {
            base_url: format!("http://127.0.0.1:{port}/"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn query_value<'a>(target: &'a str, key: &str) -> Option<&'a str> {
    let query = target.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn serve(stream: TcpStream, routes: &HashMap<String, Canned>, fallback: &Canned, seen: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut head = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        head.push(line.trim_end().to_string());
    }
    let Some(request_line) = head.first() else {
        return;
    };
    seen.lock().unwrap().push(head.join("\n"));

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let canned = query_value(target, "start")
        .and_then(|start| routes.get(start))
        .unwrap_or(fallback);

    let response = format!(
        "HTTP/1.1 {} STUB\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        canned.status,
        canned.content_type,
        canned.body.len(),
        canned.body
    );
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Config pointing at `base_url` with every directory under `root`, no
/// cooldown and no pause between entities. Configures `wind` and `tides`.
pub fn test_config(root: &Path, base_url: &str, capture_raw: bool, range: Option<(&str, &str)>) -> Config {
    test_config_for(root, base_url, capture_raw, range, &["wind", "tides"])
}

/// Same as `test_config`, with an explicit list of registry entities.
pub fn test_config_for(
    root: &Path,
    base_url: &str,
    capture_raw: bool,
    range: Option<(&str, &str)>,
    entities: &[&str],
) -> Config {
    let range = range
        .map(|(start, end)| format!("start_date = \"{start}\"\nend_date = \"{end}\"\n"))
        .unwrap_or_default();
    let entities: String = entities.iter().map(|e| format!("\n[entities.{e}]\n")).collect();
    let text = format!(
        r#"
[project]
output_dir = '{root}/bronze'
landing_dir = '{root}/landing'
raw_dir = '{root}/landing/surfline_raw'
capture_raw = {capture_raw}
workers = 2
entity_pause_secs = 0
{range}
[api]
base_url = "{base_url}"
spot_id = "5842041f4e65fad6a7708bf9"
access_token = "test-token"
timeout_secs = 5
cooldown_secs = 0
{entities}"#,
        root = root.display(),
    );
    Config::from_toml_str(&text).unwrap()
}
