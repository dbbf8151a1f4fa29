/// Surfline forecast API: single-window fetch.
///
/// One call = one GET for one entity and one window start. Whatever goes
/// wrong (transport, status, body, empty payload) comes back as a
/// `FetchResult::Failure`; this function never returns an error and never
/// panics on upstream data.
///
/// Endpoint shape:
///   GET {base_url}{entity}?spotId=..&days=16&intervalHours=1&start=YYYY-MM-DD&accesstoken=..

use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{EntitySpec, RequestParams};
use crate::flatten::{descend, flatten};
use crate::landing::{RawStore, write_sidecar};
use crate::model::{FailureKind, FetchResult, RawCapture};
use crate::table::Table;

pub const NO_RECORDS_MESSAGE: &str = "no records in response";

/// Fetch one window of `spec` and flatten it.
///
/// `raw` enables landing of the response body (JSON content types only,
/// captured before the status check so failed responses are audited too).
/// `cooldown` is slept after every request, successful or not.
pub fn fetch_window(
    client: &Client,
    spec: &EntitySpec,
    params: &RequestParams,
    raw: Option<&RawStore>,
    cooldown: Duration,
) -> FetchResult {
    let start_date = params.start().to_string();
    let started = Instant::now();
    let elapsed_ms = |since: Instant| since.elapsed().as_millis() as u64;

    let sent = client.get(&spec.url).query(params.pairs()).send();
    thread::sleep(cooldown);

    let response = match sent {
        Ok(response) => response,
        Err(e) => return transport_failure(start_date, &e, elapsed_ms(started)),
    };

    let status = response.status().as_u16();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let body = match response.bytes() {
        Ok(body) => body,
        Err(e) => return transport_failure(start_date, &e, elapsed_ms(started)),
    };
    let duration_ms = elapsed_ms(started);
    let parsed: Result<Value, serde_json::Error> = serde_json::from_slice(&body);

    let mut raw_capture = match raw {
        Some(store) if is_json => Some(capture(store, &spec.name, &start_date, &parsed, status, duration_ms)),
        _ => None,
    };

    if status != 200 {
        return FetchResult::Failure {
            start_date,
            error: format!("Status Code: {status}"),
            kind: FailureKind::HttpStatus,
            duration_ms: Some(duration_ms),
            raw: raw_capture,
        };
    }

    let payload = match parsed {
        Ok(payload) => payload,
        Err(e) => {
            return FetchResult::Failure {
                start_date,
                error: format!("JSON parse error: {e}"),
                kind: FailureKind::Parse,
                duration_ms: Some(duration_ms),
                raw: raw_capture,
            };
        }
    };

    let table = descend(&payload, &spec.json_path)
        .map(|records| flatten(records, &spec.flatten))
        .unwrap_or_else(Table::default);

    if let Some(RawCapture::Saved(meta)) = raw_capture.as_mut() {
        meta.records_estimated = Some(table.num_rows());
        if let Err(e) = write_sidecar(meta) {
            warn!(entity = %spec.name, start_date = %start_date, error = %e, "could not update raw metadata");
        }
    }

    if table.is_empty() {
        return FetchResult::Failure {
            start_date,
            error: NO_RECORDS_MESSAGE.to_string(),
            kind: FailureKind::NoRecords,
            duration_ms: Some(duration_ms),
            raw: raw_capture,
        };
    }

    debug!(
        entity = %spec.name,
        start_date = %start_date,
        rows = table.num_rows(),
        duration_ms,
        "window fetched"
    );
    FetchResult::Success {
        start_date,
        table,
        duration_ms,
        raw: raw_capture,
    }
}

fn capture(
    store: &RawStore,
    entity: &str,
    start_date: &str,
    parsed: &Result<Value, serde_json::Error>,
    status: u16,
    duration_ms: u64,
) -> RawCapture {
    let payload = match parsed {
        Ok(payload) => payload,
        Err(e) => return RawCapture::Error(format!("raw payload parse error: {e}")),
    };
    match store.save(entity, start_date, payload, status, duration_ms) {
        Ok(Some(meta)) => RawCapture::Saved(meta),
        Ok(None) => RawCapture::Skipped,
        Err(e) => {
            warn!(entity, start_date, error = %e, "raw capture failed");
            RawCapture::Error(e.to_string())
        }
    }
}

fn transport_failure(start_date: String, err: &reqwest::Error, duration_ms: u64) -> FetchResult {
    FetchResult::Failure {
        start_date,
        error: err.to_string(),
        kind: FailureKind::Transport,
        duration_ms: Some(duration_ms),
        raw: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityProfile;
    use crate::flatten::FlattenRules;
    use std::collections::BTreeMap;
    use std::net::TcpListener;

    fn spec_for(url: String) -> EntitySpec {
        EntitySpec {
            name: "wind".to_string(),
            url,
            json_path: vec!["data".to_string(), "wind".to_string()],
            flatten: FlattenRules::default(),
            params: BTreeMap::new(),
            profile: EntityProfile::default(),
        }
    }

    #[test]
    fn test_connection_refused_becomes_transport_failure() {
        // Bind then drop to get a port nobody is listening on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = crate::ingest::build_client(Duration::from_secs(2)).unwrap();
        let params = RequestParams::from_pairs([("start", "2024-01-01")]);

        let result = fetch_window(
            &client,
            &spec_for(format!("http://127.0.0.1:{port}/wind")),
            &params,
            None,
            Duration::ZERO,
        );

        match result {
            FetchResult::Failure { start_date, kind, duration_ms, raw, .. } => {
                assert_eq!(start_date, "2024-01-01");
                assert_eq!(kind, FailureKind::Transport);
                assert!(duration_ms.is_some(), "elapsed time is kept for faults");
                assert!(raw.is_none());
            }
            FetchResult::Success { .. } => panic!("nothing is listening, fetch cannot succeed"),
        }
    }
}
