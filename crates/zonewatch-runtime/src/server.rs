//! UDS JSON-RPC server: one newline-delimited request per connection.
//!
//! Methods: `get_status`, `list_violations`, `device_history`,
//! `analytics_summary`, `list_zones`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;

use zonewatch_core::ZoneLevel;
use zonewatch_core::analytics::{self, HistoryQuery, TimeRange, ViolationQuery};
use zonewatch_sources::ZoneStore;

use crate::poll_loop::{DaemonState, Sources};

pub async fn run_server(
    socket_path: &str,
    state: Arc<Mutex<DaemonState>>,
    sources: Sources,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        let sources = sources.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state, sources).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<DaemonState>>,
    sources: Sources,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let response = dispatch(&request, &state, &sources, Utc::now()).await;

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

/// Route one request to its handler and wrap the outcome as a response.
async fn dispatch(
    request: &Value,
    state: &Arc<Mutex<DaemonState>>,
    sources: &Sources,
    now: DateTime<Utc>,
) -> Value {
    let method = request["method"].as_str().unwrap_or("");
    let params = &request["params"];
    let id = request["id"].clone();

    let result = match method {
        "get_status" => {
            let st = state.lock().await;
            serde_json::to_value(&st.report).map_err(anyhow::Error::from)
        }
        "list_violations" => list_violations(params, sources, now).await,
        "device_history" => device_history(params, sources, now).await,
        "analytics_summary" => analytics_summary(params, state, sources, now).await,
        "list_zones" => list_zones(sources).await,
        _ => return error_response(id, -32601, "method not found"),
    };

    match result {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => {
            tracing::debug!(method, "request failed: {e}");
            error_response(id, -32000, &e.to_string())
        }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    })
}

/// `{"level": "danger"|"alert", "hours": N}`, both optional.
pub(crate) fn parse_violation_query(
    params: &Value,
    now: DateTime<Utc>,
) -> anyhow::Result<ViolationQuery> {
    let level = match params["level"].as_str() {
        Some(raw) => Some(raw.parse::<ZoneLevel>()?),
        None => None,
    };
    Ok(ViolationQuery {
        range: parse_range(params, now),
        level,
    })
}

pub(crate) fn parse_range(params: &Value, now: DateTime<Utc>) -> TimeRange {
    params["hours"]
        .as_u64()
        .map(|h| TimeRange::last_hours(u32::try_from(h).unwrap_or(u32::MAX), now))
        .unwrap_or_default()
}

async fn list_violations(
    params: &Value,
    sources: &Sources,
    now: DateTime<Utc>,
) -> anyhow::Result<Value> {
    let query = parse_violation_query(params, now)?;
    let violations = sources.violations.list_violations(query).await?;
    Ok(serde_json::to_value(violations)?)
}

/// `{"device_id": "...", "hours": N}`, both optional.
async fn device_history(
    params: &Value,
    sources: &Sources,
    now: DateTime<Utc>,
) -> anyhow::Result<Value> {
    let query = HistoryQuery {
        device_id: params["device_id"].as_str().map(str::to_string),
        range: parse_range(params, now),
    };
    let records = sources.history.list_history(query).await?;
    Ok(serde_json::to_value(records)?)
}

async fn list_zones(sources: &Sources) -> anyhow::Result<Value> {
    let zones = sources.zones.list_zones().await?;
    Ok(serde_json::to_value(zones)?)
}

async fn analytics_summary(
    params: &Value,
    state: &Arc<Mutex<DaemonState>>,
    sources: &Sources,
    now: DateTime<Utc>,
) -> anyhow::Result<Value> {
    let range = parse_range(params, now);
    let violations = sources
        .violations
        .list_violations(ViolationQuery { range, level: None })
        .await?;
    let history = sources
        .history
        .list_history(HistoryQuery {
            device_id: None,
            range,
        })
        .await?;

    let mut summary = analytics::summarize(&violations, &history);
    // Open count from live state, not the windowed query.
    summary.open_violations = state.lock().await.tracker.open_count();
    Ok(serde_json::to_value(summary)?)
}
