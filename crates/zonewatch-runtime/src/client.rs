//! UDS JSON-RPC client for CLI subcommands.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use zonewatch_core::Violation;
use zonewatch_core::analytics::AnalyticsSummary;

use crate::status::StatusReport;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `zonewatch status`: latest cycle as a short table.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "get_status", serde_json::json!({})).await?;
    let report: StatusReport = serde_json::from_value(result)?;
    print!("{}", format_status(&report));
    Ok(())
}

pub async fn cmd_violations(
    socket_path: &str,
    level: Option<&str>,
    hours: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let params = serde_json::json!({ "level": level, "hours": hours });
    let result = rpc_call(socket_path, "list_violations", params).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let violations: Vec<Violation> = serde_json::from_value(result)?;
    print!("{}", format_violations(&violations));
    Ok(())
}

pub async fn cmd_summary(socket_path: &str, hours: Option<u32>, json: bool) -> anyhow::Result<()> {
    let params = serde_json::json!({ "hours": hours });
    let result = rpc_call(socket_path, "analytics_summary", params).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let summary: AnalyticsSummary = serde_json::from_value(result)?;
    print!("{}", format_summary(&summary, hours));
    Ok(())
}

// ─── Formatting ───────────────────────────────────────────────────

pub(crate) fn format_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let when = report
        .generated_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let feed = if report.feed_ok { "ok" } else { "DOWN (stale data)" };
    out.push_str(&format!(
        "cycle {} at {when}  feed: {feed}  open violations: {}",
        report.cycle, report.open_violations
    ));
    if report.unsynced_violations > 0 {
        out.push_str(&format!(" ({} not stored yet)", report.unsynced_violations));
    }
    out.push('\n');

    for status in &report.devices {
        let state = match &status.containment.violating_zone {
            Some(zone) if status.containment.in_danger => format!("DANGER  {}", zone.zone_name),
            Some(zone) => format!("ALERT   {}", zone.zone_name),
            None => "clear".to_string(),
        };
        let battery = status
            .battery_percent
            .map(|b| format!("{b:.0}%"))
            .unwrap_or_else(|| "-".to_string());
        let low = if report.low_battery.contains(&status.device.id) {
            " LOW"
        } else {
            ""
        };
        out.push_str(&format!(
            "  {:<20} {:>5}{low}  {state}\n",
            status.device.name, battery
        ));
    }

    for zone in &report.gas_zones {
        let line = match zone.wind {
            Some(wind) if zone.has_geometry() => format!(
                "  gas {:<16} wind {:.1} m/s toward {:.0}°\n",
                zone.zone_name, wind.speed_mps, wind.direction_deg
            ),
            _ => format!("  gas {:<16} no wind data, zone inactive\n", zone.zone_name),
        };
        out.push_str(&line);
    }
    out
}

pub(crate) fn format_violations(violations: &[Violation]) -> String {
    if violations.is_empty() {
        return "no violations\n".to_string();
    }
    violations
        .iter()
        .map(|v| {
            let duration = match v.duration_seconds {
                Some(secs) => format_duration(secs),
                None => "open".to_string(),
            };
            format!(
                "{}  {:<6} {:<20} {:<20} {}\n",
                v.entered_at.format("%Y-%m-%d %H:%M:%S"),
                v.level.as_str(),
                v.device_name,
                v.zone_name,
                duration
            )
        })
        .collect()
}

pub(crate) fn format_summary(summary: &AnalyticsSummary, hours: Option<u32>) -> String {
    let window = match hours {
        Some(h) => format!("last {h}h"),
        None => "all time".to_string(),
    };
    format!(
        "{window}\n  violations: {} (danger {}, alert {})\n  open now:   {}\n  devices:    {}\n  avg battery: {}%\n",
        summary.total_violations,
        summary.danger_violations,
        summary.alert_violations,
        summary.open_violations,
        summary.total_devices_tracked,
        summary.avg_battery_level
    )
}

fn format_duration(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
    }
}
