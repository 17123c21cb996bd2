//! Poll loop: position feed → zone snapshot → violation tracker → stores.
//! Runs as a tokio task; each cycle completes before the next tick fires.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use zonewatch_core::analytics::HistoryRecord;
use zonewatch_core::tracker::ClosedViolation;
use zonewatch_core::{
    ContainmentResult, DeviceReading, NewViolation, Transition, ViolationTracker, Wind, Zone,
    ZoneSnapshot,
};
use zonewatch_sources::followmee::FollowMeeFeed;
use zonewatch_sources::infobip::InfobipSms;
use zonewatch_sources::store::Store;
use zonewatch_sources::weather::WeatherApiFeed;
use zonewatch_sources::{
    HistoryStore, NotificationSink, PositionFeed, SourceError, ViolationStore, WeatherFeed,
    ZoneStore,
};

use crate::alerts::{self, NotificationPolicy};
use crate::cli::DaemonOpts;
use crate::config::Config;
use crate::server;
use crate::status::{self, Observation, StatusReport};

const DEFAULT_SMS_SENDER: &str = "ZoneWatch";

/// External collaborators of the loop.
#[derive(Clone)]
pub struct Sources {
    pub positions: Arc<dyn PositionFeed>,
    /// `None` leaves every gas source zone-less.
    pub weather: Option<Arc<dyn WeatherFeed>>,
    pub violations: Arc<dyn ViolationStore>,
    pub zones: Arc<dyn ZoneStore>,
    pub history: Arc<dyn HistoryStore>,
    pub sms: Option<Arc<dyn NotificationSink>>,
}

pub struct PollContext {
    pub sources: Sources,
    pub policy: NotificationPolicy,
    /// Upper bound for every external call.
    pub call_timeout: Duration,
}

/// Shared daemon state protected by a mutex.
#[derive(Default)]
pub struct DaemonState {
    pub tracker: ViolationTracker,
    pub report: StatusReport,
    pub cycle: u64,
    /// Zones from the last successful zone-store read.
    pub zones: Vec<Zone>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub feed_ok: bool,
    pub devices: usize,
    pub entered: usize,
    pub exited: usize,
    pub stale: usize,
    pub failed_writes: usize,
}

pub async fn run_daemon(config: Config, opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let sources = build_sources(&config)?;
    let ctx = Arc::new(PollContext {
        sources: sources.clone(),
        policy: NotificationPolicy::from(&config.notifications),
        call_timeout: config.call_timeout(),
    });
    let state = Arc::new(Mutex::new(DaemonState::new()));

    restore_tracker(&ctx, &state).await;

    // Start UDS server
    let server_state = Arc::clone(&state);
    let server_socket = socket_path.to_string();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_state, sources).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start poll loop
    let cancel = CancellationToken::new();
    let period = opts
        .poll_interval_secs
        .map(|s| Duration::from_secs(s.max(1)))
        .unwrap_or_else(|| config.poll_interval());
    tracing::info!(
        interval_secs = period.as_secs(),
        database = %config.database_path,
        "poll loop starting"
    );
    let poll_state = Arc::clone(&state);
    let poll_cancel = cancel.clone();
    let mut poll_handle = tokio::spawn(async move {
        run_poll_loop(ctx, poll_state, period, poll_cancel).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    let poll_finished = tokio::select! {
        () = shutdown => false,
        _ = &mut poll_handle => {
            tracing::warn!("poll loop exited unexpectedly");
            true
        }
        _ = &mut server_handle => {
            tracing::warn!("server exited unexpectedly");
            false
        }
    };

    cancel.cancel();
    if !poll_finished {
        let _ = poll_handle.await;
    }
    server_handle.abort();

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Wire concrete collaborators from configuration.
pub fn build_sources(config: &Config) -> anyhow::Result<Sources> {
    let call_timeout = config.call_timeout();
    let store = Arc::new(Store::open(Path::new(&config.database_path))?);

    let feed = &config.position_feed;
    let (Some(username), Some(api_key)) = (feed.username.as_deref(), feed.api_key.as_deref())
    else {
        return Err(SourceError::NotConfigured(
            "position feed (FOLLOWMEE_USERNAME / FOLLOWMEE_API_KEY)",
        )
        .into());
    };
    let positions = Arc::new(FollowMeeFeed::new(
        feed.base_url.as_str(),
        username,
        api_key,
        call_timeout,
    )?);

    let weather: Option<Arc<dyn WeatherFeed>> = match config.weather.api_key.as_deref() {
        Some(key) => Some(Arc::new(WeatherApiFeed::new(
            config.weather.base_url.as_str(),
            key,
            call_timeout,
        )?)),
        None => {
            tracing::warn!("no weather API key configured; gas sources will have no zones");
            None
        }
    };

    let sms: Option<Arc<dyn NotificationSink>> =
        match (config.sms.base_url.as_deref(), config.sms.api_key.as_deref()) {
            (Some(base_url), Some(key)) => Some(Arc::new(InfobipSms::new(
                base_url,
                key,
                config.sms.sender.as_deref().unwrap_or(DEFAULT_SMS_SENDER),
                call_timeout,
            )?)),
            _ => {
                if config.notifications.enabled {
                    tracing::warn!("notifications enabled but SMS gateway not configured");
                }
                None
            }
        };

    Ok(Sources {
        positions,
        weather,
        violations: store.clone(),
        zones: store.clone(),
        history: store,
        sms,
    })
}

/// Rebuild tracker state from violations the store still has open.
///
/// Older open records of a device that has a newer one are closed in the
/// store at the time the newer stay began.
pub async fn restore_tracker(ctx: &PollContext, state: &Arc<Mutex<DaemonState>>) {
    let open = match call(ctx.call_timeout, ctx.sources.violations.list_open_violations()).await {
        Ok(open) => open,
        Err(e) => {
            tracing::warn!("could not load open violations, starting empty: {e}");
            return;
        }
    };

    let (tracker, superseded) = ViolationTracker::restore(open);
    tracing::info!(
        open = tracker.open_count(),
        superseded = superseded.len(),
        "restored open violations"
    );
    state.lock().await.tracker = tracker;

    for closed in &superseded {
        tracing::info!(
            device_id = %closed.device_id,
            zone = %closed.zone_name,
            entered_at = %closed.entered_at,
            "closing superseded open violation"
        );
    }
    let failed = join_all(superseded.iter().map(|c| close_one(ctx, c)))
        .await
        .into_iter()
        .filter(|ok| !ok)
        .count();
    if failed > 0 {
        tracing::warn!(failed, "superseded violations left open, will retry at next start");
    }
}

async fn run_poll_loop(
    ctx: Arc<PollContext>,
    state: Arc<Mutex<DaemonState>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("shutdown during a cycle, abandoning it");
                break;
            }
            _ = poll_cycle(&ctx, &state, Utc::now()) => {}
        }
    }
    tracing::debug!("poll loop stopped");
}

/// Bound an external call; a timeout is reported like any other failure.
async fn call<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, SourceError>>,
) -> anyhow::Result<T> {
    match timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow::anyhow!("timed out after {}ms", limit.as_millis())),
    }
}

/// One full cycle. External failures are logged and absorbed.
pub async fn poll_cycle(
    ctx: &PollContext,
    state: &Arc<Mutex<DaemonState>>,
    now: DateTime<Utc>,
) -> CycleStats {
    let cycle = {
        let mut st = state.lock().await;
        st.cycle += 1;
        st.cycle
    };

    // 1. Positions. Without them nothing is tracked this cycle.
    let readings = match call(ctx.call_timeout, ctx.sources.positions.fetch_positions()).await {
        Ok(readings) => readings,
        Err(e) => {
            tracing::warn!("position feed failed: {e}");
            let mut st = state.lock().await;
            st.report = st.report.feed_failed(cycle, now);
            return CycleStats::default();
        }
    };

    // 2. Zones, falling back to the last good list.
    let zones = match call(ctx.call_timeout, ctx.sources.zones.list_zones()).await {
        Ok(zones) => {
            state.lock().await.zones = zones.clone();
            zones
        }
        Err(e) => {
            tracing::warn!("zone store failed, using last known zones: {e}");
            state.lock().await.zones.clone()
        }
    };

    // 3. Wind per gas source, then one snapshot shared by every device.
    let winds = fetch_winds(ctx, &zones).await;
    let snapshot = ZoneSnapshot::resolve(&zones, &winds, now);
    tracing::debug!(
        cycle,
        devices = readings.len(),
        zones = zones.len(),
        active_gas = snapshot.active_gas_zones().count(),
        "evaluating"
    );

    let evaluated: Vec<(DeviceReading, ContainmentResult)> = readings
        .into_iter()
        .map(|reading| {
            let containment = snapshot.evaluate(reading.position.point());
            (reading, containment)
        })
        .collect();

    // 4. Tracker transitions, under one lock.
    let transitions: Vec<Transition> = {
        let mut st = state.lock().await;
        evaluated
            .iter()
            .map(|(r, c)| {
                st.tracker
                    .observe(&r.device_id, &r.device_name, &r.position, c, now)
            })
            .collect()
    };

    let mut stats = CycleStats {
        feed_ok: true,
        devices: evaluated.len(),
        entered: transitions.iter().filter(|t| t.is_new_entry()).count(),
        exited: transitions.iter().filter(|t| t.to_close().is_some()).count(),
        stale: transitions
            .iter()
            .filter(|t| matches!(t, Transition::Stale))
            .count(),
        failed_writes: 0,
    };

    // 5. Store writes. Closes and creates run concurrently.
    stats.failed_writes = persist(ctx, state, &transitions).await;

    // 6. SMS for fresh entries, detached from the cycle.
    if let Some(sink) = &ctx.sources.sms {
        for open in transitions
            .iter()
            .filter(|t| t.is_new_entry())
            .filter_map(Transition::to_create)
        {
            if let Some(message) = ctx.policy.alert_for(open) {
                alerts::dispatch(Arc::clone(sink), message, ctx.call_timeout);
            }
        }
    }

    // 7. History.
    let records: Vec<HistoryRecord> = evaluated.iter().map(|(r, _)| HistoryRecord::from(r)).collect();
    if !records.is_empty() {
        if let Err(e) = call(ctx.call_timeout, ctx.sources.history.append_history(records)).await {
            tracing::warn!("failed to append device history: {e}");
        }
    }

    // 8. Report.
    {
        let observed: Vec<Observation<'_>> = evaluated
            .iter()
            .zip(&transitions)
            .map(|((reading, containment), transition)| Observation {
                reading,
                containment,
                transition,
            })
            .collect();
        let mut st = state.lock().await;
        st.report = status::build_report(
            &st.report,
            cycle,
            now,
            &observed,
            &snapshot,
            &st.tracker,
            &ctx.policy,
        );
    }

    if stats.entered > 0 || stats.exited > 0 || stats.failed_writes > 0 {
        tracing::info!(
            cycle,
            devices = stats.devices,
            entered = stats.entered,
            exited = stats.exited,
            stale = stats.stale,
            failed_writes = stats.failed_writes,
            "cycle complete"
        );
    }
    stats
}

async fn fetch_winds(ctx: &PollContext, zones: &[Zone]) -> HashMap<String, Wind> {
    let Some(weather) = &ctx.sources.weather else {
        return HashMap::new();
    };

    let lookups = zones
        .iter()
        .filter_map(|zone| match zone {
            Zone::Gas(gas) => Some(gas),
            Zone::Machine(_) => None,
        })
        .map(|gas| async move {
            let wind = call(ctx.call_timeout, weather.fetch_wind(gas.position)).await;
            (gas, wind)
        });

    join_all(lookups)
        .await
        .into_iter()
        .filter_map(|(gas, wind)| match wind {
            Ok(wind) => Some((gas.id.clone(), wind)),
            Err(e) => {
                tracing::warn!(zone = %gas.name, "weather fetch failed, no gas zone this cycle: {e}");
                None
            }
        })
        .collect()
}

/// Apply the store side of this cycle's transitions. Returns the number of
/// failed writes.
async fn persist(
    ctx: &PollContext,
    state: &Arc<Mutex<DaemonState>>,
    transitions: &[Transition],
) -> usize {
    let to_close: Vec<&ClosedViolation> =
        transitions.iter().filter_map(Transition::to_close).collect();
    let to_create: Vec<&NewViolation> =
        transitions.iter().filter_map(Transition::to_create).collect();

    let (closed, created) = tokio::join!(
        join_all(to_close.iter().map(|c| close_one(ctx, c))),
        join_all(to_create.iter().map(|v| create_one(ctx, v))),
    );

    let mut failed = closed.iter().filter(|ok| !**ok).count();

    let mut st = state.lock().await;
    for (violation, id) in to_create.iter().zip(created) {
        match id {
            Some(id) => {
                if !st
                    .tracker
                    .confirm_created(&violation.device_id, &violation.zone_id, id)
                {
                    tracing::debug!(device_id = %violation.device_id, "stored violation superseded before confirm");
                }
            }
            None => failed += 1,
        }
    }
    failed
}

async fn close_one(ctx: &PollContext, closed: &ClosedViolation) -> bool {
    let id = match closed.violation_id.clone() {
        Some(id) => id,
        None => {
            tracing::info!(
                device_id = %closed.device_id,
                zone = %closed.zone_name,
                "violation ended before it was stored; storing the whole stay"
            );
            match create_one(ctx, &closed.to_new()).await {
                Some(id) => id,
                None => return false,
            }
        }
    };

    let result = call(
        ctx.call_timeout,
        ctx.sources
            .violations
            .close_violation(&id, closed.exited_at, closed.duration_seconds),
    )
    .await;
    match result {
        Ok(()) => {
            tracing::info!(
                device_id = %closed.device_id,
                zone = %closed.zone_name,
                level = %closed.level,
                duration_seconds = closed.duration_seconds,
                "violation closed"
            );
            true
        }
        Err(e) => {
            tracing::warn!(violation_id = %id, "failed to close violation: {e}");
            false
        }
    }
}

async fn create_one(ctx: &PollContext, violation: &NewViolation) -> Option<String> {
    let result = call(
        ctx.call_timeout,
        ctx.sources.violations.create_violation(violation.clone()),
    )
    .await;
    match result {
        Ok(id) => {
            tracing::info!(
                device_id = %violation.device_id,
                zone = %violation.zone_name,
                level = %violation.level,
                violation_id = %id,
                "violation opened"
            );
            Some(id)
        }
        Err(e) => {
            tracing::warn!(
                device_id = %violation.device_id,
                zone = %violation.zone_name,
                "failed to store violation: {e}"
            );
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
