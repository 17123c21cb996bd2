use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use zonewatch_core::{Position, Transition, ViolationTracker, Wind, Zone, ZoneLevel, ZoneSnapshot};

#[derive(Debug, Deserialize)]
struct Scenario {
    name: String,
    #[allow(dead_code)]
    description: String,
    zones: Vec<Zone>,
    winds: HashMap<String, Wind>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    at: DateTime<Utc>,
    readings: Vec<StepReading>,
    expect: Vec<Expect>,
}

/// A reading; its timestamp defaults to the step time.
#[derive(Debug, Deserialize)]
struct StepReading {
    device_id: String,
    device_name: String,
    lat: f64,
    lng: f64,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Expect {
    device_id: String,
    transition: String,
    #[serde(default)]
    level: Option<ZoneLevel>,
    #[serde(default)]
    zone_id: Option<String>,
    #[serde(default)]
    open_zone: Option<String>,
    #[serde(default)]
    closed_duration_seconds: Option<i64>,
}

fn scenarios_dir() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../fixtures/scenarios")
}

fn load_scenarios() -> Vec<Scenario> {
    let dir = scenarios_dir();
    assert!(dir.is_dir(), "scenario directory missing: {}", dir.display());
    let mut scenarios = Vec::new();
    for entry in fs::read_dir(&dir).expect("read scenarios dir") {
        let path = entry.expect("dir entry").path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let content = fs::read_to_string(&path).unwrap_or_else(|e| {
                panic!("failed to read scenario {:?}: {}", path, e);
            });
            let scenario: Scenario = serde_json::from_str(&content).unwrap_or_else(|e| {
                panic!("failed to parse scenario {:?}: {}", path, e);
            });
            scenarios.push(scenario);
        }
    }
    assert!(!scenarios.is_empty(), "no scenarios in {}", dir.display());
    scenarios.sort_by(|a, b| a.name.cmp(&b.name));
    scenarios
}

fn transition_name(t: &Transition) -> &'static str {
    match t {
        Transition::Unchanged => "unchanged",
        Transition::Stale => "stale",
        Transition::Entered { .. } => "entered",
        Transition::Exited { .. } => "exited",
        Transition::Moved { .. } => "moved",
        Transition::RetryCreate { .. } => "retry_create",
    }
}

/// Run one scenario against a store that always succeeds; returns failures.
fn replay(scenario: &Scenario) -> Vec<String> {
    let mut tracker = ViolationTracker::new();
    let mut failures = Vec::new();
    let mut next_id = 0;

    for (i, step) in scenario.steps.iter().enumerate() {
        let snapshot = ZoneSnapshot::resolve(&scenario.zones, &scenario.winds, step.at);
        let mut observed = HashMap::new();

        for r in &step.readings {
            let position = Position::new(r.lat, r.lng, r.timestamp.unwrap_or(step.at));
            let result = snapshot.evaluate(position.point());
            assert!(
                !(result.in_danger && result.in_alert),
                "{} step {i}: danger and alert both set",
                scenario.name
            );
            let transition =
                tracker.observe(&r.device_id, &r.device_name, &position, &result, step.at);
            if let Some(open) = transition.to_create() {
                next_id += 1;
                tracker.confirm_created(&r.device_id, &open.zone_id, format!("v{next_id}"));
            }
            observed.insert(r.device_id.as_str(), (result, transition));
        }

        for exp in &step.expect {
            let mut fail = |msg: String| {
                failures.push(format!(
                    "scenario '{}' step {i} device {}: {msg}",
                    scenario.name, exp.device_id
                ));
            };
            let Some((result, transition)) = observed.get(exp.device_id.as_str()) else {
                fail("no reading".into());
                continue;
            };

            if transition_name(transition) != exp.transition {
                fail(format!(
                    "expected {} got {}",
                    exp.transition,
                    transition_name(transition)
                ));
            }
            if *transition != Transition::Stale {
                let level = result.violating_zone.as_ref().map(|z| z.level);
                let zone = result.violating_zone.as_ref().map(|z| z.zone_id.as_str());
                if level != exp.level {
                    fail(format!("expected level {:?} got {:?}", exp.level, level));
                }
                if zone != exp.zone_id.as_deref() {
                    fail(format!("expected zone {:?} got {:?}", exp.zone_id, zone));
                }
            }
            let open = tracker
                .open_violation(&exp.device_id)
                .map(|o| o.zone_id.as_str());
            if open != exp.open_zone.as_deref() {
                fail(format!("expected open {:?} got {:?}", exp.open_zone, open));
            }
            if let Some(expected) = exp.closed_duration_seconds {
                let got = transition.to_close().map(|c| c.duration_seconds);
                if got != Some(expected) {
                    fail(format!("expected closed duration {expected} got {got:?}"));
                }
            }
        }

        assert_eq!(
            tracker.unsynced_count(),
            0,
            "{} step {i}: store always acknowledges",
            scenario.name
        );
    }

    failures
}

#[test]
fn test_all_scenarios() {
    let scenarios = load_scenarios();

    let mut failures = Vec::new();
    for scenario in &scenarios {
        failures.extend(replay(scenario));
    }

    for f in &failures {
        eprintln!("FAIL: {f}");
    }
    assert!(failures.is_empty(), "{} replay failures", failures.len());
}

#[test]
fn each_entry_is_created_once_and_closed_once() {
    for scenario in load_scenarios() {
        let mut tracker = ViolationTracker::new();
        let mut created = 0usize;
        let mut closed = 0usize;
        for step in &scenario.steps {
            let snapshot = ZoneSnapshot::resolve(&scenario.zones, &scenario.winds, step.at);
            for r in &step.readings {
                let position = Position::new(r.lat, r.lng, r.timestamp.unwrap_or(step.at));
                let result = snapshot.evaluate(position.point());
                let t = tracker.observe(&r.device_id, &r.device_name, &position, &result, step.at);
                if let Some(open) = t.to_create() {
                    created += 1;
                    tracker.confirm_created(&r.device_id, &open.zone_id, format!("v{created}"));
                }
                closed += usize::from(t.to_close().is_some());
            }
        }
        // Every created violation is either closed or still open.
        assert_eq!(
            created,
            closed + tracker.open_count(),
            "scenario {}",
            scenario.name
        );
    }
}
