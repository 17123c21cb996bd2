//! `zonewatch zones list | add <file> | delete <id>` against the local database.
//!
//! Zone files are TOML. Coordinates are `[lat, lng]` pairs.
//!
//! ```toml
//! source = "machine"
//! name = "Crusher"
//! shape = "circle"
//! danger = { center = [32.21, -7.93], radius_m = 150 }
//! alert = { center = [32.21, -7.93], radius_m = 400 }
//! ```
//!
//! ```toml
//! source = "gas"
//! name = "Ammonia tank"
//! position = [32.2, -7.9]
//! ```

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;

use zonewatch_core::{GasSource, Geometry, LatLng, MachineZone, Zone, ZoneShape};
use zonewatch_sources::store::Store;

#[derive(Debug, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
enum ZoneFile {
    Machine {
        name: String,
        shape: ZoneShape,
        danger: Option<AreaFile>,
        alert: Option<AreaFile>,
    },
    Gas {
        name: String,
        position: [f64; 2],
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AreaFile {
    ring: Option<Vec<[f64; 2]>>,
    center: Option<[f64; 2]>,
    radius_m: Option<f64>,
}

fn point([lat, lng]: [f64; 2]) -> anyhow::Result<LatLng> {
    Ok(LatLng::new(lat, lng).validate()?)
}

impl AreaFile {
    fn into_geometry(self, shape: ZoneShape) -> anyhow::Result<Geometry> {
        match shape {
            ZoneShape::Polygon => {
                let ring = self.ring.context("polygon area needs `ring`")?;
                let ring = ring.into_iter().map(point).collect::<anyhow::Result<Vec<_>>>()?;
                Ok(Geometry::polygon(ring)?)
            }
            ZoneShape::Circle => {
                let center = self.center.context("circle area needs `center`")?;
                let radius = self.radius_m.context("circle area needs `radius_m`")?;
                Ok(Geometry::circle(point(center)?, radius)?)
            }
        }
    }
}

/// Parse and validate a zone file. The id is assigned by the store.
pub(crate) fn parse_zone_file(content: &str) -> anyhow::Result<Zone> {
    let file: ZoneFile = toml::from_str(content)?;
    match file {
        ZoneFile::Machine {
            name,
            shape,
            danger,
            alert,
        } => {
            if danger.is_none() && alert.is_none() {
                anyhow::bail!("machine zone {name:?} has neither danger nor alert area");
            }
            let danger = danger.map(|a| a.into_geometry(shape)).transpose()?;
            let alert = alert.map(|a| a.into_geometry(shape)).transpose()?;
            Ok(Zone::Machine(MachineZone::new(
                String::new(),
                name,
                shape,
                danger,
                alert,
            )?))
        }
        ZoneFile::Gas { name, position } => Ok(Zone::Gas(GasSource {
            id: String::new(),
            name,
            position: point(position)?,
        })),
    }
}

fn describe_area(geometry: Option<&Geometry>) -> String {
    match geometry {
        Some(Geometry::Circle { radius_m, .. }) => format!("{radius_m:.0}m"),
        Some(Geometry::Polygon { ring }) => format!("{} pts", ring.len()),
        None => "-".to_string(),
    }
}

pub(crate) fn format_zone(zone: &Zone) -> String {
    let detail = match zone {
        Zone::Machine(m) => format!(
            "{} danger {} / alert {}",
            m.shape.as_str(),
            describe_area(m.danger.as_ref()),
            describe_area(m.alert.as_ref())
        ),
        Zone::Gas(g) => format!("source at {}", g.position),
    };
    format!(
        "{:<6} {:<8} {:<24} {detail}",
        zone.id(),
        zone.source().as_str(),
        zone.name()
    )
}

pub fn cmd_list(database: &Path) -> anyhow::Result<()> {
    let store = Store::open(database)?;
    let zones = store.zones()?;
    if zones.is_empty() {
        println!("no zones");
    }
    for zone in &zones {
        println!("{}", format_zone(zone));
    }
    Ok(())
}

pub fn cmd_add(database: &Path, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let zone =
        parse_zone_file(&content).with_context(|| format!("invalid zone file {}", file.display()))?;
    let store = Store::open(database)?;
    let id = store.insert_zone(&zone, Utc::now())?;
    println!("added {} zone {:?} with id {id}", zone.source(), zone.name());
    Ok(())
}

pub fn cmd_delete(database: &Path, id: &str) -> anyhow::Result<()> {
    let store = Store::open(database)?;
    if !store.remove_zone(id)? {
        anyhow::bail!("no zone with id {id}");
    }
    println!("deleted zone {id}");
    Ok(())
}
