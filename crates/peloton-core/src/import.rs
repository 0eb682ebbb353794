// CSV loading for the cyclist catalog, race results, stage results and
// final GC standings.
//
// Malformed rows are logged and skipped; only an unreadable file fails the
// whole load.

use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::warn;

use crate::model::{
    Cyclist, CyclistCategory, GcStanding, Jerseys, RaceResult, ResultStatus, StageResult, StageType,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw CSV rows (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawCyclist {
    id: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    pro_team_id: String,
    #[serde(default, alias = "team")]
    pro_team_name: String,
    #[serde(default)]
    nationality: String,
    category: String,
    price: f64,
    #[serde(default)]
    disabled: String,
}

#[derive(Debug, Deserialize)]
struct RawRaceResult {
    cyclist_id: String,
    #[serde(default)]
    stage_number: Option<u32>,
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    gc_leader: String,
    #[serde(default)]
    mountains_leader: String,
    #[serde(default)]
    points_leader: String,
    #[serde(default)]
    young_leader: String,
    #[serde(default)]
    bonus_points: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawStageResult {
    cyclist_id: String,
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    gc_leader: String,
    #[serde(default)]
    mountains_leader: String,
    #[serde(default)]
    points_leader: String,
    #[serde(default)]
    young_leader: String,
}

#[derive(Debug, Deserialize)]
struct RawGcStanding {
    cyclist_id: String,
    #[serde(alias = "position")]
    gc_position: u32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Flags as written by hand: 1/0, true/false, yes/no, x.
fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "x"
    )
}

fn parse_jerseys(gc: &str, mountains: &str, points: &str, young: &str) -> Jerseys {
    Jerseys {
        gc_leader: parse_flag(gc),
        mountains_leader: parse_flag(mountains),
        points_leader: parse_flag(points),
        young_leader: parse_flag(young),
    }
}

fn parse_status(raw: &str, cyclist_id: &str) -> Option<ResultStatus> {
    let status = ResultStatus::parse(raw);
    if status.is_none() {
        warn!("skipping result for '{}': unknown status '{}'", cyclist_id, raw);
    }
    status
}

// ---------------------------------------------------------------------------
// Reader-based loaders (private)
// ---------------------------------------------------------------------------

fn load_cyclists_from_reader<R: Read>(rdr: R) -> Result<Vec<Cyclist>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut cyclists = Vec::new();
    for result in reader.deserialize::<RawCyclist>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed cyclist row: {}", e);
                continue;
            }
        };
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            warn!("skipping cyclist row without id");
            continue;
        }
        let Some(category) = CyclistCategory::from_str_cat(&raw.category) else {
            warn!("skipping cyclist '{}': unknown category '{}'", id, raw.category);
            continue;
        };
        if !raw.price.is_finite() || raw.price < 0.0 {
            warn!("skipping cyclist '{}': invalid price {}", id, raw.price);
            continue;
        }

        let first_name = raw.first_name.trim().to_string();
        let last_name = raw.last_name.trim().to_string();
        let full_name = match raw.full_name.trim() {
            "" => format!("{first_name} {last_name}").trim().to_string(),
            name => name.to_string(),
        };
        cyclists.push(Cyclist {
            id,
            first_name,
            last_name,
            full_name,
            pro_team_id: raw.pro_team_id.trim().to_string(),
            pro_team_name: raw.pro_team_name.trim().to_string(),
            nationality: raw.nationality.trim().to_uppercase(),
            category,
            price: raw.price,
            disabled: parse_flag(&raw.disabled),
        });
    }
    Ok(cyclists)
}

fn load_race_results_from_reader<R: Read>(
    rdr: R,
    race_id: &str,
) -> Result<Vec<RaceResult>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut results = Vec::new();
    for result in reader.deserialize::<RawRaceResult>() {
        match result {
            Ok(raw) => {
                let cyclist_id = raw.cyclist_id.trim().to_string();
                let Some(status) = parse_status(&raw.status, &cyclist_id) else {
                    continue;
                };
                results.push(RaceResult {
                    race_id: race_id.to_string(),
                    stage_number: raw.stage_number.filter(|n| *n > 0),
                    position: raw.position.filter(|p| *p > 0),
                    status,
                    jerseys: parse_jerseys(
                        &raw.gc_leader,
                        &raw.mountains_leader,
                        &raw.points_leader,
                        &raw.young_leader,
                    ),
                    bonus_points: raw.bonus_points.unwrap_or(0),
                    cyclist_id,
                });
            }
            Err(e) => {
                warn!("skipping malformed race result row: {}", e);
            }
        }
    }
    Ok(results)
}

fn load_stage_results_from_reader<R: Read>(
    rdr: R,
    race_id: &str,
    stage_number: u32,
    stage_type: StageType,
) -> Result<Vec<StageResult>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut results = Vec::new();
    for result in reader.deserialize::<RawStageResult>() {
        match result {
            Ok(raw) => {
                let cyclist_id = raw.cyclist_id.trim().to_string();
                let Some(status) = parse_status(&raw.status, &cyclist_id) else {
                    continue;
                };
                results.push(StageResult {
                    race_id: race_id.to_string(),
                    stage_number,
                    stage_type,
                    position: raw.position.filter(|p| *p > 0),
                    status,
                    jerseys: parse_jerseys(
                        &raw.gc_leader,
                        &raw.mountains_leader,
                        &raw.points_leader,
                        &raw.young_leader,
                    ),
                    cyclist_id,
                });
            }
            Err(e) => {
                warn!("skipping malformed stage result row: {}", e);
            }
        }
    }
    Ok(results)
}

fn load_gc_standings_from_reader<R: Read>(
    rdr: R,
    race_id: &str,
) -> Result<Vec<GcStanding>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut standings: Vec<GcStanding> = Vec::new();
    for result in reader.deserialize::<RawGcStanding>() {
        match result {
            Ok(raw) => {
                let cyclist_id = raw.cyclist_id.trim().to_string();
                if raw.gc_position == 0 {
                    warn!("skipping GC row for '{}': position must be positive", cyclist_id);
                    continue;
                }
                if let Some(existing) = standings.iter_mut().find(|s| s.cyclist_id == cyclist_id) {
                    warn!("duplicate GC entry for '{}', using latest value", cyclist_id);
                    existing.gc_position = raw.gc_position;
                    continue;
                }
                standings.push(GcStanding {
                    race_id: race_id.to_string(),
                    cyclist_id,
                    gc_position: raw.gc_position,
                });
            }
            Err(e) => {
                warn!("skipping malformed GC row: {}", e);
            }
        }
    }
    Ok(standings)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, ImportError> {
    std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> ImportError + '_ {
    move |e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    }
}

/// Load the cyclist catalog. A file with no valid rows is an error.
pub fn load_cyclists(path: &Path) -> Result<Vec<Cyclist>, ImportError> {
    let cyclists = load_cyclists_from_reader(open(path)?).map_err(csv_error(path))?;
    if cyclists.is_empty() {
        return Err(ImportError::Validation(format!(
            "{} produced zero valid cyclist rows",
            path.display()
        )));
    }
    Ok(cyclists)
}

pub fn load_race_results(path: &Path, race_id: &str) -> Result<Vec<RaceResult>, ImportError> {
    load_race_results_from_reader(open(path)?, race_id).map_err(csv_error(path))
}

pub fn load_stage_results(
    path: &Path,
    race_id: &str,
    stage_number: u32,
    stage_type: StageType,
) -> Result<Vec<StageResult>, ImportError> {
    load_stage_results_from_reader(open(path)?, race_id, stage_number, stage_type)
        .map_err(csv_error(path))
}

pub fn load_gc_standings(path: &Path, race_id: &str) -> Result<Vec<GcStanding>, ImportError> {
    load_gc_standings_from_reader(open(path)?, race_id).map_err(csv_error(path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
