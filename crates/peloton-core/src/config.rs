// Configuration loading and parsing (season.toml, app.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::CyclistCategory;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },

    #[error("config/{file} is missing and {} has no defaults/{file} to seed it from", .base.display())]
    NoDefault { file: &'static str, base: PathBuf },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub season: SeasonConfig,
    pub remote: RemoteConfig,
    pub credentials: CredentialsConfig,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// season.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct SeasonFile {
    season: SeasonSection,
    team: TeamRules,
    transfers: TransferRules,
    prizes: PrizePools,
}

#[derive(Debug, Clone, Deserialize)]
struct SeasonSection {
    year: i32,
    name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SeasonConfig {
    pub year: i32,
    pub name: String,
    pub team: TeamRules,
    pub transfers: TransferRules,
    pub prizes: PrizePools,
}

/// Roster construction rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeamRules {
    pub initial_budget: f64,
    pub team_size: usize,
    pub active_size: usize,
    pub max_from_same_pro_team: usize,
    pub categories: CategoryQuotas,
}

impl TeamRules {
    pub fn bench_size(&self) -> usize {
        self.team_size.saturating_sub(self.active_size)
    }
}

impl Default for TeamRules {
    fn default() -> Self {
        TeamRules {
            initial_budget: 100.0,
            team_size: 15,
            active_size: 8,
            max_from_same_pro_team: 3,
            categories: CategoryQuotas::default(),
        }
    }
}

/// Number of riders a full roster carries per category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryQuotas {
    pub gc: usize,
    pub climber: usize,
    pub sprinter: usize,
    pub time_trial: usize,
    pub puncher: usize,
    pub one_day: usize,
}

impl CategoryQuotas {
    pub fn quota(&self, category: CyclistCategory) -> usize {
        match category {
            CyclistCategory::Gc => self.gc,
            CyclistCategory::Climber => self.climber,
            CyclistCategory::Sprinter => self.sprinter,
            CyclistCategory::TimeTrial => self.time_trial,
            CyclistCategory::Puncher => self.puncher,
            CyclistCategory::OneDay => self.one_day,
        }
    }

    pub fn total(&self) -> usize {
        CyclistCategory::ALL.iter().map(|c| self.quota(*c)).sum()
    }
}

impl Default for CategoryQuotas {
    fn default() -> Self {
        CategoryQuotas {
            gc: 3,
            climber: 3,
            sprinter: 3,
            time_trial: 2,
            puncher: 2,
            one_day: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferRules {
    pub free_per_gameweek: u32,
    pub max_accumulated: u32,
    /// Points deducted per transfer beyond the free allowance.
    pub penalty_points: u32,
}

impl Default for TransferRules {
    fn default() -> Self {
        TransferRules {
            free_per_gameweek: 2,
            max_accumulated: 5,
            penalty_points: 4,
        }
    }
}

/// Prize money in millions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrizePools {
    pub one_day: f64,
    pub stage: f64,
    pub gc_final: f64,
}

impl Default for PrizePools {
    fn default() -> Self {
        PrizePools {
            one_day: 50.0,
            stage: 20.0,
            gc_final: 30.0,
        }
    }
}

// ---------------------------------------------------------------------------
// app.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct AppFile {
    database: DatabaseSection,
    remote: RemoteConfig,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingSection {
    dir: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection { dir: "logs".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub remote_api_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/season.toml`,
/// `config/app.toml`, and (optionally) `config/credentials.toml`,
/// all relative to the given `base_dir`.
///
/// Does not copy defaults. Prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- season.toml (required) ---
    let season_path = config_dir.join("season.toml");
    let season_file: SeasonFile = parse_file(&season_path)?;
    let season = SeasonConfig {
        year: season_file.season.year,
        name: season_file.season.name,
        team: season_file.team,
        transfers: season_file.transfers,
        prizes: season_file.prizes,
    };

    // --- app.toml (required) ---
    let app_path = config_dir.join("app.toml");
    let app_file: AppFile = parse_file(&app_path)?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        parse_file(&credentials_path)?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        season,
        remote: app_file.remote,
        credentials,
        db_path: resolve_db_path(&app_file.database.path),
        log_dir: PathBuf::from(app_file.logging.dir),
    };

    validate(&config)?;

    Ok(config)
}

/// Files `load_config_from` cannot do without. `credentials.toml` is optional
/// and only ships as `defaults/credentials.toml.example`.
const SEEDED_FILES: [&str; 2] = ["season.toml", "app.toml"];

/// Seed `config/` with the shipped season and app files that are missing.
/// Files already in `config/` are left alone. Returns the files written.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    let mut copied = Vec::new();
    for file in SEEDED_FILES {
        let target = config_dir.join(file);
        if target.exists() {
            continue;
        }
        let source = defaults_dir.join(file);
        if !source.is_file() {
            return Err(ConfigError::NoDefault {
                file,
                base: base_dir.to_path_buf(),
            });
        }
        std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", config_dir.display()),
        })?;
        if copy_if_absent(&source, &target)? {
            copied.push(target);
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = read_file(path)?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Never overwrites. Returns whether the file was written.
fn copy_if_absent(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
    {
        Ok(mut dest) => {
            let content = std::fs::read(source).map_err(|e| ConfigError::DefaultsCopyError {
                message: format!("failed to read {}: {e}", source.display()),
            })?;
            std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

/// An empty configured path falls back to the platform data directory.
fn resolve_db_path(configured: &str) -> PathBuf {
    if !configured.trim().is_empty() {
        return PathBuf::from(configured);
    }
    directories::ProjectDirs::from("", "", "peloton")
        .map(|dirs| dirs.data_dir().join("peloton.db"))
        .unwrap_or_else(|| PathBuf::from("peloton.db"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let season = &config.season;
    if season.year <= 0 {
        return Err(invalid("season.year", format!("must be > 0, got {}", season.year)));
    }

    // Team rules
    let team = &season.team;
    if !team.initial_budget.is_finite() || team.initial_budget <= 0.0 {
        return Err(invalid(
            "team.initial_budget",
            format!("must be > 0, got {}", team.initial_budget),
        ));
    }
    if team.team_size == 0 {
        return Err(invalid("team.team_size", "must be > 0"));
    }
    if team.active_size == 0 || team.active_size > team.team_size {
        return Err(invalid(
            "team.active_size",
            format!("must be between 1 and team_size ({}), got {}", team.team_size, team.active_size),
        ));
    }
    if team.max_from_same_pro_team == 0 {
        return Err(invalid("team.max_from_same_pro_team", "must be > 0"));
    }
    if team.categories.total() != team.team_size {
        return Err(invalid(
            "team.categories",
            format!(
                "quotas must sum to team_size ({}), got {}",
                team.team_size,
                team.categories.total()
            ),
        ));
    }

    // Transfer rules
    let transfers = &season.transfers;
    if transfers.max_accumulated < transfers.free_per_gameweek {
        return Err(invalid(
            "transfers.max_accumulated",
            format!(
                "must be >= free_per_gameweek ({}), got {}",
                transfers.free_per_gameweek, transfers.max_accumulated
            ),
        ));
    }

    // Prize pools
    let prizes = &season.prizes;
    let pool_fields: &[(&str, f64)] = &[
        ("prizes.one_day", prizes.one_day),
        ("prizes.stage", prizes.stage),
        ("prizes.gc_final", prizes.gc_final),
    ];
    for (name, val) in pool_fields {
        if !val.is_finite() || *val < 0.0 {
            return Err(invalid(name, format!("must be >= 0, got {val}")));
        }
    }

    // Remote
    if config.remote.enabled && config.remote.base_url.trim().is_empty() {
        return Err(invalid("remote.base_url", "required when remote.enabled = true"));
    }
    if config.remote.timeout_secs == 0 {
        return Err(invalid("remote.timeout_secs", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
