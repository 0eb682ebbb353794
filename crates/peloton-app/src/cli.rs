// Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use peloton_core::model::{Chip, RaceType, StageType};

#[derive(Parser)]
#[command(name = "peloton")]
#[command(about = "Fantasy cycling scoring, teams and league standings")]
#[command(version)]
pub struct Cli {
    /// Date used for roster freezes and chip deadlines (defaults to today)
    #[arg(long, global = true)]
    pub today: Option<NaiveDate>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Cyclist catalog
    Cyclists {
        #[command(subcommand)]
        action: CyclistsCommand,
    },

    /// Races, results and race scoring
    Race {
        #[command(subcommand)]
        action: RaceCommand,
    },

    /// Stages of multi-stage races and the final GC bonus
    Stage {
        #[command(subcommand)]
        action: StageCommand,
    },

    /// Fantasy team management
    Team {
        #[command(subcommand)]
        action: TeamCommand,
    },

    /// Gameweek rollover
    Gameweek {
        #[command(subcommand)]
        action: GameweekCommand,
    },

    /// League standings
    League {
        #[command(subcommand)]
        action: LeagueCommand,
    },
}

#[derive(Subcommand)]
pub enum CyclistsCommand {
    /// Import or update cyclists from a CSV file
    Import { file: PathBuf },

    /// List the catalog
    List,
}

#[derive(Subcommand)]
pub enum RaceCommand {
    /// Add or update a race
    Add(RaceArgs),

    /// Import whole-race results from a CSV file
    Results { race_id: String, file: PathBuf },

    /// Award points for a race
    Process {
        race_id: String,
        /// Redo an already processed race, replacing its earlier points
        #[arg(long)]
        force: bool,
    },

    /// Per-cyclist points of one team in a race
    Breakdown {
        team_id: String,
        race_id: String,
        /// Print the breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview how a race's prize pool splits across the season's teams
    Prizes {
        race_id: String,
        /// Use the per-stage pool of a multi-stage race
        #[arg(long)]
        stage: bool,
    },
}

#[derive(Args)]
pub struct RaceArgs {
    pub id: String,
    pub name: String,
    #[arg(long = "type", value_parser = parse_race_type, default_value = "ONE_DAY")]
    pub race_type: RaceType,
    #[arg(long)]
    pub start: NaiveDate,
    #[arg(long)]
    pub end: Option<NaiveDate>,
    #[arg(long, default_value_t = 1)]
    pub stages: u32,
    #[arg(long, default_value = "")]
    pub country: String,
}

#[derive(Subcommand)]
pub enum StageCommand {
    /// Add or update a stage
    Add {
        race_id: String,
        stage_number: u32,
        #[arg(long = "type", value_parser = parse_stage_type)]
        stage_type: StageType,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Award points for a stage, optionally importing its results first
    Process {
        race_id: String,
        stage_number: u32,
        /// Stage results CSV; stored results are used when omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Stage type when the stage has not been added yet
        #[arg(long = "type", value_parser = parse_stage_type)]
        stage_type: Option<StageType>,
        #[arg(long)]
        force: bool,
    },

    /// Apply the final GC bonus and close the race
    FinalGc {
        race_id: String,
        /// GC standings CSV; stored standings are used when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TeamCommand {
    /// Create a team for a user in the configured season
    Create { user_id: String, name: String },

    /// Show a team with its roster, squad balance and scoring history
    Show { team_id: String },

    /// Buy a cyclist
    Add { team_id: String, cyclist_id: String },

    /// Sell a cyclist
    Remove { team_id: String, cyclist_id: String },

    /// Set the active lineup and captain
    Lineup {
        team_id: String,
        #[arg(long, value_delimiter = ',', required = true)]
        active: Vec<String>,
        #[arg(long)]
        captain: String,
    },

    /// Activate a chip for a race, or cancel it
    Chip {
        team_id: String,
        #[arg(value_parser = parse_chip)]
        chip: Chip,
        #[arg(long, required_unless_present = "cancel")]
        race: Option<String>,
        #[arg(long)]
        cancel: bool,
    },

    /// Sell and buy cyclists in one transfer session
    Transfer {
        team_id: String,
        #[arg(long = "out", value_delimiter = ',')]
        outs: Vec<String>,
        #[arg(long = "in", value_delimiter = ',')]
        ins: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum GameweekCommand {
    /// Move every team into the next gameweek
    Advance,
}

#[derive(Subcommand)]
pub enum LeagueCommand {
    /// Show standings (the season's global league by default)
    Standings { league_id: Option<String> },
}

fn parse_race_type(s: &str) -> Result<RaceType, String> {
    RaceType::from_str_type(s).ok_or_else(|| format!("unknown race type '{s}'"))
}

fn parse_stage_type(s: &str) -> Result<StageType, String> {
    StageType::from_str_type(s).ok_or_else(|| format!("unknown stage type '{s}'"))
}

fn parse_chip(s: &str) -> Result<Chip, String> {
    Chip::from_str_chip(s).ok_or_else(|| format!("unknown chip '{s}'"))
}
