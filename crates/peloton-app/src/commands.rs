// Subcommand handlers. Each one runs against the opened database and prints a
// short report to stdout; details go to the log file.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use tracing::info;

use peloton_core::config::Config;
use peloton_core::db::Database;
use peloton_core::import;
use peloton_core::league::LeagueRankUpdater;
use peloton_core::manager::TeamManager;
use peloton_core::model::{CyclistBreakdown, HistoryKind, League, Race, Stage};
use peloton_core::roster::CompositionCheck;
use peloton_core::scoring::budget;
use peloton_core::remote::RemoteSync;
use peloton_core::{ProcessOutcome, TeamReconciler};

use crate::cli::{
    Cli, Command, CyclistsCommand, GameweekCommand, LeagueCommand, RaceArgs, RaceCommand,
    StageCommand, TeamCommand,
};

/// Everything a handler needs.
pub struct AppContext {
    pub config: Config,
    pub db: Arc<Database>,
    pub remote: Arc<dyn RemoteSync>,
}

impl AppContext {
    fn manager(&self) -> TeamManager<'_> {
        TeamManager::new(&self.db, &self.config.season)
    }

    fn reconciler(&self) -> TeamReconciler {
        TeamReconciler::new(
            Arc::clone(&self.db),
            self.config.season.clone(),
            Arc::clone(&self.remote),
        )
    }
}

pub async fn dispatch(cli: Cli, ctx: &AppContext) -> Result<()> {
    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());
    match cli.command {
        Command::Cyclists { action } => cyclists(action, ctx),
        Command::Race { action } => race(action, ctx).await,
        Command::Stage { action } => stage(action, ctx).await,
        Command::Team { action } => team(action, ctx, today),
        Command::Gameweek { action } => gameweek(action, ctx),
        Command::League { action } => league(action, ctx),
    }
}

// ---------------------------------------------------------------------------
// Cyclists
// ---------------------------------------------------------------------------

fn cyclists(action: CyclistsCommand, ctx: &AppContext) -> Result<()> {
    match action {
        CyclistsCommand::Import { file } => {
            let cyclists = import::load_cyclists(&file)?;
            let count = ctx.db.upsert_cyclists(&cyclists)?;
            info!(file = %file.display(), count, "cyclists imported");
            println!("Imported {count} cyclists from {}", file.display());
        }
        CyclistsCommand::List => {
            for c in ctx.db.cyclists()? {
                let flag = if c.disabled { " (unavailable)" } else { "" };
                println!(
                    "{:<20} {:<28} {:<8} {:<24} {:>6.1}M{flag}",
                    c.id,
                    c.full_name,
                    c.category.display_str(),
                    c.pro_team_name,
                    c.price
                );
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Races
// ---------------------------------------------------------------------------

async fn race(action: RaceCommand, ctx: &AppContext) -> Result<()> {
    match action {
        RaceCommand::Add(args) => add_race(args, ctx),
        RaceCommand::Results { race_id, file } => {
            require_race(ctx, &race_id)?;
            let results = import::load_race_results(&file, &race_id)?;
            ctx.db.save_race_results(&race_id, &results)?;
            println!("Stored {} results for {race_id}", results.len());
            Ok(())
        }
        RaceCommand::Process { race_id, force } => {
            let outcome = ctx.reconciler().process_race(&race_id, force).await?;
            report(&race_id, outcome);
            Ok(())
        }
        RaceCommand::Breakdown {
            team_id,
            race_id,
            json,
        } => {
            let breakdown = ctx.reconciler().team_points_breakdown(&team_id, &race_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&breakdown)?);
            } else {
                print_breakdown(&breakdown);
            }
            Ok(())
        }
        RaceCommand::Prizes { race_id, stage } => {
            let race = require_race(ctx, &race_id)?;
            let pools = &ctx.config.season.prizes;
            let pool = match (race.race_type.is_multi_stage(), stage) {
                (false, false) => pools.one_day,
                (true, true) => pools.stage,
                (true, false) => pools.gc_final,
                (false, true) => bail!("{race_id} is a one-day race"),
            };
            let teams = ctx.db.teams_for_season(race.season)?.len();
            println!("{} ({teams} teams, {pool:.1}M pool)", race.name);
            for (position, share) in budget::preview_distribution(teams, pool) {
                println!("  {position:>3}. {share:>7.2}M");
            }
            Ok(())
        }
    }
}

fn add_race(args: RaceArgs, ctx: &AppContext) -> Result<()> {
    if let Some(end) = args.end {
        if end < args.start {
            bail!("race {} ends before it starts", args.id);
        }
    }
    let race = Race {
        id: args.id,
        name: args.name,
        race_type: args.race_type,
        start_date: args.start,
        end_date: args.end,
        stages: args.stages.max(1),
        country: args.country,
        season: ctx.config.season.year,
        is_finished: false,
        finished_at: None,
    };
    ctx.db.upsert_race(&race)?;
    println!("Race {} ({}) saved", race.id, race.race_type.as_str());
    Ok(())
}

fn require_race(ctx: &AppContext, race_id: &str) -> Result<Race> {
    ctx.db
        .get_race(race_id)?
        .with_context(|| format!("race {race_id} not found"))
}

fn report(race_id: &str, outcome: ProcessOutcome) {
    match outcome {
        ProcessOutcome::AlreadyProcessed => {
            println!("{race_id} was already processed; use --force to redo it")
        }
        ProcessOutcome::NoResults => println!("{race_id}: no results, nothing awarded"),
        ProcessOutcome::Processed(summary) => {
            println!(
                "{race_id}: {} points to {} teams",
                summary.total_points(),
                summary.team_points.len()
            );
            for (team_id, points) in &summary.team_points {
                let earned = summary.earnings.get(team_id).copied().unwrap_or(0.0);
                println!("  {team_id:<24} {points:>6} pts  +{earned:.2}M");
            }
            if summary.replaced > 0 {
                println!("  ({} earlier rows replaced)", summary.replaced);
            }
            if summary.remote_failures > 0 {
                println!(
                    "  warning: {} remote writes failed, see the log",
                    summary.remote_failures
                );
            }
        }
    }
}

fn print_breakdown(breakdown: &[CyclistBreakdown]) {
    let mut total = 0;
    for b in breakdown {
        let captain = if b.is_captain { " (C)" } else { "" };
        let position = b.position.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "{:<28} {:>4} {:<4} {:>5} pts{captain}",
            b.cyclist_name, position, b.status, b.points
        );
        for line in &b.lines {
            println!("    {:<24} {:>5}", line.label, line.points);
        }
        total += b.points;
    }
    println!("Total: {total}");
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

async fn stage(action: StageCommand, ctx: &AppContext) -> Result<()> {
    match action {
        StageCommand::Add {
            race_id,
            stage_number,
            stage_type,
            name,
            date,
        } => {
            let race = require_race(ctx, &race_id)?;
            if !race.race_type.is_multi_stage() {
                bail!("{race_id} is a one-day race");
            }
            let name = if name.is_empty() {
                format!("{} stage {stage_number}", race.name)
            } else {
                name
            };
            ctx.db.upsert_stage(&Stage {
                race_id: race_id.clone(),
                stage_number,
                stage_type,
                name,
                date,
                is_processed: false,
            })?;
            println!("Stage {stage_number} of {race_id} saved ({stage_type})");
            Ok(())
        }
        StageCommand::Process {
            race_id,
            stage_number,
            file,
            stage_type,
            force,
        } => {
            let results = match file {
                Some(path) => {
                    let stage_type = match ctx.db.get_stage(&race_id, stage_number)? {
                        Some(stored) => stored.stage_type,
                        None => stage_type.with_context(|| {
                            format!("stage {stage_number} of {race_id} is unknown; pass --type")
                        })?,
                    };
                    import::load_stage_results(&path, &race_id, stage_number, stage_type)?
                }
                None => Vec::new(),
            };
            let outcome = ctx
                .reconciler()
                .process_stage(&race_id, stage_number, results, force)
                .await?;
            report(&format!("{race_id} stage {stage_number}"), outcome);
            Ok(())
        }
        StageCommand::FinalGc { race_id, file } => {
            let standings = match file {
                Some(path) => import::load_gc_standings(&path, &race_id)?,
                None => Vec::new(),
            };
            let outcome = ctx.reconciler().apply_final_gc_bonus(&race_id, standings).await?;
            report(&format!("{race_id} final GC"), outcome);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

fn team(action: TeamCommand, ctx: &AppContext, today: NaiveDate) -> Result<()> {
    let manager = ctx.manager();
    match action {
        TeamCommand::Create { user_id, name } => {
            let team = manager.create_team(&user_id, &name)?;
            println!("Created {} ({}) with {:.1}M", team.id, team.team_name, team.budget);
        }
        TeamCommand::Show { team_id } => show_team(ctx, &team_id)?,
        TeamCommand::Add { team_id, cyclist_id } => {
            let team = manager.add_cyclist(&team_id, &cyclist_id, today)?;
            println!("Bought {cyclist_id}; budget {:.1}M", team.budget);
        }
        TeamCommand::Remove { team_id, cyclist_id } => {
            let team = manager.remove_cyclist(&team_id, &cyclist_id, today)?;
            println!("Sold {cyclist_id}; budget {:.1}M", team.budget);
        }
        TeamCommand::Lineup {
            team_id,
            active,
            captain,
        } => {
            let members = manager.set_lineup(&team_id, &active, &captain, today)?;
            let active = members.iter().filter(|m| m.is_active).count();
            println!("Lineup saved: {active} active, captain {captain}");
        }
        TeamCommand::Chip {
            team_id,
            chip,
            race,
            cancel,
        } => {
            if cancel {
                manager.cancel_chip(&team_id, chip, today)?;
                println!("{chip} cancelled");
            } else {
                let race_id = race.context("--race is required to activate a chip")?;
                manager.activate_chip(&team_id, chip, &race_id, today)?;
                println!("{chip} active for {race_id}");
            }
        }
        TeamCommand::Transfer { team_id, outs, ins } => {
            let charge = manager.commit_transfers(&team_id, &outs, &ins, today)?;
            println!(
                "{} transfers ({} free, {} paid), penalty {} pts",
                charge.transfers, charge.free, charge.paid, charge.penalty
            );
        }
    }
    Ok(())
}

fn show_team(ctx: &AppContext, team_id: &str) -> Result<()> {
    let team = ctx
        .db
        .get_team(team_id)?
        .with_context(|| format!("team {team_id} not found"))?;
    println!(
        "{} ({}), season {}, gameweek {}",
        team.team_name, team.id, team.season, team.gameweek
    );
    println!(
        "  {} pts, budget {:.1}M, transfers {}/{}",
        team.total_points, team.budget, team.transfers_made, team.free_transfers
    );

    let cyclists = ctx.db.cyclist_map()?;
    for m in ctx.db.team_cyclists(team_id)? {
        let name = cyclists
            .get(&m.cyclist_id)
            .map_or(m.cyclist_id.as_str(), |c| c.full_name.as_str());
        let role = match (m.is_captain, m.is_active) {
            (true, _) => "C",
            (false, true) => "*",
            (false, false) => " ",
        };
        println!("  {role} {name:<28} {:>5.1}M", m.purchase_price);
    }

    let squad = ctx.manager().squad_status(team_id)?;
    match &squad.composition {
        CompositionCheck::Valid => println!("  squad complete ({}/{})", squad.size, squad.required),
        CompositionCheck::Invalid(deficits) => {
            println!("  squad {}/{}, missing:", squad.size, squad.required);
            for d in deficits {
                println!("    {:<10} {}/{}", d.category.display_str(), d.actual, d.required);
            }
        }
    }

    let history = ctx.db.team_history(team_id)?;
    if !history.is_empty() {
        println!("  history:");
    }
    for h in history {
        let pass = match h.kind {
            HistoryKind::Race => String::new(),
            HistoryKind::Stage(n) => format!(" stage {n}"),
            HistoryKind::FinalGc => " final GC".to_string(),
        };
        println!(
            "    {:<28} {:>6} pts  +{:.2}M",
            format!("{}{pass}", h.race_name),
            h.points_earned,
            h.budget_earned
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Gameweeks and leagues
// ---------------------------------------------------------------------------

fn gameweek(action: GameweekCommand, ctx: &AppContext) -> Result<()> {
    match action {
        GameweekCommand::Advance => {
            let teams = ctx.manager().advance_gameweek()?;
            println!("Advanced {teams} teams to the next gameweek");
        }
    }
    Ok(())
}

fn league(action: LeagueCommand, ctx: &AppContext) -> Result<()> {
    match action {
        LeagueCommand::Standings { league_id } => {
            let league_id = league_id.unwrap_or_else(|| League::global_id(ctx.config.season.year));
            let league = ctx
                .db
                .get_league(&league_id)?
                .with_context(|| format!("league {league_id} not found"))?;
            let members = LeagueRankUpdater::new(&ctx.db).recalculate(&league.id)?;
            println!("{} ({})", league.name, league.league_type.as_str());
            for m in members {
                let change = match m.rank_change() {
                    0 => "=".to_string(),
                    c if c > 0 => format!("+{c}"),
                    c => c.to_string(),
                };
                println!("{:>4}. {:<28} {:>6} pts  {change}", m.rank, m.team_name, m.points);
            }
        }
    }
    Ok(())
}
