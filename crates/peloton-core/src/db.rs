// SQLite persistence for cyclists, races, results, teams and leagues.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{
    ChipState, Cyclist, CyclistCategory, FantasyTeam, GcStanding, HistoryKind, Jerseys, League,
    LeagueMember, LeagueType, Race, RaceResult, RaceType, ResultStatus, Stage, StageResult,
    StageType, TeamCyclist, TeamRaceResult, Transfer,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cyclists (
        id            TEXT PRIMARY KEY,
        first_name    TEXT NOT NULL,
        last_name     TEXT NOT NULL,
        full_name     TEXT NOT NULL,
        pro_team_id   TEXT NOT NULL,
        pro_team_name TEXT NOT NULL,
        nationality   TEXT NOT NULL,
        category      TEXT NOT NULL,
        price         REAL NOT NULL,
        disabled      INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS races (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        race_type   TEXT NOT NULL,
        start_date  TEXT NOT NULL,
        end_date    TEXT,
        stages      INTEGER NOT NULL DEFAULT 1,
        country     TEXT NOT NULL DEFAULT '',
        season      INTEGER NOT NULL,
        is_finished INTEGER NOT NULL DEFAULT 0,
        finished_at TEXT
    );

    CREATE TABLE IF NOT EXISTS stages (
        race_id      TEXT NOT NULL REFERENCES races(id),
        stage_number INTEGER NOT NULL,
        stage_type   TEXT NOT NULL,
        name         TEXT NOT NULL DEFAULT '',
        date         TEXT,
        is_processed INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (race_id, stage_number)
    );

    CREATE TABLE IF NOT EXISTS race_results (
        race_id          TEXT NOT NULL,
        cyclist_id       TEXT NOT NULL,
        stage_number     INTEGER NOT NULL DEFAULT 0,
        position         INTEGER,
        status           TEXT NOT NULL,
        gc_leader        INTEGER NOT NULL DEFAULT 0,
        mountains_leader INTEGER NOT NULL DEFAULT 0,
        points_leader    INTEGER NOT NULL DEFAULT 0,
        young_leader     INTEGER NOT NULL DEFAULT 0,
        bonus_points     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (race_id, cyclist_id, stage_number)
    );

    CREATE TABLE IF NOT EXISTS stage_results (
        race_id          TEXT NOT NULL,
        stage_number     INTEGER NOT NULL,
        stage_type       TEXT NOT NULL,
        cyclist_id       TEXT NOT NULL,
        position         INTEGER,
        status           TEXT NOT NULL,
        gc_leader        INTEGER NOT NULL DEFAULT 0,
        mountains_leader INTEGER NOT NULL DEFAULT 0,
        points_leader    INTEGER NOT NULL DEFAULT 0,
        young_leader     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (race_id, stage_number, cyclist_id)
    );

    CREATE TABLE IF NOT EXISTS gc_standings (
        race_id     TEXT NOT NULL,
        cyclist_id  TEXT NOT NULL,
        gc_position INTEGER NOT NULL,
        PRIMARY KEY (race_id, cyclist_id)
    );

    CREATE TABLE IF NOT EXISTS fantasy_teams (
        id                  TEXT PRIMARY KEY,
        user_id             TEXT NOT NULL,
        team_name           TEXT NOT NULL,
        season              INTEGER NOT NULL,
        budget              REAL NOT NULL,
        total_points        INTEGER NOT NULL DEFAULT 0,
        free_transfers      INTEGER NOT NULL,
        transfers_made      INTEGER NOT NULL DEFAULT 0,
        gameweek            INTEGER NOT NULL DEFAULT 1,
        wildcard_used       INTEGER NOT NULL DEFAULT 0,
        wildcard_race       TEXT,
        triple_captain_used INTEGER NOT NULL DEFAULT 0,
        triple_captain_race TEXT,
        bench_boost_used    INTEGER NOT NULL DEFAULT 0,
        bench_boost_race    TEXT,
        is_bot              INTEGER NOT NULL DEFAULT 0,
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        UNIQUE (user_id, season)
    );

    CREATE TABLE IF NOT EXISTS team_cyclists (
        team_id        TEXT NOT NULL REFERENCES fantasy_teams(id),
        cyclist_id     TEXT NOT NULL REFERENCES cyclists(id),
        is_active      INTEGER NOT NULL DEFAULT 0,
        is_captain     INTEGER NOT NULL DEFAULT 0,
        purchase_price REAL NOT NULL,
        PRIMARY KEY (team_id, cyclist_id)
    );

    CREATE TABLE IF NOT EXISTS team_race_results (
        team_id               TEXT NOT NULL,
        race_id               TEXT NOT NULL,
        kind                  TEXT NOT NULL,
        stage_number          INTEGER NOT NULL DEFAULT 0,
        race_name             TEXT NOT NULL,
        points_earned         INTEGER NOT NULL,
        budget_earned         REAL NOT NULL DEFAULT 0,
        processed_at          TEXT NOT NULL,
        breakdown             TEXT NOT NULL,
        captain_name          TEXT,
        triple_captain_active INTEGER NOT NULL DEFAULT 0,
        bench_boost_active    INTEGER NOT NULL DEFAULT 0,
        season                INTEGER NOT NULL,
        PRIMARY KEY (team_id, race_id, kind, stage_number)
    );

    CREATE TABLE IF NOT EXISTS leagues (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        league_type TEXT NOT NULL,
        code        TEXT UNIQUE,
        owner_id    TEXT,
        season      INTEGER NOT NULL,
        created_at  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS league_members (
        league_id     TEXT NOT NULL REFERENCES leagues(id),
        user_id       TEXT NOT NULL,
        team_id       TEXT NOT NULL,
        team_name     TEXT NOT NULL,
        points        INTEGER NOT NULL DEFAULT 0,
        rank          INTEGER NOT NULL DEFAULT 0,
        previous_rank INTEGER NOT NULL DEFAULT 0,
        joined_at     TEXT NOT NULL,
        PRIMARY KEY (league_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS transfers (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id     TEXT NOT NULL,
        cyclist_in  TEXT,
        cyclist_out TEXT,
        price_in    REAL NOT NULL DEFAULT 0,
        price_out   REAL NOT NULL DEFAULT 0,
        gameweek    INTEGER NOT NULL,
        points_cost INTEGER NOT NULL DEFAULT 0,
        timestamp   TEXT NOT NULL,
        season      INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_team_race_results_race ON team_race_results(race_id);
    CREATE INDEX IF NOT EXISTS idx_league_members_user ON league_members(user_id);
";

const TEAM_COLUMNS: &str = "id, user_id, team_name, season, budget, total_points, free_transfers,
    transfers_made, gameweek, wildcard_used, wildcard_race, triple_captain_used,
    triple_captain_race, bench_boost_used, bench_boost_race, is_bot, created_at, updated_at";

const HISTORY_COLUMNS: &str = "team_id, race_id, kind, stage_number, race_name, points_earned,
    budget_earned, processed_at, breakdown, captain_name, triple_captain_active,
    bench_boost_active, season";

const MEMBER_COLUMNS: &str =
    "league_id, user_id, team_id, team_name, points, rank, previous_rank, joined_at";

/// Everything one scoring pass writes, committed atomically.
#[derive(Debug, Default)]
pub struct ScoringBatch {
    /// Full team rows after points, budget and chip changes.
    pub teams: Vec<FantasyTeam>,
    pub history: Vec<TeamRaceResult>,
    /// History rows of an earlier pass that this one supersedes. They are
    /// deleted in the same transaction; `teams` already carry the net change.
    pub replaces: Option<(String, HistoryKind)>,
    pub finished_race: Option<(String, DateTime<Utc>)>,
    pub processed_stage: Option<(String, u32)>,
}

/// Roster changes of a committed transfer session.
#[derive(Debug)]
pub struct TransferBatch<'a> {
    pub team: &'a FantasyTeam,
    pub removed: &'a [String],
    pub added: &'a [TeamCyclist],
    pub records: &'a [Transfer],
}

/// SQLite-backed store. The local database is the source of truth; remote
/// sync only mirrors it.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock still guards a consistent connection: every
    /// multi-statement write runs inside a transaction.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Cyclists
    // ------------------------------------------------------------------

    /// Insert or replace cyclists in one transaction. Returns the row count.
    pub fn upsert_cyclists(&self, cyclists: &[Cyclist]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin cyclist import")?;
        for c in cyclists {
            tx.execute(
                "INSERT OR REPLACE INTO cyclists
                    (id, first_name, last_name, full_name, pro_team_id, pro_team_name,
                     nationality, category, price, disabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    c.id,
                    c.first_name,
                    c.last_name,
                    c.full_name,
                    c.pro_team_id,
                    c.pro_team_name,
                    c.nationality,
                    c.category.display_str(),
                    c.price,
                    c.disabled,
                ],
            )
            .with_context(|| format!("failed to upsert cyclist {}", c.id))?;
        }
        tx.commit().context("failed to commit cyclist import")?;
        Ok(cyclists.len())
    }

    pub fn get_cyclist(&self, id: &str) -> Result<Option<Cyclist>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, first_name, last_name, full_name, pro_team_id, pro_team_name,
                    nationality, category, price, disabled
             FROM cyclists WHERE id = ?1",
            params![id],
            cyclist_from_row,
        )
        .optional()
        .context("failed to load cyclist")
    }

    pub fn cyclists(&self) -> Result<Vec<Cyclist>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, first_name, last_name, full_name, pro_team_id, pro_team_name,
                        nationality, category, price, disabled
                 FROM cyclists ORDER BY full_name",
            )
            .context("failed to prepare cyclists query")?;
        let rows = stmt
            .query_map([], cyclist_from_row)
            .context("failed to query cyclists")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map cyclist rows")?;
        Ok(rows)
    }

    /// All cyclists keyed by id.
    pub fn cyclist_map(&self) -> Result<HashMap<String, Cyclist>> {
        Ok(self
            .cyclists()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect())
    }

    // ------------------------------------------------------------------
    // Races and stages
    // ------------------------------------------------------------------

    pub fn upsert_race(&self, race: &Race) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO races
                (id, name, race_type, start_date, end_date, stages, country, season,
                 is_finished, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name       = excluded.name,
                race_type  = excluded.race_type,
                start_date = excluded.start_date,
                end_date   = excluded.end_date,
                stages     = excluded.stages,
                country    = excluded.country,
                season     = excluded.season",
            params![
                race.id,
                race.name,
                race.race_type.as_str(),
                date_to_sql(&race.start_date),
                race.end_date.as_ref().map(date_to_sql),
                race.stages,
                race.country,
                race.season,
                race.is_finished,
                race.finished_at.as_ref().map(ts_to_sql),
            ],
        )
        .context("failed to upsert race")?;
        Ok(())
    }

    pub fn get_race(&self, id: &str) -> Result<Option<Race>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, race_type, start_date, end_date, stages, country, season,
                    is_finished, finished_at
             FROM races WHERE id = ?1",
            params![id],
            race_from_row,
        )
        .optional()
        .context("failed to load race")
    }

    /// Races on the road on `day` (start <= day <= end).
    pub fn races_running_on(&self, day: NaiveDate) -> Result<Vec<Race>> {
        let conn = self.conn();
        let day = date_to_sql(&day);
        let mut stmt = conn
            .prepare(
                "SELECT id, name, race_type, start_date, end_date, stages, country, season,
                        is_finished, finished_at
                 FROM races
                 WHERE start_date <= ?1 AND COALESCE(end_date, start_date) >= ?1
                 ORDER BY start_date",
            )
            .context("failed to prepare running races query")?;
        let rows = stmt
            .query_map(params![day], race_from_row)
            .context("failed to query running races")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map race rows")?;
        Ok(rows)
    }

    pub fn mark_race_finished(&self, race_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE races SET is_finished = 1, finished_at = ?2 WHERE id = ?1",
            params![race_id, ts_to_sql(&at)],
        )
        .context("failed to mark race finished")?;
        Ok(())
    }

    pub fn upsert_stage(&self, stage: &Stage) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stages (race_id, stage_number, stage_type, name, date, is_processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(race_id, stage_number) DO UPDATE SET
                stage_type = excluded.stage_type,
                name       = excluded.name,
                date       = excluded.date",
            params![
                stage.race_id,
                stage.stage_number,
                stage.stage_type.as_str(),
                stage.name,
                stage.date.as_ref().map(date_to_sql),
                stage.is_processed,
            ],
        )
        .context("failed to upsert stage")?;
        Ok(())
    }

    pub fn get_stage(&self, race_id: &str, stage_number: u32) -> Result<Option<Stage>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT race_id, stage_number, stage_type, name, date, is_processed
             FROM stages WHERE race_id = ?1 AND stage_number = ?2",
            params![race_id, stage_number],
            |row| {
                Ok(Stage {
                    race_id: row.get(0)?,
                    stage_number: row.get(1)?,
                    stage_type: parse_col(row, 2, "stage type", StageType::from_str_type)?,
                    name: row.get(3)?,
                    date: opt_date_from_sql(row, 4)?,
                    is_processed: row.get(5)?,
                })
            },
        )
        .optional()
        .context("failed to load stage")
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Replace all whole-race results stored for `race_id`.
    pub fn save_race_results(&self, race_id: &str, results: &[RaceResult]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin result import")?;
        tx.execute("DELETE FROM race_results WHERE race_id = ?1", params![race_id])
            .context("failed to clear race results")?;
        for r in results {
            tx.execute(
                "INSERT OR REPLACE INTO race_results
                    (race_id, cyclist_id, stage_number, position, status, gc_leader,
                     mountains_leader, points_leader, young_leader, bonus_points)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    race_id,
                    r.cyclist_id,
                    r.stage_number.unwrap_or(0),
                    r.position,
                    r.status.code(),
                    r.jerseys.gc_leader,
                    r.jerseys.mountains_leader,
                    r.jerseys.points_leader,
                    r.jerseys.young_leader,
                    r.bonus_points,
                ],
            )
            .context("failed to insert race result")?;
        }
        tx.commit().context("failed to commit race results")?;
        Ok(())
    }

    pub fn race_results(&self, race_id: &str) -> Result<Vec<RaceResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT race_id, cyclist_id, stage_number, position, status, gc_leader,
                        mountains_leader, points_leader, young_leader, bonus_points
                 FROM race_results WHERE race_id = ?1
                 ORDER BY position IS NULL, position, cyclist_id",
            )
            .context("failed to prepare race results query")?;
        let rows = stmt
            .query_map(params![race_id], |row| {
                let stage_number: u32 = row.get(2)?;
                Ok(RaceResult {
                    race_id: row.get(0)?,
                    cyclist_id: row.get(1)?,
                    stage_number: (stage_number > 0).then_some(stage_number),
                    position: row.get(3)?,
                    status: parse_col(row, 4, "result status", ResultStatus::parse)?,
                    jerseys: jerseys_from_row(row, 5)?,
                    bonus_points: row.get(9)?,
                })
            })
            .context("failed to query race results")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map race result rows")?;
        Ok(rows)
    }

    /// Replace the results stored for one stage.
    pub fn save_stage_results(
        &self,
        race_id: &str,
        stage_number: u32,
        results: &[StageResult],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin stage result import")?;
        tx.execute(
            "DELETE FROM stage_results WHERE race_id = ?1 AND stage_number = ?2",
            params![race_id, stage_number],
        )
        .context("failed to clear stage results")?;
        for r in results {
            tx.execute(
                "INSERT OR REPLACE INTO stage_results
                    (race_id, stage_number, stage_type, cyclist_id, position, status,
                     gc_leader, mountains_leader, points_leader, young_leader)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    race_id,
                    stage_number,
                    r.stage_type.as_str(),
                    r.cyclist_id,
                    r.position,
                    r.status.code(),
                    r.jerseys.gc_leader,
                    r.jerseys.mountains_leader,
                    r.jerseys.points_leader,
                    r.jerseys.young_leader,
                ],
            )
            .context("failed to insert stage result")?;
        }
        tx.commit().context("failed to commit stage results")?;
        Ok(())
    }

    pub fn stage_results(&self, race_id: &str, stage_number: u32) -> Result<Vec<StageResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT race_id, stage_number, stage_type, cyclist_id, position, status,
                        gc_leader, mountains_leader, points_leader, young_leader
                 FROM stage_results WHERE race_id = ?1 AND stage_number = ?2
                 ORDER BY position IS NULL, position, cyclist_id",
            )
            .context("failed to prepare stage results query")?;
        let rows = stmt
            .query_map(params![race_id, stage_number], |row| {
                Ok(StageResult {
                    race_id: row.get(0)?,
                    stage_number: row.get(1)?,
                    stage_type: parse_col(row, 2, "stage type", StageType::from_str_type)?,
                    cyclist_id: row.get(3)?,
                    position: row.get(4)?,
                    status: parse_col(row, 5, "result status", ResultStatus::parse)?,
                    jerseys: jerseys_from_row(row, 6)?,
                })
            })
            .context("failed to query stage results")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map stage result rows")?;
        Ok(rows)
    }

    /// Replace the final GC standings of a race.
    pub fn save_gc_standings(&self, race_id: &str, standings: &[GcStanding]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin GC import")?;
        tx.execute("DELETE FROM gc_standings WHERE race_id = ?1", params![race_id])
            .context("failed to clear GC standings")?;
        for s in standings {
            tx.execute(
                "INSERT OR REPLACE INTO gc_standings (race_id, cyclist_id, gc_position)
                 VALUES (?1, ?2, ?3)",
                params![race_id, s.cyclist_id, s.gc_position],
            )
            .context("failed to insert GC standing")?;
        }
        tx.commit().context("failed to commit GC standings")?;
        Ok(())
    }

    pub fn gc_standings(&self, race_id: &str) -> Result<Vec<GcStanding>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT race_id, cyclist_id, gc_position FROM gc_standings
                 WHERE race_id = ?1 ORDER BY gc_position",
            )
            .context("failed to prepare GC query")?;
        let rows = stmt
            .query_map(params![race_id], |row| {
                Ok(GcStanding {
                    race_id: row.get(0)?,
                    cyclist_id: row.get(1)?,
                    gc_position: row.get(2)?,
                })
            })
            .context("failed to query GC standings")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map GC rows")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Teams and rosters
    // ------------------------------------------------------------------

    /// Insert or fully overwrite a team row.
    pub fn save_team(&self, team: &FantasyTeam) -> Result<()> {
        let conn = self.conn();
        write_team(&conn, team).context("failed to save team")?;
        Ok(())
    }

    pub fn get_team(&self, id: &str) -> Result<Option<FantasyTeam>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TEAM_COLUMNS} FROM fantasy_teams WHERE id = ?1"),
            params![id],
            team_from_row,
        )
        .optional()
        .context("failed to load team")
    }

    pub fn team_for_user(&self, user_id: &str, season: i32) -> Result<Option<FantasyTeam>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TEAM_COLUMNS} FROM fantasy_teams WHERE user_id = ?1 AND season = ?2"),
            params![user_id, season],
            team_from_row,
        )
        .optional()
        .context("failed to load team for user")
    }

    pub fn teams_for_season(&self, season: i32) -> Result<Vec<FantasyTeam>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TEAM_COLUMNS} FROM fantasy_teams WHERE season = ?1 ORDER BY id"
            ))
            .context("failed to prepare teams query")?;
        let rows = stmt
            .query_map(params![season], team_from_row)
            .context("failed to query teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team rows")?;
        Ok(rows)
    }

    pub fn team_cyclists(&self, team_id: &str) -> Result<Vec<TeamCyclist>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT team_id, cyclist_id, is_active, is_captain, purchase_price
                 FROM team_cyclists WHERE team_id = ?1 ORDER BY cyclist_id",
            )
            .context("failed to prepare roster query")?;
        let rows = stmt
            .query_map(params![team_id], team_cyclist_from_row)
            .context("failed to query roster")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map roster rows")?;
        Ok(rows)
    }

    /// Add a roster member and store the debited team in one transaction.
    pub fn buy_cyclist(&self, team: &FantasyTeam, member: &TeamCyclist) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin purchase")?;
        insert_team_cyclist(&tx, member).context("failed to insert roster member")?;
        write_team(&tx, team).context("failed to update team budget")?;
        tx.commit().context("failed to commit purchase")?;
        Ok(())
    }

    /// Remove a roster member and store the refunded team in one transaction.
    pub fn sell_cyclist(&self, team: &FantasyTeam, cyclist_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin sale")?;
        tx.execute(
            "DELETE FROM team_cyclists WHERE team_id = ?1 AND cyclist_id = ?2",
            params![team.id, cyclist_id],
        )
        .context("failed to delete roster member")?;
        write_team(&tx, team).context("failed to update team budget")?;
        tx.commit().context("failed to commit sale")?;
        Ok(())
    }

    /// Persist active/captain flags for every listed member.
    pub fn save_lineup(&self, members: &[TeamCyclist]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin lineup update")?;
        for m in members {
            tx.execute(
                "UPDATE team_cyclists SET is_active = ?3, is_captain = ?4
                 WHERE team_id = ?1 AND cyclist_id = ?2",
                params![m.team_id, m.cyclist_id, m.is_active, m.is_captain],
            )
            .context("failed to update lineup")?;
        }
        tx.commit().context("failed to commit lineup")?;
        Ok(())
    }

    pub fn commit_transfers(&self, batch: &TransferBatch<'_>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transfer commit")?;
        for cyclist_id in batch.removed {
            tx.execute(
                "DELETE FROM team_cyclists WHERE team_id = ?1 AND cyclist_id = ?2",
                params![batch.team.id, cyclist_id],
            )
            .context("failed to remove transferred-out cyclist")?;
        }
        for member in batch.added {
            insert_team_cyclist(&tx, member).context("failed to add transferred-in cyclist")?;
        }
        for t in batch.records {
            tx.execute(
                "INSERT INTO transfers
                    (team_id, cyclist_in, cyclist_out, price_in, price_out, gameweek,
                     points_cost, timestamp, season)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    t.team_id,
                    t.cyclist_in,
                    t.cyclist_out,
                    t.price_in,
                    t.price_out,
                    t.gameweek,
                    t.points_cost,
                    ts_to_sql(&t.timestamp),
                    t.season,
                ],
            )
            .context("failed to record transfer")?;
        }
        write_team(&tx, batch.team).context("failed to update team")?;
        tx.commit().context("failed to commit transfers")?;
        Ok(())
    }

    pub fn transfers_for_team(&self, team_id: &str) -> Result<Vec<Transfer>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT team_id, cyclist_in, cyclist_out, price_in, price_out, gameweek,
                        points_cost, timestamp, season
                 FROM transfers WHERE team_id = ?1 ORDER BY id",
            )
            .context("failed to prepare transfers query")?;
        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok(Transfer {
                    team_id: row.get(0)?,
                    cyclist_in: row.get(1)?,
                    cyclist_out: row.get(2)?,
                    price_in: row.get(3)?,
                    price_out: row.get(4)?,
                    gameweek: row.get(5)?,
                    points_cost: row.get(6)?,
                    timestamp: ts_from_sql(row, 7)?,
                    season: row.get(8)?,
                })
            })
            .context("failed to query transfers")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map transfer rows")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Scoring history
    // ------------------------------------------------------------------

    /// History rows of one kind for a race, all teams.
    pub fn race_history(&self, race_id: &str, kind: HistoryKind) -> Result<Vec<TeamRaceResult>> {
        let (kind_code, stage_number) = kind_to_sql(kind);
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM team_race_results
                 WHERE race_id = ?1 AND kind = ?2 AND stage_number = ?3
                 ORDER BY team_id"
            ))
            .context("failed to prepare history query")?;
        let rows = stmt
            .query_map(params![race_id, kind_code, stage_number], history_from_row)
            .context("failed to query history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map history rows")?;
        Ok(rows)
    }

    /// Every history row of one team, oldest first.
    pub fn team_history(&self, team_id: &str) -> Result<Vec<TeamRaceResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM team_race_results
                 WHERE team_id = ?1 ORDER BY processed_at, race_id, stage_number"
            ))
            .context("failed to prepare team history query")?;
        let rows = stmt
            .query_map(params![team_id], history_from_row)
            .context("failed to query team history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team history rows")?;
        Ok(rows)
    }

    /// Write the outcome of one scoring pass atomically.
    pub fn commit_scoring(&self, batch: &ScoringBatch) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin scoring commit")?;

        for team in &batch.teams {
            write_team(&tx, team).with_context(|| format!("failed to update team {}", team.id))?;
        }
        if let Some((race_id, kind)) = &batch.replaces {
            let (kind_code, stage_number) = kind_to_sql(*kind);
            tx.execute(
                "DELETE FROM team_race_results WHERE race_id = ?1 AND kind = ?2 AND stage_number = ?3",
                params![race_id, kind_code, stage_number],
            )
            .context("failed to delete superseded history rows")?;
        }
        for h in &batch.history {
            let (kind_code, stage_number) = kind_to_sql(h.kind);
            let breakdown =
                serde_json::to_string(&h.breakdown).context("failed to serialize breakdown")?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO team_race_results ({HISTORY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    h.team_id,
                    h.race_id,
                    kind_code,
                    stage_number,
                    h.race_name,
                    h.points_earned,
                    h.budget_earned,
                    ts_to_sql(&h.processed_at),
                    breakdown,
                    h.captain_name,
                    h.triple_captain_active,
                    h.bench_boost_active,
                    h.season,
                ],
            )
            .context("failed to insert history row")?;
        }
        if let Some((race_id, at)) = &batch.finished_race {
            tx.execute(
                "UPDATE races SET is_finished = 1, finished_at = ?2 WHERE id = ?1",
                params![race_id, ts_to_sql(at)],
            )
            .context("failed to mark race finished")?;
        }
        if let Some((race_id, stage_number)) = &batch.processed_stage {
            tx.execute(
                "UPDATE stages SET is_processed = 1 WHERE race_id = ?1 AND stage_number = ?2",
                params![race_id, stage_number],
            )
            .context("failed to mark stage processed")?;
        }

        tx.commit().context("failed to commit scoring")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leagues
    // ------------------------------------------------------------------

    /// Insert a league unless one with the same id exists.
    pub fn insert_league(&self, league: &League) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO leagues (id, name, league_type, code, owner_id, season, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                league.id,
                league.name,
                league.league_type.as_str(),
                league.code,
                league.owner_id,
                league.season,
                ts_to_sql(&league.created_at),
            ],
        )
        .context("failed to insert league")?;
        Ok(())
    }

    pub fn get_league(&self, id: &str) -> Result<Option<League>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, league_type, code, owner_id, season, created_at
             FROM leagues WHERE id = ?1",
            params![id],
            |row| {
                Ok(League {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    league_type: parse_col(row, 2, "league type", LeagueType::from_str_type)?,
                    code: row.get(3)?,
                    owner_id: row.get(4)?,
                    season: row.get(5)?,
                    created_at: ts_from_sql(row, 6)?,
                })
            },
        )
        .optional()
        .context("failed to load league")
    }

    /// The season's global league, created on first use.
    pub fn ensure_global_league(&self, season: i32) -> Result<League> {
        let id = League::global_id(season);
        if let Some(league) = self.get_league(&id)? {
            return Ok(league);
        }
        let league = League::global(season);
        self.insert_league(&league)?;
        Ok(league)
    }

    /// Add a member unless the user already belongs to the league.
    pub fn join_league(&self, member: &LeagueMember) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO league_members ({MEMBER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                member.league_id,
                member.user_id,
                member.team_id,
                member.team_name,
                member.points,
                member.rank,
                member.previous_rank,
                ts_to_sql(&member.joined_at),
            ],
        )
        .context("failed to join league")?;
        Ok(())
    }

    /// Members ordered by current rank (unranked last).
    pub fn league_members(&self, league_id: &str) -> Result<Vec<LeagueMember>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM league_members WHERE league_id = ?1
                 ORDER BY rank = 0, rank, points DESC, joined_at, team_id"
            ))
            .context("failed to prepare league members query")?;
        let rows = stmt
            .query_map(params![league_id], member_from_row)
            .context("failed to query league members")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map league member rows")?;
        Ok(rows)
    }

    /// Ids of every league the user belongs to.
    pub fn leagues_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT league_id FROM league_members WHERE user_id = ?1 ORDER BY league_id")
            .context("failed to prepare user leagues query")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("failed to query user leagues")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("failed to map user league rows")?;
        Ok(rows)
    }

    /// Store points and ranks for the given members.
    pub fn save_league_members(&self, members: &[LeagueMember]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin standings update")?;
        for m in members {
            tx.execute(
                "UPDATE league_members
                 SET team_name = ?3, points = ?4, rank = ?5, previous_rank = ?6
                 WHERE league_id = ?1 AND user_id = ?2",
                params![m.league_id, m.user_id, m.team_name, m.points, m.rank, m.previous_rank],
            )
            .context("failed to update league member")?;
        }
        tx.commit().context("failed to commit standings")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row writers
// ---------------------------------------------------------------------------

fn write_team(conn: &Connection, team: &FantasyTeam) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO fantasy_teams ({TEAM_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
                team_name           = excluded.team_name,
                budget              = excluded.budget,
                total_points        = excluded.total_points,
                free_transfers      = excluded.free_transfers,
                transfers_made      = excluded.transfers_made,
                gameweek            = excluded.gameweek,
                wildcard_used       = excluded.wildcard_used,
                wildcard_race       = excluded.wildcard_race,
                triple_captain_used = excluded.triple_captain_used,
                triple_captain_race = excluded.triple_captain_race,
                bench_boost_used    = excluded.bench_boost_used,
                bench_boost_race    = excluded.bench_boost_race,
                is_bot              = excluded.is_bot,
                updated_at          = excluded.updated_at"
        ),
        params![
            team.id,
            team.user_id,
            team.team_name,
            team.season,
            team.budget,
            team.total_points,
            team.free_transfers,
            team.transfers_made,
            team.gameweek,
            team.wildcard.used,
            team.wildcard.active_race,
            team.triple_captain.used,
            team.triple_captain.active_race,
            team.bench_boost.used,
            team.bench_boost.active_race,
            team.is_bot,
            ts_to_sql(&team.created_at),
            ts_to_sql(&team.updated_at),
        ],
    )
}

fn insert_team_cyclist(conn: &Connection, member: &TeamCyclist) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO team_cyclists (team_id, cyclist_id, is_active, is_captain, purchase_price)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            member.team_id,
            member.cyclist_id,
            member.is_active,
            member.is_captain,
            member.purchase_price,
        ],
    )
}

// ---------------------------------------------------------------------------
// Row readers
// ---------------------------------------------------------------------------

fn cyclist_from_row(row: &Row<'_>) -> rusqlite::Result<Cyclist> {
    Ok(Cyclist {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        full_name: row.get(3)?,
        pro_team_id: row.get(4)?,
        pro_team_name: row.get(5)?,
        nationality: row.get(6)?,
        category: parse_col(row, 7, "cyclist category", CyclistCategory::from_str_cat)?,
        price: row.get(8)?,
        disabled: row.get(9)?,
    })
}

fn race_from_row(row: &Row<'_>) -> rusqlite::Result<Race> {
    Ok(Race {
        id: row.get(0)?,
        name: row.get(1)?,
        race_type: parse_col(row, 2, "race type", RaceType::from_str_type)?,
        start_date: date_from_sql(row, 3)?,
        end_date: opt_date_from_sql(row, 4)?,
        stages: row.get(5)?,
        country: row.get(6)?,
        season: row.get(7)?,
        is_finished: row.get(8)?,
        finished_at: opt_ts_from_sql(row, 9)?,
    })
}

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<FantasyTeam> {
    Ok(FantasyTeam {
        id: row.get(0)?,
        user_id: row.get(1)?,
        team_name: row.get(2)?,
        season: row.get(3)?,
        budget: row.get(4)?,
        total_points: row.get(5)?,
        free_transfers: row.get(6)?,
        transfers_made: row.get(7)?,
        gameweek: row.get(8)?,
        wildcard: ChipState {
            used: row.get(9)?,
            active_race: row.get(10)?,
        },
        triple_captain: ChipState {
            used: row.get(11)?,
            active_race: row.get(12)?,
        },
        bench_boost: ChipState {
            used: row.get(13)?,
            active_race: row.get(14)?,
        },
        is_bot: row.get(15)?,
        created_at: ts_from_sql(row, 16)?,
        updated_at: ts_from_sql(row, 17)?,
    })
}

fn team_cyclist_from_row(row: &Row<'_>) -> rusqlite::Result<TeamCyclist> {
    Ok(TeamCyclist {
        team_id: row.get(0)?,
        cyclist_id: row.get(1)?,
        is_active: row.get(2)?,
        is_captain: row.get(3)?,
        purchase_price: row.get(4)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<TeamRaceResult> {
    let kind_code: String = row.get(2)?;
    let stage_number: u32 = row.get(3)?;
    let breakdown_json: String = row.get(8)?;
    Ok(TeamRaceResult {
        team_id: row.get(0)?,
        race_id: row.get(1)?,
        kind: kind_from_sql(&kind_code, stage_number)
            .ok_or_else(|| unknown(2, "history kind", &kind_code))?,
        race_name: row.get(4)?,
        points_earned: row.get(5)?,
        budget_earned: row.get(6)?,
        processed_at: ts_from_sql(row, 7)?,
        breakdown: serde_json::from_str(&breakdown_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        captain_name: row.get(9)?,
        triple_captain_active: row.get(10)?,
        bench_boost_active: row.get(11)?,
        season: row.get(12)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<LeagueMember> {
    Ok(LeagueMember {
        league_id: row.get(0)?,
        user_id: row.get(1)?,
        team_id: row.get(2)?,
        team_name: row.get(3)?,
        points: row.get(4)?,
        rank: row.get(5)?,
        previous_rank: row.get(6)?,
        joined_at: ts_from_sql(row, 7)?,
    })
}

fn jerseys_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Jerseys> {
    Ok(Jerseys {
        gc_leader: row.get(first)?,
        mountains_leader: row.get(first + 1)?,
        points_leader: row.get(first + 2)?,
        young_leader: row.get(first + 3)?,
    })
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("unrecognised {kind} value {value:?}")]
struct UnknownValue {
    kind: &'static str,
    value: String,
}

fn unknown(idx: usize, kind: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(UnknownValue {
            kind,
            value: value.to_string(),
        }),
    )
}

fn parse_col<T>(
    row: &Row<'_>,
    idx: usize,
    kind: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| unknown(idx, kind, &raw))
}

fn kind_to_sql(kind: HistoryKind) -> (&'static str, u32) {
    match kind {
        HistoryKind::Race => ("RACE", 0),
        HistoryKind::Stage(n) => ("STAGE", n),
        HistoryKind::FinalGc => ("FINAL_GC", 0),
    }
}

fn kind_from_sql(code: &str, stage_number: u32) -> Option<HistoryKind> {
    match code {
        "RACE" => Some(HistoryKind::Race),
        "STAGE" => Some(HistoryKind::Stage(stage_number)),
        "FINAL_GC" => Some(HistoryKind::FinalGc),
        _ => None,
    }
}

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => ts_from_sql(row, idx).map(Some),
    }
}

fn date_to_sql(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_date_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => date_from_sql(row, idx).map(Some),
    }
}
