// Best-effort mirror of team totals, race history and standings to a remote
// document store.
//
// The local database is authoritative. Callers log remote failures and carry
// on; nothing here is retried.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::model::{FantasyTeam, HistoryKind, LeagueMember, TeamRaceResult};

/// Remote document store seam.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn push_team(&self, team: &FantasyTeam) -> Result<()>;

    async fn push_team_result(&self, result: &TeamRaceResult) -> Result<()>;

    async fn push_league_members(&self, league_id: &str, members: &[LeagueMember]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HttpRemote
// ---------------------------------------------------------------------------

/// JSON-over-HTTP adapter. Documents are PUT to `{base_url}/{collection}/{id}`.
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.base_url)
    }

    async fn put_document<T: Serialize + Sync + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        body: &T,
    ) -> Result<()> {
        let url = self.document_url(collection, id);
        let mut request = self.http.put(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("PUT {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("PUT {url} rejected"))?;
        debug!(%url, "remote document written");
        Ok(())
    }
}

fn history_doc_id(result: &TeamRaceResult) -> String {
    match result.kind {
        HistoryKind::Race => format!("{}_{}", result.team_id, result.race_id),
        HistoryKind::Stage(n) => format!("{}_{}_stage{n}", result.team_id, result.race_id),
        HistoryKind::FinalGc => format!("{}_{}_gc", result.team_id, result.race_id),
    }
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn push_team(&self, team: &FantasyTeam) -> Result<()> {
        self.put_document("fantasy_teams", &team.id, team).await
    }

    async fn push_team_result(&self, result: &TeamRaceResult) -> Result<()> {
        self.put_document("team_race_results", &history_doc_id(result), result)
            .await
    }

    async fn push_league_members(&self, league_id: &str, members: &[LeagueMember]) -> Result<()> {
        self.put_document("league_standings", league_id, members).await
    }
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// Remote sync that may or may not be configured.
pub enum RemoteClient {
    /// A remote store is configured.
    Active(HttpRemote),
    /// Remote sync is off; every push succeeds without doing anything.
    Disabled,
}

impl RemoteClient {
    /// `Active` when remote sync is enabled with a base URL, else `Disabled`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let remote = &config.remote;
        if !remote.enabled || remote.base_url.trim().is_empty() {
            return Ok(RemoteClient::Disabled);
        }
        let client = HttpRemote::new(
            &remote.base_url,
            config.credentials.remote_api_token.clone(),
            Duration::from_secs(remote.timeout_secs),
        )?;
        Ok(RemoteClient::Active(client))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RemoteClient::Active(_))
    }
}

#[async_trait]
impl RemoteSync for RemoteClient {
    async fn push_team(&self, team: &FantasyTeam) -> Result<()> {
        match self {
            RemoteClient::Active(client) => client.push_team(team).await,
            RemoteClient::Disabled => Ok(()),
        }
    }

    async fn push_team_result(&self, result: &TeamRaceResult) -> Result<()> {
        match self {
            RemoteClient::Active(client) => client.push_team_result(result).await,
            RemoteClient::Disabled => Ok(()),
        }
    }

    async fn push_league_members(&self, league_id: &str, members: &[LeagueMember]) -> Result<()> {
        match self {
            RemoteClient::Active(client) => client.push_league_members(league_id, members).await,
            RemoteClient::Disabled => Ok(()),
        }
    }
}
