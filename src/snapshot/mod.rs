//! Initial roster snapshot from the REST collaborator

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::error::Result;
use crate::presence::PresenceRecord;
use crate::session::Session;

/// Supplies the subjects the roster starts from
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PresenceRecord>>;
}

/// Accepts both `[...]` and `{ "data": [...] }`. Entries are converted one
/// by one so a bad entry only drops itself.
#[derive(Deserialize)]
#[serde(untagged)]
enum RosterResponse {
    List(Vec<serde_json::Value>),
    Wrapped { data: Vec<serde_json::Value> },
}

impl RosterResponse {
    fn into_records(self) -> Vec<PresenceRecord> {
        let entries = match self {
            Self::List(entries) | Self::Wrapped { data: entries } => entries,
        };

        let total = entries.len();
        let records: Vec<PresenceRecord> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let record = PresenceRecord::from_value(entry);
                if record.is_none() {
                    tracing::warn!(index = index, "Skipping roster entry without a usable id");
                }
                record
            })
            .collect();

        if records.len() < total {
            tracing::warn!(
                kept = records.len(),
                skipped = total - records.len(),
                "Roster snapshot contained invalid entries"
            );
        }
        records
    }
}

/// `GET {base_url}{roster_path}` with the session's bearer token
pub struct HttpRosterSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpRosterSource {
    pub fn new(config: &ApiConfig, session: &Session) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.roster_url(),
            token: session.token().map(str::to_string),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RosterSource for HttpRosterSource {
    #[tracing::instrument(name = "snapshot.fetch", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<PresenceRecord>> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let records = response.json::<RosterResponse>().await?.into_records();

        tracing::debug!(count = records.len(), "Roster snapshot fetched");
        Ok(records)
    }
}

/// Fixed snapshot, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticRosterSource {
    records: Vec<PresenceRecord>,
}

impl StaticRosterSource {
    pub fn new(records: Vec<PresenceRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RosterSource for StaticRosterSource {
    async fn fetch(&self) -> Result<Vec<PresenceRecord>> {
        Ok(self.records.clone())
    }
}
