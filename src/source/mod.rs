use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use ureq::Agent;

use crate::model::{Record, RecordIdentity};
use crate::offline::{CacheRequest, Network, OfflineCache, OfflineResponse};
use crate::storage::{keys, load_json, save_json, KeyValueStore};

mod worker;

pub use worker::{FetchReport, FetchWorker};

/// Why a load produced no records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

pub trait JobSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<Record>, FetchError>;
}

/// Blocking HTTP transport. Status codes are reported, never turned into errors.
#[derive(Clone)]
pub struct HttpTransport {
    agent: Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        let config = Agent::config_builder().http_status_as_error(false).build();
        Self {
            agent: config.into(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for HttpTransport {
    fn get(&self, request: &CacheRequest) -> Result<OfflineResponse, FetchError> {
        let mut builder = self.agent.get(&request.url).header("Cache-Control", "no-cache");
        if let Some(accept) = request.accept.as_deref() {
            builder = builder.header("Accept", accept);
        }
        let response = builder
            .call()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|err| FetchError::Network(format!("reading response body: {err}")))?;
        Ok(OfflineResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Reads the job list from the `/api/jobs` proxy.
pub struct HttpJobSource {
    url: String,
    transport: HttpTransport,
    cache: Option<Arc<OfflineCache>>,
}

impl HttpJobSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: HttpTransport::new(),
            cache: None,
        }
    }

    /// Routes requests through the offline layer, which passes API traffic straight through.
    pub fn with_cache(mut self, cache: Arc<OfflineCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl JobSource for HttpJobSource {
    fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let request = CacheRequest::get(self.url.as_str()).with_accept("application/json");
        let response = match &self.cache {
            Some(cache) => cache.respond(&request, &self.transport)?.response,
            None => self.transport.get(&request)?,
        };
        tracing::debug!(url = %self.url, status = response.status, bytes = response.body.len(), "jobs response");
        let records = parse_envelope(response.status, &response.body)?;
        Ok(dedupe_by_identity(records))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    data: Option<EnvelopeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(rename = "totalCount", default)]
    total_count: Option<serde_json::Value>,
}

/// Decodes `{ ok, data: { result, totalCount }, error }`.
///
/// The envelope decides success whatever the status code; a body that is
/// not JSON is an upstream failure.
pub fn parse_envelope(status: u16, body: &str) -> Result<Vec<Record>, FetchError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|_| {
        if (200..300).contains(&status) {
            FetchError::Upstream("response is not JSON".to_string())
        } else {
            FetchError::Upstream(format!("HTTP {status} with a non-JSON body"))
        }
    })?;
    if envelope.ok != Some(true) {
        let reason = envelope
            .error
            .filter(|error| !error.trim().is_empty())
            .unwrap_or_else(|| format!("request failed (HTTP {status})"));
        return Err(FetchError::Upstream(reason));
    }
    let Some(data) = envelope.data else {
        return Err(FetchError::Upstream("response has no data".to_string()));
    };
    let Some(serde_json::Value::Array(items)) = data.result else {
        return Err(FetchError::Upstream("data.result is not an array".to_string()));
    };
    if let Some(total) = data.total_count {
        tracing::debug!(%total, received = items.len(), "upstream total count");
    }
    items
        .into_iter()
        .map(serde_json::from_value::<Record>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| FetchError::Upstream(format!("malformed record: {err}")))
}

/// Keeps one record per identity: the last one seen, at the first one's position.
pub fn dedupe_by_identity(records: Vec<Record>) -> Vec<Record> {
    let before = records.len();
    let mut unique: IndexMap<RecordIdentity, Record> = IndexMap::with_capacity(before);
    for record in records {
        unique.insert(record.identity(), record);
    }
    if unique.len() != before {
        tracing::debug!(before, after = unique.len(), "dropped duplicate records");
    }
    unique.into_values().collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsSnapshot {
    /// Unix seconds.
    pub saved_at: i64,
    pub records: Vec<Record>,
}

pub fn save_snapshot(store: &dyn KeyValueStore, records: &[Record]) -> anyhow::Result<()> {
    let snapshot = RecordsSnapshot {
        saved_at: OffsetDateTime::now_utc().unix_timestamp(),
        records: records.to_vec(),
    };
    save_json(store, keys::RECORDS_SNAPSHOT, &snapshot).context("saving records snapshot")
}

pub fn load_snapshot(store: &dyn KeyValueStore) -> anyhow::Result<Option<RecordsSnapshot>> {
    load_json(store, keys::RECORDS_SNAPSHOT)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    Fresh,
    /// The fetch failed and the last good snapshot is shown instead.
    Snapshot { saved_at: i64, error: FetchError },
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub records: Vec<Record>,
    pub origin: LoadOrigin,
}

impl LoadOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self.origin, LoadOrigin::Snapshot { .. })
    }
}

/// Fetches and records a snapshot; on failure falls back to the previous snapshot.
pub fn load_with_fallback(
    source: &dyn JobSource,
    store: &dyn KeyValueStore,
    fallback: bool,
) -> Result<LoadOutcome, FetchError> {
    match source.fetch() {
        Ok(records) => {
            if let Err(err) = save_snapshot(store, &records) {
                tracing::warn!(?err, "could not store records snapshot");
            }
            tracing::info!(count = records.len(), "loaded job records");
            Ok(LoadOutcome {
                records,
                origin: LoadOrigin::Fresh,
            })
        }
        Err(error) => {
            tracing::error!(?error, "job fetch failed");
            if !fallback {
                return Err(error);
            }
            match load_snapshot(store) {
                Ok(Some(snapshot)) => {
                    tracing::info!(count = snapshot.records.len(), "serving last good snapshot");
                    Ok(LoadOutcome {
                        records: snapshot.records,
                        origin: LoadOrigin::Snapshot {
                            saved_at: snapshot.saved_at,
                            error,
                        },
                    })
                }
                Ok(None) => Err(error),
                Err(err) => {
                    tracing::warn!(?err, "records snapshot unreadable");
                    Err(error)
                }
            }
        }
    }
}

/// Serves the stored snapshot without touching the network.
pub struct SnapshotSource {
    store: crate::storage::SharedStore,
}

impl SnapshotSource {
    pub fn new(store: crate::storage::SharedStore) -> Self {
        Self { store }
    }
}

impl JobSource for SnapshotSource {
    fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        match load_snapshot(&*self.store) {
            Ok(Some(snapshot)) => Ok(snapshot.records),
            Ok(None) => Err(FetchError::Network("no offline snapshot stored yet".to_string())),
            Err(err) => Err(FetchError::Upstream(format!("{err:#}"))),
        }
    }
}
