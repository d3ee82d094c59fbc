//! Elasticsearch-compatible HTTP document store
//!
//! Maps the [`DocumentStore`] capabilities onto the REST API:
//!
//! | capability         | request                                          |
//! |--------------------|--------------------------------------------------|
//! | container exists   | `HEAD /{index}`                                  |
//! | create container   | `PUT /{index}`                                   |
//! | create if absent   | `PUT /{index}/_doc/{id}?op_type=create`          |
//! | delete by id       | `DELETE /{index}/_doc/{id}`                      |
//! | query records      | `POST /{index}/_search`, paged by `search_after` |
//! | create record      | `POST /{index}/_doc?refresh=true`                |
//!
//! Migration records are stored wrapped by type name (`{"migration": {...}}`) so
//! lock documents and records can share one index.
//!
//! Migration request steps are sent to `base url + step path` as written: the
//! path may carry percent-escapes (e.g. date math `/%3Clogs-%7Bnow%2Fd%7D%3E`) and
//! an inline query string.

use crate::migration::record::RecordDocument;
use crate::migration::{MigrationRecord, RequestStep};
use crate::store::{DocumentStore, RecordFilter, StoreError};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use ureq::{Agent, Response};
use url::Url;

/// Records fetched per history search request
const HISTORY_PAGE_SIZE: usize = 1_000;

/// Document store backed by an Elasticsearch-compatible HTTP API
pub struct ElasticsearchStore {
    agent: Agent,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    total: Option<SearchTotal>,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchTotal {
    value: u64,
    #[serde(default)]
    relation: Option<String>,
}

/// One page of a history search
#[derive(Debug)]
pub(crate) struct SearchPage {
    pub records: Vec<MigrationRecord>,
    /// Exact number of matching records, when the response reports it
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: RecordDocument,
}

impl ElasticsearchStore {
    /// Create a store client for `base_url` using `agent` for transport
    ///
    /// Credentials, if any, travel as URL userinfo and are sent as basic auth.
    pub fn new(base_url: Url, agent: Agent) -> Self {
        Self { agent, base_url }
    }

    /// Base URL with credentials stripped, for display
    pub fn display_url(&self) -> String {
        let mut url = self.base_url.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.to_string()
    }

    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
        params: &[(&str, &str)],
    ) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                StoreError::Other(format!("Base url [{}] cannot carry a path", self.display_url()))
            })?;
            path.pop_if_empty().extend(segments);
        }
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// URL of a migration step: the step path appended verbatim to the base path
    fn step_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, StoreError> {
        let mut base = self.base_url.clone();
        base.set_query(None);
        base.set_fragment(None);

        let raw = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&raw).map_err(|e| StoreError::Other(format!("Invalid request path [{path}]: {e}")))?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn send(&self, method: &str, url: &Url, body: Option<(&str, &str)>) -> Result<Response, StoreError> {
        debug!("sending request [{} {}]", method, url.path());

        let request = self.agent.request_url(method, url);
        let result = match body {
            Some((content_type, payload)) => request.set("Content-Type", content_type).send_string(payload),
            None => request.call(),
        };

        match result {
            Ok(response) => {
                debug!("received response [{} {}] status {}", method, url.path(), response.status());
                Ok(response)
            }
            Err(ureq::Error::Status(status, response)) => Err(StoreError::Status {
                status,
                method: method.to_string(),
                path: url.path().to_string(),
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(transport)) => Err(StoreError::Transport(transport.to_string())),
        }
    }

    fn send_json(&self, method: &str, url: &Url, body: &Value) -> Result<Response, StoreError> {
        let payload = serde_json::to_string(body)?;
        self.send(method, url, Some(("application/json", &payload)))
    }
}

/// Search request for one page of the records matched by `filter`, oldest first
///
/// `search_after` is the order of the last record of the previous page.
pub(crate) fn search_body(filter: &RecordFilter, page_size: usize, search_after: Option<usize>) -> Value {
    let mut terms = vec![json!({ "term": { "migration.migrationKey": filter.migration_key } })];
    if let Some(filename) = &filter.filename {
        terms.push(json!({ "term": { "migration.filename": filename } }));
    }

    let mut body = json!({
        "size": page_size,
        "track_total_hits": true,
        "sort": [ { "migration.order": { "order": "asc" } } ],
        "query": { "bool": { "filter": terms } }
    });
    if let Some(order) = search_after {
        body["search_after"] = json!([order]);
    }
    body
}

/// Extract one page of migration records from a search response body
pub(crate) fn parse_search_response(body: &str) -> Result<SearchPage, StoreError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let total = response
        .hits
        .total
        .filter(|total| total.relation.as_deref().map_or(true, |relation| relation == "eq"))
        .map(|total| total.value);
    let mut records: Vec<MigrationRecord> = response
        .hits
        .hits
        .into_iter()
        .map(|hit| hit.source.migration)
        .collect();
    records.sort_by_key(|record| record.order);
    Ok(SearchPage { records, total })
}

/// Page through the history matched by `filter`
///
/// `search` sends one search body and returns the raw response. Fails if the
/// store reports more matches than the pages delivered.
pub(crate) fn read_history(
    filter: &RecordFilter,
    page_size: usize,
    mut search: impl FnMut(&Value) -> Result<String, StoreError>,
) -> Result<Vec<MigrationRecord>, StoreError> {
    let mut records: Vec<MigrationRecord> = Vec::new();
    let mut expected = None;

    loop {
        let search_after = records.last().map(|record| record.order);
        let page = parse_search_response(&search(&search_body(filter, page_size, search_after))?)?;
        expected = expected.or(page.total);

        let fetched = page.records.len();
        records.extend(page.records);
        if fetched < page_size {
            break;
        }
    }

    match expected {
        Some(total) if total > records.len() as u64 => Err(StoreError::Other(format!(
            "history search for [{}] returned {} of {} records",
            filter.migration_key,
            records.len(),
            total
        ))),
        _ => Ok(records),
    }
}

impl DocumentStore for ElasticsearchStore {
    fn container_exists(&self, name: &str) -> Result<bool, StoreError> {
        let url = self.endpoint([name], &[])?;
        match self.send("HEAD", &url, None) {
            Ok(response) => Ok(response.status() == 200),
            Err(StoreError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_container(&self, name: &str, schema: &Value) -> Result<(), StoreError> {
        let url = self.endpoint([name], &[])?;
        match self.send_json("PUT", &url, schema) {
            Ok(_) => Ok(()),
            Err(StoreError::Status { status: 400, body, .. }) if body.contains("resource_already_exists_exception") => {
                Err(StoreError::Conflict { id: name.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    fn create_if_absent(&self, container: &str, id: &str, document: &Value) -> Result<(), StoreError> {
        let url = self.endpoint([container, "_doc", id], &[("op_type", "create")])?;
        match self.send_json("PUT", &url, document) {
            Ok(_) => Ok(()),
            Err(StoreError::Status { status: 409, .. }) => Err(StoreError::Conflict { id: id.to_string() }),
            Err(e) => Err(e),
        }
    }

    fn delete_by_id(&self, container: &str, id: &str) -> Result<(), StoreError> {
        let url = self.endpoint([container, "_doc", id], &[])?;
        match self.send("DELETE", &url, None) {
            Ok(_) => Ok(()),
            Err(StoreError::Status { status: 404, .. }) => {
                debug!("document [{}] in [{}] already absent", id, container);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn query_records(&self, container: &str, filter: &RecordFilter) -> Result<Vec<MigrationRecord>, StoreError> {
        let url = self.endpoint([container, "_search"], &[])?;
        read_history(filter, HISTORY_PAGE_SIZE, |body| {
            self.send_json("POST", &url, body)?
                .into_string()
                .map_err(|e| StoreError::Transport(format!("failed to read search response: {e}")))
        })
    }

    fn create_record(&self, container: &str, record: &MigrationRecord) -> Result<(), StoreError> {
        let url = self.endpoint([container, "_doc"], &[("refresh", "true")])?;
        let document = serde_json::to_value(RecordDocument::from(record.clone()))?;
        self.send_json("POST", &url, &document)?;
        Ok(())
    }

    fn perform(&self, step: &RequestStep) -> Result<(), StoreError> {
        let params: Vec<(&str, &str)> = step
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let url = self.step_url(&step.path, &params)?;
        let method = step.method.to_ascii_uppercase();

        let body = match (step.body_text(), step.content_type.as_deref()) {
            (Some(body), Some(content_type)) => Some((content_type, body)),
            (Some(body), None) => Some(("application/json", body)),
            (None, _) => None,
        };

        self.send(&method, &url, body)?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        debug!("closing store client for [{}]", self.display_url());
        Ok(())
    }
}
