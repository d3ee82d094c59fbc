//! In-memory document store
//!
//! Implements the full [`DocumentStore`] contract inside one process: atomic
//! create-if-absent, read-after-write queries, and a log of performed request
//! steps. Request failures can be injected per path to exercise partial runs.

use crate::migration::{MigrationRecord, RequestStep};
use crate::store::{DocumentStore, RecordFilter, StoreError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct MemoryState {
    containers: HashMap<String, Value>,
    documents: HashMap<(String, String), Value>,
    records: Vec<(String, MigrationRecord)>,
    performed: Vec<RequestStep>,
    failing_paths: HashSet<String>,
    unavailable: bool,
}

/// Thread-safe in-memory [`DocumentStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future request step whose path equals `path` fail
    pub fn fail_requests_to(&self, path: impl Into<String>) {
        self.state.lock().failing_paths.insert(path.into());
    }

    /// Remove all injected request failures
    pub fn clear_failures(&self) {
        self.state.lock().failing_paths.clear();
    }

    /// Simulate an unreachable store: every call fails with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Request steps performed so far, in execution order
    pub fn performed(&self) -> Vec<RequestStep> {
        self.state.lock().performed.clone()
    }

    /// Whether a document with `id` exists in `container`
    pub fn contains_document(&self, container: &str, id: &str) -> bool {
        self.state
            .lock()
            .documents
            .contains_key(&(container.to_string(), id.to_string()))
    }

    /// Fetch a stored document
    pub fn document(&self, container: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .documents
            .get(&(container.to_string(), id.to_string()))
            .cloned()
    }

    /// Schema a container was created with
    pub fn container_schema(&self, name: &str) -> Option<Value> {
        self.state.lock().containers.get(name).cloned()
    }

    fn check_available(state: &MemoryState) -> Result<(), StoreError> {
        if state.unavailable {
            return Err(StoreError::Transport("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn container_exists(&self, name: &str) -> Result<bool, StoreError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        Ok(state.containers.contains_key(name))
    }

    fn create_container(&self, name: &str, schema: &Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if state.containers.contains_key(name) {
            return Err(StoreError::Conflict { id: name.to_string() });
        }
        state.containers.insert(name.to_string(), schema.clone());
        Ok(())
    }

    fn create_if_absent(&self, container: &str, id: &str, document: &Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        let key = (container.to_string(), id.to_string());
        if state.documents.contains_key(&key) {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        state.documents.insert(key, document.clone());
        Ok(())
    }

    fn delete_by_id(&self, container: &str, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.documents.remove(&(container.to_string(), id.to_string()));
        Ok(())
    }

    fn query_records(&self, container: &str, filter: &RecordFilter) -> Result<Vec<MigrationRecord>, StoreError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        if !state.containers.contains_key(container) {
            return Err(StoreError::Status {
                status: 404,
                method: "POST".to_string(),
                path: format!("{container}/_search"),
                body: "index_not_found_exception".to_string(),
            });
        }
        let mut records: Vec<MigrationRecord> = state
            .records
            .iter()
            .filter(|(name, record)| name == container && filter.matches(record))
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by_key(|record| record.order);
        Ok(records)
    }

    fn create_record(&self, container: &str, record: &MigrationRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.records.push((container.to_string(), record.clone()));
        Ok(())
    }

    fn perform(&self, step: &RequestStep) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if state.failing_paths.contains(&step.path) {
            return Err(StoreError::Status {
                status: 500,
                method: step.method.clone(),
                path: step.path.clone(),
                body: "injected failure".to_string(),
            });
        }
        state.performed.push(step.clone());
        Ok(())
    }
}
