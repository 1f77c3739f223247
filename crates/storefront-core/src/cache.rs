use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CollectionError, ErrorKind, NetworkError};
use crate::snapshot::SnapshotStore;

/// The independently fetched collections that make up a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionName {
    Primary,
    Secondary,
    Overlay,
}

impl CollectionName {
    pub const ALL: [CollectionName; 3] = [
        CollectionName::Primary,
        CollectionName::Secondary,
        CollectionName::Overlay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Primary => "primary",
            CollectionName::Secondary => "secondary",
            CollectionName::Overlay => "overlay",
        }
    }

    /// Whether the backend filters this collection by delivery mode.
    pub fn depends_on_mode(&self) -> bool {
        matches!(self, CollectionName::Primary | CollectionName::Secondary)
    }

    pub fn snapshot_key(&self) -> String {
        format!("snapshot.{}", self.as_str())
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a starting fetch does with the data already on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Refreshable change: keep showing the last-applied data while loading.
    Keep,
    /// Invalidating change: render the empty state until new data lands.
    Discard,
}

#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    pub sequence_issued: u64,
    pub sequence_applied: u64,
    pub data: Option<T>,
    pub previous_data: Option<T>,
    pub loading: bool,
    pub error: Option<CollectionError>,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            sequence_issued: 0,
            sequence_applied: 0,
            data: None,
            previous_data: None,
            loading: false,
            error: None,
        }
    }
}

/// Read-only copy of a collection handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionView<T> {
    pub data: Option<T>,
    pub previous_data: Option<T>,
    pub loading: bool,
    pub error: Option<CollectionError>,
    pub sequence_issued: u64,
    pub sequence_applied: u64,
}

impl<T> CollectionView<T> {
    /// What the render layer should show right now.
    pub fn visible(&self) -> Option<&T> {
        if self.loading {
            self.previous_data.as_ref()
        } else {
            self.data.as_ref()
        }
    }

    /// Showing previous data while a refresh is in flight.
    pub fn is_stale(&self) -> bool {
        self.loading && self.previous_data.is_some()
    }
}

/// Last-good result per collection, the data shown during refresh, and the
/// durable snapshot behind them.
pub struct SwrCache<T> {
    name: CollectionName,
    state: Mutex<CollectionState<T>>,
    store: Arc<dyn SnapshotStore>,
}

impl<T> SwrCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(name: CollectionName, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            name,
            state: Mutex::new(CollectionState::default()),
            store,
        }
    }

    pub fn name(&self) -> CollectionName {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, CollectionState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read(&self) -> CollectionView<T> {
        let state = self.lock();
        CollectionView {
            data: state.data.clone(),
            previous_data: state.previous_data.clone(),
            loading: state.loading,
            error: state.error.clone(),
            sequence_issued: state.sequence_issued,
            sequence_applied: state.sequence_applied,
        }
    }

    /// Replace the current data and persist it.
    pub fn write(&self, data: T) {
        self.persist(&data);
        self.lock().data = Some(data);
    }

    pub fn invalidate(&self) {
        self.lock().previous_data = None;
    }

    /// Load the durable snapshot into an empty cache. Returns whether
    /// anything was loaded.
    pub fn hydrate(&self) -> bool {
        if self.lock().data.is_some() {
            return false;
        }
        let key = self.name.snapshot_key();
        let Some(raw) = self.store.get(&key) else {
            return false;
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                let mut state = self.lock();
                if state.data.is_none() {
                    state.data = Some(value);
                    debug!(collection = %self.name, "hydrated from snapshot");
                    true
                } else {
                    false
                }
            }
            Err(err) => {
                warn!(collection = %self.name, %err, "discarding unreadable snapshot");
                self.clear_snapshot();
                false
            }
        }
    }

    pub fn clear_snapshot(&self) {
        if let Err(err) = self.store.remove(&self.name.snapshot_key()) {
            warn!(collection = %self.name, %err, "failed to clear snapshot");
        }
    }

    /// Start a fetch: issue the next sequence token and flip `loading`.
    pub(crate) fn begin(&self, retention: Retention) -> u64 {
        let mut state = self.lock();
        match retention {
            Retention::Keep => {
                if let Some(current) = state.data.clone() {
                    state.previous_data = Some(current);
                }
            }
            Retention::Discard => {
                state.previous_data = None;
                state.data = None;
            }
        }
        state.sequence_issued += 1;
        state.loading = true;
        state.sequence_issued
    }

    pub(crate) fn is_current(&self, token: u64) -> bool {
        self.lock().sequence_issued == token
    }

    /// Apply a response if `token` is still the latest issued.
    pub(crate) fn apply(&self, token: u64, data: T) -> bool {
        {
            let mut state = self.lock();
            if state.sequence_issued != token {
                return false;
            }
            state.data = Some(data.clone());
            state.previous_data = None;
            state.sequence_applied = token;
            state.loading = false;
            state.error = None;
        }
        self.persist(&data);
        true
    }

    /// Record a failure if `token` is still the latest issued. Last-known-good
    /// data is left in place.
    pub(crate) fn fail(&self, token: u64, err: &NetworkError) -> Option<CollectionError> {
        let mut state = self.lock();
        if state.sequence_issued != token {
            return None;
        }
        let error = CollectionError {
            collection: self.name,
            kind: ErrorKind::from(err),
            message: err.to_string(),
            blocking: state.data.is_none() && state.previous_data.is_none(),
        };
        state.loading = false;
        state.error = Some(error.clone());
        Some(error)
    }

    /// Drop the in-flight marker without applying anything (teardown).
    pub(crate) fn abandon(&self) {
        self.lock().loading = false;
    }

    fn persist(&self, data: &T) {
        let encoded = match serde_json::to_string(data) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(collection = %self.name, %err, "failed to encode snapshot");
                return;
            }
        };
        if let Err(err) = self.store.set(&self.name.snapshot_key(), &encoded) {
            warn!(collection = %self.name, %err, "failed to write snapshot");
        }
    }
}
