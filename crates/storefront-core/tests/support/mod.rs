#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use storefront_core::coordinator::listing;
use storefront_core::{
    CatalogSource, CategorySelection, Clock, Collaborators, FeedConfig, FeedController,
    GeoResolver, MemorySnapshotStore, Navigator, NetworkError, ResolutionError,
};
use storefront_events::Envelope;
use storefront_protocol::{Coordinates, ListingEnvelope};
use tokio::sync::{broadcast, oneshot};
use url::Url;

pub type Reply = Result<ListingEnvelope, NetworkError>;

pub const PRIMARY: &str = "/api/products";
pub const SECONDARY: &str = "/api/stores";
pub const OVERLAY: &str = "/api/flash-sales";

enum Scripted {
    Ready(Reply),
    Gated(oneshot::Receiver<Reply>),
}

/// Catalog answering from per-path scripts. Unscripted calls get an empty
/// listing.
#[derive(Default)]
pub struct ScriptedCatalog {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<Url>>,
}

impl ScriptedCatalog {
    pub fn reply<T: Serialize>(&self, path: &str, rows: &[T]) {
        self.push(path, Scripted::Ready(Ok(listing(rows))));
    }

    pub fn fail(&self, path: &str, err: NetworkError) {
        self.push(path, Scripted::Ready(Err(err)));
    }

    /// The next call on `path` waits until the returned sender fires.
    pub fn gate(&self, path: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.push(path, Scripted::Gated(rx));
        tx
    }

    fn push(&self, path: &str, entry: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn calls_to(&self, path: &str) -> Vec<Url> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.path() == path)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl CatalogSource for ScriptedCatalog {
    async fn get(&self, url: &Url) -> Result<ListingEnvelope, NetworkError> {
        self.calls.lock().unwrap().push(url.clone());
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url.path())
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Ready(reply)) => reply,
            Some(Scripted::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(NetworkError::Transport("gate dropped".into()))),
            None => Ok(ListingEnvelope::new(serde_json::json!([]))),
        }
    }
}

pub struct FakeGeo {
    answer: Result<Coordinates, ResolutionError>,
    pub asked: Mutex<Vec<Option<String>>>,
}

impl FakeGeo {
    pub fn answering(answer: Result<Coordinates, ResolutionError>) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl GeoResolver for FakeGeo {
    async fn resolve(&self, postal_code: Option<&str>) -> Result<Coordinates, ResolutionError> {
        self.asked
            .lock()
            .unwrap()
            .push(postal_code.map(str::to_string));
        self.answer.clone()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub opened: Mutex<Vec<CategorySelection>>,
}

impl Navigator for RecordingNavigator {
    fn open_category(&self, selection: &CategorySelection) {
        self.opened.lock().unwrap().push(selection.clone());
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn noon() -> DateTime<Utc> {
    "2030-03-01T12:00:00Z".parse().unwrap()
}

pub fn home() -> Coordinates {
    Coordinates::new(51.5074, -0.1278)
}

pub struct Harness {
    pub controller: FeedController,
    pub catalog: Arc<ScriptedCatalog>,
    pub geo: Arc<FakeGeo>,
    pub navigator: Arc<RecordingNavigator>,
    pub snapshots: Arc<MemorySnapshotStore>,
}

pub fn harness() -> Harness {
    harness_with(FeedConfig::default(), Arc::new(MemorySnapshotStore::new()))
}

pub fn harness_with(config: FeedConfig, snapshots: Arc<MemorySnapshotStore>) -> Harness {
    build(config, snapshots, FakeGeo::answering(Ok(home())))
}

/// Default harness whose geocoder answers every postal code with `answer`.
pub fn harness_locating(answer: Coordinates) -> Harness {
    build(
        FeedConfig::default(),
        Arc::new(MemorySnapshotStore::new()),
        FakeGeo::answering(Ok(answer)),
    )
}

fn build(config: FeedConfig, snapshots: Arc<MemorySnapshotStore>, geo: FakeGeo) -> Harness {
    let catalog = Arc::new(ScriptedCatalog::default());
    let geo = Arc::new(geo);
    let navigator = Arc::new(RecordingNavigator::default());
    let controller = FeedController::new(
        config,
        Collaborators {
            catalog: catalog.clone(),
            geo: geo.clone(),
            snapshots: snapshots.clone(),
            navigator: navigator.clone(),
            clock: Arc::new(FixedClock(noon())),
        },
    )
    .unwrap();
    Harness {
        controller,
        catalog,
        geo,
        navigator,
        snapshots,
    }
}

/// Next event of `kind` whose payload satisfies `matches`.
pub async fn next_event(
    rx: &mut broadcast::Receiver<Envelope>,
    kind: &str,
    matches: impl Fn(&serde_json::Value) -> bool,
) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(env) if env.kind == kind && matches(&env.payload) => return env,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("event not published in time")
}
