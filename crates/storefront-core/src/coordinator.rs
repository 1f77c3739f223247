use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use storefront_events::Bus;
use storefront_protocol::{CatalogItem, ListingEnvelope, OverlayRecord, QueryContext, Storefront};
use storefront_topics as topics;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CollectionName, Retention, SwrCache};
use crate::collab::CatalogSource;
use crate::config::EndpointsConfig;
use crate::error::{FeedError, NetworkError};
use crate::snapshot::SnapshotStore;

/// How a single fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Applied,
    /// A newer fetch was issued before this one resolved; its result was dropped.
    Superseded,
    Failed,
}

/// A fetch whose token has been issued but whose response has not been
/// settled yet.
#[derive(Debug, Clone)]
pub struct PendingFetch {
    pub collection: CollectionName,
    pub token: u64,
    pub url: Url,
}

/// Handle to a spawned fetch. Dropping it does not cancel the fetch.
#[derive(Debug)]
pub struct FetchHandle {
    collection: CollectionName,
    token: u64,
    join: JoinHandle<FetchOutcome>,
}

impl FetchHandle {
    pub fn collection(&self) -> CollectionName {
        self.collection
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Wait for the fetch to settle. `None` if the task was aborted.
    pub async fn outcome(self) -> Option<FetchOutcome> {
        self.join.await.ok()
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

#[derive(Debug, Clone)]
struct EndpointUrls {
    primary: Url,
    secondary: Url,
    overlay: Url,
}

impl EndpointUrls {
    fn from_config(cfg: &EndpointsConfig) -> Result<Self, FeedError> {
        let build = |collection: CollectionName| -> Result<Url, FeedError> {
            let raw = format!(
                "{}/{}",
                cfg.base_url.trim_end_matches('/'),
                cfg.path_for(collection).trim_start_matches('/')
            );
            Url::parse(&raw).map_err(|err| FeedError::Endpoint {
                url: raw.clone(),
                reason: err.to_string(),
            })
        };
        Ok(Self {
            primary: build(CollectionName::Primary)?,
            secondary: build(CollectionName::Secondary)?,
            overlay: build(CollectionName::Overlay)?,
        })
    }

    fn get(&self, collection: CollectionName) -> &Url {
        match collection {
            CollectionName::Primary => &self.primary,
            CollectionName::Secondary => &self.secondary,
            CollectionName::Overlay => &self.overlay,
        }
    }
}

/// Issues fetches per collection and applies only the latest-issued result.
#[derive(Clone)]
pub struct FetchCoordinator {
    catalog: Arc<dyn CatalogSource>,
    primary: Arc<SwrCache<Vec<CatalogItem>>>,
    secondary: Arc<SwrCache<Vec<Storefront>>>,
    overlay: Arc<SwrCache<Vec<OverlayRecord>>>,
    urls: EndpointUrls,
    bus: Bus,
}

impl FetchCoordinator {
    pub fn new(
        endpoints: &EndpointsConfig,
        catalog: Arc<dyn CatalogSource>,
        snapshots: Arc<dyn SnapshotStore>,
        bus: Bus,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            catalog,
            primary: Arc::new(SwrCache::new(CollectionName::Primary, snapshots.clone())),
            secondary: Arc::new(SwrCache::new(CollectionName::Secondary, snapshots.clone())),
            overlay: Arc::new(SwrCache::new(CollectionName::Overlay, snapshots)),
            urls: EndpointUrls::from_config(endpoints)?,
            bus,
        })
    }

    pub fn primary(&self) -> &SwrCache<Vec<CatalogItem>> {
        &self.primary
    }

    pub fn secondary(&self) -> &SwrCache<Vec<Storefront>> {
        &self.secondary
    }

    pub fn overlay(&self) -> &SwrCache<Vec<OverlayRecord>> {
        &self.overlay
    }

    /// Request URL for `collection` under `ctx`. The overlay listing is not
    /// filtered server-side, so it only carries the location.
    pub fn url_for(&self, collection: CollectionName, ctx: &QueryContext) -> Url {
        let mut url = self.urls.get(collection).clone();
        let pairs = ctx.query_pairs();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &pairs {
                if collection == CollectionName::Overlay && !matches!(*key, "lat" | "lng") {
                    continue;
                }
                query.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }

    /// Issue the next token for `collection` and flip it to loading. The URL
    /// is fixed here, so later context edits do not leak into this request.
    pub fn begin(
        &self,
        collection: CollectionName,
        ctx: &QueryContext,
        retention: Retention,
    ) -> PendingFetch {
        let token = match collection {
            CollectionName::Primary => self.primary.begin(retention),
            CollectionName::Secondary => self.secondary.begin(retention),
            CollectionName::Overlay => self.overlay.begin(retention),
        };
        debug!(%collection, token, ?retention, "fetch issued");
        PendingFetch {
            collection,
            token,
            url: self.url_for(collection, ctx),
        }
    }

    /// Call the catalog and settle the response against the cache.
    pub async fn complete(&self, pending: PendingFetch) -> FetchOutcome {
        match pending.collection {
            CollectionName::Primary => self.settle(&self.primary, pending).await,
            CollectionName::Secondary => self.settle(&self.secondary, pending).await,
            CollectionName::Overlay => self.settle(&self.overlay, pending).await,
        }
    }

    /// `begin` followed by a spawned `complete`.
    pub fn fetch(
        &self,
        collection: CollectionName,
        ctx: &QueryContext,
        retention: Retention,
    ) -> FetchHandle {
        let pending = self.begin(collection, ctx, retention);
        let token = pending.token;
        let this = self.clone();
        let join = tokio::spawn(async move { this.complete(pending).await });
        FetchHandle {
            collection,
            token,
            join,
        }
    }

    /// Load durable snapshots into empty caches; returns what was loaded.
    pub fn hydrate_all(&self) -> Vec<CollectionName> {
        let mut loaded = Vec::new();
        if self.primary.hydrate() {
            loaded.push(CollectionName::Primary);
        }
        if self.secondary.hydrate() {
            loaded.push(CollectionName::Secondary);
        }
        if self.overlay.hydrate() {
            loaded.push(CollectionName::Overlay);
        }
        loaded
    }

    pub fn clear_snapshots(&self) {
        self.primary.clear_snapshot();
        self.secondary.clear_snapshot();
        self.overlay.clear_snapshot();
    }

    pub(crate) fn abandon_all(&self) {
        self.primary.abandon();
        self.secondary.abandon();
        self.overlay.abandon();
    }

    async fn settle<T>(&self, cache: &SwrCache<Vec<T>>, pending: PendingFetch) -> FetchOutcome
    where
        T: Clone + Serialize + DeserializeOwned,
    {
        let PendingFetch {
            collection,
            token,
            url,
        } = pending;
        let result = self
            .catalog
            .get(&url)
            .await
            .and_then(decode_listing::<T>);
        match result {
            Ok(data) => {
                let count = data.len();
                if cache.apply(token, data) {
                    self.bus.publish(
                        topics::TOPIC_COLLECTION_APPLIED,
                        &json!({ "collection": collection, "token": token, "count": count }),
                    );
                    FetchOutcome::Applied
                } else {
                    self.superseded(cache, collection, token)
                }
            }
            Err(err) => match cache.fail(token, &err) {
                Some(error) => {
                    warn!(%collection, token, %err, blocking = error.blocking, "fetch failed");
                    self.bus
                        .publish(topics::TOPIC_COLLECTION_FAILED, &json!({ "token": token, "error": error }));
                    FetchOutcome::Failed
                }
                None => self.superseded(cache, collection, token),
            },
        }
    }

    fn superseded<T>(&self, cache: &SwrCache<Vec<T>>, collection: CollectionName, token: u64) -> FetchOutcome
    where
        T: Clone + Serialize + DeserializeOwned,
    {
        let issued = cache.read().sequence_issued;
        debug!(%collection, token, issued, "dropping superseded response");
        self.bus.publish(
            topics::TOPIC_COLLECTION_SUPERSEDED,
            &json!({ "collection": collection, "token": token, "issued": issued }),
        );
        FetchOutcome::Superseded
    }
}

/// A missing `data` field reads as an empty listing.
fn decode_listing<T: DeserializeOwned>(envelope: ListingEnvelope) -> Result<Vec<T>, NetworkError> {
    if envelope.data.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value::<Vec<T>>(envelope.data).map_err(|err| NetworkError::Decode(err.to_string()))
}

/// Shorthand for tests and tooling that build envelopes by hand.
pub fn listing<T: Serialize>(rows: &[T]) -> ListingEnvelope {
    ListingEnvelope::new(serde_json::to_value(rows).unwrap_or(Value::Array(Vec::new())))
}
