use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::json;
use storefront_events::{Bus, Envelope};
use storefront_protocol::{
    CatalogItem, ContextPatch, Coordinates, MergedItem, OverlayRecord, QueryContext, Storefront,
};
use storefront_topics as topics;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CollectionName, CollectionView, Retention};
use crate::collab::{CatalogSource, CategorySelection, Clock, GeoResolver, Navigator};
use crate::config::FeedConfig;
use crate::context::{ChangeKind, ContextStore};
use crate::coordinator::{FetchCoordinator, FetchOutcome};
use crate::error::{CollectionError, FeedError};
use crate::filter;
use crate::overlay;
use crate::relaxation::{PrimaryRender, RelaxationPolicy, RelaxationState};
use crate::snapshot::SnapshotStore;
use crate::triggers::{self, Debouncer, Route, TriggerEvent};

/// Everything the controller talks to outside its own state.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub geo: Arc<dyn GeoResolver>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

/// What a consumer renders: merged, filtered and sorted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedView {
    pub context: QueryContext,
    pub items: Vec<MergedItem>,
    pub storefronts: Vec<Storefront>,
    pub loading: bool,
    /// Previous results are on screen while a refresh is in flight.
    pub stale: bool,
    pub error: Option<CollectionError>,
}

/// One feed session: context, per-collection caches, triggers and the
/// relaxation policy. Cheap to clone.
#[derive(Clone)]
pub struct FeedController {
    inner: Arc<Inner>,
}

struct Inner {
    config: FeedConfig,
    bus: Bus,
    context: ContextStore,
    coordinator: FetchCoordinator,
    geo: Arc<dyn GeoResolver>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    debouncer: Debouncer,
    relaxation: Mutex<RelaxationPolicy>,
    primary_cycles: AtomicU64,
    last_location: Mutex<Option<Coordinates>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl FeedController {
    pub fn new(config: FeedConfig, collaborators: Collaborators) -> Result<Self, FeedError> {
        let fallback = config.default_location.coordinates();
        if !fallback.is_valid() {
            return Err(FeedError::InvalidCoordinates {
                lat: fallback.lat,
                lng: fallback.lng,
            });
        }
        let bus = Bus::default();
        let coordinator = FetchCoordinator::new(
            &config.endpoints,
            collaborators.catalog,
            collaborators.snapshots,
            bus.clone(),
        )?;
        let inner = Inner {
            context: ContextStore::new(QueryContext::default(), bus.clone()),
            debouncer: Debouncer::new(config.triggers.location_debounce()),
            relaxation: Mutex::new(RelaxationPolicy::new(
                config.relaxation.enabled,
                config.relaxation.first_load_only,
            )),
            coordinator,
            geo: collaborators.geo,
            navigator: collaborators.navigator,
            clock: collaborators.clock,
            primary_cycles: AtomicU64::new(0),
            last_location: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            bus,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.bus.subscribe()
    }

    pub fn context(&self) -> QueryContext {
        self.inner.context.get()
    }

    pub fn relaxation_state(&self) -> RelaxationState {
        lock(&self.inner.relaxation).state()
    }

    pub fn primary(&self) -> CollectionView<Vec<CatalogItem>> {
        self.inner.coordinator.primary().read()
    }

    pub fn secondary(&self) -> CollectionView<Vec<Storefront>> {
        self.inner.coordinator.secondary().read()
    }

    pub fn overlay(&self) -> CollectionView<Vec<OverlayRecord>> {
        self.inner.coordinator.overlay().read()
    }

    /// Hydrate from snapshots, apply `initial`, resolve a location and load
    /// every collection.
    pub async fn start(&self, initial: ContextPatch) -> Result<(), FeedError> {
        self.ensure_running()?;
        let hydrated = self.inner.coordinator.hydrate_all();
        if !hydrated.is_empty() {
            debug!(?hydrated, "rendering from snapshots until fetches land");
        }
        if !initial.is_empty() {
            self.inner.context.set(initial)?;
        }
        self.ensure_location().await?;
        let ctx = self.context();
        info!(
            mode = ctx.delivery_mode.as_str(),
            filters = ?ctx.filters.active_keys(),
            "feed controller started"
        );
        self.refetch(&CollectionName::ALL, |_| Retention::Keep);
        Ok(())
    }

    /// Patch the context and refetch whatever the change touches. A mode
    /// switch discards mode-dependent results; everything else refreshes in
    /// place. A new postal code without explicit coordinates is geocoded
    /// before the refetch.
    pub async fn update_context(&self, mut patch: ContextPatch) -> Result<ChangeKind, FeedError> {
        self.ensure_running()?;
        if patch.coordinates.is_none() {
            if let Some(Some(code)) = &patch.postal_code {
                if self.context().postal_code.as_deref() != Some(code.as_str()) {
                    let coords = self.resolve_location(Some(code.as_str())).await;
                    patch.coordinates = Some(Some(coords));
                }
            }
        }
        let mut change = self.inner.context.set(patch)?;
        if self.context().coordinates.is_none() {
            self.ensure_location().await?;
            change.location_changed = true;
        }
        if change.location_changed {
            self.remember_location();
        }
        let collections = collections_for(change);
        if !collections.is_empty() {
            self.refetch(&collections, |collection| retention_for(change, collection));
        }
        Ok(change)
    }

    /// Dispatch an external trigger. Triggers that refetch need a resolved
    /// location and fail with [`FeedError::NotStarted`] before [`Self::start`].
    pub fn emit(&self, event: TriggerEvent) -> Result<(), FeedError> {
        self.ensure_running()?;
        let name = event.name();
        let ctx = self.context();
        match triggers::route(event, &ctx) {
            Route::Refetch { patch, collections } => {
                if ctx.coordinates.is_none() {
                    return Err(FeedError::NotStarted);
                }
                let change = self.inner.context.set(patch)?;
                if change.is_empty() {
                    debug!(event = name, "trigger left the context unchanged");
                    return Ok(());
                }
                self.refetch(collections, |collection| retention_for(change, collection));
            }
            Route::DebounceLocation(coords) => {
                if !coords.is_valid() {
                    return Err(FeedError::InvalidCoordinates {
                        lat: coords.lat,
                        lng: coords.lng,
                    });
                }
                let weak = Arc::downgrade(&self.inner);
                self.inner.debouncer.schedule(move || {
                    if let Some(controller) = FeedController::from_weak(&weak) {
                        controller.settle_location(coords);
                    }
                });
            }
            Route::Navigate(selection) => self.hand_off(selection),
        }
        Ok(())
    }

    /// Merge, filter and sort what is currently visible.
    pub fn feed(&self) -> FeedView {
        let ctx = self.context();
        let primary = self.primary();
        let secondary = self.secondary();
        let overlay = self.overlay();

        let items: &[CatalogItem] = primary.visible().map(Vec::as_slice).unwrap_or(&[]);
        let offers: &[OverlayRecord] = overlay.visible().map(Vec::as_slice).unwrap_or(&[]);
        let stores: &[Storefront] = secondary.visible().map(Vec::as_slice).unwrap_or(&[]);

        let merged = overlay::merge_active(items, offers, self.inner.clock.now());
        FeedView {
            items: filter::apply(&merged, &ctx.filters, ctx.sort),
            storefronts: filter::apply_storefronts(stores, items, &ctx.filters, ctx.sort),
            loading: primary.loading || secondary.loading || overlay.loading,
            stale: primary.is_stale() || secondary.is_stale() || overlay.is_stale(),
            error: primary
                .error
                .clone()
                .or_else(|| secondary.error.clone())
                .or_else(|| overlay.error.clone()),
            context: ctx,
        }
    }

    /// Wait until no fetch or debounced update is outstanding.
    pub async fn idle(&self) {
        loop {
            let mut drained = false;
            if let Some(pending) = self.inner.debouncer.take_pending() {
                drained = true;
                let _ = pending.await;
            }
            let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.inner.tasks));
            for task in tasks {
                drained = true;
                let _ = task.await;
            }
            if !drained {
                break;
            }
        }
    }

    /// Abort pending work. In-flight responses are dropped and later calls
    /// fail with [`FeedError::ShutDown`].
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.debouncer.cancel();
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
        self.inner.coordinator.abandon_all();
        debug!("feed controller shut down");
    }

    fn ensure_running(&self) -> Result<(), FeedError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(FeedError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Explicit coordinates, then the geocoded postal code, then the
    /// configured default.
    async fn ensure_location(&self) -> Result<(), FeedError> {
        let ctx = self.context();
        if ctx.coordinates.is_none() {
            let coords = self.resolve_location(ctx.postal_code.as_deref()).await;
            self.inner
                .context
                .set(ContextPatch::default().with_coordinates(coords))?;
        }
        self.remember_location();
        Ok(())
    }

    async fn resolve_location(&self, postal_code: Option<&str>) -> Coordinates {
        match self.inner.geo.resolve(postal_code).await {
            Ok(coords) if coords.is_valid() => coords,
            Ok(coords) => {
                warn!(lat = coords.lat, lng = coords.lng, "resolver returned invalid coordinates; using default location");
                self.inner.config.default_location.coordinates()
            }
            Err(err) => {
                warn!(%err, "location resolution failed; using default location");
                self.inner.config.default_location.coordinates()
            }
        }
    }

    fn remember_location(&self) {
        *lock(&self.inner.last_location) = self.context().coordinates;
    }

    fn settle_location(&self, coords: Coordinates) {
        if self.ensure_running().is_err() {
            return;
        }
        let unchanged = lock(&self.inner.last_location)
            .map(|last| last.same_place(&coords))
            .unwrap_or(false);
        self.inner.bus.publish(
            topics::TOPIC_LOCATION_DEBOUNCED,
            &json!({ "coordinates": coords, "changed": !unchanged }),
        );
        if unchanged {
            debug!(lat = coords.lat, lng = coords.lng, "location unchanged after debounce");
            return;
        }
        match self
            .inner
            .context
            .set(ContextPatch::default().with_coordinates(coords))
        {
            Ok(change) => {
                self.remember_location();
                self.refetch(
                    &[CollectionName::Primary, CollectionName::Secondary],
                    |collection| retention_for(change, collection),
                );
            }
            Err(err) => warn!(%err, "debounced location rejected"),
        }
    }

    fn hand_off(&self, selection: CategorySelection) {
        self.inner.navigator.open_category(&selection);
        self.inner
            .bus
            .publish(topics::TOPIC_CATEGORY_HANDOFF, &selection);
    }

    /// Issue fetches for `collections` against the current context. Tokens
    /// are taken here, synchronously, in the order given.
    fn refetch(&self, collections: &[CollectionName], retention: impl Fn(CollectionName) -> Retention) {
        let ctx = self.context();
        let mut spawned = Vec::with_capacity(collections.len());
        for &collection in collections {
            let pending = self
                .inner
                .coordinator
                .begin(collection, &ctx, retention(collection));
            let coordinator = self.inner.coordinator.clone();
            let weak = Arc::downgrade(&self.inner);
            spawned.push(tokio::spawn(async move {
                let outcome = coordinator.complete(pending).await;
                if collection == CollectionName::Primary && outcome == FetchOutcome::Applied {
                    if let Some(controller) = FeedController::from_weak(&weak) {
                        controller.after_primary_applied();
                    }
                }
            }));
        }
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.extend(spawned);
    }

    fn after_primary_applied(&self) {
        let cycle = self.inner.primary_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let primary = self.primary();
        let feed = self.feed();
        let offending = {
            let mut policy = lock(&self.inner.relaxation);
            policy.observe(&PrimaryRender {
                visible_items: feed.items.len(),
                loading: primary.loading,
                filters: &feed.context.filters,
                completed_cycles: cycle,
            })
        };
        let Some(offending) = offending else {
            return;
        };
        info!(cleared = ?offending, cycle, "empty first load; relaxing filters and reloading");
        self.inner.context.clear_filters(&offending);
        self.inner.coordinator.clear_snapshots();
        self.inner.bus.publish(
            topics::TOPIC_RELAXATION_FIRED,
            &json!({ "cleared": offending, "cycle": cycle }),
        );
        self.refetch(
            &[CollectionName::Primary, CollectionName::Secondary],
            |_| Retention::Discard,
        );
    }
}

/// Collections a context change has to refetch, primary first.
fn collections_for(change: ChangeKind) -> Vec<CollectionName> {
    CollectionName::ALL
        .into_iter()
        .filter(|collection| match collection {
            CollectionName::Primary => !change.is_empty(),
            CollectionName::Secondary => change.location_changed || change.mode_changed,
            CollectionName::Overlay => change.location_changed,
        })
        .collect()
}

fn retention_for(change: ChangeKind, collection: CollectionName) -> Retention {
    if collection.depends_on_mode() {
        change.retention()
    } else {
        Retention::Keep
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
