use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storefront_protocol::{
    ContextPatch, Coordinates, FilterSet, PriceRange, QueryContext, SortKey,
};
use tokio::task::JoinHandle;

use crate::cache::CollectionName;
use crate::collab::CategorySelection;

const PRIMARY_ONLY: &[CollectionName] = &[CollectionName::Primary];
const PRIMARY_AND_SECONDARY: &[CollectionName] =
    &[CollectionName::Primary, CollectionName::Secondary];

/// External signals the controller reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    PriceFilter(Option<PriceRange>),
    DeliveryFeeFilter(Option<f64>),
    Sort(Option<SortKey>),
    OffersFilter(bool),
    /// Maximum ETA in minutes.
    TimeFilter(Option<u32>),
    RatingFilter(Option<f32>),
    FiltersCleared,
    LocationUpdated(Coordinates),
    CategorySelected(CategorySelection),
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::PriceFilter(_) => "price_filter",
            TriggerEvent::DeliveryFeeFilter(_) => "delivery_fee_filter",
            TriggerEvent::Sort(_) => "sort",
            TriggerEvent::OffersFilter(_) => "offers_filter",
            TriggerEvent::TimeFilter(_) => "time_filter",
            TriggerEvent::RatingFilter(_) => "rating_filter",
            TriggerEvent::FiltersCleared => "filters_cleared",
            TriggerEvent::LocationUpdated(_) => "location_updated",
            TriggerEvent::CategorySelected(_) => "category_selected",
        }
    }
}

/// What an event turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Patch the context now and refetch these collections.
    Refetch {
        patch: ContextPatch,
        collections: &'static [CollectionName],
    },
    /// Wait out the debounce window, then refetch if the location moved.
    DebounceLocation(Coordinates),
    /// Leave it to the navigation collaborator.
    Navigate(CategorySelection),
}

/// The event table. `current` supplies the filters an event edits.
pub fn route(event: TriggerEvent, current: &QueryContext) -> Route {
    match event {
        TriggerEvent::PriceFilter(range) => Route::Refetch {
            patch: edit_filters(current, |f| f.price = range),
            collections: PRIMARY_ONLY,
        },
        TriggerEvent::DeliveryFeeFilter(max) => Route::Refetch {
            patch: edit_filters(current, |f| f.max_delivery_fee = max),
            collections: PRIMARY_ONLY,
        },
        TriggerEvent::Sort(sort) => Route::Refetch {
            patch: ContextPatch::default().with_sort(sort),
            collections: PRIMARY_ONLY,
        },
        TriggerEvent::OffersFilter(on) => Route::Refetch {
            patch: edit_filters(current, |f| f.offers_only = on),
            collections: PRIMARY_ONLY,
        },
        TriggerEvent::TimeFilter(max) => Route::Refetch {
            patch: edit_filters(current, |f| f.max_eta_minutes = max),
            collections: PRIMARY_ONLY,
        },
        TriggerEvent::RatingFilter(min) => Route::Refetch {
            patch: edit_filters(current, |f| f.min_rating = min),
            collections: PRIMARY_AND_SECONDARY,
        },
        TriggerEvent::FiltersCleared => Route::Refetch {
            patch: ContextPatch::default().with_filters(FilterSet::default()),
            collections: PRIMARY_AND_SECONDARY,
        },
        TriggerEvent::LocationUpdated(coords) => Route::DebounceLocation(coords),
        TriggerEvent::CategorySelected(selection) => Route::Navigate(selection),
    }
}

fn edit_filters(current: &QueryContext, edit: impl FnOnce(&mut FilterSet)) -> ContextPatch {
    let mut filters = current.filters.clone();
    edit(&mut filters);
    ContextPatch::default().with_filters(filters)
}

/// Runs only the last action scheduled within a quiet window.
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `action`, replacing whatever was pending.
    pub fn schedule<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if current.load(Ordering::SeqCst) == generation {
                action();
            }
        });
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Hand out the pending task so a caller can wait for it.
    pub(crate) fn take_pending(&self) -> Option<JoinHandle<()>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Drop whatever is pending without running it.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.take_pending() {
            handle.abort();
        }
    }
}
