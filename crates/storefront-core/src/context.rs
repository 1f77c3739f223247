use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use storefront_events::Bus;
use storefront_protocol::{ContextPatch, Coordinates, FilterKey, QueryContext};
use storefront_topics as topics;

use crate::cache::Retention;
use crate::error::FeedError;

/// Which axes of the query context moved in one transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeKind {
    pub location_changed: bool,
    pub mode_changed: bool,
    pub filter_changed: bool,
}

impl ChangeKind {
    pub fn is_empty(&self) -> bool {
        !(self.location_changed || self.mode_changed || self.filter_changed)
    }

    /// A delivery-mode switch makes everything on screen wrong, not just old.
    pub fn is_invalidating(&self) -> bool {
        self.mode_changed
    }

    pub fn retention(&self) -> Retention {
        if self.is_invalidating() {
            Retention::Discard
        } else {
            Retention::Keep
        }
    }

    fn between(old: &QueryContext, new: &QueryContext) -> ChangeKind {
        ChangeKind {
            location_changed: !same_location(old.coordinates, new.coordinates)
                || old.postal_code != new.postal_code,
            mode_changed: old.delivery_mode != new.delivery_mode,
            filter_changed: old.filters != new.filters || old.sort != new.sort,
        }
    }
}

fn same_location(a: Option<Coordinates>, b: Option<Coordinates>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_place(&b),
        (None, None) => true,
        _ => false,
    }
}

/// Holds the current query context and announces changes on the bus.
pub struct ContextStore {
    ctx: Mutex<QueryContext>,
    bus: Bus,
}

impl ContextStore {
    pub fn new(initial: QueryContext, bus: Bus) -> Self {
        Self {
            ctx: Mutex::new(initial),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryContext> {
        self.ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> QueryContext {
        self.lock().clone()
    }

    /// Apply a partial update. Invalid filters or coordinates reject the
    /// whole patch.
    pub fn set(&self, patch: ContextPatch) -> Result<ChangeKind, FeedError> {
        if let Some(filters) = &patch.filters {
            filters.validate()?;
        }
        if let Some(Some(coords)) = patch.coordinates {
            if !coords.is_valid() {
                return Err(FeedError::InvalidCoordinates {
                    lat: coords.lat,
                    lng: coords.lng,
                });
            }
        }

        let (change, snapshot) = {
            let mut ctx = self.lock();
            let old = ctx.clone();
            if let Some(coords) = patch.coordinates {
                ctx.coordinates = coords;
            }
            if let Some(postal_code) = patch.postal_code {
                ctx.postal_code = postal_code;
            }
            if let Some(mode) = patch.delivery_mode {
                ctx.delivery_mode = mode;
            }
            if let Some(filters) = patch.filters {
                ctx.filters = filters;
            }
            if let Some(sort) = patch.sort {
                ctx.sort = sort;
            }
            (ChangeKind::between(&old, &ctx), ctx.clone())
        };
        self.announce(change, &snapshot);
        Ok(change)
    }

    /// Switch off the given filters.
    pub fn clear_filters(&self, keys: &[FilterKey]) -> ChangeKind {
        let (change, snapshot) = {
            let mut ctx = self.lock();
            let old = ctx.clone();
            for key in keys {
                ctx.filters.clear(*key);
            }
            (ChangeKind::between(&old, &ctx), ctx.clone())
        };
        self.announce(change, &snapshot);
        change
    }

    fn announce(&self, change: ChangeKind, ctx: &QueryContext) {
        if change.is_empty() {
            return;
        }
        self.bus.publish(
            topics::TOPIC_CONTEXT_CHANGED,
            &json!({ "change": change, "context": ctx }),
        );
    }
}
