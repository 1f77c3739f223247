//! Seams to the outside world. The controller only ever talks to these
//! traits; the CLI wires HTTP-backed implementations and tests wire fakes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_protocol::{Coordinates, ListingEnvelope};
use url::Url;

use crate::error::{NetworkError, ResolutionError};

/// Fetches a listing. Timeouts and retries, if any, live here.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    async fn get(&self, url: &Url) -> Result<ListingEnvelope, NetworkError>;
}

/// Turns a postal code (or nothing) into coordinates.
#[async_trait::async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, postal_code: Option<&str>) -> Result<Coordinates, ResolutionError>;
}

/// A category tab picked by the user; handled by navigation, not by a refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySelection {
    pub id: Option<u64>,
    pub label: String,
}

pub trait Navigator: Send + Sync {
    fn open_category(&self, selection: &CategorySelection);
}

/// Navigator used when the host has not wired one; it only logs.
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn open_category(&self, selection: &CategorySelection) {
        tracing::info!(label = %selection.label, id = ?selection.id, "category navigation requested");
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Resolver that always answers with one fixed location.
pub struct StaticGeoResolver {
    location: Coordinates,
}

impl StaticGeoResolver {
    pub fn new(location: Coordinates) -> Self {
        Self { location }
    }
}

#[async_trait::async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, _postal_code: Option<&str>) -> Result<Coordinates, ResolutionError> {
        Ok(self.location)
    }
}
