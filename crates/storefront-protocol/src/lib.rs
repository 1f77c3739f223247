use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod filters;
pub use filters::{CategoryFilter, FilterKey, FilterSet, FilterViolation, PriceRange};

/// Coordinates closer than this (in degrees) are treated as the same place.
pub const COORDINATE_EPSILON: f64 = 1e-6;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, JsonSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn same_place(&self, other: &Coordinates) -> bool {
        (self.lat - other.lat).abs() < COORDINATE_EPSILON
            && (self.lng - other.lng).abs() < COORDINATE_EPSILON
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Delivery,
    Pickup,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Delivery => "delivery",
            DeliveryMode::Pickup => "pickup",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delivery" | "deliver" => Some(DeliveryMode::Delivery),
            "pickup" | "pick-up" | "collect" => Some(DeliveryMode::Pickup),
            _ => None,
        }
    }
}

/// Sort orders understood by the client-side engine. Ratings sort high to
/// low; everything else sorts low to high unless the name says otherwise.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Rating,
    Eta,
    DeliveryFee,
    PriceLowHigh,
    PriceHighLow,
    Distance,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Rating => "rating",
            SortKey::Eta => "eta",
            SortKey::DeliveryFee => "delivery_fee",
            SortKey::PriceLowHigh => "price_low_high",
            SortKey::PriceHighLow => "price_high_low",
            SortKey::Distance => "distance",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "rating" | "top_rated" => Some(SortKey::Rating),
            "eta" | "time" | "fastest" => Some(SortKey::Eta),
            "delivery_fee" | "fee" => Some(SortKey::DeliveryFee),
            "price_low_high" | "price_asc" | "price" => Some(SortKey::PriceLowHigh),
            "price_high_low" | "price_desc" => Some(SortKey::PriceHighLow),
            "distance" | "nearest" => Some(SortKey::Distance),
            _ => None,
        }
    }
}

/// The query a feed is fetched for.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct QueryContext {
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub filters: FilterSet,
    #[serde(default)]
    pub sort: Option<SortKey>,
}

impl QueryContext {
    /// Query-string pairs for a listing request. Coordinates are omitted when
    /// unresolved; callers must resolve them before fetching the primary feed.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(coords) = self.coordinates {
            pairs.push(("lat", coords.lat.to_string()));
            pairs.push(("lng", coords.lng.to_string()));
        }
        pairs.push(("mode", self.delivery_mode.as_str().to_string()));
        pairs.extend(self.filters.query_pairs());
        if let Some(sort) = self.sort {
            pairs.push(("sort", sort.as_str().to_string()));
        }
        pairs
    }
}

/// Partial update applied by the context store. `Some(None)` clears an
/// optional field; `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextPatch {
    pub coordinates: Option<Option<Coordinates>>,
    pub postal_code: Option<Option<String>>,
    pub delivery_mode: Option<DeliveryMode>,
    pub filters: Option<FilterSet>,
    pub sort: Option<Option<SortKey>>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_none()
            && self.postal_code.is_none()
            && self.delivery_mode.is_none()
            && self.filters.is_none()
            && self.sort.is_none()
    }

    pub fn with_coordinates(mut self, coords: Coordinates) -> Self {
        self.coordinates = Some(Some(coords));
        self
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(Some(postal_code.into()));
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = Some(mode);
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_sort(mut self, sort: Option<SortKey>) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// A catalog item from the primary listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct CatalogItem {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub storefront_id: Option<u64>,
    #[serde(default)]
    pub category_id: Option<u64>,
    #[serde(default)]
    pub category: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub compare_price: Option<f64>,
    #[serde(default)]
    pub discount_percent: Option<f64>,
    #[serde(default)]
    pub on_offer: bool,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub delivery_fee: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

impl CatalogItem {
    pub fn new(id: u64, name: impl Into<String>, price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            storefront_id: None,
            category_id: None,
            category: None,
            price,
            compare_price: None,
            discount_percent: None,
            on_offer: false,
            rating: None,
            eta_minutes: None,
            delivery_fee: None,
            distance_km: None,
        }
    }
}

/// A storefront from the secondary listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Storefront {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub delivery_fee: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

impl Storefront {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: None,
            rating: None,
            eta_minutes: None,
            delivery_fee: None,
            distance_km: None,
        }
    }
}

/// A time-limited promotion for one catalog item (`id` is the item id).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct OverlayRecord {
    pub id: u64,
    pub price: f64,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discount_percent: Option<f64>,
}

impl OverlayRecord {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let started = self.valid_from.map(|from| from <= now).unwrap_or(true);
        let not_expired = self.valid_until.map(|until| now <= until).unwrap_or(true);
        started && not_expired
    }
}

/// A catalog item with its promotion (if any) joined on and the discount
/// metadata derived from both.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct MergedItem {
    pub item: CatalogItem,
    pub overlay_price: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub effective_price: f64,
    pub has_discount: bool,
    pub discount_percent: u32,
}

/// Wire envelope returned by listing endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct ListingEnvelope {
    #[serde(default)]
    pub data: Value,
}

impl ListingEnvelope {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}
