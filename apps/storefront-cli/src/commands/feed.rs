use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use storefront_cli::http_client::{self, HttpCatalogSource, HttpGeoResolver};
use storefront_core::{Collaborators, FeedConfig, FeedController, LoggingNavigator, SystemClock};
use storefront_protocol::{
    CategoryFilter, ContextPatch, Coordinates, DeliveryMode, FilterSet, PriceRange, SortKey,
};

use super::{print_json, snapshot_store};

fn parse_mode(raw: &str) -> Result<DeliveryMode, String> {
    DeliveryMode::from_slug(raw).ok_or_else(|| format!("unknown delivery mode {raw:?}"))
}

fn parse_sort(raw: &str) -> Result<SortKey, String> {
    SortKey::from_slug(raw).ok_or_else(|| format!("unknown sort {raw:?}"))
}

#[derive(Args, Debug)]
pub struct FeedArgs {
    /// Latitude; requires --lng
    #[arg(long, allow_negative_numbers = true, requires = "lng")]
    pub lat: Option<f64>,
    /// Longitude; requires --lat
    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    pub lng: Option<f64>,
    /// Postal code to geocode when no coordinates are given
    #[arg(long)]
    pub postal_code: Option<String>,
    /// delivery | pickup
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<DeliveryMode>,
    /// rating | eta | delivery-fee | price-low-high | price-high-low | distance
    #[arg(long, value_parser = parse_sort)]
    pub sort: Option<SortKey>,
    #[arg(long)]
    pub min_price: Option<f64>,
    #[arg(long)]
    pub max_price: Option<f64>,
    #[arg(long)]
    pub min_rating: Option<f32>,
    #[arg(long)]
    pub max_fee: Option<f64>,
    /// Maximum ETA in minutes
    #[arg(long)]
    pub max_eta: Option<u32>,
    #[arg(long)]
    pub category_id: Option<u64>,
    /// Category label, matched through the alias table
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub offers_only: bool,
    /// Pretty-print JSON
    #[arg(long)]
    pub pretty: bool,
}

impl FeedArgs {
    pub fn filters(&self) -> FilterSet {
        let price = (self.min_price.is_some() || self.max_price.is_some()).then_some(PriceRange {
            min: self.min_price,
            max: self.max_price,
        });
        let category = (self.category_id.is_some() || self.category.is_some()).then(|| {
            CategoryFilter {
                id: self.category_id,
                name: self.category.clone(),
            }
        });
        FilterSet {
            price,
            min_rating: self.min_rating,
            max_delivery_fee: self.max_fee,
            max_eta_minutes: self.max_eta,
            category,
            offers_only: self.offers_only,
        }
    }

    pub fn patch(&self) -> ContextPatch {
        let mut patch = ContextPatch::default().with_filters(self.filters());
        if let (Some(lat), Some(lng)) = (self.lat, self.lng) {
            patch = patch.with_coordinates(Coordinates::new(lat, lng));
        }
        if let Some(code) = &self.postal_code {
            patch = patch.with_postal_code(code.clone());
        }
        if let Some(mode) = self.mode {
            patch = patch.with_delivery_mode(mode);
        }
        if self.sort.is_some() {
            patch = patch.with_sort(self.sort);
        }
        patch
    }
}

pub async fn run(cfg: FeedConfig, args: FeedArgs) -> Result<()> {
    let client = http_client::client(&cfg.http)?;
    let geo = HttpGeoResolver::new(client.clone(), &cfg.endpoints)?;
    let collaborators = Collaborators {
        catalog: Arc::new(HttpCatalogSource::new(client)),
        geo: Arc::new(geo),
        snapshots: Arc::new(snapshot_store(&cfg)),
        navigator: Arc::new(LoggingNavigator),
        clock: Arc::new(SystemClock),
    };
    let controller = FeedController::new(cfg, collaborators).context("building feed controller")?;
    controller
        .start(args.patch())
        .await
        .context("starting feed")?;
    tokio::select! {
        _ = controller.idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; printing what has landed so far");
        }
    }
    controller.shutdown();
    print_json(&controller.feed(), args.pretty)
}
