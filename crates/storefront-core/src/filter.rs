//! Client-side filtering and sorting applied after every fetch, for the
//! filters the backend does not enforce itself.

use std::cmp::Ordering;
use std::collections::HashMap;

use storefront_protocol::{
    CatalogItem, CategoryFilter, FilterSet, MergedItem, SortKey, Storefront,
};

/// Canonical tab key -> accepted aliases (all already normalized).
const CATEGORY_ALIASES: &[(&str, &[&str])] = &[
    (
        "charger",
        &["charger", "chargers", "charging", "power", "adapter", "cable"],
    ),
    ("cases", &["case", "cases", "cover", "covers", "pouch"]),
    (
        "audio",
        &[
            "audio",
            "headphone",
            "headphones",
            "earphone",
            "earphones",
            "earbuds",
            "speaker",
        ],
    ),
    (
        "screenprotector",
        &["screenprotector", "protector", "temperedglass"],
    ),
    ("powerbank", &["powerbank", "powerbanks", "battery"]),
    (
        "wearables",
        &["wearable", "wearables", "smartwatch", "watch", "fitnessband"],
    ),
    ("grocery", &["grocery", "groceries", "supermarket", "pantry"]),
    ("bakery", &["bakery", "bread", "pastry", "cake", "cakes"]),
    ("pharmacy", &["pharmacy", "chemist", "medicine", "wellness"]),
];

/// Lower-case and strip everything that is not a letter or digit.
pub fn normalize_category(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn aliases_for(tab_key: &str) -> Option<&'static [&'static str]> {
    CATEGORY_ALIASES
        .iter()
        .find(|(key, _)| *key == tab_key)
        .map(|(_, aliases)| *aliases)
}

/// Whether an item labelled `item_category` belongs under the tab `tab_label`.
pub fn category_matches(tab_label: &str, item_category: &str) -> bool {
    let tab = normalize_category(tab_label);
    let item = normalize_category(item_category);
    if tab.is_empty() || item.is_empty() {
        return false;
    }
    match aliases_for(&tab) {
        Some(aliases) => aliases
            .iter()
            .any(|alias| item == *alias || item.contains(alias)),
        None => item == tab,
    }
}

fn matches_category(filter: &CategoryFilter, item: &CatalogItem) -> bool {
    let by_id = match (filter.id, item.category_id) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => false,
    };
    let by_name = match (filter.name.as_deref(), item.category.as_deref()) {
        (Some(tab), Some(label)) => category_matches(tab, label),
        _ => false,
    };
    by_id || by_name
}

/// Filter and sort merged catalog items.
///
/// A rating filter excludes unrated items; fee and ETA ceilings let items
/// without that field through.
pub fn apply(items: &[MergedItem], filters: &FilterSet, sort: Option<SortKey>) -> Vec<MergedItem> {
    let mut out: Vec<MergedItem> = items
        .iter()
        .filter(|merged| item_passes(merged, filters))
        .cloned()
        .collect();
    if let Some(sort) = sort {
        out.sort_by(|a, b| compare_items(a, b, sort));
    }
    out
}

fn item_passes(merged: &MergedItem, filters: &FilterSet) -> bool {
    let item = &merged.item;
    if let Some(range) = filters.price {
        if !range.contains(merged.effective_price) {
            return false;
        }
    }
    if let Some(min) = filters.min_rating {
        if item.rating.map(|r| r < min).unwrap_or(true) {
            return false;
        }
    }
    if let Some(max) = filters.max_delivery_fee {
        if item.delivery_fee.map(|fee| fee > max).unwrap_or(false) {
            return false;
        }
    }
    if let Some(max) = filters.max_eta_minutes {
        if item.eta_minutes.map(|eta| eta > max).unwrap_or(false) {
            return false;
        }
    }
    if let Some(category) = &filters.category {
        if !matches_category(category, item) {
            return false;
        }
    }
    if filters.offers_only && !merged.has_discount {
        return false;
    }
    true
}

fn compare_items(a: &MergedItem, b: &MergedItem, sort: SortKey) -> Ordering {
    match sort {
        SortKey::Rating => descending(a.item.rating.map(f64::from), b.item.rating.map(f64::from)),
        SortKey::Eta => ascending(
            a.item.eta_minutes.map(f64::from),
            b.item.eta_minutes.map(f64::from),
        ),
        SortKey::DeliveryFee => ascending(a.item.delivery_fee, b.item.delivery_fee),
        SortKey::PriceLowHigh => ascending(Some(a.effective_price), Some(b.effective_price)),
        SortKey::PriceHighLow => descending(Some(a.effective_price), Some(b.effective_price)),
        SortKey::Distance => ascending(a.item.distance_km, b.item.distance_km),
    }
}

/// Filter and sort storefronts. Only the rating filter applies here: a
/// storefront's rating is the mean of its rated catalog items, or its own
/// rating when none of its items carry one.
pub fn apply_storefronts(
    storefronts: &[Storefront],
    items: &[CatalogItem],
    filters: &FilterSet,
    sort: Option<SortKey>,
) -> Vec<Storefront> {
    let ratings = aggregate_ratings(items);
    let rating_of = |store: &Storefront| -> Option<f64> {
        ratings
            .get(&store.id)
            .copied()
            .or(store.rating.map(f64::from))
    };

    let mut out: Vec<Storefront> = storefronts
        .iter()
        .filter(|store| match filters.min_rating {
            Some(min) => rating_of(store)
                .map(|rating| rating >= f64::from(min))
                .unwrap_or(false),
            None => true,
        })
        .cloned()
        .collect();

    if let Some(sort) = sort {
        out.sort_by(|a, b| match sort {
            SortKey::Rating => descending(rating_of(a), rating_of(b)),
            SortKey::Eta => ascending(a.eta_minutes.map(f64::from), b.eta_minutes.map(f64::from)),
            SortKey::DeliveryFee => ascending(a.delivery_fee, b.delivery_fee),
            SortKey::Distance => ascending(a.distance_km, b.distance_km),
            SortKey::PriceLowHigh | SortKey::PriceHighLow => Ordering::Equal,
        });
    }
    out
}

fn aggregate_ratings(items: &[CatalogItem]) -> HashMap<u64, f64> {
    let mut sums: HashMap<u64, (f64, u32)> = HashMap::new();
    for item in items {
        if let (Some(store), Some(rating)) = (item.storefront_id, item.rating) {
            let entry = sums.entry(store).or_insert((0.0, 0));
            entry.0 += f64::from(rating);
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(store, (sum, count))| (store, sum / f64::from(count)))
        .collect()
}

fn ascending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
