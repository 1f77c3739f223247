//! Joins promotional overlays onto catalog items. The result is derived on
//! every read and never stored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use storefront_protocol::{CatalogItem, MergedItem, OverlayRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discount {
    pub effective_price: f64,
    pub has_discount: bool,
    pub percent: u32,
}

/// Derive discount metadata for one item and its overlay, if any.
///
/// The comparison price is the item's `compare_price`, else its own price.
/// When prices alone show no reduction an explicit percentage still counts.
pub fn derive_discount(item: &CatalogItem, overlay: Option<&OverlayRecord>) -> Discount {
    let effective_price = overlay.map(|o| o.price).unwrap_or(item.price);
    let compare_price = item.compare_price.unwrap_or(item.price);
    let explicit_percent = overlay
        .and_then(|o| o.discount_percent)
        .or(item.discount_percent)
        .filter(|pct| pct.is_finite() && *pct > 0.0);

    let computed = if compare_price > 0.0 && compare_price > effective_price {
        ((compare_price - effective_price) / compare_price * 100.0)
            .round()
            .clamp(0.0, 100.0) as u32
    } else {
        0
    };
    let percent = if computed > 0 {
        computed
    } else {
        explicit_percent
            .map(|pct| pct.round().clamp(0.0, 100.0) as u32)
            .unwrap_or(0)
    };

    Discount {
        effective_price,
        has_discount: compare_price > effective_price || item.on_offer || explicit_percent.is_some(),
        percent,
    }
}

/// Attach overlays to primary items by id. Items keep their original price;
/// items without an overlay pass through with their own discount metadata.
/// If the overlay lists an id twice the later record wins.
pub fn merge(primary: &[CatalogItem], overlay: &[OverlayRecord]) -> Vec<MergedItem> {
    let by_id: HashMap<u64, &OverlayRecord> = overlay.iter().map(|rec| (rec.id, rec)).collect();
    primary
        .iter()
        .map(|item| {
            let rec = by_id.get(&item.id).copied();
            let discount = derive_discount(item, rec);
            MergedItem {
                item: item.clone(),
                overlay_price: rec.map(|r| r.price),
                valid_from: rec.and_then(|r| r.valid_from),
                valid_until: rec.and_then(|r| r.valid_until),
                effective_price: discount.effective_price,
                has_discount: discount.has_discount,
                discount_percent: discount.percent,
            }
        })
        .collect()
}

/// Like [`merge`], ignoring overlays whose validity window excludes `now`.
pub fn merge_active(
    primary: &[CatalogItem],
    overlay: &[OverlayRecord],
    now: DateTime<Utc>,
) -> Vec<MergedItem> {
    let active: Vec<OverlayRecord> = overlay
        .iter()
        .filter(|rec| rec.is_active_at(now))
        .cloned()
        .collect();
    merge(primary, &active)
}
