use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default, JsonSchema)]
pub struct PriceRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        self.min.map(|min| price >= min).unwrap_or(true)
            && self.max.map(|max| price <= max).unwrap_or(true)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default, JsonSchema)]
pub struct CategoryFilter {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Names of the individual filter slots.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    Price,
    MinRating,
    MaxDeliveryFee,
    MaxEta,
    Category,
    OffersOnly,
}

impl FilterKey {
    pub const ALL: [FilterKey; 6] = [
        FilterKey::Price,
        FilterKey::MinRating,
        FilterKey::MaxDeliveryFee,
        FilterKey::MaxEta,
        FilterKey::Category,
        FilterKey::OffersOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Price => "price",
            FilterKey::MinRating => "min_rating",
            FilterKey::MaxDeliveryFee => "max_delivery_fee",
            FilterKey::MaxEta => "max_eta",
            FilterKey::Category => "category",
            FilterKey::OffersOnly => "offers_only",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FilterViolation {
    #[error("{key} must be a finite, non-negative number (got {value})")]
    OutOfRange { key: FilterKey, value: f64 },
    #[error("price range minimum {min} exceeds maximum {max}")]
    InvertedPriceRange { min: f64, max: f64 },
    #[error("{0} filter is present but carries no value")]
    Empty(FilterKey),
}

/// Active filters. A populated slot means the filter is on; `offers_only`
/// is on when `true`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default, JsonSchema)]
pub struct FilterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delivery_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_eta_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryFilter>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offers_only: bool,
}

impl FilterSet {
    pub fn is_active(&self, key: FilterKey) -> bool {
        match key {
            FilterKey::Price => self.price.is_some(),
            FilterKey::MinRating => self.min_rating.is_some(),
            FilterKey::MaxDeliveryFee => self.max_delivery_fee.is_some(),
            FilterKey::MaxEta => self.max_eta_minutes.is_some(),
            FilterKey::Category => self.category.is_some(),
            FilterKey::OffersOnly => self.offers_only,
        }
    }

    pub fn active_keys(&self) -> Vec<FilterKey> {
        FilterKey::ALL
            .into_iter()
            .filter(|key| self.is_active(*key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active_keys().is_empty()
    }

    pub fn clear(&mut self, key: FilterKey) {
        match key {
            FilterKey::Price => self.price = None,
            FilterKey::MinRating => self.min_rating = None,
            FilterKey::MaxDeliveryFee => self.max_delivery_fee = None,
            FilterKey::MaxEta => self.max_eta_minutes = None,
            FilterKey::Category => self.category = None,
            FilterKey::OffersOnly => self.offers_only = false,
        }
    }

    pub fn validate(&self) -> Result<(), FilterViolation> {
        if let Some(range) = self.price {
            if range.min.is_none() && range.max.is_none() {
                return Err(FilterViolation::Empty(FilterKey::Price));
            }
            for bound in [range.min, range.max].into_iter().flatten() {
                non_negative(FilterKey::Price, bound)?;
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(FilterViolation::InvertedPriceRange { min, max });
                }
            }
        }
        if let Some(rating) = self.min_rating {
            let rating = f64::from(rating);
            if !(0.0..=5.0).contains(&rating) {
                return Err(FilterViolation::OutOfRange {
                    key: FilterKey::MinRating,
                    value: rating,
                });
            }
        }
        if let Some(fee) = self.max_delivery_fee {
            non_negative(FilterKey::MaxDeliveryFee, fee)?;
        }
        if let Some(category) = &self.category {
            let named = category
                .name
                .as_deref()
                .map(|n| !n.trim().is_empty())
                .unwrap_or(false);
            if category.id.is_none() && !named {
                return Err(FilterViolation::Empty(FilterKey::Category));
            }
        }
        Ok(())
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(range) = self.price {
            if let Some(min) = range.min {
                pairs.push(("min_price", min.to_string()));
            }
            if let Some(max) = range.max {
                pairs.push(("max_price", max.to_string()));
            }
        }
        if let Some(rating) = self.min_rating {
            pairs.push(("min_rating", rating.to_string()));
        }
        if let Some(fee) = self.max_delivery_fee {
            pairs.push(("max_delivery_fee", fee.to_string()));
        }
        if let Some(eta) = self.max_eta_minutes {
            pairs.push(("max_eta", eta.to_string()));
        }
        if let Some(category) = &self.category {
            if let Some(id) = category.id {
                pairs.push(("category_id", id.to_string()));
            }
            if let Some(name) = &category.name {
                pairs.push(("category", name.clone()));
            }
        }
        if self.offers_only {
            pairs.push(("offers_only", "true".to_string()));
        }
        pairs
    }
}

fn non_negative(key: FilterKey, value: f64) -> Result<(), FilterViolation> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterViolation::OutOfRange { key, value })
    }
}
