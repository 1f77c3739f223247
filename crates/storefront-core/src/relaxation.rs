use serde::Serialize;
use storefront_protocol::{FilterKey, FilterSet};

/// Filters that are dropped when a first load comes back empty.
pub const RELAXABLE_FILTERS: [FilterKey; 2] = [FilterKey::Category, FilterKey::OffersOnly];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationState {
    Armed,
    Consumed,
}

/// What the primary collection looked like after a render pass.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryRender<'a> {
    pub visible_items: usize,
    pub loading: bool,
    pub filters: &'a FilterSet,
    /// Primary fetches applied so far, this one included.
    pub completed_cycles: u64,
}

/// One-shot recovery from an empty first load under restrictive filters.
#[derive(Debug, Clone)]
pub struct RelaxationPolicy {
    state: RelaxationState,
    enabled: bool,
    first_load_only: bool,
}

impl Default for RelaxationPolicy {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl RelaxationPolicy {
    pub fn new(enabled: bool, first_load_only: bool) -> Self {
        Self {
            state: RelaxationState::Armed,
            enabled,
            first_load_only,
        }
    }

    pub fn state(&self) -> RelaxationState {
        self.state
    }

    /// Returns the filters to clear when the policy fires. Fires at most once
    /// per policy lifetime.
    pub fn observe(&mut self, render: &PrimaryRender<'_>) -> Option<Vec<FilterKey>> {
        if !self.enabled || self.state == RelaxationState::Consumed {
            return None;
        }
        if render.loading || render.visible_items > 0 {
            return None;
        }
        if self.first_load_only && render.completed_cycles != 1 {
            return None;
        }
        let offending: Vec<FilterKey> = RELAXABLE_FILTERS
            .into_iter()
            .filter(|key| render.filters.is_active(*key))
            .collect();
        if offending.is_empty() {
            return None;
        }
        self.state = RelaxationState::Consumed;
        Some(offending)
    }
}
