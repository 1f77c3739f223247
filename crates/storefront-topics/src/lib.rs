//! Canonical event topic constants published by the feed controller.
//!
//! Keep this list alphabetized within sections and favor dot.case names.

// Context
pub const TOPIC_CONTEXT_CHANGED: &str = "context.changed";

// Collections
pub const TOPIC_COLLECTION_APPLIED: &str = "feed.collection.applied";
pub const TOPIC_COLLECTION_FAILED: &str = "feed.collection.failed";
pub const TOPIC_COLLECTION_SUPERSEDED: &str = "feed.collection.superseded";

// Triggers
pub const TOPIC_CATEGORY_HANDOFF: &str = "feed.category.handoff";
pub const TOPIC_LOCATION_DEBOUNCED: &str = "feed.location.debounced";

// Recovery
pub const TOPIC_RELAXATION_FIRED: &str = "feed.relaxation.fired";

/// Every topic above, for subscribers that want to assert coverage.
pub const ALL_TOPICS: &[&str] = &[
    TOPIC_CONTEXT_CHANGED,
    TOPIC_COLLECTION_APPLIED,
    TOPIC_COLLECTION_FAILED,
    TOPIC_COLLECTION_SUPERSEDED,
    TOPIC_CATEGORY_HANDOFF,
    TOPIC_LOCATION_DEBOUNCED,
    TOPIC_RELAXATION_FIRED,
];
