mod support;

use std::sync::Arc;
use std::time::Duration;

use storefront_core::{
    CategorySelection, FeedConfig, FeedError, MemorySnapshotStore, NetworkError, RelaxationState,
    ResolutionError, SnapshotStore, TriggerEvent,
};
use storefront_core::coordinator::listing;
use storefront_protocol::{
    CatalogItem, CategoryFilter, ContextPatch, Coordinates, DeliveryMode, FilterSet,
    OverlayRecord, PriceRange, SortKey, Storefront,
};
use storefront_topics as topics;
use support::*;

fn item(id: u64, name: &str, price: f64) -> CatalogItem {
    CatalogItem::new(id, name, price)
}

fn ids(items: &[CatalogItem]) -> Vec<u64> {
    items.iter().map(|item| item.id).collect()
}

async fn loaded(h: &Harness, rows: &[CatalogItem]) {
    h.catalog.reply(PRIMARY, rows);
    h.controller
        .start(ContextPatch::default().with_coordinates(home()))
        .await
        .unwrap();
    h.controller.idle().await;
}

#[tokio::test]
async fn older_response_arriving_last_is_dropped() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    let gate_a = h.catalog.gate(PRIMARY);
    let gate_b = h.catalog.gate(PRIMARY);

    h.controller
        .start(ContextPatch::default().with_coordinates(home()))
        .await
        .unwrap();
    h.controller
        .emit(TriggerEvent::PriceFilter(Some(PriceRange {
            min: Some(1.0),
            max: Some(50.0),
        })))
        .unwrap();
    assert_eq!(h.controller.primary().sequence_issued, 2);

    gate_b.send(Ok(listing(&[item(2, "fresh", 5.0)]))).unwrap();
    next_event(&mut rx, topics::TOPIC_COLLECTION_APPLIED, |p| {
        p["collection"] == "primary" && p["token"] == 2
    })
    .await;
    gate_a.send(Ok(listing(&[item(1, "stale", 5.0)]))).unwrap();
    let superseded = next_event(&mut rx, topics::TOPIC_COLLECTION_SUPERSEDED, |p| {
        p["collection"] == "primary"
    })
    .await;
    assert_eq!(superseded.payload["token"], 1);
    h.controller.idle().await;

    let view = h.controller.primary();
    assert_eq!(ids(view.data.as_ref().unwrap()), vec![2]);
    assert_eq!(view.sequence_applied, 2);
    assert!(!view.loading);
}

#[tokio::test]
async fn mode_switch_clears_previous_data_immediately() {
    let h = harness();
    loaded(&h, &[item(1, "delivery only", 3.0)]).await;
    assert_eq!(h.controller.feed().items.len(), 1);

    let gate = h.catalog.gate(PRIMARY);
    let change = h
        .controller
        .update_context(ContextPatch::default().with_delivery_mode(DeliveryMode::Pickup))
        .await
        .unwrap();
    assert!(change.mode_changed);

    let view = h.controller.primary();
    assert!(view.loading);
    assert!(view.previous_data.is_none());
    assert!(view.visible().is_none());
    let feed = h.controller.feed();
    assert!(feed.items.is_empty());
    assert!(!feed.stale);

    gate.send(Ok(listing(&[item(5, "pickup", 4.0)]))).unwrap();
    h.controller.idle().await;
    assert_eq!(ids(h.controller.primary().visible().unwrap()), vec![5]);
    let urls = h.catalog.calls_to(PRIMARY);
    assert!(urls.last().unwrap().query().unwrap().contains("mode=pickup"));
}

#[tokio::test]
async fn refreshable_change_keeps_showing_last_results() {
    let h = harness();
    loaded(&h, &[item(1, "a", 3.0), item(2, "b", 4.0)]).await;

    let gate = h.catalog.gate(PRIMARY);
    h.controller
        .emit(TriggerEvent::Sort(Some(SortKey::PriceHighLow)))
        .unwrap();
    let view = h.controller.primary();
    assert!(view.loading);
    assert_eq!(ids(view.previous_data.as_ref().unwrap()), vec![1, 2]);
    let feed = h.controller.feed();
    assert!(feed.stale && feed.loading);
    let shown: Vec<u64> = feed.items.iter().map(|m| m.item.id).collect();
    assert_eq!(shown, vec![2, 1]);

    gate.send(Ok(listing(&[item(3, "c", 9.0)]))).unwrap();
    h.controller.idle().await;
    let view = h.controller.primary();
    assert!(view.previous_data.is_none());
    assert_eq!(ids(view.visible().unwrap()), vec![3]);
    assert!(h.catalog.calls_to(PRIMARY)[1]
        .query()
        .unwrap()
        .contains("sort=price_high_low"));
}

#[tokio::test]
async fn failed_refresh_is_non_blocking_next_to_last_known_good() {
    let h = harness();
    loaded(&h, &[item(1, "kept", 3.0)]).await;

    h.catalog
        .fail(PRIMARY, NetworkError::Transport("connection reset".into()));
    h.controller.emit(TriggerEvent::TimeFilter(Some(25))).unwrap();
    h.controller.idle().await;

    let view = h.controller.primary();
    let error = view.error.clone().unwrap();
    assert!(!error.blocking);
    assert!(!view.loading);
    assert_eq!(ids(view.visible().unwrap()), vec![1]);
    let feed = h.controller.feed();
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.error.unwrap().message, error.message);
}

#[tokio::test]
async fn failed_invalidating_fetch_blocks() {
    let h = harness();
    loaded(&h, &[item(1, "delivery", 3.0)]).await;

    h.catalog.fail(
        PRIMARY,
        NetworkError::Status {
            status: 502,
            url: "http://127.0.0.1:8080/api/products".into(),
        },
    );
    h.controller
        .update_context(ContextPatch::default().with_delivery_mode(DeliveryMode::Pickup))
        .await
        .unwrap();
    h.controller.idle().await;

    let view = h.controller.primary();
    assert!(view.error.as_ref().unwrap().blocking);
    assert!(view.visible().is_none());
}

#[tokio::test]
async fn empty_first_load_relaxes_filters_once() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.catalog
        .reply(PRIMARY, &[item(1, "anything", 3.0), item(2, "else", 4.0)]);

    let restrictive = FilterSet {
        category: Some(CategoryFilter {
            id: Some(99),
            name: None,
        }),
        offers_only: true,
        ..Default::default()
    };
    h.controller
        .start(
            ContextPatch::default()
                .with_coordinates(home())
                .with_filters(restrictive),
        )
        .await
        .unwrap();
    h.controller.idle().await;

    let fired = next_event(&mut rx, topics::TOPIC_RELAXATION_FIRED, |_| true).await;
    assert_eq!(
        fired.payload["cleared"],
        serde_json::json!(["category", "offers_only"])
    );
    assert_eq!(h.controller.relaxation_state(), RelaxationState::Consumed);
    assert!(h.controller.context().filters.is_empty());

    let primary_calls = h.catalog.calls_to(PRIMARY);
    assert_eq!(primary_calls.len(), 2);
    assert!(primary_calls[0].query().unwrap().contains("category_id=99"));
    let reload = primary_calls[1].query().unwrap();
    assert!(!reload.contains("category_id") && !reload.contains("offers_only"));
    assert_eq!(h.catalog.calls_to(SECONDARY).len(), 2);
    assert_eq!(h.controller.feed().items.len(), 2);

    // Later empty results under an offers filter do not relax again.
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.controller.emit(TriggerEvent::OffersFilter(true)).unwrap();
    h.controller.idle().await;
    assert!(h.controller.context().filters.offers_only);
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 3);
    assert!(h.controller.feed().items.is_empty());
}

#[tokio::test]
async fn relaxation_can_be_disabled() {
    let mut config = FeedConfig::default();
    config.relaxation.enabled = false;
    let h = harness_with(config, Arc::new(MemorySnapshotStore::new()));
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.controller
        .start(
            ContextPatch::default()
                .with_coordinates(home())
                .with_filters(FilterSet {
                    offers_only: true,
                    ..Default::default()
                }),
        )
        .await
        .unwrap();
    h.controller.idle().await;
    assert_eq!(h.controller.relaxation_state(), RelaxationState::Armed);
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 1);
}

#[tokio::test]
async fn consumed_relaxation_never_fires_again_even_on_later_empty_loads() {
    let mut config = FeedConfig::default();
    config.relaxation.first_load_only = false;
    let h = harness_with(config, Arc::new(MemorySnapshotStore::new()));
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.controller
        .start(
            ContextPatch::default()
                .with_coordinates(home())
                .with_filters(FilterSet {
                    category: Some(CategoryFilter {
                        id: Some(99),
                        name: None,
                    }),
                    ..Default::default()
                }),
        )
        .await
        .unwrap();
    h.controller.idle().await;

    assert_eq!(h.controller.relaxation_state(), RelaxationState::Consumed);
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 2);
    assert!(h.controller.feed().items.is_empty());

    // Not a first load and still empty under a relaxable filter.
    h.catalog.reply::<CatalogItem>(PRIMARY, &[]);
    h.controller.emit(TriggerEvent::OffersFilter(true)).unwrap();
    h.controller.idle().await;
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 3);
    assert!(h.controller.context().filters.offers_only);
    assert!(h.catalog.calls_to(PRIMARY)[2]
        .query()
        .unwrap()
        .contains("offers_only=true"));
}

#[tokio::test(start_paused = true)]
async fn location_updates_are_debounced_to_the_last_one() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    loaded(&h, &[item(1, "a", 3.0)]).await;

    h.controller
        .emit(TriggerEvent::LocationUpdated(Coordinates::new(40.0, -74.0)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.controller
        .emit(TriggerEvent::LocationUpdated(Coordinates::new(40.7128, -74.006)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 1);

    h.controller.idle().await;
    let primary_calls = h.catalog.calls_to(PRIMARY);
    assert_eq!(primary_calls.len(), 2);
    assert!(primary_calls[1].query().unwrap().contains("lat=40.7128"));
    assert_eq!(h.catalog.calls_to(SECONDARY).len(), 2);
    assert_eq!(h.catalog.calls_to(OVERLAY).len(), 1);
    assert_eq!(
        h.controller.context().coordinates,
        Some(Coordinates::new(40.7128, -74.006))
    );
    let debounced = next_event(&mut rx, topics::TOPIC_LOCATION_DEBOUNCED, |_| true).await;
    assert_eq!(debounced.payload["changed"], true);
}

#[tokio::test(start_paused = true)]
async fn unchanged_location_after_debounce_is_a_no_op() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    loaded(&h, &[item(1, "a", 3.0)]).await;

    h.controller
        .emit(TriggerEvent::LocationUpdated(home()))
        .unwrap();
    h.controller.idle().await;
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 1);
    let debounced = next_event(&mut rx, topics::TOPIC_LOCATION_DEBOUNCED, |_| true).await;
    assert_eq!(debounced.payload["changed"], false);
}

#[tokio::test]
async fn invalid_location_update_is_rejected() {
    let h = harness();
    loaded(&h, &[]).await;
    let err = h
        .controller
        .emit(TriggerEvent::LocationUpdated(Coordinates::new(0.0, 200.0)))
        .unwrap_err();
    assert!(matches!(err, FeedError::InvalidCoordinates { .. }));
}

#[tokio::test]
async fn category_selection_navigates_instead_of_refetching() {
    let h = harness();
    loaded(&h, &[item(1, "a", 3.0)]).await;
    let selection = CategorySelection {
        id: Some(12),
        label: "Chargers".into(),
    };
    h.controller
        .emit(TriggerEvent::CategorySelected(selection.clone()))
        .unwrap();
    h.controller.idle().await;
    assert_eq!(*h.navigator.opened.lock().unwrap(), vec![selection]);
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 1);
    assert!(h.controller.context().filters.category.is_none());
}

#[tokio::test]
async fn rating_filter_refetches_storefronts_and_filters_by_member_ratings() {
    let h = harness();
    let mut good = item(1, "good", 3.0);
    good.storefront_id = Some(10);
    good.rating = Some(4.8);
    let mut poor = item(2, "poor", 3.0);
    poor.storefront_id = Some(20);
    poor.rating = Some(2.0);
    h.catalog
        .reply(SECONDARY, &[Storefront::new(10, "Good"), Storefront::new(20, "Poor")]);
    loaded(&h, &[good.clone(), poor.clone()]).await;
    assert_eq!(h.controller.feed().storefronts.len(), 2);

    h.catalog.reply(PRIMARY, &[good, poor]);
    h.catalog
        .reply(SECONDARY, &[Storefront::new(10, "Good"), Storefront::new(20, "Poor")]);
    h.controller
        .emit(TriggerEvent::RatingFilter(Some(4.0)))
        .unwrap();
    h.controller.idle().await;

    assert_eq!(h.catalog.calls_to(SECONDARY).len(), 2);
    assert_eq!(h.catalog.calls_to(OVERLAY).len(), 1);
    let feed = h.controller.feed();
    let stores: Vec<u64> = feed.storefronts.iter().map(|s| s.id).collect();
    assert_eq!(stores, vec![10]);
    let items: Vec<u64> = feed.items.iter().map(|m| m.item.id).collect();
    assert_eq!(items, vec![1]);
}

#[tokio::test]
async fn overlay_prices_merge_into_the_feed() {
    let h = harness();
    h.catalog.reply(
        OVERLAY,
        &[
            OverlayRecord {
                id: 7,
                price: 8.0,
                valid_from: None,
                valid_until: Some("2030-03-02T00:00:00Z".parse().unwrap()),
                discount_percent: None,
            },
            OverlayRecord {
                id: 8,
                price: 1.0,
                valid_from: None,
                valid_until: Some("2030-02-01T00:00:00Z".parse().unwrap()),
                discount_percent: None,
            },
        ],
    );
    loaded(&h, &[item(7, "cable", 10.0), item(8, "plug", 4.0)]).await;

    let feed = h.controller.feed();
    let cable = feed.items.iter().find(|m| m.item.id == 7).unwrap();
    assert_eq!(cable.effective_price, 8.0);
    assert_eq!(cable.item.price, 10.0);
    assert!(cable.has_discount);
    assert_eq!(cable.discount_percent, 20);
    let plug = feed.items.iter().find(|m| m.item.id == 8).unwrap();
    assert_eq!(plug.effective_price, 4.0);
    assert!(!plug.has_discount);
}

#[tokio::test]
async fn snapshot_is_rendered_before_the_first_fetch_lands() {
    let snapshots = Arc::new(MemorySnapshotStore::new());
    snapshots
        .set(
            "snapshot.primary",
            &serde_json::to_string(&vec![item(4, "cached", 2.0)]).unwrap(),
        )
        .unwrap();
    let h = harness_with(FeedConfig::default(), snapshots);
    let gate = h.catalog.gate(PRIMARY);

    h.controller
        .start(ContextPatch::default().with_coordinates(home()))
        .await
        .unwrap();
    let feed = h.controller.feed();
    assert!(feed.stale);
    assert_eq!(feed.items[0].item.id, 4);

    gate.send(Ok(listing(&[item(5, "live", 2.0)]))).unwrap();
    h.controller.idle().await;
    assert_eq!(ids(h.controller.primary().visible().unwrap()), vec![5]);
    let persisted = h.snapshots.get("snapshot.primary").unwrap();
    assert!(persisted.contains("\"live\""));
}

#[tokio::test]
async fn postal_code_is_geocoded_when_no_coordinates_are_given() {
    let h = harness();
    h.controller
        .start(ContextPatch::default().with_postal_code("10001"))
        .await
        .unwrap();
    h.controller.idle().await;
    assert_eq!(
        *h.geo.asked.lock().unwrap(),
        vec![Some("10001".to_string())]
    );
    assert_eq!(h.controller.context().coordinates, Some(home()));
}

#[tokio::test]
async fn resolution_failure_falls_back_to_default_location() {
    let mut config = FeedConfig::default();
    config.default_location.lat = 48.8566;
    config.default_location.lng = 2.3522;
    let catalog = Arc::new(ScriptedCatalog::default());
    let controller = storefront_core::FeedController::new(
        config,
        storefront_core::Collaborators {
            catalog: catalog.clone(),
            geo: Arc::new(FakeGeo::answering(Err(ResolutionError::UnknownPostalCode(
                "00000".into(),
            )))),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            navigator: Arc::new(RecordingNavigator::default()),
            clock: Arc::new(FixedClock(noon())),
        },
    )
    .unwrap();
    controller
        .start(ContextPatch::default().with_postal_code("00000"))
        .await
        .unwrap();
    controller.idle().await;
    assert_eq!(
        controller.context().coordinates,
        Some(Coordinates::new(48.8566, 2.3522))
    );
    assert!(catalog.calls_to(PRIMARY)[0]
        .query()
        .unwrap()
        .contains("lat=48.8566"));
}

#[tokio::test]
async fn location_and_mode_change_together_still_discard_previous_data() {
    let h = harness();
    loaded(&h, &[item(1, "delivery near home", 3.0)]).await;

    let gate = h.catalog.gate(PRIMARY);
    let change = h
        .controller
        .update_context(
            ContextPatch::default()
                .with_coordinates(Coordinates::new(40.7128, -74.006))
                .with_delivery_mode(DeliveryMode::Pickup),
        )
        .await
        .unwrap();
    assert!(change.location_changed && change.mode_changed);

    let primary = h.controller.primary();
    assert!(primary.loading);
    assert!(primary.previous_data.is_none());
    assert!(primary.visible().is_none());
    assert!(h.controller.secondary().previous_data.is_none());
    let feed = h.controller.feed();
    assert!(feed.items.is_empty());
    assert!(!feed.stale);

    gate.send(Ok(listing(&[item(8, "pickup uptown", 6.0)]))).unwrap();
    h.controller.idle().await;
    assert_eq!(ids(h.controller.primary().visible().unwrap()), vec![8]);
    let query = h.catalog.calls_to(PRIMARY).last().unwrap().query().unwrap().to_string();
    assert!(query.contains("lat=40.7128") && query.contains("mode=pickup"), "{query}");
    assert_eq!(h.catalog.calls_to(OVERLAY).len(), 2);
}

#[tokio::test]
async fn refetching_trigger_before_start_is_rejected() {
    let h = harness();
    let err = h
        .controller
        .emit(TriggerEvent::OffersFilter(true))
        .unwrap_err();
    assert!(matches!(err, FeedError::NotStarted));
    h.controller.idle().await;
    assert!(h.catalog.calls_to(PRIMARY).is_empty());
    assert!(!h.controller.context().filters.offers_only);
    assert_eq!(h.controller.relaxation_state(), RelaxationState::Armed);
}

#[tokio::test]
async fn filter_update_before_start_resolves_a_location_first() {
    let h = harness();
    h.controller
        .update_context(ContextPatch::default().with_filters(FilterSet {
            offers_only: true,
            ..Default::default()
        }))
        .await
        .unwrap();
    h.controller.idle().await;

    assert_eq!(*h.geo.asked.lock().unwrap(), vec![None]);
    assert_eq!(h.controller.context().coordinates, Some(home()));
    let primary_calls = h.catalog.calls_to(PRIMARY);
    assert!(!primary_calls.is_empty());
    for url in &primary_calls {
        assert!(url.query().unwrap().contains("lat=51.5074"), "{url}");
    }
}

#[tokio::test]
async fn new_postal_code_is_geocoded_and_moves_the_feed() {
    let westminster = Coordinates::new(51.501, -0.1419);
    let h = harness_locating(westminster);
    h.controller
        .start(ContextPatch::default().with_coordinates(Coordinates::new(40.0, -3.0)))
        .await
        .unwrap();
    h.controller.idle().await;
    assert!(h.geo.asked.lock().unwrap().is_empty());

    let change = h
        .controller
        .update_context(ContextPatch::default().with_postal_code("SW1A 1AA"))
        .await
        .unwrap();
    h.controller.idle().await;
    assert!(change.location_changed);
    assert_eq!(
        *h.geo.asked.lock().unwrap(),
        vec![Some("SW1A 1AA".to_string())]
    );
    assert_eq!(h.controller.context().coordinates, Some(westminster));
    let primary_calls = h.catalog.calls_to(PRIMARY);
    assert_eq!(primary_calls.len(), 2);
    assert!(primary_calls[1].query().unwrap().contains("lat=51.501"));

    // Same code again: nothing to resolve, nothing to refetch.
    let change = h
        .controller
        .update_context(ContextPatch::default().with_postal_code("SW1A 1AA"))
        .await
        .unwrap();
    h.controller.idle().await;
    assert!(change.is_empty());
    assert_eq!(h.geo.asked.lock().unwrap().len(), 1);
    assert_eq!(h.catalog.calls_to(PRIMARY).len(), 2);
}

#[tokio::test]
async fn out_of_range_default_location_is_refused_up_front() {
    let mut config = FeedConfig::default();
    config.default_location.lat = 123.0;
    let result = storefront_core::FeedController::new(
        config,
        storefront_core::Collaborators {
            catalog: Arc::new(ScriptedCatalog::default()),
            geo: Arc::new(FakeGeo::answering(Ok(home()))),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            navigator: Arc::new(RecordingNavigator::default()),
            clock: Arc::new(FixedClock(noon())),
        },
    );
    assert!(matches!(
        result,
        Err(FeedError::InvalidCoordinates { lat, .. }) if lat == 123.0
    ));
}

#[tokio::test]
async fn shutdown_abandons_in_flight_work() {
    let h = harness();
    let _gate = h.catalog.gate(PRIMARY);
    h.controller
        .start(ContextPatch::default().with_coordinates(home()))
        .await
        .unwrap();
    assert!(h.controller.primary().loading);

    h.controller.shutdown();
    assert!(!h.controller.primary().loading);
    assert!(matches!(
        h.controller.emit(TriggerEvent::FiltersCleared),
        Err(FeedError::ShutDown)
    ));
    h.controller.idle().await;
}
