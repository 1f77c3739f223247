//! Location-aware feed synchronization: a query context, independently
//! fetched collections with last-issued-wins ordering, stale-while-revalidate
//! caching, trigger routing and client-side filter, sort and overlay merge.

pub mod cache;
pub mod collab;
pub mod config;
pub mod context;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod overlay;
pub mod relaxation;
pub mod snapshot;
pub mod triggers;
pub mod util;


pub use cache::{CollectionName, CollectionView, Retention, SwrCache};
pub use collab::{
    CatalogSource, CategorySelection, Clock, GeoResolver, LoggingNavigator, Navigator,
    StaticGeoResolver, SystemClock,
};
pub use config::{load_config, FeedConfig};
pub use context::{ChangeKind, ContextStore};
pub use controller::{Collaborators, FeedController, FeedView};
pub use coordinator::{FetchCoordinator, FetchHandle, FetchOutcome};
pub use error::{CollectionError, ErrorKind, FeedError, NetworkError, ResolutionError, SnapshotError};
pub use relaxation::{RelaxationPolicy, RelaxationState};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use triggers::TriggerEvent;

pub use storefront_protocol as protocol;
