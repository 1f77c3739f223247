use anyhow::Result;
use storefront_core::{load_config, FeedConfig, FileSnapshotStore};

pub mod feed;
pub mod schema;
pub mod snapshot;

pub use feed::FeedArgs;
pub use schema::SchemaArgs;
pub use snapshot::SnapshotCmd;

pub fn load(path: Option<&str>) -> Result<FeedConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut cfg = FeedConfig::default();
            cfg.apply_env_overrides();
            Ok(cfg)
        }
    }
}

pub fn snapshot_store(cfg: &FeedConfig) -> FileSnapshotStore {
    match cfg.snapshot.dir_path() {
        Some(dir) => FileSnapshotStore::new(dir, &cfg.snapshot.session),
        None => FileSnapshotStore::in_cache_dir(&cfg.snapshot.session),
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
