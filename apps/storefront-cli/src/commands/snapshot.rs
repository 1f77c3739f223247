use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{Map, Value};
use storefront_core::{CollectionName, FeedConfig, SnapshotStore};

#[derive(Subcommand, Debug)]
pub enum SnapshotCmd {
    /// Print the stored snapshot of every collection (JSON)
    Show(ShowArgs),
    /// Remove the stored snapshots for the session
    Clear,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Pretty-print JSON
    #[arg(long)]
    pub pretty: bool,
}

pub fn run(cfg: FeedConfig, cmd: SnapshotCmd) -> Result<()> {
    let store = super::snapshot_store(&cfg);
    match cmd {
        SnapshotCmd::Show(args) => {
            let mut out = Map::new();
            for collection in CollectionName::ALL {
                let value = match store.get(&collection.snapshot_key()) {
                    Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                    None => Value::Null,
                };
                out.insert(collection.as_str().to_string(), value);
            }
            super::print_json(&Value::Object(out), args.pretty)
        }
        SnapshotCmd::Clear => {
            for collection in CollectionName::ALL {
                store
                    .remove(&collection.snapshot_key())
                    .with_context(|| format!("clearing {collection} snapshot"))?;
            }
            println!("Cleared snapshots in {}", store.dir().display());
            Ok(())
        }
    }
}
