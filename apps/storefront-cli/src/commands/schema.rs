use anyhow::{Context, Result};
use clap::Args;
use storefront_core::config::{config_schema_json, write_schema_file};

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write to this path instead of stdout
    #[arg(long)]
    pub out: Option<String>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.out {
        Some(path) => {
            write_schema_file(&path).with_context(|| format!("writing schema to {path}"))?;
            println!("Wrote {path}");
            Ok(())
        }
        None => super::print_json(&config_schema_json(), true),
    }
}
