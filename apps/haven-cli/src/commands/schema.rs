use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use haven_core::{config_schema_json, write_schema_file};

#[derive(Args)]
pub struct SchemaArgs {
    /// Write to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.out {
        Some(path) => {
            write_schema_file(&path).with_context(|| format!("write {}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&config_schema_json())?),
    }
    Ok(())
}
