pub mod assets;
pub mod chat;
pub mod paths;
pub mod schema;

use clap::Args;

pub use assets::DownloadArgs;
pub use chat::ChatArgs;
pub use schema::SchemaArgs;

#[derive(Args)]
pub struct JsonArgs {
    /// Pretty-print JSON
    #[arg(long)]
    pub pretty: bool,
}

pub(crate) fn print_json(value: &serde_json::Value, pretty: bool) {
    if pretty {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        );
    } else {
        println!("{}", value);
    }
}
