use anyhow::Result;
use haven_core::Settings;

use super::{print_json, JsonArgs};

pub fn run(settings: &Settings, args: JsonArgs) -> Result<()> {
    print_json(&settings.summary_json(), args.pretty);
    Ok(())
}
