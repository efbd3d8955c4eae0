//! Find command implementation

use super::FilterArgs;
use crate::output;
use anyhow::Result;
use aperture_store::{Backends, Context, Querier};
use clap::Args;

#[derive(Args, Debug)]
pub struct FindArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Print the metadata as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(ctx: &Context, backends: &Backends, args: FindArgs) -> Result<()> {
    let params = args.filter.to_params()?;
    let metas = Querier::new(backends.reader.clone())
        .find_profiles(ctx, &params)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metas)?);
        return Ok(());
    }

    output::info(&format!("{} profile(s) for {}", metas.len(), params.service));
    output::print_metas(&metas);
    Ok(())
}
