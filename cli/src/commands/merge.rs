//! Merge command implementation

use super::FilterArgs;
use anyhow::Result;
use aperture_store::{Backends, Context, Querier};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Destination file for the merged artifact
    #[arg(short, long)]
    pub output: PathBuf,
}

pub async fn run(ctx: &Context, backends: &Backends, args: MergeArgs) -> Result<()> {
    let params = args.filter.to_params()?;
    let querier = Querier::new(backends.reader.clone());

    let mut dst = super::create_output(&args.output)?;
    let result = querier.find_merge_profile_to(ctx, &mut dst, &params).await;
    super::finish_merge(result, dst, &args.output)
}
