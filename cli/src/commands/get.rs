//! Get command implementation

use crate::output;
use anyhow::{Context as _, Result};
use aperture_shared::ProfileId;
use aperture_store::{Backends, Context, Querier};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Profile ids
    #[arg(required = true)]
    pub ids: Vec<ProfileId>,

    /// Write the merge of all given profiles to this file instead of printing summaries
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of stacks shown per profile
    #[arg(long, default_value = "10")]
    pub top: usize,
}

pub async fn run(ctx: &Context, backends: &Backends, args: GetArgs) -> Result<()> {
    let querier = Querier::new(backends.reader.clone());

    let Some(path) = &args.output else {
        for id in &args.ids {
            let profile = querier
                .get_profile(ctx, *id)
                .await
                .with_context(|| format!("Failed to load profile {}", id))?;
            println!("\n=== Profile {} ===", id);
            output::print_profile_summary(&profile, args.top);
        }
        return Ok(());
    };

    let mut dst = super::create_output(path)?;
    let result = querier.get_profiles_to(ctx, &mut dst, &args.ids).await;
    super::finish_merge(result, dst, path)
}
