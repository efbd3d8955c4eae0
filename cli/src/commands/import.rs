//! Import command implementation

use crate::output;
use anyhow::{Context as _, Result};
use aperture_shared::utils::time::parse_time;
use aperture_shared::{Labels, Meta, ProfileType};
use aperture_store::{Backends, Collector, Context, ProfileBody, WriteProfileParams};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Artifact files to store
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Service the profiles belong to
    #[arg(short, long)]
    pub service: String,

    /// Profile type (cpu, heap, contention, mutex-contention, live-stacks, thread-creation, trace, other)
    #[arg(short = 't', long = "type")]
    pub profile_type: ProfileType,

    /// Profile labels (e.g. az=home,host=local,version=1.0)
    #[arg(short, long)]
    pub labels: Option<Labels>,

    /// Creation time (RFC3339 or unix seconds); defaults to the artifact's own timestamp
    #[arg(long)]
    pub created_at: Option<String>,

    /// Print the stored metadata as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(ctx: &Context, backends: &Backends, args: ImportArgs) -> Result<()> {
    let created_at = match &args.created_at {
        Some(s) => Some(parse_time(s).context("Failed to parse --created-at")?),
        None => None,
    };
    let params = WriteProfileParams {
        service: args.service.clone(),
        profile_type: args.profile_type,
        external_id: None,
        labels: args.labels.clone().unwrap_or_default(),
        created_at,
    };

    let collector = Collector::new(backends.writer.clone());
    let progress = if args.files.len() > 1 && !args.json {
        let pb = ProgressBar::new(args.files.len() as u64);
        pb.set_style(ProgressStyle::with_template(
            "{spinner} [{bar:30}] {pos}/{len} {msg}",
        )?);
        Some(pb)
    } else {
        None
    };

    let mut stored: Vec<Meta> = Vec::with_capacity(args.files.len());
    for path in &args.files {
        if let Some(pb) = &progress {
            pb.set_message(path.display().to_string());
        }
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let meta = collector
            .write_profile(ctx, &params, ProfileBody::Stream(Box::new(file)))
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;

        match &progress {
            Some(pb) => pb.inc(1),
            None if !args.json => output::success(&format!(
                "Stored {} as {} ({})",
                path.display(),
                meta.profile_id,
                meta.created_at.to_rfc3339()
            )),
            None => {}
        }
        stored.push(meta);
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
        output::success(&format!(
            "Stored {} {} profiles for {}",
            stored.len(),
            args.profile_type,
            args.service
        ));
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    }

    Ok(())
}
