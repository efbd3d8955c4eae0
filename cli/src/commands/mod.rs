//! Subcommand implementations

pub mod find;
pub mod gc;
pub mod get;
pub mod import;
pub mod merge;
pub mod services;

use crate::output;
use anyhow::{Context, Result};
use aperture_shared::utils::time::parse_time;
use aperture_shared::{Labels, ProfileType};
use aperture_store::{FindProfilesParams, MergeOutcome};
use chrono::{Duration, Utc};
use clap::Args;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Query flags shared by `find` and `merge`
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Service name
    #[arg(short, long)]
    pub service: String,

    /// Profile type (cpu, heap, contention, mutex-contention, live-stacks, thread-creation, trace, other); all when unset
    #[arg(short = 't', long = "type")]
    pub profile_type: Option<ProfileType>,

    /// Labels the profiles must carry (e.g. az=home,host=local,version=1.0)
    #[arg(short, long)]
    pub labels: Option<Labels>,

    /// Start of the time window (RFC3339 or unix seconds); defaults to one hour ago
    #[arg(long)]
    pub from: Option<String>,

    /// End of the time window; defaults to now
    #[arg(long)]
    pub to: Option<String>,

    /// Maximum number of profiles
    #[arg(long, default_value = "0")]
    pub limit: usize,
}

impl FilterArgs {
    pub fn to_params(&self) -> Result<FindProfilesParams> {
        let from = match &self.from {
            Some(s) => parse_time(s).context("Failed to parse --from")?,
            None => Utc::now() - Duration::hours(1),
        };
        let to = match &self.to {
            Some(s) => Some(parse_time(s).context("Failed to parse --to")?),
            None => None,
        };

        Ok(FindProfilesParams {
            service: self.service.clone(),
            profile_type: self.profile_type.unwrap_or_default(),
            labels: self.labels.clone().unwrap_or_default(),
            created_at_min: Some(from),
            created_at_max: to,
            limit: self.limit,
        })
    }
}

/// Open the destination of a merge.
pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Report a merge written to `path`. The file is removed unless a profile
/// was actually written.
pub fn finish_merge(
    result: aperture_store::Result<MergeOutcome>,
    mut dst: BufWriter<File>,
    path: &Path,
) -> Result<()> {
    let outcome = match result {
        Ok(MergeOutcome::Written { profiles }) => {
            dst.flush()?;
            profiles
        }
        Ok(MergeOutcome::Empty) => {
            drop(dst);
            std::fs::remove_file(path)?;
            output::warning("Matching profiles contain no samples, nothing written");
            return Ok(());
        }
        Err(e) => {
            drop(dst);
            let _ = std::fs::remove_file(path);
            return Err(e.into());
        }
    };
    output::success(&format!(
        "Wrote merge of {} profiles to {}",
        outcome,
        path.display()
    ));
    Ok(())
}
