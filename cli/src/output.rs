//! Output formatting utilities for CLI commands

use aperture_shared::{Meta, Profile};
use colored::Colorize;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print one line per stored profile
pub fn print_metas(metas: &[Meta]) {
    println!(
        "{:<36}  {:<25}  {:<16}  {}",
        "ID".bold(),
        "CREATED".bold(),
        "TYPE".bold(),
        "LABELS".bold()
    );
    for meta in metas {
        println!(
            "{:<36}  {:<25}  {:<16}  {}",
            meta.profile_id.to_string(),
            meta.created_at.to_rfc3339(),
            meta.profile_type.as_str(),
            meta.labels
        );
    }
}

/// Print sample totals and the heaviest stacks, leaf frame last
pub fn print_profile_summary(profile: &Profile, top: usize) {
    println!("  Total samples: {}", profile.total_samples());
    println!("  Unique stacks: {}", profile.samples.len());
    println!(
        "  Duration: {:.2}s, period: {}ns",
        profile.duration_nanos as f64 / 1e9,
        profile.period_nanos
    );

    let mut stacks: Vec<_> = profile.samples.iter().collect();
    stacks.sort_by(|a, b| b.1.cmp(a.1));
    for (stack, count) in stacks.into_iter().take(top) {
        let label = stack
            .frames
            .iter()
            .map(|f| f.function.as_str())
            .collect::<Vec<_>>()
            .join(";");
        println!("  [{:>7}] {}", count, label);
    }
}
