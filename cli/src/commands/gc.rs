//! Gc command implementation

use crate::output;
use anyhow::{bail, Result};
use aperture_store::Backends;

pub fn run(backends: &Backends) -> Result<()> {
    if backends.kv.is_empty() {
        bail!("No embedded store configured; other backends expire records on their own");
    }

    for store in &backends.kv {
        let stats = store.run_gc()?;
        output::success(&format!(
            "{}: scanned {} keys, {} expired, {} reclaimed",
            store.path().display(),
            stats.scanned,
            stats.expired,
            stats.reclaimed
        ));
    }
    Ok(())
}
