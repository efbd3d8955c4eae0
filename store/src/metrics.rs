//! Prometheus metrics for the profile store

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

// ── Write path ───────────────────────────────────────────────────────────────

pub static WRITES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aperture_store_writes_total",
        "Profile writes by backend and outcome",
        &["backend", "status"]
    )
    .unwrap()
});

pub static BYTES_WRITTEN: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aperture_store_bytes_written_total",
        "Artifact bytes persisted",
        &["backend"]
    )
    .unwrap()
});

// ── Read path ────────────────────────────────────────────────────────────────

pub static FIND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "aperture_store_find_duration_seconds",
        "Latency of profile lookups",
        &["backend"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap()
});

pub static PROFILES_MERGED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "aperture_store_profiles_merged_total",
        "Stored profiles decoded into merged answers"
    )
    .unwrap()
});

// ── Retention ────────────────────────────────────────────────────────────────

pub static GC_RECLAIMED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "aperture_store_gc_reclaimed_keys_total",
        "Expired keys deleted by the embedded store's GC"
    )
    .unwrap()
});

pub static SERVICES_KNOWN: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "aperture_store_services",
        "Services currently held in the service cache"
    )
    .unwrap()
});

/// Count a write attempt against `backend`.
pub fn record_write(backend: &str, ok: bool, bytes: usize) {
    let status = if ok { "ok" } else { "error" };
    WRITES_TOTAL.with_label_values(&[backend, status]).inc();
    if ok {
        BYTES_WRITTEN.with_label_values(&[backend]).inc_by(bytes as f64);
    }
}

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Encoding metrics failed: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_write_counter() {
        record_write("test", true, 128);
        record_write("test", false, 0);
        let text = encode_metrics();
        assert!(text.contains("aperture_store_writes_total"));
        assert!(text.contains("aperture_store_bytes_written_total"));
    }
}
