//! E2E test: Write → Find → List against a live ClickHouse server.
//!
//! Point `APERTURE_CLICKHOUSE_ENDPOINT` at the server (default localhost).
#![cfg(feature = "clickhouse-storage")]

mod common;

use aperture_shared::codec::profile_to_bytes;
use aperture_shared::{parse_profile, Labels, Profile, ProfileType, Stack};
use aperture_store::storage::clickhouse::ClickHouseStore;
use aperture_store::{Context, FindProfilesParams, Reader, WriteProfileParams, Writer};
use bytes::Bytes;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_service() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("e2e-{}", nanos)
}

const CH_ENDPOINT: &str = "http://localhost:8123";

fn endpoint() -> String {
    std::env::var("APERTURE_CLICKHOUSE_ENDPOINT").unwrap_or_else(|_| CH_ENDPOINT.to_string())
}

async fn connect() -> ClickHouseStore {
    ClickHouseStore::new(&endpoint(), "default", 0)
        .await
        .expect("ClickHouse not reachable")
}

#[tokio::test]
#[ignore] // Run explicitly via: cargo test -p aperture-store --features clickhouse-storage --test e2e_clickhouse -- --ignored --nocapture
async fn e2e_write_find_and_list() {
    let store = connect().await;
    let ctx = Context::background();
    let service = unique_service();
    let now = Utc::now();

    let mut profile = Profile::new(0, 10_000_000);
    profile.add_sample(Stack::from_functions(&["main"]), 7);
    let body = Bytes::from(profile_to_bytes(&profile).unwrap());

    let params = WriteProfileParams {
        service: service.clone(),
        profile_type: ProfileType::Cpu,
        labels: Labels::from_pairs([("env", "test")]),
        ..Default::default()
    };
    let meta = store.write_profile(&ctx, &params, body.into()).await.unwrap();

    let query = FindProfilesParams {
        service: service.clone(),
        labels: Labels::from_pairs([("env", "test")]),
        created_at_min: Some(now - Duration::minutes(1)),
        ..Default::default()
    };
    let found = store.find_profiles(&ctx, &query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].profile_id, meta.profile_id);

    let mut list = store.list_profiles(&ctx, &[meta.profile_id]).await.unwrap();
    assert!(list.next().await);
    let stored = parse_profile(&list.profile().await.unwrap()).unwrap();
    assert_eq!(stored.total_samples(), 7);
    assert!(!list.next().await);
    list.close().unwrap();

    assert!(store.list_services(&ctx).await.unwrap().contains(&service));
}

#[tokio::test]
#[ignore] // Run explicitly via: cargo test -p aperture-store --features clickhouse-storage --test e2e_clickhouse -- --ignored --nocapture
async fn e2e_shared_backend_behaviour() {
    let store = Arc::new(connect().await);
    common::run_all(&common::Backend::new(store, unique_service())).await;
}
