//! Behaviour every storage backend must share
//!
//! Each check writes under its own service name derived from the backend's
//! prefix, so the checks can run against a server that other runs share.

use aperture_shared::codec::profile_to_bytes;
use aperture_shared::{parse_profile, Labels, Meta, Profile, ProfileId, ProfileType, Stack};
use aperture_store::{Context, FindProfilesParams, Reader, WriteProfileParams, Writer};
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

pub struct Backend {
    pub writer: Arc<dyn Writer>,
    pub reader: Arc<dyn Reader>,
    pub prefix: String,
}

impl Backend {
    pub fn new<S: Writer + Reader + 'static>(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            writer: store.clone(),
            reader: store,
            prefix: prefix.into(),
        }
    }

    fn service(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }

    async fn write(
        &self,
        service: &str,
        profile_type: ProfileType,
        labels: Labels,
        created_at: DateTime<Utc>,
        profile: &Profile,
    ) -> Meta {
        let params = WriteProfileParams {
            service: service.to_string(),
            profile_type,
            labels,
            created_at: Some(created_at),
            ..Default::default()
        };
        let body = Bytes::from(profile_to_bytes(profile).unwrap());
        self.writer
            .write_profile(&Context::background(), &params, body.into())
            .await
            .unwrap()
    }

    async fn write_cpu(&self, service: &str, created_at: DateTime<Utc>) -> Meta {
        self.write(service, ProfileType::Cpu, Labels::default(), created_at, &profile(1))
            .await
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn profile(samples: u64) -> Profile {
    let mut profile = Profile::new(0, 10_000_000);
    profile.add_sample(Stack::from_functions(&["main", "handle"]), samples);
    profile
}

fn cpu_window(service: &str, min: DateTime<Utc>, max: DateTime<Utc>) -> FindProfilesParams {
    FindProfilesParams {
        service: service.to_string(),
        profile_type: ProfileType::Cpu,
        created_at_min: Some(min),
        created_at_max: Some(max),
        ..Default::default()
    }
}

/// Results come back oldest first, and the limit keeps the oldest.
pub async fn find_is_time_ordered_and_limited(backend: &Backend) {
    let ctx = Context::background();
    let service = backend.service("ordered");
    let t = base_time();

    // written out of order on purpose
    for offset in [30, 5, 20, 0, 10] {
        backend.write_cpu(&service, t + Duration::seconds(offset)).await;
    }

    let query = cpu_window(&service, t, t + Duration::minutes(1));
    let metas = backend.reader.find_profiles(&ctx, &query).await.unwrap();
    assert_eq!(metas.len(), 5);
    assert!(metas.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let ids = backend.reader.find_profile_ids(&ctx, &query).await.unwrap();
    let expected: Vec<ProfileId> = metas.iter().map(|m| m.profile_id).collect();
    assert_eq!(ids, expected);

    let limited = FindProfilesParams { limit: 2, ..query };
    let metas = backend.reader.find_profiles(&ctx, &limited).await.unwrap();
    assert_eq!(metas.len(), 2);
    assert_eq!(metas[0].created_at, t);
    assert_eq!(metas[1].created_at, t + Duration::seconds(5));
}

/// Both window bounds are inclusive and nothing outside them is returned.
pub async fn find_respects_time_window(backend: &Backend) {
    let ctx = Context::background();
    let service = backend.service("window");
    let t = base_time();

    let mut ids = Vec::new();
    for minutes in 0..3 {
        ids.push(backend.write_cpu(&service, t + Duration::minutes(minutes)).await.profile_id);
    }

    let found = backend
        .reader
        .find_profile_ids(&ctx, &cpu_window(&service, t, t + Duration::seconds(90)))
        .await
        .unwrap();
    assert_eq!(found, ids[..2].to_vec());

    let found = backend
        .reader
        .find_profile_ids(&ctx, &cpu_window(&service, t + Duration::minutes(2), t + Duration::minutes(2)))
        .await
        .unwrap();
    assert_eq!(found, vec![ids[2]]);

    let later = t + Duration::hours(1);
    let err = backend
        .reader
        .find_profiles(&ctx, &cpu_window(&service, later, later + Duration::hours(1)))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// A query for one profile type never returns another.
pub async fn find_filters_by_profile_type(backend: &Backend) {
    let ctx = Context::background();
    let service = backend.service("types");
    let t = base_time();

    let cpu = backend.write_cpu(&service, t).await;

    let heap = FindProfilesParams {
        profile_type: ProfileType::Heap,
        ..cpu_window(&service, t, t)
    };
    let err = backend.reader.find_profiles(&ctx, &heap).await.unwrap_err();
    assert!(err.is_not_found());

    let found = backend.reader.find_profiles(&ctx, &cpu_window(&service, t, t)).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].profile_id, cpu.profile_id);
    assert_eq!(found[0].profile_type, ProfileType::Cpu);
}

/// Query labels must be a subset of the stored labels.
pub async fn find_matches_label_subset(backend: &Backend) {
    let ctx = Context::background();
    let service = backend.service("labels");
    let t = base_time();

    let labels = Labels::from_pairs([("a", "1"), ("b", "2")]);
    let first = backend
        .write(&service, ProfileType::Cpu, labels.clone(), t, &profile(1))
        .await;
    backend
        .write(&service, ProfileType::Cpu, Labels::from_pairs([("a", "2")]), t, &profile(1))
        .await;

    let query = FindProfilesParams {
        labels: Labels::from_pairs([("a", "1")]),
        ..cpu_window(&service, t, t)
    };
    let found = backend.reader.find_profiles(&ctx, &query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].profile_id, first.profile_id);
    assert_eq!(found[0].labels, labels);

    let query = FindProfilesParams {
        labels: Labels::from_pairs([("a", "1"), ("c", "3")]),
        ..cpu_window(&service, t, t)
    };
    assert!(backend.reader.find_profiles(&ctx, &query).await.unwrap_err().is_not_found());

    // no labels match everything
    let found = backend.reader.find_profiles(&ctx, &cpu_window(&service, t, t)).await.unwrap();
    assert_eq!(found.len(), 2);
}

/// A service that never received a write has nothing to find.
pub async fn find_unknown_service_is_not_found(backend: &Backend) {
    let ctx = Context::background();
    let t = base_time();
    let err = backend
        .reader
        .find_profiles(&ctx, &cpu_window(&backend.service("missing"), t, t + Duration::days(1)))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Stored artifacts come back unchanged, in request order, skipping unknown ids.
pub async fn list_profiles_round_trip(backend: &Backend) {
    let ctx = Context::background();
    let service = backend.service("list");
    let t = base_time();

    let mut first = profile(3);
    first.add_sample(Stack::from_functions(&["idle"]), 1);
    let mut second = Profile::new(t.timestamp_nanos_opt().unwrap(), 10_000_000);
    second.duration_nanos = 1_000_000_000;
    second.add_sample(Stack::from_functions(&["alloc", "main"]), 4);

    let a = backend
        .write(&service, ProfileType::Cpu, Labels::default(), t, &first)
        .await;
    let b = backend
        .write(&service, ProfileType::Cpu, Labels::default(), t, &second)
        .await;

    let mut list = backend
        .reader
        .list_profiles(&ctx, &[b.profile_id, ProfileId::generate(), a.profile_id])
        .await
        .unwrap();
    let mut stored = Vec::new();
    while list.next().await {
        stored.push(parse_profile(&list.profile().await.unwrap()).unwrap());
    }
    list.close().unwrap();

    assert_eq!(stored, vec![second, first]);
}

/// Every written service is listed once, in order.
pub async fn list_services_includes_written(backend: &Backend) {
    let ctx = Context::background();
    let t = base_time();
    let web = backend.service("svc-web");
    let api = backend.service("svc-api");

    for service in [&web, &api, &web] {
        backend.write_cpu(service, t).await;
    }

    let services = backend.reader.list_services(&ctx).await.unwrap();
    assert!(services.windows(2).all(|w| w[0] < w[1]));
    assert!(services.contains(&web));
    assert!(services.contains(&api));
}

#[allow(dead_code)]
pub async fn run_all(backend: &Backend) {
    find_is_time_ordered_and_limited(backend).await;
    find_respects_time_window(backend).await;
    find_filters_by_profile_type(backend).await;
    find_matches_label_subset(backend).await;
    find_unknown_service_is_not_found(backend).await;
    list_profiles_round_trip(backend).await;
    list_services_includes_written(backend).await;
}
