//! Integration tests for the binding store

use incar_input::InputId;
use incar_profile_repository::prelude::*;
use incar_profile_repository::{ProfileRecord, SCHEMA_VERSION};
use incar_telemetry::{ControlCatalog, ControlDescriptor, SessionState, TelemetrySnapshot, ValueKind};
use incar_timing::{CustomTiming, MsRange, RepeatAcceleration, TimingPreset, TimingSelection};
use std::sync::Arc;
use tempfile::TempDir;

fn must<T, E: std::fmt::Debug>(r: std::result::Result<T, E>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => panic!("unexpected Err: {e:?}"),
    }
}

fn input(raw: &str) -> InputId {
    must(InputId::parse(raw))
}

fn session(car: &str, track: &str) -> SessionIdentity {
    SessionIdentity::new(car, track, SessionState::Practice)
}

fn catalog() -> Arc<CatalogSnapshot> {
    let catalog = ControlCatalog::new();
    catalog.refresh(&TelemetrySnapshot {
        session: session("Ferrari 296 GT3", "Monza"),
        controls: vec![
            ControlDescriptor::new("dcBrakeBias", ValueKind::Float, 40.0, 60.0, 0.5, 50.0),
            ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 12.0, 1.0, 4.0),
            ControlDescriptor::new("dcTractionControl", ValueKind::Integer, 1.0, 11.0, 1.0, 5.0),
        ],
    });
    catalog.snapshot()
}

async fn create_test_store() -> (BindingStore, TempDir) {
    let temp_dir = must(TempDir::new());
    let store = must(BindingStore::new(ProfileRepositoryConfig::new(temp_dir.path())).await);
    (store, temp_dir)
}

fn full_profile(car: &str, track: &str) -> Profile {
    let mut profile = Profile::new(&ProfileKey::new(car, track));
    let mut bias_preset = Preset::new(54.0, Some(input("F5")));
    bias_preset.voice_phrase = Some("bias fifty four".to_string());
    profile.set_binding(
        Binding::new("dcBrakeBias")
            .with_increase(input("F1"))
            .with_decrease(input("F2"))
            .with_preset(bias_preset)
            .with_preset(Preset::new(48.0, Some(input("F6")))),
    );
    profile.set_binding(
        Binding::new("dcABS")
            .with_increase(input("JOY:wheel:3"))
            .with_decrease(input("JOY:wheel:4"))
            .with_rate_override(TimingSelection::from(TimingPreset::Aggressive)),
    );
    profile.set_combo(
        ComboDefinition::new("wet")
            .with_input(input("F9"))
            .with_step("dcABS", 8.0)
            .with_step("dcTractionControl", 9.0),
    );
    profile.timing = TimingSelection::Custom(CustomTiming {
        press_ms: MsRange::new(60, 80),
        interval_ms: MsRange::new(60, 90),
        initial_delay_ms: 350,
        jitter_ms: 5,
        acceleration: Some(RepeatAcceleration {
            factor: 0.9,
            min_interval_ms: 40,
        }),
    });
    profile.hud_layout = HudLayout {
        x: 120,
        y: 64,
        scale: 1.25,
        opacity: 0.7,
        locked: true,
        control_order: vec!["dcBrakeBias".to_string(), "dcABS".to_string()],
    };
    profile
}

mod persistence {
    use super::*;

    #[tokio::test]
    async fn round_trip_reproduces_profile() {
        let (store, temp_dir) = create_test_store().await;
        let profile = full_profile("Ferrari 296 GT3", "Monza");
        let current = session("Ferrari 296 GT3", "Monza");

        must(store.save(&profile, &current, &catalog()).await);
        drop(store);

        let reopened = must(BindingStore::new(ProfileRepositoryConfig::new(temp_dir.path())).await);
        let loaded = must(reopened.match_session(&current).await);
        assert_eq!(loaded, Some(profile));
    }

    #[tokio::test]
    async fn match_is_exact_on_car_and_track() {
        let (store, _temp_dir) = create_test_store().await;
        must(
            store
                .save(&full_profile("GT3", "Spa"), &session("GT3", "Spa"), &catalog())
                .await,
        );

        assert!(must(store.match_session(&session("GT3", "Spa")).await).is_some());
        assert!(must(store.match_session(&session("GT3", "Spa GP")).await).is_none());
        assert!(must(store.match_session(&session("GT3 Evo", "Spa")).await).is_none());
        assert!(must(store.match_session(&session("gt3", "spa")).await).is_none());
    }

    #[tokio::test]
    async fn save_overwrites_previous_profile() {
        let (store, _temp_dir) = create_test_store().await;
        let current = session("GT3", "Spa");
        let mut profile = full_profile("GT3", "Spa");
        must(store.save(&profile, &current, &catalog()).await);

        profile.remove_combo("wet");
        must(store.save(&profile, &current, &catalog()).await);
        store.clear_cache().await;

        let loaded = must(store.match_session(&current).await);
        assert_eq!(loaded.map(|p| p.combos.len()), Some(0));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let (store, _temp_dir) = create_test_store().await;
        for (car, track) in [("GT3", "Spa"), ("GT3", "Monza"), ("LMP2", "Le Mans")] {
            must(
                store
                    .save(&Profile::new(&ProfileKey::new(car, track)), &session(car, track), &catalog())
                    .await,
            );
        }

        let listed = must(store.list().await);
        assert_eq!(listed.len(), 3);
        assert_eq!(listed.first().map(|p| p.key.to_string()), Some("GT3 @ Monza".to_string()));

        assert!(must(store.delete(&ProfileKey::new("GT3", "Spa")).await));
        assert!(!must(store.delete(&ProfileKey::new("GT3", "Spa")).await));
        assert_eq!(must(store.list().await).len(), 2);
        assert!(must(store.match_session(&session("GT3", "Spa")).await).is_none());
    }
}

mod corruption {
    use super::*;

    #[tokio::test]
    async fn truncated_record_reports_corrupt_and_is_preserved() {
        let (store, temp_dir) = create_test_store().await;
        let key = ProfileKey::new("GT3", "Spa");
        must(std::fs::write(store.path_for(&key), "{\"schema_version\":1,\"car_na"));

        let result = store.match_session(&session("GT3", "Spa")).await;
        assert!(matches!(result, Err(ProfileStoreError::ProfileCorrupt { .. })));
        assert!(temp_dir.path().join("corrupt").exists());

        must(store.save(&Profile::new(&key), &session("GT3", "Spa"), &catalog()).await);
        assert!(must(store.match_session(&session("GT3", "Spa")).await).is_some());
    }

    #[tokio::test]
    async fn list_skips_unreadable_records() {
        let (store, temp_dir) = create_test_store().await;
        must(std::fs::write(temp_dir.path().join("garbage.json"), "not json"));
        must(
            store
                .save(&Profile::new(&ProfileKey::new("GT3", "Spa")), &session("GT3", "Spa"), &catalog())
                .await,
        );
        assert_eq!(must(store.list().await).len(), 1);
    }

    #[tokio::test]
    async fn record_envelope_carries_identity_and_version() {
        let (store, _temp_dir) = create_test_store().await;
        let outcome = must(
            store
                .save(&full_profile("GT3", "Spa"), &session("GT3", "Spa"), &catalog())
                .await,
        );
        let json = must(std::fs::read_to_string(&outcome.path));
        let record: ProfileRecord = must(serde_json::from_str(&json));
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.car_name, "GT3");
        assert!(must(chrono::DateTime::parse_from_rfc3339(&record.saved_at)).timestamp() > 0);
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn rejected_profile_writes_nothing() {
        let (store, _temp_dir) = create_test_store().await;
        let mut profile = Profile::new(&ProfileKey::new("GT3", "Spa"));
        profile.set_binding(Binding::new("dcBrakeBias").with_preset(Preset::new(61.0, None)));

        let result = store.save(&profile, &session("GT3", "Spa"), &catalog()).await;
        assert!(matches!(
            result,
            Err(ProfileStoreError::Validation(ValidationError::ValueOutOfRange { .. }))
        ));
        assert!(must(store.list().await).is_empty());
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn independent_keys_save_concurrently() {
        let (store, _temp_dir) = create_test_store().await;
        let store = Arc::new(store);
        let snapshot = catalog();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let snapshot = Arc::clone(&snapshot);
            handles.push(tokio::spawn(async move {
                let track = format!("Track {i}");
                store
                    .save(&full_profile("GT3", &track), &session("GT3", &track), &snapshot)
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            must(must(handle.await));
        }
        assert_eq!(must(store.list().await).len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_save_and_match_never_sees_partial_record() {
        let (store, _temp_dir) = create_test_store().await;
        let store = Arc::new(store);
        let current = session("GT3", "Spa");
        must(store.save(&full_profile("GT3", "Spa"), &current, &catalog()).await);

        let writer = {
            let store = Arc::clone(&store);
            let current = current.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.save(&full_profile("GT3", "Spa"), &current, &catalog()).await?;
                }
                Ok::<(), ProfileStoreError>(())
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.clear_cache().await;
                    let loaded = store.match_session(&current).await?;
                    assert!(loaded.is_some());
                }
                Ok::<(), ProfileStoreError>(())
            })
        };
        must(must(writer.await));
        must(must(reader.await));
    }
}
