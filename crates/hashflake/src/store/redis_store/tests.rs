//! Runs against a live server named by `REDIS_URL`; every test returns early
//! when it is unset. Each test works on its own random key.

use super::*;
use crate::{
    AttachPolicy, Coordinator, Error, IdCoordinator, Scripts, StateRecord,
    coordinator::tests::{
        VARIANTS, Variant, bootstrap_at, coordinator_at, run_cancelled_before_start,
        run_concurrent_uniqueness, run_corrupt_record_is_reported,
        run_invalid_record_leaves_record_unchanged, run_out_of_range_leaves_record_unchanged,
        run_pairs_strictly_increase, run_sequence_exhaustion_ticks_logical_clock,
        run_sequence_increments_within_tick, small_layout, stored_at,
    },
};

async fn connect() -> Option<Arc<RedisStore>> {
    let url = std::env::var("REDIS_URL").ok()?;
    Some(Arc::new(RedisStore::connect(&url).await.unwrap()))
}

fn unique_key() -> String {
    format!("hashflake:test:{:016x}", rand::random::<u64>())
}

fn lock_key(key: &str) -> String {
    format!("{key}:lock")
}

async fn attach(store: &Arc<RedisStore>, key: &str, variant: Variant) -> Coordinator<RedisStore> {
    coordinator_at(store, key, &lock_key(key), variant, small_layout(), 3).await
}

async fn remove(store: &RedisStore, key: &str) {
    let mut conn = store.conn.clone();
    let _: i64 = redis::cmd("DEL")
        .arg(key)
        .arg(lock_key(key))
        .arg(format!("{}:bootstrap", lock_key(key)))
        .query_async(&mut conn)
        .await
        .unwrap();
}

async fn overwrite_with_text(store: &RedisStore, key: &str) {
    let mut conn = store.conn.clone();
    let () = redis::cmd("SET")
        .arg(key)
        .arg("taken")
        .query_async(&mut conn)
        .await
        .unwrap();
}

#[tokio::test]
async fn sequence_increments_within_tick() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_sequence_increments_within_tick(&c, small_layout()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn sequence_exhaustion_ticks_logical_clock() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_sequence_exhaustion_ticks_logical_clock(&c, store.as_ref(), small_layout()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn pairs_strictly_increase() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_pairs_strictly_increase(&c, small_layout()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn out_of_range_leaves_record_unchanged() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_out_of_range_leaves_record_unchanged(&c, store.as_ref()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn invalid_record_leaves_record_unchanged() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_invalid_record_leaves_record_unchanged(&c, store.as_ref()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn corrupt_record_is_reported() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_corrupt_record_is_reported(&c, store.as_ref()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn cancelled_before_start() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        let c = attach(&store, &key, variant).await;
        run_cancelled_before_start(&c, store.as_ref()).await;
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn bootstrap_creates_then_attaches_across_variants() {
    let Some(store) = connect().await else { return };
    for (first, second) in [
        (Variant::Locked, Variant::LockFree),
        (Variant::LockFree, Variant::Locked),
    ] {
        let key = unique_key();
        attach(&store, &key, first).await;
        assert_eq!(
            stored_at(store.as_ref(), &key).await,
            StateRecord::initial(&small_layout(), 3, 42)
        );

        let err = bootstrap_at(&store, &key, small_layout(), 4, 10_000)
            .attach_policy(AttachPolicy::Strict)
            .coordinator(second.mode_at(&lock_key(&key)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::LayoutMismatch {
                key: key.clone(),
                field: "MachineId",
                stored: 3,
                requested: 4,
            },
            "{second:?}"
        );
        assert_eq!(
            stored_at(store.as_ref(), &key).await,
            StateRecord::initial(&small_layout(), 3, 42)
        );
        remove(&store, &key).await;
    }
}

#[tokio::test]
async fn non_hash_key_is_a_wrong_type_error() {
    let Some(store) = connect().await else { return };
    for variant in VARIANTS {
        let key = unique_key();
        overwrite_with_text(&store, &key).await;
        let err = bootstrap_at(&store, &key, small_layout(), 3, 42)
            .coordinator(variant.mode_at(&lock_key(&key)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::StoreUnavailable(StoreError::WrongType {
                key: key.clone(),
                found: "string".to_owned(),
            }),
            "{variant:?}"
        );
        remove(&store, &key).await;
    }

    // The generate routine reports the same once the record is replaced.
    let key = unique_key();
    let c = attach(&store, &key, Variant::LockFree).await;
    overwrite_with_text(&store, &key).await;
    assert_eq!(
        c.generate_id().await,
        Err(Error::StoreUnavailable(StoreError::WrongType {
            key: key.clone(),
            found: "string".to_owned(),
        }))
    );
    remove(&store, &key).await;
}

#[tokio::test]
async fn compare_and_set_writes_only_on_match() {
    let Some(store) = connect().await else { return };
    let key = unique_key();
    let create: [(&str, Option<String>); 1] = [("Seq", None)];
    let fields = [("Seq", "0".to_owned()), ("Timestamp", "42".to_owned())];

    assert!(store.compare_and_set(&key, &create, &fields).await.unwrap());
    assert!(!store.compare_and_set(&key, &create, &fields).await.unwrap());

    let stale = [("Seq", Some("5".to_owned()))];
    assert!(!store.compare_and_set(&key, &stale, &[("Seq", "6".to_owned())]).await.unwrap());
    let current = [("Seq", Some("0".to_owned()))];
    assert!(store.compare_and_set(&key, &current, &[("Seq", "1".to_owned())]).await.unwrap());

    let stored = store.get_fields(&key).await.unwrap().unwrap();
    assert_eq!(stored["Seq"], "1");
    assert_eq!(stored["Timestamp"], "42");
    remove(&store, &key).await;
}

#[tokio::test]
async fn leases_are_exclusive_until_released() {
    let Some(store) = connect().await else { return };
    let key = lock_key(&unique_key());
    let lease = Duration::from_secs(10);

    assert!(store.try_lease(&key, "a", lease).await.unwrap());
    assert!(!store.try_lease(&key, "b", lease).await.unwrap());
    assert!(!store.release_lease(&key, "b").await.unwrap());
    assert!(store.release_lease(&key, "a").await.unwrap());
    assert!(store.try_lease(&key, "b", lease).await.unwrap());
    assert!(store.release_lease(&key, "b").await.unwrap());
}

#[tokio::test]
async fn atomic_routines_are_hashed_once_per_kind() {
    let Some(store) = connect().await else { return };
    let first = store.prepared(Scripts::bundled().generate());
    let again = store.prepared(Scripts::bundled().generate());
    assert!(Arc::ptr_eq(&first, &again));

    let custom = AtomicScript::new(ScriptKind::Generate, "return {}");
    let replaced = store.prepared(&custom);
    assert!(!Arc::ptr_eq(&first, &replaced));
    assert!(Arc::ptr_eq(&replaced, &store.prepared(&custom)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_variants_concurrent_uniqueness() {
    let Some(first) = connect().await else { return };
    let key = unique_key();

    // One connection per simulated process.
    let mut processes = vec![(Arc::clone(&first), Variant::Locked)];
    for variant in [Variant::LockFree, Variant::Locked, Variant::LockFree] {
        processes.push((connect().await.unwrap(), variant));
    }
    run_concurrent_uniqueness(processes, &key, &lock_key(&key)).await;
    remove(&first, &key).await;
}
