//! Manual integration tests against a local Redis.
//!
//! These expect a Redis server on 127.0.0.1:6379 and are ignored by
//! default; run them with `cargo test -p gt-gateway-storage -- --ignored`
//! when one is available.

use gt_gateway_storage::{RedisSessionStore, SessionStore};
use gt_gateway_models::{DeviceSession, DeviceVariant};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

#[tokio::test]
#[ignore]
async fn round_trip_with_imei_index() {
    let store = RedisSessionStore::connect(REDIS_URL, 60)
        .await
        .expect("redis unavailable");

    let mut session = DeviceSession::new("861234567890123");
    session.device_variant = DeviceVariant::Sk05;
    session.bind("conn-test", "127.0.0.1:50000");
    session.authenticate();

    store.put(&session).await.unwrap();

    let by_id = store.get(&session.id).await.unwrap().expect("record");
    assert_eq!(by_id.imei, session.imei);
    assert_eq!(by_id.device_variant, DeviceVariant::Sk05);
    assert!(by_id.authenticated);

    let id = store
        .id_by_imei(&session.imei)
        .await
        .unwrap()
        .expect("imei index");
    assert_eq!(id, session.id);

    store.delete(&session.id, &session.imei).await.unwrap();
    assert!(store.get(&session.id).await.unwrap().is_none());
    assert!(store.id_by_imei(&session.imei).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn missing_keys_read_as_none() {
    let store = RedisSessionStore::connect(REDIS_URL, 60)
        .await
        .expect("redis unavailable");
    assert!(store.get("no-such-session").await.unwrap().is_none());
    assert!(store.id_by_imei("000000000000000").await.unwrap().is_none());
}
