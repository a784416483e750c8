mod common;

use idempotency_store::error::AppError;
use idempotency_store::idempotency::DEFAULT_RESPONSE_THRESHOLD_MS;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PaymentReceipt {
    payment_id: String,
    amount_cents: u64,
    captured: bool,
}

fn receipt() -> PaymentReceipt {
    PaymentReceipt {
        payment_id: "pay_123".to_string(),
        amount_cents: 4_200,
        captured: true,
    }
}

#[tokio::test]
async fn test_create_then_get_returns_same_key() {
    for h in common::all_backends().await {
        let key = h.store.create_key("req1", None).await.expect("Failed to create key");
        let found = h.store.get_key("req1").await.expect("Failed to get key");
        assert_eq!(found, Some(key));
    }
}

#[tokio::test]
async fn test_missing_key_is_none_not_error() {
    for h in common::all_backends().await {
        assert_eq!(assert_ok!(h.store.get_key("never-issued").await), None);
        assert_eq!(
            assert_ok!(h.store.get_response::<Value>("never-issued").await),
            None
        );
    }
}

#[tokio::test]
async fn test_ttl_scenario() {
    for h in common::all_backends().await {
        h.clock.set(0);
        let k1 = h.store.create_key("req1", Some(1000)).await.unwrap();

        h.clock.set(500);
        assert_eq!(h.store.get_key("req1").await.unwrap(), Some(k1.clone()));

        h.clock.set(1000);
        assert_eq!(h.store.get_key("req1").await.unwrap(), Some(k1));

        h.clock.set(1500);
        assert_eq!(h.store.get_key("req1").await.unwrap(), None);
        assert_eq!(h.store.get_response::<Value>("req1").await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_expired_read_clears_saved_response() {
    for h in common::all_backends().await {
        h.store.create_key("req1", Some(100)).await.unwrap();
        h.store.save_response("req1", &receipt()).await.unwrap();

        h.clock.set(200);
        assert_eq!(h.store.get_key("req1").await.unwrap(), None);
        assert_eq!(h.store.get_key("req1").await.unwrap(), None);
        assert_eq!(
            h.store.get_response::<PaymentReceipt>("req1").await.unwrap(),
            None
        );
    }
}

#[tokio::test]
async fn test_response_survives_key_expiry_until_read() {
    for h in common::all_backends().await {
        h.store.create_key("req1", Some(100)).await.unwrap();
        h.store.save_response("req1", &receipt()).await.unwrap();

        // The key has expired but nobody has read it yet.
        h.clock.set(10_000);
        assert_eq!(
            h.store.get_response::<PaymentReceipt>("req1").await.unwrap(),
            Some(receipt())
        );
    }
}

#[tokio::test]
async fn test_reissue_replaces_previous_key() {
    for h in common::all_backends().await {
        let first = h.store.create_key("req1", None).await.unwrap();
        let second = h.store.create_key("req1", None).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(h.store.get_key("req1").await.unwrap(), Some(second));
    }
}

#[tokio::test]
async fn test_reissue_with_ttl_replaces_never_expiring_key() {
    for h in common::all_backends().await {
        h.store.create_key("req1", None).await.unwrap();
        h.store.create_key("req1", Some(10)).await.unwrap();

        h.clock.set(11);
        assert_eq!(h.store.get_key("req1").await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_save_and_get_response_exact() {
    for h in common::all_backends().await {
        h.store.save_response("req1", &receipt()).await.unwrap();
        assert_eq!(
            h.store.get_response::<PaymentReceipt>("req1").await.unwrap(),
            Some(receipt())
        );

        let nested = json!({"items": [1, 2, {"x": null}], "note": ""});
        h.store.save_response("req2", &nested).await.unwrap();
        assert_eq!(h.store.get_response::<Value>("req2").await.unwrap(), Some(nested));
    }
}

#[tokio::test]
async fn test_save_response_overwrites() {
    for h in common::all_backends().await {
        h.store.save_response("req1", "first").await.unwrap();
        h.store.save_response("req1", "second").await.unwrap();
        assert_eq!(
            h.store.get_response::<String>("req1").await.unwrap(),
            Some("second".to_string())
        );
    }
}

#[tokio::test]
async fn test_clear_removes_both_records_and_is_idempotent() {
    for h in common::all_backends().await {
        h.store.create_key("req1", None).await.unwrap();
        h.store.save_response("req1", &receipt()).await.unwrap();
        h.store.create_key("req2", None).await.unwrap();

        h.store.clear("req1").await.unwrap();
        h.store.clear("req1").await.unwrap();

        assert_eq!(h.store.get_key("req1").await.unwrap(), None);
        assert_eq!(h.store.get_response::<Value>("req1").await.unwrap(), None);
        assert!(h.store.get_key("req2").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_request_ids_are_isolated() {
    for h in common::all_backends().await {
        let a = h.store.create_key("a", None).await.unwrap();
        let b = h.store.create_key("a::x", None).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(h.store.get_key("a").await.unwrap(), Some(a));
        assert_eq!(h.store.get_key("a::x").await.unwrap(), Some(b));
    }
}

#[tokio::test]
async fn test_cleanup_response_age_boundary() {
    for h in common::all_backends().await {
        let threshold: u64 = 10_000;
        h.clock.set(5_000);
        h.store.save_response("req1", &receipt()).await.unwrap();

        h.clock.set(5_000 + threshold as i64 - 1);
        let report = h.store.auto_cleanup(threshold).await.unwrap();
        assert_eq!(report.responses_removed, 0);
        assert!(h.store.get_response::<PaymentReceipt>("req1").await.unwrap().is_some());

        h.clock.set(5_000 + threshold as i64 + 1);
        let report = h.store.auto_cleanup(threshold).await.unwrap();
        assert_eq!(report.responses_removed, 1);
        assert!(h.store.get_response::<PaymentReceipt>("req1").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_cleanup_evicts_expired_keys_independently() {
    for h in common::all_backends().await {
        h.store.create_key("short", Some(100)).await.unwrap();
        h.store.create_key("forever", None).await.unwrap();
        h.store.save_response("short", &receipt()).await.unwrap();

        h.clock.set(1_000);
        let report = h.store.auto_cleanup_default().await.unwrap();
        assert_eq!(report.keys_removed, 1);
        assert_eq!(report.responses_removed, 0);

        // The response is young, so the sweep keeps it.
        assert!(h.store.get_response::<PaymentReceipt>("short").await.unwrap().is_some());
        assert!(h.store.get_key("forever").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_default_threshold_is_seven_days() {
    assert_eq!(DEFAULT_RESPONSE_THRESHOLD_MS, 604_800_000);

    let h = common::memory_store();
    h.clock.set(1);
    h.store.save_response("req1", &1).await.unwrap();

    h.clock.set(DEFAULT_RESPONSE_THRESHOLD_MS as i64 + 1);
    assert_eq!(h.store.auto_cleanup_default().await.unwrap().total(), 0);

    h.clock.set(DEFAULT_RESPONSE_THRESHOLD_MS as i64 + 2);
    assert_eq!(h.store.auto_cleanup_default().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_export_import_into_empty_store() {
    for source in common::all_backends().await {
        source.store.create_key("req1", None).await.unwrap();
        let k2 = source.store.create_key("req2", Some(60_000)).await.unwrap();
        source.store.save_response("req2", &receipt()).await.unwrap();

        let blob = source.store.export_store().await.unwrap();

        for target in common::all_backends().await {
            let written = target.store.import_store(&blob).await.unwrap();
            assert_eq!(written, 3);

            assert_eq!(
                target.store.get_key("req1").await.unwrap(),
                source.store.get_key("req1").await.unwrap()
            );
            assert_eq!(target.store.get_key("req2").await.unwrap(), Some(k2.clone()));
            assert_eq!(
                target.store.get_response::<PaymentReceipt>("req2").await.unwrap(),
                Some(receipt())
            );
        }
    }
}

#[tokio::test]
async fn test_export_format_is_composite_key_map() {
    let h = common::memory_store();
    h.clock.set(1_000);
    let key = h.store.create_key("req1", Some(500)).await.unwrap();
    h.store.save_response("req1", &json!({"ok": true})).await.unwrap();

    let blob = h.store.export_store().await.unwrap();
    let parsed: Value = serde_json::from_str(&blob).unwrap();

    assert_eq!(
        parsed,
        json!({
            "req1::meta": {"key": key, "expiresAt": 1_500},
            "req1::response": {"responseData": {"ok": true}, "savedAt": 1_000}
        })
    );
}

#[tokio::test]
async fn test_import_is_additive_and_overwriting() {
    for h in common::all_backends().await {
        h.store.create_key("kept", None).await.unwrap();
        h.store.create_key("replaced", None).await.unwrap();

        let blob = json!({
            "replaced::meta": {"key": "imported-key", "expiresAt": null},
            "new::response": {"responseData": [1, 2, 3], "savedAt": 0}
        })
        .to_string();
        h.store.import_store(&blob).await.unwrap();

        assert!(h.store.get_key("kept").await.unwrap().is_some());
        assert_eq!(
            h.store.get_key("replaced").await.unwrap(),
            Some("imported-key".to_string())
        );
        assert_eq!(
            h.store.get_response::<Vec<u32>>("new").await.unwrap(),
            Some(vec![1, 2, 3])
        );
    }
}

#[tokio::test]
async fn test_imported_zero_timestamps_are_never_swept() {
    for h in common::all_backends().await {
        let blob = json!({
            "legacy::meta": {"key": "legacy-key", "expiresAt": 0},
            "legacy::response": {"responseData": "kept", "savedAt": 0}
        })
        .to_string();
        h.store.import_store(&blob).await.unwrap();

        h.clock.set(i64::MAX / 2);
        let report = h.store.auto_cleanup(1).await.unwrap();
        assert_eq!(report.total(), 0);

        assert_eq!(
            h.store.get_key("legacy").await.unwrap(),
            Some("legacy-key".to_string())
        );
        assert_eq!(
            h.store.get_response::<String>("legacy").await.unwrap(),
            Some("kept".to_string())
        );
    }
}

#[tokio::test]
async fn test_malformed_import_writes_nothing() {
    for h in common::all_backends().await {
        h.store.create_key("req1", None).await.unwrap();
        let before = h.store.export_store().await.unwrap();

        let err = assert_err!(h.store.import_store("{\"req2::meta\": ").await);
        assert!(matches!(err, AppError::Format(_)));

        // First entry is valid, second is not: neither may land.
        let partial = json!({
            "a::meta": {"key": "ka", "expiresAt": null},
            "b::response": {"savedAt": 1}
        })
        .to_string();
        let err = assert_err!(h.store.import_store(&partial).await);
        assert!(matches!(err, AppError::Format(_)));

        assert_eq!(h.store.export_store().await.unwrap(), before);
    }
}

#[tokio::test]
async fn test_export_does_not_include_later_writes() {
    let h = common::memory_store();
    h.store.create_key("before", None).await.unwrap();
    let blob = h.store.export_store().await.unwrap();
    h.store.create_key("after", None).await.unwrap();

    assert!(blob.contains("before::meta"));
    assert!(!blob.contains("after::meta"));
}

#[tokio::test]
async fn test_session_lifecycle() {
    for h in common::all_backends().await {
        let session = h.store.session("checkout-991");

        assert_eq!(session.get_key().await.unwrap(), None);
        let key = session.create_key(Some(1_000)).await.unwrap();
        assert_eq!(session.get_key().await.unwrap(), Some(key));

        session.save_response(&receipt()).await.unwrap();
        assert_eq!(
            session.get_response::<PaymentReceipt>().await.unwrap(),
            Some(receipt())
        );

        h.clock.set(2_000);
        assert_eq!(session.get_key().await.unwrap(), None);
        assert_eq!(session.get_response::<PaymentReceipt>().await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_session_import_covers_other_requests() {
    for h in common::all_backends().await {
        let blob = json!({
            "someone-else::meta": {"key": "k-other", "expiresAt": null}
        })
        .to_string();

        h.store.session("mine").import_session(&blob).await.unwrap();
        assert_eq!(
            h.store.get_key("someone-else").await.unwrap(),
            Some("k-other".to_string())
        );
    }
}

#[tokio::test]
async fn test_closed_store_propagates_unavailable() {
    for h in common::all_backends().await {
        h.store.close().await;
        let err = assert_err!(h.store.create_key("req1", None).await);
        assert!(matches!(err, AppError::StorageUnavailable(_)));
    }
}

#[tokio::test]
async fn test_concurrent_sweeps_and_reads_on_shared_store() {
    for h in common::all_backends().await {
        for i in 0..20 {
            h.store.create_key(&format!("req{}", i), Some(10)).await.unwrap();
        }
        h.clock.set(100);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = h.store.clone();
            tasks.push(tokio::spawn(async move {
                if i % 5 == 0 {
                    store.auto_cleanup_default().await.map(|_| ())
                } else {
                    store.get_key(&format!("req{}", i)).await.map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.expect("task panicked").expect("operation failed");
        }

        for i in 0..20 {
            assert_eq!(h.store.get_key(&format!("req{}", i)).await.unwrap(), None);
        }
        assert_eq!(h.store.export_store().await.unwrap(), "{}");
    }
}
