use serde_json::{json, Map, Value};

use crate::audit::LogLevel;
use crate::audit_store::QueryFilter;
use crate::logger::FeatureFlags;
use crate::tests::test_utils::{day, Harness};

fn payload(value: Value) -> Option<Map<String, Value>> {
    value.as_object().cloned()
}

#[test]
fn logged_entries_land_in_order_and_verify() {
    let h = Harness::new(FeatureFlags::all());
    for i in 0..5 {
        h.logger
            .info("LOGIN_OK", "user logged in", payload(json!({"attempt": i})))
            .unwrap();
    }

    let path = h.segment_path("audit-2026-02-10.jsonl");
    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    for (i, line) in lines.iter().enumerate() {
        let value: Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["payload"]["attempt"], json!(i));
    }

    assert!(h.store.verify_integrity(&path));
    let summary = h.store.verify_integrity_detailed(&path).unwrap();
    assert_eq!(summary.verified, 5);
    assert_eq!(summary.unsigned, 0);
}

#[test]
fn query_spans_days_in_file_then_line_order() {
    let h = Harness::new(FeatureFlags {
        structured_logging: true,
        ..Default::default()
    });

    h.clock.set(day(2026, 2, 12));
    h.logger.info("LOGIN", "third day", None);
    h.logger.info("LOGOUT", "third day", None);
    h.clock.set(day(2026, 2, 10));
    h.logger.info("LOGIN", "first day a", None);
    h.logger.warn("LOGIN", "first day b", None);
    h.clock.set(day(2026, 2, 11));
    h.logger.info("PAGE_VIEW", "second day", None);

    let logins = h.store.query(&QueryFilter::new().event_type("LOGIN"));
    let days: Vec<&str> = logins.iter().map(|e| &e.timestamp[..10]).collect();
    assert_eq!(days, vec!["2026-02-10", "2026-02-10", "2026-02-12"]);
    assert_eq!(logins[0].level, LogLevel::Info);
    assert_eq!(logins[1].level, LogLevel::Warn);
    assert!(logins.iter().all(|e| e.event_type == "LOGIN"));

    let warned = h
        .store
        .query(&QueryFilter::new().event_type("LOGIN").level(LogLevel::Warn));
    assert_eq!(warned.len(), 1);

    assert_eq!(h.store.query(&QueryFilter::new()).len(), 5);
    assert!(h
        .store
        .query(&QueryFilter::new().user_id("mallory"))
        .is_empty());
    assert_eq!(
        h.store
            .query(&QueryFilter::new().session_id("sess-1").user_id("alice"))
            .len(),
        5
    );
}

#[test]
fn disabled_logging_touches_nothing() {
    let h = Harness::new(FeatureFlags {
        structured_logging: false,
        field_encryption: true,
        tamper_evident: true,
    });
    assert!(h.logger.critical("BREACH", "x", payload(json!({"token": "t"}))).is_none());
    assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    assert!(h.store.query(&QueryFilter::new()).is_empty());
}

#[test]
fn unsigned_entries_pass_verification() {
    let h = Harness::new(FeatureFlags {
        structured_logging: true,
        ..Default::default()
    });
    h.logger.info("A", "m", None);
    h.logger.info("B", "m", None);
    let summary = h
        .store
        .verify_integrity_detailed(h.segment_path("audit-2026-02-10.jsonl"))
        .unwrap();
    assert_eq!(summary.unsigned, 2);
    assert_eq!(summary.verified, 0);
}

#[test]
fn stored_encrypted_fields_decrypt_after_query() {
    let h = Harness::new(FeatureFlags::all());
    h.logger.info(
        "API_CALL",
        "outbound",
        payload(json!({"api_key": "sk-live-123", "endpoint": "/v1/charge"})),
    );

    let raw = std::fs::read_to_string(h.segment_path("audit-2026-02-10.jsonl")).unwrap();
    assert!(!raw.contains("sk-live-123"));

    let entries = h.store.query(&QueryFilter::new().event_type("API_CALL"));
    assert_eq!(entries.len(), 1);
    let clear = h.logger.decrypt_payload(&entries[0]).unwrap();
    assert_eq!(clear["api_key"], json!("sk-live-123"));
    assert_eq!(clear["endpoint"], json!("/v1/charge"));
}

#[test]
fn verify_all_walks_every_day() {
    let h = Harness::new(FeatureFlags::all());
    h.logger.info("A", "m", None);
    h.clock.set(day(2026, 2, 11));
    h.logger.info("B", "m", None);

    let summaries = h.store.verify_all().unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries[0].location.ends_with("audit-2026-02-10.jsonl"));
    assert!(summaries[1].location.ends_with("audit-2026-02-11.jsonl"));
}
