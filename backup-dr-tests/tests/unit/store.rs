//! Unit tests for the file-backed fleet store

use backup_dr::error::Error;
use backup_dr::store::{DrillRecord, DrillStatus, FleetStore};
use chrono::{Duration, Utc};
use serde_json::json;
use test_utils::{sample_installation, sample_pointer, TestContext};

fn running_drill(id: &str) -> DrillRecord {
    DrillRecord {
        id: id.to_string(),
        installation_id: "acme".to_string(),
        instance_id: "acme-prod".to_string(),
        status: DrillStatus::Running,
        rpo_minutes: Some(12),
        rto_minutes: None,
        scheduled_at: Utc::now(),
        finished_at: None,
        notes: None,
        meta: json!({ "plan": "pro" }),
    }
}

#[test]
fn test_records_survive_reopen() {
    let ctx = TestContext::new();
    {
        let store = ctx.open_store();
        store.upsert_installation(&sample_installation("acme", "acme-prod", "pro")).unwrap();
        store.record_backup(&sample_pointer("acme-prod", Utc::now())).unwrap();
    }

    let store = ctx.open_store();
    let installation = store.resolve_installation(None).unwrap();
    assert_eq!(installation.id, "acme");
    assert!(store.last_backup("acme-prod").unwrap().is_some());
}

#[test]
fn test_pointer_slot_keeps_latest_run_only() {
    let ctx = TestContext::new();
    let store = ctx.open_store();
    let earlier = Utc::now() - Duration::hours(6);
    let later = Utc::now();

    store.record_backup(&sample_pointer("acme-prod", earlier)).unwrap();
    store.record_backup(&sample_pointer("acme-prod", later)).unwrap();

    let pointer = store.last_backup("acme-prod").unwrap().unwrap();
    assert_eq!(pointer.last_backup_at, later);
    assert!(store.last_backup("other").unwrap().is_none());
}

#[test]
fn test_unknown_installation_is_not_found() {
    let ctx = TestContext::new();
    let store = ctx.open_store();
    store.upsert_installation(&sample_installation("acme", "acme-prod", "pro")).unwrap();

    let err = store.resolve_installation(Some("globex")).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_drill_finishes_exactly_once() {
    let ctx = TestContext::new();
    let store = ctx.open_store();
    store.upsert_installation(&sample_installation("acme", "acme-prod", "pro")).unwrap();

    let mut drill = running_drill("d1");
    store.insert_drill(&drill).unwrap();

    drill.status = DrillStatus::Succeeded;
    drill.rto_minutes = Some(4);
    drill.finished_at = Some(Utc::now());
    store.finish_drill(&drill).unwrap();

    drill.status = DrillStatus::Failed;
    assert!(store.finish_drill(&drill).is_err());

    let stored = store.get_drill("d1").unwrap().unwrap();
    assert_eq!(stored.status, DrillStatus::Succeeded);
    assert_eq!(stored.rto_minutes, Some(4));
    assert_eq!(stored.meta["plan"], "pro");
}

#[test]
fn test_running_is_not_a_terminal_state() {
    let ctx = TestContext::new();
    let store = ctx.open_store();
    store.upsert_installation(&sample_installation("acme", "acme-prod", "pro")).unwrap();

    let drill = running_drill("d2");
    store.insert_drill(&drill).unwrap();
    assert!(store.finish_drill(&drill).is_err());
}
