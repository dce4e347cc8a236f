//! Tests for the 'drill' command

use backup_dr::managers::backup::BackupOrchestrator;
use backup_dr::managers::drill::DrillRunner;
use backup_dr::managers::restore::RestoreOrchestrator;
use chrono::{Duration, Utc};
use std::sync::Arc;
use test_utils::{
    healthy_database, populated_cache, sample_installation, ConfigBuilder, DrillStatus, FakeClock, FleetStore,
    MockDatabaseOps, MockExecutor, MockRedisOps, PlanTargets, DRILL_DB,
};

/// Fleet store seeded with one installation and one fresh backup
fn prepared(plan: &str) -> (ConfigBuilder, MockRedisOps) {
    let builder = ConfigBuilder::minimal()
        .with_default_redis()
        .with_control_plane()
        .with_drill_target(DRILL_DB);
    {
        let store = backup_dr::store::SqliteFleetStore::open(&builder.control_plane_file()).unwrap();
        store
            .upsert_installation(&sample_installation("acme", "acme-prod", plan))
            .unwrap();
    }

    let cache = populated_cache();
    BackupOrchestrator::new(
        builder.global(),
        builder.backup(),
        Arc::new(healthy_database()),
        Arc::new(cache.clone()),
    )
    .run()
    .unwrap();
    (builder, cache)
}

fn runner(builder: &ConfigBuilder, database: &MockDatabaseOps, cache: &MockRedisOps, clock: FakeClock) -> DrillRunner {
    let restorer = RestoreOrchestrator::new(
        builder.global(),
        Arc::new(database.clone()),
        Arc::new(cache.clone()),
        Arc::new(MockExecutor::new()),
    );
    DrillRunner::new(
        builder.global(),
        builder.drill(),
        builder.drill_restore(),
        Arc::new(restorer),
        Arc::new(clock),
    )
}

#[test]
fn test_drill_restores_into_scratch_target() {
    let (builder, cache) = prepared("pro");
    let database = healthy_database();

    let outcome = runner(&builder, &database, &cache, FakeClock::at(Utc::now()))
        .run()
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.targets, PlanTargets { rpo_target_minutes: 240, rto_target_minutes: 120 });
    assert!(outcome.alerts.is_empty());
    assert!(database.restored_into(DRILL_DB).is_some());
    assert!(database.restored_into(test_utils::SOURCE_DB).is_none());
    // No drill redis target: the source cache is never flushed
    assert_eq!(*cache.flush_count.lock().unwrap(), 0);

    let store = backup_dr::store::SqliteFleetStore::open(&builder.control_plane_file()).unwrap();
    let installation = store.resolve_installation(Some("acme")).unwrap();
    assert_eq!(installation.dr_last_drill_status, Some(DrillStatus::Succeeded));
    assert_eq!(installation.dr_plan.as_deref(), Some("pro"));
}

#[test]
fn test_stale_backup_breaches_enterprise_rpo() {
    let (builder, cache) = prepared("enterprise");
    let clock = FakeClock::at(Utc::now() + Duration::minutes(90));

    let outcome = runner(&builder, &healthy_database(), &cache, clock).run().unwrap();

    assert_eq!(outcome.drill.rpo_minutes, Some(90));
    assert_eq!(outcome.alerts.len(), 1);
    assert!(outcome.alerts[0].message.contains("RPO"));
    assert!(outcome.alerts[0].message.contains("90"));
    assert!(outcome.alerts[0].message.contains("60"));

    let store = backup_dr::store::SqliteFleetStore::open(&builder.control_plane_file()).unwrap();
    assert_eq!(store.list_alerts("acme").unwrap().len(), 1);
}

#[test]
fn test_failed_restore_is_recorded() {
    let (builder, cache) = prepared("standard");
    let database = healthy_database().with_failing_restore();

    let outcome = runner(&builder, &database, &cache, FakeClock::at(Utc::now()))
        .run()
        .unwrap();

    assert_eq!(outcome.drill.status, DrillStatus::Failed);
    assert!(outcome
        .drill
        .notes
        .as_deref()
        .unwrap()
        .starts_with("restore relational store: "));
    assert!(outcome.drill.rto_minutes.is_some());

    let store = backup_dr::store::SqliteFleetStore::open(&builder.control_plane_file()).unwrap();
    let stored = store.get_drill(&outcome.drill.id).unwrap().unwrap();
    assert_eq!(stored.status, DrillStatus::Failed);
    assert_eq!(
        store.resolve_installation(None).unwrap().dr_last_drill_status,
        Some(DrillStatus::Failed)
    );
}

#[test]
fn test_unreachable_webhook_does_not_fail_drill() {
    let (builder, cache) = prepared("enterprise");
    let builder = builder.set("DR_ALERT_WEBHOOK_URL", "http://127.0.0.1:9/alerts");
    let clock = FakeClock::at(Utc::now() + Duration::hours(3));

    let outcome = runner(&builder, &healthy_database(), &cache, clock).run().unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn test_environment_override_beats_plan() {
    let (builder, cache) = prepared("starter");
    let builder = builder.set("DR_RPO_TARGET_MINUTES", "5");
    let clock = FakeClock::at(Utc::now() + Duration::minutes(10));

    let outcome = runner(&builder, &healthy_database(), &cache, clock).run().unwrap();

    assert_eq!(outcome.targets.rpo_target_minutes, 5);
    assert_eq!(outcome.targets.rto_target_minutes, 480);
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn test_drill_restores_the_installation_backup_not_the_newest() {
    let builder = ConfigBuilder::minimal()
        .with_control_plane()
        .with_drill_target(DRILL_DB)
        .set("DR_INSTALLATION_ID", "acme");
    {
        let store = backup_dr::store::SqliteFleetStore::open(&builder.control_plane_file()).unwrap();
        store
            .upsert_installation(&sample_installation("acme", "acme-prod", "pro"))
            .unwrap();
    }

    let take_backup = |builder: &ConfigBuilder, dump: &[u8]| {
        BackupOrchestrator::new(
            builder.global(),
            builder.backup(),
            Arc::new(MockDatabaseOps::new().with_dump_content(dump)),
            Arc::new(MockRedisOps::new()),
        )
        .run()
        .unwrap()
    };
    let acme = take_backup(&builder, b"ACME DUMP");
    // A later backup of another instance also rewrites the shared pointer file
    let builder = builder.set("INSTANCE_ID", "other-prod");
    take_backup(&builder, b"OTHER DUMP");

    let database = healthy_database();
    let outcome = runner(&builder, &database, &MockRedisOps::new(), FakeClock::at(Utc::now()))
        .run()
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.drill.instance_id, "acme-prod");
    assert_eq!(outcome.drill.meta["backupId"], acme.backup_id.as_str());
    assert_eq!(database.restored_into(DRILL_DB).unwrap(), b"ACME DUMP");
}
