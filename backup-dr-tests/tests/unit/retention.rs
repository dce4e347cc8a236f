//! Unit tests for the retention sweep against real directory mtimes

use backup_dr::config::RetentionPolicy;
use backup_dr::managers::retention::RetentionSweeper;
use rstest::rstest;
use std::time::SystemTime;
use test_utils::{age_directory, TestContext};

fn backups_aged(ctx: &TestContext, ages: &[u64]) {
    for age in ages {
        let dir = ctx.create_subdir(&format!("backups/aged-{}", age));
        age_directory(&dir, *age).unwrap();
    }
}

#[test]
fn test_thirty_day_window_deletes_only_older_backup() {
    let ctx = TestContext::new();
    backups_aged(&ctx, &[0, 29, 31]);

    let report = RetentionSweeper::new(RetentionPolicy { days: 30, keep_latest: 0 })
        .sweep(&ctx.temp_dir().join("backups"), SystemTime::now())
        .unwrap();

    assert_eq!(report.deleted, vec![ctx.temp_dir().join("backups/aged-31")]);
    assert!(ctx.file_exists("backups/aged-0"));
    assert!(ctx.file_exists("backups/aged-29"));
}

#[rstest]
#[case(0, 4)]
#[case(1, 4)]
#[case(3, 2)]
#[case(5, 0)]
fn test_keep_latest_protects_newest(#[case] keep_latest: usize, #[case] expected_deleted: usize) {
    let ctx = TestContext::new();
    backups_aged(&ctx, &[1, 40, 50, 60, 70]);

    let report = RetentionSweeper::new(RetentionPolicy { days: 30, keep_latest })
        .sweep(&ctx.temp_dir().join("backups"), SystemTime::now())
        .unwrap();

    assert_eq!(report.deleted.len(), expected_deleted);
    assert_eq!(report.kept, 5 - expected_deleted);
    assert!(ctx.file_exists("backups/aged-1"));
}

#[test]
fn test_pointer_file_at_root_survives() {
    let ctx = TestContext::new();
    backups_aged(&ctx, &[90]);
    let pointer = ctx.create_file("backups/last-backup.json", "{}");

    RetentionSweeper::new(RetentionPolicy { days: 1, keep_latest: 0 })
        .sweep(&ctx.temp_dir().join("backups"), SystemTime::now())
        .unwrap();

    assert!(pointer.exists());
    assert!(!ctx.file_exists("backups/aged-90"));
}
