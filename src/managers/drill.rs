//! Disaster-recovery drills
//!
//! A drill restores the installation's latest backup into a disposable target, measures
//! RPO and RTO against the installation's plan, records the outcome in the
//! fleet store and raises one alert per breached target. A failed restore is
//! recorded, never propagated.

use crate::config::{
    control_plane_path, BackupSelector, DrillConfig, GlobalConfig, PlanTargets, PlanTier, RestoreConfig,
};
use crate::error::{Error, Result, StepContext};
use crate::managers::backup;
use crate::managers::notification::NotificationManager;
use crate::managers::restore::{RestoreReport, Restorer};
use crate::store::{Alert, BackupPointer, DrillRecord, DrillStatus, FleetStore, Installation, SqliteFleetStore};
use crate::utils::clock::{self, Clock};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of one drill
#[derive(Debug, Clone)]
pub struct DrillOutcome {
    pub drill: DrillRecord,
    pub plan: PlanTier,
    pub targets: PlanTargets,
    pub alerts: Vec<Alert>,
    pub report: Option<RestoreReport>,
}

impl DrillOutcome {
    pub fn succeeded(&self) -> bool {
        self.drill.status == DrillStatus::Succeeded
    }
}

/// Plan of the installation: explicit override, else stored plan, else standard
pub fn resolve_plan(config_plan: Option<PlanTier>, installation: &Installation) -> PlanTier {
    config_plan
        .or_else(|| installation.plan.as_deref().and_then(PlanTier::parse))
        .unwrap_or_default()
}

/// Plan defaults, then installation overrides, then explicit overrides
pub fn resolve_targets(plan: PlanTier, installation: &Installation, config: &DrillConfig) -> PlanTargets {
    plan.default_targets()
        .with_overrides(installation.rpo_target_minutes, installation.rto_target_minutes)
        .with_overrides(config.rpo_target_override, config.rto_target_override)
}

/// One alert per dimension whose measurement exceeds its target
pub fn breach_messages(rpo_minutes: Option<u32>, rto_minutes: Option<u32>, targets: &PlanTargets) -> Vec<String> {
    let mut messages = Vec::new();
    if let Some(rpo) = rpo_minutes {
        if rpo > targets.rpo_target_minutes {
            messages.push(format!(
                "RPO target breached: {} minutes since last backup (target {} minutes)",
                rpo, targets.rpo_target_minutes
            ));
        }
    }
    if let Some(rto) = rto_minutes {
        if rto > targets.rto_target_minutes {
            messages.push(format!(
                "RTO target breached: restore took {} minutes (target {} minutes)",
                rto, targets.rto_target_minutes
            ));
        }
    }
    messages
}

pub struct DrillRunner {
    global: GlobalConfig,
    config: DrillConfig,
    restore: RestoreConfig,
    restorer: Arc<dyn Restorer>,
    clock: Arc<dyn Clock>,
    notifier: Option<NotificationManager>,
}

impl DrillRunner {
    /// `restore` is the base restore configuration; the drill points it at
    /// its own target before running
    pub fn new(
        global: GlobalConfig,
        config: DrillConfig,
        restore: RestoreConfig,
        restorer: Arc<dyn Restorer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let notifier = NotificationManager::from_url(config.alert_webhook_url.as_deref());
        Self {
            global,
            config,
            restore,
            restorer,
            clock,
            notifier,
        }
    }

    /// Open the fleet store for the duration of one drill and run it
    pub fn run(&self) -> Result<DrillOutcome> {
        let path = control_plane_path(&self.config.control_plane_url);
        let store = SqliteFleetStore::open(&path).step("open fleet store")?;
        self.run_with(&store)
    }

    pub fn run_with(&self, store: &dyn FleetStore) -> Result<DrillOutcome> {
        let installation = store
            .resolve_installation(self.config.installation_id.as_deref())
            .step("resolve installation")?;
        let plan = resolve_plan(self.config.plan, &installation);
        let targets = resolve_targets(plan, &installation, &self.config);
        info!(
            "Drill for installation {} ({} plan: RPO {}m, RTO {}m)",
            installation.id,
            plan.as_str(),
            targets.rpo_target_minutes,
            targets.rto_target_minutes
        );

        let last_backup = self
            .last_backup(store, &installation)
            .step("read last backup")?;
        let last_backup_at = last_backup.as_ref().map(|pointer| pointer.last_backup_at);
        let rpo_minutes = last_backup_at.map(|at| clock::minutes_between(at, self.clock.now()));

        let mut drill = DrillRecord {
            id: uuid::Uuid::new_v4().to_string(),
            installation_id: installation.id.clone(),
            instance_id: installation.instance_id.clone(),
            status: DrillStatus::Running,
            rpo_minutes,
            rto_minutes: None,
            scheduled_at: self.clock.now(),
            finished_at: None,
            notes: None,
            meta: json!({
                "plan": plan.as_str(),
                "rpoTargetMinutes": targets.rpo_target_minutes,
                "rtoTargetMinutes": targets.rto_target_minutes,
                "lastBackupAt": last_backup_at,
            }),
        };
        store.insert_drill(&drill).step("record drill")?;

        let started = self.clock.instant();
        let result = self
            .restore_config(&installation, last_backup.as_ref())
            .and_then(|restore| self.restorer.restore(&restore));
        let rto_minutes = clock::ceil_minutes(self.clock.instant().saturating_duration_since(started));

        drill.rto_minutes = Some(rto_minutes);
        drill.finished_at = Some(self.clock.now());
        let report = match result {
            Ok(report) => {
                drill.status = DrillStatus::Succeeded;
                if let Some(meta) = drill.meta.as_object_mut() {
                    meta.insert("backupId".to_string(), json!(report.backup_id));
                    meta.insert("tables".to_string(), json!(report.tables));
                    meta.insert("keysRestored".to_string(), json!(report.keys_restored));
                }
                info!("Drill {} succeeded in {} minute(s)", drill.id, rto_minutes);
                Some(report)
            }
            Err(e) => {
                error!("Drill {} restore failed: {}", drill.id, e);
                drill.status = DrillStatus::Failed;
                drill.notes = Some(e.to_string());
                None
            }
        };

        store.finish_drill(&drill).step("record drill")?;
        store
            .update_dr_summary(&installation.id, &drill, plan, targets)
            .step("update DR summary")?;

        let mut alerts = Vec::new();
        for message in breach_messages(drill.rpo_minutes, drill.rto_minutes, &targets) {
            warn!("{}", message);
            let alert = Alert {
                id: uuid::Uuid::new_v4().to_string(),
                installation_id: installation.id.clone(),
                level: "error".to_string(),
                message,
                created_at: self.clock.now(),
            };
            store.insert_alert(&alert).step("raise alert")?;
            if let Some(ref notifier) = self.notifier {
                if let Err(e) = notifier.send_alert(&alert, &drill) {
                    warn!("Failed to deliver alert webhook: {}", e);
                }
            }
            alerts.push(alert);
        }

        Ok(DrillOutcome {
            drill,
            plan,
            targets,
            alerts,
            report,
        })
    }

    /// Restore settings aimed at the drill target. Without an explicit
    /// backup the installation's own last backup is restored.
    fn restore_config(&self, installation: &Installation, last_backup: Option<&BackupPointer>) -> Result<RestoreConfig> {
        let mut restore = self.restore.with_target(
            &self.config.target_database_url,
            self.config.target_redis_url.as_deref(),
        );
        if restore.backup == BackupSelector::Latest {
            let pointer = last_backup.ok_or_else(|| {
                Error::NotFound(format!(
                    "No backup on record for instance {}",
                    installation.instance_id
                ))
                .at_step("resolve backup")
            })?;
            restore.backup = BackupSelector::Path(PathBuf::from(&pointer.path));
        }
        Ok(restore)
    }

    /// Fleet store first, then the local pointer file when it belongs to
    /// the same instance
    fn last_backup(&self, store: &dyn FleetStore, installation: &Installation) -> Result<Option<BackupPointer>> {
        if let Some(pointer) = store.last_backup(&installation.instance_id)? {
            return Ok(Some(pointer));
        }
        match backup::read_pointer_file(&self.global.pointer_file)? {
            Some(pointer) if pointer.instance_id == installation.instance_id => Ok(Some(pointer)),
            Some(pointer) => {
                warn!(
                    "Pointer file belongs to instance {}, not {}; no backup on record",
                    pointer.instance_id, installation.instance_id
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
