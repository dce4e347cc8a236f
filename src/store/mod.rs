//! Fleet-management store
//!
//! Holds installations, the per-instance "last backup" pointer, drill
//! records and alerts. Connections are opened for one operation and
//! dropped when it ends.

mod sqlite;

pub use sqlite::SqliteFleetStore;

use crate::config::{PlanTargets, PlanTier};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tenant deployment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Installation {
    pub id: String,
    pub instance_id: String,
    /// Raw plan name as stored; unknown names resolve as `standard`
    pub plan: Option<String>,
    pub rpo_target_minutes: Option<u32>,
    pub rto_target_minutes: Option<u32>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub dr_last_drill_at: Option<DateTime<Utc>>,
    pub dr_last_drill_status: Option<DrillStatus>,
    pub dr_last_rpo_minutes: Option<u32>,
    pub dr_last_rto_minutes: Option<u32>,
    /// Plan and targets the last drill was measured against
    pub dr_plan: Option<String>,
    pub dr_rpo_target_minutes: Option<u32>,
    pub dr_rto_target_minutes: Option<u32>,
}

/// "Last backup" record; also the on-disk pointer file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPointer {
    pub id: String,
    pub backup_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    pub last_backup_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// SHA-256 of the backup's manifest.json
    pub checksum: String,
    pub bucket: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillStatus {
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

impl DrillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrillStatus::Scheduled => "scheduled",
            DrillStatus::Running => "running",
            DrillStatus::Succeeded => "succeeded",
            DrillStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(DrillStatus::Scheduled),
            "running" => Some(DrillStatus::Running),
            "succeeded" => Some(DrillStatus::Succeeded),
            "failed" => Some(DrillStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DrillStatus::Succeeded | DrillStatus::Failed)
    }
}

impl std::fmt::Display for DrillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillRecord {
    pub id: String,
    pub installation_id: String,
    pub instance_id: String,
    pub status: DrillStatus,
    pub rpo_minutes: Option<u32>,
    pub rto_minutes: Option<u32>,
    pub scheduled_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub installation_id: String,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Operations the backup and drill runs need from the fleet store
pub trait FleetStore {
    /// The installation with `id`, or the most recently active one
    fn resolve_installation(&self, id: Option<&str>) -> Result<Installation>;

    fn upsert_installation(&self, installation: &Installation) -> Result<()>;

    /// Overwrite the single pointer slot of an instance
    fn record_backup(&self, pointer: &BackupPointer) -> Result<()>;

    fn last_backup(&self, instance_id: &str) -> Result<Option<BackupPointer>>;

    fn insert_drill(&self, drill: &DrillRecord) -> Result<()>;

    /// Move a running drill to its terminal state; fails if it is not running
    fn finish_drill(&self, drill: &DrillRecord) -> Result<()>;

    fn get_drill(&self, id: &str) -> Result<Option<DrillRecord>>;

    /// Copy a finished drill and the targets it was measured against into
    /// the installation's DR summary
    fn update_dr_summary(
        &self,
        installation_id: &str,
        drill: &DrillRecord,
        plan: PlanTier,
        targets: PlanTargets,
    ) -> Result<()>;

    fn insert_alert(&self, alert: &Alert) -> Result<()>;

    fn list_alerts(&self, installation_id: &str) -> Result<Vec<Alert>>;
}
