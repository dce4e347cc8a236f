use super::{Alert, BackupPointer, DrillRecord, DrillStatus, FleetStore, Installation};
use crate::config::{PlanTargets, PlanTier};
use crate::error::{Error, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS installations (
  id TEXT PRIMARY KEY,
  instance_id TEXT NOT NULL,
  plan TEXT,
  rpo_target_minutes INTEGER,
  rto_target_minutes INTEGER,
  last_active_at TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS backup_pointers (
  instance_id TEXT PRIMARY KEY,
  id TEXT NOT NULL,
  backup_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  last_backup_at TEXT NOT NULL,
  size_bytes INTEGER NOT NULL DEFAULT 0,
  checksum TEXT NOT NULL,
  bucket TEXT,
  path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dr_drills (
  id TEXT PRIMARY KEY,
  installation_id TEXT NOT NULL REFERENCES installations(id) ON DELETE CASCADE,
  instance_id TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'scheduled' CHECK(status IN ('scheduled','running','succeeded','failed')),
  rpo_minutes INTEGER,
  rto_minutes INTEGER,
  scheduled_at TEXT NOT NULL,
  finished_at TEXT,
  notes TEXT,
  meta TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS alerts (
  id TEXT PRIMARY KEY,
  installation_id TEXT NOT NULL REFERENCES installations(id) ON DELETE CASCADE,
  level TEXT NOT NULL CHECK(level IN ('info','warning','error')),
  message TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dr_drills_installation ON dr_drills(installation_id);
CREATE INDEX IF NOT EXISTS idx_alerts_installation ON alerts(installation_id, created_at);
"#;

/// DR summary columns, added in place on stores created before they existed
const SUMMARY_COLUMNS: &[(&str, &str)] = &[
    ("dr_last_drill_at", "TEXT"),
    ("dr_last_drill_status", "TEXT"),
    ("dr_last_rpo_minutes", "INTEGER"),
    ("dr_last_rto_minutes", "INTEGER"),
    ("dr_plan", "TEXT"),
    ("dr_rpo_target_minutes", "INTEGER"),
    ("dr_rto_target_minutes", "INTEGER"),
];

impl ToSql for DrillStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for DrillStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        DrillStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown drill status '{}'", text).into()))
    }
}

/// SQLite-backed fleet store
pub struct SqliteFleetStore {
    conn: Connection,
}

impl SqliteFleetStore {
    /// Open (creating if needed) the store at `path` and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening fleet store at {:?}", path);
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(columns.iter().any(|c| c == column))
    }

    /// Idempotent: safe on every open
    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        for (column, kind) in SUMMARY_COLUMNS {
            if !self.has_column("installations", column)? {
                info!("Adding installations.{} to fleet store", column);
                self.conn.execute_batch(&format!(
                    "ALTER TABLE installations ADD COLUMN {} {}",
                    column, kind
                ))?;
            }
        }
        Ok(())
    }
}

fn installation_from_row(row: &Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: row.get("id")?,
        instance_id: row.get("instance_id")?,
        plan: row.get("plan")?,
        rpo_target_minutes: row.get("rpo_target_minutes")?,
        rto_target_minutes: row.get("rto_target_minutes")?,
        last_active_at: row.get("last_active_at")?,
        dr_last_drill_at: row.get("dr_last_drill_at")?,
        dr_last_drill_status: row.get("dr_last_drill_status")?,
        dr_last_rpo_minutes: row.get("dr_last_rpo_minutes")?,
        dr_last_rto_minutes: row.get("dr_last_rto_minutes")?,
        dr_plan: row.get("dr_plan")?,
        dr_rpo_target_minutes: row.get("dr_rpo_target_minutes")?,
        dr_rto_target_minutes: row.get("dr_rto_target_minutes")?,
    })
}

fn pointer_from_row(row: &Row<'_>) -> rusqlite::Result<BackupPointer> {
    let size: i64 = row.get("size_bytes")?;
    Ok(BackupPointer {
        id: row.get("id")?,
        backup_id: row.get("backup_id")?,
        instance_id: row.get("instance_id")?,
        created_at: row.get("created_at")?,
        last_backup_at: row.get("last_backup_at")?,
        size_bytes: size.max(0) as u64,
        checksum: row.get("checksum")?,
        bucket: row.get("bucket")?,
        path: row.get("path")?,
    })
}

fn drill_from_row(row: &Row<'_>) -> rusqlite::Result<DrillRecord> {
    let meta: String = row.get("meta")?;
    Ok(DrillRecord {
        id: row.get("id")?,
        installation_id: row.get("installation_id")?,
        instance_id: row.get("instance_id")?,
        status: row.get("status")?,
        rpo_minutes: row.get("rpo_minutes")?,
        rto_minutes: row.get("rto_minutes")?,
        scheduled_at: row.get("scheduled_at")?,
        finished_at: row.get("finished_at")?,
        notes: row.get("notes")?,
        meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
    })
}

const INSTALLATION_COLUMNS: &str = "id, instance_id, plan, rpo_target_minutes, rto_target_minutes, \
     last_active_at, dr_last_drill_at, dr_last_drill_status, dr_last_rpo_minutes, dr_last_rto_minutes, \
     dr_plan, dr_rpo_target_minutes, dr_rto_target_minutes";

impl FleetStore for SqliteFleetStore {
    fn resolve_installation(&self, id: Option<&str>) -> Result<Installation> {
        let found = match id {
            Some(id) => self
                .conn
                .query_row(
                    &format!("SELECT {} FROM installations WHERE id = ?1", INSTALLATION_COLUMNS),
                    params![id],
                    installation_from_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    &format!(
                        "SELECT {} FROM installations \
                         ORDER BY last_active_at IS NULL, last_active_at DESC, created_at DESC LIMIT 1",
                        INSTALLATION_COLUMNS
                    ),
                    [],
                    installation_from_row,
                )
                .optional()?,
        };

        found.ok_or_else(|| match id {
            Some(id) => Error::NotFound(format!("Installation '{}' not found", id)),
            None => Error::NotFound("No installation registered in the fleet store".to_string()),
        })
    }

    fn upsert_installation(&self, installation: &Installation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO installations (id, instance_id, plan, rpo_target_minutes, rto_target_minutes, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               instance_id = excluded.instance_id,
               plan = excluded.plan,
               rpo_target_minutes = excluded.rpo_target_minutes,
               rto_target_minutes = excluded.rto_target_minutes,
               last_active_at = excluded.last_active_at",
            params![
                installation.id,
                installation.instance_id,
                installation.plan,
                installation.rpo_target_minutes,
                installation.rto_target_minutes,
                installation.last_active_at,
            ],
        )?;
        Ok(())
    }

    fn record_backup(&self, pointer: &BackupPointer) -> Result<()> {
        self.conn.execute(
            "INSERT INTO backup_pointers (instance_id, id, backup_id, created_at, last_backup_at, size_bytes, checksum, bucket, path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(instance_id) DO UPDATE SET
               id = excluded.id,
               backup_id = excluded.backup_id,
               created_at = excluded.created_at,
               last_backup_at = excluded.last_backup_at,
               size_bytes = excluded.size_bytes,
               checksum = excluded.checksum,
               bucket = excluded.bucket,
               path = excluded.path",
            params![
                pointer.instance_id,
                pointer.id,
                pointer.backup_id,
                pointer.created_at,
                pointer.last_backup_at,
                pointer.size_bytes as i64,
                pointer.checksum,
                pointer.bucket,
                pointer.path,
            ],
        )?;
        debug!("Recorded backup {} for instance {}", pointer.backup_id, pointer.instance_id);
        Ok(())
    }

    fn last_backup(&self, instance_id: &str) -> Result<Option<BackupPointer>> {
        Ok(self
            .conn
            .query_row(
                "SELECT instance_id, id, backup_id, created_at, last_backup_at, size_bytes, checksum, bucket, path
                 FROM backup_pointers WHERE instance_id = ?1",
                params![instance_id],
                pointer_from_row,
            )
            .optional()?)
    }

    fn insert_drill(&self, drill: &DrillRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dr_drills (id, installation_id, instance_id, status, rpo_minutes, rto_minutes, scheduled_at, finished_at, notes, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                drill.id,
                drill.installation_id,
                drill.instance_id,
                drill.status,
                drill.rpo_minutes,
                drill.rto_minutes,
                drill.scheduled_at,
                drill.finished_at,
                drill.notes,
                serde_json::to_string(&drill.meta)?,
            ],
        )?;
        Ok(())
    }

    fn finish_drill(&self, drill: &DrillRecord) -> Result<()> {
        if !drill.status.is_terminal() {
            return Err(Error::NotFound(format!(
                "Drill {} cannot finish in status {}",
                drill.id, drill.status
            )));
        }
        let changed = self.conn.execute(
            "UPDATE dr_drills
             SET status = ?2, rpo_minutes = ?3, rto_minutes = ?4, finished_at = ?5, notes = ?6, meta = ?7
             WHERE id = ?1 AND status = 'running'",
            params![
                drill.id,
                drill.status,
                drill.rpo_minutes,
                drill.rto_minutes,
                drill.finished_at,
                drill.notes,
                serde_json::to_string(&drill.meta)?,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("No running drill with id {}", drill.id)));
        }
        Ok(())
    }

    fn get_drill(&self, id: &str) -> Result<Option<DrillRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, installation_id, instance_id, status, rpo_minutes, rto_minutes, scheduled_at, finished_at, notes, meta
                 FROM dr_drills WHERE id = ?1",
                params![id],
                drill_from_row,
            )
            .optional()?)
    }

    fn update_dr_summary(
        &self,
        installation_id: &str,
        drill: &DrillRecord,
        plan: PlanTier,
        targets: PlanTargets,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE installations
             SET dr_last_drill_at = ?2, dr_last_drill_status = ?3, dr_last_rpo_minutes = ?4, dr_last_rto_minutes = ?5,
                 dr_plan = ?6, dr_rpo_target_minutes = ?7, dr_rto_target_minutes = ?8
             WHERE id = ?1",
            params![
                installation_id,
                drill.finished_at.unwrap_or(drill.scheduled_at),
                drill.status,
                drill.rpo_minutes,
                drill.rto_minutes,
                plan.as_str(),
                targets.rpo_target_minutes,
                targets.rto_target_minutes,
            ],
        )?;
        Ok(())
    }

    fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.conn.execute(
            "INSERT INTO alerts (id, installation_id, level, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert.id,
                alert.installation_id,
                alert.level,
                alert.message,
                alert.created_at
            ],
        )?;
        Ok(())
    }

    fn list_alerts(&self, installation_id: &str) -> Result<Vec<Alert>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, installation_id, level, message, created_at FROM alerts
             WHERE installation_id = ?1 ORDER BY created_at, id",
        )?;
        let alerts = stmt
            .query_map(params![installation_id], |row| {
                Ok(Alert {
                    id: row.get(0)?,
                    installation_id: row.get(1)?,
                    level: row.get(2)?,
                    message: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }
}
