//! Relational store operations
//!
//! The real implementation shells out to the PostgreSQL client tools through
//! a [`CommandExecutor`]; the mock keeps a fake database in memory.

use super::command::CommandOptions;
use super::executor::CommandExecutor;
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Abstraction for relational store operations, enabling mocking in tests
pub trait DatabaseOperations: Send + Sync {
    /// Dump the database into a custom-format archive
    fn dump(&self, database_url: &str, output: &Path, timeout: Duration) -> Result<()>;

    /// Restore an archive, dropping and recreating existing objects
    fn restore(&self, database_url: &str, dump: &Path, timeout: Duration) -> Result<()>;

    /// Run a query and return the first column of each row
    fn query_lines(&self, database_url: &str, sql: &str, timeout: Duration) -> Result<Vec<String>>;
}

/// PostgreSQL client tools (`pg_dump`, `pg_restore`, `psql`)
#[derive(Clone)]
pub struct RealDatabaseOps {
    executor: Arc<dyn CommandExecutor>,
}

impl RealDatabaseOps {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

impl DatabaseOperations for RealDatabaseOps {
    fn dump(&self, database_url: &str, output: &Path, timeout: Duration) -> Result<()> {
        info!("Dumping database to {:?}", output);
        let dbname = format!("--dbname={}", database_url);
        let file = format!("--file={}", output.display());
        self.executor.run_command(
            "pg_dump",
            &["--format=custom", "--no-owner", &dbname, &file],
            &CommandOptions::new(),
            timeout,
        )?;
        Ok(())
    }

    fn restore(&self, database_url: &str, dump: &Path, timeout: Duration) -> Result<()> {
        info!("Restoring {:?} into target database (clean mode)", dump);
        let dbname = format!("--dbname={}", database_url);
        let dump = dump.display().to_string();
        self.executor.run_command(
            "pg_restore",
            &[
                "--clean",
                "--if-exists",
                "--no-owner",
                "--no-privileges",
                "--exit-on-error",
                &dbname,
                &dump,
            ],
            &CommandOptions::new(),
            timeout,
        )?;
        Ok(())
    }

    fn query_lines(&self, database_url: &str, sql: &str, timeout: Duration) -> Result<Vec<String>> {
        let stdout = self.executor.run_command_stdout(
            "psql",
            &[
                database_url,
                "--no-psqlrc",
                "--tuples-only",
                "--no-align",
                "--set=ON_ERROR_STOP=1",
                "--command",
                sql,
            ],
            &CommandOptions::new(),
            timeout,
        )?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Recorded database operation call
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum DatabaseCall {
        Dump { url: String },
        Restore { url: String, dump: String },
        Query { url: String, sql: String },
    }

    /// Mock relational store: dumps write fixed bytes, queries answer from a table
    #[derive(Clone, Default)]
    pub struct MockDatabaseOps {
        pub calls: Arc<Mutex<Vec<DatabaseCall>>>,
        dump_content: Arc<Mutex<Vec<u8>>>,
        /// SQL substring -> rows
        answers: Arc<Mutex<Vec<(String, Vec<String>)>>>,
        /// Contents seen by restore, keyed by target URL
        pub restored: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_dump: Arc<Mutex<bool>>,
        fail_restore: Arc<Mutex<bool>>,
    }

    impl MockDatabaseOps {
        pub fn new() -> Self {
            Self {
                dump_content: Arc::new(Mutex::new(b"PGDMP mock dump".to_vec())),
                ..Self::default()
            }
        }

        /// Bytes written by `dump`
        pub fn with_dump_content(self, content: &[u8]) -> Self {
            *self.dump_content.lock().unwrap() = content.to_vec();
            self
        }

        /// Answer queries containing `sql_fragment` with `rows`
        pub fn with_answer(self, sql_fragment: &str, rows: &[&str]) -> Self {
            self.answers.lock().unwrap().push((
                sql_fragment.to_string(),
                rows.iter().map(|r| r.to_string()).collect(),
            ));
            self
        }

        /// Answers for the built-in smoke checks of a healthy database
        pub fn healthy(self) -> Self {
            self.with_answer("SELECT 1", &["1"])
                .with_answer("information_schema.tables", &["3"])
        }

        pub fn with_failing_dump(self) -> Self {
            *self.fail_dump.lock().unwrap() = true;
            self
        }

        pub fn with_failing_restore(self) -> Self {
            *self.fail_restore.lock().unwrap() = true;
            self
        }

        pub fn get_calls(&self) -> Vec<DatabaseCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn dump_called(&self) -> bool {
            self.get_calls()
                .iter()
                .any(|c| matches!(c, DatabaseCall::Dump { .. }))
        }

        pub fn restore_called(&self) -> bool {
            self.get_calls()
                .iter()
                .any(|c| matches!(c, DatabaseCall::Restore { .. }))
        }

        /// Bytes restored into `url`, if any
        pub fn restored_into(&self, url: &str) -> Option<Vec<u8>> {
            self.restored.lock().unwrap().get(url).cloned()
        }
    }

    impl DatabaseOperations for MockDatabaseOps {
        fn dump(&self, database_url: &str, output: &Path, _timeout: Duration) -> Result<()> {
            self.calls.lock().unwrap().push(DatabaseCall::Dump {
                url: database_url.to_string(),
            });
            if *self.fail_dump.lock().unwrap() {
                return Err(Error::ToolFailure {
                    command: "pg_dump".to_string(),
                    code: Some(1),
                    stderr: "connection refused".to_string(),
                });
            }
            std::fs::write(output, &*self.dump_content.lock().unwrap())?;
            Ok(())
        }

        fn restore(&self, database_url: &str, dump: &Path, _timeout: Duration) -> Result<()> {
            self.calls.lock().unwrap().push(DatabaseCall::Restore {
                url: database_url.to_string(),
                dump: dump.display().to_string(),
            });
            if *self.fail_restore.lock().unwrap() {
                return Err(Error::ToolFailure {
                    command: "pg_restore".to_string(),
                    code: Some(1),
                    stderr: "could not connect".to_string(),
                });
            }
            let content = std::fs::read(dump)?;
            self.restored
                .lock()
                .unwrap()
                .insert(database_url.to_string(), content);
            Ok(())
        }

        fn query_lines(&self, database_url: &str, sql: &str, _timeout: Duration) -> Result<Vec<String>> {
            self.calls.lock().unwrap().push(DatabaseCall::Query {
                url: database_url.to_string(),
                sql: sql.to_string(),
            });
            Ok(self
                .answers
                .lock()
                .unwrap()
                .iter()
                .find(|(fragment, _)| sql.contains(fragment.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }
    }
}
