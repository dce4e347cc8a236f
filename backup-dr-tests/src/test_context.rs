//! Test context and harness for integration testing
//!
//! Provides a unified context for setting up and tearing down test environments.

use backup_dr::store::SqliteFleetStore;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory for test files
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the fleet store file used by this context
    pub fn store_path(&self) -> PathBuf {
        self.temp_dir.path().join("fleet.db")
    }

    /// Open (creating if needed) the context's fleet store
    pub fn open_store(&self) -> SqliteFleetStore {
        SqliteFleetStore::open(&self.store_path()).expect("Failed to open fleet store")
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Write a `.env` file with the given variables
    pub fn create_dotenv(&self, vars: &[(&str, &str)]) -> PathBuf {
        let content: String = vars.iter().map(|(k, v)| format!("{}={}\n", k, v)).collect();
        self.create_file(".env", &content)
    }

    /// Check if a file exists in the temp directory
    pub fn file_exists(&self, name: &str) -> bool {
        self.temp_dir.path().join(name).exists()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
