//! Configuration module for backup-dr
//!
//! All settings come from environment variables; a `.env` file in the
//! working directory is loaded first when present.
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_dr::config::{self, ProcessEnv};
//!
//! let env = ProcessEnv::load();
//! let global = config::load_global(&env)?;
//! let backup = config::load_backup(&env)?;
//!
//! println!("Writing backups to {:?}", global.output_dir);
//! # Ok::<(), backup_dr::config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    control_plane_path, load_backup, load_backup_selector, load_drill, load_drill_restore,
    load_global, load_restore, ConfigError, EnvSource, ProcessEnv, Result,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
