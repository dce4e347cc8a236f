//! Command tests for backup-dr
//!
//! These tests drive each subcommand's orchestrator end to end using mocked
//! database, key-value and storage dependencies.

mod restore;
mod drill;
mod verify;
