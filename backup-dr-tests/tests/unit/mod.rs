//! Unit tests for backup-dr
//!
//! These tests exercise configuration, artifact sealing, retention and the
//! fleet store without any external service.

mod crypto;
mod retention;
mod store;
