//! Key-value store operations
//!
//! The real implementation drives `redis-cli`; serialized values travel as
//! raw bytes (stdout of `--raw DUMP`, stdin of `-x RESTORE`).

use super::command::CommandOptions;
use super::executor::CommandExecutor;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Abstraction for key-value store operations, enabling mocking in tests
pub trait KeyValueOperations: Send + Sync {
    /// Enumerate every key (SCAN)
    fn scan_keys(&self, url: &str, timeout: Duration) -> Result<Vec<String>>;

    /// Serialized value of a key, `None` if it no longer exists
    fn dump_key(&self, url: &str, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Remaining TTL in milliseconds (-1 = no expiry, -2 = missing)
    fn pttl(&self, url: &str, key: &str, timeout: Duration) -> Result<i64>;

    /// Remove every key from the target
    fn flush_all(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Recreate a key from its serialized value, replacing any existing key
    fn restore_key(&self, url: &str, key: &str, ttl_ms: i64, payload: &[u8], timeout: Duration) -> Result<()>;

    /// Number of keys in the current database
    fn dbsize(&self, url: &str, timeout: Duration) -> Result<u64>;
}

/// `redis-cli` backed implementation
#[derive(Clone)]
pub struct RealRedisOps {
    executor: Arc<dyn CommandExecutor>,
}

impl RealRedisOps {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn cli(&self, url: &str, args: &[&str], options: &CommandOptions, timeout: Duration) -> Result<Vec<u8>> {
        let mut full = vec!["-u", url];
        full.extend_from_slice(args);
        let output = self.executor.run_command("redis-cli", &full, options, timeout)?;
        Ok(output.stdout)
    }

    fn cli_text(&self, url: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let stdout = self.cli(url, args, &CommandOptions::new(), timeout)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

/// redis-cli exits 0 on some error replies; treat those as failures
fn reply_error(reply: &str) -> Option<&str> {
    let reply = reply.strip_prefix("(error) ").unwrap_or(reply);
    let code = reply.split_whitespace().next().unwrap_or("");
    if !code.is_empty() && code.chars().all(|c| c.is_ascii_uppercase()) && code != "OK" {
        Some(reply)
    } else {
        None
    }
}

impl KeyValueOperations for RealRedisOps {
    fn scan_keys(&self, url: &str, timeout: Duration) -> Result<Vec<String>> {
        let stdout = self.cli(url, &["--scan", "--count", "1000"], &CommandOptions::new(), timeout)?;
        let mut keys: Vec<String> = String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn dump_key(&self, url: &str, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut stdout = self.cli(url, &["--raw", "DUMP", key], &CommandOptions::new(), timeout)?;
        if stdout.last() == Some(&b'\n') {
            stdout.pop();
        }
        // A serialized value is never empty; an empty reply is nil
        if stdout.is_empty() {
            Ok(None)
        } else {
            Ok(Some(stdout))
        }
    }

    fn pttl(&self, url: &str, key: &str, timeout: Duration) -> Result<i64> {
        let reply = self.cli_text(url, &["PTTL", key], timeout)?;
        let reply = reply.strip_prefix("(integer) ").unwrap_or(&reply);
        reply.parse::<i64>().map_err(|_| Error::ToolFailure {
            command: format!("redis-cli PTTL {}", key),
            code: Some(0),
            stderr: format!("unexpected reply: {}", reply),
        })
    }

    fn flush_all(&self, url: &str, timeout: Duration) -> Result<()> {
        let reply = self.cli_text(url, &["FLUSHALL"], timeout)?;
        if let Some(err) = reply_error(&reply) {
            return Err(Error::ToolFailure {
                command: "redis-cli FLUSHALL".to_string(),
                code: Some(0),
                stderr: err.to_string(),
            });
        }
        Ok(())
    }

    fn restore_key(&self, url: &str, key: &str, ttl_ms: i64, payload: &[u8], timeout: Duration) -> Result<()> {
        debug!("Restoring key {} (ttl {})", key, ttl_ms);
        let reason = |e: Error| Error::KeyRestore {
            key: key.to_string(),
            reason: e.to_string(),
        };

        // -x always appends stdin as the last argument, so REPLACE is done as DEL first
        let deleted = self.cli_text(url, &["DEL", key], timeout).map_err(reason)?;
        if let Some(err) = reply_error(&deleted) {
            return Err(Error::KeyRestore {
                key: key.to_string(),
                reason: err.to_string(),
            });
        }

        let ttl = ttl_ms.max(0).to_string();
        let options = CommandOptions::new().stdin(payload.to_vec());
        let stdout = self
            .cli(url, &["-x", "RESTORE", key, &ttl], &options, timeout)
            .map_err(reason)?;
        let reply = String::from_utf8_lossy(&stdout).trim().to_string();
        if reply != "OK" {
            return Err(Error::KeyRestore {
                key: key.to_string(),
                reason: reply,
            });
        }
        Ok(())
    }

    fn dbsize(&self, url: &str, timeout: Duration) -> Result<u64> {
        let reply = self.cli_text(url, &["DBSIZE"], timeout)?;
        let reply = reply.strip_prefix("(integer) ").unwrap_or(&reply);
        reply.parse::<u64>().map_err(|_| Error::ToolFailure {
            command: "redis-cli DBSIZE".to_string(),
            code: Some(0),
            stderr: format!("unexpected reply: {}", reply),
        })
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    /// One stored entry: serialized value and TTL in ms (-1 = none)
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MockEntry {
        pub payload: Vec<u8>,
        pub ttl_ms: i64,
    }

    /// In-memory key-value servers keyed by URL
    #[derive(Clone, Default)]
    pub struct MockRedisOps {
        servers: Arc<Mutex<HashMap<String, BTreeMap<String, MockEntry>>>>,
        /// Keys that make `restore_key` fail
        failing_keys: Arc<Mutex<Vec<String>>>,
        /// Keys that disappear between SCAN and DUMP
        vanishing_keys: Arc<Mutex<Vec<String>>>,
        pub flush_count: Arc<Mutex<usize>>,
        pub restore_attempts: Arc<Mutex<Vec<String>>>,
    }

    impl MockRedisOps {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a key on a server
        pub fn with_key(self, url: &str, key: &str, payload: &[u8], ttl_ms: i64) -> Self {
            self.servers
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .insert(
                    key.to_string(),
                    MockEntry {
                        payload: payload.to_vec(),
                        ttl_ms,
                    },
                );
            self
        }

        pub fn with_failing_key(self, key: &str) -> Self {
            self.failing_keys.lock().unwrap().push(key.to_string());
            self
        }

        pub fn with_vanishing_key(self, key: &str) -> Self {
            self.vanishing_keys.lock().unwrap().push(key.to_string());
            self
        }

        /// Snapshot of a server's contents
        pub fn entries(&self, url: &str) -> BTreeMap<String, MockEntry> {
            self.servers
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl KeyValueOperations for MockRedisOps {
        fn scan_keys(&self, url: &str, _timeout: Duration) -> Result<Vec<String>> {
            Ok(self.entries(url).keys().cloned().collect())
        }

        fn dump_key(&self, url: &str, key: &str, _timeout: Duration) -> Result<Option<Vec<u8>>> {
            if self.vanishing_keys.lock().unwrap().iter().any(|k| k == key) {
                return Ok(None);
            }
            Ok(self.entries(url).get(key).map(|e| e.payload.clone()))
        }

        fn pttl(&self, url: &str, key: &str, _timeout: Duration) -> Result<i64> {
            Ok(self.entries(url).get(key).map(|e| e.ttl_ms).unwrap_or(-2))
        }

        fn flush_all(&self, url: &str, _timeout: Duration) -> Result<()> {
            *self.flush_count.lock().unwrap() += 1;
            self.servers.lock().unwrap().remove(url);
            Ok(())
        }

        fn restore_key(&self, url: &str, key: &str, ttl_ms: i64, payload: &[u8], _timeout: Duration) -> Result<()> {
            self.restore_attempts.lock().unwrap().push(key.to_string());
            if self.failing_keys.lock().unwrap().iter().any(|k| k == key) {
                return Err(Error::KeyRestore {
                    key: key.to_string(),
                    reason: "ERR DUMP payload version or checksum are wrong".to_string(),
                });
            }
            self.servers
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .insert(
                    key.to_string(),
                    MockEntry {
                        payload: payload.to_vec(),
                        ttl_ms: if ttl_ms > 0 { ttl_ms } else { -1 },
                    },
                );
            Ok(())
        }

        fn dbsize(&self, url: &str, _timeout: Duration) -> Result<u64> {
            Ok(self.entries(url).len() as u64)
        }
    }
}
