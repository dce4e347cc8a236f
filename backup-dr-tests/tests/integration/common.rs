//! Common utilities for integration tests
//!
//! This module provides cleanup guards and helper functions for integration tests.

use anyhow::Result;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// Guard that ensures Docker container cleanup on drop (even on panic)
pub struct ContainerGuard {
    name: String,
}

impl ContainerGuard {
    pub fn new(name: &str) -> Self {
        cleanup_container(name);
        Self { name: name.to_string() }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        cleanup_container(&self.name);
    }
}

/// Helper to stop and remove a Docker container
/// The -v flag also removes anonymous volumes associated with the container
fn cleanup_container(name: &str) {
    let _ = Command::new("docker").args(["stop", name]).output();
    let _ = Command::new("docker").args(["rm", "-v", name]).output();
}

/// Helper to check if Docker is available
pub fn is_docker_available() -> bool {
    Command::new("docker")
        .args(["ps"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether every client tool the orchestrators shell out to is installed
pub fn client_tools_available() -> bool {
    ["pg_dump", "pg_restore", "psql", "redis-cli"].iter().all(|tool| {
        Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

/// Start PostgreSQL with `port` published and wait until it accepts connections
pub fn start_postgres(name: &str, port: u16) -> Result<ContainerGuard> {
    let guard = ContainerGuard::new(name);
    let output = Command::new("docker")
        .args([
            "run",
            "-d",
            "--name",
            name,
            "-p",
            &format!("{}:5432", port),
            "-e",
            "POSTGRES_PASSWORD=testpass",
            "-e",
            "POSTGRES_DB=erp",
            "postgres:16-alpine",
        ])
        .output()?;
    if !output.status.success() {
        anyhow::bail!("docker run failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    for _ in 0..60 {
        let ready = Command::new("docker")
            .args(["exec", name, "pg_isready", "-U", "postgres", "-d", "erp"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if ready {
            // The entrypoint restarts the server once after init
            thread::sleep(Duration::from_secs(2));
            return Ok(guard);
        }
        thread::sleep(Duration::from_secs(1));
    }
    Err(anyhow::anyhow!("PostgreSQL failed to become ready"))
}

/// Start Redis with `port` published
pub fn start_redis(name: &str, port: u16) -> Result<ContainerGuard> {
    let guard = ContainerGuard::new(name);
    let output = Command::new("docker")
        .args(["run", "-d", "--name", name, "-p", &format!("{}:6379", port), "redis:7-alpine"])
        .output()?;
    if !output.status.success() {
        anyhow::bail!("docker run failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    for _ in 0..30 {
        let pong = Command::new("docker")
            .args(["exec", name, "redis-cli", "PING"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "PONG")
            .unwrap_or(false);
        if pong {
            return Ok(guard);
        }
        thread::sleep(Duration::from_secs(1));
    }
    Err(anyhow::anyhow!("Redis failed to become ready"))
}

/// Execute SQL in the container and return trimmed tuples-only output
pub fn exec_sql(container: &str, database: &str, sql: &str) -> Result<String> {
    let output = Command::new("docker")
        .args(["exec", container, "psql", "-U", "postgres", "-d", database, "-tA", "-c", sql])
        .output()?;
    if !output.status.success() {
        anyhow::bail!("psql failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a redis-cli command in the container
pub fn exec_redis(container: &str, db: u8, args: &[&str]) -> Result<String> {
    let db = db.to_string();
    let mut full = vec!["exec", container, "redis-cli", "-n", db.as_str()];
    full.extend_from_slice(args);
    let output = Command::new("docker").args(&full).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
