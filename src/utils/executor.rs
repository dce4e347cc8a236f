//! Command execution abstraction for testability
//!
//! Every external tool (pg_dump, pg_restore, psql, redis-cli, smoke-test
//! commands) goes through a [`CommandExecutor`], which lets the engine
//! adapters be exercised against a recording mock.

use super::command::CommandOptions;
use crate::error::Result;
use std::process::Output;
use std::time::Duration;
use tokio::runtime::Handle;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command with a mandatory deadline
    fn run_command(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
        timeout: Duration,
    ) -> Result<Output>;

    /// Run a command and return stdout as string
    fn run_command_stdout(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
        timeout: Duration,
    ) -> Result<String> {
        let output = self.run_command(program, args, options, timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a shell command
    fn run_shell_command(
        &self,
        command: &str,
        options: &CommandOptions,
        timeout: Duration,
    ) -> Result<Output> {
        self.run_command("sh", &["-c", command], options, timeout)
    }
}

/// Default implementation using real subprocess calls
///
/// Needs a handle to a multi-threaded runtime; `block_on` is called from
/// the owning (non-runtime) thread.
#[derive(Debug, Clone)]
pub struct RealExecutor {
    handle: Handle,
}

impl RealExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl CommandExecutor for RealExecutor {
    fn run_command(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
        timeout: Duration,
    ) -> Result<Output> {
        super::command::run_command(&self.handle, program, args, options, timeout)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub envs: Vec<(String, String)>,
        pub stdin: Option<Vec<u8>>,
    }

    impl CommandCall {
        /// Whether `value` appears among the arguments
        pub fn has_arg(&self, value: &str) -> bool {
            self.args.iter().any(|a| a == value)
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: Vec<u8>, stderr: String },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl MockResponse {
        pub fn stdout(text: &str) -> Self {
            MockResponse::Success {
                stdout: text.as_bytes().to_vec(),
                stderr: String::new(),
            }
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: Vec::new(),
                stderr: String::new(),
            }
        }
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        /// Pre-configured responses: program name -> response
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        /// Default response when no specific response is configured
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for a specific program
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(program.to_string(), response);
            self
        }

        /// Set the default response for unconfigured programs
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Check if a program was called
        pub fn was_called(&self, program: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.program == program)
        }

        /// Get number of calls to a specific program
        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        fn record_call(&self, program: &str, args: &[&str], options: &CommandOptions) {
            self.calls.lock().unwrap().push(CommandCall {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                envs: options.envs.clone(),
                stdin: options.stdin.clone(),
            });
        }

        fn get_response(&self, program: &str) -> MockResponse {
            self.responses
                .lock()
                .unwrap()
                .get(program)
                .cloned()
                .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run_command(
            &self,
            program: &str,
            args: &[&str],
            options: &CommandOptions,
            timeout: Duration,
        ) -> Result<Output> {
            self.record_call(program, args, options);
            let command = crate::utils::command::display_command(program, args);
            match self.get_response(program) {
                MockResponse::Success { stdout, stderr } => Ok(Output {
                    status: std::process::ExitStatus::default(),
                    stdout,
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Failure { stderr, exit_code } => Err(Error::ToolFailure {
                    command,
                    code: Some(exit_code),
                    stderr,
                }),
                MockResponse::Timeout => Err(Error::ProcessTimeout { command, timeout }),
            }
        }
    }
}
