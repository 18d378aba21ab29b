//! Execution coordinator
//!
//! Runs commands inside a session's sandbox. Timeouts are enforced in the
//! sandbox itself by wrapping every command in `timeout -s KILL`, so a
//! stalled server cannot leave a process running past its bound.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::registry::SandboxRegistry;
use crate::config::SandboxConfig;
use crate::engine::{ContainerEngine, ExecSpec};
use crate::error::{Error, Result};

/// Exit status of GNU `timeout` when the bound expired
const TIMEOUT_EXIT: i64 = 124;
/// 128 + SIGKILL; BusyBox `timeout` reports this instead of 124
const KILLED_EXIT: i64 = 137;
/// Slack allowed when deciding whether a kill came from the timeout
const TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl ExecResult {
    /// Dispatch failure: the command never ran to completion
    pub fn failure(message: impl Into<String>) -> Self {
        ExecResult {
            success: false,
            output: message.into(),
            exit_code: -1,
            timed_out: false,
        }
    }

    pub fn timeout(bound_secs: u64) -> Self {
        ExecResult {
            success: false,
            output: format!("Execution timed out after {} seconds", bound_secs),
            exit_code: -1,
            timed_out: true,
        }
    }
}

/// Which stream is reported as the output of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPolicy {
    /// stdout on success; stderr on failure, falling back to stdout
    #[default]
    PreferStderrOnFailure,
    /// stdout regardless of the exit code
    StdoutOnly,
}

/// Pick the reported output for an exit code
pub fn select_output(policy: OutputPolicy, exit_code: i64, stdout: String, stderr: String) -> String {
    match policy {
        OutputPolicy::StdoutOnly => stdout,
        OutputPolicy::PreferStderrOnFailure if exit_code == 0 => stdout,
        OutputPolicy::PreferStderrOnFailure if stderr.is_empty() => stdout,
        OutputPolicy::PreferStderrOnFailure => stderr,
    }
}

/// Whether an exit status means the timeout wrapper killed the command
///
/// Both statuses can also come from the program itself, so they only
/// count once the bound has actually elapsed.
fn is_timeout(exit_code: i64, elapsed: Duration, bound: Duration) -> bool {
    match exit_code {
        TIMEOUT_EXIT | KILLED_EXIT => elapsed + TIMEOUT_SLACK >= bound,
        _ => false,
    }
}

/// Escape a literal for use inside a `pkill -f` extended regex
fn escape_pattern(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Executes commands in session sandboxes
pub struct ExecutionCoordinator {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<SandboxRegistry>,
    user: String,
    uid: u64,
    gid: u64,
    working_dir: String,
    kill_pattern: String,
}

impl ExecutionCoordinator {
    /// `process_names` are the compiler and runtime processes a cancellation signals
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<SandboxRegistry>,
        config: &SandboxConfig,
        process_names: &[&str],
    ) -> Self {
        let kill_pattern = process_names
            .iter()
            .map(|name| escape_pattern(name))
            .collect::<Vec<_>>()
            .join("|");

        ExecutionCoordinator {
            engine,
            registry,
            user: config.user.clone(),
            uid: config.uid,
            gid: config.gid,
            working_dir: config.working_dir.clone(),
            kill_pattern,
        }
    }

    /// Working directory commands run in
    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    /// Copy a file into the sandbox's working directory
    ///
    /// The file is transferred as a tar archive so it is owned by the
    /// execution user, then touched to normalize its timestamp.
    pub async fn write_file(&self, session_id: &str, filename: &str, content: &str) -> Result<()> {
        validate_filename(filename)?;
        let name = self.container_for(session_id).await?;

        let archive = self
            .archive(filename, content)
            .map_err(|e| Error::Transfer(format!("Failed to package {}: {}", filename, e)))?;

        self.engine
            .upload_archive(&name, &self.working_dir, archive)
            .await
            .map_err(|e| match e {
                Error::NotFound(msg) => Error::NotFound(msg),
                other => Error::Transfer(format!("Failed to copy {} into {}: {}", filename, name, other)),
            })?;

        let touch = ExecSpec::new(["touch", filename])
            .user(self.user.as_str())
            .working_dir(self.working_dir.as_str());
        match self.engine.exec(&name, &touch).await {
            Ok(out) if out.exit_code == 0 => {}
            Ok(out) => warn!("touch {} exited {}: {}", filename, out.exit_code, out.stderr.trim()),
            Err(e) => warn!("touch {} failed: {}", filename, e),
        }

        debug!("Wrote {} ({} bytes) into {}", filename, content.len(), name);
        Ok(())
    }

    /// Run a shell command with the default output policy
    ///
    /// Dispatch failures are folded into a failed result with exit code -1.
    pub async fn run(&self, session_id: &str, command: &str, timeout: Duration) -> ExecResult {
        self.run_with_policy(session_id, command, timeout, OutputPolicy::default())
            .await
    }

    pub async fn run_with_policy(
        &self,
        session_id: &str,
        command: &str,
        timeout: Duration,
        policy: OutputPolicy,
    ) -> ExecResult {
        match self.try_run(session_id, command, timeout, policy).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Exec in session {} failed: {}", session_id, e);
                ExecResult::failure(e.to_string())
            }
        }
    }

    /// Run a shell command, surfacing dispatch failures as errors
    pub async fn try_run(
        &self,
        session_id: &str,
        command: &str,
        timeout: Duration,
        policy: OutputPolicy,
    ) -> Result<ExecResult> {
        let name = self.container_for(session_id).await?;
        let bound_secs = timeout.as_secs().max(1);
        let bound = Duration::from_secs(bound_secs);

        let spec = ExecSpec::new([
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            bound_secs.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ])
        .user(self.user.as_str())
        .working_dir(self.working_dir.as_str());

        debug!("Exec in {} (timeout {}s): {}", name, bound_secs, command);

        let started = Instant::now();
        let output = self.engine.exec(&name, &spec).await.map_err(|e| match e {
            Error::NotFound(msg) => Error::NotFound(msg),
            other => Error::Exec(other.to_string()),
        })?;
        let elapsed = started.elapsed();

        if is_timeout(output.exit_code, elapsed, bound) {
            info!("Command in {} timed out after {}s", name, bound_secs);
            return Ok(ExecResult::timeout(bound_secs));
        }

        Ok(ExecResult {
            success: output.exit_code == 0,
            exit_code: output.exit_code,
            output: select_output(policy, output.exit_code, output.stdout, output.stderr),
            timed_out: false,
        })
    }

    /// Send a kill signal to known compiler/runtime processes
    ///
    /// Returns true once the signal was sent, whether or not anything
    /// matched. Termination is not awaited.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let Some(handle) = self.registry.lookup(session_id).await else {
            debug!("Cancel for session {} without sandbox", session_id);
            return false;
        };
        if self.kill_pattern.is_empty() {
            return false;
        }

        let spec = ExecSpec::new(["pkill", "-f", self.kill_pattern.as_str()]).user(self.user.as_str());
        match self.engine.exec(&handle.name, &spec).await {
            // 1: no process matched
            Ok(out) if out.exit_code == 0 || out.exit_code == 1 => {
                info!("Sent kill signal in {}", handle.name);
                true
            }
            Ok(out) => {
                warn!("pkill in {} exited {}: {}", handle.name, out.exit_code, out.stderr.trim());
                false
            }
            Err(e) => {
                warn!("pkill in {} failed: {}", handle.name, e);
                false
            }
        }
    }

    /// Read a file from the sandbox's working directory
    pub async fn read_file(&self, session_id: &str, filename: &str) -> Result<String> {
        let name = self
            .container_for(session_id)
            .await
            .map_err(|e| Error::Read(e.to_string()))?;

        let spec = ExecSpec::new(["cat", filename])
            .user(self.user.as_str())
            .working_dir(self.working_dir.as_str());
        let output = self
            .engine
            .exec(&name, &spec)
            .await
            .map_err(|e| Error::Read(format!("Failed to read {}: {}", filename, e)))?;

        if output.exit_code != 0 {
            return Err(Error::Read(format!(
                "Failed to read {}: {}",
                filename,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn container_for(&self, session_id: &str) -> Result<String> {
        self.registry
            .lookup(session_id)
            .await
            .map(|handle| handle.name)
            .ok_or_else(|| Error::NotFound(format!("No sandbox for session {}", session_id)))
    }

    fn archive(&self, filename: &str, content: &str) -> std::io::Result<Vec<u8>> {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        header.set_username(&self.user)?;
        header.set_groupname(&self.user)?;
        header.set_mtime(mtime);

        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, filename, content.as_bytes())?;
        builder.into_inner()
    }
}

/// Reject names that would escape the working directory
fn validate_filename(filename: &str) -> Result<()> {
    let bad = filename.is_empty()
        || filename.starts_with('/')
        || filename.split('/').any(|part| part == ".." || part.is_empty());
    if bad {
        return Err(Error::InvalidInput(format!("Invalid filename: {:?}", filename)));
    }
    Ok(())
}
