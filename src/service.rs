//! Application context
//!
//! [`CodeService`] is constructed once at startup and shared by every
//! request path. It owns the sandbox manager, execution coordinator,
//! operation table, session store and language adapters; nothing in the
//! crate keeps process-wide mutable state outside of it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{ContainerEngine, DockerEngine};
use crate::error::{Error, Result};
use crate::language::{AdapterRegistry, CompileOutcome, Language, SourceFile, Submission};
use crate::operations::{OperationId, OperationKind, OperationTable, PollResult};
use crate::sandbox::{ExecResult, ExecutionCoordinator, SandboxInfo, SandboxManager, SandboxRegistry};
use crate::session::SessionStore;

/// A compile, run or verify request
#[derive(Debug, Clone, Deserialize)]
pub struct CodeRequest {
    pub language: Language,
    /// Single-file source; ignored when `files` is non-empty
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub main_file: Option<String>,
    /// Requested timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl CodeRequest {
    pub fn single(language: Language, code: impl Into<String>) -> Self {
        CodeRequest {
            language,
            code: Some(code.into()),
            files: Vec::new(),
            main_file: None,
            timeout: None,
        }
    }

    /// Normalize into a submission with a known main file
    pub fn submission(&self) -> Result<Submission> {
        if !self.files.is_empty() {
            let main_file = match &self.main_file {
                Some(main) => main.clone(),
                None => self.files[0].name.clone(),
            };
            let submission = Submission::new(self.files.clone(), main_file);
            submission.main()?;
            return Ok(submission);
        }

        let code = self
            .code
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("No code submitted".to_string()))?;
        let name = self
            .main_file
            .clone()
            .unwrap_or_else(|| self.language.default_filename().to_string());
        Ok(Submission::single(name, code.clone()))
    }
}

/// Identifiers handed back when a background operation starts
#[derive(Debug, Clone, Serialize)]
pub struct StartedOperation {
    pub execution_id: OperationId,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    /// Whether a kill signal reached the sandbox
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub session_created: DateTime<Utc>,
    pub session_last_used: DateTime<Utc>,
    pub container: Option<SandboxInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub cleaned_containers: usize,
    pub cleaned_sessions: usize,
}

/// Shared application state
pub struct CodeService {
    config: Config,
    sandboxes: SandboxManager,
    coordinator: ExecutionCoordinator,
    operations: Arc<OperationTable>,
    sessions: SessionStore,
    adapters: AdapterRegistry,
}

impl CodeService {
    /// Connect to Docker and reclaim sandboxes left by a previous process
    ///
    /// An unreachable engine is fatal here rather than per request.
    pub async fn connect(config: Config) -> Result<Arc<Self>> {
        let engine = DockerEngine::connect().await?;
        let service = Arc::new(Self::with_engine(config, Arc::new(engine)));

        match service.sandboxes.sweep_all().await {
            Ok(count) => info!("Startup sweep removed {} leftover sandbox(es)", count),
            Err(e) => warn!("Startup sweep failed: {}", e),
        }

        Ok(service)
    }

    /// Build the service around an already connected engine
    pub fn with_engine(config: Config, engine: Arc<dyn ContainerEngine>) -> Self {
        let adapters = AdapterRegistry::with_defaults(
            config.execution.eiffel_timeout,
            config.execution.compile_timeout,
        );
        let registry = Arc::new(SandboxRegistry::new());
        let coordinator = ExecutionCoordinator::new(
            engine.clone(),
            registry.clone(),
            &config.sandbox,
            &adapters.process_names(),
        );
        let sandboxes = SandboxManager::new(engine, registry, config.sandbox.clone());

        CodeService {
            config,
            sandboxes,
            coordinator,
            operations: Arc::new(OperationTable::new()),
            sessions: SessionStore::new(),
            adapters,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sandboxes(&self) -> &SandboxManager {
        &self.sandboxes
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn languages(&self) -> Vec<Language> {
        self.adapters.languages()
    }

    /// Compile synchronously; the caller needs the outcome before running
    pub async fn compile(
        &self,
        session: Option<&str>,
        request: &CodeRequest,
    ) -> Result<(String, CompileOutcome)> {
        let adapter = self.adapters.get(request.language)?;
        let submission = request.submission()?;
        let session_id = self.sessions.get_or_create(session).await;

        let id = self.operations.begin(
            &session_id,
            OperationKind::Compile,
            self.config.execution.compile_timeout,
        );
        let completion = self.operations.completion(id);

        let result = async {
            if adapter.requires_compilation() {
                self.sandboxes.ensure_sandbox(&session_id, request.language).await?;
            }
            adapter.compile(&self.coordinator, &session_id, &submission).await
        }
        .await;

        match &result {
            Ok(outcome) => completion.complete(
                outcome.success,
                outcome.output.clone(),
                if outcome.success { 0 } else { 1 },
                "Compilation finished",
            ),
            Err(e) => completion.complete(false, e.to_string(), -1, "Compilation failed"),
        }
        // Compile results are returned directly, never polled
        self.operations.poll(id);

        let outcome = result?;
        info!(
            "Compiled {} for session {}: {}",
            request.language,
            session_id,
            if outcome.success { "ok" } else { "failed" }
        );
        Ok((session_id, outcome))
    }

    /// Start a run in the background and return its id immediately
    pub async fn start_run(
        self: &Arc<Self>,
        session: Option<&str>,
        request: &CodeRequest,
    ) -> Result<StartedOperation> {
        self.start(session, request, OperationKind::Run).await
    }

    /// Start a verification in the background
    ///
    /// Fails with `Unsupported` for languages without a verifier.
    pub async fn start_verify(
        self: &Arc<Self>,
        session: Option<&str>,
        request: &CodeRequest,
    ) -> Result<StartedOperation> {
        self.start(session, request, OperationKind::Verify).await
    }

    async fn start(
        self: &Arc<Self>,
        session: Option<&str>,
        request: &CodeRequest,
        kind: OperationKind,
    ) -> Result<StartedOperation> {
        let language = request.language;
        let adapter = self.adapters.get(language)?;
        if kind == OperationKind::Verify && adapter.verifier().is_none() {
            return Err(Error::Unsupported(format!(
                "Verification not supported for {}",
                language
            )));
        }
        let submission = request.submission()?;
        let timeout = self
            .config
            .execution
            .clamp_timeout(request.timeout.map(Duration::from_secs));

        let session_id = self.sessions.get_or_create(session).await;
        let execution_id = self.operations.begin(&session_id, kind, timeout);
        let completion = self.operations.completion(execution_id);

        info!(
            "Starting {} {} as operation {} for session {} (timeout {}s)",
            language,
            kind,
            execution_id,
            session_id,
            timeout.as_secs()
        );

        let service = Arc::clone(self);
        let task_session = session_id.clone();
        tokio::spawn(async move {
            let result = async {
                service.sandboxes.ensure_sandbox(&task_session, language).await?;
                match kind {
                    OperationKind::Verify => match adapter.verifier() {
                        Some(verifier) => {
                            verifier
                                .verify(&service.coordinator, &task_session, &submission, timeout)
                                .await
                        }
                        None => Err(Error::Unsupported(format!(
                            "Verification not supported for {}",
                            language
                        ))),
                    },
                    _ => {
                        adapter
                            .execute(&service.coordinator, &task_session, &submission, timeout)
                            .await
                    }
                }
            }
            .await;

            match result {
                Ok(result) => {
                    let message = completion_message(kind, &result);
                    debug!("Operation {} finished: {}", completion.id(), message);
                    completion.complete(result.success, result.output, result.exit_code, message);
                }
                Err(e) => {
                    warn!("Operation {} failed: {}", completion.id(), e);
                    let message = format!("Error during {}: {}", kind, e);
                    completion.complete(false, e.to_string(), -1, message);
                }
            }
        });

        Ok(StartedOperation {
            execution_id,
            session_id,
        })
    }

    /// Cancel an operation
    ///
    /// The operation is marked cancelled before the kill signal goes out,
    /// so a poll right after this returns sees a terminal state. The signal
    /// hits every matching process in the session's sandbox.
    pub async fn cancel(&self, execution_id: OperationId) -> Result<CancelOutcome> {
        let session_id = self
            .operations
            .session_of(execution_id)
            .ok_or_else(|| Error::NotFound("Execution not found".to_string()))?;

        if !self.operations.mark_cancelled(execution_id) {
            return Ok(CancelOutcome {
                success: false,
                message: "Execution already finished".to_string(),
            });
        }

        let signalled = self.coordinator.cancel(&session_id).await;
        info!(
            "Cancelled operation {} in session {} (signal sent: {})",
            execution_id, session_id, signalled
        );

        Ok(CancelOutcome {
            success: signalled,
            message: "Execution cancelled by user".to_string(),
        })
    }

    /// Poll an operation; a finished result is handed out once
    pub fn status(&self, execution_id: OperationId) -> PollResult {
        self.operations.poll(execution_id)
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.touch(session_id).await;
        let session = self.sessions.get(session_id).await?;
        let container = self.sandboxes.sandbox_info(session_id).await;

        Some(SessionInfo {
            session_id: session.id,
            session_created: session.created_at,
            session_last_used: session.last_used,
            container,
        })
    }

    /// Destroy the session's sandbox and forget the session
    pub async fn cleanup_session(&self, session_id: &str) -> bool {
        let destroyed = self.sandboxes.destroy_sandbox(session_id).await;
        self.sessions.remove(session_id).await;
        destroyed
    }

    pub async fn admin_containers(&self) -> Vec<SandboxInfo> {
        self.sandboxes.list_sandboxes().await
    }

    /// Remove sandboxes older than `max_age` and sessions idle for longer
    pub async fn admin_cleanup(&self, max_age: Duration) -> CleanupReport {
        let mut cleaned_containers = self.sandboxes.sweep_idle(max_age).await;

        let idle = self.sessions.remove_idle(max_age).await;
        for session_id in &idle {
            if self.sandboxes.registry().lookup(session_id).await.is_some()
                && self.sandboxes.destroy_sandbox(session_id).await
            {
                cleaned_containers += 1;
            }
        }

        info!(
            "Admin cleanup removed {} container(s) and {} session(s)",
            cleaned_containers,
            idle.len()
        );
        CleanupReport {
            cleaned_containers,
            cleaned_sessions: idle.len(),
        }
    }

    /// Check a key sent to the admin endpoints
    pub fn authorize_admin(&self, provided: Option<&str>) -> Result<()> {
        let expected = self
            .config
            .admin
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Unauthorized("Admin endpoints are disabled".to_string()))?;

        match provided {
            Some(key) if key == expected.expose_secret() => Ok(()),
            _ => Err(Error::Unauthorized("Invalid API key".to_string())),
        }
    }

    /// Periodic maintenance pass: idle sandboxes and unpolled operations
    pub async fn maintain(&self) -> (usize, usize) {
        let sandboxes = self
            .sandboxes
            .sweep_idle(self.config.maintenance.idle_max_age)
            .await;
        let operations = self
            .operations
            .prune_stale(self.config.maintenance.operation_retention);
        (sandboxes, operations)
    }

    /// Final sweep when the server stops
    pub async fn shutdown(&self) -> Result<usize> {
        if !self.config.maintenance.sweep_on_shutdown {
            return Ok(0);
        }
        let count = self.sandboxes.sweep_all().await?;
        info!("Shutdown sweep removed {} sandbox(es)", count);
        Ok(count)
    }
}

fn completion_message(kind: OperationKind, result: &ExecResult) -> String {
    if result.timed_out {
        return result.output.clone();
    }
    match (kind, result.success) {
        (OperationKind::Verify, true) => "Verification complete".to_string(),
        (OperationKind::Verify, false) => "Verification failed".to_string(),
        (_, true) => "Execution complete".to_string(),
        (_, false) => "Execution failed".to_string(),
    }
}
