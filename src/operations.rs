//! Process tracking table
//!
//! Background run/verify tasks report their outcome here and clients poll
//! for it. A finished entry is handed out exactly once: the poll that sees
//! it finished also removes it.
//!
//! Terminal states are absorbing. When a cancellation and the task's own
//! completion race, whichever lands first is what the poller sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Operation identifier, unique for the lifetime of the process
pub type OperationId = u64;

/// Kind of tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Compile,
    Run,
    Verify,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Compile => write!(f, "compile"),
            OperationKind::Run => write!(f, "run"),
            OperationKind::Verify => write!(f, "verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationState {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug)]
struct Operation {
    session_id: String,
    kind: OperationKind,
    started: Instant,
    timeout: Duration,
    state: OperationState,
    finished: Option<Instant>,
    success: bool,
    output: String,
    exit_code: i64,
    message: Option<String>,
}

impl Operation {
    fn is_terminal(&self) -> bool {
        self.state != OperationState::Running
    }
}

/// Terminal result handed to the first poll after completion
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSnapshot {
    pub operation: OperationKind,
    pub session_id: String,
    pub success: bool,
    pub output: String,
    pub exit_code: i64,
    pub message: String,
    pub cancelled: bool,
    /// Seconds, rounded to two decimals
    pub elapsed_time: f64,
}

/// Progress of an operation still in flight
#[derive(Debug, Clone, Serialize)]
pub struct RunningSnapshot {
    pub operation: OperationKind,
    pub elapsed_time: f64,
    /// Timeout bound in seconds
    pub timeout: u64,
    pub cancelled: bool,
}

/// Outcome of a poll
#[derive(Debug, Clone)]
pub enum PollResult {
    Finished(FinishedSnapshot),
    Running(RunningSnapshot),
    NotFound,
}

fn rounded_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

/// In-memory table of tracked operations
#[derive(Debug)]
pub struct OperationTable {
    next_id: AtomicU64,
    operations: Mutex<HashMap<OperationId, Operation>>,
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTable {
    pub fn new() -> Self {
        OperationTable {
            next_id: AtomicU64::new(1),
            operations: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationId, Operation>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new in-flight operation
    pub fn begin(&self, session_id: &str, kind: OperationKind, timeout: Duration) -> OperationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            Operation {
                session_id: session_id.to_string(),
                kind,
                started: Instant::now(),
                timeout,
                state: OperationState::Running,
                finished: None,
                success: false,
                output: String::new(),
                exit_code: -1,
                message: None,
            },
        );
        debug!("Began {} operation {} for session {}", kind, id, session_id);
        id
    }

    /// Record the outcome of an operation
    ///
    /// Returns false when the entry is unknown or already terminal.
    pub fn mark_complete(
        &self,
        id: OperationId,
        success: bool,
        output: impl Into<String>,
        exit_code: i64,
        message: Option<String>,
    ) -> bool {
        let mut operations = self.lock();
        let Some(op) = operations.get_mut(&id) else {
            return false;
        };
        if op.is_terminal() {
            debug!("Operation {} already terminal, ignoring completion", id);
            return false;
        }

        op.state = OperationState::Completed;
        op.finished = Some(Instant::now());
        op.success = success;
        op.output = output.into();
        op.exit_code = exit_code;
        op.message = message;
        true
    }

    /// Force an operation into the cancelled terminal state
    pub fn mark_cancelled(&self, id: OperationId) -> bool {
        let mut operations = self.lock();
        let Some(op) = operations.get_mut(&id) else {
            return false;
        };
        if op.is_terminal() {
            return false;
        }

        op.state = OperationState::Cancelled;
        op.finished = Some(Instant::now());
        op.success = false;
        op.exit_code = -1;
        op.message = Some("Execution cancelled by user".to_string());
        true
    }

    /// Report progress, consuming the entry once it is terminal
    pub fn poll(&self, id: OperationId) -> PollResult {
        let mut operations = self.lock();
        let Some(op) = operations.get(&id) else {
            return PollResult::NotFound;
        };

        if !op.is_terminal() {
            return PollResult::Running(RunningSnapshot {
                operation: op.kind,
                elapsed_time: rounded_secs(op.started.elapsed()),
                timeout: op.timeout.as_secs(),
                cancelled: false,
            });
        }

        let Some(op) = operations.remove(&id) else {
            return PollResult::NotFound;
        };
        let cancelled = op.state == OperationState::Cancelled;
        let message = op.message.unwrap_or_else(|| {
            if op.success {
                "Execution completed".to_string()
            } else {
                "Execution failed".to_string()
            }
        });

        PollResult::Finished(FinishedSnapshot {
            operation: op.kind,
            session_id: op.session_id,
            success: op.success,
            output: op.output,
            exit_code: op.exit_code,
            message,
            cancelled,
            elapsed_time: rounded_secs(op.started.elapsed()),
        })
    }

    /// Session owning an operation
    pub fn session_of(&self, id: OperationId) -> Option<String> {
        self.lock().get(&id).map(|op| op.session_id.clone())
    }

    /// Whether an operation exists and is still in flight
    pub fn is_running(&self, id: OperationId) -> bool {
        self.lock().get(&id).is_some_and(|op| !op.is_terminal())
    }

    /// Drop terminal entries nobody polled within `retention`
    pub fn prune_stale(&self, retention: Duration) -> usize {
        let mut operations = self.lock();
        let before = operations.len();
        operations.retain(|_, op| match op.finished {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
        let pruned = before - operations.len();
        if pruned > 0 {
            debug!("Pruned {} unpolled operation(s)", pruned);
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Guard the background task owns until it reports an outcome
    pub fn completion(self: &Arc<Self>, id: OperationId) -> OperationCompletion {
        OperationCompletion {
            table: Arc::clone(self),
            id,
            done: false,
        }
    }
}

/// Completion handle for one operation
///
/// Dropping it without calling [`OperationCompletion::complete`] (a panic
/// or an early return in the task) records a failure, so no operation is
/// left running forever.
pub struct OperationCompletion {
    table: Arc<OperationTable>,
    id: OperationId,
    done: bool,
}

impl OperationCompletion {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn complete(mut self, success: bool, output: impl Into<String>, exit_code: i64, message: impl Into<String>) {
        self.table
            .mark_complete(self.id, success, output, exit_code, Some(message.into()));
        self.done = true;
    }
}

impl Drop for OperationCompletion {
    fn drop(&mut self) {
        if !self.done {
            warn!("Operation {} ended without reporting an outcome", self.id);
            self.table.mark_complete(
                self.id,
                false,
                "Execution aborted unexpectedly",
                -1,
                Some("Execution aborted unexpectedly".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let table = OperationTable::new();
        let a = table.begin("s1", OperationKind::Run, Duration::from_secs(30));
        let b = table.begin("s1", OperationKind::Verify, Duration::from_secs(30));
        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_running_poll_keeps_entry() {
        let table = OperationTable::new();
        let id = table.begin("s1", OperationKind::Run, Duration::from_secs(30));

        match table.poll(id) {
            PollResult::Running(snapshot) => {
                assert_eq!(snapshot.timeout, 30);
                assert!(!snapshot.cancelled);
                assert_eq!(snapshot.operation, OperationKind::Run);
            }
            other => panic!("expected running, got {:?}", other),
        }
        assert!(table.is_running(id));
    }

    #[test]
    fn test_poll_consumes_terminal_result() {
        let table = OperationTable::new();
        let id = table.begin("s1", OperationKind::Run, Duration::from_secs(30));
        assert!(table.mark_complete(id, true, "hello\n", 0, Some("Execution complete".into())));

        match table.poll(id) {
            PollResult::Finished(snapshot) => {
                assert!(snapshot.success);
                assert_eq!(snapshot.output, "hello\n");
                assert_eq!(snapshot.exit_code, 0);
                assert!(!snapshot.cancelled);
            }
            other => panic!("expected finished, got {:?}", other),
        }
        assert!(matches!(table.poll(id), PollResult::NotFound));
    }

    #[test]
    fn test_cancel_is_terminal_and_absorbing() {
        let table = OperationTable::new();
        let id = table.begin("s1", OperationKind::Run, Duration::from_secs(30));

        assert!(table.mark_cancelled(id));
        // The task finishing afterwards does not overwrite the cancellation
        assert!(!table.mark_complete(id, true, "late", 0, None));
        assert!(!table.mark_cancelled(id));

        match table.poll(id) {
            PollResult::Finished(snapshot) => {
                assert!(snapshot.cancelled);
                assert!(!snapshot.success);
                assert_eq!(snapshot.exit_code, -1);
                assert_eq!(snapshot.message, "Execution cancelled by user");
            }
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_ids() {
        let table = OperationTable::new();
        assert!(matches!(table.poll(42), PollResult::NotFound));
        assert!(!table.mark_complete(42, true, "", 0, None));
        assert!(!table.mark_cancelled(42));
        assert!(table.session_of(42).is_none());
    }

    #[test]
    fn test_dropped_guard_records_failure() {
        let table = Arc::new(OperationTable::new());
        let id = table.begin("s1", OperationKind::Verify, Duration::from_secs(60));

        let guard = table.completion(id);
        drop(guard);

        match table.poll(id) {
            PollResult::Finished(snapshot) => {
                assert!(!snapshot.success);
                assert_eq!(snapshot.exit_code, -1);
                assert_eq!(snapshot.output, "Execution aborted unexpectedly");
            }
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[test]
    fn test_guard_complete() {
        let table = Arc::new(OperationTable::new());
        let id = table.begin("s1", OperationKind::Run, Duration::from_secs(5));

        table.completion(id).complete(false, "boom", 2, "Execution failed");
        match table.poll(id) {
            PollResult::Finished(snapshot) => {
                assert_eq!(snapshot.exit_code, 2);
                assert_eq!(snapshot.message, "Execution failed");
            }
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[test]
    fn test_prune_stale_keeps_running() {
        let table = OperationTable::new();
        let running = table.begin("s1", OperationKind::Run, Duration::from_secs(5));
        let done = table.begin("s1", OperationKind::Run, Duration::from_secs(5));
        table.mark_complete(done, true, "", 0, None);

        assert_eq!(table.prune_stale(Duration::ZERO), 1);
        assert!(table.is_running(running));
        assert_eq!(table.session_of(running).as_deref(), Some("s1"));
    }

    #[test]
    fn test_elapsed_rounding() {
        assert_eq!(rounded_secs(Duration::from_millis(1234)), 1.23);
        assert_eq!(rounded_secs(Duration::from_millis(1236)), 1.24);
    }
}
