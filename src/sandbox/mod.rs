//! Per-session sandboxes
//!
//! - registry: session id → live sandbox handle
//! - lifecycle: create, validate, destroy and sweep sandboxes
//! - coordinator: file transfer and command execution inside a sandbox
//!
//! Every sandbox container is named `code-session-<session id>`. The
//! startup/shutdown sweep relies on that prefix to find containers left
//! behind by a previous process, so it must not change.

mod coordinator;
mod lifecycle;
mod registry;

pub use coordinator::{select_output, ExecResult, ExecutionCoordinator, OutputPolicy};
pub use lifecycle::{SandboxInfo, SandboxManager};
pub use registry::{SandboxHandle, SandboxRegistry};

/// Name prefix shared by every session sandbox
pub const SANDBOX_NAME_PREFIX: &str = "code-session-";

/// Container name for a session
pub fn sandbox_name(session_id: &str) -> String {
    format!("{}{}", SANDBOX_NAME_PREFIX, session_id)
}

/// Session id encoded in a sandbox container name
pub fn session_from_name(name: &str) -> Option<&str> {
    name.trim_start_matches('/')
        .strip_prefix(SANDBOX_NAME_PREFIX)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_convention() {
        assert_eq!(sandbox_name("abc"), "code-session-abc");
        assert_eq!(session_from_name("/code-session-abc"), Some("abc"));
        assert_eq!(session_from_name("code-session-"), None);
        assert_eq!(session_from_name("postgres"), None);
    }
}
