//! Python adapter

use std::time::Duration;

use async_trait::async_trait;

use super::{shell_quote, write_all, CompileOutcome, Language, LanguageAdapter, Submission};
use crate::error::Result;
use crate::sandbox::{ExecResult, ExecutionCoordinator};

/// Interpreted with `python3`; nothing to compile
pub struct PythonAdapter;

#[async_trait]
impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn requires_compilation(&self) -> bool {
        false
    }

    fn process_names(&self) -> &'static [&'static str] {
        &["python3"]
    }

    async fn compile(
        &self,
        _coordinator: &ExecutionCoordinator,
        _session_id: &str,
        _submission: &Submission,
    ) -> Result<CompileOutcome> {
        Ok(CompileOutcome::success("No compilation needed for Python", None))
    }

    async fn execute(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult> {
        let main = submission.main()?;
        write_all(coordinator, session_id, &submission.files).await?;

        let command = format!("python3 {}", shell_quote(&main.name));
        Ok(coordinator.run(session_id, &command, timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecOutput;
    use crate::language::test_sandbox;

    #[tokio::test]
    async fn test_compile_is_noop() {
        let (engine, coordinator) = test_sandbox(Language::Python).await;
        let submission = Submission::single("hello.py", "print('hello')");

        let outcome = PythonAdapter.compile(&coordinator, "s1", &submission).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "No compilation needed for Python");
        assert!(engine.execs().is_empty());
    }

    #[tokio::test]
    async fn test_execute_writes_and_runs() {
        let (engine, coordinator) = test_sandbox(Language::Python).await;
        engine.on_exec(|spec| {
            if spec.cmd.last().map(String::as_str) == Some("python3 hello.py") {
                ExecOutput {
                    stdout: "hello\n".to_string(),
                    ..Default::default()
                }
            } else {
                ExecOutput::default()
            }
        });

        let submission = Submission::single("hello.py", "print('hello')");
        let result = PythonAdapter
            .execute(&coordinator, "s1", &submission, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.exit_code, 0);
        assert!(engine.uploaded("/workspace/hello.py").is_some());
    }
}
