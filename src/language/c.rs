//! C adapter, plus the native build shared with C++

use std::time::Duration;

use async_trait::async_trait;

use super::{shell_quote, write_all, CompileOutcome, Language, LanguageAdapter, Submission};
use crate::error::Result;
use crate::sandbox::{ExecResult, ExecutionCoordinator};

/// Binary produced by native builds
pub(super) const NATIVE_BINARY: &str = "code.out";

/// Write the submission and link every matching source into one binary
pub(super) async fn compile_native(
    coordinator: &ExecutionCoordinator,
    session_id: &str,
    submission: &Submission,
    compiler: &str,
    extensions: &[&str],
    label: &str,
    timeout: Duration,
) -> Result<CompileOutcome> {
    write_all(coordinator, session_id, &submission.files).await?;

    let sources = submission.names_with_extension(extensions);
    if sources.is_empty() {
        return Ok(CompileOutcome::failure(format!("No {} source files found", label)));
    }

    let command = format!(
        "{} {} -o {}",
        compiler,
        sources
            .iter()
            .map(|s| shell_quote(s))
            .collect::<Vec<_>>()
            .join(" "),
        NATIVE_BINARY
    );
    let result = coordinator.run(session_id, &command, timeout).await;
    Ok(CompileOutcome::from_exec(result, NATIVE_BINARY))
}

/// Refresh the sources, then run the binary from the last compile
pub(super) async fn run_native(
    coordinator: &ExecutionCoordinator,
    session_id: &str,
    submission: &Submission,
    timeout: Duration,
) -> Result<ExecResult> {
    write_all(coordinator, session_id, &submission.files).await?;
    Ok(coordinator
        .run(session_id, &format!("./{}", NATIVE_BINARY), timeout)
        .await)
}

/// Compiled with `gcc`
pub struct CAdapter {
    compile_timeout: Duration,
}

impl CAdapter {
    pub fn new(compile_timeout: Duration) -> Self {
        CAdapter { compile_timeout }
    }
}

#[async_trait]
impl LanguageAdapter for CAdapter {
    fn language(&self) -> Language {
        Language::C
    }

    fn process_names(&self) -> &'static [&'static str] {
        &["gcc", "cc1", NATIVE_BINARY]
    }

    async fn compile(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
    ) -> Result<CompileOutcome> {
        compile_native(
            coordinator,
            session_id,
            submission,
            "gcc",
            &[".c"],
            "C",
            self.compile_timeout,
        )
        .await
    }

    async fn execute(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult> {
        run_native(coordinator, session_id, submission, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecOutput;
    use crate::language::{test_sandbox, SourceFile};

    #[tokio::test]
    async fn test_compile_links_all_sources() {
        let (engine, coordinator) = test_sandbox(Language::C).await;
        let submission = Submission::new(
            vec![
                SourceFile::new("main.c", "#include \"util.h\"\nint main() { return util(); }"),
                SourceFile::new("util.c", "int util() { return 0; }"),
                SourceFile::new("util.h", "int util();"),
            ],
            "main.c",
        );

        let outcome = CAdapter::new(Duration::from_secs(30))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.artifact.as_deref(), Some("code.out"));
        assert!(engine
            .exec_lines()
            .iter()
            .any(|l| l.ends_with("sh -c gcc main.c util.c -o code.out")));
        assert!(engine.uploaded("/workspace/util.h").is_some());
    }

    #[tokio::test]
    async fn test_syntax_error_reports_stderr() {
        let (engine, coordinator) = test_sandbox(Language::C).await;
        engine.on_exec(|spec| {
            if spec.cmd.iter().any(|a| a.starts_with("gcc")) {
                ExecOutput {
                    stdout: String::new(),
                    stderr: "main.c:1:13: error: expected ';' before '}' token".to_string(),
                    exit_code: 1,
                }
            } else {
                ExecOutput::default()
            }
        });

        let submission = Submission::single("main.c", "int main() { return 0 }");
        let outcome = CAdapter::new(Duration::from_secs(30))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.output.contains("error: expected ';'"));
        assert!(outcome.artifact.is_none());
    }

    #[tokio::test]
    async fn test_no_sources() {
        let (_engine, coordinator) = test_sandbox(Language::C).await;
        let submission = Submission::single("notes.txt", "nothing to build");

        let outcome = CAdapter::new(Duration::from_secs(30))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.output, "No C source files found");
    }

    #[tokio::test]
    async fn test_execute_runs_binary() {
        let (engine, coordinator) = test_sandbox(Language::C).await;
        let submission = Submission::new(
            vec![
                SourceFile::new("main.c", "int main() { return 0; }"),
                SourceFile::new("input.txt", "42\n"),
            ],
            "main.c",
        );

        CAdapter::new(Duration::from_secs(30))
            .execute(&coordinator, "s1", &submission, Duration::from_secs(10))
            .await
            .unwrap();

        // Run-only requests still refresh the files the binary may read
        assert_eq!(engine.uploaded("/workspace/input.txt").unwrap().content, "42\n");
        assert!(engine.uploaded("/workspace/main.c").is_some());
        assert_eq!(
            engine.exec_lines().last().unwrap(),
            "timeout -s KILL 10 sh -c ./code.out"
        );
    }
}
