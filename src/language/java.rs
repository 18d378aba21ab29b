//! Java adapter
//!
//! `javac` insists the file holding a public class is named after it, so
//! the main file is renamed to `<Class>.java` before compiling.

use std::time::Duration;

use async_trait::async_trait;

use super::{file_stem, shell_quote, write_all, CompileOutcome, Language, LanguageAdapter, Submission};
use crate::error::Result;
use crate::sandbox::{ExecResult, ExecutionCoordinator};

/// Name of the first `public class` declared in the source
pub fn public_class_name(source: &str) -> Option<&str> {
    let mut words = source
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|w| !w.is_empty())
        .peekable();

    while let Some(word) = words.next() {
        if word == "public" && words.peek() == Some(&"class") {
            words.next();
            return words.next();
        }
    }
    None
}

/// Compiled with `javac`, run with `java`
pub struct JavaAdapter {
    compile_timeout: Duration,
}

impl JavaAdapter {
    pub fn new(compile_timeout: Duration) -> Self {
        JavaAdapter { compile_timeout }
    }

    fn class_name(submission: &Submission) -> Result<String> {
        let main = submission.main()?;
        Ok(public_class_name(&main.content)
            .unwrap_or_else(|| file_stem(&main.name))
            .to_string())
    }
}

#[async_trait]
impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn process_names(&self) -> &'static [&'static str] {
        &["javac", "java"]
    }

    async fn compile(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
    ) -> Result<CompileOutcome> {
        let class_name = Self::class_name(submission)?;
        write_all(coordinator, session_id, &submission.files).await?;

        let target = format!("{}.java", class_name);
        let command = if submission.main_file == target {
            format!("javac {}", shell_quote(&target))
        } else {
            format!(
                "mv -f {} {} && javac {}",
                shell_quote(&submission.main_file),
                shell_quote(&target),
                shell_quote(&target)
            )
        };

        let result = coordinator.run(session_id, &command, self.compile_timeout).await;
        Ok(CompileOutcome::from_exec(result, class_name))
    }

    async fn execute(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult> {
        let class_name = Self::class_name(submission)?;
        let command = format!("java {}", shell_quote(&class_name));
        Ok(coordinator.run(session_id, &command, timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecOutput;
    use crate::language::test_sandbox;

    const FOO: &str = "public class Foo {\n    public static void main(String[] args) {\n        System.out.println(\"foo\");\n    }\n}\n";

    #[test]
    fn test_public_class_name() {
        assert_eq!(public_class_name(FOO), Some("Foo"));
        assert_eq!(public_class_name("class Hidden {}"), None);
        assert_eq!(
            public_class_name("import java.util.*;\npublic   class\tMain_2{}"),
            Some("Main_2")
        );
    }

    #[tokio::test]
    async fn test_compile_renames_to_class() {
        let (engine, coordinator) = test_sandbox(Language::Java).await;
        let submission = Submission::single("code.java", FOO);

        let outcome = JavaAdapter::new(Duration::from_secs(30))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.artifact.as_deref(), Some("Foo"));
        assert_eq!(
            engine.exec_lines().last().unwrap(),
            "timeout -s KILL 30 sh -c mv -f code.java Foo.java && javac Foo.java"
        );
    }

    #[tokio::test]
    async fn test_compile_matching_filename() {
        let (engine, coordinator) = test_sandbox(Language::Java).await;
        let submission = Submission::single("Foo.java", FOO);

        JavaAdapter::new(Duration::from_secs(30))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();
        assert!(engine.exec_lines().last().unwrap().ends_with("sh -c javac Foo.java"));
    }

    #[tokio::test]
    async fn test_execute_runs_class() {
        let (engine, coordinator) = test_sandbox(Language::Java).await;
        engine.on_exec(|spec| {
            if spec.cmd.last().map(String::as_str) == Some("java Foo") {
                ExecOutput {
                    stdout: "foo\n".to_string(),
                    ..Default::default()
                }
            } else {
                ExecOutput::default()
            }
        });

        let submission = Submission::single("code.java", FOO);
        let result = JavaAdapter::new(Duration::from_secs(30))
            .execute(&coordinator, "s1", &submission, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "foo\n");
    }

    #[tokio::test]
    async fn test_class_defaults_to_file_stem() {
        let (engine, coordinator) = test_sandbox(Language::Java).await;
        let submission = Submission::single("Main.java", "class Main {}");

        JavaAdapter::new(Duration::from_secs(30))
            .execute(&coordinator, "s1", &submission, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(engine.exec_lines().last().unwrap().ends_with("sh -c java Main"));
    }
}
