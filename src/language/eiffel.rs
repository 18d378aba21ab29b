//! Eiffel adapter
//!
//! Builds go through AutoProof's `apb`, driven by an `Ace.ecf` project file
//! rendered per submission. When the class declares a creation procedure
//! it becomes the system root; otherwise every class is a root.

use std::time::Duration;

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::{write_all, CompileOutcome, Language, LanguageAdapter, SourceFile, Submission, Verifier};
use crate::error::{Error, Result};
use crate::sandbox::{ExecResult, ExecutionCoordinator, OutputPolicy};

const ECF_TEMPLATE: &str = include_str!("../../templates/ecf_template.xml");
const ECF_FILE: &str = "Ace.ecf";
const COMPILE_COMMAND: &str = "apb -c_compile -batch";
const VERIFY_COMMAND: &str = "apb -c_compile -batch -autoproof -html";
const RUN_COMMAND: &str = "./EIFGENs/tests/W_code/autoproof-tests";

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Open,
    Close,
}

/// Identifiers and braces, with `--` comments and string literals dropped
fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for line in source.lines() {
        let code = line.split_once("--").map_or(line, |(code, _)| code);
        let mut in_string = false;
        let mut start = None;

        for (i, c) in code.char_indices() {
            if in_string {
                in_string = c != '"';
                continue;
            }
            if c.is_alphanumeric() || c == '_' {
                start.get_or_insert(i);
                continue;
            }
            if let Some(s) = start.take() {
                tokens.push(Token::Word(&code[s..i]));
            }
            match c {
                '"' => in_string = true,
                '{' => tokens.push(Token::Open),
                '}' => tokens.push(Token::Close),
                _ => {}
            }
        }
        if let Some(s) = start {
            tokens.push(Token::Word(&code[s..]));
        }
    }
    tokens
}

/// Names of the declared class and of its first creation procedure
fn class_header(source: &str) -> Option<(String, Option<String>)> {
    let tokens = tokenize(source);
    let is = |t: &Token<'_>, keyword: &str| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case(keyword));

    let class_at = tokens.iter().position(|t| is(t, "class"))?;
    let class_name = match tokens.get(class_at + 1)? {
        Token::Word(w) => w.to_string(),
        _ => return None,
    };

    // Creation clauses sit between the header and the first feature clause
    let header = &tokens[class_at + 2..];
    let header_end = header.iter().position(|t| is(t, "feature")).unwrap_or(header.len());
    let header = &header[..header_end];

    let creation = header.iter().position(|t| is(t, "create")).and_then(|at| {
        let mut depth = 0;
        header[at + 1..].iter().find_map(|t| match t {
            Token::Open => {
                depth += 1;
                None
            }
            Token::Close => {
                depth -= 1;
                None
            }
            Token::Word(w) if depth == 0 => Some(w.to_string()),
            Token::Word(_) => None,
        })
    });

    Some((class_name, creation))
}

#[derive(Serialize)]
struct EcfData<'a> {
    use_specific_root: bool,
    root_class: &'a str,
    creation_procedure: &'a str,
}

/// Render the project file for a class
fn render_ecf(class_name: &str, creation: Option<&str>) -> Result<String> {
    let data = EcfData {
        use_specific_root: creation.is_some(),
        root_class: class_name,
        creation_procedure: creation.unwrap_or_default(),
    };
    Handlebars::new()
        .render_template(ECF_TEMPLATE, &data)
        .map_err(|e| Error::Internal(format!("ECF render error: {}", e)))
}

/// Built and verified with AutoProof
pub struct EiffelAdapter {
    build_timeout: Duration,
}

impl EiffelAdapter {
    pub fn new(build_timeout: Duration) -> Self {
        EiffelAdapter { build_timeout }
    }

    /// Write the project file and sources; returns the class name
    async fn prepare(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
    ) -> Result<Option<String>> {
        let main = submission.main()?;
        let Some((class_name, creation)) = class_header(&main.content) else {
            return Ok(None);
        };
        debug!(
            "Eiffel class {} (creation procedure: {:?})",
            class_name, creation
        );

        let ecf = render_ecf(&class_name, creation.as_deref())?;
        coordinator.write_file(session_id, ECF_FILE, &ecf).await?;

        // The main class must live in `<class>.e` for the compiler to find it
        let files: Vec<SourceFile> = submission
            .files
            .iter()
            .map(|f| {
                if f.name == main.name {
                    SourceFile::new(format!("{}.e", class_name.to_lowercase()), f.content.clone())
                } else {
                    f.clone()
                }
            })
            .collect();
        write_all(coordinator, session_id, &files).await?;

        Ok(Some(class_name))
    }
}

#[async_trait]
impl LanguageAdapter for EiffelAdapter {
    fn language(&self) -> Language {
        Language::Eiffel
    }

    fn process_names(&self) -> &'static [&'static str] {
        &["apb", "autoproof-tests"]
    }

    async fn compile(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
    ) -> Result<CompileOutcome> {
        let Some(class_name) = self.prepare(coordinator, session_id, submission).await? else {
            return Ok(CompileOutcome::failure("No Eiffel class declaration found"));
        };

        let result = coordinator
            .run(session_id, COMPILE_COMMAND, self.build_timeout)
            .await;
        Ok(CompileOutcome::from_exec(result, class_name))
    }

    async fn execute(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        _submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult> {
        Ok(coordinator
            .run_with_policy(session_id, RUN_COMMAND, timeout, OutputPolicy::StdoutOnly)
            .await)
    }

    fn verifier(&self) -> Option<&dyn Verifier> {
        Some(self)
    }
}

#[async_trait]
impl Verifier for EiffelAdapter {
    async fn verify(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult> {
        if self.prepare(coordinator, session_id, submission).await?.is_none() {
            return Ok(ExecResult::failure("No Eiffel class declaration found"));
        }

        Ok(coordinator
            .run_with_policy(session_id, VERIFY_COMMAND, timeout, OutputPolicy::StdoutOnly)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecOutput;
    use crate::language::test_sandbox;

    const ACCOUNT: &str = r#"note
    description: "A bank account -- with a class keyword in a string"

class
    ACCOUNT

create {ANY}
    make

feature -- Initialization

    make
        do
            create balance_history.make (10)
        end

end
"#;

    #[test]
    fn test_class_header() {
        let (class_name, creation) = class_header(ACCOUNT).unwrap();
        assert_eq!(class_name, "ACCOUNT");
        assert_eq!(creation.as_deref(), Some("make"));

        let (class_name, creation) =
            class_header("class SIMPLE\nfeature\n  f do create x.make end\nend").unwrap();
        assert_eq!(class_name, "SIMPLE");
        assert!(creation.is_none());

        assert!(class_header("-- only a comment").is_none());
    }

    #[test]
    fn test_render_ecf_roots() {
        let specific = render_ecf("ACCOUNT", Some("make")).unwrap();
        assert!(specific.contains(r#"<root class="ACCOUNT" feature="make"/>"#));
        assert!(!specific.contains("all_classes"));

        let all = render_ecf("ACCOUNT", None).unwrap();
        assert!(all.contains(r#"<root all_classes="true"/>"#));
        assert!(all.contains(r#"<target name="tests">"#));
    }

    #[tokio::test]
    async fn test_compile_writes_project() {
        let (engine, coordinator) = test_sandbox(Language::Eiffel).await;
        let submission = Submission::single("main.e", ACCOUNT);

        let outcome = EiffelAdapter::new(Duration::from_secs(60))
            .compile(&coordinator, "s1", &submission)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.artifact.as_deref(), Some("ACCOUNT"));
        assert!(engine.uploaded("/workspace/account.e").is_some());
        let ecf = engine.uploaded("/workspace/Ace.ecf").unwrap();
        assert!(ecf.content.contains(r#"feature="make""#));
        assert_eq!(
            engine.exec_lines().last().unwrap(),
            "timeout -s KILL 60 sh -c apb -c_compile -batch"
        );
    }

    #[tokio::test]
    async fn test_verify_reports_stdout() {
        let (engine, coordinator) = test_sandbox(Language::Eiffel).await;
        engine.on_exec(|spec| {
            if spec.cmd.last().map(String::as_str) == Some(VERIFY_COMMAND) {
                ExecOutput {
                    stdout: "<html>Verification failed</html>".to_string(),
                    stderr: "noise".to_string(),
                    exit_code: 1,
                }
            } else {
                ExecOutput::default()
            }
        });

        let adapter = EiffelAdapter::new(Duration::from_secs(60));
        let verifier = adapter.verifier().unwrap();
        let result = verifier
            .verify(&coordinator, "s1", &Submission::single("main.e", ACCOUNT), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.output, "<html>Verification failed</html>");
    }
}
