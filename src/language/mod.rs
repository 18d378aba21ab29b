//! Language adapters
//!
//! Each supported language gets an adapter that knows which files to
//! write into the session sandbox and which compiler/runtime commands to
//! issue through the [`ExecutionCoordinator`]. Verification is an explicit
//! optional capability: only adapters that return a [`Verifier`] support it.

mod c;
mod cpp;
mod eiffel;
mod java;
mod python;

pub use c::CAdapter;
pub use cpp::CppAdapter;
pub use eiffel::EiffelAdapter;
pub use java::JavaAdapter;
pub use python::PythonAdapter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::{ExecResult, ExecutionCoordinator};

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
    Eiffel,
}

impl Language {
    /// Every supported language
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Eiffel,
    ];

    /// Filename used when a request sends bare code
    pub fn default_filename(&self) -> &'static str {
        match self {
            Language::Python => "code.py",
            Language::C => "main.c",
            Language::Cpp => "code.cpp",
            Language::Java => "code.java",
            Language::Eiffel => "main.e",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "eiffel" | "e" => Ok(Language::Eiffel),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported language: {}. Supported: python, c, cpp, java, eiffel",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::C => write!(f, "c"),
            Language::Cpp => write!(f, "cpp"),
            Language::Java => write!(f, "java"),
            Language::Eiffel => write!(f, "eiffel"),
        }
    }
}

/// One source file of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Filename with extension
    pub name: String,
    /// File content
    pub content: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        SourceFile {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A submission: the files plus the entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub files: Vec<SourceFile>,
    pub main_file: String,
}

impl Submission {
    pub fn new(files: Vec<SourceFile>, main_file: impl Into<String>) -> Self {
        Submission {
            files,
            main_file: main_file.into(),
        }
    }

    /// Single-file submission
    pub fn single(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        Submission {
            files: vec![SourceFile::new(name.clone(), content)],
            main_file: name,
        }
    }

    /// Content of the main file
    pub fn main(&self) -> Result<&SourceFile> {
        self.files
            .iter()
            .find(|f| f.name == self.main_file)
            .ok_or_else(|| {
                Error::InvalidInput(format!("Main file '{}' not found", self.main_file))
            })
    }

    /// Names of the files ending in one of the given extensions
    pub fn names_with_extension(&self, extensions: &[&str]) -> Vec<&str> {
        self.files
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| extensions.iter().any(|ext| name.ends_with(ext)))
            .collect()
    }
}

/// Result of a compile step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub success: bool,
    pub output: String,
    /// Compiled artifact (binary path or class name) when compilation succeeded
    pub artifact: Option<String>,
}

impl CompileOutcome {
    pub fn success(output: impl Into<String>, artifact: Option<String>) -> Self {
        CompileOutcome {
            success: true,
            output: output.into(),
            artifact,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        CompileOutcome {
            success: false,
            output: output.into(),
            artifact: None,
        }
    }

    fn from_exec(result: ExecResult, artifact: impl Into<String>) -> Self {
        let artifact = result.success.then(|| artifact.into());
        CompileOutcome {
            success: result.success,
            output: result.output,
            artifact,
        }
    }
}

/// Per-language compile/execute command construction
///
/// The session sandbox is already running when any of these is called.
#[async_trait]
pub trait LanguageAdapter: Send + Sync {
    /// Language handled by this adapter
    fn language(&self) -> Language;

    /// Whether `compile` does real work
    fn requires_compilation(&self) -> bool {
        true
    }

    /// Process names a cancellation should signal
    fn process_names(&self) -> &'static [&'static str];

    /// Compile the submission inside the session sandbox
    async fn compile(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
    ) -> Result<CompileOutcome>;

    /// Run a previously compiled (or interpreted) submission
    async fn execute(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult>;

    /// Verification capability, if the language has one
    fn verifier(&self) -> Option<&dyn Verifier> {
        None
    }
}

/// Optional static verification capability
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        coordinator: &ExecutionCoordinator,
        session_id: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<ExecResult>;
}

/// Write every file of a submission into the sandbox
pub(crate) async fn write_all(
    coordinator: &ExecutionCoordinator,
    session_id: &str,
    files: &[SourceFile],
) -> Result<()> {
    for file in files {
        coordinator.write_file(session_id, &file.name, &file.content).await?;
    }
    Ok(())
}

/// Quote a word for `sh -c`, leaving plain filenames untouched
pub(crate) fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/+".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Stem of a filename (`Main.java` → `Main`)
fn file_stem(filename: &str) -> &str {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    base.rsplit_once('.').map_or(base, |(stem, _)| stem)
}

/// Registry of language adapters
pub struct AdapterRegistry {
    adapters: HashMap<Language, Arc<dyn LanguageAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        AdapterRegistry {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the five built-in adapters
    pub fn with_defaults(eiffel_timeout: Duration, compile_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(PythonAdapter);
        registry.register(CAdapter::new(compile_timeout));
        registry.register(CppAdapter::new(compile_timeout));
        registry.register(JavaAdapter::new(compile_timeout));
        registry.register(EiffelAdapter::new(eiffel_timeout));
        registry
    }

    /// Register an adapter, replacing any previous one for the language
    pub fn register<A: LanguageAdapter + 'static>(&mut self, adapter: A) {
        self.adapters.insert(adapter.language(), Arc::new(adapter));
    }

    /// Look up the adapter for a language
    pub fn get(&self, language: Language) -> Result<Arc<dyn LanguageAdapter>> {
        self.adapters
            .get(&language)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("No adapter for language: {}", language)))
    }

    /// Languages with a registered adapter
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.adapters.keys().copied().collect();
        languages.sort_by_key(|l| l.to_string());
        languages
    }

    /// Union of every adapter's process names, deduplicated
    pub fn process_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .adapters
            .values()
            .flat_map(|a| a.process_names().iter().copied())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A mock engine with one running sandbox for session "s1"
#[cfg(test)]
pub(crate) async fn test_sandbox(
    language: Language,
) -> (Arc<crate::engine::mock::MockEngine>, ExecutionCoordinator) {
    use crate::config::SandboxConfig;
    use crate::engine::mock::MockEngine;
    use crate::sandbox::{SandboxManager, SandboxRegistry};

    let engine = Arc::new(MockEngine::new());
    let registry = Arc::new(SandboxRegistry::new());
    let config = SandboxConfig::default();
    SandboxManager::new(engine.clone(), registry.clone(), config.clone())
        .ensure_sandbox("s1", language)
        .await
        .unwrap();

    let names = AdapterRegistry::with_defaults(Duration::from_secs(60), Duration::from_secs(30))
        .process_names();
    let coordinator = ExecutionCoordinator::new(engine.clone(), registry, &config, &names);
    (engine, coordinator)
}
