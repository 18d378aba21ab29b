//! C++ adapter

use std::time::Duration;

use async_trait::async_trait;

use super::c::{compile_native, run_native, NATIVE_BINARY};
use super::{CompileOutcome, Language, LanguageAdapter, Submission};
use crate::error::Result;
use crate::sandbox::{ExecResult, ExecutionCoordinator};

/// Compiled with `g++`
pub struct CppAdapter {
    compile_timeout: Duration,
}

impl CppAdapter {
    pub fn new(compile_timeout: Duration) -> Self {
        CppAdapter { compile_timeout }
    }
}

#[async_trait]
impl LanguageAdapter for CppAdapter {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn process_names(&self) -> &'static [&'static str] {
        &["g++", "cc1plus", NATIVE_BINARY]
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
            "g++",
            &[".cpp", ".cc", ".cxx"],
            "C++",
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
