//! Compiler backends. Each job is one source file in, one artifact out.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail};

use crate::composer::types::ShaderStage;

use super::validation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BakeVariant {
    Primary,
    Preview,
}

impl BakeVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            BakeVariant::Primary => "primary",
            BakeVariant::Preview => "preview",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BakeJob {
    pub stage: ShaderStage,
    pub variant: BakeVariant,
    /// Merged source written for this attempt.
    pub source_path: PathBuf,
    /// Where the compiler writes; lives inside the attempt directory.
    pub output_path: PathBuf,
    /// Final location the artifact is promoted to on success.
    pub target_path: PathBuf,
    pub flags: Vec<String>,
}

impl BakeJob {
    /// `"fragment/preview"`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.stage, self.variant.as_str())
    }
}

impl fmt::Display for BakeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: BakeJob,
    pub success: bool,
    /// Compiler output, if any was produced.
    pub diagnostics: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl JobOutcome {
    pub fn succeeded(job: &BakeJob, diagnostics: Option<String>) -> Self {
        Self {
            output_path: Some(job.output_path.clone()),
            job: job.clone(),
            success: true,
            diagnostics,
        }
    }

    pub fn failed(job: &BakeJob, diagnostics: impl Into<String>) -> Self {
        Self {
            job: job.clone(),
            success: false,
            diagnostics: Some(diagnostics.into()),
            output_path: None,
        }
    }
}

pub trait ShaderCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// Fatal precondition check, run before any job of a build is spawned.
    fn check_ready(&self) -> Result<()>;

    /// Compile one job. Called concurrently from job threads.
    fn compile(&self, job: &BakeJob) -> JobOutcome;
}

/// External executable invoked as `<exe> <flags...> -o <output> <source>`.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    executable: PathBuf,
}

fn find_in_path(name: &Path) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| {
            let plain = dir.join(name);
            let exe = dir.join(name).with_extension(std::env::consts::EXE_EXTENSION);
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

impl ProcessCompiler {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn resolve(&self) -> Option<PathBuf> {
        if self.executable.components().count() > 1 || self.executable.is_absolute() {
            return self.executable.is_file().then(|| self.executable.clone());
        }
        find_in_path(&self.executable)
    }
}

impl ShaderCompiler for ProcessCompiler {
    fn name(&self) -> &str {
        "process"
    }

    fn check_ready(&self) -> Result<()> {
        if self.resolve().is_none() {
            bail!(
                "shader compiler `{}` not found",
                self.executable.display()
            );
        }
        Ok(())
    }

    fn compile(&self, job: &BakeJob) -> JobOutcome {
        let output = Command::new(&self.executable)
            .args(&job.flags)
            .arg("-o")
            .arg(&job.output_path)
            .arg(&job.source_path)
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                return JobOutcome::failed(
                    job,
                    format!("failed to run {}: {e}", self.executable.display()),
                );
            }
        };

        let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stdout.trim());
        }
        let diagnostics = (!text.is_empty()).then_some(text);

        if output.status.success() && job.output_path.is_file() {
            JobOutcome::succeeded(job, diagnostics)
        } else {
            JobOutcome::failed(
                job,
                diagnostics.unwrap_or_else(|| format!("compiler exited with {}", output.status)),
            )
        }
    }
}

/// Validates each stage with naga and writes the WGSL translation as the artifact.
#[derive(Debug, Clone, Default)]
pub struct NagaCompiler;

impl NagaCompiler {
    fn translate(job: &BakeJob) -> Result<()> {
        let source = std::fs::read_to_string(&job.source_path)
            .with_context(|| format!("failed to read {}", job.source_path.display()))?;
        let wgsl = validation::glsl_to_wgsl(&source, job.stage)?;
        std::fs::write(&job.output_path, wgsl)
            .with_context(|| format!("failed to write {}", job.output_path.display()))
    }
}

impl ShaderCompiler for NagaCompiler {
    fn name(&self) -> &str {
        "naga"
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    fn compile(&self, job: &BakeJob) -> JobOutcome {
        match Self::translate(job) {
            Ok(()) => JobOutcome::succeeded(job, None),
            Err(e) => JobOutcome::failed(job, format!("{e:#}")),
        }
    }
}
