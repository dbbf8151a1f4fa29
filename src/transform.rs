/// Downstream transformation step (dbt), run as a child process.
///
/// Each step runs `<executable> <step> --profiles-dir <profiles_dir>` with
/// the dbt project as working directory. `debug` and `run` failures stop
/// the ETL; `test` failures are only reported.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Output};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::DbtConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbtStep {
    Debug,
    Run,
    Test,
}

impl DbtStep {
    pub fn as_arg(self) -> &'static str {
        match self {
            DbtStep::Debug => "debug",
            DbtStep::Run => "run",
            DbtStep::Test => "test",
        }
    }
}

impl fmt::Display for DbtStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("no [dbt] section in config")]
    NotConfigured,

    #[error("could not start '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dbt {step} failed: {detail}")]
    StepFailed { step: DbtStep, detail: String },
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: DbtStep,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutcome {
    fn from_output(step: DbtStep, output: Output) -> Self {
        Self {
            step,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// stderr if it says anything, stdout otherwise (dbt reports test
    /// failures on stdout).
    fn detail(&self) -> String {
        let text = if self.stderr.trim().is_empty() { &self.stdout } else { &self.stderr };
        text.trim().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct DbtRunner {
    executable: String,
    project_dir: PathBuf,
    profiles_dir: PathBuf,
}

impl DbtRunner {
    pub fn new(config: &DbtConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            project_dir: config.project_dir.clone(),
            profiles_dir: config.profiles_dir.clone(),
        }
    }

    pub fn from_config(config: Option<&DbtConfig>) -> Result<Self, TransformError> {
        config.map(Self::new).ok_or(TransformError::NotConfigured)
    }

    pub fn command(&self, step: DbtStep) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(step.as_arg())
            .arg("--profiles-dir")
            .arg(&self.profiles_dir)
            .current_dir(&self.project_dir);
        command
    }

    /// Run one step to completion. Only a failure to start the process is
    /// an error; a non-zero exit is reported in the outcome.
    pub fn run_step(&self, step: DbtStep) -> Result<StepOutcome, TransformError> {
        info!(%step, project_dir = %self.project_dir.display(), "running dbt");
        let output = self
            .command(step)
            .output()
            .map_err(|source| TransformError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;
        Ok(StepOutcome::from_output(step, output))
    }

    fn run_required(&self, step: DbtStep) -> Result<StepOutcome, TransformError> {
        let outcome = self.run_step(step)?;
        if !outcome.success {
            return Err(TransformError::StepFailed {
                step,
                detail: outcome.detail(),
            });
        }
        Ok(outcome)
    }

    /// `dbt debug`: connection and project check.
    pub fn check(&self) -> Result<(), TransformError> {
        self.run_required(DbtStep::Debug)?;
        info!("dbt configuration verified");
        Ok(())
    }

    /// `dbt run`: build the models.
    pub fn run_models(&self) -> Result<(), TransformError> {
        let outcome = self.run_required(DbtStep::Run)?;
        info!("dbt models built");
        if !outcome.stdout.trim().is_empty() {
            info!("dbt output:\n{}", outcome.stdout.trim());
        }
        Ok(())
    }

    /// `dbt test`: data quality checks. Never fails the pipeline; returns
    /// whether every test passed.
    pub fn run_tests(&self) -> bool {
        match self.run_step(DbtStep::Test) {
            Ok(outcome) if outcome.success => {
                info!("all dbt tests passed");
                true
            }
            Ok(outcome) => {
                warn!("some dbt tests failed:\n{}", outcome.detail());
                false
            }
            Err(e) => {
                warn!(error = %e, "could not run dbt tests");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
