//! Conversion job types

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Identifier assigned by the scheduler at submission
pub type JobId = u64;

/// Lifecycle of a conversion job
///
/// `Queued → Running → {Succeeded, Failed, TimedOut}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }
}

/// One process of a job. Consecutive stages are connected stdout to stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Stage {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Terminal result handed to a job's completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub id: JobId,
    pub state: JobState,
    pub elapsed: Duration,
}

impl JobOutcome {
    /// True iff every process of the job exited cleanly
    pub fn success(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// Callback run on the owner's context once the job is terminal
pub type Completion<C> = Box<dyn FnOnce(&mut C, &JobOutcome)>;

/// A conversion to run as external processes
pub struct ConversionJob<C> {
    /// Short description for logs (usually the source file)
    pub label: String,
    pub stages: Vec<Stage>,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    on_complete: Completion<C>,
}

impl<C> ConversionJob<C> {
    pub fn new(
        label: impl Into<String>,
        stages: Vec<Stage>,
        temp_path: impl Into<PathBuf>,
        final_path: impl Into<PathBuf>,
        on_complete: impl FnOnce(&mut C, &JobOutcome) + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            stages,
            temp_path: temp_path.into(),
            final_path: final_path.into(),
            on_complete: Box::new(on_complete),
        }
    }

    /// Consumes the job, running its callback
    pub(crate) fn complete(self, context: &mut C, outcome: &JobOutcome) {
        (self.on_complete)(context, outcome)
    }
}

impl<C> fmt::Debug for ConversionJob<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionJob")
            .field("label", &self.label)
            .field("stages", &self.stages)
            .field("temp_path", &self.temp_path)
            .field("final_path", &self.final_path)
            .finish_non_exhaustive()
    }
}
