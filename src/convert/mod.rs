//! # Conversion Pipeline
//!
//! Produces artifacts by running external tools.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ToolSet`] | Finds the tools and builds their command lines |
//! | [`ConversionJob`] | Stages to run, temp/final paths, completion callback |
//! | [`Launcher`] | Starts a job's processes ([`SystemLauncher`] for real ones) |
//! | [`Scheduler`] | Bounded FIFO pool with timeouts and cancellation |
//!
//! Nothing here blocks except [`ToolSet::read_dump`], which runs the
//! attribute dump synchronously.

mod job;
mod process;
mod scheduler;
mod tools;

pub use job::{Completion, ConversionJob, JobId, JobOutcome, JobState, Stage};
pub use process::{launch_detached, Launcher, ProcessHandle, ProcessPipeline, SystemLauncher};
pub use scheduler::{Finished, Scheduler, KILL_GRACE};
pub use tools::{
    find_executable, player_args, read_dump, DumpError, PlayError, ToolError, ToolSet,
};
