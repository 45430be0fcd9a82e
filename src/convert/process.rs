//! External process launching
//!
//! [`Launcher`] and [`ProcessHandle`] are the seam between the scheduler and
//! the operating system; tests substitute fakes.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use super::job::Stage;

/// A running job: one or more piped processes
pub trait ProcessHandle {
    /// Returns `Some(success)` once every process exited, where success
    /// means all of them exited cleanly
    fn try_wait(&mut self) -> io::Result<Option<bool>>;

    /// Asks the processes to exit (SIGTERM on unix)
    fn terminate(&mut self);

    /// Forcibly kills the processes
    fn kill(&mut self);

    /// Blocks until every process exited
    fn wait(&mut self) -> io::Result<bool>;
}

/// Starts jobs
pub trait Launcher {
    type Handle: ProcessHandle;

    fn launch(&mut self, stages: &[Stage]) -> io::Result<Self::Handle>;
}

/// Launches real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

struct RunningStage {
    child: Child,
    status: Option<ExitStatus>,
}

/// Processes of one job, connected by pipes
pub struct ProcessPipeline {
    stages: Vec<RunningStage>,
}

impl Launcher for SystemLauncher {
    type Handle = ProcessPipeline;

    fn launch(&mut self, stages: &[Stage]) -> io::Result<ProcessPipeline> {
        if stages.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "job has no stages"));
        }

        let mut running: Vec<RunningStage> = Vec::with_capacity(stages.len());
        let mut upstream = None;

        for (index, stage) in stages.iter().enumerate() {
            let last = index + 1 == stages.len();
            let stdin = match upstream.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            };

            let spawned = Command::new(&stage.program)
                .args(&stage.args)
                .stdin(stdin)
                .stdout(if last { Stdio::null() } else { Stdio::piped() })
                .stderr(Stdio::null())
                .spawn();

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    // Don't leave earlier stages writing into a dead pipe
                    for mut stage in running {
                        let _ = stage.child.kill();
                        let _ = stage.child.wait();
                    }
                    return Err(e);
                }
            };

            upstream = child.stdout.take();
            running.push(RunningStage {
                child,
                status: None,
            });
        }

        let pipeline = ProcessPipeline { stages: running };
        tracing::debug!(pids = ?pipeline.ids(), "pipeline started");
        Ok(pipeline)
    }
}

impl ProcessPipeline {
    fn outcome(&self) -> Option<bool> {
        let mut success = true;
        for stage in &self.stages {
            match stage.status {
                Some(status) => success &= status.success(),
                None => return None,
            }
        }
        Some(success)
    }

    /// Process ids of the stages, for logging
    pub fn ids(&self) -> Vec<u32> {
        self.stages.iter().map(|stage| stage.child.id()).collect()
    }
}

impl ProcessHandle for ProcessPipeline {
    fn try_wait(&mut self) -> io::Result<Option<bool>> {
        for stage in &mut self.stages {
            if stage.status.is_none() {
                stage.status = stage.child.try_wait()?;
            }
        }
        Ok(self.outcome())
    }

    fn terminate(&mut self) {
        for stage in &mut self.stages {
            if stage.status.is_none() {
                send_terminate(&mut stage.child);
            }
        }
    }

    fn kill(&mut self) {
        for stage in &mut self.stages {
            if stage.status.is_none() {
                let _ = stage.child.kill();
            }
        }
    }

    fn wait(&mut self) -> io::Result<bool> {
        for stage in &mut self.stages {
            if stage.status.is_none() {
                stage.status = Some(stage.child.wait()?);
            }
        }
        Ok(self.outcome().unwrap_or(false))
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    // The child has not been reaped yet, so its pid is still ours
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Starts a process that outlives any tracking (fire-and-forget)
pub fn launch_detached(program: &Path, args: &[OsString]) -> io::Result<u32> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        cmd.creation_flags(DETACHED_PROCESS);
    }

    let child = cmd.spawn()?;
    Ok(child.id())
}
