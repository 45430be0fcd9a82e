//! Bounded-concurrency job scheduler
//!
//! Jobs wait in an unbounded FIFO queue and run on at most `limit` worker
//! slots. The scheduler never blocks and never runs callbacks itself: the
//! owner calls [`Scheduler::poll`] from its event loop and completes the
//! returned jobs one at a time, so callbacks are serialized on the owner's
//! thread.
//!
//! ```text
//! submit ──► queue ──(free slot, oldest first)──► running ──(exit)──► finished
//!                                                   │
//!                            timeout: SIGTERM at T, SIGKILL at T + 1s
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::job::{ConversionJob, JobId, JobOutcome, JobState};
use super::process::{Launcher, ProcessHandle};

/// Time between the termination signal and the forced kill
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Interval between liveness checks while cancelling
const CANCEL_POLL: Duration = Duration::from_millis(20);

struct Running<C, H> {
    id: JobId,
    job: ConversionJob<C>,
    handle: H,
    started: Instant,
    terminate_sent: Option<Instant>,
    kill_sent: bool,
}

/// A job that reached a terminal state, ready for its callback
pub struct Finished<C> {
    pub job: ConversionJob<C>,
    pub outcome: JobOutcome,
}

impl<C> Finished<C> {
    /// Runs the job's completion callback on the owner's context
    pub fn complete(self, context: &mut C) {
        let Finished { job, outcome } = self;
        job.complete(context, &outcome);
    }
}

/// Bounded FIFO pool of conversion processes
pub struct Scheduler<C, L: Launcher> {
    launcher: L,
    limit: usize,
    timeout: Option<Duration>,
    queue: VecDeque<(JobId, ConversionJob<C>)>,
    running: Vec<Running<C, L::Handle>>,

    /// Jobs whose processes could not be started, delivered on the next poll
    unstarted: Vec<(JobId, ConversionJob<C>, Instant)>,
    next_id: JobId,
}

impl<C, L: Launcher> Scheduler<C, L> {
    /// Creates a scheduler running at most `limit` jobs at once
    pub fn new(launcher: L, limit: usize, timeout: Option<Duration>) -> Self {
        Self {
            launcher,
            limit: limit.max(1),
            timeout,
            queue: VecDeque::new(),
            running: Vec::new(),
            unstarted: Vec::new(),
            next_id: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued, running or awaiting delivery
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty() && self.unstarted.is_empty()
    }

    /// Labels of running jobs followed by queued jobs in dispatch order
    pub fn labels(&self) -> Vec<&str> {
        self.running
            .iter()
            .map(|run| run.job.label.as_str())
            .chain(self.queue.iter().map(|(_, job)| job.label.as_str()))
            .collect()
    }

    /// State of a job that has not been delivered yet
    pub fn state(&self, id: JobId) -> Option<JobState> {
        if self.running.iter().any(|run| run.id == id) {
            Some(JobState::Running)
        } else if self.queue.iter().any(|(queued, _)| *queued == id) {
            Some(JobState::Queued)
        } else if self.unstarted.iter().any(|(failed, _, _)| *failed == id) {
            Some(JobState::Failed)
        } else {
            None
        }
    }

    /// Adds a job; it starts right away when a worker slot is free
    pub fn submit(&mut self, job: ConversionJob<C>, now: Instant) -> JobId {
        let id = self.next_id;
        self.next_id += 1;

        if self.running.len() < self.limit {
            self.dispatch(id, job, now);
        } else {
            tracing::debug!(job = id, label = %job.label, "queued");
            self.queue.push_back((id, job));
        }
        id
    }

    fn dispatch(&mut self, id: JobId, job: ConversionJob<C>, now: Instant) {
        match self.launcher.launch(&job.stages) {
            Ok(handle) => {
                tracing::debug!(job = id, label = %job.label, "started");
                self.running.push(Running {
                    id,
                    job,
                    handle,
                    started: now,
                    terminate_sent: None,
                    kill_sent: false,
                });
            }
            Err(e) => {
                tracing::warn!(job = id, label = %job.label, "failed to start: {}", e);
                self.unstarted.push((id, job, now));
            }
        }
    }

    /// Starts queued jobs, oldest first, while slots are free
    fn fill_slots(&mut self, now: Instant) {
        while self.running.len() < self.limit {
            let Some((id, job)) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(id, job, now);
        }
    }

    /// Sends the timeout signals a running job is due
    fn enforce_timeout(timeout: Option<Duration>, run: &mut Running<C, L::Handle>, now: Instant) {
        let Some(limit) = timeout else {
            return;
        };

        match run.terminate_sent {
            None if now.saturating_duration_since(run.started) >= limit => {
                tracing::debug!(job = run.id, label = %run.job.label, "timed out, terminating");
                run.handle.terminate();
                run.terminate_sent = Some(now);
            }
            Some(sent) if !run.kill_sent && now.saturating_duration_since(sent) >= KILL_GRACE => {
                tracing::debug!(job = run.id, label = %run.job.label, "still alive, killing");
                run.handle.kill();
                run.kill_sent = true;
            }
            _ => {}
        }
    }

    /// Reaps exited jobs, enforces timeouts and refills free slots
    ///
    /// Returns the jobs that reached a terminal state; the caller runs
    /// their callbacks.
    pub fn poll(&mut self, now: Instant) -> Vec<Finished<C>> {
        let mut finished = Vec::new();

        let mut index = 0;
        while index < self.running.len() {
            let exit = match self.running[index].handle.try_wait() {
                Ok(exit) => exit,
                Err(e) => {
                    let run = &mut self.running[index];
                    tracing::warn!(job = run.id, label = %run.job.label, "lost track of process: {}", e);
                    run.handle.kill();
                    let _ = run.handle.wait();
                    Some(false)
                }
            };

            match exit {
                Some(success) => {
                    let run = self.running.remove(index);
                    let state = if success {
                        JobState::Succeeded
                    } else if run.terminate_sent.is_some() {
                        JobState::TimedOut
                    } else {
                        JobState::Failed
                    };
                    tracing::debug!(job = run.id, label = %run.job.label, state = state.as_str(), "finished");

                    finished.push(Finished {
                        outcome: JobOutcome {
                            id: run.id,
                            state,
                            elapsed: now.saturating_duration_since(run.started),
                        },
                        job: run.job,
                    });
                }
                None => {
                    Self::enforce_timeout(self.timeout, &mut self.running[index], now);
                    index += 1;
                }
            }
        }

        self.fill_slots(now);

        for (id, job, at) in self.unstarted.drain(..) {
            finished.push(Finished {
                outcome: JobOutcome {
                    id,
                    state: JobState::Failed,
                    elapsed: now.saturating_duration_since(at),
                },
                job,
            });
        }

        finished
    }

    /// Stops everything: queued jobs are dropped, running jobs get SIGTERM
    /// and, after the grace period, SIGKILL
    ///
    /// No callbacks run. The dropped jobs are returned so the owner can
    /// clean up their temp outputs.
    pub fn cancel_all(&mut self) -> Vec<ConversionJob<C>> {
        let mut dropped: Vec<_> = self.queue.drain(..).map(|(_, job)| job).collect();
        dropped.extend(self.unstarted.drain(..).map(|(_, job, _)| job));

        if self.running.is_empty() {
            return dropped;
        }

        tracing::debug!(
            running = self.running.len(),
            queued = dropped.len(),
            "cancelling conversions"
        );

        for run in &mut self.running {
            run.handle.terminate();
        }

        let deadline = Instant::now() + KILL_GRACE;
        let mut alive: Vec<_> = self.running.drain(..).collect();
        loop {
            let mut still_alive = Vec::new();
            for mut run in alive {
                match run.handle.try_wait() {
                    Ok(None) => still_alive.push(run),
                    Ok(Some(_)) | Err(_) => dropped.push(run.job),
                }
            }
            alive = still_alive;

            if alive.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(CANCEL_POLL);
        }

        for mut run in alive {
            run.handle.kill();
            let _ = run.handle.wait();
            dropped.push(run.job);
        }

        dropped
    }
}
