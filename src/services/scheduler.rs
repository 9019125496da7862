//! Minute-resolution job scheduler.
//!
//! Checks the wall clock once a minute and launches due jobs as child
//! processes. A job that overruns its timeout gets SIGTERM, then SIGKILL once
//! the grace period is over.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use std::{ffi::OsString, time::Duration};
use tokio::{process::Command, time::MissedTickBehavior};
use tracing::{error, info, warn};

/// Time between SIGTERM and SIGKILL for an overrunning job.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At most once per calendar day, during the given local minute.
    DailyAt { hour: u32, minute: u32 },
    Every(Duration),
}

impl Schedule {
    pub fn is_due(&self, now: NaiveDateTime, last_fired: Option<NaiveDateTime>) -> bool {
        match *self {
            Schedule::DailyAt { hour, minute } => {
                now.hour() == hour
                    && now.minute() == minute
                    && last_fired.is_none_or(|last| last.date() != now.date())
            }
            Schedule::Every(interval) => last_fired.is_none_or(|last| {
                (now - last)
                    .to_std()
                    .map(|elapsed| elapsed >= interval)
                    .unwrap_or(false)
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub schedule: Schedule,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Exited { success: bool, code: Option<i32> },
    TimedOut,
}

/// Run `program` to completion or until `timeout` elapses.
pub async fn run_with_timeout(
    program: &OsString,
    args: &[OsString],
    timeout: Duration,
    grace: Duration,
) -> Result<JobOutcome> {
    let mut child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {:?}", program))?;

    if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
        let status = status.context("waiting for job")?;
        return Ok(JobOutcome::Exited {
            success: status.success(),
            code: status.code(),
        });
    }

    warn!(program = ?program, timeout_secs = timeout.as_secs(), "job timed out, sending SIGTERM");
    terminate(&child);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(program = ?program, "job ignored SIGTERM, killing");
        child.kill().await.context("killing job")?;
    }
    Ok(JobOutcome::TimedOut)
}

#[cfg(unix)]
fn terminate(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &tokio::process::Child) {}

/// Poll forever, launching each job when its schedule says so.
/// Returns after Ctrl-C.
pub async fn run(jobs: Vec<Job>) -> Result<()> {
    let mut state: Vec<(Job, Option<NaiveDateTime>)> =
        jobs.into_iter().map(|job| (job, None)).collect();
    for (job, _) in &state {
        info!(job = %job.name, schedule = ?job.schedule, "scheduled job");
    }

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler shutting down");
                return Ok(());
            }
        }

        let now = Local::now().naive_local();
        for (job, last_fired) in state.iter_mut() {
            if !job.schedule.is_due(now, *last_fired) {
                continue;
            }
            *last_fired = Some(now);
            let job = job.clone();
            tokio::spawn(async move {
                info!(job = %job.name, "starting job");
                match run_with_timeout(&job.program, &job.args, job.timeout, KILL_GRACE).await {
                    Ok(JobOutcome::Exited { success: true, .. }) => {
                        info!(job = %job.name, "job finished")
                    }
                    Ok(JobOutcome::Exited { code, .. }) => {
                        error!(job = %job.name, code = ?code, "job failed")
                    }
                    Ok(JobOutcome::TimedOut) => error!(job = %job.name, "job timed out"),
                    Err(err) => error!(job = %job.name, error = %err, "job could not run"),
                }
            });
        }
    }
}
