// Job scheduler
//
// Every job fires on its own interval timer. A tick that arrives while the
// previous execution is still running is skipped and reported. Failures are
// logged and the job retries on its next tick, unless the job is blocking:
// then the failure escapes, every timer is cancelled and `run` returns it.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};

/// Job body, invoked once per tick
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Called with every error a job reports
pub type ErrorHook = Arc<dyn Fn(&str, &JobError) + Send + Sync>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("previous execution has not completed")]
    PreviousExecutionNotComplete,

    #[error(transparent)]
    Failed(#[from] AppError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {job} failed: {source}")]
    Escaped { job: String, source: JobError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    Idle = 0,
    Running = 1,
    Pending = 2,
    Error = 3,
}

impl From<u8> for JobStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => JobStatus::Running,
            2 => JobStatus::Pending,
            3 => JobStatus::Error,
            _ => JobStatus::Idle,
        }
    }
}

/// Single-flight state token
#[derive(Debug, Default)]
struct JobState(AtomicU8);

impl JobState {
    /// Move to running unless already running
    fn try_start(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != JobStatus::Running as u8).then_some(JobStatus::Running as u8)
            })
            .is_ok()
    }

    fn set(&self, status: JobStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    fn get(&self) -> JobStatus {
        self.0.load(Ordering::Acquire).into()
    }
}

pub struct Job {
    pub name: String,
    pub interval: Duration,
    pub defer: Option<Duration>,
    pub blocking: bool,
    action: JobAction,
    hook: Option<ErrorHook>,
    state: JobState,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            defer: None,
            blocking: false,
            action: Arc::new(action),
            hook: None,
            state: JobState::default(),
        }
    }

    /// Postpone the first tick
    pub fn defer(mut self, defer: Duration) -> Self {
        self.defer = Some(defer);
        self
    }

    /// Failures of a blocking job stop the scheduler
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn status(&self) -> JobStatus {
        self.state.get()
    }

    /// Execute the action once, unless the previous execution is still running
    pub async fn tick(&self) -> Result<(), SchedulerError> {
        if !self.state.try_start() {
            self.report(&JobError::PreviousExecutionNotComplete);
            return Ok(());
        }

        debug!(job = %self.name, "starting");
        match (self.action)().await {
            Ok(()) => {
                self.state.set(JobStatus::Pending);
                debug!(job = %self.name, "completed");
                Ok(())
            }
            Err(e) => {
                self.state.set(JobStatus::Error);
                let err = JobError::Failed(e);
                self.report(&err);
                if self.blocking {
                    return Err(SchedulerError::Escaped {
                        job: self.name.clone(),
                        source: err,
                    });
                }
                Ok(())
            }
        }
    }

    fn report(&self, err: &JobError) {
        error!(job = %self.name, status = ?self.status(), %err, "failed");
        if let Some(hook) = &self.hook {
            hook(&self.name, err);
        }
    }
}

/// Run jobs on their timers until one escapes.
///
/// On escape every timer is cancelled; executions already in flight are left
/// to finish.
pub async fn run(jobs: Vec<Job>) -> Result<(), SchedulerError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerError>();
    let mut timers = Vec::with_capacity(jobs.len());

    for job in jobs {
        let job = Arc::new(job);
        let tx = tx.clone();
        info!(job = %job.name, interval_ms = job.interval.as_millis() as u64, "⏰ Scheduling job");

        timers.push(tokio::spawn(async move {
            if let Some(defer) = job.defer {
                sleep(defer).await;
            }
            let mut ticker = interval(job.interval);
            loop {
                ticker.tick().await;
                let job = job.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = job.tick().await {
                        let _ = tx.send(e);
                    }
                });
            }
        }));
    }
    drop(tx);

    let result = match rx.recv().await {
        Some(err) => Err(err),
        None => Ok(()),
    };
    for timer in &timers {
        timer.abort();
    }
    if let Err(e) = &result {
        error!(%e, "scheduler stopped");
    }
    result
}
