use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use utoipa::ToSchema;

use super::model::JobId;

/// Fine-grained orchestrator position of a job. Only the persisted
/// [`super::model::JobStatus`] is durable; this lives as long as the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Received,
    Staged,
    Encoding,
    Publishing,
    Completed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStage::Received => "received",
            JobStage::Staged => "staged",
            JobStage::Encoding => "encoding",
            JobStage::Publishing => "publishing",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ProgressSnapshot {
    pub progress: f64,
    pub stage: JobStage,
}

impl ProgressSnapshot {
    pub fn new(progress: f64, stage: JobStage) -> Self {
        Self { progress, stage }
    }
}

type Channels = HashMap<JobId, watch::Receiver<ProgressSnapshot>>;

/// Fan-out of live progress, one watch channel per running job. A new
/// subscriber sees the latest value only; there is no backlog.
#[derive(Clone, Default)]
pub struct ProgressHub {
    channels: Arc<RwLock<Channels>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Channels> {
        self.channels.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Channels> {
        self.channels.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the channel for `job_id`. The returned reporter is the only
    /// writer; dropping it closes the channel.
    pub fn register(&self, job_id: JobId) -> ProgressReporter {
        let (tx, rx) = watch::channel(ProgressSnapshot::new(0.0, JobStage::Received));
        self.write().insert(job_id, rx);

        ProgressReporter {
            job_id,
            tx,
            hub: self.clone(),
            finished: false,
        }
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.read().get(&job_id).map(|rx| *rx.borrow())
    }

    pub fn subscribe(&self, job_id: JobId) -> Option<watch::Receiver<ProgressSnapshot>> {
        self.read().get(&job_id).cloned()
    }

    pub fn active_jobs(&self) -> usize {
        self.read().len()
    }

    /// Drops the entry once the job's record is terminal. Until then
    /// `snapshot` keeps answering with the last published value.
    pub(crate) fn remove(&self, job_id: JobId) {
        self.write().remove(&job_id);
    }
}

/// Write side of one job's progress channel, owned by that job's task.
pub struct ProgressReporter {
    job_id: JobId,
    tx: watch::Sender<ProgressSnapshot>,
    hub: ProgressHub,
    finished: bool,
}

impl ProgressReporter {
    pub fn set_stage(&self, stage: JobStage) {
        self.tx.send_modify(|s| s.stage = stage);
    }

    /// Clamps to `[0, 100]` and never moves backwards. Returns the value
    /// subscribers now see.
    pub fn report(&self, percent: f64) -> f64 {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };

        self.tx.send_if_modified(|s| {
            if percent > s.progress {
                s.progress = percent;
                true
            } else {
                false
            }
        });

        let current = self.tx.borrow().progress;
        debug!(job_id = %self.job_id, progress = current, "Progress");
        current
    }

    /// Publishes the terminal marker and unregisters the job. Call only after
    /// the terminal status is durable. Existing subscribers still read the
    /// final value after the channel closes.
    pub fn finish(mut self, stage: JobStage) {
        self.close(stage);
        self.hub.remove(self.job_id);
    }

    fn close(&mut self, stage: JobStage) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.tx.send_modify(|s| {
            s.stage = stage;
            if stage == JobStage::Completed {
                s.progress = 100.0;
            }
        });
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // Unwinding job task: subscribers must still see an end. The entry
        // stays until the watchdog has recorded the failure.
        self.close(JobStage::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn given_out_of_order_reports_then_progress_never_regresses() {
        let hub = ProgressHub::new();
        let id = Uuid::new_v4();
        let reporter = hub.register(id);

        assert_eq!(reporter.report(40.0), 40.0);
        assert_eq!(reporter.report(25.0), 40.0);
        assert_eq!(reporter.report(180.0), 100.0);
        assert_eq!(reporter.report(-5.0), 100.0);
        assert_eq!(hub.snapshot(id).unwrap().progress, 100.0);
    }

    #[test]
    fn given_nan_report_then_value_is_ignored() {
        let hub = ProgressHub::new();
        let reporter = hub.register(Uuid::new_v4());

        reporter.report(12.5);
        assert_eq!(reporter.report(f64::NAN), 12.5);
    }

    #[test]
    fn given_two_jobs_then_progress_is_isolated() {
        let hub = ProgressHub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ra = hub.register(a);
        let rb = hub.register(b);

        ra.report(70.0);
        rb.report(10.0);

        assert_eq!(hub.snapshot(a).unwrap().progress, 70.0);
        assert_eq!(hub.snapshot(b).unwrap().progress, 10.0);
    }

    #[test]
    fn given_late_subscriber_then_latest_value_is_seen_first() {
        let hub = ProgressHub::new();
        let id = Uuid::new_v4();
        let reporter = hub.register(id);
        reporter.set_stage(JobStage::Encoding);
        reporter.report(10.0);
        reporter.report(55.0);

        let rx = hub.subscribe(id).unwrap();

        assert_eq!(*rx.borrow(), ProgressSnapshot::new(55.0, JobStage::Encoding));
    }

    #[tokio::test]
    async fn given_finished_job_then_subscriber_sees_terminal_marker_and_entry_is_gone() {
        let hub = ProgressHub::new();
        let id = Uuid::new_v4();
        let reporter = hub.register(id);
        let mut rx = hub.subscribe(id).unwrap();

        reporter.finish(JobStage::Completed);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ProgressSnapshot::new(100.0, JobStage::Completed));
        assert!(hub.snapshot(id).is_none());
        assert_eq!(hub.active_jobs(), 0);
    }

    #[test]
    fn given_dropped_reporter_then_channel_ends_failed_and_last_value_stays_readable() {
        let hub = ProgressHub::new();
        let id = Uuid::new_v4();
        let reporter = hub.register(id);
        let rx = hub.subscribe(id).unwrap();
        reporter.report(35.0);

        drop(reporter);

        assert_eq!(rx.borrow().stage, JobStage::Failed);
        assert_eq!(hub.snapshot(id), Some(ProgressSnapshot::new(35.0, JobStage::Failed)));

        hub.remove(id);
        assert!(hub.subscribe(id).is_none());
    }
}
