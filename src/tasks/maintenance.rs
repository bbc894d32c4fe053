//! Maintenance Task
//!
//! Background task that periodically sweeps expired entries and writes
//! snapshot checkpoints.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;

/// Work the maintenance task performs on a cache.
#[async_trait]
pub trait Maintenance: Send + Sync + 'static {
    /// Removes stale entries, returning how many were expired.
    async fn sweep_expired(&self) -> usize;

    /// Writes a snapshot, returning the number of entries written.
    fn checkpoint(&self) -> Result<usize>;
}

/// Periods of the two maintenance jobs. `None` disables a job.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceSchedule {
    pub sweep_interval: Option<Duration>,
    pub checkpoint_interval: Option<Duration>,
}

impl MaintenanceSchedule {
    pub fn is_idle(&self) -> bool {
        self.sweep_interval.is_none() && self.checkpoint_interval.is_none()
    }
}

fn timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    })
}

/// Waits for the next tick, or forever when the job is disabled.
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Spawns the background maintenance task.
///
/// The task holds only a weak reference to its target and stops on its own
/// once the target is dropped.
///
/// # Arguments
/// * `target` - The cache to maintain
/// * `schedule` - Sweep and checkpoint periods
/// * `cancel` - Stops the task; a running job finishes first
///
/// # Returns
/// A JoinHandle for the spawned task, awaited during shutdown so no job
/// overlaps the final snapshot.
pub fn spawn_maintenance_task<M: Maintenance>(
    target: Weak<M>,
    schedule: MaintenanceSchedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting maintenance task (sweep every {:?}, checkpoint every {:?})",
            schedule.sweep_interval, schedule.checkpoint_interval
        );
        let mut sweeps = timer(schedule.sweep_interval);
        let mut checkpoints = timer(schedule.checkpoint_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick(&mut sweeps) => {
                    let Some(target) = target.upgrade() else { break };
                    let expired = target.sweep_expired().await;
                    if expired > 0 {
                        debug!("Maintenance sweep: expired {} entries", expired);
                    }
                }
                _ = tick(&mut checkpoints) => {
                    let Some(target) = target.upgrade() else { break };
                    run_checkpoint(target).await;
                }
            }
        }

        info!("Maintenance task stopped");
    })
}

async fn run_checkpoint<M: Maintenance>(target: Arc<M>) {
    match tokio::task::spawn_blocking(move || target.checkpoint()).await {
        Ok(Ok(written)) => debug!("Checkpoint wrote {} entries", written),
        Ok(Err(err)) => error!("Checkpoint failed: {}", err),
        Err(err) => error!("Checkpoint task failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sweeps: AtomicUsize,
        checkpoints: AtomicUsize,
        fail_checkpoints: bool,
    }

    #[async_trait]
    impl Maintenance for Recorder {
        async fn sweep_expired(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn checkpoint(&self) -> Result<usize> {
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
            if self.fail_checkpoints {
                return Err(CacheError::Closed);
            }
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_task_runs_both_jobs() {
        let target = Arc::new(Recorder::default());
        let schedule = MaintenanceSchedule {
            sweep_interval: Some(Duration::from_millis(20)),
            checkpoint_interval: Some(Duration::from_millis(30)),
        };
        let cancel = CancellationToken::new();
        let handle = spawn_maintenance_task(Arc::downgrade(&target), schedule, cancel.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(target.sweeps.load(Ordering::SeqCst) >= 2);
        assert!(target.checkpoints.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_disabled_job_never_runs() {
        let target = Arc::new(Recorder::default());
        let schedule = MaintenanceSchedule {
            sweep_interval: Some(Duration::from_millis(10)),
            checkpoint_interval: None,
        };
        let cancel = CancellationToken::new();
        let handle = spawn_maintenance_task(Arc::downgrade(&target), schedule, cancel.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(target.checkpoints.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_keeps_task_alive() {
        let target = Arc::new(Recorder {
            fail_checkpoints: true,
            ..Default::default()
        });
        let schedule = MaintenanceSchedule {
            sweep_interval: None,
            checkpoint_interval: Some(Duration::from_millis(10)),
        };
        let cancel = CancellationToken::new();
        let handle = spawn_maintenance_task(Arc::downgrade(&target), schedule, cancel.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!handle.is_finished());
        assert!(target.checkpoints.load(Ordering::SeqCst) >= 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_stops_when_target_dropped() {
        let target = Arc::new(Recorder::default());
        let schedule = MaintenanceSchedule {
            sweep_interval: Some(Duration::from_millis(10)),
            checkpoint_interval: None,
        };
        let handle =
            spawn_maintenance_task(Arc::downgrade(&target), schedule, CancellationToken::new());

        drop(target);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop")
            .unwrap();
    }
}
