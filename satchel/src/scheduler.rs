//! Recurring garbage collection.
//!
//! [`spawn_gc_task`] runs [`SessionManager::run_garbage_collection`] on a
//! fixed interval in a background tokio task. At most one such task can be
//! registered per session manager at a time.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::lifecycle::{GcOutcome, SessionManager};

/// A handle to a running garbage collection task.
///
/// The task is aborted when the handle is dropped or stopped, after which a
/// new task can be registered for the same manager.
#[derive(Debug)]
pub struct GcTask {
    handle: Option<JoinHandle<()>>,
    manager: SessionManager,
    interval: Duration,
}

impl GcTask {
    /// Returns the interval between two garbage collection runs.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the task and waits until it has finished.
    ///
    /// A sweep that is in progress is cancelled.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // the only possible error is the cancellation itself
            let _ = handle.await;
        }
        info!("Stopped session garbage collection");
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.manager.release_gc();
    }
}

/// Spawns a background task that collects expired sessions every
/// `interval`.
///
/// The first run happens one full interval after the task is spawned. If a
/// run takes longer than the interval, the missed runs are skipped rather
/// than executed in a burst. A failed run is logged and does not stop the
/// task.
///
/// The task runs on the tokio runtime the function is called from.
///
/// # Errors
///
/// Returns [`SessionError::InvalidGcInterval`] if `interval` is zero,
/// [`SessionError::NoRuntime`] if called outside of a tokio runtime, and
/// [`SessionError::GcAlreadyScheduled`] if a task is already registered for
/// the manager.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use satchel::config::SessionConfig;
/// use satchel::lifecycle::SessionManager;
/// use satchel::scheduler::spawn_gc_task;
///
/// # #[tokio::main]
/// # async fn main() -> satchel::Result<()> {
/// let manager = SessionManager::from_config(SessionConfig::default())?;
/// let task = spawn_gc_task(&manager, Duration::from_secs(15 * 60))?;
///
/// // only one task per manager
/// assert!(spawn_gc_task(&manager, Duration::from_secs(60)).is_err());
///
/// task.stop().await;
/// # Ok(())
/// # }
/// ```
pub fn spawn_gc_task(manager: &SessionManager, interval: Duration) -> Result<GcTask> {
    if interval.is_zero() {
        return Err(SessionError::InvalidGcInterval);
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
    if !manager.try_register_gc() {
        return Err(SessionError::GcAlreadyScheduled);
    }

    let task_manager = manager.clone();
    let handle = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match task_manager.run_garbage_collection().await {
                Ok(GcOutcome::Collected(_)) => {}
                Ok(outcome) => debug!(?outcome, "Scheduled session garbage collection did not run"),
                Err(err) => warn!(error = %err, "Scheduled session garbage collection failed"),
            }
        }
    });
    info!(interval = %humantime::format_duration(interval), "Scheduled session garbage collection");

    Ok(GcTask {
        handle: Some(handle),
        manager: manager.clone(),
        interval,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::SessionConfig;
    use crate::session::store::memory::MemoryStore;
    use crate::session::store::{MockRecordStore, RecordStore, RecordStoreError, RecordStoreWrapper};
    use crate::test::ManualClock;

    const INTERVAL: Duration = Duration::from_secs(60);

    async fn make_manager_with_expired_record() -> (SessionManager, MemoryStore) {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(store.clone())),
        );

        let request = manager.begin_request(None).await;
        manager.end_request(request).await.unwrap();
        clock.advance(manager.lifetime() + Duration::from_secs(1));

        (manager, store)
    }

    #[tokio::test(start_paused = true)]
    async fn collects_periodically() {
        let (manager, store) = make_manager_with_expired_record().await;

        let task = spawn_gc_task(&manager, INTERVAL).unwrap();
        assert_eq!(task.interval(), INTERVAL);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.count().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.count().await.unwrap(), 0);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn respects_maintenance_mode() {
        let (manager, store) = make_manager_with_expired_record().await;
        manager.set_maintenance_mode(true);

        let _task = spawn_gc_task(&manager, INTERVAL).unwrap();
        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
        assert_eq!(store.count().await.unwrap(), 1);

        manager.set_maintenance_mode(false);
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_running_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mock = MockRecordStore::new();
        let mock_calls = Arc::clone(&calls);
        mock.expect_gc().returning(move |_| {
            if mock_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecordStoreError::Backend("locked".to_owned()))
            } else {
                Ok(0)
            }
        });
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(mock)),
        );

        let _task = spawn_gc_task(&manager, INTERVAL).unwrap();
        tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_interval() {
        let manager = SessionManager::from_config(SessionConfig::default()).unwrap();

        let result = spawn_gc_task(&manager, Duration::ZERO);
        assert!(matches!(result, Err(SessionError::InvalidGcInterval)));

        // a rejected interval does not register a task
        spawn_gc_task(&manager, INTERVAL).unwrap();
    }

    #[test]
    fn outside_runtime() {
        let manager = SessionManager::from_config(SessionConfig::default()).unwrap();

        let result = spawn_gc_task(&manager, INTERVAL);
        assert!(matches!(result, Err(SessionError::NoRuntime)));

        // the failed call does not keep the manager registered
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let task = spawn_gc_task(&manager, INTERVAL).unwrap();
            task.stop().await;
        });
    }

    #[tokio::test]
    async fn one_task_per_manager() {
        let manager = SessionManager::from_config(SessionConfig::default()).unwrap();

        let task = spawn_gc_task(&manager, INTERVAL).unwrap();
        let result = spawn_gc_task(&manager.clone(), INTERVAL);
        assert!(matches!(result, Err(SessionError::GcAlreadyScheduled)));

        drop(task);
        let task = spawn_gc_task(&manager, INTERVAL).unwrap();
        task.stop().await;
        spawn_gc_task(&manager, INTERVAL).unwrap();
    }

    #[tokio::test]
    async fn separate_managers_have_separate_tasks() {
        let first = SessionManager::from_config(SessionConfig::default()).unwrap();
        let second = SessionManager::from_config(SessionConfig::default()).unwrap();

        let _first_task = spawn_gc_task(&first, INTERVAL).unwrap();
        let _second_task = spawn_gc_task(&second, INTERVAL).unwrap();
    }
}
