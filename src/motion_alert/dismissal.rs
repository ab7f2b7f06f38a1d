//! DismissalScheduler - per-alert cooldown timers
//!
//! Each armed alert gets one timer task. Arming again for the same alert
//! aborts the previous task; every arming carries a generation so a timer
//! that already woke up cannot remove an alert that was re-armed after it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct DismissalScheduler {
    delay: Duration,
    timers: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
}

impl DismissalScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start (or restart) the cooldown for an alert.
    ///
    /// `on_expire` runs once the delay elapses and receives the alert id and
    /// the generation of this arming; it should call [`Self::complete`]
    /// before acting.
    pub fn arm<F, Fut>(&self, alert_id: &str, on_expire: F) -> u64
    where
        F: FnOnce(String, u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let id = alert_id.to_string();

        // Held across the spawn so the timer cannot complete before it is recorded
        let mut timers = self.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expire(id, generation).await;
        });

        if let Some(previous) = timers.insert(
            alert_id.to_string(),
            ArmedTimer { generation, handle },
        ) {
            previous.handle.abort();
            tracing::debug!(alert_id = %alert_id, "Dismissal timer re-armed");
        }

        generation
    }

    /// Claim an expiry. Returns false when the timer was cancelled or
    /// superseded since it was armed.
    pub fn complete(&self, alert_id: &str, generation: u64) -> bool {
        let mut timers = self.timers.lock();
        match timers.get(alert_id) {
            Some(timer) if timer.generation == generation => {
                timers.remove(alert_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel one timer. Returns true when a timer was armed.
    pub fn cancel(&self, alert_id: &str) -> bool {
        match self.timers.lock().remove(alert_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn is_armed(&self, alert_id: &str) -> bool {
        self.timers.lock().contains_key(alert_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for DismissalScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.get_mut().drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> Arc<Mutex<Vec<(String, u64)>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn arm_recording(
        scheduler: &Arc<DismissalScheduler>,
        fired: &Arc<Mutex<Vec<(String, u64)>>>,
        alert_id: &str,
    ) -> u64 {
        let scheduler_ref = Arc::downgrade(scheduler);
        let fired = fired.clone();
        scheduler.arm(alert_id, move |id, generation| async move {
            if let Some(scheduler) = scheduler_ref.upgrade() {
                if scheduler.complete(&id, generation) {
                    fired.lock().push((id, generation));
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let scheduler = Arc::new(DismissalScheduler::new(Duration::from_millis(5000)));
        let fired = recorder();

        arm_recording(&scheduler, &fired, "a1");

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(fired.lock().is_empty());
        assert!(scheduler.is_armed("a1"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.lock().len(), 1);
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let scheduler = Arc::new(DismissalScheduler::new(Duration::from_millis(1000)));
        let fired = recorder();

        arm_recording(&scheduler, &fired, "a1");
        assert!(scheduler.cancel("a1"));
        assert!(!scheduler.cancel("a1"));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(fired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_window() {
        let scheduler = Arc::new(DismissalScheduler::new(Duration::from_millis(1000)));
        let fired = recorder();

        let first = arm_recording(&scheduler, &fired, "a1");
        tokio::time::sleep(Duration::from_millis(600)).await;
        let second = arm_recording(&scheduler, &fired, "a1");
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.lock().as_slice(), &[("a1".to_string(), second)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_rejected() {
        let scheduler = DismissalScheduler::new(Duration::from_secs(60));
        let first = scheduler.arm("a1", |_, _| async {});
        let second = scheduler.arm("a1", |_, _| async {});

        assert!(!scheduler.complete("a1", first));
        assert!(scheduler.complete("a1", second));
        assert!(!scheduler.is_armed("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = Arc::new(DismissalScheduler::new(Duration::from_millis(100)));
        let fired = recorder();

        arm_recording(&scheduler, &fired, "a1");
        arm_recording(&scheduler, &fired, "a2");
        assert_eq!(scheduler.cancel_all(), 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().is_empty());
    }
}
