use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One periodic task per ongoing trip. Starting twice keeps the first task,
/// stopping an unknown booking does nothing.
pub struct TripTracker {
    interval: Duration,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TripTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip(self, tick))]
    pub fn start(&self, booking_id: Uuid, tick: Tick) -> bool {
        let mut tasks = self.tasks();

        if let Some(handle) = tasks.get(&booking_id) {
            if !handle.is_finished() {
                tracing::info!("already tracking");
                return false;
            }
        }

        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        tasks.insert(booking_id, handle);
        tracing::info!("tracking started");

        true
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self, booking_id: Uuid) -> bool {
        match self.tasks().remove(&booking_id) {
            Some(handle) => {
                handle.abort();
                tracing::info!("tracking stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, booking_id: Uuid) -> bool {
        self.tasks().contains_key(&booking_id)
    }

    pub fn active(&self) -> usize {
        self.tasks().len()
    }

    pub fn stop_all(&self) {
        for (_, handle) in self.tasks().drain() {
            handle.abort();
        }
    }
}

impl Drop for TripTracker {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tick(counter: Arc<AtomicUsize>) -> Tick {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let tracker = TripTracker::new(Duration::from_millis(20));
        let counter = Arc::new(AtomicUsize::new(0));
        let booking = Uuid::new_v4();

        assert!(tracker.start(booking, counting_tick(counter.clone())));
        assert!(!tracker.start(booking, counting_tick(counter.clone())));
        assert_eq!(tracker.active(), 1);

        tokio::time::sleep(Duration::from_millis(110)).await;
        let ticks = counter.load(Ordering::SeqCst);

        // one timer, so roughly one tick per period rather than two
        assert!(ticks >= 2 && ticks <= 6, "ticks = {}", ticks);
    }

    #[tokio::test]
    async fn stop_cancels_and_unknown_is_noop() {
        let tracker = TripTracker::new(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        let booking = Uuid::new_v4();

        assert!(!tracker.stop(Uuid::new_v4()));

        tracker.start(booking, counting_tick(counter.clone()));
        assert!(tracker.is_tracking(booking));
        assert!(tracker.stop(booking));
        assert!(!tracker.stop(booking));
        assert!(!tracker.is_tracking(booking));

        let after_stop = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }
}
