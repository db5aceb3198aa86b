use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::ingest::IngestionCycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick
    Idle,
    /// Executing one ingestion cycle
    Running,
}

/// Owned stop signal for a [`PollingScheduler`].
///
/// Dropping the handle stops the scheduler as well.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Runs ingestion cycles on a fixed interval, one at a time.
///
/// Ticks that come due while a cycle is still running are skipped, so a slow
/// cycle delays the schedule instead of overlapping the next one. Shutdown is
/// observed between cycles; an in-flight cycle always runs to completion.
pub struct PollingScheduler {
    cycle: IngestionCycle,
    interval: Duration,
    state_tx: watch::Sender<SchedulerState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PollingScheduler {
    pub fn new(cycle: IngestionCycle, interval: Duration) -> (Self, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(SchedulerState::Idle);

        let scheduler = Self {
            cycle,
            interval,
            state_tx,
            shutdown_rx,
        };
        (scheduler, ShutdownHandle { tx: shutdown_tx })
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Run until shut down. Returns the number of cycles executed.
    pub async fn run(self) -> usize {
        let PollingScheduler {
            cycle,
            interval,
            state_tx,
            mut shutdown_rx,
        } = self;

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0usize;

        tracing::info!(
            source = cycle.source_name(),
            "Ingestion scheduler started (interval: {:?})",
            interval
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                _ = ticker.tick() => {}
            }

            state_tx.send_replace(SchedulerState::Running);
            if let Err(e) = cycle.run_cycle().await {
                // already logged by the cycle; retried on the next tick
                tracing::debug!(error = %e, "Cycle ended early");
            }
            cycles += 1;
            state_tx.send_replace(SchedulerState::Idle);
        }

        tracing::info!(cycles, "Ingestion scheduler stopped");
        cycles
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestResult;
    use crate::ingest::tests::{api, StubSource};
    use crate::sources::{FetchBatch, SourceAdapter};
    use crate::store::{ContentStore, MemoryContentStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn scheduler_with(
        source: impl SourceAdapter + 'static,
        interval_ms: u64,
    ) -> (PollingScheduler, ShutdownHandle, Arc<MemoryContentStore>) {
        let store = Arc::new(MemoryContentStore::new());
        let cycle = IngestionCycle::new(Box::new(source), store.clone());
        let (scheduler, handle) = PollingScheduler::new(cycle, Duration::from_millis(interval_ms));
        (scheduler, handle, store)
    }

    #[tokio::test]
    async fn runs_cycles_until_shut_down() {
        let source = StubSource::returning(vec![api("A"), api("B")]);
        let calls = source.calls.clone();
        let (scheduler, handle, store) = scheduler_with(source, 20);
        let state = scheduler.state();

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(90)).await;
        handle.shutdown();
        let cycles = task.await.unwrap();

        assert!(cycles >= 2, "expected repeated cycles, got {}", cycles);
        assert_eq!(calls.load(Ordering::SeqCst), cycles);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(*state.borrow(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn shutdown_before_start_runs_nothing() {
        let source = StubSource::returning(vec![api("A")]);
        let calls = source.calls.clone();
        let (scheduler, handle, _store) = scheduler_with(source, 10);

        handle.shutdown();
        assert_eq!(scheduler.run().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_scheduler() {
        let (scheduler, handle, _store) = scheduler_with(StubSource::returning(vec![]), 10);
        let task = tokio::spawn(scheduler.run());

        drop(handle);
        let finished = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn failing_cycles_keep_the_scheduler_alive() {
        let source = StubSource::failing();
        let calls = source.calls.clone();
        let (scheduler, handle, store) = scheduler_with(source, 10);

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.shutdown();
        task.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    /// Records the scheduler state seen during each fetch and how many
    /// fetches were in flight at once.
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: Arc<AtomicUsize>,
        seen_states: Arc<Mutex<Vec<SchedulerState>>>,
        state: Arc<Mutex<Option<watch::Receiver<SchedulerState>>>>,
    }

    #[async_trait]
    impl SourceAdapter for SlowSource {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn fetch(&self) -> IngestResult<FetchBatch> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let observed = self.state.lock().unwrap().as_ref().map(|rx| *rx.borrow());
            if let Some(s) = observed {
                self.seen_states.lock().unwrap().push(s);
            }

            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchBatch::default())
        }
    }

    #[tokio::test]
    async fn slow_cycles_never_overlap() {
        let source = SlowSource::default();
        let max_in_flight = source.max_in_flight.clone();
        let seen_states = source.seen_states.clone();
        let state_slot = source.state.clone();

        let (scheduler, handle, _store) = scheduler_with(source, 5);
        *state_slot.lock().unwrap() = Some(scheduler.state());

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.shutdown();
        let cycles = task.await.unwrap();

        assert!(cycles >= 2);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        let seen = seen_states.lock().unwrap();
        assert_eq!(seen.len(), cycles);
        assert!(seen.iter().all(|s| *s == SchedulerState::Running));
    }
}
